// Note repeater - Echoes each NOTE_ON as tempo-spaced repeats

use super::{
    ConfigField, ConfigFieldKind, Rate, StageKind, TransformError, TransformStage, option_f64,
    option_rate,
};
use crate::clock::ClockSnapshot;
use crate::command::{Command, CommandKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteRepeaterConfig {
    /// Extra hits after the original, 1 to 8
    pub repeats: u8,
    pub rate: Rate,
}

impl Default for NoteRepeaterConfig {
    fn default() -> Self {
        Self {
            repeats: 3,
            rate: Rate::Sixteenth,
        }
    }
}

const FIELDS: &[ConfigField] = &[
    ConfigField {
        name: "repeats",
        kind: ConfigFieldKind::Number { min: 1.0, max: 8.0 },
    },
    ConfigField {
        name: "rate",
        kind: ConfigFieldKind::Choice {
            options: Rate::NAMES,
        },
    },
];

/// The note repetition stage
///
/// Every NOTE_ON passes through followed by `repeats` copies spaced one
/// rate-step apart. All copies share the original pitch, so the voice they
/// retrigger is released by a single NOTE_OFF: the stage tracks the spawned
/// pitch set per original note and forwards exactly one release per unique
/// pitch when the original NOTE_OFF arrives.
pub struct NoteRepeater {
    config: NoteRepeaterConfig,
    spawned: HashMap<u8, Vec<u8>>,
}

impl NoteRepeater {
    pub fn new(config: NoteRepeaterConfig) -> Self {
        Self {
            config,
            spawned: HashMap::new(),
        }
    }

    pub fn config(&self) -> &NoteRepeaterConfig {
        &self.config
    }

    fn release(&mut self, note: u8, template: &Command, at: f64, out: &mut Vec<Command>) {
        let Some(pitches) = self.spawned.remove(&note) else {
            return;
        };
        let mut released: Vec<u8> = Vec::new();
        for pitch in pitches {
            if !released.contains(&pitch) {
                released.push(pitch);
                out.push(
                    template
                        .with_kind(CommandKind::NoteOff { note: pitch })
                        .with_due_at(at)
                        .with_end_at(None),
                );
            }
        }
    }
}

impl Default for NoteRepeater {
    fn default() -> Self {
        Self::new(NoteRepeaterConfig::default())
    }
}

impl TransformStage for NoteRepeater {
    fn kind(&self) -> StageKind {
        StageKind::NoteRepeater
    }

    fn transform(
        &mut self,
        batch: Vec<Command>,
        clock: &ClockSnapshot,
    ) -> Result<Vec<Command>, TransformError> {
        let step = self.config.rate.step_ms(clock.bpm);
        let mut out = Vec::with_capacity(batch.len() * (1 + self.config.repeats as usize));

        for cmd in batch {
            match cmd.kind {
                CommandKind::NoteOn { note, .. } => {
                    if self.spawned.contains_key(&note) {
                        self.release(note, &cmd, clock.now, &mut out);
                    }

                    out.push(cmd);
                    for i in 1..=self.config.repeats.clamp(1, 8) {
                        out.push(cmd.delayed_by(step * i as f64));
                    }
                    self.spawned.insert(note, vec![note]);
                }
                CommandKind::NoteOff { note } => {
                    if self.spawned.contains_key(&note) {
                        self.release(note, &cmd, clock.now, &mut out);
                    } else {
                        out.push(cmd);
                    }
                }
                _ => out.push(cmd),
            }
        }

        Ok(out)
    }

    fn reset(&mut self) {
        self.spawned.clear();
    }

    fn config_fields(&self) -> &'static [ConfigField] {
        FIELDS
    }

    fn set_option(&mut self, name: &str, value: &serde_json::Value) -> Result<(), TransformError> {
        match name {
            "repeats" => {
                let repeats = option_f64(name, value)?;
                self.config.repeats = (repeats as i64).clamp(1, 8) as u8;
                Ok(())
            }
            "rate" => {
                self.config.rate = option_rate(name, value)?;
                Ok(())
            }
            other => Err(TransformError::UnknownOption(other.to_string())),
        }
    }
}
