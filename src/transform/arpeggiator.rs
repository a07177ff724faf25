// Arpeggiator - Replaces held chords with stepped single-note sequences
// The densest generator stage: one chord fans out into many synthetic
// notes, each of which must eventually be released exactly once

use super::{
    ConfigField, ConfigFieldKind, Rate, StageKind, TransformError, TransformStage, option_f64,
    option_rate, option_str,
};
use crate::clock::ClockSnapshot;
use crate::command::{Command, CommandKind, clamp_note};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Order in which the chord notes are stepped through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArpPattern {
    Up,
    Down,
    UpDown,
    DownUp,
    Random,
    /// No arpeggiation; the chord passes through untouched
    Chord,
}

impl ArpPattern {
    pub const NAMES: &'static [&'static str] =
        &["up", "down", "up-down", "down-up", "random", "chord"];

    pub fn name(&self) -> &'static str {
        match self {
            ArpPattern::Up => "up",
            ArpPattern::Down => "down",
            ArpPattern::UpDown => "up-down",
            ArpPattern::DownUp => "down-up",
            ArpPattern::Random => "random",
            ArpPattern::Chord => "chord",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "up" => Some(ArpPattern::Up),
            "down" => Some(ArpPattern::Down),
            "up-down" => Some(ArpPattern::UpDown),
            "down-up" => Some(ArpPattern::DownUp),
            "random" => Some(ArpPattern::Random),
            "chord" => Some(ArpPattern::Chord),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArpeggiatorConfig {
    pub pattern: ArpPattern,
    pub rate: Rate,
    /// Octave span of the generated sequence, 1 to 4
    pub octaves: u8,
}

impl Default for ArpeggiatorConfig {
    fn default() -> Self {
        Self {
            pattern: ArpPattern::Up,
            rate: Rate::Sixteenth,
            octaves: 1,
        }
    }
}

const FIELDS: &[ConfigField] = &[
    ConfigField {
        name: "pattern",
        kind: ConfigFieldKind::Choice {
            options: ArpPattern::NAMES,
        },
    },
    ConfigField {
        name: "rate",
        kind: ConfigFieldKind::Choice {
            options: Rate::NAMES,
        },
    },
    ConfigField {
        name: "octaves",
        kind: ConfigFieldKind::Number { min: 1.0, max: 4.0 },
    },
];

/// The arpeggiation stage
///
/// Holds the set of live note numbers. Whenever two or more notes are live
/// at once, the chord is replaced by a sequence of single notes spaced by
/// the configured rate. Per original note number the stage records every
/// synthetic `(note, scheduled_at)` pair it generated; the original's
/// NOTE_OFF releases each unique synthetic pitch exactly once, at the
/// current time, so early release is always honoured.
///
/// A NOTE_ON for a note that is already tracked force-releases its
/// synthetics and retriggers as a fresh press.
pub struct Arpeggiator {
    config: ArpeggiatorConfig,
    held: Vec<u8>,
    spawned: HashMap<u8, Vec<(u8, f64)>>,
    rng: SmallRng,
}

impl Arpeggiator {
    pub fn new(config: ArpeggiatorConfig) -> Self {
        Self {
            config,
            held: Vec::new(),
            spawned: HashMap::new(),
            rng: SmallRng::from_entropy(),
        }
    }

    /// Deterministic variant for tests of the random pattern
    pub fn with_seed(config: ArpeggiatorConfig, seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
            ..Self::new(config)
        }
    }

    pub fn config(&self) -> &ArpeggiatorConfig {
        &self.config
    }

    fn hold(&mut self, note: u8) {
        if let Err(pos) = self.held.binary_search(&note) {
            self.held.insert(pos, note);
        }
    }

    /// Release every tracked synthetic for `note`, one off per unique pitch
    fn release(&mut self, note: u8, template: &Command, at: f64, out: &mut Vec<Command>) {
        let Some(synthetics) = self.spawned.remove(&note) else {
            return;
        };
        let mut released: Vec<u8> = Vec::new();
        for (pitch, _) in synthetics {
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

    /// Expand the held set across the octave span, ordered by the pattern
    fn sequence_pitches(&mut self) -> Vec<(u8, u8)> {
        let mut pitches: Vec<(u8, u8)> = Vec::new();
        for octave in 0..self.config.octaves.clamp(1, 4) {
            for &orig in &self.held {
                let pitch = clamp_note(orig as i32 + 12 * octave as i32);
                if !pitches.iter().any(|&(_, p)| p == pitch) {
                    pitches.push((orig, pitch));
                }
            }
        }
        pitches.sort_by_key(|&(_, p)| p);

        match self.config.pattern {
            ArpPattern::Up | ArpPattern::Chord => pitches,
            ArpPattern::Down => {
                pitches.reverse();
                pitches
            }
            ArpPattern::UpDown => turnaround(pitches),
            ArpPattern::DownUp => {
                pitches.reverse();
                turnaround(pitches)
            }
            ArpPattern::Random => {
                pitches.shuffle(&mut self.rng);
                pitches
            }
        }
    }

    /// Replace the live chord with its stepped sequence
    fn emit_sequence(&mut self, template: &Command, clock: &ClockSnapshot, out: &mut Vec<Command>) {
        let step = self.config.rate.step_ms(clock.bpm);
        let velocity = template.velocity().unwrap_or(100);

        for (index, (orig, pitch)) in self.sequence_pitches().into_iter().enumerate() {
            let at = template.due_at + index as f64 * step;
            out.push(
                template
                    .with_kind(CommandKind::NoteOn {
                        note: pitch,
                        velocity,
                    })
                    .with_due_at(at),
            );
            self.spawned.entry(orig).or_default().push((pitch, at));
        }
    }
}

/// Ascend/descend once without repeating the turnaround note (or the note
/// the next cycle would restart on)
fn turnaround(pitches: Vec<(u8, u8)>) -> Vec<(u8, u8)> {
    if pitches.len() <= 2 {
        return pitches;
    }
    let mut out = pitches.clone();
    out.extend(pitches[1..pitches.len() - 1].iter().rev().copied());
    out
}

impl Default for Arpeggiator {
    fn default() -> Self {
        Self::new(ArpeggiatorConfig::default())
    }
}

impl TransformStage for Arpeggiator {
    fn kind(&self) -> StageKind {
        StageKind::Arpeggiator
    }

    fn transform(
        &mut self,
        batch: Vec<Command>,
        clock: &ClockSnapshot,
    ) -> Result<Vec<Command>, TransformError> {
        if self.config.pattern == ArpPattern::Chord {
            return Ok(batch);
        }

        let mut out = Vec::with_capacity(batch.len());
        // Presses collected first so a chord arriving within one batch is
        // arpeggiated once, not once per note
        let mut pressed: Vec<Command> = Vec::new();

        for cmd in batch {
            match cmd.kind {
                CommandKind::NoteOn { note, .. } => {
                    if self.spawned.contains_key(&note) {
                        self.release(note, &cmd, clock.now, &mut out);
                        self.held.retain(|&n| n != note);
                    }
                    self.hold(note);
                    pressed.push(cmd);
                }
                CommandKind::NoteOff { note } => {
                    self.held.retain(|&n| n != note);
                    if self.spawned.contains_key(&note) {
                        self.release(note, &cmd, clock.now, &mut out);
                    } else {
                        out.push(cmd);
                    }
                }
                _ => out.push(cmd),
            }
        }

        if let Some(template) = pressed.first().copied() {
            if self.held.len() >= 2 {
                self.emit_sequence(&template, clock, &mut out);
            } else {
                // A lone note passes through, but is still tracked so its
                // release pairs up even if a chord forms later
                for cmd in pressed {
                    if let Some(note) = cmd.note_number() {
                        self.spawned.entry(note).or_default().push((note, cmd.due_at));
                    }
                    out.push(cmd);
                }
            }
        }

        Ok(out)
    }

    fn reset(&mut self) {
        self.held.clear();
        self.spawned.clear();
    }

    fn config_fields(&self) -> &'static [ConfigField] {
        FIELDS
    }

    fn set_option(&mut self, name: &str, value: &serde_json::Value) -> Result<(), TransformError> {
        match name {
            "pattern" => {
                let text = option_str(name, value)?;
                self.config.pattern =
                    ArpPattern::from_name(text).ok_or_else(|| TransformError::InvalidValue {
                        option: name.to_string(),
                        reason: format!("unknown pattern `{text}`"),
                    })?;
                Ok(())
            }
            "rate" => {
                self.config.rate = option_rate(name, value)?;
                Ok(())
            }
            "octaves" => {
                let octaves = option_f64(name, value)?;
                self.config.octaves = (octaves as i64).clamp(1, 4) as u8;
                Ok(())
            }
            other => Err(TransformError::UnknownOption(other.to_string())),
        }
    }
}
