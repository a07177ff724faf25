// Note shortener - Caps note length by scheduling the release up front
// Each NOTE_ON is paired with a synthetic NOTE_OFF a fixed duration later;
// the real release is then redundant and suppressed

use super::{ConfigField, ConfigFieldKind, StageKind, TransformError, TransformStage, option_f64};
use crate::clock::ClockSnapshot;
use crate::command::{Command, CommandKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteShortenerConfig {
    /// How long a note is allowed to sound, milliseconds
    pub duration_ms: f64,
}

impl Default for NoteShortenerConfig {
    fn default() -> Self {
        Self { duration_ms: 200.0 }
    }
}

const FIELDS: &[ConfigField] = &[ConfigField {
    name: "duration-ms",
    kind: ConfigFieldKind::Number {
        min: 1.0,
        max: 10_000.0,
    },
}];

/// The note shortening stage
///
/// For every NOTE_ON it emits the NOTE_ON unchanged plus a synthetic
/// NOTE_OFF scheduled `duration_ms` later. The original NOTE_OFF for that
/// note is removed from the batch, since release is already scheduled. The
/// suppression count per note handles re-presses: every press schedules its
/// own release and absorbs exactly one incoming off.
pub struct NoteShortener {
    config: NoteShortenerConfig,
    pending_offs: HashMap<u8, u32>,
}

impl NoteShortener {
    pub fn new(config: NoteShortenerConfig) -> Self {
        Self {
            config,
            pending_offs: HashMap::new(),
        }
    }

    pub fn config(&self) -> &NoteShortenerConfig {
        &self.config
    }
}

impl Default for NoteShortener {
    fn default() -> Self {
        Self::new(NoteShortenerConfig::default())
    }
}

impl TransformStage for NoteShortener {
    fn kind(&self) -> StageKind {
        StageKind::NoteShortener
    }

    fn transform(
        &mut self,
        batch: Vec<Command>,
        clock: &ClockSnapshot,
    ) -> Result<Vec<Command>, TransformError> {
        let mut out = Vec::with_capacity(batch.len() * 2);

        for cmd in batch {
            match cmd.kind {
                CommandKind::NoteOn { note, .. } => {
                    let release_at = cmd.due_at + self.config.duration_ms;
                    out.push(cmd.with_end_at(Some(release_at)));
                    out.push(
                        cmd.with_kind(CommandKind::NoteOff { note })
                            .with_created_at(clock.now)
                            .with_due_at(release_at)
                            .with_end_at(None),
                    );
                    *self.pending_offs.entry(note).or_insert(0) += 1;
                }
                CommandKind::NoteOff { note } => {
                    match self.pending_offs.get_mut(&note) {
                        Some(count) if *count > 0 => {
                            *count -= 1;
                            if *count == 0 {
                                self.pending_offs.remove(&note);
                            }
                            // Release already scheduled; drop the original
                        }
                        _ => out.push(cmd),
                    }
                }
                _ => out.push(cmd),
            }
        }

        Ok(out)
    }

    fn reset(&mut self) {
        self.pending_offs.clear();
    }

    fn config_fields(&self) -> &'static [ConfigField] {
        FIELDS
    }

    fn set_option(&mut self, name: &str, value: &serde_json::Value) -> Result<(), TransformError> {
        match name {
            "duration-ms" => {
                self.config.duration_ms = option_f64(name, value)?.max(1.0);
                Ok(())
            }
            other => Err(TransformError::UnknownOption(other.to_string())),
        }
    }
}
