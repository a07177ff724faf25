// Note delay - Shifts due times forward, tempo-synced or fixed
// In accumulate mode each successive NOTE_ON in a batch climbs one step
// higher on the delay staircase

use super::{
    ConfigField, ConfigFieldKind, Rate, StageKind, TransformError, TransformStage, option_bool,
    option_f64, option_rate, option_str,
};
use crate::clock::ClockSnapshot;
use crate::command::{Command, CommandKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How the base delay is derived
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DelayTime {
    /// A subdivision of the current tempo
    Synced(Rate),
    /// A fixed millisecond value, tempo-independent
    Fixed(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteDelayConfig {
    pub time: DelayTime,
    /// Staircase mode: the n-th NOTE_ON of a batch is delayed n times the base
    pub accumulate: bool,
}

impl Default for NoteDelayConfig {
    fn default() -> Self {
        Self {
            time: DelayTime::Synced(Rate::Eighth),
            accumulate: false,
        }
    }
}

const FIELDS: &[ConfigField] = &[
    ConfigField {
        name: "mode",
        kind: ConfigFieldKind::Choice {
            options: &["synced", "fixed"],
        },
    },
    ConfigField {
        name: "rate",
        kind: ConfigFieldKind::Choice {
            options: Rate::NAMES,
        },
    },
    ConfigField {
        name: "fixed-ms",
        kind: ConfigFieldKind::Number {
            min: 0.0,
            max: 10_000.0,
        },
    },
    ConfigField {
        name: "accumulate",
        kind: ConfigFieldKind::Toggle,
    },
];

/// The note delay stage
///
/// Every note event is pushed `base` milliseconds into the future. In
/// accumulate mode the n-th NOTE_ON of a batch (1-based, the counter
/// restarts each batch) is delayed by `n * base`, and the note's multiplier
/// is remembered so the matching NOTE_OFF rides the same shift even when it
/// arrives batches later.
pub struct NoteDelay {
    config: NoteDelayConfig,
    multipliers: HashMap<u8, f64>,
}

impl NoteDelay {
    pub fn new(config: NoteDelayConfig) -> Self {
        Self {
            config,
            multipliers: HashMap::new(),
        }
    }

    pub fn config(&self) -> &NoteDelayConfig {
        &self.config
    }

    fn base_ms(&self, bpm: f64) -> f64 {
        match self.config.time {
            DelayTime::Synced(rate) => rate.step_ms(bpm),
            DelayTime::Fixed(ms) => ms.max(0.0),
        }
    }
}

impl Default for NoteDelay {
    fn default() -> Self {
        Self::new(NoteDelayConfig::default())
    }
}

impl TransformStage for NoteDelay {
    fn kind(&self) -> StageKind {
        StageKind::NoteDelay
    }

    fn transform(
        &mut self,
        batch: Vec<Command>,
        clock: &ClockSnapshot,
    ) -> Result<Vec<Command>, TransformError> {
        let base = self.base_ms(clock.bpm);
        let mut out = Vec::with_capacity(batch.len());
        let mut index = 0u32;

        for cmd in batch {
            match cmd.kind {
                CommandKind::NoteOn { note, .. } => {
                    let multiplier = if self.config.accumulate {
                        index += 1;
                        index as f64
                    } else {
                        1.0
                    };
                    self.multipliers.insert(note, multiplier);
                    out.push(cmd.delayed_by(base * multiplier));
                }
                CommandKind::NoteOff { note } => {
                    let multiplier = if self.config.accumulate {
                        self.multipliers.remove(&note).unwrap_or(1.0)
                    } else {
                        self.multipliers.remove(&note);
                        1.0
                    };
                    out.push(cmd.delayed_by(base * multiplier));
                }
                _ => out.push(cmd),
            }
        }

        Ok(out)
    }

    fn reset(&mut self) {
        self.multipliers.clear();
    }

    fn config_fields(&self) -> &'static [ConfigField] {
        FIELDS
    }

    fn set_option(&mut self, name: &str, value: &serde_json::Value) -> Result<(), TransformError> {
        match name {
            "mode" => {
                let mode = option_str(name, value)?;
                self.config.time = match mode {
                    "synced" => match self.config.time {
                        DelayTime::Synced(rate) => DelayTime::Synced(rate),
                        DelayTime::Fixed(_) => DelayTime::Synced(Rate::Eighth),
                    },
                    "fixed" => match self.config.time {
                        DelayTime::Fixed(ms) => DelayTime::Fixed(ms),
                        DelayTime::Synced(_) => DelayTime::Fixed(250.0),
                    },
                    other => {
                        return Err(TransformError::InvalidValue {
                            option: name.to_string(),
                            reason: format!("unknown mode `{other}`"),
                        });
                    }
                };
                Ok(())
            }
            "rate" => {
                self.config.time = DelayTime::Synced(option_rate(name, value)?);
                Ok(())
            }
            "fixed-ms" => {
                self.config.time = DelayTime::Fixed(option_f64(name, value)?.max(0.0));
                Ok(())
            }
            "accumulate" => {
                self.config.accumulate = option_bool(name, value)?;
                Ok(())
            }
            other => Err(TransformError::UnknownOption(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock_at(now: f64) -> ClockSnapshot {
        ClockSnapshot {
            now,
            bpm: 120.0,
            divisions: 0,
        }
    }

    #[test]
    fn test_synced_delay_follows_tempo() {
        // An eighth at 120 BPM is 250ms
        let mut stage = NoteDelay::default();

        let out = stage
            .transform(vec![Command::note_on(60, 100, 0.0)], &clock_at(0.0))
            .unwrap();
        assert_eq!(out[0].due_at, 250.0);

        // Same stage at 60 BPM doubles the shift
        let slow = ClockSnapshot {
            now: 0.0,
            bpm: 60.0,
            divisions: 0,
        };
        let out = stage
            .transform(vec![Command::note_on(62, 100, 0.0)], &slow)
            .unwrap();
        assert_eq!(out[0].due_at, 500.0);
    }

    #[test]
    fn test_fixed_delay_ignores_tempo() {
        let config = NoteDelayConfig {
            time: DelayTime::Fixed(100.0),
            accumulate: false,
        };
        let mut stage = NoteDelay::new(config);

        let slow = ClockSnapshot {
            now: 0.0,
            bpm: 30.0,
            divisions: 0,
        };
        let out = stage
            .transform(vec![Command::note_on(60, 100, 10.0)], &slow)
            .unwrap();
        assert_eq!(out[0].due_at, 110.0);
    }

    #[test]
    fn test_off_rides_the_same_delay() {
        let config = NoteDelayConfig {
            time: DelayTime::Fixed(100.0),
            accumulate: false,
        };
        let mut stage = NoteDelay::new(config);

        stage
            .transform(vec![Command::note_on(60, 100, 0.0)], &clock_at(0.0))
            .unwrap();
        let off = stage
            .transform(vec![Command::note_off(60, 400.0)], &clock_at(400.0))
            .unwrap();
        assert_eq!(off[0].due_at, 500.0);
    }

    #[test]
    fn test_accumulate_staircase() {
        let config = NoteDelayConfig {
            time: DelayTime::Fixed(100.0),
            accumulate: true,
        };
        let mut stage = NoteDelay::new(config);

        let out = stage
            .transform(
                vec![
                    Command::note_on(60, 100, 0.0),
                    Command::note_on(62, 100, 0.0),
                    Command::note_on(64, 100, 0.0),
                ],
                &clock_at(0.0),
            )
            .unwrap();

        let dues: Vec<f64> = out.iter().map(|c| c.due_at).collect();
        assert_eq!(dues, vec![100.0, 200.0, 300.0]);
    }

    #[test]
    fn test_accumulate_off_uses_matching_multiple() {
        let config = NoteDelayConfig {
            time: DelayTime::Fixed(100.0),
            accumulate: true,
        };
        let mut stage = NoteDelay::new(config);

        stage
            .transform(
                vec![
                    Command::note_on(60, 100, 0.0),
                    Command::note_on(62, 100, 0.0),
                ],
                &clock_at(0.0),
            )
            .unwrap();

        // The off for the second note, arriving in a later batch, is
        // delayed by the same 2x multiple
        let off = stage
            .transform(vec![Command::note_off(62, 500.0)], &clock_at(500.0))
            .unwrap();
        assert_eq!(off[0].due_at, 700.0);

        // And the counter restarted for this batch: a fresh on gets 1x
        let on = stage
            .transform(vec![Command::note_on(70, 100, 600.0)], &clock_at(600.0))
            .unwrap();
        assert_eq!(on[0].due_at, 700.0);
    }

    #[test]
    fn test_non_note_commands_pass_untouched() {
        let mut stage = NoteDelay::default();
        let out = stage
            .transform(vec![Command::control_change(7, 100, 0.0)], &clock_at(0.0))
            .unwrap();
        assert_eq!(out[0].due_at, 0.0);
    }

    #[test]
    fn test_reset_clears_multipliers() {
        let config = NoteDelayConfig {
            time: DelayTime::Fixed(100.0),
            accumulate: true,
        };
        let mut stage = NoteDelay::new(config);

        stage
            .transform(
                vec![
                    Command::note_on(60, 100, 0.0),
                    Command::note_on(62, 100, 0.0),
                ],
                &clock_at(0.0),
            )
            .unwrap();
        stage.reset();

        let off = stage
            .transform(vec![Command::note_off(62, 100.0)], &clock_at(100.0))
            .unwrap();
        assert_eq!(off[0].due_at, 200.0); // falls back to 1x
    }

    #[test]
    fn test_set_option() {
        let mut stage = NoteDelay::default();

        stage.set_option("fixed-ms", &serde_json::json!(125)).unwrap();
        assert_eq!(stage.config().time, DelayTime::Fixed(125.0));

        stage.set_option("rate", &serde_json::json!("triplet")).unwrap();
        assert_eq!(stage.config().time, DelayTime::Synced(Rate::Triplet));

        stage.set_option("accumulate", &serde_json::json!(true)).unwrap();
        assert!(stage.config().accumulate);

        assert!(stage.set_option("feedback", &serde_json::json!(1)).is_err());
    }
}
