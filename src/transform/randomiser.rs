// Randomiser - Probabilistic pitch shifting
// Shifted notes are remembered so their releases land on the pitch that is
// actually sounding

use super::{
    ConfigField, ConfigFieldKind, StageKind, TransformError, TransformStage, option_f64,
};
use crate::clock::ClockSnapshot;
use crate::command::{Command, CommandKind, clamp_note};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomiserConfig {
    /// Chance a NOTE_ON is shifted, 0 to 100 percent
    pub probability: u8,
    /// Shift range in semitones, uniform in [-offset, +offset]
    pub offset: u8,
}

impl Default for RandomiserConfig {
    fn default() -> Self {
        Self {
            probability: 50,
            offset: 12,
        }
    }
}

const FIELDS: &[ConfigField] = &[
    ConfigField {
        name: "probability",
        kind: ConfigFieldKind::Number {
            min: 0.0,
            max: 100.0,
        },
    },
    ConfigField {
        name: "offset",
        kind: ConfigFieldKind::Number {
            min: 0.0,
            max: 127.0,
        },
    },
];

/// The pitch randomisation stage
///
/// With the configured probability a NOTE_ON is shifted by a uniform random
/// semitone count, clamped into the MIDI range. The stage records, per
/// original note number, the pitch it actually emitted (shifted or not);
/// the matching NOTE_OFF re-emits the recorded pitch and forgets the
/// mapping. NOTE_OFFs are never randomised on their own.
pub struct Randomiser {
    config: RandomiserConfig,
    sounding: HashMap<u8, u8>,
    rng: SmallRng,
}

impl Randomiser {
    pub fn new(config: RandomiserConfig) -> Self {
        Self {
            config,
            sounding: HashMap::new(),
            rng: SmallRng::from_entropy(),
        }
    }

    /// Deterministic variant for tests
    pub fn with_seed(config: RandomiserConfig, seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
            ..Self::new(config)
        }
    }

    pub fn config(&self) -> &RandomiserConfig {
        &self.config
    }

    fn pick_pitch(&mut self, note: u8) -> u8 {
        if self.config.probability == 0 || self.config.offset == 0 {
            return note;
        }
        if self.rng.gen_range(0..100) >= self.config.probability {
            return note;
        }
        let offset = self.config.offset as i32;
        let shift = self.rng.gen_range(-offset..=offset);
        clamp_note(note as i32 + shift)
    }
}

impl Default for Randomiser {
    fn default() -> Self {
        Self::new(RandomiserConfig::default())
    }
}

impl TransformStage for Randomiser {
    fn kind(&self) -> StageKind {
        StageKind::Randomiser
    }

    fn transform(
        &mut self,
        batch: Vec<Command>,
        clock: &ClockSnapshot,
    ) -> Result<Vec<Command>, TransformError> {
        let mut out = Vec::with_capacity(batch.len());

        for cmd in batch {
            match cmd.kind {
                CommandKind::NoteOn { note, .. } => {
                    // A re-press while the note is still sounding releases
                    // the old voice before retriggering
                    if let Some(previous) = self.sounding.remove(&note) {
                        out.push(
                            cmd.with_kind(CommandKind::NoteOff { note: previous })
                                .with_due_at(clock.now)
                                .with_end_at(None),
                        );
                    }
                    let pitch = self.pick_pitch(note);
                    self.sounding.insert(note, pitch);
                    out.push(cmd.with_note(pitch));
                }
                CommandKind::NoteOff { note } => match self.sounding.remove(&note) {
                    Some(pitch) => out.push(cmd.with_note(pitch)),
                    None => out.push(cmd),
                },
                _ => out.push(cmd),
            }
        }

        Ok(out)
    }

    fn reset(&mut self) {
        self.sounding.clear();
    }

    fn config_fields(&self) -> &'static [ConfigField] {
        FIELDS
    }

    fn set_option(&mut self, name: &str, value: &serde_json::Value) -> Result<(), TransformError> {
        match name {
            "probability" => {
                let p = option_f64(name, value)?;
                self.config.probability = (p as i64).clamp(0, 100) as u8;
                Ok(())
            }
            "offset" => {
                let o = option_f64(name, value)?;
                self.config.offset = (o as i64).clamp(0, 127) as u8;
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
    fn test_zero_probability_leaves_pitch_unchanged() {
        let config = RandomiserConfig {
            probability: 0,
            offset: 12,
        };
        let mut stage = Randomiser::with_seed(config, 1);

        let out = stage
            .transform(vec![Command::note_on(60, 100, 0.0)], &clock_at(0.0))
            .unwrap();
        assert_eq!(out[0].note_number(), Some(60));
    }

    #[test]
    fn test_zero_offset_leaves_pitch_unchanged() {
        // Full probability with a zero-width range is still the identity
        let config = RandomiserConfig {
            probability: 100,
            offset: 0,
        };
        let mut stage = Randomiser::with_seed(config, 1);

        let out = stage
            .transform(vec![Command::note_on(60, 100, 0.0)], &clock_at(0.0))
            .unwrap();
        assert_eq!(out[0].note_number(), Some(60));
    }

    #[test]
    fn test_shifted_pitch_stays_in_midi_range() {
        let config = RandomiserConfig {
            probability: 100,
            offset: 127,
        };
        let mut stage = Randomiser::with_seed(config, 42);

        for seed_note in [0u8, 64, 127] {
            let out = stage
                .transform(
                    vec![Command::note_on(seed_note, 100, 0.0)],
                    &clock_at(0.0),
                )
                .unwrap();
            let pitch = out.last().unwrap().note_number().unwrap();
            assert!(pitch <= 127);
            stage.reset();
        }
    }

    #[test]
    fn test_note_off_reemits_recorded_pitch() {
        let config = RandomiserConfig {
            probability: 100,
            offset: 24,
        };
        let mut stage = Randomiser::with_seed(config, 3);

        let on = stage
            .transform(vec![Command::note_on(60, 100, 0.0)], &clock_at(0.0))
            .unwrap();
        let sounding = on[0].note_number().unwrap();

        let off = stage
            .transform(vec![Command::note_off(60, 100.0)], &clock_at(100.0))
            .unwrap();
        assert_eq!(off[0].note_number(), Some(sounding));

        // The mapping is consumed: a second off passes through untouched
        let off_again = stage
            .transform(vec![Command::note_off(60, 200.0)], &clock_at(200.0))
            .unwrap();
        assert_eq!(off_again[0].note_number(), Some(60));
    }

    #[test]
    fn test_unmapped_note_off_passes_through() {
        let mut stage = Randomiser::default();
        let out = stage
            .transform(vec![Command::note_off(72, 0.0)], &clock_at(0.0))
            .unwrap();
        assert_eq!(out[0].note_number(), Some(72));
    }

    #[test]
    fn test_repress_releases_previous_voice() {
        let config = RandomiserConfig {
            probability: 100,
            offset: 24,
        };
        let mut stage = Randomiser::with_seed(config, 9);

        let first = stage
            .transform(vec![Command::note_on(60, 100, 0.0)], &clock_at(0.0))
            .unwrap();
        let first_pitch = first[0].note_number().unwrap();

        let out = stage
            .transform(vec![Command::note_on(60, 100, 50.0)], &clock_at(50.0))
            .unwrap();

        assert!(out[0].is_note_off());
        assert_eq!(out[0].note_number(), Some(first_pitch));
        assert!(out[1].is_note_on());
    }

    #[test]
    fn test_reset_forgets_mappings() {
        let config = RandomiserConfig {
            probability: 100,
            offset: 24,
        };
        let mut stage = Randomiser::with_seed(config, 5);

        stage
            .transform(vec![Command::note_on(60, 100, 0.0)], &clock_at(0.0))
            .unwrap();
        stage.reset();

        let off = stage
            .transform(vec![Command::note_off(60, 100.0)], &clock_at(100.0))
            .unwrap();
        assert_eq!(off[0].note_number(), Some(60));
    }

    #[test]
    fn test_set_option_clamps() {
        let mut stage = Randomiser::default();
        stage
            .set_option("probability", &serde_json::json!(250))
            .unwrap();
        stage.set_option("offset", &serde_json::json!(-3)).unwrap();

        assert_eq!(stage.config().probability, 100);
        assert_eq!(stage.config().offset, 0);
    }
}
