// Harmoniser - Snaps pitches onto a modal scale
// The in-scale set is precomputed across the whole MIDI range; each NOTE_ON
// moves to the nearest member, and its release follows the moved pitch

use super::{
    ConfigField, ConfigFieldKind, StageKind, TransformError, TransformStage, option_f64,
    option_str,
};
use crate::clock::ClockSnapshot;
use crate::command::{Command, CommandKind, MIDI_MAX};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The seven diatonic modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Ionian,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Aeolian,
    Locrian,
}

impl Mode {
    pub const NAMES: &'static [&'static str] = &[
        "ionian",
        "dorian",
        "phrygian",
        "lydian",
        "mixolydian",
        "aeolian",
        "locrian",
    ];

    /// Semitone offsets of the scale degrees from the root
    pub fn intervals(&self) -> [u8; 7] {
        match self {
            Mode::Ionian => [0, 2, 4, 5, 7, 9, 11],
            Mode::Dorian => [0, 2, 3, 5, 7, 9, 10],
            Mode::Phrygian => [0, 1, 3, 5, 7, 8, 10],
            Mode::Lydian => [0, 2, 4, 6, 7, 9, 11],
            Mode::Mixolydian => [0, 2, 4, 5, 7, 9, 10],
            Mode::Aeolian => [0, 2, 3, 5, 7, 8, 10],
            Mode::Locrian => [0, 1, 3, 5, 6, 8, 10],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Mode::Ionian => "ionian",
            Mode::Dorian => "dorian",
            Mode::Phrygian => "phrygian",
            Mode::Lydian => "lydian",
            Mode::Mixolydian => "mixolydian",
            Mode::Aeolian => "aeolian",
            Mode::Locrian => "locrian",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ionian" => Some(Mode::Ionian),
            "dorian" => Some(Mode::Dorian),
            "phrygian" => Some(Mode::Phrygian),
            "lydian" => Some(Mode::Lydian),
            "mixolydian" => Some(Mode::Mixolydian),
            "aeolian" => Some(Mode::Aeolian),
            "locrian" => Some(Mode::Locrian),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarmoniserConfig {
    /// Root pitch class, 0 (C) to 11 (B)
    pub root: u8,
    pub mode: Mode,
}

impl Default for HarmoniserConfig {
    fn default() -> Self {
        Self {
            root: 0,
            mode: Mode::Ionian,
        }
    }
}

const FIELDS: &[ConfigField] = &[
    ConfigField {
        name: "root",
        kind: ConfigFieldKind::Number {
            min: 0.0,
            max: 11.0,
        },
    },
    ConfigField {
        name: "mode",
        kind: ConfigFieldKind::Choice {
            options: Mode::NAMES,
        },
    },
];

/// The harmonic correction stage
///
/// NOTE_ONs snap to the nearest pitch of the configured scale, scanning
/// outward from the played pitch with the lower candidate checked first at
/// each distance. The stage records original -> snapped per sounding note
/// and rewrites the matching NOTE_OFF to the snapped pitch, so an altered
/// note never leaves an orphaned voice behind.
pub struct Harmoniser {
    config: HarmoniserConfig,
    in_scale: [bool; 128],
    snapped: HashMap<u8, u8>,
}

impl Harmoniser {
    pub fn new(config: HarmoniserConfig) -> Self {
        let mut stage = Self {
            config,
            in_scale: [false; 128],
            snapped: HashMap::new(),
        };
        stage.rebuild_scale();
        stage
    }

    pub fn config(&self) -> &HarmoniserConfig {
        &self.config
    }

    fn rebuild_scale(&mut self) {
        let intervals = self.config.mode.intervals();
        let root = (self.config.root % 12) as i32;
        for note in 0..=MIDI_MAX as i32 {
            let pitch_class = ((note - root).rem_euclid(12)) as u8;
            self.in_scale[note as usize] = intervals.contains(&pitch_class);
        }
    }

    /// Nearest in-scale pitch, lower candidate first on distance ties
    fn snap(&self, note: u8) -> u8 {
        let note = note as i32;
        for distance in 0..=MIDI_MAX as i32 {
            let lower = note - distance;
            if lower >= 0 && self.in_scale[lower as usize] {
                return lower as u8;
            }
            let upper = note + distance;
            if upper <= MIDI_MAX as i32 && self.in_scale[upper as usize] {
                return upper as u8;
            }
        }
        note as u8
    }
}

impl Default for Harmoniser {
    fn default() -> Self {
        Self::new(HarmoniserConfig::default())
    }
}

impl TransformStage for Harmoniser {
    fn kind(&self) -> StageKind {
        StageKind::Harmoniser
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
                    if let Some(previous) = self.snapped.remove(&note) {
                        out.push(
                            cmd.with_kind(CommandKind::NoteOff { note: previous })
                                .with_due_at(clock.now)
                                .with_end_at(None),
                        );
                    }
                    let pitch = self.snap(note);
                    self.snapped.insert(note, pitch);
                    out.push(cmd.with_note(pitch));
                }
                CommandKind::NoteOff { note } => match self.snapped.remove(&note) {
                    Some(pitch) => out.push(cmd.with_note(pitch)),
                    None => out.push(cmd),
                },
                _ => out.push(cmd),
            }
        }

        Ok(out)
    }

    fn reset(&mut self) {
        self.snapped.clear();
    }

    fn config_fields(&self) -> &'static [ConfigField] {
        FIELDS
    }

    fn set_option(&mut self, name: &str, value: &serde_json::Value) -> Result<(), TransformError> {
        match name {
            "root" => {
                let root = option_f64(name, value)?;
                self.config.root = (root as i64).rem_euclid(12) as u8;
                self.rebuild_scale();
                Ok(())
            }
            "mode" => {
                let text = option_str(name, value)?;
                self.config.mode =
                    Mode::from_name(text).ok_or_else(|| TransformError::InvalidValue {
                        option: name.to_string(),
                        reason: format!("unknown mode `{text}`"),
                    })?;
                self.rebuild_scale();
                Ok(())
            }
            other => Err(TransformError::UnknownOption(other.to_string())),
        }
    }
}
