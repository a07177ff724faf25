// Transform stages - The seam every musical effect implements
// A stage is a named, stateful, configurable function from a batch of
// commands to a batch of commands

mod arpeggiator;
mod chain;
mod factory;
mod harmoniser;
mod note_delay;
mod note_repeater;
mod note_shortener;
mod quantiser;
mod randomiser;

pub use arpeggiator::{ArpPattern, Arpeggiator, ArpeggiatorConfig};
pub use chain::{StageId, TransformChain};
pub use factory::{create_stage, create_stage_of};
pub use harmoniser::{Harmoniser, HarmoniserConfig, Mode};
pub use note_delay::{DelayTime, NoteDelay, NoteDelayConfig};
pub use note_repeater::{NoteRepeater, NoteRepeaterConfig};
pub use note_shortener::{NoteShortener, NoteShortenerConfig};
pub use quantiser::{Quantiser, QuantiserConfig};
pub use randomiser::{Randomiser, RandomiserConfig};

use crate::clock::{ClockSnapshot, SUBDIVISIONS_PER_QUARTER};
use crate::command::Command;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised by a stage while transforming or being configured
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("unknown config option `{0}`")]
    UnknownOption(String),

    #[error("invalid value for `{option}`: {reason}")]
    InvalidValue { option: String, reason: String },

    #[error("stage failure: {0}")]
    StageFailure(String),
}

/// Every stage kind the factory can build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
    Arpeggiator,
    Randomiser,
    NoteDelay,
    NoteShortener,
    NoteRepeater,
    Harmoniser,
    Quantiser,
    Passthrough,
}

impl StageKind {
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Arpeggiator => "arpeggiator",
            StageKind::Randomiser => "randomiser",
            StageKind::NoteDelay => "note-delay",
            StageKind::NoteShortener => "note-shortener",
            StageKind::NoteRepeater => "note-repeater",
            StageKind::Harmoniser => "harmoniser",
            StageKind::Quantiser => "quantiser",
            StageKind::Passthrough => "passthrough",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "arpeggiator" => Some(StageKind::Arpeggiator),
            "randomiser" => Some(StageKind::Randomiser),
            "note-delay" => Some(StageKind::NoteDelay),
            "note-shortener" => Some(StageKind::NoteShortener),
            "note-repeater" => Some(StageKind::NoteRepeater),
            "harmoniser" => Some(StageKind::Harmoniser),
            "quantiser" => Some(StageKind::Quantiser),
            "passthrough" => Some(StageKind::Passthrough),
            _ => None,
        }
    }
}

/// Tempo-synced step size, as a multiple of a quarter note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rate {
    Whole,
    Half,
    Quarter,
    Eighth,
    Sixteenth,
    ThirtySecond,
    Triplet,
}

impl Rate {
    pub const NAMES: &'static [&'static str] = &[
        "whole",
        "half",
        "quarter",
        "eighth",
        "sixteenth",
        "thirty-second",
        "triplet",
    ];

    pub fn quarter_multiple(&self) -> f64 {
        match self {
            Rate::Whole => 4.0,
            Rate::Half => 2.0,
            Rate::Quarter => 1.0,
            Rate::Eighth => 0.5,
            Rate::Sixteenth => 0.25,
            Rate::ThirtySecond => 0.125,
            Rate::Triplet => 1.0 / 3.0,
        }
    }

    /// Step length in milliseconds at the given tempo
    pub fn step_ms(&self, bpm: f64) -> f64 {
        (60_000.0 / bpm) * self.quarter_multiple()
    }

    /// Step length on the 24-per-quarter subdivision grid
    pub fn grid_divisions(&self) -> u64 {
        (SUBDIVISIONS_PER_QUARTER as f64 * self.quarter_multiple()).round() as u64
    }

    pub fn name(&self) -> &'static str {
        match self {
            Rate::Whole => "whole",
            Rate::Half => "half",
            Rate::Quarter => "quarter",
            Rate::Eighth => "eighth",
            Rate::Sixteenth => "sixteenth",
            Rate::ThirtySecond => "thirty-second",
            Rate::Triplet => "triplet",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "whole" => Some(Rate::Whole),
            "half" => Some(Rate::Half),
            "quarter" => Some(Rate::Quarter),
            "eighth" => Some(Rate::Eighth),
            "sixteenth" => Some(Rate::Sixteenth),
            "thirty-second" => Some(Rate::ThirtySecond),
            "triplet" => Some(Rate::Triplet),
            _ => None,
        }
    }
}

/// Grid reported by an active quantising stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantiseInfo {
    /// Grid size in subdivisions; queued commands release only on ticks
    /// where `divisions % grid == 0`
    pub grid: u64,
    /// After a drain, skip `grid - 1` ticks before draining again
    pub one_per_step: bool,
}

/// Kind of value a configurable field accepts, for external configuration
/// surfaces
#[derive(Debug, Clone, Copy)]
pub enum ConfigFieldKind {
    Toggle,
    Number { min: f64, max: f64 },
    Choice { options: &'static [&'static str] },
}

/// One configurable field a stage exposes
#[derive(Debug, Clone, Copy)]
pub struct ConfigField {
    pub name: &'static str,
    pub kind: ConfigFieldKind,
}

/// A single named, stateful transformation over a batch of commands
///
/// Stages own their per-note tracking state exclusively; `reset` clears it
/// (called on stop and all-notes-off). A stage must produce new command
/// values rather than alias its input.
pub trait TransformStage: Send {
    fn kind(&self) -> StageKind;

    fn transform(
        &mut self,
        batch: Vec<Command>,
        clock: &ClockSnapshot,
    ) -> Result<Vec<Command>, TransformError>;

    /// Clear all per-note tracking state
    fn reset(&mut self);

    /// Declarative list of configurable fields, for external UIs
    fn config_fields(&self) -> &'static [ConfigField] {
        &[]
    }

    /// Set one configuration option from a dynamic key/value record
    fn set_option(&mut self, name: &str, _value: &Value) -> Result<(), TransformError> {
        Err(TransformError::UnknownOption(name.to_string()))
    }

    /// Grid reported by quantising stages; everything else returns None
    fn quantise_info(&self) -> Option<QuantiseInfo> {
        None
    }
}

/// Identity stage: returns its input batch unchanged
///
/// Also what the factory resolves unknown stage kinds to.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl TransformStage for Passthrough {
    fn kind(&self) -> StageKind {
        StageKind::Passthrough
    }

    fn transform(
        &mut self,
        batch: Vec<Command>,
        _clock: &ClockSnapshot,
    ) -> Result<Vec<Command>, TransformError> {
        Ok(batch)
    }

    fn reset(&mut self) {}
}

pub(crate) fn option_f64(option: &str, value: &Value) -> Result<f64, TransformError> {
    value.as_f64().ok_or_else(|| TransformError::InvalidValue {
        option: option.to_string(),
        reason: format!("expected a number, got {value}"),
    })
}

pub(crate) fn option_bool(option: &str, value: &Value) -> Result<bool, TransformError> {
    value.as_bool().ok_or_else(|| TransformError::InvalidValue {
        option: option.to_string(),
        reason: format!("expected a boolean, got {value}"),
    })
}

pub(crate) fn option_str<'v>(option: &str, value: &'v Value) -> Result<&'v str, TransformError> {
    value.as_str().ok_or_else(|| TransformError::InvalidValue {
        option: option.to_string(),
        reason: format!("expected a string, got {value}"),
    })
}

pub(crate) fn option_rate(option: &str, value: &Value) -> Result<Rate, TransformError> {
    let name = option_str(option, value)?;
    Rate::from_name(name).ok_or_else(|| TransformError::InvalidValue {
        option: option.to_string(),
        reason: format!("unknown rate `{name}`"),
    })
}
