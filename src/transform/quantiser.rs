// Quantiser - Owns the release grid; the queue does the actual gating
// The transform itself is a passthrough: quantisation batches command
// release to grid boundaries, it never rewrites the commands

use super::{
    ConfigField, ConfigFieldKind, QuantiseInfo, Rate, StageKind, TransformError, TransformStage,
    option_bool, option_rate,
};
use crate::clock::ClockSnapshot;
use crate::command::Command;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantiserConfig {
    /// Grid step the queue releases on
    pub grid: Rate,
    pub enabled: bool,
    /// Allow at most one drain per grid point
    pub one_per_step: bool,
}

impl Default for QuantiserConfig {
    fn default() -> Self {
        Self {
            grid: Rate::Sixteenth,
            enabled: true,
            one_per_step: false,
        }
    }
}

const FIELDS: &[ConfigField] = &[
    ConfigField {
        name: "grid",
        kind: ConfigFieldKind::Choice {
            options: Rate::NAMES,
        },
    },
    ConfigField {
        name: "enabled",
        kind: ConfigFieldKind::Toggle,
    },
    ConfigField {
        name: "one-per-step",
        kind: ConfigFieldKind::Toggle,
    },
];

/// The quantising stage
///
/// Commands pass through untouched; the stage only advertises its grid to
/// the scheduling queue via `quantise_info`. While present and enabled, the
/// queue drains exclusively on ticks where the subdivision counter lands on
/// the grid.
#[derive(Debug, Clone, Copy, Default)]
pub struct Quantiser {
    config: QuantiserConfig,
}

impl Quantiser {
    pub fn new(config: QuantiserConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QuantiserConfig {
        &self.config
    }
}

impl TransformStage for Quantiser {
    fn kind(&self) -> StageKind {
        StageKind::Quantiser
    }

    fn transform(
        &mut self,
        batch: Vec<Command>,
        _clock: &ClockSnapshot,
    ) -> Result<Vec<Command>, TransformError> {
        Ok(batch)
    }

    fn reset(&mut self) {}

    fn config_fields(&self) -> &'static [ConfigField] {
        FIELDS
    }

    fn set_option(&mut self, name: &str, value: &serde_json::Value) -> Result<(), TransformError> {
        match name {
            "grid" => {
                self.config.grid = option_rate(name, value)?;
                Ok(())
            }
            "enabled" => {
                self.config.enabled = option_bool(name, value)?;
                Ok(())
            }
            "one-per-step" => {
                self.config.one_per_step = option_bool(name, value)?;
                Ok(())
            }
            other => Err(TransformError::UnknownOption(other.to_string())),
        }
    }

    fn quantise_info(&self) -> Option<QuantiseInfo> {
        if !self.config.enabled {
            return None;
        }
        Some(QuantiseInfo {
            grid: self.config.grid.grid_divisions(),
            one_per_step: self.config.one_per_step,
        })
    }
}
