// Stage factory - Builds transform stages from host-facing names
// Unknown kinds degrade to a passthrough instead of failing the chain

use super::{
    Arpeggiator, Harmoniser, NoteDelay, NoteRepeater, NoteShortener, Passthrough, Quantiser,
    Randomiser, StageKind, TransformStage,
};
use tracing::warn;

/// Build a stage with default configuration from its kind
pub fn create_stage_of(kind: StageKind) -> Box<dyn TransformStage> {
    match kind {
        StageKind::Arpeggiator => Box::new(Arpeggiator::default()),
        StageKind::Randomiser => Box::new(Randomiser::default()),
        StageKind::NoteDelay => Box::new(NoteDelay::default()),
        StageKind::NoteShortener => Box::new(NoteShortener::default()),
        StageKind::NoteRepeater => Box::new(NoteRepeater::default()),
        StageKind::Harmoniser => Box::new(Harmoniser::default()),
        StageKind::Quantiser => Box::new(Quantiser::default()),
        StageKind::Passthrough => Box::new(Passthrough),
    }
}

/// Resolve a host-supplied stage name
///
/// A name the factory does not recognise resolves to a passthrough stage,
/// so one bad entry in a host configuration never takes the chain down.
pub fn create_stage(name: &str) -> Box<dyn TransformStage> {
    match StageKind::from_name(name) {
        Some(kind) => create_stage_of(kind),
        None => {
            warn!(name, "unknown stage kind, using passthrough");
            Box::new(Passthrough)
        }
    }
}
