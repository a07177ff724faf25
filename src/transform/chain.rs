// Transform chain - Ordered list of stages applied to every incoming batch

use super::{QuantiseInfo, StageKind, TransformStage};
use crate::clock::ClockSnapshot;
use crate::command::Command;
use tracing::{debug, warn};

/// Stable identity of a stage within one chain
///
/// Lets multiple instances of the same stage kind coexist, e.g. two delay
/// stages at different rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageId(u64);

struct Entry {
    id: StageId,
    stage: Box<dyn TransformStage>,
}

/// The ordered, mutable stage list for one output chain
///
/// Stages are applied left to right, exactly once per batch. A failing
/// stage never corrupts a batch: the chain falls back to the original,
/// untransformed input for that call and logs the failure. The failing
/// stage stays in the chain and is retried on the next batch.
#[derive(Default)]
pub struct TransformChain {
    entries: Vec<Entry>,
    next_id: u64,
}

impl TransformChain {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    fn allocate_id(&mut self) -> StageId {
        self.next_id += 1;
        StageId(self.next_id)
    }

    /// Add a stage at the end of the chain
    pub fn append(&mut self, stage: Box<dyn TransformStage>) -> StageId {
        let id = self.allocate_id();
        debug!(stage = stage.kind().name(), "transform appended");
        self.entries.push(Entry { id, stage });
        id
    }

    /// Remove a stage; returns false when the id is not in this chain
    pub fn remove(&mut self, id: StageId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        before != self.entries.len()
    }

    /// Replace the whole chain; returns the new ids in order
    pub fn replace_all(&mut self, stages: Vec<Box<dyn TransformStage>>) -> Vec<StageId> {
        self.entries.clear();
        stages.into_iter().map(|s| self.append(s)).collect()
    }

    /// Move `id` directly before `anchor`; false when either is missing
    pub fn move_before(&mut self, id: StageId, anchor: StageId) -> bool {
        self.reposition(id, anchor, 0)
    }

    /// Move `id` directly after `anchor`; false when either is missing
    pub fn move_after(&mut self, id: StageId, anchor: StageId) -> bool {
        self.reposition(id, anchor, 1)
    }

    fn reposition(&mut self, id: StageId, anchor: StageId, offset: usize) -> bool {
        if id == anchor {
            return false;
        }
        let Some(from) = self.entries.iter().position(|e| e.id == id) else {
            return false;
        };
        let Some(mut to) = self.entries.iter().position(|e| e.id == anchor) else {
            return false;
        };

        let entry = self.entries.remove(from);
        if from < to {
            to -= 1;
        }
        self.entries.insert(to + offset, entry);
        true
    }

    /// First stage of the given kind, in chain order
    pub fn first_of_kind(&self, kind: StageKind) -> Option<(StageId, &dyn TransformStage)> {
        self.entries
            .iter()
            .find(|e| e.stage.kind() == kind)
            .map(|e| (e.id, e.stage.as_ref()))
    }

    pub fn first_of_kind_mut(&mut self, kind: StageKind) -> Option<&mut dyn TransformStage> {
        self.entries
            .iter_mut()
            .find(|e| e.stage.kind() == kind)
            .map(|e| e.stage.as_mut())
    }

    pub fn stage(&self, id: StageId) -> Option<&dyn TransformStage> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.stage.as_ref())
    }

    pub fn stage_mut(&mut self, id: StageId) -> Option<&mut dyn TransformStage> {
        self.entries
            .iter_mut()
            .find(|e| e.id == id)
            .map(|e| e.stage.as_mut())
    }

    /// Stage ids in application order
    pub fn stage_ids(&self) -> Vec<StageId> {
        self.entries.iter().map(|e| e.id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear every stage's per-note tracking state
    pub fn reset_all(&mut self) {
        for entry in &mut self.entries {
            entry.stage.reset();
        }
    }

    /// Grid of "the" quantiser: the first quantising stage in the chain
    pub fn quantisation(&self) -> Option<QuantiseInfo> {
        self.first_of_kind(StageKind::Quantiser)
            .and_then(|(_, stage)| stage.quantise_info())
    }

    /// Apply every stage to the batch, left to right
    pub fn apply(&mut self, batch: Vec<Command>, clock: &ClockSnapshot) -> Vec<Command> {
        let original = batch.clone();
        let mut acc = batch;

        for entry in &mut self.entries {
            match entry.stage.transform(acc, clock) {
                Ok(next) => acc = next,
                Err(err) => {
                    warn!(
                        stage = entry.stage.kind().name(),
                        error = %err,
                        "transform failed, passing batch through untransformed"
                    );
                    return original;
                }
            }
        }

        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandKind, clamp_note};
    use crate::transform::{Passthrough, TransformError};

    fn clock() -> ClockSnapshot {
        ClockSnapshot {
            now: 0.0,
            bpm: 120.0,
            divisions: 0,
        }
    }

    #[test]
    fn test_stages_apply_in_order() {
        let mut chain = TransformChain::new();
        chain.append(Box::new(TransposeStage { semitones: 1 }));
        chain.append(Box::new(TransposeStage { semitones: 2 }));

        let out = chain.apply(vec![Command::note_on(60, 100, 0.0)], &clock());
        assert_eq!(out[0].note_number(), Some(63));
    }

    #[test]
    fn test_failing_stage_falls_back_to_original_batch() {
        let mut chain = TransformChain::new();
        chain.append(Box::new(TransposeStage { semitones: 12 }));
        chain.append(Box::new(FailingStage));

        let batch = vec![Command::note_on(60, 100, 0.0)];
        let out = chain.apply(batch.clone(), &clock());

        // The partial transposition is discarded, nothing is dropped
        assert_eq!(out, batch);
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_remove_and_stable_ids() {
        let mut chain = TransformChain::new();
        let a = chain.append(Box::new(Passthrough));
        let b = chain.append(Box::new(TransposeStage { semitones: 1 }));

        assert!(chain.remove(a));
        assert!(!chain.remove(a));

        // b keeps working after a's removal
        assert!(chain.stage(b).is_some());
        let out = chain.apply(vec![Command::note_on(60, 100, 0.0)], &clock());
        assert_eq!(out[0].note_number(), Some(61));
    }

    #[test]
    fn test_move_before_and_after() {
        let mut chain = TransformChain::new();
        let a = chain.append(Box::new(TransposeStage { semitones: 1 }));
        let b = chain.append(Box::new(TransposeStage { semitones: 2 }));
        let c = chain.append(Box::new(TransposeStage { semitones: 3 }));

        assert!(chain.move_before(c, a));
        assert_eq!(chain.stage_ids(), vec![c, a, b]);

        assert!(chain.move_after(c, b));
        assert_eq!(chain.stage_ids(), vec![a, b, c]);

        // Missing anchor or self-anchor are rejected
        assert!(!chain.move_before(a, StageId(999)));
        assert!(!chain.move_before(a, a));
    }

    #[test]
    fn test_first_of_kind_finds_first_instance() {
        let mut chain = TransformChain::new();
        chain.append(Box::new(Passthrough));
        let first = chain.append(Box::new(TransposeStage { semitones: 1 }));
        chain.append(Box::new(TransposeStage { semitones: 2 }));

        let (id, _) = chain.first_of_kind(StageKind::Passthrough).unwrap();
        assert_eq!(chain.stage_ids()[0], id);

        // Keyed lookup returns the first transpose, not the second
        let found = chain
            .entries
            .iter()
            .position(|e| e.id == first)
            .unwrap();
        assert_eq!(found, 1);
    }

    #[test]
    fn test_replace_all() {
        let mut chain = TransformChain::new();
        chain.append(Box::new(Passthrough));

        let ids = chain.replace_all(vec![
            Box::new(TransposeStage { semitones: 1 }),
            Box::new(Passthrough),
        ]);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.stage_ids(), ids);
    }

    #[test]
    fn test_empty_chain_is_identity() {
        let mut chain = TransformChain::new();
        let batch = vec![Command::note_on(60, 100, 0.0)];
        assert_eq!(chain.apply(batch.clone(), &clock()), batch);
    }

    struct TransposeStage {
        semitones: i32,
    }

    impl TransformStage for TransposeStage {
        fn kind(&self) -> StageKind {
            // Reuse an arbitrary kind; identity is what the chain tracks
            StageKind::Harmoniser
        }

        fn transform(
            &mut self,
            batch: Vec<Command>,
            _clock: &ClockSnapshot,
        ) -> Result<Vec<Command>, TransformError> {
            Ok(batch
                .into_iter()
                .map(|cmd| match cmd.kind {
                    CommandKind::NoteOn { note, .. } | CommandKind::NoteOff { note } => {
                        cmd.with_note(clamp_note(note as i32 + self.semitones))
                    }
                    _ => cmd,
                })
                .collect())
        }

        fn reset(&mut self) {}
    }

    struct FailingStage;

    impl TransformStage for FailingStage {
        fn kind(&self) -> StageKind {
            StageKind::Passthrough
        }

        fn transform(
            &mut self,
            _batch: Vec<Command>,
            _clock: &ClockSnapshot,
        ) -> Result<Vec<Command>, TransformError> {
            Err(TransformError::StageFailure("synthetic failure".into()))
        }

        fn reset(&mut self) {}
    }
}
