// Scheduling queue - Holds commands that are not yet due
// Drained once per tick; insertion order is never reordered

use crate::clock::SUBDIVISIONS_PER_BAR;
use crate::command::Command;
use std::collections::VecDeque;
use tracing::debug;

/// The pending-command store for one output chain
///
/// Commands wait here, in insertion order, until their `due_at` passes.
/// Draining walks the queue front to back and stops once it has skipped
/// `accumulator_limit` not-yet-due commands, which caps per-tick work under
/// backpressure; skipped commands simply wait for the next tick.
///
/// The cooldown counter implements the one-note-per-grid-point policy in
/// quantised mode: while it is non-zero the caller skips draining entirely,
/// even on grid points.
#[derive(Debug)]
pub struct SchedulingQueue {
    pending: VecDeque<Command>,
    accumulator_limit: usize,
    cooldown: u64,
}

impl Default for SchedulingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulingQueue {
    /// One bar's worth of subdivisions
    pub const DEFAULT_ACCUMULATOR_LIMIT: usize = SUBDIVISIONS_PER_BAR as usize;

    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            accumulator_limit: Self::DEFAULT_ACCUMULATOR_LIMIT,
            cooldown: 0,
        }
    }

    pub fn with_accumulator_limit(limit: usize) -> Self {
        Self {
            accumulator_limit: limit,
            ..Self::new()
        }
    }

    pub fn set_accumulator_limit(&mut self, limit: usize) {
        self.accumulator_limit = limit;
    }

    pub fn push(&mut self, cmd: Command) {
        self.pending.push_back(cmd);
    }

    pub fn push_all<I: IntoIterator<Item = Command>>(&mut self, cmds: I) {
        self.pending.extend(cmds);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Collect every command whose due time has passed
    ///
    /// Due commands come out in their original insertion order; commands
    /// that are not yet due stay queued, also in order. Scanning stops once
    /// the skip count reaches the accumulator limit.
    pub fn drain_due(&mut self, now: f64) -> Vec<Command> {
        let mut active = Vec::new();
        let mut kept = VecDeque::with_capacity(self.pending.len());
        let mut skipped = 0;

        while let Some(cmd) = self.pending.pop_front() {
            if skipped >= self.accumulator_limit {
                kept.push_back(cmd);
                continue;
            }
            if cmd.due_at <= now {
                active.push(cmd);
            } else {
                skipped += 1;
                kept.push_back(cmd);
            }
        }

        self.pending = kept;
        active
    }

    /// Skip draining for the next `ticks` ticks
    pub fn begin_cooldown(&mut self, ticks: u64) {
        self.cooldown = ticks;
    }

    pub fn cooldown_active(&self) -> bool {
        self.cooldown > 0
    }

    /// Count one tick against the cooldown
    pub fn tick_cooldown(&mut self) {
        self.cooldown = self.cooldown.saturating_sub(1);
    }

    /// Purge everything pending; returns how many commands were dropped
    pub fn clear(&mut self) -> usize {
        self.cooldown = 0;
        let purged = self.pending.len();
        self.pending.clear();
        if purged > 0 {
            debug!(purged, "scheduling queue cleared");
        }
        purged
    }
}
