// Command pipeline - The embedding-host surface
// Wires clock, transform chain, scheduling queue, and dispatcher into one
// cooperative timeline

use crate::clock::{Clock, ClockSnapshot, Tick};
use crate::command::{Command, CommandIdGen, CommandKind, TempoAction, TransportAction};
use crate::scheduling::{DispatchObserver, Dispatcher, OutputSink, SchedulingQueue};
use crate::transform::{StageId, TransformChain, TransformStage};
use tracing::{debug, warn};

/// One complete scheduling pipeline: commands in, timed output calls out
///
/// The pipeline is single-writer: the embedding host (or the runner thread)
/// calls into it from one logical timeline. Incoming batches run through
/// the transform chain exactly once before queueing; each clock tick drains
/// the queue, honouring the chain's quantisation grid, and fires the due
/// commands on every registered sink.
pub struct CommandPipeline {
    clock: Clock,
    chain: TransformChain,
    queue: SchedulingQueue,
    dispatcher: Dispatcher,
    id_gen: CommandIdGen,
}

impl CommandPipeline {
    pub fn new(bpm: f64) -> Self {
        Self::with_id_gen(bpm, CommandIdGen::new())
    }

    pub fn with_id_gen(bpm: f64, id_gen: CommandIdGen) -> Self {
        Self {
            clock: Clock::new(bpm),
            chain: TransformChain::new(),
            queue: SchedulingQueue::new(),
            dispatcher: Dispatcher::new(),
            id_gen,
        }
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut Clock {
        &mut self.clock
    }

    pub fn chain(&self) -> &TransformChain {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut TransformChain {
        &mut self.chain
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn add_sink(&mut self, sink: Box<dyn OutputSink>) {
        self.dispatcher.add_sink(sink);
    }

    pub fn add_observer(&mut self, observer: Box<dyn DispatchObserver>) {
        self.dispatcher.add_observer(observer);
    }

    pub fn append_transform(&mut self, stage: Box<dyn TransformStage>) -> StageId {
        self.chain.append(stage)
    }

    pub fn remove_transform(&mut self, id: StageId) -> bool {
        self.chain.remove(id)
    }

    pub fn set_transforms(&mut self, stages: Vec<Box<dyn TransformStage>>) -> Vec<StageId> {
        self.chain.replace_all(stages)
    }

    fn snapshot(&self, now: f64) -> ClockSnapshot {
        ClockSnapshot {
            now,
            bpm: self.clock.bpm(),
            divisions: self.clock.divisions(),
        }
    }

    /// Accept one command: validate, transform, queue
    ///
    /// Invalid commands are logged and dropped, never queued. When the
    /// chain has no active quantiser, an arriving NOTE_ON retriggers the
    /// clock phase so audible notes are not delayed by grid alignment.
    pub fn add_command(&mut self, cmd: Command, now: f64) {
        self.add_batch(vec![cmd], now);
    }

    /// Accept a batch; the transform chain runs once over the whole batch
    pub fn add_batch(&mut self, cmds: Vec<Command>, now: f64) {
        let mut accepted = Vec::with_capacity(cmds.len());
        for cmd in cmds {
            match cmd.validate() {
                Ok(()) => {
                    let cmd = if cmd.id == 0 {
                        Command {
                            id: self.id_gen.next_id(),
                            ..cmd
                        }
                    } else {
                        cmd
                    };
                    accepted.push(cmd);
                }
                Err(err) => {
                    warn!(origin = cmd.origin, error = %err, "rejected invalid command");
                }
            }
        }
        if accepted.is_empty() {
            return;
        }

        let has_note_on = accepted.iter().any(|c| c.is_note_on());
        let snapshot = self.snapshot(now);
        let transformed = self.chain.apply(accepted, &snapshot);

        if has_note_on && self.chain.quantisation().is_none() {
            self.clock.retrigger(now);
        }

        self.queue.push_all(transformed);
    }

    /// Schedule a batch into the future as a rising staircase: the i-th
    /// command lands `(i + 1) * base_delay_ms` from now
    pub fn add_commands_to_future(&mut self, cmds: Vec<Command>, base_delay_ms: f64, now: f64) {
        let base = base_delay_ms.max(0.0);
        let staggered = cmds
            .into_iter()
            .enumerate()
            .map(|(i, cmd)| cmd.with_due_at(now + (i + 1) as f64 * base))
            .collect();
        self.add_batch(staggered, now);
    }

    /// Service one clock tick
    ///
    /// In quantised mode the queue is only drained on grid-aligned ticks,
    /// and the one-note-per-step cooldown skips whole grid points after a
    /// drain. Returns the commands dispatched on this tick.
    pub fn on_tick(&mut self, tick: &Tick) -> Vec<Command> {
        if let Some(info) = self.chain.quantisation() {
            if self.queue.cooldown_active() {
                self.queue.tick_cooldown();
                return Vec::new();
            }
            if info.grid == 0 || tick.divisions % info.grid != 0 {
                return Vec::new();
            }

            let active = self.queue.drain_due(tick.now);
            if info.one_per_step && !active.is_empty() {
                self.queue.begin_cooldown(info.grid.saturating_sub(1));
            }
            self.finish_tick(active)
        } else {
            let active = self.queue.drain_due(tick.now);
            self.finish_tick(active)
        }
    }

    /// Poll the clock and service every tick that has become due
    pub fn pump(&mut self, now: f64) -> Vec<Command> {
        let ticks = self.clock.poll(now);
        let mut dispatched = Vec::new();
        for tick in ticks {
            dispatched.extend(self.on_tick(&tick));
        }
        dispatched
    }

    fn finish_tick(&mut self, active: Vec<Command>) -> Vec<Command> {
        if active.is_empty() {
            return active;
        }

        // Control commands steer the clock before the batch fans out
        let mut stop_requested = false;
        for cmd in &active {
            match cmd.kind {
                CommandKind::Tempo(TempoAction::Set(bpm)) => self.clock.set_bpm(bpm),
                CommandKind::Tempo(TempoAction::Tap) => {
                    self.clock.tap_tempo(cmd.due_at);
                }
                CommandKind::Transport(TransportAction::Start)
                | CommandKind::Transport(TransportAction::Continue) => {
                    self.clock.start(cmd.due_at);
                }
                CommandKind::Transport(TransportAction::Stop) => stop_requested = true,
                _ => {}
            }
        }

        debug!(count = active.len(), "dispatching due commands");
        self.dispatcher.dispatch(&active);

        if stop_requested {
            self.all_notes_off();
            self.clock.stop();
        }

        active
    }

    /// Purge the queue and silence every sink
    ///
    /// Clearing the queue alone is not enough: commands drained on earlier
    /// ticks have already fired, so the sinks are told to silence sounding
    /// voices too. Every stage's per-note tracking is reset.
    pub fn all_notes_off(&mut self) {
        let purged = self.queue.clear();
        if purged > 0 {
            debug!(purged, "pending commands purged");
        }
        self.chain.reset_all();
        self.dispatcher.all_notes_off();
    }

    /// Tear the pipeline down: silence outputs and drop everything pending
    pub fn destroy(mut self) {
        self.all_notes_off();
        self.clock.stop();
    }
}
