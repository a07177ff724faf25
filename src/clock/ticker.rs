// Clock - Periodic tick generation with drift self-correction
// Emits one tick per subdivision (24 per quarter note) against an anchored
// schedule, so late polls catch up instead of drifting

use super::{SUBDIVISIONS_PER_BAR, TapTempo, Tempo};
use tracing::info;

/// One periodic timer event
///
/// `lag` and `accumulated_lag` compare the actual poll time against the
/// anchored schedule. They exist for self-correction and diagnostics only;
/// transform stages see the reduced [`ClockSnapshot`] projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    /// Subdivisions elapsed since the clock started (first tick is 0)
    pub divisions: u64,
    /// Bars elapsed since the clock started
    pub bars: u64,
    /// Clock time the tick was actually observed, milliseconds
    pub now: f64,
    /// Clock time the tick was scheduled for, milliseconds
    pub scheduled_for: f64,
    /// How late this tick was observed (never negative)
    pub lag: f64,
    /// Total lag observed since the clock started
    pub accumulated_lag: f64,
}

impl Tick {
    /// The projection of clock state that transform stages are allowed to see
    pub fn snapshot(&self, bpm: f64) -> ClockSnapshot {
        ClockSnapshot {
            now: self.now,
            bpm,
            divisions: self.divisions,
        }
    }
}

/// Clock state visible to transform stages: current time, BPM, and the
/// subdivision counter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSnapshot {
    pub now: f64,
    pub bpm: f64,
    pub divisions: u64,
}

/// The timing source driving one command pipeline
///
/// Owns BPM state and the subdivision counter. `poll(now)` emits every tick
/// due at or before `now`; the schedule is anchored, so a late poll produces
/// catch-up ticks rather than pushing the whole grid later. A `now` that
/// moves backwards emits nothing.
#[derive(Debug, Clone)]
pub struct Clock {
    tempo: Tempo,
    tap: TapTempo,
    running: bool,
    divisions: u64,
    next_tick_at: f64,
    accumulated_lag: f64,
}

impl Clock {
    pub fn new(bpm: f64) -> Self {
        Self {
            tempo: Tempo::new(bpm),
            tap: TapTempo::new(),
            running: false,
            divisions: 0,
            next_tick_at: 0.0,
            accumulated_lag: 0.0,
        }
    }

    /// Start ticking; the first tick is due immediately
    pub fn start(&mut self, now: f64) {
        if self.running {
            return;
        }
        self.running = true;
        self.next_tick_at = now;
        info!(bpm = self.tempo.bpm(), "clock started");
    }

    /// Stop ticking and rewind the subdivision counter
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        self.reset();
        info!("clock stopped");
    }

    /// Start if stopped, stop if running
    pub fn toggle(&mut self, now: f64) {
        if self.running {
            self.stop();
        } else {
            self.start(now);
        }
    }

    /// Re-anchor the phase so the next poll fires a tick immediately
    ///
    /// Called when an unquantised note arrives, so audible notes are not
    /// arbitrarily delayed by grid alignment.
    pub fn retrigger(&mut self, now: f64) {
        if self.running {
            self.next_tick_at = now;
        }
    }

    /// Register a tempo tap; returns the new BPM once enough taps collected
    pub fn tap_tempo(&mut self, now: f64) -> Option<f64> {
        let bpm = self.tap.tap(now)?;
        self.tempo.set_bpm(bpm);
        Some(self.tempo.bpm())
    }

    pub fn bpm(&self) -> f64 {
        self.tempo.bpm()
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        self.tempo.set_bpm(bpm);
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Subdivisions elapsed since start
    pub fn divisions(&self) -> u64 {
        self.divisions
    }

    /// Milliseconds between ticks at the current tempo
    pub fn interval_ms(&self) -> f64 {
        self.tempo.subdivision_ms()
    }

    /// Rewind counters and tap state without touching the running flag
    pub fn reset(&mut self) {
        self.divisions = 0;
        self.accumulated_lag = 0.0;
        self.tap.reset();
    }

    /// Emit every tick due at or before `now`
    ///
    /// The next due time advances by one subdivision per emitted tick from
    /// the anchored schedule, which keeps long-run timing honest no matter
    /// how late individual polls arrive. Computed delays clamp to >= 0, so a
    /// non-monotonic `now` can stall the clock but never run it backwards.
    pub fn poll(&mut self, now: f64) -> Vec<Tick> {
        let mut ticks = Vec::new();
        if !self.running {
            return ticks;
        }

        while self.next_tick_at <= now {
            let scheduled_for = self.next_tick_at;
            let lag = (now - scheduled_for).max(0.0);
            self.accumulated_lag += lag;

            ticks.push(Tick {
                divisions: self.divisions,
                bars: self.divisions / SUBDIVISIONS_PER_BAR,
                now,
                scheduled_for,
                lag,
                accumulated_lag: self.accumulated_lag,
            });

            self.divisions += 1;
            self.next_tick_at = scheduled_for + self.tempo.subdivision_ms();
        }

        ticks
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(120.0)
    }
}
