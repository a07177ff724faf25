// Dispatcher - Fans due commands out to output sinks
// One sink failing must never starve the others

use crate::command::{Command, CommandKind};
use thiserror::Error;
use tracing::warn;

/// Errors an output sink may report while firing an event
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink rejected the event: {0}")]
    Rejected(String),

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// One output destination for dispatched commands
///
/// Concrete renderers (MIDI hardware, speech, notation, ...) live outside
/// this crate and implement this trait. The control-change family defaults
/// to no-ops so note-only sinks stay small.
pub trait OutputSink: Send {
    fn name(&self) -> &str;

    fn note_on(&mut self, note: u8, velocity: u8, channel: i8) -> Result<(), SinkError>;

    fn note_off(&mut self, note: u8, channel: i8) -> Result<(), SinkError>;

    /// Silence every sounding voice immediately
    fn all_notes_off(&mut self) -> Result<(), SinkError>;

    fn control_change(&mut self, _controller: u8, _value: u8, _channel: i8) -> Result<(), SinkError> {
        Ok(())
    }

    fn pitch_bend(&mut self, _value: i16, _channel: i8) -> Result<(), SinkError> {
        Ok(())
    }

    fn program_change(&mut self, _program: u8, _channel: i8) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Read-only observer of dispatched batches (the recorder hook)
pub trait DispatchObserver: Send {
    fn commands_dispatched(&mut self, batch: &[Command]);
}

/// Converts due commands into output calls on every registered sink
#[derive(Default)]
pub struct Dispatcher {
    sinks: Vec<Box<dyn OutputSink>>,
    observers: Vec<Box<dyn DispatchObserver>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(&mut self, sink: Box<dyn OutputSink>) {
        self.sinks.push(sink);
    }

    pub fn add_observer(&mut self, observer: Box<dyn DispatchObserver>) {
        self.observers.push(observer);
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Fire a drained batch on every sink, then notify observers
    ///
    /// Failures are isolated per sink: a sink that errors is logged and the
    /// remaining sinks still receive the same command.
    pub fn dispatch(&mut self, batch: &[Command]) {
        for cmd in batch {
            for sink in &mut self.sinks {
                if let Err(err) = fire(sink.as_mut(), cmd) {
                    warn!(sink = sink.name(), error = %err, "output sink failed");
                }
            }
        }

        if !batch.is_empty() {
            for observer in &mut self.observers {
                observer.commands_dispatched(batch);
            }
        }
    }

    /// Sink-level silence, independent of anything still queued
    pub fn all_notes_off(&mut self) {
        for sink in &mut self.sinks {
            if let Err(err) = sink.all_notes_off() {
                warn!(sink = sink.name(), error = %err, "all-notes-off failed");
            }
        }
    }
}

fn fire(sink: &mut dyn OutputSink, cmd: &Command) -> Result<(), SinkError> {
    match cmd.kind {
        CommandKind::NoteOn { note, velocity } => sink.note_on(note, velocity, cmd.channel),
        CommandKind::NoteOff { note } => sink.note_off(note, cmd.channel),
        CommandKind::ControlChange { controller, value } => {
            sink.control_change(controller, value, cmd.channel)
        }
        CommandKind::PitchBend { value } => sink.pitch_bend(value, cmd.channel),
        CommandKind::ProgramChange { program } => sink.program_change(program, cmd.channel),
        // Transport and tempo commands steer the clock, not the outputs
        CommandKind::Transport(_) | CommandKind::Tempo(_) => Ok(()),
    }
}
