// Command - The musical event value object
// Everything flowing through the pipeline is a Command: note events, control
// changes, transport and tempo instructions

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Monotonically increasing command identity, used for tracing
pub type CommandId = u64;

/// Highest valid MIDI note, velocity, controller, or program value
pub const MIDI_MAX: u8 = 127;

/// Validation errors raised at the chain boundary
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("note number {0} exceeds the MIDI range 0-127")]
    NoteOutOfRange(u8),

    #[error("velocity {0} exceeds the MIDI range 0-127")]
    VelocityOutOfRange(u8),

    #[error("controller {0} or value {1} exceeds the MIDI range 0-127")]
    ControlOutOfRange(u8, u8),

    #[error("pitch bend value {0} outside the 14-bit range 0-16383")]
    PitchBendOutOfRange(i16),

    #[error("program {0} exceeds the MIDI range 0-127")]
    ProgramOutOfRange(u8),
}

/// Transport control instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportAction {
    Start,
    Stop,
    Continue,
}

/// Tempo control instructions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TempoAction {
    Set(f64),
    Tap,
}

/// The kind of musical instruction a command carries
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CommandKind {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
    ControlChange { controller: u8, value: u8 },
    PitchBend { value: i16 },
    ProgramChange { program: u8 },
    Transport(TransportAction),
    Tempo(TempoAction),
}

impl CommandKind {
    /// Parse a raw MIDI message
    ///
    /// The channel nibble is ignored; NoteOn with velocity 0 is a NoteOff,
    /// per the MIDI running convention.
    pub fn from_midi_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }

        let status = bytes[0];
        let message_type = status & 0xF0;

        match message_type {
            0x90 => {
                if bytes.len() >= 3 {
                    let note = bytes[1];
                    let velocity = bytes[2];
                    if velocity == 0 {
                        Some(CommandKind::NoteOff { note })
                    } else {
                        Some(CommandKind::NoteOn { note, velocity })
                    }
                } else {
                    None
                }
            }
            0x80 => {
                if bytes.len() >= 3 {
                    Some(CommandKind::NoteOff { note: bytes[1] })
                } else {
                    None
                }
            }
            0xB0 => {
                if bytes.len() >= 3 {
                    Some(CommandKind::ControlChange {
                        controller: bytes[1],
                        value: bytes[2],
                    })
                } else {
                    None
                }
            }
            0xC0 => {
                if bytes.len() >= 2 {
                    Some(CommandKind::ProgramChange { program: bytes[1] })
                } else {
                    None
                }
            }
            0xE0 => {
                if bytes.len() >= 3 {
                    let lsb = bytes[1] as i16;
                    let msb = bytes[2] as i16;
                    Some(CommandKind::PitchBend {
                        value: (msb << 7) | lsb,
                    })
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

/// One musical instruction, on or off the clock
///
/// Commands are plain values, immutable after creation: every `with_*`
/// helper returns a new value, so no two pipeline stages ever alias the same
/// command. Times are clock-relative milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Command {
    /// Tracing identity, stamped by the pipeline at the input boundary
    pub id: CommandId,
    pub kind: CommandKind,
    /// Logical routing tag; -1 addresses all channels
    pub channel: i8,
    /// When the command was produced
    pub created_at: f64,
    /// When the command becomes eligible to fire; may be in the past
    pub due_at: f64,
    /// Planned release time, set by generator stages
    pub end_at: Option<f64>,
    /// Which input produced this command, diagnostic only
    pub origin: &'static str,
}

impl Command {
    /// Channel value addressing every channel
    pub const CHANNEL_ALL: i8 = -1;

    pub fn new(kind: CommandKind, now: f64) -> Self {
        Self {
            id: 0,
            kind,
            channel: Self::CHANNEL_ALL,
            created_at: now,
            due_at: now,
            end_at: None,
            origin: "host",
        }
    }

    pub fn note_on(note: u8, velocity: u8, now: f64) -> Self {
        Self::new(CommandKind::NoteOn { note, velocity }, now)
    }

    pub fn note_off(note: u8, now: f64) -> Self {
        Self::new(CommandKind::NoteOff { note }, now)
    }

    pub fn control_change(controller: u8, value: u8, now: f64) -> Self {
        Self::new(CommandKind::ControlChange { controller, value }, now)
    }

    pub fn pitch_bend(value: i16, now: f64) -> Self {
        Self::new(CommandKind::PitchBend { value }, now)
    }

    pub fn program_change(program: u8, now: f64) -> Self {
        Self::new(CommandKind::ProgramChange { program }, now)
    }

    pub fn transport(action: TransportAction, now: f64) -> Self {
        Self::new(CommandKind::Transport(action), now)
    }

    pub fn tempo(action: TempoAction, now: f64) -> Self {
        Self::new(CommandKind::Tempo(action), now)
    }

    /// The note number, for note events
    pub fn note_number(&self) -> Option<u8> {
        match self.kind {
            CommandKind::NoteOn { note, .. } | CommandKind::NoteOff { note } => Some(note),
            _ => None,
        }
    }

    /// The velocity, for NoteOn events
    pub fn velocity(&self) -> Option<u8> {
        match self.kind {
            CommandKind::NoteOn { velocity, .. } => Some(velocity),
            _ => None,
        }
    }

    pub fn is_note_on(&self) -> bool {
        matches!(self.kind, CommandKind::NoteOn { .. })
    }

    pub fn is_note_off(&self) -> bool {
        matches!(self.kind, CommandKind::NoteOff { .. })
    }

    pub fn is_note_event(&self) -> bool {
        self.is_note_on() || self.is_note_off()
    }

    /// New value with the note number rewritten; other kinds pass unchanged
    pub fn with_note(self, note: u8) -> Self {
        let kind = match self.kind {
            CommandKind::NoteOn { velocity, .. } => CommandKind::NoteOn { note, velocity },
            CommandKind::NoteOff { .. } => CommandKind::NoteOff { note },
            other => other,
        };
        Self { kind, ..self }
    }

    pub fn with_kind(self, kind: CommandKind) -> Self {
        Self { kind, ..self }
    }

    pub fn with_created_at(self, created_at: f64) -> Self {
        Self { created_at, ..self }
    }

    pub fn with_due_at(self, due_at: f64) -> Self {
        Self { due_at, ..self }
    }

    pub fn with_end_at(self, end_at: Option<f64>) -> Self {
        Self { end_at, ..self }
    }

    pub fn with_channel(self, channel: i8) -> Self {
        Self { channel, ..self }
    }

    pub fn with_origin(self, origin: &'static str) -> Self {
        Self { origin, ..self }
    }

    /// New value shifted `ms` into the future; `end_at` rides along
    pub fn delayed_by(self, ms: f64) -> Self {
        Self {
            due_at: self.due_at + ms,
            end_at: self.end_at.map(|e| e + ms),
            ..self
        }
    }

    /// Reject commands that carry out-of-range MIDI data
    pub fn validate(&self) -> Result<(), CommandError> {
        match self.kind {
            CommandKind::NoteOn { note, velocity } => {
                if note > MIDI_MAX {
                    Err(CommandError::NoteOutOfRange(note))
                } else if velocity > MIDI_MAX {
                    Err(CommandError::VelocityOutOfRange(velocity))
                } else {
                    Ok(())
                }
            }
            CommandKind::NoteOff { note } => {
                if note > MIDI_MAX {
                    Err(CommandError::NoteOutOfRange(note))
                } else {
                    Ok(())
                }
            }
            CommandKind::ControlChange { controller, value } => {
                if controller > MIDI_MAX || value > MIDI_MAX {
                    Err(CommandError::ControlOutOfRange(controller, value))
                } else {
                    Ok(())
                }
            }
            CommandKind::PitchBend { value } => {
                if (0..=16383).contains(&value) {
                    Ok(())
                } else {
                    Err(CommandError::PitchBendOutOfRange(value))
                }
            }
            CommandKind::ProgramChange { program } => {
                if program > MIDI_MAX {
                    Err(CommandError::ProgramOutOfRange(program))
                } else {
                    Ok(())
                }
            }
            CommandKind::Transport(_) | CommandKind::Tempo(_) => Ok(()),
        }
    }
}

/// Clamp an arbitrary pitch computation into the MIDI note range
pub fn clamp_note(note: i32) -> u8 {
    note.clamp(0, MIDI_MAX as i32) as u8
}

/// Shared command-ID source
///
/// Handed to the pipeline at construction; there is no process-global
/// counter. IDs start at 1, so 0 marks a command the pipeline has not
/// stamped yet.
#[derive(Debug, Clone, Default)]
pub struct CommandIdGen {
    next: Arc<AtomicU64>,
}

impl CommandIdGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> CommandId {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }
}
