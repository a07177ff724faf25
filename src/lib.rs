// Midiflow - Real-time musical event scheduling and transformation
// Commands from any input source run through an ordered chain of stateful
// transforms and are released to output sinks at the right clock instants

pub mod clock;
pub mod command;
pub mod pipeline;
pub mod runner;
pub mod scheduling;
pub mod transform;

// Re-export commonly used types for embedding hosts
pub use clock::{
    Clock, ClockSnapshot, SUBDIVISIONS_PER_BAR, SUBDIVISIONS_PER_QUARTER, TapTempo, Tempo, Tick,
};
pub use command::{
    Command, CommandError, CommandId, CommandIdGen, CommandKind, MIDI_MAX, TempoAction,
    TransportAction, clamp_note,
};
pub use pipeline::CommandPipeline;
pub use runner::{
    PipelineMsg, PipelineMsgConsumer, PipelineMsgProducer, RunnerHandle, create_pipeline_channel,
    spawn_pipeline,
};
pub use scheduling::{DispatchObserver, Dispatcher, OutputSink, SchedulingQueue, SinkError};
pub use transform::{
    ArpPattern, Arpeggiator, ArpeggiatorConfig, ConfigField, ConfigFieldKind, DelayTime,
    Harmoniser, HarmoniserConfig, Mode, NoteDelay, NoteDelayConfig, NoteRepeater,
    NoteRepeaterConfig, NoteShortener, NoteShortenerConfig, Passthrough, QuantiseInfo, Quantiser,
    QuantiserConfig, Randomiser, RandomiserConfig, Rate, StageId, StageKind, TransformChain,
    TransformError, TransformStage, create_stage, create_stage_of,
};
