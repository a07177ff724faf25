// Pipeline runner - Owns a pipeline on its own thread
// The host talks to it through a lock-free ring; the thread polls the
// clock, services ticks in order, and dispatches

use crate::command::Command;
use crate::pipeline::CommandPipeline;
use crate::transform::TransformStage;
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Split};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::info;

/// Messages the host sends into the runner thread
pub enum PipelineMsg {
    Command(Command),
    Batch(Vec<Command>),
    /// Staircase-schedule a batch into the future
    Future {
        commands: Vec<Command>,
        base_delay_ms: f64,
    },
    AppendTransform(Box<dyn TransformStage>),
    SetBpm(f64),
    TapTempo,
    Start,
    Stop,
    AllNotesOff,
}

pub type PipelineMsgProducer = ringbuf::HeapProd<PipelineMsg>;
pub type PipelineMsgConsumer = ringbuf::HeapCons<PipelineMsg>;

/// Create the host -> runner message channel
pub fn create_pipeline_channel(capacity: usize) -> (PipelineMsgProducer, PipelineMsgConsumer) {
    let rb = HeapRb::<PipelineMsg>::new(capacity);
    rb.split()
}

/// Handle to a running pipeline thread
///
/// Dropping the handle signals the thread to stop; `shutdown` additionally
/// joins it and hands the pipeline back for inspection.
pub struct RunnerHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<CommandPipeline>>,
}

impl RunnerHandle {
    /// Stop the thread and get the pipeline back
    pub fn shutdown(mut self) -> Option<CommandPipeline> {
        self.stop.store(true, Ordering::Relaxed);
        self.thread.take().and_then(|t| t.join().ok())
    }
}

impl Drop for RunnerHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Spawn a pipeline on its own thread
///
/// The thread is the pipeline's single writer: it drains the message ring,
/// then pumps the clock. Ticks are strictly sequential; a batch is fully
/// transformed and queued before any tick can release it. Time is measured
/// from the spawn instant, in milliseconds.
pub fn spawn_pipeline(
    mut pipeline: CommandPipeline,
    mut messages: PipelineMsgConsumer,
) -> RunnerHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();

    let thread = std::thread::spawn(move || {
        let epoch = Instant::now();
        pipeline.clock_mut().start(0.0);
        info!("pipeline runner started");

        while !stop_flag.load(Ordering::Relaxed) {
            let now = epoch.elapsed().as_secs_f64() * 1_000.0;

            while let Some(msg) = messages.try_pop() {
                handle_message(&mut pipeline, msg, now);
            }

            pipeline.pump(now);
            std::thread::sleep(Duration::from_millis(1));
        }

        pipeline.all_notes_off();
        pipeline.clock_mut().stop();
        info!("pipeline runner stopped");
        pipeline
    });

    RunnerHandle {
        stop,
        thread: Some(thread),
    }
}

fn handle_message(pipeline: &mut CommandPipeline, msg: PipelineMsg, now: f64) {
    match msg {
        PipelineMsg::Command(cmd) => pipeline.add_command(cmd, now),
        PipelineMsg::Batch(cmds) => pipeline.add_batch(cmds, now),
        PipelineMsg::Future {
            commands,
            base_delay_ms,
        } => pipeline.add_commands_to_future(commands, base_delay_ms, now),
        PipelineMsg::AppendTransform(stage) => {
            pipeline.append_transform(stage);
        }
        PipelineMsg::SetBpm(bpm) => pipeline.clock_mut().set_bpm(bpm),
        PipelineMsg::TapTempo => {
            pipeline.clock_mut().tap_tempo(now);
        }
        PipelineMsg::Start => pipeline.clock_mut().start(now),
        PipelineMsg::Stop => {
            pipeline.all_notes_off();
            pipeline.clock_mut().stop();
        }
        PipelineMsg::AllNotesOff => pipeline.all_notes_off(),
    }
}
