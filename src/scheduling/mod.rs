// Scheduling - Pending-command queue and output dispatch

mod dispatcher;
mod queue;

pub use dispatcher::{DispatchObserver, Dispatcher, OutputSink, SinkError};
pub use queue::SchedulingQueue;
