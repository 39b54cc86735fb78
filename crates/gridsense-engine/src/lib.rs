//! Streaming engine for gridsense sensor sessions.
//!
//! The engine owns the line framer, frame parser, conditioning pipeline,
//! and at most one selected tracker, and drives them from raw transport
//! byte chunks. Hosts (GUI, CLI, tests) subscribe for events and issue
//! commands; transports only deliver bytes.
//!
//! ```text
//! bytes ──► framer ──► parser ──► pipeline ──► FrameEvent ──► csv sink
//!                                     │
//!                                     └──► tracker ──► PoseEvent
//! ```
//!
//! One `parking_lot::Mutex` serialises every command and the processing
//! path, so filter delay lines, tracker windows, and bias accumulators
//! can never be observed half-updated. Events are snapshotted under the
//! lock and delivered after it is released.

mod engine;
mod sink;
mod stats;

pub use engine::{
    EngineError, EngineEvent, FrameEvent, PoseEvent, SessionOptions, StreamEngine, WeightsStatus,
};
pub use sink::{write_bias_csv, FrameCsvSink};
pub use stats::StreamStats;
