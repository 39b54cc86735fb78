//! The streaming engine: transport bytes in, frame and pose events out.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use gridsense_signal::{
    load_weights_line, CsvFloatParser, LineFramer, Pipeline, PipelineConfig, WeightsError,
};
use gridsense_tracking::{registry, Tracker, TrackerError, TrackerOutput};

use crate::sink::FrameCsvSink;
use crate::stats::{StatsTracker, StreamStats};

/// Counter (ok/bad) emission throttle.
const COUNTER_EMIT_NS: u64 = 500_000_000;
/// Tracker channel-mismatch status throttle.
const MISMATCH_WARN_NS: u64 = 500_000_000;

/// Engine command failures. Processing-path failures never surface here;
/// they are counted and reported through events.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No tracker is registered under the requested id.
    #[error("unknown tracker id {id:?}")]
    UnknownTracker {
        /// The requested selector string.
        id: String,
    },

    /// The command needs a latched channel count and none exists yet.
    #[error("no stream latched yet")]
    NoStream,

    /// Bias export was requested but no bias is stored.
    #[error("no stored bias to save")]
    NoBias,

    /// Weights file problems.
    #[error(transparent)]
    Weights(#[from] WeightsError),

    /// File sink problems.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Whether loaded weights could be applied immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightsStatus {
    /// The vector matched the latched channel count and is installed.
    Applied,
    /// Held until a stream with a matching channel count latches.
    Pending,
}

/// Options for one streaming session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Discard everything up to and including the first line terminator.
    /// Serial transports commonly open mid-line; the first "line" is then
    /// a torn fragment.
    pub discard_first_line: bool,
}

/// One conditioned frame, fanned out to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameEvent {
    /// Ingestion timestamp, monotonic nanoseconds.
    pub t_ns: u64,
    /// Conditioned samples.
    pub x: Vec<f32>,
    /// Whether the linear head ran.
    pub model_valid: bool,
    /// Linear head output; 0.0 when not valid.
    pub model_out: f32,
}

/// One tracker output, fanned out to subscribers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseEvent {
    /// Timestamp of the frame that produced this pose.
    pub t_ns: u64,
    /// The tracker's output, `valid` and `quiet` included.
    pub output: TrackerOutput,
}

/// Events delivered to subscribers, in ingestion order.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A conditioned frame was accepted.
    Frame(FrameEvent),
    /// The selected tracker produced an output.
    Pose(PoseEvent),
    /// Rolling stream statistics (throttled to 200 ms).
    Stats(StreamStats),
    /// Accepted/rejected frame counters (throttled to 500 ms).
    Counters {
        /// Frames accepted so far this session.
        ok: u64,
        /// Lines rejected so far this session.
        bad: u64,
    },
    /// Bias corrector state changed.
    Bias {
        /// A bias vector is stored.
        stored: bool,
        /// A capture is running.
        capturing: bool,
    },
    /// Human-readable status for the host UI.
    Status(String),
    /// The session closed.
    Disconnected,
}

type EventFn = Box<dyn FnMut(&EngineEvent) + Send>;

struct EngineState {
    options: SessionOptions,
    cfg: PipelineConfig,
    framer: LineFramer,
    parser: CsvFloatParser,
    pipeline: Pipeline,
    tracker: Option<Box<dyn Tracker>>,
    await_sync: bool,
    pending_weights: Option<Vec<f32>>,
    ok: u64,
    bad: u64,
    stats: StatsTracker,
    csv: Option<FrameCsvSink>,
    stream_base_ns: Option<u64>,
    last_bias_stored: bool,
    last_bias_capturing: bool,
    last_counter_emit_ns: u64,
    last_mismatch_warn_ns: u64,
}

impl EngineState {
    fn new() -> Self {
        Self {
            options: SessionOptions::default(),
            cfg: PipelineConfig::default(),
            framer: LineFramer::new(),
            parser: CsvFloatParser::new(),
            pipeline: Pipeline::new(),
            tracker: None,
            await_sync: false,
            pending_weights: None,
            ok: 0,
            bad: 0,
            stats: StatsTracker::default(),
            csv: None,
            stream_base_ns: None,
            last_bias_stored: false,
            last_bias_capturing: false,
            last_counter_emit_ns: 0,
            last_mismatch_warn_ns: 0,
        }
    }

    fn bias_event(&mut self) -> EngineEvent {
        self.last_bias_stored = self.pipeline.bias_stored();
        self.last_bias_capturing = self.pipeline.bias_capturing();
        EngineEvent::Bias {
            stored: self.last_bias_stored,
            capturing: self.last_bias_capturing,
        }
    }

    fn maybe_emit_counters(&mut self, t_ns: u64, events: &mut Vec<EngineEvent>) {
        if self.last_counter_emit_ns == 0
            || t_ns.saturating_sub(self.last_counter_emit_ns) >= COUNTER_EMIT_NS
        {
            self.last_counter_emit_ns = t_ns;
            events.push(EngineEvent::Counters {
                ok: self.ok,
                bad: self.bad,
            });
        }
    }

    fn ingest_line(&mut self, t_ns: u64, line: &str, events: &mut Vec<EngineEvent>) {
        let samples = match self.parser.parse_line(line) {
            Ok(v) => v,
            Err(err) => {
                self.bad += 1;
                debug!(%err, "dropped malformed line");
                self.maybe_emit_counters(t_ns, events);
                return;
            }
        };

        let n = samples.len();
        if self.pipeline.channel_count() == 0 {
            self.pipeline.ensure_initialized(n);
            if let Some(w) = self.pending_weights.take() {
                if w.len() == n {
                    self.pipeline.set_model_weights(&w);
                    events.push(EngineEvent::Status("weights applied".into()));
                } else {
                    self.pending_weights = Some(w);
                }
            }
            self.stats.reset();
            self.stream_base_ns = Some(t_ns);
            events.push(self.bias_event());
            events.push(EngineEvent::Stats(StreamStats::default()));
            info!(n_ch = n, "stream latched");
        }

        if self.pipeline.channel_count() != n {
            self.bad += 1;
            self.maybe_emit_counters(t_ns, events);
            return;
        }

        let out = match self.pipeline.process(t_ns, &samples) {
            Ok(out) => out,
            Err(err) => {
                self.bad += 1;
                debug!(%err, "pipeline rejected frame");
                self.maybe_emit_counters(t_ns, events);
                return;
            }
        };
        self.ok += 1;

        if self.pipeline.bias_stored() != self.last_bias_stored
            || self.pipeline.bias_capturing() != self.last_bias_capturing
        {
            events.push(self.bias_event());
        }

        if let Some(snapshot) = self.stats.record(t_ns) {
            events.push(EngineEvent::Stats(snapshot));
        }

        if let Some(csv) = self.csv.as_mut() {
            let model = out.model_valid.then_some(out.model_out);
            if let Err(err) = csv.write(&out.frame, model) {
                warn!(%err, "csv sink failed, recording stopped");
                events.push(EngineEvent::Status(format!("csv write failed: {err}")));
                self.csv = None;
            }
        }

        events.push(EngineEvent::Frame(FrameEvent {
            t_ns,
            x: out.frame.x.clone(),
            model_valid: out.model_valid,
            model_out: out.model_out,
        }));

        if let Some(tracker) = self.tracker.as_mut() {
            match tracker.push_sample(t_ns, &out.frame.x) {
                Ok(Some(output)) => events.push(EngineEvent::Pose(PoseEvent { t_ns, output })),
                Ok(None) => {}
                Err(TrackerError::ChannelMismatch { expected, actual }) => {
                    if self.last_mismatch_warn_ns == 0
                        || t_ns.saturating_sub(self.last_mismatch_warn_ns) >= MISMATCH_WARN_NS
                    {
                        self.last_mismatch_warn_ns = t_ns;
                        warn!(expected, actual, "tracker channel mismatch");
                        events.push(EngineEvent::Status(format!(
                            "tracker expects {expected} channels, stream has {actual}"
                        )));
                    }
                }
            }
        }

        self.maybe_emit_counters(t_ns, events);
    }
}

/// Owns framer, parser, pipeline, and the selected tracker for one
/// session at a time.
///
/// All commands and the processing path serialise on one internal lock;
/// `close_session` is idempotent and flips a connected flag first, so
/// transport callbacks racing with it degrade to no-ops.
pub struct StreamEngine {
    state: Mutex<EngineState>,
    connected: AtomicBool,
    subscribers: Mutex<Vec<EventFn>>,
    epoch: Instant,
}

impl Default for StreamEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EngineState::new()),
            connected: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
            epoch: Instant::now(),
        }
    }

    /// Register an event callback. Callbacks run on the thread that
    /// pushed the chunk (or issued the command), after the engine lock is
    /// released.
    pub fn subscribe(&self, f: impl FnMut(&EngineEvent) + Send + 'static) {
        self.subscribers.lock().push(Box::new(f));
    }

    fn emit(&self, events: Vec<EngineEvent>) {
        if events.is_empty() {
            return;
        }
        let mut subs = self.subscribers.lock();
        for event in &events {
            for sub in subs.iter_mut() {
                sub(event);
            }
        }
    }

    fn now_ns(&self) -> u64 {
        // +1 keeps zero free as the "no timestamp yet" sentinel.
        self.epoch.elapsed().as_nanos() as u64 + 1
    }

    /// Whether a session is open.
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Open a streaming session, closing any previous one. Everything
    /// per-session (framer tail, latched channel count, counters, stats,
    /// sinks) starts fresh; the pipeline config and selected tracker
    /// carry over.
    pub fn open_session(&self, options: SessionOptions) {
        if self.connected() {
            self.close_session();
        }

        let mut events = Vec::new();
        {
            let mut st = self.state.lock();
            st.options = options;
            st.framer.clear();
            st.pipeline.reset();
            let cfg = st.cfg;
            st.pipeline.set_config(cfg);
            if let Some(tracker) = st.tracker.as_mut() {
                tracker.reset();
            }
            st.await_sync = options.discard_first_line;
            st.ok = 0;
            st.bad = 0;
            st.stats.reset();
            st.stream_base_ns = None;
            st.last_counter_emit_ns = 0;
            st.last_mismatch_warn_ns = 0;
            events.push(st.bias_event());
            events.push(EngineEvent::Stats(StreamStats::default()));
            events.push(EngineEvent::Status("session open".into()));
        }
        self.connected.store(true, Ordering::Release);
        info!(discard_first_line = options.discard_first_line, "session opened");
        self.emit(events);
    }

    /// Close the session. Idempotent; once this returns, further
    /// `push_chunk` calls are no-ops until a session is opened again.
    pub fn close_session(&self) {
        if self
            .connected
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let mut events = Vec::new();
        {
            let mut st = self.state.lock();
            if let Some(mut csv) = st.csv.take() {
                let _ = csv.finish();
            }
            st.framer.clear();
            st.stats.reset();
            st.last_bias_stored = false;
            st.last_bias_capturing = false;
            events.push(EngineEvent::Bias {
                stored: false,
                capturing: false,
            });
            events.push(EngineEvent::Stats(StreamStats::default()));
            events.push(EngineEvent::Disconnected);
        }
        info!("session closed");
        self.emit(events);
    }

    /// Feed a transport chunk, stamping it from the engine's monotonic
    /// clock. No-op when no session is open.
    pub fn push_chunk(&self, chunk: &[u8]) {
        self.push_chunk_at(self.now_ns(), chunk);
    }

    /// Feed a transport chunk with a caller-supplied monotonic timestamp
    /// (deterministic replay, tests). Timestamps must be non-decreasing
    /// within a session.
    pub fn push_chunk_at(&self, t_ns: u64, chunk: &[u8]) {
        if !self.connected() {
            return;
        }

        let mut events = Vec::new();
        {
            let mut st = self.state.lock();
            let lines = st.framer.push(chunk);
            let mut lines = lines.into_iter();
            if st.await_sync {
                // Drop the torn fragment before the first terminator.
                if lines.next().is_some() {
                    st.await_sync = false;
                }
            }
            for line in lines {
                st.ingest_line(t_ns, &line, &mut events);
            }
        }
        self.emit(events);
    }

    /// Swap the conditioning configuration; applied live at the next
    /// frame boundary.
    pub fn set_pipeline_config(&self, cfg: PipelineConfig) {
        let mut events = Vec::new();
        {
            let mut st = self.state.lock();
            st.cfg = cfg;
            st.pipeline.set_config(cfg);
            events.push(st.bias_event());
        }
        self.emit(events);
    }

    /// Current conditioning configuration.
    pub fn pipeline_config(&self) -> PipelineConfig {
        self.state.lock().cfg
    }

    /// Start a bias capture over the next `frames` conditioned frames.
    pub fn begin_bias_capture(&self, frames: usize) -> Result<(), EngineError> {
        let mut events = Vec::new();
        {
            let mut st = self.state.lock();
            if st.pipeline.channel_count() == 0 {
                return Err(EngineError::NoStream);
            }
            st.pipeline.begin_bias_capture(frames);
            events.push(st.bias_event());
            events.push(EngineEvent::Status(format!(
                "bias capture started ({} frames)",
                frames.max(1)
            )));
        }
        self.emit(events);
        Ok(())
    }

    /// Export the stored bias as CSV.
    pub fn save_bias(&self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let bias: Vec<f32> = {
            let st = self.state.lock();
            if !st.pipeline.bias_stored() {
                return Err(EngineError::NoBias);
            }
            st.pipeline.bias().to_vec()
        };
        crate::sink::write_bias_csv(path, &bias)?;
        Ok(())
    }

    /// Load linear-head weights from a one-line CSV. Applied immediately
    /// when the length matches the latched channel count, otherwise held
    /// pending until a matching stream latches.
    pub fn load_weights(&self, path: impl AsRef<Path>) -> Result<WeightsStatus, EngineError> {
        let weights = load_weights_line(path)?;
        let mut st = self.state.lock();
        let n = st.pipeline.channel_count();
        if n != 0 && weights.len() == n {
            st.pipeline.set_model_weights(&weights);
            st.pending_weights = None;
            info!(len = weights.len(), "weights applied");
            Ok(WeightsStatus::Applied)
        } else {
            info!(len = weights.len(), latched = n, "weights pending");
            st.pending_weights = Some(weights);
            Ok(WeightsStatus::Pending)
        }
    }

    /// Start recording conditioned frames to CSV.
    pub fn start_csv(&self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let mut st = self.state.lock();
        let base = st.stream_base_ns;
        st.csv = Some(FrameCsvSink::create(path, base)?);
        Ok(())
    }

    /// Stop recording and flush the CSV sink.
    pub fn stop_csv(&self) {
        let mut st = self.state.lock();
        if let Some(mut csv) = st.csv.take() {
            let _ = csv.finish();
        }
    }

    /// Whether a CSV recording is active.
    pub fn csv_active(&self) -> bool {
        self.state.lock().csv.is_some()
    }

    /// Select the tracker by registry id; the instance starts with its
    /// default parameters.
    pub fn select_tracker(&self, id: &str) -> Result<(), EngineError> {
        let mut tracker = registry::create(id).ok_or_else(|| EngineError::UnknownTracker {
            id: id.to_string(),
        })?;
        let defaults = tracker.defaults();
        tracker.set_params(&defaults);
        tracker.reset();

        let mut st = self.state.lock();
        st.last_mismatch_warn_ns = 0;
        st.tracker = Some(tracker);
        info!(id, "tracker selected");
        Ok(())
    }

    /// Drop the selected tracker; frames keep flowing without poses.
    pub fn clear_tracker(&self) {
        self.state.lock().tracker = None;
    }

    /// Id of the selected tracker, if any.
    pub fn tracker_id(&self) -> Option<&'static str> {
        self.state.lock().tracker.as_ref().map(|t| t.id())
    }

    /// Apply parameter values to the selected tracker.
    pub fn set_tracker_params(&self, values: &[f64]) {
        if let Some(tracker) = self.state.lock().tracker.as_mut() {
            tracker.set_params(values);
        }
    }

    /// Reset the selected tracker's window and smoothing state.
    pub fn reset_tracker(&self) {
        if let Some(tracker) = self.state.lock().tracker.as_mut() {
            tracker.reset();
        }
    }

    /// Accepted / rejected counters for this session.
    pub fn counters(&self) -> (u64, u64) {
        let st = self.state.lock();
        (st.ok, st.bad)
    }

    /// The latched channel count; zero before the first accepted frame.
    pub fn channel_count(&self) -> usize {
        self.state.lock().pipeline.channel_count()
    }
}

impl Drop for StreamEngine {
    fn drop(&mut self) {
        self.close_session();
    }
}
