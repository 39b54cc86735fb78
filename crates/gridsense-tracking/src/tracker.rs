//! The streaming contract shared by every position-tracking algorithm.

use thiserror::Error;

/// Pose output for one accepted frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrackerOutput {
    /// Whether the estimate is trustworthy at the tracker's own bar.
    pub valid: bool,
    /// Low-motion state; the published position is held.
    pub quiet: bool,
    /// Position in the sensor frame, metres.
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Auxiliary model outputs (charge states for the dipole solver,
    /// axis ratios for the heuristic baseline).
    pub q1: f64,
    pub q2: f64,
    /// Residual of the underlying fit, model-specific units.
    pub err: f64,
}

/// One user-facing tracker parameter.
///
/// `min ≤ default ≤ max` holds for every spec; values arriving through
/// `set_params` are clamped inside the tracker. `scientific` is a
/// rendering hint for hosts (exponential notation) and carries no
/// semantics in the core.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub key: &'static str,
    pub label: &'static str,
    pub min: f64,
    pub max: f64,
    pub default: f64,
    pub step: f64,
    pub decimals: i32,
    pub scientific: bool,
}

impl ParamSpec {
    pub const fn new(
        key: &'static str,
        label: &'static str,
        min: f64,
        max: f64,
        default: f64,
        step: f64,
        decimals: i32,
    ) -> Self {
        Self {
            key,
            label,
            min,
            max,
            default,
            step,
            decimals,
            scientific: false,
        }
    }

    /// Hint that hosts should render this parameter in exponential
    /// notation.
    pub const fn scientific(mut self) -> Self {
        self.scientific = true;
        self
    }
}

/// Static description of a registered tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerInfo {
    /// Stable identifier, also the selector string.
    pub id: &'static str,
    /// Declared channel count N.
    pub channels: usize,
    /// Declared window length M.
    pub window: usize,
    /// Ordered parameter schema.
    pub params: Vec<ParamSpec>,
    /// Default value per parameter, in schema order.
    pub defaults: Vec<f64>,
}

/// Errors a tracker can raise on a pushed frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackerError {
    /// The frame length disagrees with the tracker's declared N.
    #[error("tracker expects {expected} channels, frame has {actual}")]
    ChannelMismatch {
        /// Declared channel count.
        expected: usize,
        /// Length of the rejected frame.
        actual: usize,
    },
}

/// A streaming position-tracking algorithm.
///
/// Implementations own their window buffers and parameter state.
/// `push_sample` yields `Ok(None)` while the window is still filling and
/// `Ok(Some(output))` for every frame thereafter: `valid` and `quiet`
/// travel inside the output rather than gating it.
pub trait Tracker: Send {
    /// Stable identifier; matches the registry entry.
    fn id(&self) -> &'static str;

    /// Declared channel count N.
    fn channels(&self) -> usize;

    /// Declared window length M.
    fn window(&self) -> usize;

    /// Ordered parameter schema.
    fn params(&self) -> Vec<ParamSpec>;

    /// Default value per parameter, in schema order.
    fn defaults(&self) -> Vec<f64> {
        self.params().iter().map(|p| p.default).collect()
    }

    /// Apply parameter values in schema order, clamping out-of-range
    /// entries; missing trailing values keep their current settings.
    fn set_params(&mut self, values: &[f64]);

    /// Drop all window and smoothing state; parameters are kept.
    fn reset(&mut self);

    /// Feed one conditioned frame.
    fn push_sample(
        &mut self,
        t_ns: u64,
        sample: &[f32],
    ) -> Result<Option<TrackerOutput>, TrackerError>;
}

/// Fixed-size ring of the last `M` frames, shared by windowed trackers.
#[derive(Debug, Clone)]
pub struct SlidingWindow<const N: usize, const M: usize> {
    ring: [[f32; N]; M],
    head: usize,
    filled: usize,
}

impl<const N: usize, const M: usize> Default for SlidingWindow<N, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize, const M: usize> SlidingWindow<N, M> {
    pub fn new() -> Self {
        Self {
            ring: [[0.0; N]; M],
            head: 0,
            filled: 0,
        }
    }

    /// Forget all buffered frames.
    pub fn clear(&mut self) {
        self.ring = [[0.0; N]; M];
        self.head = 0;
        self.filled = 0;
    }

    /// Store one frame; returns true once the window is full.
    pub fn push(&mut self, sample: &[f32]) -> bool {
        debug_assert_eq!(sample.len(), N);
        self.ring[self.head].copy_from_slice(sample);
        self.head = (self.head + 1) % M;
        if self.filled < M {
            self.filled += 1;
        }
        self.filled == M
    }

    pub fn is_full(&self) -> bool {
        self.filled == M
    }

    /// Frame `age` pushes ago; age 1 is the newest frame, age `M` the
    /// oldest still buffered.
    pub fn at_age(&self, age: usize) -> &[f32; N] {
        debug_assert!((1..=M).contains(&age));
        &self.ring[(self.head + M - age) % M]
    }
}
