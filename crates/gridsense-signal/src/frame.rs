//! The frame type flowing through the conditioning path.

/// One multi-channel sample with a monotonic timestamp.
///
/// `t_ns` comes from the session's monotonic clock, never wall time; all
/// ordering and dt computations downstream derive from it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    /// Monotonic nanosecond timestamp assigned at ingestion.
    pub t_ns: u64,
    /// Channel samples; length equals the session's latched channel count.
    pub x: Vec<f32>,
}

impl Frame {
    /// Number of channels in this frame.
    pub fn channel_count(&self) -> usize {
        self.x.len()
    }
}
