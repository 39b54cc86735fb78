//! Quadrant-difference baseline tracker (`ExampleAlgo_16x1`).
//!
//! A deliberately lightweight single-frame heuristic, kept around as the
//! reference point new algorithms are measured against and as the
//! smallest possible example of the tracker contract. Splits the channels
//! by index half and parity, turns the group differences into axis
//! ratios, and scales them into the sensor plane.

use crate::registry::Registration;
use crate::tracker::{ParamSpec, Tracker, TrackerError, TrackerInfo, TrackerOutput};
use crate::util::{clamp01, safe_exp};

const N: usize = 16;

pub(crate) const QUADRANT_ID: &str = "ExampleAlgo_16x1";

fn param_schema() -> Vec<ParamSpec> {
    vec![
        ParamSpec::new("scale", "Scale", 0.0, 0.2, 0.03, 0.001, 6),
        ParamSpec::new("gain", "Conf gain", 0.0, 50.0, 5.0, 0.1, 4),
        ParamSpec::new("min_conf", "Min conf", 0.0, 1.0, 0.15, 0.01, 4),
    ]
}

/// Single-frame quadrant-difference heuristic.
pub struct QuadrantTracker {
    scale: f64,
    gain: f64,
    min_conf: f64,
}

impl Default for QuadrantTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl QuadrantTracker {
    pub fn new() -> Self {
        Self {
            scale: 0.03,
            gain: 5.0,
            min_conf: 0.15,
        }
    }

    pub(crate) fn registration() -> Registration {
        let params = param_schema();
        let defaults = params.iter().map(|p| p.default).collect();
        Registration {
            info: TrackerInfo {
                id: QUADRANT_ID,
                channels: N,
                window: 1,
                params,
                defaults,
            },
            factory: || Box::new(QuadrantTracker::new()),
        }
    }
}

impl Tracker for QuadrantTracker {
    fn id(&self) -> &'static str {
        QUADRANT_ID
    }

    fn channels(&self) -> usize {
        N
    }

    fn window(&self) -> usize {
        1
    }

    fn params(&self) -> Vec<ParamSpec> {
        param_schema()
    }

    fn set_params(&mut self, values: &[f64]) {
        if let Some(&s) = values.first() {
            self.scale = s.clamp(0.0, 0.2);
        }
        if let Some(&g) = values.get(1) {
            self.gain = g.clamp(0.0, 50.0);
        }
        if let Some(&c) = values.get(2) {
            self.min_conf = c.clamp(0.0, 1.0);
        }
    }

    fn reset(&mut self) {
        // Stateless: nothing buffered between frames.
    }

    fn push_sample(
        &mut self,
        _t_ns: u64,
        sample: &[f32],
    ) -> Result<Option<TrackerOutput>, TrackerError> {
        if sample.len() != N {
            return Err(TrackerError::ChannelMismatch {
                expected: N,
                actual: sample.len(),
            });
        }

        let mut low_half = 0.0_f64;
        let mut high_half = 0.0_f64;
        let mut even = 0.0_f64;
        let mut odd = 0.0_f64;
        let mut abs_sum = 0.0_f64;

        for (i, &s) in sample.iter().enumerate() {
            let v = f64::from(s);
            abs_sum += v.abs();
            if i < N / 2 {
                low_half += v;
            } else {
                high_half += v;
            }
            if i % 2 == 0 {
                even += v;
            } else {
                odd += v;
            }
        }

        let dx = (low_half - high_half) / (low_half.abs() + high_half.abs() + 1e-9);
        let dy = (even - odd) / (even.abs() + odd.abs() + 1e-9);

        let mean_abs = abs_sum / N as f64;
        let conf = clamp01(1.0 - safe_exp(-self.gain * mean_abs));

        Ok(Some(TrackerOutput {
            valid: true,
            quiet: conf < self.min_conf,
            x: self.scale * dx,
            y: self.scale * dy,
            z: 0.0,
            confidence: conf,
            q1: dx,
            q2: dy,
            err: 1.0 - conf,
        }))
    }
}
