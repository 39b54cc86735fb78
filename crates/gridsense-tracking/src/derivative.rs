//! Temporal-delta weighted centroid tracker (`Derivative_16x5`).
//!
//! Watches how each pad's value changes across a five-frame window. Per
//! channel, the newest sample minus the decay-compensated oldest sample
//! gives a motion delta; a dead-band strips sensor noise, an amplitude
//! term rewards pads with strong absolute signal, and the surviving
//! weights drive a centroid over the pad positions. Cascaded EMA stages
//! smooth the result.

use crate::geometry::{layout_bounds, LayoutBounds, SENSOR_COUNT, SENSOR_POSITIONS};
use crate::registry::Registration;
use crate::tracker::{ParamSpec, SlidingWindow, Tracker, TrackerError, TrackerInfo, TrackerOutput};
use crate::util::{clamp01, quantize, safe_exp};

const N: usize = SENSOR_COUNT;
const M: usize = 5;
const EMA_MAX_DEGREE: usize = 5;

/// Signal decay time constant for dt compensation.
const TAU_S: f64 = 0.05;
/// dt when timestamps are missing or unreasonable (≤ 0 or > 0.2 s).
const FALLBACK_DT_S: f64 = 1.0 / 105.0;

/// Dead-band on the per-channel absolute amplitude term.
const NOISE_AMP: f64 = 0.5;
/// Dead-band on the per-channel motion delta.
const NOISE_DELTA: f64 = 0.6;
/// Contribution of the amplitude term to the channel weight.
const AMP_WEIGHT: f64 = 0.25;

/// Total weight below this marks a quiet frame.
const QUIET_SUM_W: f64 = 0.35;
/// Total weight at or above this marks a valid frame.
const VALID_SUM_W: f64 = 0.80;
/// Confidence is `1 − exp(−sum_w / CONF_SCALE)`.
const CONF_SCALE: f64 = 4.0;

pub(crate) const DERIVATIVE_ID: &str = "Derivative_16x5";

fn param_schema() -> Vec<ParamSpec> {
    vec![
        ParamSpec::new("m", "M (samples)", 2.0, 5.0, 5.0, 1.0, 0),
        ParamSpec::new("ema_alpha", "EMA scale", 0.01, 1.0, 0.20, 0.01, 2),
        ParamSpec::new("ema_degree", "EMA degree", 1.0, 5.0, 3.0, 1.0, 0),
        ParamSpec::new("range_gain", "Range gain", 0.50, 3.00, 1.00, 0.05, 2),
        ParamSpec::new("noise_round", "Noise rounding", 0.0, 5.0, 1.0, 0.1, 1),
    ]
}

/// Temporal-delta centroid over the 16-pad array.
pub struct DerivativeTracker {
    window: SlidingWindow<N, M>,
    last_t_ns: u64,

    m_effective: usize,
    ema_alpha: f64,
    ema_degree: usize,
    range_gain: f64,
    noise_round: f64,

    bounds: LayoutBounds,

    ema_seeded: bool,
    x_ema: [f64; EMA_MAX_DEGREE],
    y_ema: [f64; EMA_MAX_DEGREE],
}

impl Default for DerivativeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DerivativeTracker {
    pub fn new() -> Self {
        Self {
            window: SlidingWindow::new(),
            last_t_ns: 0,
            m_effective: 5,
            ema_alpha: 0.2,
            ema_degree: 3,
            range_gain: 1.0,
            noise_round: 1.0,
            bounds: layout_bounds(),
            ema_seeded: false,
            x_ema: [0.0; EMA_MAX_DEGREE],
            y_ema: [0.0; EMA_MAX_DEGREE],
        }
    }

    pub(crate) fn registration() -> Registration {
        let params = param_schema();
        let defaults = params.iter().map(|p| p.default).collect();
        Registration {
            info: TrackerInfo {
                id: DERIVATIVE_ID,
                channels: N,
                window: M,
                params,
                defaults,
            },
            factory: || Box::new(DerivativeTracker::new()),
        }
    }

    fn dt_seconds(&mut self, t_ns: u64) -> f64 {
        let mut dt = FALLBACK_DT_S;
        if self.last_t_ns != 0 && t_ns > self.last_t_ns {
            let measured = (t_ns - self.last_t_ns) as f64 * 1e-9;
            if measured > 0.0 && measured <= 0.2 {
                dt = measured;
            }
        }
        self.last_t_ns = t_ns;
        dt
    }

    fn smoothed_output(&self) -> (f64, f64) {
        let deg = self.ema_degree.clamp(1, EMA_MAX_DEGREE);
        (self.x_ema[deg - 1], self.y_ema[deg - 1])
    }

    fn smooth(&mut self, x_est: f64, y_est: f64) -> (f64, f64) {
        let deg = self.ema_degree.clamp(1, EMA_MAX_DEGREE);
        let a = self.ema_alpha;
        if !self.ema_seeded {
            self.x_ema = [x_est; EMA_MAX_DEGREE];
            self.y_ema = [y_est; EMA_MAX_DEGREE];
            self.ema_seeded = true;
        } else {
            self.x_ema[0] += a * (x_est - self.x_ema[0]);
            self.y_ema[0] += a * (y_est - self.y_ema[0]);
            for i in 1..deg {
                self.x_ema[i] += a * (self.x_ema[i - 1] - self.x_ema[i]);
                self.y_ema[i] += a * (self.y_ema[i - 1] - self.y_ema[i]);
            }
        }
        (self.x_ema[deg - 1], self.y_ema[deg - 1])
    }
}

impl Tracker for DerivativeTracker {
    fn id(&self) -> &'static str {
        DERIVATIVE_ID
    }

    fn channels(&self) -> usize {
        N
    }

    fn window(&self) -> usize {
        M
    }

    fn params(&self) -> Vec<ParamSpec> {
        param_schema()
    }

    fn set_params(&mut self, values: &[f64]) {
        if let Some(&m) = values.first() {
            self.m_effective = (m.round() as i64).clamp(2, 5) as usize;
        }
        if let Some(&a) = values.get(1) {
            self.ema_alpha = a.clamp(0.01, 1.0);
        }
        if let Some(&d) = values.get(2) {
            self.ema_degree = (d.round() as i64).clamp(1, EMA_MAX_DEGREE as i64) as usize;
        }
        if let Some(&g) = values.get(3) {
            self.range_gain = g.clamp(0.50, 3.00);
        }
        if let Some(&q) = values.get(4) {
            self.noise_round = q.clamp(0.0, 5.0);
        }
    }

    fn reset(&mut self) {
        self.window.clear();
        self.last_t_ns = 0;
        self.ema_seeded = false;
        self.x_ema = [0.0; EMA_MAX_DEGREE];
        self.y_ema = [0.0; EMA_MAX_DEGREE];
    }

    fn push_sample(
        &mut self,
        t_ns: u64,
        sample: &[f32],
    ) -> Result<Option<TrackerOutput>, TrackerError> {
        if sample.len() != N {
            return Err(TrackerError::ChannelMismatch {
                expected: N,
                actual: sample.len(),
            });
        }

        let dt = self.dt_seconds(t_ns);
        if !self.window.push(sample) {
            return Ok(None);
        }

        let m_eff = self.m_effective.clamp(2, M);
        let span = m_eff - 1;
        let decay = safe_exp(-dt / TAU_S);
        let decay_span = decay.powi(span as i32);
        let q = self.noise_round;

        let newest = *self.window.at_age(1);
        let older = *self.window.at_age(1 + span);

        let mut sum_w = 0.0;
        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        for ch in 0..N {
            let x_new = quantize(f64::from(newest[ch]), q);
            let x_old = quantize(f64::from(older[ch]), q);

            let delta = quantize(x_new - x_old * decay_span, q);
            let mut w = (delta.abs() - NOISE_DELTA).max(0.0);
            w += AMP_WEIGHT * (x_new.abs() - NOISE_AMP).max(0.0);

            if w > 0.0 {
                sum_w += w;
                sum_x += SENSOR_POSITIONS[ch].x * w;
                sum_y += SENSOR_POSITIONS[ch].y * w;
            }
        }

        if sum_w <= 0.0 {
            let (x, y) = if self.ema_seeded {
                self.smoothed_output()
            } else {
                (0.0, 0.0)
            };
            return Ok(Some(TrackerOutput {
                valid: false,
                quiet: true,
                x,
                y,
                confidence: 0.0,
                ..TrackerOutput::default()
            }));
        }

        let gain = self.range_gain;
        let x_est = (sum_x / sum_w * gain)
            .clamp(self.bounds.min_x * gain, self.bounds.max_x * gain);
        let y_est = (sum_y / sum_w * gain)
            .clamp(self.bounds.min_y * gain, self.bounds.max_y * gain);

        let conf = clamp01(1.0 - safe_exp(-sum_w / CONF_SCALE));
        let (x, y) = self.smooth(x_est, y_est);

        Ok(Some(TrackerOutput {
            valid: sum_w >= VALID_SUM_W,
            quiet: sum_w < QUIET_SUM_W,
            x,
            y,
            confidence: conf,
            ..TrackerOutput::default()
        }))
    }
}
