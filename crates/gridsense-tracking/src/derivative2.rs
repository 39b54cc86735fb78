//! Weighted-slope centroid tracker with prior blending
//! (`Derivative2_16x5`).
//!
//! The second-generation derivative estimator. Instead of a two-point
//! delta it fits an exponentially weighted least-squares slope over the
//! whole window per channel, blends fresh estimates against the previous
//! position when confidence is low, and holds outright when the total
//! motion weight drops under a threshold. All of its tuning knobs are
//! exposed as parameters rather than baked-in constants.

use crate::geometry::{layout_bounds, LayoutBounds, SENSOR_COUNT, SENSOR_POSITIONS};
use crate::registry::Registration;
use crate::tracker::{ParamSpec, SlidingWindow, Tracker, TrackerError, TrackerInfo, TrackerOutput};
use crate::util::{clamp01, quantize, safe_exp};

const N: usize = SENSOR_COUNT;
const M: usize = 5;
const EMA_MAX_DEGREE: usize = 8;

/// Signal decay time constant for dt compensation.
const TAU_S: f64 = 0.05;
/// dt when timestamps are missing or unreasonable (≤ 0 or > 0.2 s).
const FALLBACK_DT_S: f64 = 1.0 / 105.0;

/// Confidence at or above this marks a valid frame.
const VALID_CONF: f64 = 0.35;
/// Confidence below this marks a quiet frame.
const QUIET_CONF: f64 = 0.15;

pub(crate) const DERIVATIVE2_ID: &str = "Derivative2_16x5";

/// Σ (k − mean)² of the index weights for an m-point slope fit.
fn slope_denominator(len: usize) -> f64 {
    match len {
        0 | 1 => 1.0,
        2 => 0.5,
        3 => 2.0,
        4 => 5.0,
        _ => 10.0,
    }
}

fn param_schema() -> Vec<ParamSpec> {
    vec![
        ParamSpec::new("m", "M (samples)", 2.0, 5.0, 5.0, 1.0, 0),
        ParamSpec::new("ema_alpha", "EMA scale", 0.0, 1.0, 0.20, 0.01, 2),
        ParamSpec::new("ema_degree", "EMA degree", 0.0, 8.0, 1.0, 1.0, 0),
        ParamSpec::new("range_gain", "Range gain", 0.1, 10.0, 1.00, 0.05, 2),
        ParamSpec::new("noise_round", "Noise rounding", 0.0, 20.0, 1.0, 0.1, 1),
        ParamSpec::new("motion_deadband", "Motion deadband", 0.0, 20.0, 1.0, 0.1, 1),
        ParamSpec::new("prior_strength", "Prior strength", 0.0, 50.0, 6.0, 0.5, 1),
        ParamSpec::new("hold_w", "Hold threshold", 0.0, 10.0, 0.80, 0.05, 2),
        ParamSpec::new("conf_scale", "Confidence scale", 0.1, 50.0, 6.0, 0.1, 1),
    ]
}

/// Slope-centroid tracker with prior blending and hold.
pub struct Derivative2Tracker {
    window: SlidingWindow<N, M>,
    last_t_ns: u64,

    m_effective: usize,
    ema_alpha: f64,
    ema_degree: usize,
    range_gain: f64,
    noise_round: f64,
    motion_deadband: f64,
    prior_strength: f64,
    hold_w: f64,
    conf_scale: f64,

    bounds: LayoutBounds,

    has_last_pos: bool,
    last_x: f64,
    last_y: f64,

    ema_seeded: bool,
    x_ema: [f64; EMA_MAX_DEGREE],
    y_ema: [f64; EMA_MAX_DEGREE],
}

impl Default for Derivative2Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Derivative2Tracker {
    pub fn new() -> Self {
        Self {
            window: SlidingWindow::new(),
            last_t_ns: 0,
            m_effective: 5,
            ema_alpha: 0.2,
            ema_degree: 1,
            range_gain: 1.0,
            noise_round: 1.0,
            motion_deadband: 1.0,
            prior_strength: 6.0,
            hold_w: 0.8,
            conf_scale: 6.0,
            bounds: layout_bounds(),
            has_last_pos: false,
            last_x: 0.0,
            last_y: 0.0,
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
                id: DERIVATIVE2_ID,
                channels: N,
                window: M,
                params,
                defaults,
            },
            factory: || Box::new(Derivative2Tracker::new()),
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

    fn held_output(&self, confidence: f64) -> TrackerOutput {
        TrackerOutput {
            valid: false,
            quiet: true,
            x: if self.has_last_pos { self.last_x } else { 0.0 },
            y: if self.has_last_pos { self.last_y } else { 0.0 },
            confidence,
            ..TrackerOutput::default()
        }
    }

    /// Run the cascaded EMA; degree 0 or a coefficient outside (0, 1)
    /// short-circuits in the way each case calls for.
    fn smooth(&mut self, x_est: f64, y_est: f64) -> (f64, f64) {
        let deg = self.ema_degree.min(EMA_MAX_DEGREE);
        let a = self.ema_alpha;

        if deg == 0 || a <= 0.0 {
            return (x_est, y_est);
        }

        if !self.ema_seeded {
            self.x_ema = [x_est; EMA_MAX_DEGREE];
            self.y_ema = [y_est; EMA_MAX_DEGREE];
            self.ema_seeded = true;
        } else if a < 1.0 {
            self.x_ema[0] += a * (x_est - self.x_ema[0]);
            self.y_ema[0] += a * (y_est - self.y_ema[0]);
            for i in 1..deg {
                self.x_ema[i] += a * (self.x_ema[i - 1] - self.x_ema[i]);
                self.y_ema[i] += a * (self.y_ema[i - 1] - self.y_ema[i]);
            }
        } else {
            // alpha saturated at 1: the cascade degenerates to a delay-free
            // copy chain.
            self.x_ema[0] = x_est;
            self.y_ema[0] = y_est;
            for i in 1..deg {
                self.x_ema[i] = self.x_ema[i - 1];
                self.y_ema[i] = self.y_ema[i - 1];
            }
        }
        (self.x_ema[deg - 1], self.y_ema[deg - 1])
    }
}

impl Tracker for Derivative2Tracker {
    fn id(&self) -> &'static str {
        DERIVATIVE2_ID
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
            self.ema_alpha = a.clamp(0.0, 1.0);
        }
        if let Some(&d) = values.get(2) {
            self.ema_degree = (d.round() as i64).clamp(0, EMA_MAX_DEGREE as i64) as usize;
        }
        if let Some(&g) = values.get(3) {
            self.range_gain = g.clamp(0.1, 10.0);
        }
        if let Some(&q) = values.get(4) {
            self.noise_round = q.clamp(0.0, 20.0);
        }
        if let Some(&d) = values.get(5) {
            self.motion_deadband = d.clamp(0.0, 20.0);
        }
        if let Some(&p) = values.get(6) {
            self.prior_strength = p.clamp(0.0, 50.0);
        }
        if let Some(&h) = values.get(7) {
            self.hold_w = h.clamp(0.0, 10.0);
        }
        if let Some(&c) = values.get(8) {
            self.conf_scale = c.clamp(0.1, 50.0);
        }
    }

    fn reset(&mut self) {
        self.window.clear();
        self.last_t_ns = 0;
        self.has_last_pos = false;
        self.last_x = 0.0;
        self.last_y = 0.0;
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
        let mean_k = 0.5 * (m_eff - 1) as f64;
        let denom = slope_denominator(m_eff);
        let decay = safe_exp(-dt / TAU_S);
        let q = self.noise_round;
        let dead = self.motion_deadband;

        let mut sum_w = 0.0;
        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        for ch in 0..N {
            // Weighted index-slope; the exponential weight decays toward
            // older samples.
            let mut num = 0.0;
            let mut p = 1.0;
            for k in (0..m_eff).rev() {
                let age = m_eff - k;
                let xk = quantize(f64::from(self.window.at_age(age)[ch]), q);
                num += (k as f64 - mean_k) * (xk * p);
                p *= decay;
            }

            let slope = quantize(num / denom, q);
            let w = (slope.abs() - dead).max(0.0);
            if w > 0.0 {
                sum_w += w;
                sum_x += SENSOR_POSITIONS[ch].x * w;
                sum_y += SENSOR_POSITIONS[ch].y * w;
            }
        }

        if sum_w <= 0.0 {
            return Ok(Some(self.held_output(0.0)));
        }

        let conf = clamp01(1.0 - safe_exp(-sum_w / self.conf_scale));

        if self.has_last_pos && sum_w < self.hold_w {
            return Ok(Some(self.held_output(conf)));
        }

        let gain = self.range_gain;
        let mut x_est = (sum_x / sum_w * gain)
            .clamp(self.bounds.min_x * gain, self.bounds.max_x * gain);
        let mut y_est = (sum_y / sum_w * gain)
            .clamp(self.bounds.min_y * gain, self.bounds.max_y * gain);

        // Low-confidence estimates lean on the previous position.
        if self.has_last_pos {
            let prior_w = self.prior_strength * (1.0 - conf);
            let total = sum_w + prior_w;
            if total > 0.0 {
                x_est = (sum_w * x_est + prior_w * self.last_x) / total;
                y_est = (sum_w * y_est + prior_w * self.last_y) / total;
            }
        }

        let (x, y) = self.smooth(x_est, y_est);
        self.last_x = x;
        self.last_y = y;
        self.has_last_pos = true;

        Ok(Some(TrackerOutput {
            valid: conf >= VALID_CONF,
            quiet: conf < QUIET_CONF,
            x,
            y,
            confidence: conf,
            ..TrackerOutput::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PAD_PITCH_M;
    use approx::assert_relative_eq;

    const DT_NS: u64 = 10_000_000;

    fn push_all(t: &mut Derivative2Tracker, frames: &[[f32; N]]) -> Option<TrackerOutput> {
        let mut last = None;
        for (i, f) in frames.iter().enumerate() {
            last = t.push_sample((i as u64 + 1) * DT_NS, f).unwrap();
        }
        last
    }

    /// Frames with a linear ramp on one pad, steep enough to clear the
    /// default dead-band after rounding.
    fn ramp_on_pad(pad: usize, step: f32) -> [[f32; N]; 5] {
        let mut frames = [[0.0_f32; N]; 5];
        for (i, f) in frames.iter_mut().enumerate() {
            f[pad] = step * i as f32;
        }
        frames
    }

    #[test]
    fn no_output_until_the_window_fills() {
        let mut t = Derivative2Tracker::new();
        for i in 1..5 {
            assert!(t.push_sample(i * DT_NS, &[0.0; N]).unwrap().is_none());
        }
        assert!(t.push_sample(5 * DT_NS, &[0.0; N]).unwrap().is_some());
    }

    #[test]
    fn flat_input_is_quiet_with_no_position_history() {
        let mut t = Derivative2Tracker::new();
        let out = push_all(&mut t, &[[1.0; N]; 5]).unwrap();
        assert!(out.quiet);
        assert!(!out.valid);
        assert_eq!(out.x, 0.0);
        assert_eq!(out.y, 0.0);
    }

    #[test]
    fn ramp_on_a_pad_estimates_that_pad() {
        let mut t = Derivative2Tracker::new();
        let out = push_all(&mut t, &ramp_on_pad(2, 10.0)).unwrap();
        // Pad 2 sits at (+1.5d, -1.5d).
        assert!(out.valid);
        assert_relative_eq!(out.x, 1.5 * PAD_PITCH_M, epsilon = 1e-9);
        assert_relative_eq!(out.y, -1.5 * PAD_PITCH_M, epsilon = 1e-9);
    }

    #[test]
    fn weak_motion_after_track_holds_the_last_position() {
        let mut t = Derivative2Tracker::new();
        // Disable quantisation so fractional weights can land between
        // zero and the hold threshold.
        t.set_params(&[5.0, 0.2, 1.0, 1.0, 0.0, 1.0, 6.0, 0.8, 6.0]);

        let strong = push_all(&mut t, &ramp_on_pad(2, 10.0)).unwrap();
        assert!(t.has_last_pos);

        // Fade out, then a slow ramp whose slope clears the dead-band by
        // less than hold_w: the tracker must hold rather than re-estimate.
        let mut held = None;
        for i in 0..10u64 {
            let mut f = [0.0_f32; N];
            if i >= 5 {
                f[2] = 1.5 * (i - 5) as f32;
            }
            held = t.push_sample((10 + i) * DT_NS, &f).unwrap();
        }
        let held = held.unwrap();
        assert!(held.quiet);
        assert!(!held.valid);
        assert_relative_eq!(held.x, strong.x);
        assert_relative_eq!(held.y, strong.y);
    }

    #[test]
    fn prior_blending_pulls_toward_the_previous_position() {
        let mut t = Derivative2Tracker::new();
        // Strong track onto pad 2 (x = +1.5d).
        push_all(&mut t, &ramp_on_pad(2, 20.0));
        let anchor_x = t.last_x;

        // Moderate motion at the opposite corner, pad 10 (x = -1.5d),
        // with alpha 1 so smoothing does not mask the blend.
        t.set_params(&[5.0, 1.0, 1.0]);
        let mut frames = [[0.0_f32; N]; 5];
        for (i, f) in frames.iter_mut().enumerate() {
            f[10] = 3.0 * i as f32;
        }
        let mut out = None;
        for (i, f) in frames.iter().enumerate() {
            out = t.push_sample((20 + i as u64) * DT_NS, f).unwrap();
        }
        let out = out.unwrap();
        // The raw centroid is at pad 10, but the prior keeps the output
        // strictly between the two corners.
        assert!(out.x > -1.5 * PAD_PITCH_M);
        assert!(out.x < anchor_x);
    }

    #[test]
    fn degree_zero_bypasses_smoothing() {
        let mut t = Derivative2Tracker::new();
        t.set_params(&[5.0, 0.2, 0.0]);
        let out = push_all(&mut t, &ramp_on_pad(2, 10.0)).unwrap();
        assert!(!t.ema_seeded);
        assert!(out.valid);
    }

    #[test]
    fn params_are_clamped_and_partial() {
        let mut t = Derivative2Tracker::new();
        t.set_params(&[1.0, 2.0, 99.0, 0.0]);
        assert_eq!(t.m_effective, 2);
        assert_eq!(t.ema_alpha, 1.0);
        assert_eq!(t.ema_degree, 8);
        assert_eq!(t.range_gain, 0.1);
        assert_eq!(t.hold_w, 0.8); // untouched
    }

    #[test]
    fn slope_denominators_match_the_window_lengths() {
        assert_eq!(slope_denominator(2), 0.5);
        assert_eq!(slope_denominator(3), 2.0);
        assert_eq!(slope_denominator(4), 5.0);
        assert_eq!(slope_denominator(5), 10.0);
    }
}
