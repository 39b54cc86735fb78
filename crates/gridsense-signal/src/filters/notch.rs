//! Band-reject biquad for mains interference.
//!
//! RBJ cookbook notch, one biquad per channel in transposed direct form
//! II. Capacitive front-ends pick up 50/60 Hz strongly; the notch runs
//! before averaging so its transient gets smoothed away downstream.

use std::f64::consts::PI;

/// Notch tuning; non-positive or non-finite values fall back to the
/// 200 Hz sample rate / 60 Hz centre / Q 30 mains profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NotchParams {
    /// Sampling rate of the stream in Hz.
    pub sample_rate_hz: f64,
    /// Centre frequency to reject in Hz.
    pub center_hz: f64,
    /// Quality factor (bandwidth = center / Q).
    pub q: f64,
}

impl Default for NotchParams {
    fn default() -> Self {
        Self {
            sample_rate_hz: 200.0,
            center_hz: 60.0,
            q: 30.0,
        }
    }
}

/// Per-channel band-reject biquad.
///
/// `set_params` recomputes the coefficients without clearing the delay
/// line, so the notch can be retuned live on a running stream.
#[derive(Debug, Default, Clone)]
pub struct NotchBiquad {
    ready: bool,
    n_ch: usize,
    params: NotchParams,
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    z1: Vec<f64>,
    z2: Vec<f64>,
}

impl NotchBiquad {
    /// Drop all state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Allocate delay lines for `n_ch` channels and compute coefficients.
    pub fn configure(&mut self, n_ch: usize, params: NotchParams) {
        self.n_ch = n_ch;
        self.z1 = vec![0.0; n_ch];
        self.z2 = vec![0.0; n_ch];
        self.params = params;
        self.recompute();
        self.ready = true;
    }

    /// Retune without flushing the delay lines.
    pub fn set_params(&mut self, params: NotchParams) {
        self.params = params;
        self.recompute();
    }

    fn recompute(&mut self) {
        let p = &mut self.params;
        if !(p.sample_rate_hz > 0.0) {
            p.sample_rate_hz = 200.0;
        }
        if !(p.center_hz > 0.0) {
            p.center_hz = 60.0;
        }
        if !(p.q > 0.0) {
            p.q = 30.0;
        }

        let w0 = 2.0 * PI * (p.center_hz / p.sample_rate_hz);
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * p.q);

        let a0 = 1.0 + alpha;
        self.b0 = 1.0 / a0;
        self.b1 = -2.0 * cos_w0 / a0;
        self.b2 = 1.0 / a0;
        self.a1 = -2.0 * cos_w0 / a0;
        self.a2 = (1.0 - alpha) / a0;
    }

    /// Filter each channel in place.
    pub fn process_inplace(&mut self, x: &mut [f32]) {
        if !self.ready || x.len() != self.n_ch {
            return;
        }
        for (i, v) in x.iter_mut().enumerate() {
            let input = f64::from(*v);
            let out = self.b0 * input + self.z1[i];
            self.z1[i] = self.b1 * input - self.a1 * out + self.z2[i];
            self.z2[i] = self.b2 * input - self.a2 * out;
            *v = out as f32;
        }
    }

    pub fn params(&self) -> NotchParams {
        self.params
    }

    pub fn ready(&self) -> bool {
        self.ready
    }

    #[cfg(test)]
    fn state_norm(&self) -> f64 {
        self.z1
            .iter()
            .chain(self.z2.iter())
            .map(|z| z * z)
            .sum::<f64>()
            .sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_the_centre_frequency() {
        let mut notch = NotchBiquad::default();
        notch.configure(1, NotchParams::default()); // 200 / 60 / 30

        let fs = 200.0;
        let f0 = 60.0;
        let mut peak = 0.0_f32;
        for n in 0..2000 {
            let t = n as f64 / fs;
            let mut x = [(2.0 * PI * f0 * t).sin() as f32];
            notch.process_inplace(&mut x);
            // Let the transient die down before measuring.
            if n >= 1000 {
                peak = peak.max(x[0].abs());
            }
        }
        assert!(peak <= 0.05, "steady-state 60 Hz leakage {peak}");
    }

    #[test]
    fn passes_dc() {
        let mut notch = NotchBiquad::default();
        notch.configure(1, NotchParams::default());
        let mut last = 0.0_f32;
        for _ in 0..500 {
            let mut x = [1.0_f32];
            notch.process_inplace(&mut x);
            last = x[0];
        }
        assert!((last - 1.0).abs() < 1e-3, "DC gain drifted to {last}");
    }

    #[test]
    fn impulse_response_decays() {
        let mut notch = NotchBiquad::default();
        notch.configure(1, NotchParams::default());

        notch.process_inplace(&mut [1.0]);
        let excited = notch.state_norm();
        assert!(excited > 0.0);

        for _ in 0..20_000 {
            notch.process_inplace(&mut [0.0]);
        }
        assert!(notch.state_norm() < 1e-6 * excited);
    }

    #[test]
    fn retune_keeps_delay_state() {
        let mut notch = NotchBiquad::default();
        notch.configure(1, NotchParams::default());
        notch.process_inplace(&mut [1.0]);
        let before = notch.state_norm();

        notch.set_params(NotchParams {
            center_hz: 50.0,
            ..NotchParams::default()
        });
        assert_eq!(notch.state_norm(), before);
        assert_eq!(notch.params().center_hz, 50.0);
    }

    #[test]
    fn invalid_params_fall_back_to_mains_profile() {
        let mut notch = NotchBiquad::default();
        notch.configure(
            2,
            NotchParams {
                sample_rate_hz: -1.0,
                center_hz: 0.0,
                q: f64::NAN,
            },
        );
        assert_eq!(notch.params(), NotchParams::default());
    }
}
