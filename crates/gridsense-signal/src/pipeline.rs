//! The conditioning pipeline: wires the filters, bias corrector, and
//! linear head behind channel-count latching.
//!
//! Stage order per frame: notch → moving average → EMA, then bias capture
//! from the conditioned frame, then bias subtraction, then the linear
//! head. Bias is captured in the same post-filter domain it will later
//! correct, so the stored and applied offsets have identical statistical
//! meaning; the notch runs first so its transient is averaged down by the
//! MA and further smoothed by the EMA.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::filters::{BiasCorrector, EmaFilter, MovingAverage, NotchBiquad, NotchParams};
use crate::frame::Frame;
use crate::linear::LinearHead;

/// Errors surfaced by frame processing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// The frame length disagrees with the latched channel count.
    #[error("channel count mismatch: latched {expected}, frame has {actual}")]
    ChannelMismatch {
        /// The latched channel count.
        expected: usize,
        /// The length of the rejected frame.
        actual: usize,
    },
}

/// The recognised conditioning options, swapped as a whole.
///
/// Swapping a config never resets filter state unless the channel count
/// changes; coefficient-only changes (α, fs, f0, Q) apply live. Changing
/// the MA window reallocates the MA ring only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Moving-average stage on/off.
    pub ma_enabled: bool,
    /// Moving-average window length (floored at one).
    pub ma_window: usize,
    /// EMA stage on/off.
    pub ema_enabled: bool,
    /// EMA coefficient, clamped to [0, 1].
    pub ema_alpha: f32,
    /// Notch stage on/off.
    pub notch_enabled: bool,
    /// Stream sampling rate in Hz.
    pub sample_rate_hz: f64,
    /// Notch centre frequency in Hz.
    pub notch_freq_hz: f64,
    /// Notch quality factor.
    pub notch_q: f64,
    /// Subtract the stored bias when one exists.
    pub bias_enabled: bool,
    /// Evaluate the linear head per frame.
    pub model_enabled: bool,
    /// Scalar bias of the linear head.
    pub model_bias: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ma_enabled: false,
            ma_window: 5,
            ema_enabled: false,
            ema_alpha: 0.2,
            notch_enabled: false,
            sample_rate_hz: 200.0,
            notch_freq_hz: 60.0,
            notch_q: 30.0,
            bias_enabled: false,
            model_enabled: false,
            model_bias: 0.0,
        }
    }
}

impl PipelineConfig {
    fn notch_params(&self) -> NotchParams {
        NotchParams {
            sample_rate_hz: self.sample_rate_hz,
            center_hz: self.notch_freq_hz,
            q: self.notch_q,
        }
    }
}

/// Output of one pipeline pass.
#[derive(Debug, Clone, Default)]
pub struct PipelineOutput {
    /// The conditioned frame.
    pub frame: Frame,
    /// Whether the linear head ran on this frame.
    pub model_valid: bool,
    /// Linear head output; 0.0 when not valid.
    pub model_out: f32,
}

/// Owns all per-stage filter state and applies the configured cascade.
///
/// The channel count is latched from the first accepted frame; frames of
/// a different length are rejected without touching stage state, and the
/// host calls [`Pipeline::reset`] to relatch.
#[derive(Debug, Default)]
pub struct Pipeline {
    cfg: PipelineConfig,
    n_ch: usize,
    ma: MovingAverage,
    ema: EmaFilter,
    notch: NotchBiquad,
    bias: BiasCorrector,
    model: LinearHead,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the latched channel count, all stage state, and the config.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn config(&self) -> PipelineConfig {
        self.cfg
    }

    /// Swap the active configuration.
    pub fn set_config(&mut self, cfg: PipelineConfig) {
        self.cfg = cfg;
        if self.n_ch == 0 {
            return;
        }

        if !self.ma.ready() || self.ma.window() != self.cfg.ma_window.max(1) {
            self.ma.configure(self.n_ch, self.cfg.ma_window);
        }

        if self.ema.ready() {
            self.ema.set_alpha(self.cfg.ema_alpha);
        } else {
            self.ema.configure(self.n_ch, self.cfg.ema_alpha);
        }

        if self.notch.ready() {
            self.notch.set_params(self.cfg.notch_params());
        } else {
            self.notch.configure(self.n_ch, self.cfg.notch_params());
        }

        if self.bias.channel_count() != self.n_ch {
            self.bias.configure(self.n_ch);
        }

        if !self.model.ready() {
            self.model.configure(self.n_ch);
        }
        self.model.set_bias(self.cfg.model_bias);
    }

    /// Latch (or relatch) the channel count, (re)allocating stage state.
    ///
    /// A running bias capture does not survive a channel-count change.
    pub fn ensure_initialized(&mut self, n_ch: usize) {
        if self.n_ch == n_ch && n_ch > 0 {
            return;
        }
        debug!(n_ch, "latching channel count");
        self.n_ch = n_ch;
        self.ma.configure(n_ch, self.cfg.ma_window);
        self.ema.configure(n_ch, self.cfg.ema_alpha);
        self.notch.configure(n_ch, self.cfg.notch_params());
        self.bias.configure(n_ch);
        self.model.configure(n_ch);
        self.model.set_bias(self.cfg.model_bias);
    }

    /// The latched channel count; zero before the first accepted frame.
    pub fn channel_count(&self) -> usize {
        self.n_ch
    }

    /// Start a bias capture over the next `frames` conditioned frames.
    pub fn begin_bias_capture(&mut self, frames: usize) {
        if self.n_ch == 0 {
            return;
        }
        self.bias.begin_capture(frames);
    }

    /// Install a bias vector directly, aborting any running capture.
    pub fn set_bias(&mut self, bias: &[f32]) {
        if self.n_ch == 0 {
            return;
        }
        self.bias.set_bias(bias);
    }

    pub fn bias_capturing(&self) -> bool {
        self.bias.capturing()
    }

    pub fn bias_stored(&self) -> bool {
        self.bias.has_bias()
    }

    pub fn bias(&self) -> &[f32] {
        self.bias.bias()
    }

    /// Install linear-head weights; ignored until the length matches.
    pub fn set_model_weights(&mut self, w: &[f32]) {
        if self.n_ch == 0 {
            return;
        }
        self.model.set_weights(w);
    }

    /// Run one frame through the cascade.
    ///
    /// The first accepted frame latches the channel count; later frames of
    /// a different length are rejected with every stage untouched.
    pub fn process(&mut self, t_ns: u64, x: &[f32]) -> Result<PipelineOutput, PipelineError> {
        if self.n_ch == 0 {
            self.ensure_initialized(x.len());
        }
        if x.len() != self.n_ch {
            return Err(PipelineError::ChannelMismatch {
                expected: self.n_ch,
                actual: x.len(),
            });
        }

        let mut out = PipelineOutput {
            frame: Frame {
                t_ns,
                x: x.to_vec(),
            },
            ..PipelineOutput::default()
        };

        if self.cfg.notch_enabled {
            self.notch.process_inplace(&mut out.frame.x);
        }
        if self.cfg.ma_enabled {
            self.ma.process_inplace(&mut out.frame.x);
        }
        if self.cfg.ema_enabled {
            self.ema.process_inplace(&mut out.frame.x);
        }

        if self.bias.capturing() {
            self.bias.update_capture(&out.frame.x);
        }
        if self.cfg.bias_enabled {
            self.bias.apply_inplace(&mut out.frame.x);
        }

        if self.cfg.model_enabled && self.model.ready() {
            out.model_out = self.model.eval(&out.frame.x);
            out.model_valid = true;
        }

        Ok(out)
    }
}
