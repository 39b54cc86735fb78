//! Linear scoring head and the one-line weights file it loads from.
//!
//! Not a tracker: a leaf scalar carried alongside frames for operators
//! that want a quick weighted readout of the conditioned stream.

use std::fs;
use std::path::Path;

use thiserror::Error;

/// Why a weights file failed to load.
#[derive(Debug, Error)]
pub enum WeightsError {
    /// The file could not be read.
    #[error("failed to read weights file: {0}")]
    Io(#[from] std::io::Error),

    /// The file had no numeric content.
    #[error("weights file is empty")]
    Empty,

    /// A field could not be read as a finite float.
    #[error("weights file is malformed")]
    Malformed,
}

/// `y = bias + Σ wᵢ·xᵢ` over one frame, accumulated in `f64`.
#[derive(Debug, Default, Clone)]
pub struct LinearHead {
    ready: bool,
    n_ch: usize,
    weights: Vec<f32>,
    bias: f32,
}

impl LinearHead {
    /// Drop weights, bias, and the configured channel count.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Size the head for `n_ch` channels. Re-configuring with the same
    /// count keeps the installed weights.
    pub fn configure(&mut self, n_ch: usize) {
        if n_ch == 0 {
            self.reset();
            return;
        }
        if self.ready && self.n_ch == n_ch {
            return;
        }
        self.n_ch = n_ch;
        self.weights = vec![0.0; n_ch];
        self.bias = 0.0;
        self.ready = true;
    }

    pub fn set_bias(&mut self, bias: f32) {
        self.bias = bias;
    }

    /// Install weights. Vectors of the wrong length are ignored; the
    /// caller retries once the channel count is known.
    pub fn set_weights(&mut self, w: &[f32]) {
        if !self.ready || w.len() != self.n_ch {
            return;
        }
        self.weights.copy_from_slice(w);
    }

    /// Evaluate the head over one frame; 0.0 when unconfigured or the
    /// frame length disagrees.
    pub fn eval(&self, x: &[f32]) -> f32 {
        if !self.ready || x.len() != self.n_ch {
            return 0.0;
        }
        let mut acc = f64::from(self.bias);
        for (&w, &v) in self.weights.iter().zip(x) {
            acc += f64::from(w) * f64::from(v);
        }
        acc as f32
    }

    pub fn ready(&self) -> bool {
        self.ready
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn bias(&self) -> f32 {
        self.bias
    }
}

/// Read a weights vector from the first line of a file.
///
/// Fields are separated by commas and/or whitespace; empty fields are
/// skipped. The vector applies only once its length matches the stream's
/// latched channel count; the caller holds it pending until then.
pub fn load_weights_line(path: impl AsRef<Path>) -> Result<Vec<f32>, WeightsError> {
    let text = fs::read_to_string(path)?;
    let line = text.lines().next().ok_or(WeightsError::Empty)?.trim();
    if line.is_empty() {
        return Err(WeightsError::Empty);
    }

    let mut weights = Vec::new();
    for tok in line.split(|c: char| c == ',' || c.is_ascii_whitespace()) {
        if tok.is_empty() {
            continue;
        }
        let v: f32 = tok.parse().map_err(|_| WeightsError::Malformed)?;
        if !v.is_finite() {
            return Err(WeightsError::Malformed);
        }
        weights.push(v);
    }
    if weights.is_empty() {
        return Err(WeightsError::Empty);
    }
    Ok(weights)
}
