//! Signal conditioning for multi-channel capacitive sensor streams.
//!
//! Sensor boards emit one frame per text line over a byte-oriented
//! transport (BLE notifications, serial reads). This crate turns those
//! bytes into conditioned frames:
//!
//! - **Framing**: [`LineFramer`] reassembles arbitrary byte chunks into
//!   complete lines, tolerating `\n`, `\r`, and `\r\n` terminators split
//!   across chunks.
//! - **Parsing**: [`CsvFloatParser`] reads one line into an ordered vector
//!   of finite floats, tolerating the separator quirks of real firmware.
//! - **Conditioning**: [`Pipeline`] applies a configurable cascade of
//!   stateful filters (notch, moving average, EMA), per-channel bias
//!   correction, and an optional linear scoring head.
//!
//! The channel count is latched from the first accepted frame of a
//! session; every stage keeps its state across configuration changes so
//! that live tuning never produces discontinuities.
//!
//! # Example
//!
//! ```rust
//! use gridsense_signal::{CsvFloatParser, LineFramer, Pipeline, PipelineConfig};
//!
//! let mut framer = LineFramer::new();
//! let parser = CsvFloatParser::new();
//! let mut pipeline = Pipeline::new();
//! pipeline.set_config(PipelineConfig {
//!     ema_enabled: true,
//!     ema_alpha: 0.2,
//!     ..PipelineConfig::default()
//! });
//!
//! for line in framer.push(b"0.5,1.0,-0.25\n") {
//!     let samples = parser.parse_line(&line).unwrap();
//!     let out = pipeline.process(0, &samples).unwrap();
//!     assert_eq!(out.frame.x.len(), 3);
//! }
//! ```

pub mod filters;
pub mod frame;
pub mod framer;
pub mod linear;
pub mod parser;
pub mod pipeline;

pub use filters::{BiasCorrector, EmaFilter, MovingAverage, NotchBiquad, NotchParams};
pub use frame::Frame;
pub use framer::LineFramer;
pub use linear::{load_weights_line, LinearHead, WeightsError};
pub use parser::{CsvFloatParser, ParseError};
pub use pipeline::{Pipeline, PipelineConfig, PipelineError, PipelineOutput};
