//! Position tracking over the gridsense 16-pad capacitive array.
//!
//! Every tracker implements the same streaming contract ([`Tracker`]):
//! conditioned frames go in one at a time, a pose with confidence and
//! quiet/active state comes out once the tracker's window is full. The
//! process-wide [`registry`] unifies discovery, parameter schemas, and
//! instantiation so hosts can switch algorithms at runtime.
//!
//! Trackers:
//!
//! - [`BruteForceTracker`]: joint two-charge + position estimate by dense
//!   grid search over a coupled-RC dipole model (`BruteForce_16x2`).
//! - [`DerivativeTracker`]: temporal-delta weighted centroid over a
//!   five-frame window (`Derivative_16x5`).
//! - [`Derivative2Tracker`]: exponentially weighted slope centroid with
//!   prior blending and hold (`Derivative2_16x5`).
//! - [`QuadrantTracker`]: single-frame quadrant-difference baseline
//!   (`ExampleAlgo_16x1`).
//!
//! # Example
//!
//! ```rust
//! use gridsense_tracking::registry;
//!
//! let infos = registry::list();
//! assert!(infos.iter().any(|i| i.id == "BruteForce_16x2"));
//!
//! let mut tracker = registry::create("ExampleAlgo_16x1").unwrap();
//! let frame = [0.0_f32; 16];
//! let out = tracker.push_sample(0, &frame).unwrap();
//! assert!(out.is_some());
//! ```

pub mod brute_force;
pub mod derivative;
pub mod derivative2;
pub mod geometry;
pub mod quadrant;
pub mod registry;
pub mod tracker;
mod util;

pub use brute_force::{BruteForceSolver, BruteForceTracker, GridSpec, SolverParams};
pub use derivative::DerivativeTracker;
pub use derivative2::Derivative2Tracker;
pub use geometry::{Vec3, PAD_PITCH_M, SENSOR_COUNT, SENSOR_POSITIONS};
pub use quadrant::QuadrantTracker;
pub use tracker::{ParamSpec, SlidingWindow, Tracker, TrackerError, TrackerInfo, TrackerOutput};
