//! # LED Pseudo-Monochromator Calibration Suite
//!
//! Tools for a bank of individually addressable LEDs of distinct
//! wavelengths, driven by a microcontroller behind a line-oriented serial
//! protocol, characterized against a spectroradiometer.
//!
//! ## Crate Structure
//!
//! - **`transport`**: blocking line-oriented serial I/O with per-line
//!   deadlines; the seam tests mock.
//! - **`protocol`**: the device command layer (`info`, `reset`,
//!   `pwm <pin>,<duty>`, `shoot`) with sentinel-terminated response
//!   draining.
//! - **`meter`**: the spectroradiometer collaborator trait, the
//!   [`meter::Spectrum`] sample type, and the PR-655 wrapper.
//! - **`equalize`**: the per-LED PWM feedback loop.
//! - **`calibrate`**: the orchestrator running the loop (or a photo/spectrum
//!   sweep) over the configured bank.
//! - **`config`**: YAML LED/PWM maps and calibration settings.
//! - **`report`**: PWM table, spectral CSV, and error log writers.
//! - **`error`**: the [`error::LpmError`] taxonomy.
//! - **`mock`**: deterministic doubles for transport and meter.

pub mod calibrate;
pub mod config;
pub mod equalize;
pub mod error;
pub mod meter;
pub mod mock;
pub mod protocol;
pub mod report;
pub mod transport;

pub use calibrate::{run_calibration, run_sweep, CalibrationOutcome, SweepOutcome, SweepStages};
pub use config::CalibrationSettings;
pub use equalize::{equalize, Led};
pub use error::{LpmError, LpmResult};
pub use meter::{SpectralMeter, Spectrum};
pub use protocol::{DeviceCommand, LedDriver, ProtocolOptions, Sentinel};
pub use transport::LineTransport;
