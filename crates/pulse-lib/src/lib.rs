//! Heart rate, HRV, LF/HF instantaneous amplitude, respiration and stress
//! estimation from a fingertip PPG stream plus ambient audio amplitude.

pub mod config;
pub mod detectors;
pub mod driver;
pub mod filters;
pub mod io;
pub mod metrics;
pub mod outcome;
pub mod session;
pub mod signal;
pub mod spectral;
pub mod stress;

pub use config::{ConfigError, PipelineConfig};
pub use detectors::*;
pub use metrics::*;
pub use outcome::{Estimate, FallbackReason};
pub use session::{Session, SessionConfig, SessionError, StressAssessment};
pub use signal::*;
