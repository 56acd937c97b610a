use crate::{
    detectors::{ppg::HeartbeatConfig, ppg::OfflineExtractionConfig, respiration::RespirationConfig},
    metrics::{amplitude::AmplitudeConfig, sqi::QualityConfig},
    session::SessionConfig,
    stress::StressThresholds,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

fn ordered<T: PartialOrd + std::fmt::Debug>(
    key: &'static str,
    lo: T,
    hi: T,
) -> Result<(), ConfigError> {
    if lo <= hi {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            key,
            reason: format!("lower bound {lo:?} exceeds upper bound {hi:?}"),
        })
    }
}

fn positive(key: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            key,
            reason: format!("expected a positive finite number, got {value}"),
        })
    }
}

/// Every tunable of the pipeline. Missing tables and keys keep their defaults.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub session: SessionConfig,
    pub heartbeat: HeartbeatConfig,
    pub offline: OfflineExtractionConfig,
    pub amplitude: AmplitudeConfig,
    pub respiration: RespirationConfig,
    pub quality: QualityConfig,
    pub stress: StressThresholds,
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject ranges whose bounds are swapped and rates that are not positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.session;
        positive("session.camera_fps", s.camera_fps)?;
        positive("session.synthetic_bpm", s.synthetic_bpm)?;
        if !s.synthetic_jitter_ms.is_finite() || s.synthetic_jitter_ms < 0.0 {
            return Err(ConfigError::Invalid {
                key: "session.synthetic_jitter_ms",
                reason: format!(
                    "expected a finite non-negative number, got {}",
                    s.synthetic_jitter_ms
                ),
            });
        }

        let h = &self.heartbeat;
        ordered("heartbeat.min_window/max_window", h.min_window, h.max_window)?;
        ordered("heartbeat.min_rr_ms/max_rr_ms", h.min_rr_ms, h.max_rr_ms)?;
        ordered("heartbeat.median_gate", h.median_gate.0, h.median_gate.1)?;
        ordered("heartbeat.bpm_range", h.bpm_range.0, h.bpm_range.1)?;

        let o = &self.offline;
        ordered("offline.heart_band_hz", o.heart_band_hz.0, o.heart_band_hz.1)?;
        ordered("offline.rr_range_ms", o.rr_range_ms.0, o.rr_range_ms.1)?;

        let a = &self.amplitude;
        ordered("amplitude.lf_band_hz", a.lf_band_hz.0, a.lf_band_hz.1)?;
        ordered("amplitude.hf_band_hz", a.hf_band_hz.0, a.hf_band_hz.1)?;
        positive("amplitude.rr_grid_fs", a.rr_grid_fs)?;

        let r = &self.respiration;
        positive("respiration.interval_ms", r.interval_ms)?;
        ordered("respiration.rate_range", r.rate_range.0, r.rate_range.1)?;
        ordered("respiration.gap_percentiles", r.gap_percentiles.0, r.gap_percentiles.1)?;
        ordered("respiration.gap_percentiles", 0.0, r.gap_percentiles.0)?;
        ordered("respiration.gap_percentiles", r.gap_percentiles.1, 1.0)?;

        let t = &self.stress;
        for (key, range) in [
            ("stress.lf", t.lf),
            ("stress.hf", t.hf),
            ("stress.heart_rate", t.heart_rate),
            ("stress.rmssd", t.rmssd),
            ("stress.lf_hf_ratio", t.lf_hf_ratio),
        ] {
            ordered(key, range.min, range.max)?;
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg = Self::from_toml_str(&text)?;
        log::info!("loaded pipeline config from {}", path.display());
        Ok(cfg)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(self)
    }
}
