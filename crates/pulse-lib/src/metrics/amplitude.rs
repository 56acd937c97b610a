//! Instantaneous amplitude (iA) of the LF and HF heart-rate-variability bands.
//!
//! The RR series is resampled onto a uniform grid, split into the two bands
//! with the FFT band-pass, and each band's envelope is taken from its
//! analytic signal. A trimmed mean of the envelope is the band's iA, which is
//! then mapped into the range the stress quadrant plot uses.

use crate::filters::{bandpass_filter, interpolate_to_uniform};
use crate::metrics::hrv::mean;
use crate::outcome::{Estimate, FallbackReason};
use crate::signal::TimeSeries;
use crate::spectral::envelope;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    Lf,
    Hf,
}

/// Linear map from raw iA to display units, saturating at `typical_max`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DisplayScale {
    pub min: f64,
    pub max: f64,
    /// Raw amplitude mapped to `max`.
    pub typical_max: f64,
    /// Reported when the raw amplitude is unusable.
    pub default: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AmplitudeConfig {
    pub lf_band_hz: (f64, f64),
    pub hf_band_hz: (f64, f64),
    /// Percentage trimmed from the envelope before averaging (split over both tails).
    pub trim_percent: f64,
    /// Number of points the RR series is resampled onto.
    pub rr_grid_len: usize,
    /// Rate the resampled RR grid is filtered at (Hz).
    pub rr_grid_fs: f64,
    pub min_rr_intervals: usize,
    pub min_raw_samples: usize,
    pub lf_display: DisplayScale,
    pub hf_display: DisplayScale,
}

impl Default for AmplitudeConfig {
    fn default() -> Self {
        Self {
            lf_band_hz: (0.04, 0.15),
            hf_band_hz: (0.15, 0.4),
            trim_percent: 20.0,
            rr_grid_len: 128,
            rr_grid_fs: 4.0,
            min_rr_intervals: 10,
            min_raw_samples: 50,
            lf_display: DisplayScale {
                min: 5.0,
                max: 60.0,
                typical_max: 50.0,
                default: 20.0,
            },
            hf_display: DisplayScale {
                min: 5.0,
                max: 50.0,
                typical_max: 40.0,
                default: 15.0,
            },
        }
    }
}

impl AmplitudeConfig {
    pub fn band_hz(&self, band: Band) -> (f64, f64) {
        match band {
            Band::Lf => self.lf_band_hz,
            Band::Hf => self.hf_band_hz,
        }
    }

    pub fn display(&self, band: Band) -> &DisplayScale {
        match band {
            Band::Lf => &self.lf_display,
            Band::Hf => &self.hf_display,
        }
    }

    pub fn defaults(&self) -> BandAmplitudes {
        BandAmplitudes {
            lf: self.lf_display.default,
            hf: self.hf_display.default,
        }
    }
}

/// LF and HF amplitudes in display units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandAmplitudes {
    pub lf: f64,
    pub hf: f64,
}

/// What the amplitudes are estimated from.
#[derive(Debug, Clone, Copy)]
pub enum AmplitudeInput<'a> {
    /// RR intervals in milliseconds; resampled before filtering.
    RrIntervals(&'a [f64]),
    /// An already uniformly sampled signal.
    Raw(&'a TimeSeries),
}

/// Mean after dropping `percent / 2` percent of the sorted values from each end.
pub fn robust_mean(values: &[f64], percent: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let drop = (sorted.len() as f64 * percent.max(0.0) / 200.0).floor() as usize;
    if 2 * drop >= sorted.len() {
        return mean(&sorted);
    }
    mean(&sorted[drop..sorted.len() - drop])
}

/// Raw iA of one band: trimmed mean of the band signal's envelope.
pub fn band_amplitude(signal: &[f64], band_hz: (f64, f64), fs: f64, trim_percent: f64) -> f64 {
    let filtered = bandpass_filter(signal, band_hz.0, band_hz.1, fs);
    let centre = mean(&filtered);
    let centred: Vec<f64> = filtered.iter().map(|x| x - centre).collect();
    robust_mean(&envelope(&centred), trim_percent)
}

/// Map a raw iA onto the display range.
pub fn scale_to_display(raw: f64, scale: &DisplayScale) -> Estimate<f64> {
    if !raw.is_finite() || raw < 0.0 || scale.typical_max <= 0.0 {
        log::warn!("unusable amplitude {raw}; substituting {}", scale.default);
        return Estimate::fallback(scale.default, FallbackReason::InvalidNumeric);
    }
    let span = scale.max - scale.min;
    Estimate::Computed(scale.min + (raw / scale.typical_max).min(1.0) * span)
}

fn scaled_pair(signal: &[f64], fs: f64, cfg: &AmplitudeConfig) -> Estimate<BandAmplitudes> {
    let mut reason = None;
    let mut scaled = |band: Band| {
        let raw = band_amplitude(signal, cfg.band_hz(band), fs, cfg.trim_percent);
        log::debug!("{band:?} raw iA {raw:.3} at fs={fs:.3}");
        let est = scale_to_display(raw, cfg.display(band));
        if reason.is_none() {
            reason = est.reason();
        }
        est.value()
    };
    let amplitudes = BandAmplitudes {
        lf: scaled(Band::Lf),
        hf: scaled(Band::Hf),
    };
    match reason {
        None => Estimate::Computed(amplitudes),
        Some(reason) => Estimate::fallback(amplitudes, reason),
    }
}

/// LF/HF instantaneous amplitudes in display units.
///
/// Needs at least `min_rr_intervals` RR intervals or `min_raw_samples` raw
/// samples; otherwise the display defaults come back as a fallback.
pub fn estimate_ia(input: AmplitudeInput<'_>, cfg: &AmplitudeConfig) -> Estimate<BandAmplitudes> {
    match input {
        AmplitudeInput::RrIntervals(rr) => {
            if rr.len() < cfg.min_rr_intervals {
                return Estimate::fallback(
                    cfg.defaults(),
                    FallbackReason::InsufficientData {
                        needed: cfg.min_rr_intervals,
                        got: rr.len(),
                    },
                );
            }
            let grid = interpolate_to_uniform(rr, cfg.rr_grid_len, cfg.rr_grid_fs);
            scaled_pair(&grid.data, grid.fs, cfg)
        }
        AmplitudeInput::Raw(ts) => {
            if ts.len() < cfg.min_raw_samples {
                return Estimate::fallback(
                    cfg.defaults(),
                    FallbackReason::InsufficientData {
                        needed: cfg.min_raw_samples,
                        got: ts.len(),
                    },
                );
            }
            scaled_pair(&ts.data, ts.fs, cfg)
        }
    }
}
