use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RespirationConfig {
    /// Audio amplitude sampling cadence (ms).
    pub interval_ms: f64,
    pub min_samples: usize,
    /// Peaks must exceed this amplitude.
    pub peak_threshold: f64,
    /// Minimum samples between peaks.
    pub min_peak_distance: usize,
    /// Peak gaps outside these percentiles of the sorted gaps are ignored.
    pub gap_percentiles: (f64, f64),
    /// Reported rates are clamped into this range (breaths per minute).
    pub rate_range: (u32, u32),
}

impl Default for RespirationConfig {
    fn default() -> Self {
        Self {
            interval_ms: 25.0,
            min_samples: 100,
            peak_threshold: 10.0,
            min_peak_distance: 20,
            gap_percentiles: (0.1, 0.9),
            rate_range: (8, 25),
        }
    }
}

/// Respiration estimate. Serialises as a number, or as `"--"` / `"12-16"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespirationRate {
    /// Breaths per minute.
    Rate(u32),
    /// Too little audio to say anything.
    Unavailable,
    /// Audio present but no usable breathing rhythm; the typical adult range is reported.
    TypicalRange,
}

impl RespirationRate {
    pub fn rate(self) -> Option<u32> {
        match self {
            RespirationRate::Rate(r) => Some(r),
            _ => None,
        }
    }
}

impl fmt::Display for RespirationRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespirationRate::Rate(r) => write!(f, "{r}"),
            RespirationRate::Unavailable => f.write_str("--"),
            RespirationRate::TypicalRange => f.write_str("12-16"),
        }
    }
}

impl Serialize for RespirationRate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RespirationRate::Rate(r) => serializer.serialize_u32(*r),
            other => serializer.serialize_str(&other.to_string()),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRate {
    Number(u32),
    Text(String),
}

impl<'de> Deserialize<'de> for RespirationRate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawRate::deserialize(deserializer)? {
            RawRate::Number(r) => Ok(RespirationRate::Rate(r)),
            RawRate::Text(s) if s == "--" => Ok(RespirationRate::Unavailable),
            RawRate::Text(s) if s == "12-16" => Ok(RespirationRate::TypicalRange),
            RawRate::Text(s) => Err(serde::de::Error::custom(format!(
                "unknown respiration value {s:?}"
            ))),
        }
    }
}

/// Strict five-point local maxima above the threshold, at least `min_peak_distance` apart.
pub fn detect_respiration_peaks(audio: &[f64], cfg: &RespirationConfig) -> Vec<usize> {
    let n = audio.len();
    if n < 5 {
        return Vec::new();
    }
    let mut peaks: Vec<usize> = Vec::new();
    for i in 2..n - 2 {
        let v = audio[i];
        let is_peak = v > cfg.peak_threshold
            && v > audio[i - 1]
            && v > audio[i - 2]
            && v > audio[i + 1]
            && v > audio[i + 2];
        if is_peak && peaks.last().map_or(true, |&p| i - p >= cfg.min_peak_distance) {
            peaks.push(i);
        }
    }
    peaks
}

/// Breathing rate from the ambient audio amplitude envelope.
pub fn estimate_respiration_rate(audio: &[f64], cfg: &RespirationConfig) -> RespirationRate {
    if audio.len() < cfg.min_samples {
        return RespirationRate::Unavailable;
    }
    let peaks = detect_respiration_peaks(audio, cfg);
    if peaks.len() < 2 {
        log::debug!("{} respiration peaks; reporting typical range", peaks.len());
        return RespirationRate::TypicalRange;
    }

    let mut gaps: Vec<f64> = peaks.windows(2).map(|w| (w[1] - w[0]) as f64).collect();
    gaps.sort_by(|a, b| a.total_cmp(b));
    let pick = |q: f64| gaps[((gaps.len() as f64 * q).floor() as usize).min(gaps.len() - 1)];
    let (lo, hi) = (pick(cfg.gap_percentiles.0), pick(cfg.gap_percentiles.1));
    let kept: Vec<f64> = gaps.iter().copied().filter(|g| *g >= lo && *g <= hi).collect();
    if kept.is_empty() || cfg.interval_ms <= 0.0 {
        return RespirationRate::TypicalRange;
    }

    let avg = kept.iter().sum::<f64>() / kept.len() as f64;
    let samples_per_minute = 60_000.0 / cfg.interval_ms;
    let rate = (samples_per_minute / avg).round();
    let (min, max) = cfg.rate_range;
    RespirationRate::Rate((rate as u32).max(min).min(max))
}
