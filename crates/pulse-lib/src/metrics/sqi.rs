use crate::metrics::hrv::{mean, std_dev, variance};
use serde::{Deserialize, Serialize};

/// Tunables for the PPG quality heuristic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Number of most recent samples inspected.
    pub window: usize,
    /// Coefficient of variation (%) below which the signal is considered flat.
    pub min_cv_percent: f64,
    /// Coefficient of variation (%) above which the signal is considered noisy.
    pub max_cv_percent: f64,
    /// Direction changes per sample above which the signal is considered erratic.
    pub max_direction_change_ratio: f64,
    /// Minimum autocorrelation peak for a periodic pulse.
    pub min_autocorrelation: f64,
    /// Scores below this are treated as unreliable downstream.
    pub acceptable_score: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            window: 30,
            min_cv_percent: 0.5,
            max_cv_percent: 20.0,
            max_direction_change_ratio: 0.7,
            min_autocorrelation: 0.3,
            acceptable_score: 0.4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityReason {
    InsufficientData,
    Flat,
    Noisy,
    Erratic,
    WeakPeriodicity,
    Good,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalQuality {
    /// 0 (unusable) ..= 1 (clean periodic pulse)
    pub score: f64,
    pub reason: QualityReason,
}

impl SignalQuality {
    fn new(score: f64, reason: QualityReason) -> Self {
        Self { score, reason }
    }

    pub fn is_acceptable(&self, cfg: &QualityConfig) -> bool {
        self.score >= cfg.acceptable_score
    }
}

/// Normalised autocorrelation for every lag; all zeros for a (near) constant signal.
pub fn autocorrelation(signal: &[f64]) -> Vec<f64> {
    let n = signal.len();
    let var = variance(signal);
    if n == 0 || var < 1e-4 {
        return vec![0.0; n];
    }
    let m = mean(signal);
    (0..n)
        .map(|lag| {
            let sum: f64 = signal[..n - lag]
                .iter()
                .zip(&signal[lag..])
                .map(|(a, b)| (a - m) * (b - m))
                .sum();
            sum / ((n - lag) as f64 * var)
        })
        .collect()
}

fn direction_change_ratio(signal: &[f64]) -> f64 {
    let mut changes = 0usize;
    let mut last = 0i8;
    for w in signal.windows(2) {
        let dir = if w[1] > w[0] {
            1
        } else if w[1] < w[0] {
            -1
        } else {
            0
        };
        if last != 0 && dir != 0 && dir != last {
            changes += 1;
        }
        if dir != 0 {
            last = dir;
        }
    }
    changes as f64 / signal.len().max(1) as f64
}

/// Score the most recent PPG window.
///
/// Checks run in order and the first failing one decides the score:
/// coefficient of variation (flat / noisy), direction-change ratio, then
/// periodicity via the autocorrelation peak over lags `3..n/2`.
pub fn assess_ppg_quality(signal: &[f64], cfg: &QualityConfig) -> SignalQuality {
    let window = cfg.window.max(4);
    if signal.len() < window {
        return SignalQuality::new(0.0, QualityReason::InsufficientData);
    }
    let recent = &signal[signal.len() - window..];

    let sd = std_dev(recent);
    let m = mean(recent);
    if m.abs() < f64::EPSILON {
        let reason = if sd == 0.0 {
            QualityReason::Flat
        } else {
            QualityReason::Noisy
        };
        return SignalQuality::new(if sd == 0.0 { 0.1 } else { 0.3 }, reason);
    }
    let cv = sd / m.abs() * 100.0;
    if cv < cfg.min_cv_percent {
        return SignalQuality::new(0.1, QualityReason::Flat);
    }
    if cv > cfg.max_cv_percent {
        return SignalQuality::new(0.3, QualityReason::Noisy);
    }

    let ratio = direction_change_ratio(recent);
    if ratio > cfg.max_direction_change_ratio {
        return SignalQuality::new(0.4, QualityReason::Erratic);
    }

    let ac = autocorrelation(recent);
    let peak = ac
        .iter()
        .take(ac.len() / 2)
        .skip(3)
        .copied()
        .fold(0.0, f64::max);
    if peak < cfg.min_autocorrelation {
        return SignalQuality::new(0.5, QualityReason::WeakPeriodicity);
    }

    let score = 0.4 * (1.0 - (cv - 5.0).abs() / 15.0) + 0.3 * (1.0 - ratio) + 0.3 * peak;
    SignalQuality::new(score.clamp(0.0, 1.0), QualityReason::Good)
}
