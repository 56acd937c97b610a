use crate::outcome::{Estimate, FallbackReason};
use crate::signal::RRSeries;
use serde::{Deserialize, Serialize};

/// RMSSD reported when the interval series cannot support a real estimate.
pub const RMSSD_FALLBACK_MS: u32 = 30;
/// Heart rate reported when no plausible beat survived.
pub const HEART_RATE_FALLBACK_BPM: u32 = 70;
/// LF/HF ratio reported when HF amplitude is unusable.
pub const LF_HF_RATIO_FALLBACK: f64 = 1.5;

/// Relative change between neighbours above which a difference is treated as an artefact.
const MAX_RELATIVE_CHANGE: f64 = 0.8;
const RMSSD_VALID_MS: (u32, u32) = (1, 200);
const SESSION_HR_RANGE: (u32, u32) = (40, 240);

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HRVTime {
    pub n: usize,
    /// Mean RR interval (ms)
    pub avnn: f64,
    /// Population standard deviation of RR intervals (ms)
    pub sdnn: f64,
    /// Artefact-tolerant RMSSD (ms), see [`rmssd`]
    pub rmssd: f64,
    /// Fraction of successive differences above 50 ms
    pub pnn50: f64,
    pub rmssd_fallback: bool,
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Population variance.
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / values.len() as f64
}

pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Root mean square of successive RR differences, rounded to whole ms.
///
/// Differences larger than 80 % of the preceding interval are dropped as
/// artefacts, and when more than three remain the largest 10 % are trimmed.
/// Fewer than two intervals, nothing left after filtering, or a result outside
/// 1–200 ms all yield [`RMSSD_FALLBACK_MS`].
pub fn rmssd(rr: &[f64]) -> Estimate<u32> {
    if rr.len() < 2 {
        return Estimate::fallback(
            RMSSD_FALLBACK_MS,
            FallbackReason::InsufficientData {
                needed: 2,
                got: rr.len(),
            },
        );
    }

    let mut diffs: Vec<f64> = rr
        .windows(2)
        .filter(|w| w[0] != 0.0 && ((w[1] - w[0]) / w[0]).abs() <= MAX_RELATIVE_CHANGE)
        .map(|w| (w[1] - w[0]).abs())
        .collect();
    if diffs.len() > 3 {
        diffs.sort_by(|a, b| a.total_cmp(b));
        let keep = (diffs.len() as f64 * 0.9).floor() as usize;
        diffs.truncate(keep);
    }
    if diffs.is_empty() {
        return Estimate::fallback(RMSSD_FALLBACK_MS, FallbackReason::DegenerateSignal);
    }

    let msd = diffs.iter().map(|d| d * d).sum::<f64>() / diffs.len() as f64;
    let value = msd.sqrt().round();
    if !value.is_finite() || value < RMSSD_VALID_MS.0 as f64 || value > RMSSD_VALID_MS.1 as f64 {
        log::debug!("rmssd {value} outside valid range; using default");
        return Estimate::fallback(RMSSD_FALLBACK_MS, FallbackReason::InvalidNumeric);
    }
    Estimate::Computed(value as u32)
}

pub fn hrv_time(rr: &RRSeries) -> HRVTime {
    let n = rr.rr.len();
    let avnn = mean(&rr.rr);
    let sdnn = std_dev(&rr.rr);
    let rmssd = rmssd(&rr.rr);
    let pnn50 = if n > 1 {
        let count = rr
            .rr
            .windows(2)
            .filter(|w| (w[1] - w[0]).abs() > 50.0)
            .count();
        (count as f64) / (n as f64 - 1.0)
    } else {
        0.0
    };

    HRVTime {
        n,
        avnn,
        sdnn,
        rmssd: f64::from(rmssd.value()),
        pnn50,
        rmssd_fallback: rmssd.is_fallback(),
    }
}

/// Running heart rate: median of the latest five readings, once three exist.
pub fn recent_heart_rate(bpm: &[u32]) -> Option<u32> {
    if bpm.len() < 3 {
        return None;
    }
    let tail: Vec<f64> = bpm[bpm.len().saturating_sub(5)..]
        .iter()
        .map(|&b| f64::from(b))
        .collect();
    Some(median(&tail).round() as u32)
}

/// Heart rate for a finished session: median of every plausible reading.
pub fn session_heart_rate(bpm: &[u32]) -> Estimate<u32> {
    let valid: Vec<f64> = bpm
        .iter()
        .filter(|&&b| (SESSION_HR_RANGE.0..=SESSION_HR_RANGE.1).contains(&b))
        .map(|&b| f64::from(b))
        .collect();
    if valid.is_empty() {
        return Estimate::fallback(
            HEART_RATE_FALLBACK_BPM,
            FallbackReason::InsufficientData {
                needed: 1,
                got: 0,
            },
        );
    }
    Estimate::Computed(median(&valid).round() as u32)
}

/// Heart rate implied by one RR interval, rounded to whole beats per minute.
pub fn bpm_from_rr(rr_ms: f64) -> Option<u32> {
    if rr_ms <= 0.0 || !rr_ms.is_finite() {
        return None;
    }
    Some((60_000.0 / rr_ms).round() as u32)
}

pub fn lf_hf_ratio(lf: f64, hf: f64) -> Estimate<f64> {
    let ratio = lf / hf;
    if hf > 0.0 && ratio.is_finite() {
        Estimate::Computed(ratio)
    } else {
        Estimate::fallback(LF_HF_RATIO_FALLBACK, FallbackReason::InvalidNumeric)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64, rel_tol: f64) {
        let tol = expected.abs().max(1.0) * rel_tol;
        let diff = (actual - expected).abs();
        assert!(
            diff <= tol,
            "expected {expected}, got {actual} (diff {diff} > tol {tol})"
        );
    }

    #[test]
    fn rmssd_of_short_series() {
        assert_eq!(rmssd(&[800.0, 810.0, 790.0, 805.0]), Estimate::Computed(16));
    }

    #[test]
    fn rmssd_falls_back_below_two_intervals() {
        let est = rmssd(&[800.0]);
        assert_eq!(est.value(), RMSSD_FALLBACK_MS);
        assert_eq!(
            est.reason(),
            Some(FallbackReason::InsufficientData { needed: 2, got: 1 })
        );
    }

    #[test]
    fn rmssd_ignores_artefact_jumps() {
        // the dropout to 100 ms and the recovery after it are both discarded
        let est = rmssd(&[800.0, 810.0, 100.0, 820.0, 830.0]);
        assert_eq!(est, Estimate::Computed(10));
    }

    #[test]
    fn rmssd_of_perfectly_regular_rhythm_is_defaulted() {
        let est = rmssd(&[800.0; 10]);
        assert_eq!(est.value(), RMSSD_FALLBACK_MS);
        assert_eq!(est.reason(), Some(FallbackReason::InvalidNumeric));
    }

    #[test]
    fn time_domain_summary() {
        let rr = RRSeries::new(vec![800.0, 900.0, 800.0, 900.0]);
        let m = hrv_time(&rr);
        assert_eq!(m.n, 4);
        assert_close(m.avnn, 850.0, 1e-12);
        assert_close(m.sdnn, 50.0, 1e-12);
        assert_close(m.rmssd, 100.0, 1e-12);
        assert_close(m.pnn50, 1.0, 1e-12);
        assert!(!m.rmssd_fallback);
    }

    #[test]
    fn stats_on_empty_input_are_zero() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(median(&[]), 0.0);
        assert_eq!(std_dev(&[]), 0.0);
    }

    #[test]
    fn median_averages_even_middle() {
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median(&[5.0, 1.0, 3.0]), 3.0);
    }

    #[test]
    fn running_heart_rate_uses_last_five() {
        assert_eq!(recent_heart_rate(&[70, 72]), None);
        assert_eq!(recent_heart_rate(&[120, 120, 70, 71, 72, 73, 74]), Some(72));
    }

    #[test]
    fn session_heart_rate_filters_implausible_values() {
        assert_eq!(session_heart_rate(&[20, 72, 74, 250]), Estimate::Computed(73));
        assert_eq!(session_heart_rate(&[300]).value(), HEART_RATE_FALLBACK_BPM);
    }

    #[test]
    fn ratio_falls_back_on_zero_hf() {
        assert_eq!(lf_hf_ratio(30.0, 15.0), Estimate::Computed(2.0));
        assert_eq!(lf_hf_ratio(30.0, 0.0).value(), LF_HF_RATIO_FALLBACK);
    }
}
