use crate::{
    filters::{preprocess_ppg, remove_trend, smooth_signal},
    metrics::hrv::{bpm_from_rr, hrv_time, mean, median, recent_heart_rate, std_dev, HRVTime},
    outcome::{Estimate, FallbackReason},
    signal::{Events, RRSeries, TimeSeries},
    spectral::dominant_frequency,
};
use serde::{Deserialize, Serialize};

/// Parameters of the sample-by-sample heartbeat detector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Samples buffered before detection starts.
    pub min_samples: usize,
    /// Bounds of the adaptive detrending window (samples).
    pub min_window: usize,
    pub max_window: usize,
    /// Lower bound on the detection threshold (brightness units).
    pub threshold_floor: f64,
    /// Below this mean/σ ratio the threshold uses `low_snr_factor`.
    pub low_snr: f64,
    pub low_snr_factor: f64,
    pub high_snr_factor: f64,
    /// Minimum time between accepted peaks (ms).
    pub refractory_ms: u64,
    /// Physiological RR bounds used until the median gate engages (ms).
    pub min_rr_ms: f64,
    pub max_rr_ms: f64,
    /// Intervals needed before the median gate replaces the fixed bounds.
    pub median_gate_after: usize,
    pub median_gate: (f64, f64),
    /// Heart rates outside this range are not recorded (BPM).
    pub bpm_range: (u32, u32),
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            min_samples: 15,
            min_window: 5,
            max_window: 30,
            threshold_floor: 2.0,
            low_snr: 5.0,
            low_snr_factor: 2.0,
            high_snr_factor: 1.5,
            refractory_ms: 250,
            min_rr_ms: 300.0,
            max_rr_ms: 2000.0,
            median_gate_after: 5,
            median_gate: (0.3, 1.7),
            bpm_range: (40, 180),
        }
    }
}

/// Outcome of feeding one sample to [`HeartbeatDetector::process`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BeatDecision {
    NoBeat,
    /// First accepted peak; there is no interval yet.
    FirstBeat,
    /// Peak and interval accepted. `bpm` is `None` when it fell outside the recorded range.
    Accepted { rr_ms: f64, bpm: Option<u32> },
    /// Peak accepted but the interval to the previous one was implausible.
    Rejected { rr_ms: f64 },
}

/// Live peak detector over a growing PPG buffer.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatDetector {
    cfg: HeartbeatConfig,
    last_beat_ms: Option<u64>,
    rr_intervals: Vec<f64>,
    heart_rates: Vec<u32>,
    beat_times: Vec<u64>,
}

impl HeartbeatDetector {
    pub fn new(cfg: HeartbeatConfig) -> Self {
        Self {
            cfg,
            ..Self::default()
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.cfg);
    }

    pub fn rr_intervals(&self) -> &[f64] {
        &self.rr_intervals
    }

    pub fn heart_rates(&self) -> &[u32] {
        &self.heart_rates
    }

    pub fn beat_times(&self) -> &[u64] {
        &self.beat_times
    }

    pub fn last_beat_ms(&self) -> Option<u64> {
        self.last_beat_ms
    }

    /// Displayed heart rate: median of the latest readings once three exist.
    pub fn heart_rate(&self) -> Option<u32> {
        recent_heart_rate(&self.heart_rates)
    }

    /// Evaluate the newest sample of `buffer` (its last element), taken at `timestamp_ms`.
    pub fn process(&mut self, buffer: &[f64], timestamp_ms: u64) -> BeatDecision {
        if !self.is_peak(buffer, timestamp_ms) {
            return BeatDecision::NoBeat;
        }

        let decision = match self.last_beat_ms {
            None => BeatDecision::FirstBeat,
            Some(last) => {
                let rr_ms = timestamp_ms.saturating_sub(last) as f64;
                if self.accepts_interval(rr_ms) {
                    self.rr_intervals.push(rr_ms);
                    let bpm = bpm_from_rr(rr_ms)
                        .filter(|b| (self.cfg.bpm_range.0..=self.cfg.bpm_range.1).contains(b));
                    if let Some(b) = bpm {
                        self.heart_rates.push(b);
                    }
                    BeatDecision::Accepted { rr_ms, bpm }
                } else {
                    log::debug!("rejected rr interval {rr_ms} ms");
                    BeatDecision::Rejected { rr_ms }
                }
            }
        };
        self.last_beat_ms = Some(timestamp_ms);
        self.beat_times.push(timestamp_ms);
        decision
    }

    fn is_peak(&self, buffer: &[f64], timestamp_ms: u64) -> bool {
        let cfg = &self.cfg;
        let n = buffer.len();
        if n < cfg.min_samples.max(3) {
            return false;
        }

        let window = (n / 8).max(cfg.min_window).min(cfg.max_window);
        let recent = &buffer[n - (2 * window).min(n)..];
        let sd = std_dev(recent);
        let snr = mean(recent).abs() / if sd > 0.0 { sd } else { 1.0 };
        let factor = if snr < cfg.low_snr {
            cfg.low_snr_factor
        } else {
            cfg.high_snr_factor
        };
        let threshold = (sd * factor).max(cfg.threshold_floor);

        let trend = smooth_signal(recent, window / 2);
        let last = trend.len() - 1;
        let value = buffer[n - 1];
        let prev = buffer[n - 2];
        let detrended = value - trend[last];
        let prev_detrended = prev - trend[last - 1];
        let gradient = value - prev;
        // the current step counts towards the rising trend
        let rising = (0..3)
            .filter(|&j| n >= j + 2 && buffer[n - 1 - j] - buffer[n - 2 - j] > 0.0)
            .count();
        let refractory_ok = self
            .last_beat_ms
            .map_or(true, |t| timestamp_ms.saturating_sub(t) >= cfg.refractory_ms);

        detrended > threshold
            && detrended > prev_detrended
            && gradient > 0.0
            && rising >= 1
            && refractory_ok
    }

    fn accepts_interval(&self, rr_ms: f64) -> bool {
        let cfg = &self.cfg;
        if rr_ms > cfg.max_rr_ms {
            return false;
        }
        if self.rr_intervals.len() >= cfg.median_gate_after {
            let m = median(&self.rr_intervals);
            rr_ms >= m * cfg.median_gate.0 && rr_ms <= m * cfg.median_gate.1
        } else {
            rr_ms >= cfg.min_rr_ms
        }
    }
}

/// Parameters of the offline template-matching extractor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineExtractionConfig {
    pub low_pass_hz: f64,
    /// Search band for the dominant pulse frequency (Hz).
    pub heart_band_hz: (f64, f64),
    pub default_heart_hz: f64,
    /// Shorter signals skip the spectral estimate and use `default_heart_hz`.
    pub min_spectrum_samples: usize,
    pub min_peak_search_samples: usize,
    /// Coarse peaks must exceed the normalised median by this much.
    pub coarse_threshold_offset: f64,
    pub coarse_min_gap: usize,
    pub template_fraction: f64,
    pub max_template_half_width: usize,
    pub correlation_threshold: f64,
    /// Minimum peak distance as a fraction of the expected period.
    pub min_distance_fraction: f64,
    pub rr_range_ms: (f64, f64),
    pub validation_median_fraction: f64,
    pub validation_sd_multiple: f64,
}

impl Default for OfflineExtractionConfig {
    fn default() -> Self {
        Self {
            low_pass_hz: 5.0,
            heart_band_hz: (0.5, 3.0),
            default_heart_hz: 1.2,
            min_spectrum_samples: 100,
            min_peak_search_samples: 30,
            coarse_threshold_offset: 0.2,
            coarse_min_gap: 10,
            template_fraction: 0.3,
            max_template_half_width: 15,
            correlation_threshold: 0.7,
            min_distance_fraction: 0.7,
            rr_range_ms: (300.0, 1300.0),
            validation_median_fraction: 0.3,
            validation_sd_multiple: 2.0,
        }
    }
}

/// Result of the offline PPG pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PpgHrvResult {
    pub fs: f64,
    pub sample_count: usize,
    pub heart_hz: Estimate<f64>,
    pub events: Events,
    pub rr: RRSeries,
    pub hrv: HRVTime,
}

/// Dominant pulse frequency of a (preprocessed) PPG signal.
pub fn estimate_heart_rate_frequency(
    signal: &[f64],
    fs: f64,
    cfg: &OfflineExtractionConfig,
) -> Estimate<f64> {
    if signal.len() < cfg.min_spectrum_samples {
        return Estimate::fallback(
            cfg.default_heart_hz,
            FallbackReason::InsufficientData {
                needed: cfg.min_spectrum_samples,
                got: signal.len(),
            },
        );
    }
    match dominant_frequency(&remove_trend(signal), fs, cfg.heart_band_hz) {
        Some(hz) => Estimate::Computed(hz),
        None => Estimate::fallback(cfg.default_heart_hz, FallbackReason::DegenerateSignal),
    }
}

/// Threshold scan on the min–max normalised signal.
pub fn detect_coarse_peaks(signal: &[f64], cfg: &OfflineExtractionConfig) -> Vec<usize> {
    let n = signal.len();
    if n < 11 {
        return Vec::new();
    }
    let lo = signal.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = signal.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = hi - lo;
    if range <= 0.0 || !range.is_finite() {
        log::debug!("flat signal, no coarse peaks");
        return Vec::new();
    }
    let norm: Vec<f64> = signal.iter().map(|v| (v - lo) / range).collect();
    let mut sorted = norm.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let threshold = sorted[n / 2] + cfg.coarse_threshold_offset;

    let mut peaks: Vec<usize> = Vec::new();
    for i in 5..n - 5 {
        let v = norm[i];
        let is_max = v > threshold
            && v > norm[i - 1]
            && v > norm[i + 1]
            && v > norm[i - 2]
            && v > norm[i + 2];
        if is_max && peaks.last().map_or(true, |&p| i - p >= cfg.coarse_min_gap) {
            peaks.push(i);
        }
    }
    peaks
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (ma, mb) = (mean(a), mean(b));
    let mut num = 0.0;
    let mut da = 0.0;
    let mut db = 0.0;
    for (x, y) in a.iter().zip(b) {
        num += (x - ma) * (y - mb);
        da += (x - ma).powi(2);
        db += (y - mb).powi(2);
    }
    let denom = (da * db).sqrt();
    if denom > 0.0 {
        num / denom
    } else {
        0.0
    }
}

fn is_local_max(values: &[f64], idx: usize, radius: usize) -> bool {
    let lo = idx.saturating_sub(radius);
    let hi = (idx + radius).min(values.len() - 1);
    (lo..=hi).all(|i| i == idx || values[i] <= values[idx])
}

/// Peak positions found by correlating a one-beat template against the signal.
///
/// `expected_period` is the beat length in samples. When fewer than three
/// coarse peaks exist the coarse set is returned unchanged.
pub fn detect_peaks_template(
    signal: &[f64],
    expected_period: usize,
    cfg: &OfflineExtractionConfig,
) -> Events {
    let n = signal.len();
    if n < cfg.min_peak_search_samples {
        return Events::default();
    }
    let coarse = detect_coarse_peaks(signal, cfg);
    if coarse.len() < 3 {
        return Events::from_indices(coarse);
    }

    let half = ((expected_period as f64 * cfg.template_fraction).floor() as usize)
        .min(cfg.max_template_half_width)
        .max(1);
    let Some(&centre) = coarse.iter().find(|&&p| p >= half && p + half < n) else {
        return Events::from_indices(coarse);
    };
    let template = &signal[centre - half..=centre + half];

    // correlation[k] belongs to the window centred on sample k + half
    let correlation: Vec<f64> = (half..n - half)
        .map(|i| pearson(template, &signal[i - half..=i + half]))
        .collect();

    let min_distance = (expected_period as f64 * cfg.min_distance_fraction).floor() as usize;
    let mut peaks: Vec<usize> = Vec::new();
    for k in half..correlation.len().saturating_sub(half) {
        if correlation[k] <= cfg.correlation_threshold || !is_local_max(&correlation, k, half) {
            continue;
        }
        let idx = k + half;
        if peaks.last().map_or(true, |&p| idx - p >= min_distance) {
            peaks.push(idx);
        }
    }
    Events::from_indices(peaks)
}

/// Keep physiological intervals close to the series median.
pub fn validate_rr_series(rr: &[f64], cfg: &OfflineExtractionConfig) -> Vec<f64> {
    if rr.len() < 3 {
        return rr.to_vec();
    }
    let (lo, hi) = cfg.rr_range_ms;
    let physiological: Vec<f64> = rr.iter().copied().filter(|r| (lo..=hi).contains(r)).collect();
    if physiological.len() < 3 {
        return physiological;
    }
    let m = median(&physiological);
    let sd = std_dev(&physiological);
    let max_dev = (m * cfg.validation_median_fraction).min(cfg.validation_sd_multiple * sd);
    physiological
        .into_iter()
        .filter(|r| (r - m).abs() <= max_dev)
        .collect()
}

/// Offline PPG → RR pipeline: preprocess, template-match peaks, convert and validate intervals.
pub fn extract_hrv_from_ppg(ts: &TimeSeries, cfg: &OfflineExtractionConfig) -> PpgHrvResult {
    let preprocessed = preprocess_ppg(&ts.data, cfg.low_pass_hz, ts.fs);
    let heart_hz = estimate_heart_rate_frequency(&preprocessed, ts.fs, cfg);
    let expected_period = (ts.fs / heart_hz.value()).round().max(1.0) as usize;
    let events = detect_peaks_template(&preprocessed, expected_period, cfg);

    let rr = if events.len() < 3 {
        log::debug!("only {} ppg peaks found; no intervals", events.len());
        RRSeries::default()
    } else {
        let (lo, hi) = cfg.rr_range_ms;
        let raw: Vec<f64> = RRSeries::from_events(&events, ts.fs)
            .rr
            .into_iter()
            .filter(|r| (lo..=hi).contains(r))
            .collect();
        RRSeries::new(validate_rr_series(&raw, cfg))
    };
    let hrv = hrv_time(&rr);
    PpgHrvResult {
        fs: ts.fs,
        sample_count: ts.len(),
        heart_hz,
        events,
        rr,
        hrv,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::hrv::rmssd;
    use std::f64::consts::PI;

    const FS: f64 = 30.0;

    fn camera_pulse(amp: f64, seconds: f64) -> Vec<(f64, u64)> {
        let n = (seconds * FS) as usize;
        (0..n)
            .map(|i| {
                let v = 128.0 + amp * (2.0 * PI * 1.2 * i as f64 / FS).sin();
                let t = (i as f64 * 1000.0 / FS).round() as u64;
                (v, t)
            })
            .collect()
    }

    fn run_live(samples: &[(f64, u64)]) -> HeartbeatDetector {
        let mut det = HeartbeatDetector::new(HeartbeatConfig::default());
        let mut buffer = Vec::new();
        for &(v, t) in samples {
            buffer.push(v);
            det.process(&buffer, t);
        }
        det
    }

    #[test]
    fn live_detector_tracks_72_bpm() {
        let det = run_live(&camera_pulse(10.0, 35.0));
        let hr = det.heart_rate().expect("heart rate");
        assert!((67..=77).contains(&hr), "hr {hr}");
        assert!(det.rr_intervals().len() >= 30);
        assert!(det
            .rr_intervals()
            .iter()
            .all(|&rr| (800.0..=870.0).contains(&rr)));
        assert!(rmssd(det.rr_intervals()).value() <= 5);
    }

    #[test]
    fn refractory_period_holds_for_any_amplitude() {
        for amp in [1.0, 3.0, 5.0, 10.0, 20.0, 50.0, 200.0] {
            let det = run_live(&camera_pulse(amp, 20.0));
            for w in det.beat_times().windows(2) {
                assert!(w[1] - w[0] >= 250, "amp {amp}: beats {:?}", w);
            }
        }
    }

    #[test]
    fn waits_for_fifteen_samples() {
        let mut det = HeartbeatDetector::new(HeartbeatConfig::default());
        let buf: Vec<f64> = (0..14).map(|i| if i == 13 { 500.0 } else { 128.0 }).collect();
        assert_eq!(det.process(&buf, 1000), BeatDecision::NoBeat);
    }

    #[test]
    fn first_peak_has_no_interval() {
        let samples = camera_pulse(10.0, 10.0);
        let mut det = HeartbeatDetector::new(HeartbeatConfig::default());
        let mut buffer = Vec::new();
        let mut decisions = Vec::new();
        for &(v, t) in &samples {
            buffer.push(v);
            let d = det.process(&buffer, t);
            if d != BeatDecision::NoBeat {
                decisions.push(d);
            }
        }
        assert_eq!(decisions.first(), Some(&BeatDecision::FirstBeat));
        assert!(det.last_beat_ms().is_some());
    }

    #[test]
    fn interval_gate_switches_to_median() {
        let mut det = HeartbeatDetector::new(HeartbeatConfig::default());
        assert!(!det.accepts_interval(2500.0));
        assert!(!det.accepts_interval(280.0));
        assert!(det.accepts_interval(1900.0));

        det.rr_intervals = vec![800.0; 5];
        assert!(det.accepts_interval(300.0));
        assert!(!det.accepts_interval(230.0));
        assert!(!det.accepts_interval(1400.0));
        assert!(det.accepts_interval(1350.0));
    }

    #[test]
    fn offline_extraction_recovers_regular_rhythm() {
        let data: Vec<f64> = camera_pulse(10.0, 35.0).into_iter().map(|(v, _)| v).collect();
        let ts = TimeSeries::new(FS, data);
        let result = extract_hrv_from_ppg(&ts, &OfflineExtractionConfig::default());
        assert!((result.heart_hz.value() - 1.2).abs() < 0.05);
        assert!(result.rr.len() >= 30, "only {} intervals", result.rr.len());
        for &rr in &result.rr.rr {
            assert!((rr - 833.33).abs() < 40.0, "rr {rr}");
        }
    }

    #[test]
    fn offline_extraction_of_short_buffer_is_empty() {
        let ts = TimeSeries::new(FS, vec![128.0, 130.0, 127.0, 129.0]);
        let result = extract_hrv_from_ppg(&ts, &OfflineExtractionConfig::default());
        assert!(result.rr.is_empty());
        assert!(result.heart_hz.is_fallback());
    }

    #[test]
    fn rr_validation_drops_outliers() {
        let cfg = OfflineExtractionConfig::default();
        let rr = [800.0, 810.0, 790.0, 805.0, 1000.0, 795.0];
        assert_eq!(
            validate_rr_series(&rr, &cfg),
            vec![800.0, 810.0, 790.0, 805.0, 795.0]
        );
        assert_eq!(validate_rr_series(&[200.0, 900.0], &cfg), vec![200.0, 900.0]);
    }

    #[test]
    fn coarse_peaks_respect_gap() {
        let data: Vec<f64> = (0..120)
            .map(|i| (2.0 * PI * i as f64 / 25.0).sin())
            .collect();
        let peaks = detect_coarse_peaks(&data, &OfflineExtractionConfig::default());
        assert!(peaks.len() >= 4);
        assert!(peaks.windows(2).all(|w| w[1] - w[0] >= 10));
    }
}
