//! Measurement session: owns the sample buffers, runs the live analysis
//! every few PPG samples and produces the final [`StressAssessment`].

use crate::{
    config::PipelineConfig,
    detectors::{
        ppg::{extract_hrv_from_ppg, BeatDecision, HeartbeatDetector},
        respiration::{estimate_respiration_rate, RespirationRate},
    },
    metrics::{
        amplitude::{estimate_ia, robust_mean, AmplitudeInput},
        hrv::{lf_hf_ratio, rmssd, session_heart_rate},
        sqi::{assess_ppg_quality, SignalQuality},
    },
    outcome::FallbackReason,
    signal::TimeSeries,
    stress::{
        determine_stress_state, estimate_stress_level, validate_value, Color, Quadrant,
        StressLevel, StressState,
    },
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// `stop()` is refused before this much time has passed (ms).
    pub min_duration_ms: u64,
    /// Replays stop on their own after this long (ms).
    pub auto_stop_ms: u64,
    /// PPG frame rate used for offline extraction (Hz).
    pub camera_fps: f64,
    /// Live analysis runs once per this many PPG samples.
    pub analysis_every: usize,
    pub quality_min_samples: usize,
    pub live_ia_min_samples: usize,
    /// RR intervals needed before a live iA point is computed.
    pub min_rr_for_ia: usize,
    /// Most recent live iA samples screened for quality at session end.
    pub final_ia_window: usize,
    /// Good-quality samples needed in that window; below this every live
    /// sample of the session is averaged instead.
    pub final_ia_min_good: usize,
    pub final_ia_trim_percent: f64,
    /// Below this many real RR intervals a synthetic series is used.
    pub min_real_rr: usize,
    pub synthetic_rr_count: usize,
    pub synthetic_bpm: f64,
    pub synthetic_jitter_ms: f64,
    pub seed: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_duration_ms: 30_000,
            auto_stop_ms: 35_000,
            camera_fps: 30.0,
            analysis_every: 10,
            quality_min_samples: 30,
            live_ia_min_samples: 100,
            min_rr_for_ia: 10,
            final_ia_window: 20,
            final_ia_min_good: 3,
            final_ia_trim_percent: 10.0,
            min_real_rr: 3,
            synthetic_rr_count: 5,
            synthetic_bpm: 70.0,
            synthetic_jitter_ms: 25.0,
            seed: 42,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session is not running")]
    NotRunning,

    #[error("session too short: {elapsed_ms} ms elapsed, {required_ms} ms required")]
    TooShort { elapsed_ms: u64, required_ms: u64 },
}

/// Point on the LF/HF amplitude plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScatterPoint {
    pub hf: f64,
    pub lf: f64,
    pub quality: Option<f64>,
    #[serde(rename = "final")]
    pub is_final: bool,
    pub color: Option<Color>,
}

impl ScatterPoint {
    /// Live point; `None` unless both amplitudes are finite and positive.
    pub fn live(hf: f64, lf: f64, quality: Option<f64>) -> Option<Self> {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        if !valid(hf) || !valid(lf) {
            log::warn!("dropping scatter point hf={hf} lf={lf}");
            return None;
        }
        Some(Self {
            hf,
            lf,
            quality,
            is_final: false,
            color: None,
        })
    }

    pub fn final_point(hf: f64, lf: f64, quadrant: Quadrant) -> Self {
        Self {
            hf,
            lf,
            quality: None,
            is_final: true,
            color: Some(quadrant.color()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    HeartRate,
    Rmssd,
    Amplitudes,
    LfHfRatio,
}

/// Record of a metric that was substituted rather than computed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricFallback {
    pub metric: Metric,
    pub reason: FallbackReason,
}

/// Final session result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressAssessment {
    pub heart_rate_bpm: u32,
    pub rmssd_ms: u32,
    pub lf_ia: f64,
    pub hf_ia: f64,
    pub lf_hf_ratio: f64,
    pub respiration_rate: RespirationRate,
    pub stress_level: StressLevel,
    pub stress_state: StressState,
    pub quadrant: Quadrant,
    pub duration_ms: u64,
    pub rr_count: usize,
    /// RR intervals were synthesised because too few real beats were found.
    pub synthetic_rr: bool,
    pub signal_quality: Option<f64>,
    pub fallbacks: Vec<MetricFallback>,
}

#[derive(Debug, Clone, Copy)]
struct IaSample {
    lf: f64,
    hf: f64,
    quality: f64,
}

#[derive(Debug, Clone)]
enum SessionState {
    Idle,
    Running { started_ms: u64 },
    Finished(Box<StressAssessment>),
}

pub struct Session {
    cfg: PipelineConfig,
    state: SessionState,
    ppg: Vec<f64>,
    audio: Vec<f64>,
    detector: HeartbeatDetector,
    quality: Option<SignalQuality>,
    ia_samples: Vec<IaSample>,
    scatter: Vec<ScatterPoint>,
    rng: StdRng,
}

impl Session {
    pub fn new(cfg: PipelineConfig) -> Self {
        Self {
            detector: HeartbeatDetector::new(cfg.heartbeat),
            rng: StdRng::seed_from_u64(cfg.session.seed),
            cfg,
            state: SessionState::Idle,
            ppg: Vec::new(),
            audio: Vec::new(),
            quality: None,
            ia_samples: Vec::new(),
            scatter: Vec::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    /// Clear every buffer and begin a new measurement at `now_ms`.
    pub fn start(&mut self, now_ms: u64) {
        self.ppg.clear();
        self.audio.clear();
        self.detector.reset();
        self.quality = None;
        self.ia_samples.clear();
        self.scatter.clear();
        self.rng = StdRng::seed_from_u64(self.cfg.session.seed);
        self.state = SessionState::Running { started_ms: now_ms };
        log::info!("session started at {now_ms} ms");
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, SessionState::Running { .. })
    }

    pub fn started_ms(&self) -> Option<u64> {
        match self.state {
            SessionState::Running { started_ms } => Some(started_ms),
            _ => None,
        }
    }

    pub fn assessment(&self) -> Option<&StressAssessment> {
        match &self.state {
            SessionState::Finished(a) => Some(a),
            _ => None,
        }
    }

    pub fn ppg_len(&self) -> usize {
        self.ppg.len()
    }

    pub fn audio_len(&self) -> usize {
        self.audio.len()
    }

    /// Live displayed heart rate.
    pub fn heart_rate(&self) -> Option<u32> {
        self.detector.heart_rate()
    }

    pub fn rr_intervals(&self) -> &[f64] {
        self.detector.rr_intervals()
    }

    pub fn signal_quality(&self) -> Option<SignalQuality> {
        self.quality
    }

    pub fn scatter_points(&self) -> &[ScatterPoint] {
        &self.scatter
    }

    /// Append one PPG brightness sample. Returns the scatter point emitted by
    /// this sample's live analysis, if any.
    pub fn push_ppg(
        &mut self,
        value: f64,
        timestamp_ms: u64,
    ) -> Result<Option<ScatterPoint>, SessionError> {
        if !self.is_running() {
            return Err(SessionError::NotRunning);
        }
        if !value.is_finite() {
            log::warn!("ignoring non-finite ppg sample at {timestamp_ms} ms");
            return Ok(None);
        }
        self.ppg.push(value);

        match self.detector.process(&self.ppg, timestamp_ms) {
            BeatDecision::NoBeat => {}
            decision => log::debug!("beat at {timestamp_ms} ms: {decision:?}"),
        }

        let n = self.ppg.len();
        let every = self.cfg.session.analysis_every.max(1);
        if n % every != 0 {
            return Ok(None);
        }
        if n >= self.cfg.session.quality_min_samples {
            self.quality = Some(assess_ppg_quality(&self.ppg, &self.cfg.quality));
        }
        if n >= self.cfg.session.live_ia_min_samples {
            return Ok(self.live_amplitudes());
        }
        Ok(None)
    }

    /// Append one ambient audio amplitude reading.
    pub fn push_audio(&mut self, amplitude: f64) -> Result<(), SessionError> {
        if !self.is_running() {
            return Err(SessionError::NotRunning);
        }
        if amplitude.is_finite() {
            self.audio.push(amplitude);
        }
        Ok(())
    }

    fn live_amplitudes(&mut self) -> Option<ScatterPoint> {
        let scfg = &self.cfg.session;
        let ts = TimeSeries::new(scfg.camera_fps, self.ppg.clone());
        let extracted = extract_hrv_from_ppg(&ts, &self.cfg.offline).rr.rr;
        let rr = if extracted.len() >= scfg.min_rr_for_ia {
            extracted
        } else if self.detector.rr_intervals().len() >= scfg.min_rr_for_ia {
            self.detector.rr_intervals().to_vec()
        } else {
            return None;
        };

        let est = estimate_ia(AmplitudeInput::RrIntervals(&rr), &self.cfg.amplitude);
        if let Some(reason) = est.reason() {
            log::debug!("live iA skipped: {reason}");
            return None;
        }
        let ia = est.value();
        let quality = self.quality.map(|q| q.score);
        let point = ScatterPoint::live(ia.hf, ia.lf, quality)?;
        self.ia_samples.push(IaSample {
            lf: ia.lf,
            hf: ia.hf,
            quality: quality.unwrap_or(0.0),
        });
        self.scatter.push(point);
        Some(point)
    }

    /// Finish the measurement at `now_ms`.
    ///
    /// Refused with [`SessionError::TooShort`] (the session keeps running)
    /// before the minimum duration. Once finished, further calls return the
    /// same assessment.
    pub fn stop(&mut self, now_ms: u64) -> Result<StressAssessment, SessionError> {
        let started_ms = match &self.state {
            SessionState::Idle => return Err(SessionError::NotRunning),
            SessionState::Finished(a) => return Ok(a.as_ref().clone()),
            SessionState::Running { started_ms } => *started_ms,
        };
        let elapsed_ms = now_ms.saturating_sub(started_ms);
        let required_ms = self.cfg.session.min_duration_ms;
        if elapsed_ms < required_ms {
            return Err(SessionError::TooShort {
                elapsed_ms,
                required_ms,
            });
        }

        let assessment = self.assess(elapsed_ms);
        log::info!(
            "session finished after {elapsed_ms} ms: {} / {}",
            assessment.stress_level,
            assessment.stress_state
        );
        self.state = SessionState::Finished(Box::new(assessment.clone()));
        Ok(assessment)
    }

    fn synthetic_rr(&mut self) -> Vec<f64> {
        let scfg = self.cfg.session;
        let base = 60_000.0 / scfg.synthetic_bpm.max(1.0);
        let jitter = scfg.synthetic_jitter_ms.abs();
        if !jitter.is_finite() || jitter == 0.0 {
            return vec![base; scfg.synthetic_rr_count];
        }
        (0..scfg.synthetic_rr_count)
            .map(|_| base + self.rng.gen_range(-jitter..=jitter))
            .collect()
    }

    fn final_amplitudes(&self, rr: &[f64], fallbacks: &mut Vec<MetricFallback>) -> (f64, f64) {
        let scfg = &self.cfg.session;
        if self.ia_samples.is_empty() {
            let est = estimate_ia(AmplitudeInput::RrIntervals(rr), &self.cfg.amplitude);
            if let Some(reason) = est.reason() {
                fallbacks.push(MetricFallback {
                    metric: Metric::Amplitudes,
                    reason,
                });
            }
            let ia = est.value();
            return (ia.lf, ia.hf);
        }

        let recent = &self.ia_samples[self.ia_samples.len().saturating_sub(scfg.final_ia_window)..];
        let good: Vec<IaSample> = recent
            .iter()
            .copied()
            .filter(|s| s.quality >= self.cfg.quality.acceptable_score)
            .collect();
        let chosen: &[IaSample] = if good.len() >= scfg.final_ia_min_good {
            &good
        } else {
            log::debug!(
                "{} good iA samples of {}; averaging all {}",
                good.len(),
                recent.len(),
                self.ia_samples.len()
            );
            &self.ia_samples
        };
        let lf: Vec<f64> = chosen.iter().map(|s| s.lf).collect();
        let hf: Vec<f64> = chosen.iter().map(|s| s.hf).collect();
        (
            robust_mean(&lf, scfg.final_ia_trim_percent),
            robust_mean(&hf, scfg.final_ia_trim_percent),
        )
    }

    fn assess(&mut self, duration_ms: u64) -> StressAssessment {
        let mut fallbacks = Vec::new();
        let stress = self.cfg.stress;

        let live_rr = self.detector.rr_intervals().to_vec();
        let synthetic_rr = live_rr.len() < self.cfg.session.min_real_rr;
        let rr = if synthetic_rr {
            log::warn!(
                "only {} rr intervals detected; synthesising a resting series",
                live_rr.len()
            );
            self.synthetic_rr()
        } else {
            live_rr
        };

        let heart_rate = session_heart_rate(self.detector.heart_rates());
        if let Some(reason) = heart_rate.reason() {
            fallbacks.push(MetricFallback {
                metric: Metric::HeartRate,
                reason,
            });
        }
        let rmssd = rmssd(&rr);
        if let Some(reason) = rmssd.reason() {
            fallbacks.push(MetricFallback {
                metric: Metric::Rmssd,
                reason,
            });
        }

        let (lf, hf) = self.final_amplitudes(&rr, &mut fallbacks);
        let lf = validate_value(lf, &stress.lf).value();
        let hf = validate_value(hf, &stress.hf).value();
        let ratio = lf_hf_ratio(lf, hf);
        if let Some(reason) = ratio.reason() {
            fallbacks.push(MetricFallback {
                metric: Metric::LfHfRatio,
                reason,
            });
        }

        let respiration_rate = estimate_respiration_rate(&self.audio, &self.cfg.respiration);
        let signal_quality = self.quality.map(|q| q.score);
        let stress_level = estimate_stress_level(
            f64::from(rmssd.value()),
            ratio.value(),
            lf,
            hf,
            signal_quality,
            &stress,
        );
        let stress_state = determine_stress_state(
            lf,
            hf,
            f64::from(heart_rate.value()),
            f64::from(rmssd.value()),
            &stress,
        );
        let quadrant = Quadrant::classify(lf, hf, &stress);
        self.scatter.push(ScatterPoint::final_point(hf, lf, quadrant));

        StressAssessment {
            heart_rate_bpm: heart_rate.value(),
            rmssd_ms: rmssd.value(),
            lf_ia: lf,
            hf_ia: hf,
            lf_hf_ratio: ratio.value(),
            respiration_rate,
            stress_level,
            stress_state,
            quadrant,
            duration_ms,
            rr_count: rr.len(),
            synthetic_rr,
            signal_quality,
            fallbacks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const FS: f64 = 30.0;

    fn pulse_at(i: usize, amp: f64) -> (f64, u64) {
        let v = 128.0 + amp * (2.0 * PI * 1.2 * i as f64 / FS).sin();
        (v, (i as f64 * 1000.0 / FS).round() as u64)
    }

    /// Feed `seconds` of PPG plus audio at the nominal 25 ms cadence.
    fn run(session: &mut Session, seconds: f64, amp: f64) -> u64 {
        session.start(0);
        let mut next_audio = 0u64;
        let mut last = 0;
        for i in 0..(seconds * FS) as usize {
            let (v, t) = pulse_at(i, amp);
            while next_audio <= t {
                let breath = 40.0 + 20.0 * (2.0 * PI * next_audio as f64 / 4000.0).sin();
                session.push_audio(breath).expect("running");
                next_audio += 25;
            }
            session.push_ppg(v, t).expect("running");
            last = t;
        }
        last
    }

    #[test]
    fn steady_pulse_gives_steady_heart_rate() {
        let mut session = Session::new(PipelineConfig::default());
        let end = run(&mut session, 35.0, 10.0);
        let a = session.stop(end).expect("assessment");
        assert!((67..=77).contains(&a.heart_rate_bpm), "{a:?}");
        assert!(a.rmssd_ms <= 5, "{a:?}");
        assert!(!a.synthetic_rr);
        assert_eq!(a.respiration_rate, RespirationRate::Rate(15));
        assert!(a.signal_quality.is_some());
        assert!(a.fallbacks.iter().all(|f| f.metric != Metric::HeartRate));
    }

    #[test]
    fn live_analysis_emits_scatter_points() {
        let mut session = Session::new(PipelineConfig::default());
        let end = run(&mut session, 35.0, 10.0);
        let live = session.scatter_points().len();
        assert!(live > 0);
        assert!(session.scatter_points().iter().all(|p| !p.is_final));
        session.stop(end).expect("assessment");
        let points = session.scatter_points();
        assert_eq!(points.len(), live + 1);
        let last = points[points.len() - 1];
        assert!(last.is_final);
        assert!(last.color.is_some());
    }

    #[test]
    fn missing_pulse_uses_synthetic_intervals() {
        let mut session = Session::new(PipelineConfig::default());
        let end = run(&mut session, 35.0, 0.0);
        let a = session.stop(end).expect("assessment");
        assert!(a.synthetic_rr);
        assert!(a.rr_count >= 5);
        assert_eq!(a.heart_rate_bpm, 70);
        assert!(a
            .fallbacks
            .iter()
            .any(|f| f.metric == Metric::HeartRate));
        assert!(a.lf_ia.is_finite() && a.hf_ia.is_finite());
    }

    #[test]
    fn synthetic_fallback_is_deterministic() {
        let mut first = Session::new(PipelineConfig::default());
        let end = run(&mut first, 31.0, 0.0);
        let mut second = Session::new(PipelineConfig::default());
        run(&mut second, 31.0, 0.0);
        assert_eq!(first.stop(end), second.stop(end));
    }

    #[test]
    fn early_stop_is_refused() {
        let mut session = Session::new(PipelineConfig::default());
        run(&mut session, 10.0, 10.0);
        assert_eq!(
            session.stop(10_000),
            Err(SessionError::TooShort {
                elapsed_ms: 10_000,
                required_ms: 30_000
            })
        );
        assert!(session.is_running());
        assert!(session.stop(30_000).is_ok());
    }

    #[test]
    fn stop_is_idempotent() {
        let mut session = Session::new(PipelineConfig::default());
        let end = run(&mut session, 32.0, 10.0);
        let first = session.stop(end).expect("first stop");
        let points = session.scatter_points().len();
        let second = session.stop(end + 5_000).expect("second stop");
        assert_eq!(first, second);
        assert_eq!(session.scatter_points().len(), points);
        assert_eq!(session.assessment(), Some(&first));
    }

    #[test]
    fn samples_need_a_running_session() {
        let mut session = Session::new(PipelineConfig::default());
        assert_eq!(session.push_ppg(128.0, 0), Err(SessionError::NotRunning));
        assert_eq!(session.push_audio(1.0), Err(SessionError::NotRunning));
        assert_eq!(session.stop(40_000), Err(SessionError::NotRunning));
    }

    #[test]
    fn restart_clears_buffers() {
        let mut session = Session::new(PipelineConfig::default());
        let end = run(&mut session, 31.0, 10.0);
        session.stop(end).expect("assessment");
        session.start(100_000);
        assert!(session.is_running());
        assert_eq!(session.ppg_len(), 0);
        assert_eq!(session.audio_len(), 0);
        assert!(session.scatter_points().is_empty());
        assert!(session.assessment().is_none());
    }

    fn ia(lf: f64, hf: f64, quality: f64, count: usize) -> Vec<IaSample> {
        vec![IaSample { lf, hf, quality }; count]
    }

    #[test]
    fn final_amplitudes_keep_only_good_recent_samples() {
        let mut session = Session::new(PipelineConfig::default());
        // older samples fall outside the 20-sample window
        session.ia_samples = ia(50.0, 20.0, 0.9, 5);
        session.ia_samples.extend(ia(30.0, 10.0, 0.8, 4));
        session.ia_samples.extend(ia(10.0, 40.0, 0.1, 16));

        let mut fallbacks = Vec::new();
        let (lf, hf) = session.final_amplitudes(&[], &mut fallbacks);
        assert_eq!((lf, hf), (30.0, 10.0));
        assert!(fallbacks.is_empty());
    }

    #[test]
    fn final_amplitudes_average_everything_when_few_are_good() {
        let mut session = Session::new(PipelineConfig::default());
        session.ia_samples = ia(50.0, 20.0, 0.9, 5);
        session.ia_samples.extend(ia(30.0, 10.0, 0.8, 2));
        session.ia_samples.extend(ia(10.0, 40.0, 0.1, 18));

        let (lf, hf) = session.final_amplitudes(&[], &mut Vec::new());
        // 25 samples, one trimmed from each end
        assert!((lf - 430.0 / 23.0).abs() < 1e-9, "lf {lf}");
        assert!((hf - 790.0 / 23.0).abs() < 1e-9, "hf {hf}");
    }

    #[test]
    fn final_amplitudes_without_live_samples_fall_back() {
        let session = Session::new(PipelineConfig::default());
        let mut fallbacks = Vec::new();
        let (lf, hf) = session.final_amplitudes(&[800.0; 5], &mut fallbacks);
        assert_eq!((lf, hf), (20.0, 15.0));
        assert_eq!(fallbacks.len(), 1);
        assert_eq!(fallbacks[0].metric, Metric::Amplitudes);
    }

    #[test]
    fn live_points_reject_invalid_values() {
        assert!(ScatterPoint::live(f64::NAN, 20.0, None).is_none());
        assert!(ScatterPoint::live(10.0, 0.0, None).is_none());
        assert!(ScatterPoint::live(10.0, 20.0, Some(0.8)).is_some());
    }
}
