//! Mapping from (LF iA, HF iA, heart rate, RMSSD) onto a stress quadrant,
//! a nine-way stress state and a six-step stress level.
//!
//! All thresholds live in [`StressThresholds`]; its `Default` is the
//! canonical table the CLI and sessions use.

use crate::outcome::{Estimate, FallbackReason};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Accepted interval for an input, plus the value substituted for NaN/infinity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidRange {
    pub min: f64,
    pub max: f64,
    pub default: f64,
}

impl ValidRange {
    pub const fn new(min: f64, max: f64, default: f64) -> Self {
        Self { min, max, default }
    }
}

/// Clamp into range; NaN or infinite values become the range default.
pub fn validate_value(value: f64, range: &ValidRange) -> Estimate<f64> {
    if !value.is_finite() {
        log::warn!("invalid value {value}; using default {}", range.default);
        return Estimate::fallback(range.default, FallbackReason::InvalidNumeric);
    }
    if value < range.min || value > range.max {
        log::warn!("value {value} outside {}..={}; clamping", range.min, range.max);
        return Estimate::Computed(value.clamp(range.min, range.max));
    }
    Estimate::Computed(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StressThresholds {
    pub lf: ValidRange,
    pub hf: ValidRange,
    pub heart_rate: ValidRange,
    pub rmssd: ValidRange,
    pub lf_hf_ratio: ValidRange,
    /// LF above this counts as high.
    pub lf_boundary: f64,
    /// HF at or above this counts as high.
    pub hf_boundary: f64,
    pub deep_relaxation_max_hr: f64,
    pub deep_relaxation_min_rmssd: f64,
    pub strong_physical_min_hr: f64,
    pub tense_min_hr: f64,
    pub tense_min_ratio: f64,
    pub resting_min_rmssd: f64,
    pub strong_mental_min_hr: f64,
    pub strong_mental_max_rmssd: f64,
    /// Signal quality below this adds one point of uncertainty to the level.
    pub low_quality_score: f64,
}

impl Default for StressThresholds {
    fn default() -> Self {
        Self {
            lf: ValidRange::new(5.0, 60.0, 20.0),
            hf: ValidRange::new(5.0, 50.0, 15.0),
            heart_rate: ValidRange::new(40.0, 200.0, 70.0),
            rmssd: ValidRange::new(1.0, 100.0, 30.0),
            lf_hf_ratio: ValidRange::new(0.1, 10.0, 1.5),
            lf_boundary: 25.0,
            hf_boundary: 25.0,
            deep_relaxation_max_hr: 65.0,
            deep_relaxation_min_rmssd: 50.0,
            strong_physical_min_hr: 90.0,
            tense_min_hr: 85.0,
            tense_min_ratio: 2.5,
            resting_min_rmssd: 30.0,
            strong_mental_min_hr: 85.0,
            strong_mental_max_rmssd: 20.0,
            low_quality_score: 0.4,
        }
    }
}

/// Position on the LF/HF amplitude plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quadrant {
    /// High LF, low HF.
    MentalStress,
    /// High LF, high HF.
    Resting,
    /// Low LF, low HF.
    PhysicalStress,
    /// Low LF, high HF.
    DeepRelaxation,
}

/// 24-bit RGB colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color(pub u32);

impl Color {
    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Color(((r as u32) << 16) | ((g as u32) << 8) | b as u32)
    }
}

impl Quadrant {
    pub fn classify(lf: f64, hf: f64, t: &StressThresholds) -> Self {
        let high_lf = lf > t.lf_boundary;
        let high_hf = hf >= t.hf_boundary;
        match (high_lf, high_hf) {
            (true, false) => Quadrant::MentalStress,
            (true, true) => Quadrant::Resting,
            (false, false) => Quadrant::PhysicalStress,
            (false, true) => Quadrant::DeepRelaxation,
        }
    }

    pub fn color(self) -> Color {
        match self {
            Quadrant::MentalStress => Color::rgb(150, 0, 200),
            Quadrant::Resting => Color::rgb(0, 0, 200),
            Quadrant::PhysicalStress => Color::rgb(200, 0, 0),
            Quadrant::DeepRelaxation => Color::rgb(0, 200, 0),
        }
    }

    fn score(self) -> i32 {
        match self {
            Quadrant::MentalStress => 3,
            Quadrant::Resting => 1,
            Quadrant::PhysicalStress => 4,
            Quadrant::DeepRelaxation => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StressState {
    DeepRelaxation,
    Relaxed,
    Resting,
    Normal,
    MildMentalStress,
    StrongMentalStress,
    MildPhysicalStress,
    StrongPhysicalStress,
    Tense,
}

impl StressState {
    pub fn label(self) -> &'static str {
        match self {
            StressState::DeepRelaxation => "deep relaxation (near meditative)",
            StressState::Relaxed => "relaxed",
            StressState::Resting => "resting",
            StressState::Normal => "normal",
            StressState::MildMentalStress => "mild mental stress",
            StressState::StrongMentalStress => "strong mental stress",
            StressState::MildPhysicalStress => "mild physical stress",
            StressState::StrongPhysicalStress => "strong physical stress",
            StressState::Tense => "physically and mentally tense",
        }
    }
}

impl fmt::Display for StressState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StressLevel {
    VeryLow,
    Low,
    SomewhatLow,
    Moderate,
    High,
    VeryHigh,
}

impl StressLevel {
    pub fn from_score(score: i32) -> Self {
        match score {
            i32::MIN..=0 => StressLevel::VeryLow,
            1..=2 => StressLevel::Low,
            3..=4 => StressLevel::SomewhatLow,
            5..=6 => StressLevel::Moderate,
            7..=8 => StressLevel::High,
            _ => StressLevel::VeryHigh,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StressLevel::VeryLow => "very low (deep relaxation)",
            StressLevel::Low => "low (relaxed)",
            StressLevel::SomewhatLow => "somewhat low (normal)",
            StressLevel::Moderate => "moderate (mild stress)",
            StressLevel::High => "high (stressed)",
            StressLevel::VeryHigh => "very high (strong stress)",
        }
    }
}

impl fmt::Display for StressLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub fn determine_stress_state(
    lf: f64,
    hf: f64,
    heart_rate: f64,
    rmssd: f64,
    t: &StressThresholds,
) -> StressState {
    let lf = validate_value(lf, &t.lf).value();
    let hf = validate_value(hf, &t.hf).value();
    let hr = validate_value(heart_rate, &t.heart_rate).value();
    let rmssd = validate_value(rmssd, &t.rmssd).value();
    let ratio = lf / hf;
    log::debug!("stress state: lf={lf:.1} hf={hf:.1} hr={hr} rmssd={rmssd} ratio={ratio:.2}");

    match Quadrant::classify(lf, hf, t) {
        Quadrant::DeepRelaxation => {
            if hr < t.deep_relaxation_max_hr && rmssd > t.deep_relaxation_min_rmssd {
                StressState::DeepRelaxation
            } else {
                StressState::Relaxed
            }
        }
        Quadrant::PhysicalStress => {
            if hr > t.strong_physical_min_hr {
                StressState::StrongPhysicalStress
            } else {
                StressState::MildPhysicalStress
            }
        }
        Quadrant::Resting => {
            if hr > t.tense_min_hr {
                StressState::Tense
            } else if rmssd >= t.resting_min_rmssd {
                StressState::Resting
            } else {
                StressState::Normal
            }
        }
        Quadrant::MentalStress => {
            if ratio > t.tense_min_ratio && hr > t.tense_min_hr {
                StressState::Tense
            } else if hr > t.strong_mental_min_hr || rmssd < t.strong_mental_max_rmssd {
                StressState::StrongMentalStress
            } else {
                StressState::MildMentalStress
            }
        }
    }
}

/// Additive stress score behind [`estimate_stress_level`].
pub fn stress_score(
    rmssd: f64,
    lf_hf_ratio: f64,
    lf: f64,
    hf: f64,
    signal_quality: Option<f64>,
    t: &StressThresholds,
) -> i32 {
    let rmssd = validate_value(rmssd, &t.rmssd).value();
    let ratio = validate_value(lf_hf_ratio, &t.lf_hf_ratio).value();
    let lf = validate_value(lf, &t.lf).value();
    let hf = validate_value(hf, &t.hf).value();

    let rmssd_score = if rmssd < 20.0 {
        4
    } else if rmssd < 30.0 {
        3
    } else if rmssd < 40.0 {
        2
    } else if rmssd < 50.0 {
        1
    } else {
        0
    };
    let quadrant_score = Quadrant::classify(lf, hf, t).score();
    let ratio_score = if ratio > 3.0 {
        2
    } else if ratio > 2.0 {
        1
    } else if ratio < 0.5 {
        -1
    } else {
        0
    };
    let quality_score = match signal_quality {
        Some(q) if q < t.low_quality_score => 1,
        _ => 0,
    };
    let total = rmssd_score + quadrant_score + ratio_score + quality_score;
    log::debug!(
        "stress score: rmssd({rmssd_score}) + quadrant({quadrant_score}) + ratio({ratio_score}) + quality({quality_score}) = {total}"
    );
    total
}

pub fn estimate_stress_level(
    rmssd: f64,
    lf_hf_ratio: f64,
    lf: f64,
    hf: f64,
    signal_quality: Option<f64>,
    t: &StressThresholds,
) -> StressLevel {
    StressLevel::from_score(stress_score(rmssd, lf_hf_ratio, lf, hf, signal_quality, t))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(lf: f64, hf: f64, hr: f64, rmssd: f64) -> StressState {
        determine_stress_state(lf, hf, hr, rmssd, &StressThresholds::default())
    }

    #[test]
    fn validation_clamps_and_defaults() {
        let r = ValidRange::new(5.0, 60.0, 20.0);
        assert_eq!(validate_value(70.0, &r), Estimate::Computed(60.0));
        assert_eq!(validate_value(1.0, &r), Estimate::Computed(5.0));
        assert_eq!(validate_value(f64::NAN, &r).value(), 20.0);
        assert!(validate_value(f64::INFINITY, &r).is_fallback());
    }

    #[test]
    fn low_lf_branches() {
        assert_eq!(state(10.0, 40.0, 60.0, 60.0), StressState::DeepRelaxation);
        assert_eq!(state(10.0, 40.0, 70.0, 60.0), StressState::Relaxed);
        assert_eq!(state(10.0, 10.0, 95.0, 30.0), StressState::StrongPhysicalStress);
        assert_eq!(state(10.0, 10.0, 75.0, 30.0), StressState::MildPhysicalStress);
    }

    #[test]
    fn high_lf_branches() {
        assert_eq!(state(40.0, 30.0, 90.0, 40.0), StressState::Tense);
        assert_eq!(state(40.0, 30.0, 70.0, 40.0), StressState::Resting);
        assert_eq!(state(40.0, 30.0, 70.0, 25.0), StressState::Normal);
        assert_eq!(state(50.0, 10.0, 90.0, 40.0), StressState::Tense);
        assert_eq!(state(30.0, 20.0, 90.0, 40.0), StressState::StrongMentalStress);
        assert_eq!(state(40.0, 20.0, 70.0, 15.0), StressState::StrongMentalStress);
        assert_eq!(state(40.0, 20.0, 70.0, 35.0), StressState::MildMentalStress);
    }

    #[test]
    fn boundaries_follow_quadrant_rules() {
        // LF exactly 25 is low, HF exactly 25 is high
        assert_eq!(
            Quadrant::classify(25.0, 25.0, &StressThresholds::default()),
            Quadrant::DeepRelaxation
        );
        assert_eq!(
            Quadrant::classify(25.1, 24.9, &StressThresholds::default()),
            Quadrant::MentalStress
        );
        assert_eq!(Quadrant::MentalStress.color(), Color(0x9600C8));
    }

    #[test]
    fn invalid_inputs_still_classify() {
        assert_eq!(
            state(f64::NAN, f64::INFINITY, f64::NAN, f64::NEG_INFINITY),
            // defaults: lf 20, hf 15, hr 70, rmssd 30
            StressState::MildPhysicalStress
        );
    }

    #[test]
    fn classification_is_total_and_deterministic() {
        let t = StressThresholds::default();
        let probes = [
            f64::NAN,
            f64::NEG_INFINITY,
            -10.0,
            0.0,
            5.0,
            24.9,
            25.0,
            25.1,
            60.0,
            500.0,
            f64::INFINITY,
        ];
        for &lf in &probes {
            for &hf in &probes {
                for &hr in &[f64::NAN, 30.0, 64.0, 86.0, 91.0, 300.0] {
                    for &rmssd in &[f64::NAN, 0.0, 19.0, 35.0, 55.0, 900.0] {
                        let a = determine_stress_state(lf, hf, hr, rmssd, &t);
                        let b = determine_stress_state(lf, hf, hr, rmssd, &t);
                        assert_eq!(a, b);
                        let ratio = lf / hf;
                        let l1 = estimate_stress_level(rmssd, ratio, lf, hf, Some(0.2), &t);
                        let l2 = estimate_stress_level(rmssd, ratio, lf, hf, Some(0.2), &t);
                        assert_eq!(l1, l2);
                    }
                }
            }
        }
    }

    #[test]
    fn stress_level_buckets() {
        let t = StressThresholds::default();
        // rmssd 60 -> 0, low LF / high HF -> 0, ratio 0.4 -> -1
        assert_eq!(
            estimate_stress_level(60.0, 0.4, 10.0, 40.0, None, &t),
            StressLevel::VeryLow
        );
        // rmssd 15 -> 4, low/low -> 4, ratio 3.5 -> 2
        assert_eq!(stress_score(15.0, 3.5, 20.0, 10.0, None, &t), 10);
        assert_eq!(
            estimate_stress_level(15.0, 3.5, 20.0, 10.0, None, &t),
            StressLevel::VeryHigh
        );
        // rmssd 35 -> 2, high/high -> 1, ratio 1.5 -> 0
        assert_eq!(
            estimate_stress_level(35.0, 1.5, 40.0, 30.0, None, &t),
            StressLevel::SomewhatLow
        );
    }

    #[test]
    fn poor_signal_raises_level() {
        let t = StressThresholds::default();
        let clean = stress_score(45.0, 1.5, 40.0, 30.0, Some(0.9), &t);
        let noisy = stress_score(45.0, 1.5, 40.0, 30.0, Some(0.3), &t);
        assert_eq!(noisy, clean + 1);
        assert_eq!(StressLevel::from_score(clean), StressLevel::Low);
        assert_eq!(StressLevel::from_score(noisy), StressLevel::SomewhatLow);
    }
}
