//! Deterministic replay of a recorded session.
//!
//! PPG samples arrive with their own timestamps; audio amplitude is polled on
//! a fixed cadence by [`AudioClock`]. Both streams are fed to a [`Session`] in
//! timestamp order and the session is stopped at the requested time, at the
//! auto-stop deadline, or when the recording runs out.

use crate::{
    config::PipelineConfig,
    session::{ScatterPoint, Session, SessionError, StressAssessment},
    signal::Sample,
};
use serde::{Deserialize, Serialize};

/// Fixed-cadence poll schedule for the audio stream.
#[derive(Debug, Clone, Copy)]
pub struct AudioClock {
    interval_ms: u64,
    next_due_ms: u64,
}

impl AudioClock {
    pub fn new(interval_ms: u64, start_ms: u64) -> Self {
        Self {
            interval_ms: interval_ms.max(1),
            next_due_ms: start_ms,
        }
    }

    /// Number of polls due at or before `now_ms`; advances the schedule.
    pub fn due_ticks(&mut self, now_ms: u64) -> u64 {
        if now_ms < self.next_due_ms {
            return 0;
        }
        let ticks = (now_ms - self.next_due_ms) / self.interval_ms + 1;
        self.next_due_ms += ticks * self.interval_ms;
        ticks
    }

    pub fn next_due_ms(&self) -> u64 {
        self.next_due_ms
    }
}

/// Recorded input streams.
#[derive(Debug, Clone, Default)]
pub struct Recording {
    pub ppg: Vec<Sample>,
    /// Audio amplitudes at the respiration polling cadence, starting with the first PPG sample.
    pub audio: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCause {
    Requested,
    AutoStop,
    EndOfRecording,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayOutcome {
    pub assessment: StressAssessment,
    pub scatter: Vec<ScatterPoint>,
    pub ppg_samples: usize,
    pub audio_samples: usize,
    pub stopped_at_ms: u64,
    pub stop_cause: StopCause,
}

/// Replay `recording` through a fresh session.
///
/// `stop_at_ms` is relative to the first PPG timestamp. Fails with
/// [`SessionError::TooShort`] when the session ends before its minimum
/// duration.
pub fn replay(
    recording: &Recording,
    cfg: &PipelineConfig,
    stop_at_ms: Option<u64>,
) -> Result<ReplayOutcome, SessionError> {
    let start_ms = recording.ppg.first().map_or(0, |s| s.timestamp_ms);
    let auto_stop_ms = start_ms + cfg.session.auto_stop_ms;
    let (deadline, deadline_cause) = match stop_at_ms {
        Some(at) if start_ms + at < auto_stop_ms => (start_ms + at, StopCause::Requested),
        _ => (auto_stop_ms, StopCause::AutoStop),
    };

    let mut session = Session::new(*cfg);
    session.start(start_ms);
    let interval_ms = cfg.respiration.interval_ms.round().max(1.0) as u64;
    let mut clock = AudioClock::new(interval_ms, start_ms);
    let mut audio = recording.audio.iter().copied();

    let mut stopped = None;
    let mut last_ms = start_ms;
    for sample in &recording.ppg {
        if sample.timestamp_ms >= deadline {
            stopped = Some((deadline, deadline_cause));
            break;
        }
        for _ in 0..clock.due_ticks(sample.timestamp_ms) {
            if let Some(a) = audio.next() {
                session.push_audio(a)?;
            }
        }
        session.push_ppg(sample.value, sample.timestamp_ms)?;
        last_ms = sample.timestamp_ms;
    }
    let (stopped_at_ms, stop_cause) = stopped.unwrap_or((last_ms, StopCause::EndOfRecording));
    log::debug!(
        "replay stopping at {stopped_at_ms} ms ({stop_cause:?}) after {} ppg samples",
        session.ppg_len()
    );

    let assessment = session.stop(stopped_at_ms)?;
    Ok(ReplayOutcome {
        assessment,
        scatter: session.scatter_points().to_vec(),
        ppg_samples: session.ppg_len(),
        audio_samples: session.audio_len(),
        stopped_at_ms: stopped_at_ms - start_ms,
        stop_cause,
    })
}
