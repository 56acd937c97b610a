use serde::{Deserialize, Serialize};

/// Basic typed time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Uniform sampling frequency in Hz
    pub fs: f64,
    /// Samples
    pub data: Vec<f64>,
}

impl TimeSeries {
    pub fn new(fs: f64, data: Vec<f64>) -> Self {
        Self { fs, data }
    }
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
    pub fn duration(&self) -> f64 {
        if self.fs > 0.0 {
            self.data.len() as f64 / self.fs
        } else {
            0.0
        }
    }
}

/// One timestamped reading from a sensor stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub value: f64,
    /// Milliseconds since an arbitrary session-relative origin.
    pub timestamp_ms: u64,
}

impl Sample {
    pub fn new(value: f64, timestamp_ms: u64) -> Self {
        Self {
            value,
            timestamp_ms,
        }
    }
}

/// Point events on a timeline (e.g., pulse peak indices)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Events {
    pub indices: Vec<usize>,
}

impl Events {
    pub fn from_indices(indices: Vec<usize>) -> Self {
        Self { indices }
    }
    pub fn len(&self) -> usize {
        self.indices.len()
    }
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// RR intervals (milliseconds)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RRSeries {
    pub rr: Vec<f64>,
}

impl RRSeries {
    pub fn new(rr: Vec<f64>) -> Self {
        Self { rr }
    }

    /// Gaps between consecutive peak indices, converted to milliseconds.
    pub fn from_events(events: &Events, fs: f64) -> Self {
        if fs <= 0.0 {
            return Self::default();
        }
        let rr = events
            .indices
            .windows(2)
            .map(|w| (w[1] as f64 - w[0] as f64) * 1000.0 / fs)
            .collect();
        Self { rr }
    }

    /// Gaps between consecutive beat timestamps.
    pub fn from_timestamps(times_ms: &[u64]) -> Self {
        let rr = times_ms
            .windows(2)
            .map(|w| w[1].saturating_sub(w[0]) as f64)
            .collect();
        Self { rr }
    }

    pub fn len(&self) -> usize {
        self.rr.len()
    }
    pub fn is_empty(&self) -> bool {
        self.rr.is_empty()
    }
    pub fn total_ms(&self) -> f64 {
        self.rr.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rr_from_events_uses_milliseconds() {
        let events = Events::from_indices(vec![0, 25, 50, 76]);
        let rr = RRSeries::from_events(&events, 30.0);
        assert_eq!(rr.len(), 3);
        assert!((rr.rr[0] - 833.333).abs() < 1e-2);
        assert!((rr.rr[2] - 866.666).abs() < 1e-2);
    }

    #[test]
    fn rr_from_timestamps() {
        let rr = RRSeries::from_timestamps(&[1000, 1800, 2610]);
        assert_eq!(rr.rr, vec![800.0, 810.0]);
        assert_eq!(rr.total_ms(), 1610.0);
    }
}
