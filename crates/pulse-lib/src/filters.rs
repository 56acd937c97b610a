use crate::signal::TimeSeries;
use crate::spectral::{fft_in_place, ifft_in_place};
use realfft::num_complex::Complex64;

/// FFT brick-wall band-pass.
///
/// The mean is removed, the signal is zero-padded to the next power of two at
/// least twice its length, every bin whose absolute frequency falls outside
/// `[low_hz, high_hz]` is cleared on both halves of the spectrum, and the
/// result is truncated back to the input length with the mean added back.
pub fn bandpass_filter(signal: &[f64], low_hz: f64, high_hz: f64, fs: f64) -> Vec<f64> {
    let n = signal.len();
    if n < 4 {
        return vec![0.0; n];
    }
    if fs <= 0.0 || low_hz < 0.0 || high_hz <= low_hz {
        log::warn!("invalid band {low_hz}..{high_hz} Hz at fs={fs}; signal passed through");
        return signal.to_vec();
    }
    let mean = signal.iter().sum::<f64>() / n as f64;
    let size = (2 * n).next_power_of_two();
    let mut buf = vec![Complex64::new(0.0, 0.0); size];
    for (slot, &x) in buf.iter_mut().zip(signal) {
        slot.re = x - mean;
    }

    fft_in_place(&mut buf);
    let bin_hz = fs / size as f64;
    for (k, c) in buf.iter_mut().enumerate() {
        let mirrored = if k <= size / 2 { k } else { size - k };
        let freq = mirrored as f64 * bin_hz;
        if freq < low_hz || freq > high_hz {
            *c = Complex64::new(0.0, 0.0);
        }
    }
    ifft_in_place(&mut buf);

    buf.iter().take(n).map(|c| c.re + mean).collect()
}

/// Centred moving average with the window truncated at the edges.
pub fn smooth_signal(signal: &[f64], radius: usize) -> Vec<f64> {
    let n = signal.len();
    if n == 0 || radius == 0 {
        return signal.to_vec();
    }
    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0);
    let mut acc = 0.0;
    for &x in signal {
        acc += x;
        prefix.push(acc);
    }
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(radius);
            let hi = (i + radius).min(n - 1);
            (prefix[hi + 1] - prefix[lo]) / (hi + 1 - lo) as f64
        })
        .collect()
}

/// Subtract a centred moving average spanning a tenth of the signal on each side.
pub fn remove_trend(signal: &[f64]) -> Vec<f64> {
    let n = signal.len();
    if n < 10 {
        return signal.to_vec();
    }
    let radius = n.div_ceil(10);
    let trend = smooth_signal(signal, radius);
    signal.iter().zip(trend).map(|(x, t)| x - t).collect()
}

/// Clip values to the Tukey fences `[Q1 - 1.5·IQR, Q3 + 1.5·IQR]`.
pub fn remove_outliers_iqr(signal: &[f64]) -> Vec<f64> {
    let n = signal.len();
    if n < 10 {
        return signal.to_vec();
    }
    let mut sorted = signal.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let q1 = sorted[n / 4];
    let q3 = sorted[(n * 3) / 4];
    let iqr = q3 - q1;
    let lower = q1 - 1.5 * iqr;
    let upper = q3 + 1.5 * iqr;
    if lower.is_nan() || upper.is_nan() {
        return signal.to_vec();
    }
    signal.iter().map(|x| x.clamp(lower, upper)).collect()
}

/// Resample an RR series (ms) onto `target_len` evenly spaced points.
///
/// Interval `i` is placed at the cumulative time of the intervals before it,
/// and the grid spans the first to the last of those instants. The returned
/// series is tagged with the configured `grid_fs`, not a rate derived from the
/// interval durations. Fewer than five intervals come back unchanged.
pub fn interpolate_to_uniform(rr: &[f64], target_len: usize, grid_fs: f64) -> TimeSeries {
    if rr.len() < 5 || target_len < 2 {
        return TimeSeries::new(grid_fs, rr.to_vec());
    }
    let mut times = Vec::with_capacity(rr.len());
    let mut acc = 0.0;
    for &interval in rr {
        times.push(acc);
        acc += interval;
    }
    let duration = times[times.len() - 1];
    if duration <= 0.0 {
        return TimeSeries::new(grid_fs, vec![rr[0]; target_len]);
    }

    let step = duration / (target_len - 1) as f64;
    let mut data = Vec::with_capacity(target_len);
    let mut idx = 0;
    for i in 0..target_len {
        let t = i as f64 * step;
        while idx + 2 < times.len() && times[idx + 1] < t {
            idx += 1;
        }
        let (t0, t1) = (times[idx], times[idx + 1]);
        let frac = if t1 > t0 {
            ((t - t0) / (t1 - t0)).clamp(0.0, 1.0)
        } else {
            0.0
        };
        data.push(rr[idx] + frac * (rr[idx + 1] - rr[idx]));
    }
    TimeSeries::new(grid_fs, data)
}

fn single_pole_lowpass(data: &[f64], fs: f64, cutoff: f64) -> Vec<f64> {
    if data.is_empty() {
        return Vec::new();
    }
    let dt = 1.0 / fs;
    let rc = 1.0 / (2.0 * std::f64::consts::PI * cutoff.max(0.01));
    let alpha = dt / (rc + dt);
    let mut out = Vec::with_capacity(data.len());
    let mut prev = data[0];
    for &x in data {
        prev += alpha * (x - prev);
        out.push(prev);
    }
    out
}

/// Single-pole low-pass run forward and then backward, cancelling phase lag.
pub fn low_pass_zero_phase(signal: &[f64], cutoff_hz: f64, fs: f64) -> Vec<f64> {
    if signal.len() < 10 || fs <= 0.0 || cutoff_hz <= 0.0 {
        return signal.to_vec();
    }
    let mut forward = single_pole_lowpass(signal, fs, cutoff_hz);
    forward.reverse();
    let mut out = single_pole_lowpass(&forward, fs, cutoff_hz);
    out.reverse();
    out
}

/// Conditioning applied to raw PPG brightness before offline peak search:
/// light smoothing, detrending, zero-phase low-pass and IQR clipping.
pub fn preprocess_ppg(signal: &[f64], cutoff_hz: f64, fs: f64) -> Vec<f64> {
    let smoothed = smooth_signal(signal, 2);
    let detrended = remove_trend(&smoothed);
    let filtered = low_pass_zero_phase(&detrended, cutoff_hz, fs);
    remove_outliers_iqr(&filtered)
}
