//! Frequency-domain kernel shared by every filter in the crate.
//!
//! A single iterative radix-2 Cooley–Tukey transform backs the band-pass
//! filter and the analytic signal. The dominant-frequency search works on a
//! windowed power spectrum from `realfft`, which is also what the HRV PSD
//! code has always used.

use realfft::num_complex::Complex64;
use realfft::RealFftPlanner;
use std::f64::consts::PI;

const ZERO: Complex64 = Complex64::new(0.0, 0.0);

fn transform_len_ok(n: usize) -> bool {
    if n > 1 && !n.is_power_of_two() {
        log::error!("fft length {n} is not a power of two; leaving input untouched");
        return false;
    }
    true
}

/// Forward FFT on a power-of-two buffer.
///
/// Any other length is logged and left as-is.
pub fn fft_in_place(buf: &mut [Complex64]) {
    let n = buf.len();
    if n <= 1 || !transform_len_ok(n) {
        return;
    }

    // bit-reversal permutation
    let mut j = 0usize;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j |= bit;
        if i < j {
            buf.swap(i, j);
        }
    }

    let mut len = 2;
    while len <= n {
        let half = len / 2;
        let step = -2.0 * PI / len as f64;
        for start in (0..n).step_by(len) {
            for k in 0..half {
                let w = Complex64::from_polar(1.0, step * k as f64);
                let u = buf[start + k];
                let v = buf[start + k + half] * w;
                buf[start + k] = u + v;
                buf[start + k + half] = u - v;
            }
        }
        len <<= 1;
    }
}

/// Inverse FFT (conjugate, forward transform, conjugate, scale by 1/N).
pub fn ifft_in_place(buf: &mut [Complex64]) {
    let n = buf.len();
    if n <= 1 || !transform_len_ok(n) {
        return;
    }
    for c in buf.iter_mut() {
        *c = c.conj();
    }
    fft_in_place(buf);
    let scale = 1.0 / n as f64;
    for c in buf.iter_mut() {
        *c = c.conj() * scale;
    }
}

fn to_complex(real: &[f64], imag: &[f64]) -> Vec<Complex64> {
    real.iter()
        .enumerate()
        .map(|(i, &re)| Complex64::new(re, imag.get(i).copied().unwrap_or(0.0)))
        .collect()
}

fn split(buf: Vec<Complex64>) -> (Vec<f64>, Vec<f64>) {
    buf.into_iter().map(|c| (c.re, c.im)).unzip()
}

/// Forward FFT over separate real/imaginary arrays.
///
/// `imag` is zero-extended (or truncated) to the length of `real`.
pub fn fft(real: &[f64], imag: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut buf = to_complex(real, imag);
    fft_in_place(&mut buf);
    split(buf)
}

/// Inverse of [`fft`].
pub fn ifft(real: &[f64], imag: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut buf = to_complex(real, imag);
    ifft_in_place(&mut buf);
    split(buf)
}

/// Analytic signal `x + j·H{x}` computed in the frequency domain.
///
/// The input is zero-padded to the next power of two at least twice its
/// length; positive frequencies are doubled, negative ones removed, DC and
/// Nyquist kept. Inputs shorter than four samples come back with a zero
/// imaginary part.
pub fn analytic_signal(signal: &[f64]) -> Vec<Complex64> {
    let n = signal.len();
    if n < 4 {
        return signal.iter().map(|&x| Complex64::new(x, 0.0)).collect();
    }
    let size = (2 * n).next_power_of_two();
    let mut buf = vec![ZERO; size];
    for (slot, &x) in buf.iter_mut().zip(signal) {
        slot.re = x;
    }

    fft_in_place(&mut buf);
    let half = size / 2;
    for c in &mut buf[1..half] {
        *c *= 2.0;
    }
    for c in &mut buf[half + 1..] {
        *c = ZERO;
    }
    ifft_in_place(&mut buf);

    buf.truncate(n);
    buf
}

/// Instantaneous amplitude: magnitude of the analytic signal.
pub fn envelope(signal: &[f64]) -> Vec<f64> {
    analytic_signal(signal).iter().map(|c| c.norm()).collect()
}

pub fn hamming(size: usize) -> Vec<f64> {
    if size <= 1 {
        return vec![1.0; size];
    }
    (0..size)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / (size as f64 - 1.0)).cos())
        .collect()
}

/// Frequency of the strongest spectral peak inside `band` (Hz).
///
/// Uses a Hamming-windowed power spectrum. Returns `None` when the input is
/// too short, the rate is not positive, or the band holds no energy.
pub fn dominant_frequency(signal: &[f64], fs: f64, band: (f64, f64)) -> Option<f64> {
    let n = signal.len();
    if n < 4 || fs <= 0.0 || band.1 <= band.0 {
        return None;
    }
    let window = hamming(n);
    let mut frame: Vec<f64> = signal
        .iter()
        .zip(window.iter())
        .map(|(x, w)| x * w)
        .collect();

    let mut planner = RealFftPlanner::<f64>::new();
    let r2c = planner.plan_fft_forward(n);
    let mut spectrum = r2c.make_output_vec();
    if let Err(err) = r2c.process(&mut frame, &mut spectrum) {
        log::error!("real fft failed: {err}");
        return None;
    }

    let bin_hz = fs / n as f64;
    let last = spectrum.len() - 1;
    let lo = ((band.0 / bin_hz).floor() as usize).min(last);
    let hi = ((band.1 / bin_hz).ceil() as usize).min(last);

    let mut best_bin = None;
    let mut best_power = 0.0;
    for (k, val) in spectrum.iter().enumerate().take(hi + 1).skip(lo) {
        let power = val.norm_sqr();
        if power > best_power {
            best_power = power;
            best_bin = Some(k);
        }
    }
    best_bin.map(|k| (k as f64 * bin_hz).clamp(band.0, band.1))
}
