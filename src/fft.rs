//! Discrete Fourier transforms
//!
//! Thin wrappers over `rustfft` plans. Forward transforms use the
//! e^{-i2πkn/N} kernel; inverse transforms are normalized by 1/N.

use num_complex::Complex64;
use rustfft::FftPlanner;

fn transform(input: &[Complex64], inverse: bool) -> Vec<Complex64> {
    let mut data = input.to_vec();
    if data.len() <= 1 {
        return data;
    }
    let mut planner = FftPlanner::<f64>::new();
    let plan = if inverse {
        planner.plan_fft_inverse(data.len())
    } else {
        planner.plan_fft_forward(data.len())
    };
    plan.process(&mut data);
    data
}

/// Forward DFT of a complex sequence of any length
pub fn fft(input: &[Complex64]) -> Vec<Complex64> {
    transform(input, false)
}

/// Inverse DFT, normalized by 1/N
pub fn ifft(input: &[Complex64]) -> Vec<Complex64> {
    let n = input.len().max(1) as f64;
    transform(input, true).into_iter().map(|x| x / n).collect()
}

/// Forward DFT of a real sequence
pub fn fft_real(input: &[f64]) -> Vec<Complex64> {
    let data: Vec<Complex64> = input.iter().map(|&x| Complex64::new(x, 0.0)).collect();
    fft(&data)
}

/// Analytic signal of a real sequence.
///
/// Negative frequencies are removed: bins 1..N/2 are doubled, the Nyquist
/// bin of an even-length signal is kept once, and the upper half is zeroed.
/// The real part of the result reproduces the input.
pub fn hilbert(signal: &[f64]) -> Vec<Complex64> {
    let n = signal.len();
    if n == 0 {
        return Vec::new();
    }
    let mut spectrum = fft_real(signal);
    let half = n / 2;
    for (k, bin) in spectrum.iter_mut().enumerate().skip(1) {
        if n % 2 == 0 && k == half {
            continue;
        }
        if k <= half {
            *bin *= 2.0;
        } else {
            *bin = Complex64::new(0.0, 0.0);
        }
    }
    ifft(&spectrum)
}

/// Linear convolution of two real sequences through a zero-padded FFT.
/// Returns `a.len() + b.len() - 1` samples.
pub fn convolve(a: &[f64], b: &[f64]) -> Vec<f64> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let len = a.len() + b.len() - 1;
    let m = len.next_power_of_two();
    let mut fa = vec![Complex64::new(0.0, 0.0); m];
    let mut fb = vec![Complex64::new(0.0, 0.0); m];
    for (dst, &x) in fa.iter_mut().zip(a) {
        dst.re = x;
    }
    for (dst, &x) in fb.iter_mut().zip(b) {
        dst.re = x;
    }
    let fa = fft(&fa);
    let fb = fft(&fb);
    let product: Vec<Complex64> = fa.iter().zip(&fb).map(|(x, y)| x * y).collect();
    ifft(&product).iter().take(len).map(|x| x.re).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    /// Direct O(N²) transform used as reference
    fn dft(input: &[Complex64]) -> Vec<Complex64> {
        let n = input.len();
        (0..n)
            .map(|k| {
                input
                    .iter()
                    .enumerate()
                    .map(|(j, &x)| x * Complex64::from_polar(1.0, -2.0 * PI * (k * j) as f64 / n as f64))
                    .sum()
            })
            .collect()
    }

    fn sample(n: usize) -> Vec<Complex64> {
        (0..n)
            .map(|i| Complex64::new((0.3 * i as f64).sin() + 0.1 * i as f64, (1.7 * i as f64).cos()))
            .collect()
    }

    fn max_diff(a: &[Complex64], b: &[Complex64]) -> f64 {
        a.iter().zip(b).map(|(x, y)| (x - y).norm()).fold(0.0, f64::max)
    }

    #[test]
    fn test_power_of_two_matches_dft() {
        let x = sample(64);
        assert!(max_diff(&fft(&x), &dft(&x)) < 1e-9);
    }

    #[test]
    fn test_odd_lengths_match_dft() {
        for n in [3, 7, 12, 100] {
            let x = sample(n);
            assert!(max_diff(&fft(&x), &dft(&x)) < 1e-8, "length {}", n);
        }
    }

    #[test]
    fn test_inverse_restores_input() {
        let x = sample(45);
        let back = ifft(&fft(&x));
        assert!(max_diff(&x, &back) < 1e-10);
    }

    #[test]
    fn test_hilbert_of_cosine_is_unit_rotation() {
        let n = 256;
        let nu = 0.17;
        let signal: Vec<f64> = (0..n).map(|i| (2.0 * PI * nu * i as f64).cos()).collect();
        let analytic = hilbert(&signal);
        // away from the edges the modulus is flat
        for z in &analytic[64..n - 64] {
            assert!((z.norm() - 1.0).abs() < 0.05, "modulus {}", z.norm());
        }
        for (z, s) in analytic.iter().zip(&signal) {
            assert!((z.re - s).abs() < 1e-10);
        }
    }

    #[test]
    fn test_hilbert_exact_for_periodic_signal() {
        // integer number of periods: the analytic signal is exactly e^{iφ}
        let n = 64;
        let signal: Vec<f64> = (0..n).map(|i| (2.0 * PI * 5.0 * i as f64 / n as f64).cos()).collect();
        let analytic = hilbert(&signal);
        for (i, z) in analytic.iter().enumerate() {
            let phase = 2.0 * PI * 5.0 * i as f64 / n as f64;
            assert!((z.im - phase.sin()).abs() < 1e-10);
        }
    }

    #[test]
    fn test_convolve_matches_direct_sum() {
        let a = [1.0, 2.0, 3.0];
        let b = [0.5, -1.0];
        let c = convolve(&a, &b);
        let expected = [0.5, 0.0, -0.5, -3.0];
        for (x, y) in c.iter().zip(expected) {
            assert!((x - y).abs() < 1e-12);
        }
    }
}
