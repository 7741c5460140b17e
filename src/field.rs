//! Transverse field of a bi-Gaussian charge distribution
//!
//! Fields are normalized to a unit line charge: the physical field is the
//! returned value times λ/(2πε0). In that normalization the round-beam
//! field is (1 − e^{−r²/2σ²})·(dx, dy)/r².
//!
//! References:
//! - Bassetti & Erskine, CERN-ISR-TH/80-06 (1980)
//! - Weideman, "Computation of the complex error function", SIAM J. Numer. Anal. 31 (1994)

use num_complex::Complex64;
use std::f64::consts::PI;
use std::sync::OnceLock;

/// Number of terms in the rational expansion of w(z)
const WEIDEMAN_TERMS: usize = 32;
/// Relative size difference below which the round-beam formula is used
const ROUND_TOLERANCE: f64 = 1e-4;
/// Normalized separation below which the field is taken as zero
const SINGULAR_SEPARATION: f64 = 1e-5;

fn weideman_coefficients() -> &'static [f64] {
    static COEFFS: OnceLock<Vec<f64>> = OnceLock::new();
    COEFFS.get_or_init(|| {
        let n = WEIDEMAN_TERMS;
        let m = 2 * n;
        let l = (n as f64 / 2f64.sqrt()).sqrt();
        let samples: Vec<(f64, f64)> = (1 - m as i64..m as i64)
            .map(|k| {
                let theta = k as f64 * PI / m as f64;
                let t = l * (theta / 2.0).tan();
                (theta, (-t * t).exp() * (l * l + t * t))
            })
            .collect();
        (1..=n)
            .map(|order| {
                samples
                    .iter()
                    .map(|&(theta, f)| f * (order as f64 * theta).cos())
                    .sum::<f64>()
                    / (2 * m) as f64
            })
            .collect()
    })
}

/// Faddeeva function w(z) = e^{−z²} erfc(−iz).
///
/// Weideman's rational expansion in the upper half plane, reflected with
/// w(z) = 2e^{−z²} − w(−z) below the real axis.
pub fn faddeeva(z: Complex64) -> Complex64 {
    if z.im < 0.0 {
        return 2.0 * (-z * z).exp() - faddeeva(-z);
    }
    let coeffs = weideman_coefficients();
    let l = (WEIDEMAN_TERMS as f64 / 2f64.sqrt()).sqrt();
    let i = Complex64::i();
    let denom = l - i * z;
    let zeta = (l + i * z) / denom;
    // Horner, highest order first
    let p = coeffs
        .iter()
        .rev()
        .fold(Complex64::new(0.0, 0.0), |acc, &a| acc * zeta + a);
    2.0 * p / (denom * denom) + 1.0 / (PI.sqrt() * denom)
}

/// Field of a round Gaussian (σ taken as the mean of both sizes)
pub fn gaussian_field(dx: f64, dy: f64, sigma_x: f64, sigma_y: f64) -> (f64, f64) {
    let r2 = dx * dx + dy * dy;
    if r2 == 0.0 {
        return (0.0, 0.0);
    }
    let sigma = 0.5 * (sigma_x + sigma_y);
    let factor = (1.0 - (-r2 / (2.0 * sigma * sigma)).exp()) / r2;
    (factor * dx, factor * dy)
}

/// Bassetti-Erskine field for σx > σy
pub fn bassetti_erskine(dx: f64, dy: f64, sigma_x: f64, sigma_y: f64) -> (f64, f64) {
    let (x, y) = (dx.abs(), dy.abs());
    let s = (2.0 * (sigma_x * sigma_x - sigma_y * sigma_y)).sqrt();
    let z1 = Complex64::new(x / s, y / s);
    let z2 = Complex64::new(x * sigma_y / sigma_x / s, y * sigma_x / sigma_y / s);
    let gauss = (-x * x / (2.0 * sigma_x * sigma_x) - y * y / (2.0 * sigma_y * sigma_y)).exp();
    let w = (faddeeva(z1) - gauss * faddeeva(z2)) * (PI.sqrt() / s);
    (w.im.copysign(dx), w.re.copysign(dy))
}

/// Field at (dx, dy) from a source of RMS sizes (σx, σy), choosing the
/// round or elliptical formula from the size ratio.
pub fn beam_field(dx: f64, dy: f64, sigma_x: f64, sigma_y: f64) -> (f64, f64) {
    if !(sigma_x > 0.0 && sigma_y > 0.0) {
        // point source
        let r2 = dx * dx + dy * dy;
        if r2 == 0.0 {
            return (0.0, 0.0);
        }
        return (dx / r2, dy / r2);
    }
    if dx.abs() / sigma_x + dy.abs() / sigma_y < SINGULAR_SEPARATION {
        return (0.0, 0.0);
    }
    let ratio = (sigma_x - sigma_y) / sigma_y;
    if ratio > ROUND_TOLERANCE {
        bassetti_erskine(dx, dy, sigma_x, sigma_y)
    } else if ratio < -ROUND_TOLERANCE {
        let (ey, ex) = bassetti_erskine(dy, dx, sigma_y, sigma_x);
        (ex, ey)
    } else {
        gaussian_field(dx, dy, sigma_x, sigma_y)
    }
}
