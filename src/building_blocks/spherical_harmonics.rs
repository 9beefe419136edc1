//! Real spherical harmonics in ACN channel order with N3D normalisation
//! (no Condon-Shortley phase), plus the little helpers that go along with them.

use crate::building_blocks::{ChannelOrder, NormType};

/// number of spherical harmonic channels for a given order, (order + 1)²
#[inline(always)]
pub fn num_sh(order: usize) -> usize {
    (order + 1) * (order + 1)
}

/// (n - m)! / (n + m)!
fn factorial_ratio(n: usize, m: usize) -> f64 {
    let mut ratio = 1.0;
    for k in (n - m + 1)..=(n + m) {
        ratio /= k as f64;
    }
    ratio
}

/// associated legendre function P_n^m(x), without the Condon-Shortley phase.
/// `s` is sqrt(1 - x²), passed in because the caller already has it.
fn assoc_legendre(n: usize, m: usize, x: f64, s: f64) -> f64 {
    let mut pmm = 1.0;
    let mut fact = 1.0;
    for _ in 0..m {
        pmm *= fact * s;
        fact += 2.0;
    }
    if n == m {
        return pmm;
    }

    let mut pmmp1 = x * (2 * m + 1) as f64 * pmm;
    if n == m + 1 {
        return pmmp1;
    }

    for l in (m + 2)..=n {
        let pll = ((2 * l - 1) as f64 * x * pmmp1 - (l + m - 1) as f64 * pmm) / (l - m) as f64;
        pmm = pmmp1;
        pmmp1 = pll;
    }
    pmmp1
}

/// Evaluates all real spherical harmonics up to `order` for one direction.
///
/// Angles are in radians, elevation measured from the horizontal plane.
/// `y` needs at least `num_sh(order)` elements.
pub fn real_sh(order: usize, azi: f64, elev: f64, y: &mut [f64]) {
    let x = elev.sin();
    let s = elev.cos().max(0.0);

    for n in 0..=order {
        let acn_centre = n * n + n;
        for m in 0..=n {
            let p = assoc_legendre(n, m, x, s);
            if m == 0 {
                y[acn_centre] = ((2 * n + 1) as f64).sqrt() * p;
            } else {
                let norm = (2.0 * (2 * n + 1) as f64 * factorial_ratio(n, m)).sqrt();
                y[acn_centre + m] = norm * p * (m as f64 * azi).cos();
                y[acn_centre - m] = norm * p * (m as f64 * azi).sin();
            }
        }
    }
}

/// same as `real_sh`, but takes degrees and returns a fresh vector
pub fn real_sh_deg(order: usize, azi_deg: f64, elev_deg: f64) -> Vec<f64> {
    let mut y = vec![0.0; num_sh(order)];
    real_sh(order, azi_deg.to_radians(), elev_deg.to_radians(), &mut y);
    y
}

/// legendre polynomial P_n(x)
fn legendre(n: usize, x: f64) -> f64 {
    let mut p_prev = 1.0;
    if n == 0 {
        return p_prev;
    }
    let mut p = x;
    for l in 2..=n {
        let p_next = ((2 * l - 1) as f64 * x * p - (l - 1) as f64 * p_prev) / l as f64;
        p_prev = p;
        p = p_next;
    }
    p
}

/// Largest root of P_{order+1}, found by newton iteration
/// from the usual closed-form approximation.
fn max_re_root(order: usize) -> f64 {
    let n = order + 1;
    let mut x = (137.9_f64.to_radians() / (order as f64 + 1.51)).cos();
    for _ in 0..50 {
        let p = legendre(n, x);
        let dp = n as f64 * (x * p - legendre(n - 1, x)) / (x * x - 1.0);
        let step = p / dp;
        x -= step;
        if step.abs() < 1e-14 {
            break;
        }
    }
    x
}

/// The diagonal of the (order+1)² x (order+1)² maxRE weighting matrix.
///
/// Each degree n gets the weight P_n(r_E), repeated for its 2n+1 channels,
/// with r_E being the largest root of P_{order+1}.
pub fn max_re_weights(order: usize) -> Vec<f64> {
    let r_e = max_re_root(order);
    let mut weights = Vec::with_capacity(num_sh(order));
    for n in 0..=order {
        let w = legendre(n, r_e);
        for _ in 0..(2 * n + 1) {
            weights.push(w);
        }
    }
    weights
}

/// Quasi-uniform set of directions on the sphere (fibonacci lattice),
/// as [azimuth, elevation] pairs in degrees.
pub fn fibonacci_sphere_deg(num_points: usize) -> Vec<[f64; 2]> {
    let golden_angle = std::f64::consts::PI * (3.0 - 5.0_f64.sqrt());
    (0..num_points)
        .map(|i| {
            let z = 1.0 - 2.0 * (i as f64 + 0.5) / num_points as f64;
            let azi = (i as f64 * golden_angle).sin().atan2((i as f64 * golden_angle).cos());
            [azi.to_degrees(), z.asin().to_degrees()]
        })
        .collect()
}

/**
 * Converts a block of ambisonic signals, in-place, from the host's convention
 * to the internal one (ACN / N3D). FuMa ordering and normalisation are only defined
 * for first order, so higher-order channels pass through untouched in that case.
 */
pub fn convert_to_acn_n3d(
    channels: &mut [Vec<f32>],
    num_sh_channels: usize,
    ch_order: ChannelOrder,
    norm: NormType,
) {
    let num_sh_channels = num_sh_channels.min(channels.len());

    if let ChannelOrder::Fuma = ch_order {
        if num_sh_channels >= 4 {
            // W X Y Z -> W Y Z X
            let (_, rest) = channels.split_at_mut(1);
            let (x, rest) = rest.split_at_mut(1);
            let (y, rest) = rest.split_at_mut(1);
            let z = &mut rest[0];
            for s in 0..x[0].len() {
                let tmp_x = x[0][s];
                x[0][s] = y[0][s];
                y[0][s] = z[s];
                z[s] = tmp_x;
            }
        }
    }

    match norm {
        NormType::N3d => {}
        NormType::Sn3d => {
            for (ch, samples) in channels.iter_mut().enumerate().take(num_sh_channels) {
                let degree = (ch as f32).sqrt().floor() as usize;
                if degree > 0 {
                    let gain = ((2 * degree + 1) as f32).sqrt();
                    samples.iter_mut().for_each(|s| *s *= gain);
                }
            }
        }
        NormType::Fuma => {
            if num_sh_channels >= 4 {
                channels[0]
                    .iter_mut()
                    .for_each(|s| *s *= std::f32::consts::SQRT_2);
                for samples in channels.iter_mut().take(4).skip(1) {
                    samples.iter_mut().for_each(|s| *s *= 3.0_f32.sqrt());
                }
            }
        }
    }
}
