use ndarray::{s, Array1, Array2, ArrayView2};
use num_complex::*;

use crate::building_blocks::decoders::{effective_layout, normalisation_factors, sh_matrix};
use crate::building_blocks::spherical_harmonics::{max_re_weights, num_sh};
use crate::building_blocks::{DecoderConfig, DecoderSlot, DecodingMethod, DiffuseFieldEq};
use crate::MAX_ORDER;

/// offset of the order-`order` matrix in an arena for `num_ls` loudspeakers
fn arena_offset(num_ls: usize, order: usize) -> usize {
    num_ls * (1..order).map(num_sh).sum::<usize>()
}

/**
 * All decoding matrices of one decoder slot, for every order from 1 up to
 * the master order, in one contiguous block each (sized for the maximum order).
 * Matrices are stored row-major, loudspeakers x SH channels.
 */
#[derive(Clone, Debug)]
pub struct DecoderArena {
    num_ls: usize,
    live_orders: usize,
    dec: Vec<f32>,
    dec_max_re: Vec<f32>,
    dec_cmplx: Vec<Complex<f32>>,
    dec_cmplx_max_re: Vec<Complex<f32>>,
    norm: [[f32; 2]; MAX_ORDER],
}

impl DecoderArena {
    pub fn new(num_ls: usize) -> Self {
        let size = arena_offset(num_ls, MAX_ORDER + 1);
        DecoderArena {
            num_ls,
            live_orders: 0,
            dec: vec![0.0; size],
            dec_max_re: vec![0.0; size],
            dec_cmplx: vec![Complex::new(0.0, 0.0); size],
            dec_cmplx_max_re: vec![Complex::new(0.0, 0.0); size],
            norm: [[1.0; 2]; MAX_ORDER],
        }
    }

    fn range(&self, order: usize) -> std::ops::Range<usize> {
        let start = arena_offset(self.num_ls, order);
        start..start + self.num_ls * num_sh(order)
    }

    /// store the matrices of one order, which have to be num_ls x num_sh(order)
    pub fn store(
        &mut self,
        order: usize,
        dec: ArrayView2<f64>,
        dec_max_re: ArrayView2<f64>,
        norm: [f64; 2],
    ) {
        let range = self.range(order);
        for (i, (d, m)) in dec.iter().zip(dec_max_re.iter()).enumerate() {
            let idx = range.start + i;
            self.dec[idx] = *d as f32;
            self.dec_max_re[idx] = *m as f32;
            self.dec_cmplx[idx] = Complex::new(*d as f32, 0.0);
            self.dec_cmplx_max_re[idx] = Complex::new(*m as f32, 0.0);
        }
        self.norm[order - 1] = [norm[0] as f32, norm[1] as f32];
        self.live_orders = self.live_orders.max(order);
    }

    pub fn num_loudspeakers(&self) -> usize {
        self.num_ls
    }

    pub fn live_orders(&self) -> usize {
        self.live_orders
    }

    pub fn matrix(&self, order: usize, max_re: bool) -> &[f32] {
        let range = self.range(order);
        if max_re {
            &self.dec_max_re[range]
        } else {
            &self.dec[range]
        }
    }

    #[inline(always)]
    pub fn matrix_cmplx(&self, order: usize, max_re: bool) -> &[Complex<f32>] {
        let range = self.range(order);
        if max_re {
            &self.dec_cmplx_max_re[range]
        } else {
            &self.dec_cmplx[range]
        }
    }

    /// [amplitude, energy] normalisation of the order-`order` decoder
    pub fn norm(&self, order: usize) -> [f32; 2] {
        self.norm[order - 1]
    }

    #[inline(always)]
    pub fn norm_for(&self, order: usize, eq: DiffuseFieldEq) -> f32 {
        match eq {
            DiffuseFieldEq::AmplitudePreserving => self.norm[order - 1][0],
            DiffuseFieldEq::EnergyPreserving => self.norm[order - 1][1],
        }
    }
}

/// the real decoding matrix for one order, falling back to sampling if the
/// layout can't be triangulated
fn decoding_matrix(method: DecodingMethod, dirs_deg: &[[f64; 2]], order: usize) -> Array2<f64> {
    match method.decoding_matrix(dirs_deg, order) {
        Ok(dec) => dec,
        Err(e) => {
            log::warn!("{method:?} decoder failed ({e}), using a sampling decoder instead");
            sh_matrix(dirs_deg, order) / dirs_deg.len() as f64
        }
    }
}

/**
 * Computes the decoders of one slot for all orders up to `master_order`.
 * `progress` is called with the fraction of orders done.
 */
pub fn synthesise_slot(
    dirs_deg: &[[f64; 2]],
    master_order: usize,
    config: &DecoderConfig,
    mut progress: impl FnMut(f32),
) -> DecoderArena {
    let num_ls = dirs_deg.len();
    let (eff_dirs, num_virtual) = effective_layout(dirs_deg);
    if num_virtual > 0 {
        log::info!("2-D layout, adding {num_virtual} virtual loudspeakers");
    }

    let mut arena = DecoderArena::new(num_ls);

    let full = if config.method.evaluates_per_order() {
        None
    } else {
        Some(decoding_matrix(config.method, &eff_dirs, master_order))
    };

    for order in 1..=master_order {
        let dec = match &full {
            Some(full) => full.slice(s![.., ..num_sh(order)]).to_owned(),
            None => decoding_matrix(config.method, &eff_dirs, order),
        };
        let dec_max_re = &dec * &Array1::from(max_re_weights(order));
        let norm = normalisation_factors(&dec, order);

        // virtual loudspeakers are at the end
        arena.store(
            order,
            dec.slice(s![..num_ls, ..]),
            dec_max_re.slice(s![..num_ls, ..]),
            norm,
        );
        progress(order as f32 / master_order as f32);
    }

    arena
}

/// both slots, low and high
pub fn synthesise_decoders(
    dirs_deg: &[[f64; 2]],
    master_order: usize,
    configs: &[DecoderConfig; 2],
    mut progress: impl FnMut(f32),
) -> [DecoderArena; 2] {
    let low = synthesise_slot(
        dirs_deg,
        master_order,
        &configs[DecoderSlot::Low.index()],
        |p| progress(0.5 * p),
    );
    let high = synthesise_slot(
        dirs_deg,
        master_order,
        &configs[DecoderSlot::High.index()],
        |p| progress(0.5 + 0.5 * p),
    );
    [low, high]
}

// TEST TEST TEST
#[cfg(test)]
mod tests {
    use super::*;
    use crate::building_blocks::spherical_harmonics::{fibonacci_sphere_deg, real_sh_deg};
    use crate::building_blocks::LoudspeakerArrayPreset;
    use crate::NORM_GRID_POINTS;

    fn config(method: DecodingMethod) -> [DecoderConfig; 2] {
        [
            DecoderConfig {
                method,
                ..DecoderConfig::default_for(DecoderSlot::Low)
            },
            DecoderConfig {
                method,
                ..DecoderConfig::default_for(DecoderSlot::High)
            },
        ]
    }

    fn gains(arena: &DecoderArena, order: usize, dir: [f64; 2]) -> Vec<f32> {
        let y = real_sh_deg(order, dir[0], dir[1]);
        let dec = arena.matrix(order, false);
        let nsh = num_sh(order);
        (0..arena.num_loudspeakers())
            .map(|ls| (0..nsh).map(|k| dec[ls * nsh + k] * y[k] as f32).sum())
            .collect()
    }

    #[test]
    fn test_normalisation_on_ideal_layout() {
        let dirs = LoudspeakerArrayPreset::TDesign24.dirs_deg();
        let grid = fibonacci_sphere_deg(NORM_GRID_POINTS);

        for method in [DecodingMethod::Sad, DecodingMethod::Mmd] {
            let arenas = synthesise_decoders(&dirs, 3, &config(method), |_| {});
            for arena in arenas.iter() {
                assert_eq!(arena.live_orders(), 3);
                for order in 1..=3 {
                    let [amp_norm, energy_norm] = arena.norm(order);
                    for dir in grid.iter().step_by(7) {
                        let g = gains(arena, order, *dir);
                        let amp: f32 = g.iter().sum();
                        let energy: f32 = g.iter().map(|x| x * x).sum();
                        assert_approx_eq::assert_approx_eq!(amp * amp_norm, 1.0, 0.001);
                        assert_approx_eq::assert_approx_eq!(
                            energy,
                            num_sh(order) as f32 / 24.0,
                            0.0001
                        );
                        assert_approx_eq::assert_approx_eq!(
                            energy * energy_norm * energy_norm,
                            1.0,
                            0.001
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_mean_amplitude_normalisation_on_any_layout() {
        let dirs = LoudspeakerArrayPreset::TwentyTwoPointTwo.dirs_deg();
        let grid = fibonacci_sphere_deg(NORM_GRID_POINTS);
        for method in [DecodingMethod::Epad, DecodingMethod::AllRad] {
            let arenas = synthesise_decoders(&dirs, 2, &config(method), |_| {});
            for order in 1..=2 {
                let mean_amp: f32 = grid
                    .iter()
                    .map(|d| gains(&arenas[0], order, *d).iter().sum::<f32>())
                    .sum::<f32>()
                    / NORM_GRID_POINTS as f32;
                assert_approx_eq::assert_approx_eq!(mean_amp * arenas[0].norm(order)[0], 1.0, 0.001);
            }
        }
    }

    #[test]
    fn test_virtual_loudspeakers_are_stripped() {
        let dirs = LoudspeakerArrayPreset::FivePointX.dirs_deg();
        for method in [
            DecodingMethod::Sad,
            DecodingMethod::Mmd,
            DecodingMethod::Epad,
            DecodingMethod::AllRad,
        ] {
            let arenas = synthesise_decoders(&dirs, 3, &config(method), |_| {});
            for arena in arenas.iter() {
                assert_eq!(arena.num_loudspeakers(), 5);
                for order in 1..=3 {
                    assert_eq!(arena.matrix(order, false).len(), 5 * num_sh(order));
                    assert_eq!(arena.matrix_cmplx(order, true).len(), 5 * num_sh(order));
                }
            }
        }
    }

    #[test]
    fn test_max_re_and_complex_twins() {
        let dirs = LoudspeakerArrayPreset::Dodecahedron.dirs_deg();
        let arenas = synthesise_decoders(&dirs, 2, &config(DecodingMethod::AllRad), |_| {});
        let w = max_re_weights(2);
        let plain = arenas[1].matrix(2, false);
        let weighted = arenas[1].matrix(2, true);
        let cmplx = arenas[1].matrix_cmplx(2, true);
        for ls in 0..20 {
            for k in 0..9 {
                let i = ls * 9 + k;
                assert_approx_eq::assert_approx_eq!(weighted[i], plain[i] * w[k] as f32, 0.00001);
                assert_approx_eq::assert_approx_eq!(cmplx[i].re, weighted[i], 0.00001);
                assert_approx_eq::assert_approx_eq!(cmplx[i].im, 0.0, 0.00001);
            }
        }
    }

    #[test]
    fn test_progress_reaches_one() {
        let dirs = LoudspeakerArrayPreset::Cube.dirs_deg();
        let mut last = 0.0;
        synthesise_decoders(&dirs, 2, &config(DecodingMethod::Sad), |p| {
            assert!(p >= last);
            last = p;
        });
        assert_approx_eq::assert_approx_eq!(last, 1.0, 0.000001);
    }
}
