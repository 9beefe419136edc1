//! Decoding methods. Each one derives a real decoding matrix
//! (loudspeakers x SH channels) from a set of loudspeaker directions.

use ndarray::{Array2, ArrayView1};

use crate::building_blocks::matrix::{pinv, spectral_map};
use crate::building_blocks::spherical_harmonics::{fibonacci_sphere_deg, num_sh, real_sh_deg};
use crate::building_blocks::vbap::{unit_vec_deg, Triangulation};
use crate::building_blocks::DecodingMethod;
use crate::error::Result;
use crate::{ALLRAD_GRID_POINTS, NORM_EPS, NORM_GRID_POINTS};

/// SH matrix of a set of directions, one row per direction
pub fn sh_matrix(dirs_deg: &[[f64; 2]], order: usize) -> Array2<f64> {
    let mut y = Array2::<f64>::zeros((dirs_deg.len(), num_sh(order)));
    for (mut row, d) in y.rows_mut().into_iter().zip(dirs_deg.iter()) {
        row.assign(&ArrayView1::from(&real_sh_deg(order, d[0], d[1])[..]));
    }
    y
}

/// a layout counts as 2-D if it (almost) has no elevation at all
pub fn is_2d(dirs_deg: &[[f64; 2]]) -> bool {
    dirs_deg.iter().map(|d| d[1].abs()).sum::<f64>() < 0.01 || dirs_deg.len() < 4
}

/// The layout the decoder is actually computed for. 2-D layouts get two
/// virtual loudspeakers at the poles, which are appended at the end.
/// Returns the number of virtual loudspeakers alongside.
pub fn effective_layout(dirs_deg: &[[f64; 2]]) -> (Vec<[f64; 2]>, usize) {
    let mut dirs = dirs_deg.to_vec();
    if is_2d(dirs_deg) {
        dirs.push([0.0, 90.0]);
        dirs.push([0.0, -90.0]);
        (dirs, 2)
    } else {
        (dirs, 0)
    }
}

impl DecodingMethod {
    /// Whether the method needs to be evaluated for each order separately.
    /// For sampling decoders, truncating the full-order matrix is the same thing.
    pub fn evaluates_per_order(self) -> bool {
        !matches!(self, DecodingMethod::Sad)
    }

    /// decoding matrix for the given directions, num_dirs x num_sh(order)
    pub fn decoding_matrix(self, dirs_deg: &[[f64; 2]], order: usize) -> Result<Array2<f64>> {
        let num_ls = dirs_deg.len() as f64;
        let y = sh_matrix(dirs_deg, order);

        Ok(match self {
            DecodingMethod::Sad => y / num_ls,
            DecodingMethod::Mmd => pinv(&y.t().to_owned()),
            DecodingMethod::Epad => {
                // Y V S⁻¹ Vᵀ, keeping only the non-zero singular values
                let gram = y.t().dot(&y);
                y.dot(&spectral_map(&gram, |l| 1.0 / l.sqrt())) / num_ls.sqrt()
            }
            DecodingMethod::AllRad => {
                // sampling decoder to a dense virtual layout,
                // then vbap from the virtual to the real loudspeakers
                let virt_dirs = fibonacci_sphere_deg(ALLRAD_GRID_POINTS);
                let virt_dec = sh_matrix(&virt_dirs, order) / ALLRAD_GRID_POINTS as f64;

                let triangulation = Triangulation::from_dirs_deg(dirs_deg)?;
                let mut gains_t = Array2::<f64>::zeros((dirs_deg.len(), ALLRAD_GRID_POINTS));
                let mut gains = vec![0.0; dirs_deg.len()];
                for (v, dir) in virt_dirs.iter().enumerate() {
                    triangulation.energy_gains(unit_vec_deg(dir[0], dir[1]), &mut gains);
                    gains_t.column_mut(v).assign(&ArrayView1::from(&gains[..]));
                }

                gains_t.dot(&virt_dec)
            }
        })
    }
}

/**
 * The two normalisation factors of a decoding matrix, [amplitude, energy],
 * from the mean total amplitude and mean total energy it produces for unit
 * plane waves from a quasi-uniform grid of directions.
 */
pub fn normalisation_factors(dec: &Array2<f64>, order: usize) -> [f64; 2] {
    let grid = fibonacci_sphere_deg(NORM_GRID_POINTS);
    let mut mean_amp = 0.0;
    let mut mean_energy = 0.0;

    for dir in grid.iter() {
        let y = real_sh_deg(order, dir[0], dir[1]);
        let gains = dec.dot(&ArrayView1::from(&y[..]));
        mean_amp += gains.sum();
        mean_energy += gains.iter().map(|g| g * g).sum::<f64>();
    }
    mean_amp /= NORM_GRID_POINTS as f64;
    mean_energy /= NORM_GRID_POINTS as f64;

    [1.0 / (mean_amp + NORM_EPS), (1.0 / (mean_energy + NORM_EPS)).sqrt()]
}

// TEST TEST TEST
#[cfg(test)]
mod tests {
    use super::*;
    use crate::building_blocks::layouts::LoudspeakerArrayPreset;

    fn t_design() -> Vec<[f64; 2]> {
        LoudspeakerArrayPreset::TDesign24.dirs_deg()
    }

    #[test]
    fn test_2d_detection() {
        let ring = LoudspeakerArrayPreset::EightRing.dirs_deg();
        assert!(is_2d(&ring));
        let (eff, virt) = effective_layout(&ring);
        assert_eq!(virt, 2);
        assert_eq!(eff.len(), 10);
        assert_eq!(eff[8], [0.0, 90.0]);

        let (eff, virt) = effective_layout(&t_design());
        assert_eq!(virt, 0);
        assert_eq!(eff.len(), 24);
    }

    #[test]
    fn test_ideal_layout_methods_agree() {
        // on a t-design, SAD, MMD and EPAD are the same decoder
        let dirs = t_design();
        for order in 1..=3 {
            let sad = DecodingMethod::Sad.decoding_matrix(&dirs, order).unwrap();
            let mmd = DecodingMethod::Mmd.decoding_matrix(&dirs, order).unwrap();
            let epad = DecodingMethod::Epad.decoding_matrix(&dirs, order).unwrap();
            for r in 0..24 {
                for c in 0..num_sh(order) {
                    assert_approx_eq::assert_approx_eq!(sad[(r, c)], mmd[(r, c)], 0.000001);
                    assert_approx_eq::assert_approx_eq!(sad[(r, c)], epad[(r, c)], 0.000001);
                }
            }
        }
    }

    #[test]
    fn test_allrad_points_at_the_source() {
        let dirs = t_design();
        let dec = DecodingMethod::AllRad.decoding_matrix(&dirs, 3).unwrap();
        assert_eq!(dec.nrows(), 24);
        assert_eq!(dec.ncols(), 16);

        // plane wave from the left, the loudspeaker at (90, 0) is loudest
        let y = real_sh_deg(3, 90.0, 0.0);
        let gains = dec.dot(&ArrayView1::from(&y[..]));
        let loudest = (0..24)
            .max_by(|a, b| gains[*a].total_cmp(&gains[*b]))
            .unwrap();
        assert_eq!(dirs[loudest], [90.0, 0.0]);
    }

    #[test]
    fn test_epad_energy_preservation() {
        // an irregular layout still decodes with direction-independent energy
        // (up to the rank of the layout)
        let dirs = LoudspeakerArrayPreset::Cube.dirs_deg();
        let dec = DecodingMethod::Epad.decoding_matrix(&dirs, 1).unwrap();
        let mut energies = Vec::new();
        for dir in [[0.0, 0.0], [45.0, 35.0], [-120.0, -60.0], [170.0, 10.0]] {
            let gains = dec.dot(&ArrayView1::from(&real_sh_deg(1, dir[0], dir[1])[..]));
            energies.push(gains.iter().map(|g| g * g).sum::<f64>());
        }
        for e in energies.iter() {
            assert_approx_eq::assert_approx_eq!(*e, energies[0], 0.000001);
        }
    }

    #[test]
    fn test_normalisation_factors() {
        let dirs = t_design();
        for order in 1..=3 {
            let dec = DecodingMethod::Sad.decoding_matrix(&dirs, order).unwrap();
            let [amp, energy] = normalisation_factors(&dec, order);
            assert_approx_eq::assert_approx_eq!(amp, 1.0, 0.0001);
            assert_approx_eq::assert_approx_eq!(
                energy * energy,
                24.0 / num_sh(order) as f64,
                0.001
            );
        }
    }
}
