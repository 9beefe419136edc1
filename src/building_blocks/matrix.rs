//! The bits of linear algebra the decoders need on top of `ndarray`.
//! Only used on the synthesis side, where everything is double precision.

use ndarray::{Array1, Array2};

/// Eigen-decomposition of a symmetric matrix (cyclic jacobi).
/// Returns the eigenvalues and a matrix holding the eigenvectors as columns.
pub fn symmetric_eigen(a: &Array2<f64>) -> (Vec<f64>, Array2<f64>) {
    debug_assert!(a.is_square());
    let n = a.nrows();
    let mut a = a.clone();
    let mut v = Array2::<f64>::eye(n);

    let total: f64 = a.iter().map(|x| x * x).sum();

    for _ in 0..100 {
        let mut off = 0.0;
        for p in 0..n {
            for q in (p + 1)..n {
                off += a[(p, q)] * a[(p, q)];
            }
        }
        if off <= total * 1e-26 || off == 0.0 {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[(p, q)];
                if apq.abs() < f64::MIN_POSITIVE {
                    continue;
                }
                let theta = (a[(q, q)] - a[(p, p)]) / (2.0 * apq);
                let t = if theta >= 0.0 {
                    1.0 / (theta + (theta * theta + 1.0).sqrt())
                } else {
                    -1.0 / (-theta + (theta * theta + 1.0).sqrt())
                };
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[(k, p)];
                    let akq = a[(k, q)];
                    a[(k, p)] = c * akp - s * akq;
                    a[(k, q)] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[(p, k)];
                    let aqk = a[(q, k)];
                    a[(p, k)] = c * apk - s * aqk;
                    a[(q, k)] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[(k, p)];
                    let vkq = v[(k, q)];
                    v[(k, p)] = c * vkp - s * vkq;
                    v[(k, q)] = s * vkp + c * vkq;
                }
            }
        }
    }

    (a.diag().to_vec(), v)
}

/// relative threshold below which eigenvalues of a gram matrix count as zero
const RANK_TOLERANCE: f64 = 1e-10;

/// Applies f(λ) to the non-negligible eigenvalues of a symmetric positive
/// semi-definite matrix, zeroing the rest: V f(Λ) Vᵀ.
pub fn spectral_map(gram: &Array2<f64>, f: impl Fn(f64) -> f64) -> Array2<f64> {
    let (eigvals, eigvecs) = symmetric_eigen(gram);
    let max_eig = eigvals.iter().cloned().fold(0.0, f64::max);

    let mapped: Array1<f64> = eigvals
        .iter()
        .map(|l| {
            if *l <= max_eig * RANK_TOLERANCE || *l <= 0.0 {
                0.0
            } else {
                f(*l)
            }
        })
        .collect();

    // scales column k of V by f(λ_k)
    (&eigvecs * &mapped).dot(&eigvecs.t())
}

/// Moore-Penrose pseudo-inverse, via the smaller of the two gram matrices.
pub fn pinv(a: &Array2<f64>) -> Array2<f64> {
    let at = a.t();
    if a.nrows() >= a.ncols() {
        // (AᵀA)⁺ Aᵀ
        spectral_map(&at.dot(a), |l| 1.0 / l).dot(&at)
    } else {
        // Aᵀ (AAᵀ)⁺
        at.dot(&spectral_map(&a.dot(&at), |l| 1.0 / l))
    }
}

// TEST TEST TEST
#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_eigen_reconstruction() {
        let a = array![[4.0, 1.0, 0.5], [1.0, 3.0, -0.2], [0.5, -0.2, 1.0]];
        let (vals, vecs) = symmetric_eigen(&a);

        // A v = λ v for every pair
        let av = a.dot(&vecs);
        for k in 0..3 {
            for r in 0..3 {
                assert_approx_eq::assert_approx_eq!(av[(r, k)], vals[k] * vecs[(r, k)], 0.0000001);
            }
        }
        // trace is preserved
        assert_approx_eq::assert_approx_eq!(vals.iter().sum::<f64>(), 8.0, 0.0000001);
    }

    #[test]
    fn test_pinv_wide_and_tall() {
        let a = array![[1.0, 2.0, 0.0, 1.0], [0.0, 1.0, 1.0, -1.0]];

        for m in [a.clone(), a.t().to_owned()] {
            let p = pinv(&m);
            // A A⁺ A = A
            let back = m.dot(&p).dot(&m);
            for ((r, c), x) in m.indexed_iter() {
                assert_approx_eq::assert_approx_eq!(back[(r, c)], *x, 0.000001);
            }
        }
    }

    #[test]
    fn test_pinv_rank_deficient() {
        // second row is a multiple of the first
        let a = array![[1.0, 2.0], [2.0, 4.0], [0.0, 0.0]];
        let p = pinv(&a);
        let back = a.dot(&p).dot(&a);
        for ((r, c), x) in a.indexed_iter() {
            assert_approx_eq::assert_approx_eq!(back[(r, c)], *x, 0.000001);
        }
    }
}
