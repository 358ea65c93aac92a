//! Covariance kernels for Kriging models.
//!
//! A [`Kernel`] is a pure function of two feature vectors producing a scalar
//! similarity. Base kernels (RBF, cyclic RBF, constant) are composed
//! elementwise via [`Kernel::Sum`] and [`Kernel::Product`], as declared by the
//! `composition` directive of a model file (see [`crate::expression`]).
//!
//! Kernels are constructed once when a model file is parsed and are immutable
//! thereafter: their parameters come from an externally trained file and are
//! never refit here.
//!
//! # Active dimensions
//!
//! A base kernel operates on a subset of the feature vector, its *active
//! dimensions*. The global feature layout is encoded entirely in how the
//! model file declares named kernels over disjoint dimension ranges; a kernel
//! knows nothing beyond the dimensions it was built with.

use nalgebra::{DMatrix, DVector};

/// A composable covariance kernel.
#[derive(Debug, Clone)]
pub enum Kernel {
    /// Squared-exponential kernel with per-dimension inverse-squared
    /// lengthscales: `k(xi, xj) = exp(-Σ_d θ_d (xi_d - xj_d)²)`.
    Rbf {
        /// Inverse-squared lengthscale per active dimension.
        theta: DVector<f64>,
        /// Feature-vector indices this kernel operates on.
        active_dims: Vec<usize>,
    },
    /// RBF over features some of which are angles on `[-π, π)`: differences
    /// along cyclic dimensions are wrapped before squaring.
    RbfCyclic {
        /// Inverse-squared lengthscale per active dimension.
        theta: DVector<f64>,
        /// Feature-vector indices this kernel operates on.
        active_dims: Vec<usize>,
        /// Positions within `active_dims` that are cyclic.
        cyclic_dims: Vec<usize>,
        /// Per-active-dimension standardization scale. When present, the wrap
        /// period and center are divided by the scale because the feature
        /// values were standardized upstream.
        scale: Option<DVector<f64>>,
    },
    /// Constant-valued kernel, `k(xi, xj) = value` for all inputs.
    Constant {
        /// The constant value.
        value: f64,
    },
    /// Elementwise sum of two kernels.
    Sum(Box<Kernel>, Box<Kernel>),
    /// Elementwise product of two kernels.
    Product(Box<Kernel>, Box<Kernel>),
}

/// Wrap a difference into `[-period/2, period/2)` around zero.
///
/// For an unscaled angle this is `(|diff| + π) mod 2π − π`; with a
/// standardization scale `s`, period and center become `2π/s` and `π/s`.
fn wrap_cyclic(diff: f64, scale: f64) -> f64 {
    let half = std::f64::consts::PI / scale;
    (diff.abs() + half).rem_euclid(2.0 * half) - half
}

impl Kernel {
    /// Evaluate the kernel for two full feature vectors.
    pub fn k(&self, xi: &DVector<f64>, xj: &DVector<f64>) -> f64 {
        match self {
            Kernel::Rbf { theta, active_dims } => {
                let mut acc = 0.0;
                for (local, &dim) in active_dims.iter().enumerate() {
                    let diff = xi[dim] - xj[dim];
                    acc += theta[local] * diff * diff;
                }
                (-acc).exp()
            }
            Kernel::RbfCyclic {
                theta,
                active_dims,
                cyclic_dims,
                scale,
            } => {
                let mut acc = 0.0;
                for (local, &dim) in active_dims.iter().enumerate() {
                    let mut diff = xi[dim] - xj[dim];
                    if cyclic_dims.contains(&local) {
                        let s = scale.as_ref().map_or(1.0, |s| s[local]);
                        diff = wrap_cyclic(diff, s);
                    }
                    acc += theta[local] * diff * diff;
                }
                (-acc).exp()
            }
            Kernel::Constant { value } => *value,
            Kernel::Sum(a, b) => a.k(xi, xj) + b.k(xi, xj),
            Kernel::Product(a, b) => a.k(xi, xj) * b.k(xi, xj),
        }
    }

    /// Evaluate the kernel between one point and every training row,
    /// producing a column vector of length `x.nrows()`.
    pub fn r(&self, point: &DVector<f64>, x: &DMatrix<f64>) -> DVector<f64> {
        DVector::from_fn(x.nrows(), |i, _| {
            let row = x.row(i).transpose();
            self.k(point, &row)
        })
    }

    /// Evaluate the kernel pairwise over the whole training set.
    ///
    /// For RBF variants only the upper triangle is computed, the symmetric
    /// entries are mirrored, and the diagonal is fixed at 1.0. Constant
    /// kernels fill the matrix with their value; compositions combine their
    /// children's matrices elementwise.
    pub fn r_matrix(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        let n = x.nrows();
        match self {
            Kernel::Rbf { .. } | Kernel::RbfCyclic { .. } => {
                let mut r = DMatrix::identity(n, n);
                for i in 0..n {
                    let xi = x.row(i).transpose();
                    for j in (i + 1)..n {
                        let xj = x.row(j).transpose();
                        let v = self.k(&xi, &xj);
                        r[(i, j)] = v;
                        r[(j, i)] = v;
                    }
                }
                r
            }
            Kernel::Constant { value } => DMatrix::from_element(n, n, *value),
            Kernel::Sum(a, b) => a.r_matrix(x) + b.r_matrix(x),
            Kernel::Product(a, b) => a.r_matrix(x).component_mul(&b.r_matrix(x)),
        }
    }

    /// Concatenated parameter vector of this kernel (introspection only).
    pub fn params(&self) -> Vec<f64> {
        match self {
            Kernel::Rbf { theta, .. } | Kernel::RbfCyclic { theta, .. } => {
                theta.iter().copied().collect()
            }
            Kernel::Constant { value } => vec![*value],
            Kernel::Sum(a, b) | Kernel::Product(a, b) => {
                let mut p = a.params();
                p.extend(b.params());
                p
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn rbf(theta: &[f64]) -> Kernel {
        Kernel::Rbf {
            theta: DVector::from_row_slice(theta),
            active_dims: (0..theta.len()).collect(),
        }
    }

    #[test]
    fn test_rbf_is_one_at_equal_inputs() {
        let k = rbf(&[0.5, 2.0]);
        let x = DVector::from_row_slice(&[0.3, -1.2]);
        assert!((k.k(&x, &x) - 1.0).abs() < 1e-15);
    }

    #[test]
    fn test_rbf_matches_formula() {
        let k = rbf(&[0.5, 2.0]);
        let a = DVector::from_row_slice(&[1.0, 0.0]);
        let b = DVector::from_row_slice(&[0.0, 1.0]);
        let expected = (-(0.5_f64 * 1.0 + 2.0 * 1.0)).exp();
        assert!((k.k(&a, &b) - expected).abs() < 1e-15);
    }

    #[test]
    fn test_r_matrix_symmetric_with_unit_diagonal() {
        let k = rbf(&[1.0, 1.0]);
        let x = DMatrix::from_row_slice(3, 2, &[0.0, 0.0, 1.0, 0.5, -0.3, 2.0]);
        let r = k.r_matrix(&x);
        for i in 0..3 {
            assert!((r[(i, i)] - 1.0).abs() < 1e-15);
            for j in 0..3 {
                assert!((r[(i, j)] - r[(j, i)]).abs() < 1e-15);
            }
        }
    }

    #[test]
    fn test_cyclic_periodicity_round_trip() {
        let k = Kernel::RbfCyclic {
            theta: DVector::from_row_slice(&[0.7]),
            active_dims: vec![0],
            cyclic_dims: vec![0],
            scale: None,
        };
        let a = DVector::from_row_slice(&[0.4]);
        let b = DVector::from_row_slice(&[0.4 + 2.0 * PI]);
        let c = DVector::from_row_slice(&[-1.0]);
        assert!((k.k(&a, &b) - 1.0).abs() < 1e-12);
        assert!((k.k(&a, &c) - k.k(&b, &c)).abs() < 1e-12);
    }

    #[test]
    fn test_cyclic_wrap_with_scale() {
        // A feature standardized by sigma wraps with period 2*pi/sigma.
        let sigma = 2.5;
        let k = Kernel::RbfCyclic {
            theta: DVector::from_row_slice(&[1.3]),
            active_dims: vec![0],
            cyclic_dims: vec![0],
            scale: Some(DVector::from_row_slice(&[sigma])),
        };
        let a = DVector::from_row_slice(&[0.1]);
        let b = DVector::from_row_slice(&[0.1 + 2.0 * PI / sigma]);
        assert!((k.k(&a, &b) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_cyclic_linear_dims_not_wrapped() {
        // Only the listed cyclic dimension wraps; the other behaves as RBF.
        let k = Kernel::RbfCyclic {
            theta: DVector::from_row_slice(&[1.0, 1.0]),
            active_dims: vec![0, 1],
            cyclic_dims: vec![1],
            scale: None,
        };
        let a = DVector::from_row_slice(&[0.0, 0.0]);
        let b = DVector::from_row_slice(&[2.0 * PI, 0.0]);
        // dim 0 is linear, so a 2*pi offset is a genuine distance
        assert!(k.k(&a, &b) < 1e-10);
    }

    #[test]
    fn test_sum_and_product_combine_elementwise() {
        let k1 = rbf(&[1.0]);
        let k2 = Kernel::Constant { value: 0.25 };
        let sum = Kernel::Sum(Box::new(k1.clone()), Box::new(k2.clone()));
        let prod = Kernel::Product(Box::new(k1.clone()), Box::new(k2.clone()));
        let a = DVector::from_row_slice(&[0.0]);
        let b = DVector::from_row_slice(&[1.0]);
        let base = k1.k(&a, &b);
        assert!((sum.k(&a, &b) - (base + 0.25)).abs() < 1e-15);
        assert!((prod.k(&a, &b) - base * 0.25).abs() < 1e-15);

        let x = DMatrix::from_row_slice(2, 1, &[0.0, 1.0]);
        let rs = sum.r_matrix(&x);
        let rp = prod.r_matrix(&x);
        assert!((rs[(0, 1)] - (base + 0.25)).abs() < 1e-15);
        assert!((rp[(0, 1)] - base * 0.25).abs() < 1e-15);
    }

    #[test]
    fn test_params_concatenation() {
        let k = Kernel::Product(
            Box::new(rbf(&[1.0, 2.0])),
            Box::new(Kernel::Constant { value: 3.0 }),
        );
        assert_eq!(k.params(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_constant_r_matrix_filled() {
        let k = Kernel::Constant { value: 0.5 };
        let x = DMatrix::from_row_slice(2, 1, &[0.0, 1.0]);
        let r = k.r_matrix(&x);
        assert!(r.iter().all(|&v| (v - 0.5).abs() < 1e-15));
    }
}
