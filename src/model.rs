//! Single-atom Kriging model: prediction, variance, and analytic
//! leave-one-out cross-validation.
//!
//! A [`Model`] is one trained surrogate for one atom and one scalar property.
//! It holds the training inputs/outputs, a composed covariance [`Kernel`],
//! and the trained weights read verbatim from a model file. This crate never
//! computes weights itself; that is the job of the external optimizer whose
//! output the model files record.
//!
//! All expensive derived quantities (covariance matrix inverse, hat matrix,
//! generalized-least-squares mean, leave-one-out errors) are computed exactly
//! once, at construction. A trained model is never mutated in place; caches
//! are invalidated only by constructing a new object.
//!
//! # Nugget escalation
//!
//! Inversion of the covariance matrix can fail when training rows are near
//! duplicates. Failure is not immediately fatal: a nugget is added to the
//! diagonal, starting at [`NuggetSettings::initial`] and multiplied by ten on
//! every retry while it stays at or below [`NuggetSettings::max`]. Exhausting
//! the ladder is fatal and reports the model identity, the attempted nugget
//! values, and the configured maximum.

use crate::config::NuggetSettings;
use crate::error::{KrigingError, Result};
use crate::kernel::Kernel;
use log::debug;
use nalgebra::{DMatrix, DVector};

/// Which on-disk syntax a model was read from (and will be written back in).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelFormat {
    /// Line-oriented fixed-keyword format (single cyclic-RBF kernel).
    Legacy,
    /// Section-based format with named kernels and a composition directive.
    #[default]
    Updated,
}

/// Feature/target standardization recorded when a model was loaded with
/// `scaling.x standardise`.
///
/// When present, the training data held in memory are already in standardized
/// space; queries are standardized on the way in and predictions
/// de-standardized on the way out.
#[derive(Debug, Clone)]
pub struct Standardization {
    /// Per-feature mean of the raw training inputs.
    pub x_mean: DVector<f64>,
    /// Per-feature standard deviation of the raw training inputs.
    pub x_std: DVector<f64>,
    /// Mean of the raw training outputs.
    pub y_mean: f64,
    /// Standard deviation of the raw training outputs.
    pub y_std: f64,
}

impl Standardization {
    /// Map a raw feature vector into standardized space.
    pub fn standardize_features(&self, features: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(features.len(), |i, _| {
            (features[i] - self.x_mean[i]) / self.x_std[i]
        })
    }

    /// Map a standardized prediction back to raw space.
    pub fn destandardize_value(&self, value: f64) -> f64 {
        value * self.y_std + self.y_mean
    }
}

/// The trained contents of a model, as read from a file.
#[derive(Debug, Clone)]
pub struct ModelData {
    /// Chemical system the model belongs to (e.g. `WATER`).
    pub system_name: String,
    /// Atom the model predicts for (e.g. `O1`).
    pub atom_name: String,
    /// Scalar property the model predicts (e.g. `iqa`).
    pub property_name: String,
    /// Training inputs, `n_train x n_features`. Standardized space when
    /// `standardization` is set.
    pub x: DMatrix<f64>,
    /// Training outputs, length `n_train`. Standardized space when
    /// `standardization` is set.
    pub y: DVector<f64>,
    /// Constant mean of the Kriging model, in the same space as `y`.
    pub mean: f64,
    /// Process variance recorded in the model file; carried as metadata.
    pub sigma_squared: f64,
    /// Composed covariance kernel.
    pub kernel: Kernel,
    /// Trained weights, length `n_train`, read verbatim from the file.
    pub weights: DVector<f64>,
    /// Present when the model file declared standardization.
    pub standardization: Option<Standardization>,
    /// On-disk syntax this model was read from; preserved on write.
    pub format: ModelFormat,
}

/// One trained surrogate for one atom and one scalar property.
#[derive(Debug, Clone)]
pub struct Model {
    /// Trained contents as read from the model file.
    pub data: ModelData,
    inv_r: DMatrix<f64>,
    invr_ones: DVector<f64>,
    ones_invr_ones: f64,
    b_hat: f64,
    cv_errors: DVector<f64>,
    nugget_used: f64,
}

/// Inversion result is treated as failed unless every entry is finite.
fn try_invert(m: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    m.clone()
        .try_inverse()
        .filter(|inv| inv.iter().all(|v| v.is_finite()))
}

fn invert_with_nugget(
    r: &DMatrix<f64>,
    settings: &NuggetSettings,
    identity: &str,
    n_train: usize,
) -> Result<(DMatrix<f64>, f64)> {
    if let Some(inv) = try_invert(r) {
        return Ok((inv, 0.0));
    }

    let eye = DMatrix::<f64>::identity(r.nrows(), r.ncols());
    let mut attempted = Vec::new();
    let mut nugget = settings.initial;
    while nugget <= settings.max {
        attempted.push(nugget);
        debug!("model '{identity}': covariance inversion failed, retrying with nugget {nugget:e}");
        if let Some(inv) = try_invert(&(r + &eye * nugget)) {
            return Ok((inv, nugget));
        }
        nugget *= 10.0;
    }

    Err(KrigingError::SingularCovarianceMatrix {
        model: identity.to_string(),
        n_train,
        attempted,
        max_nugget: settings.max,
    })
}

impl Model {
    /// Build a model from already-parsed contents, computing every derived
    /// quantity (covariance inverse via the nugget ladder, hat matrix, GLS
    /// mean estimate, leave-one-out errors) exactly once.
    ///
    /// # Panics
    ///
    /// Panics if the row counts of `x`, `y`, and `weights` disagree; model
    /// files are validated before reaching this constructor.
    pub fn from_parts(data: ModelData, settings: &NuggetSettings) -> Result<Self> {
        let n = data.x.nrows();
        assert_eq!(data.y.len(), n);
        assert_eq!(data.weights.len(), n);

        let identity = format!(
            "{}/{}/{}",
            data.system_name, data.atom_name, data.property_name
        );

        let r = data.kernel.r_matrix(&data.x);
        let (inv_r, nugget_used) = invert_with_nugget(&r, settings, &identity, n)?;

        let ones = DVector::from_element(n, 1.0);
        let invr_ones = &inv_r * &ones;
        let ones_invr_ones = ones.dot(&invr_ones);

        // Hat matrix: ones (ones^T ones)^-1 ones^T.
        let h = &ones * ones.transpose() / ones.dot(&ones);

        // GLS mean estimate: (ones^T invR ones)^-1 (ones^T invR y).
        let b_hat = invr_ones.dot(&data.y) / ones_invr_ones;

        // Analytic leave-one-out errors, all rows at once.
        let d = &data.y - &ones * b_hat;
        let cv_errors = DVector::from_fn(n, |i, _| {
            let shifted = &d + h.column(i) * (d[i] / h[(i, i)]);
            let e = inv_r.row(i).transpose().dot(&shifted) / inv_r[(i, i)];
            e * e
        });

        Ok(Self {
            data,
            inv_r,
            invr_ones,
            ones_invr_ones,
            b_hat,
            cv_errors,
            nugget_used,
        })
    }

    /// `system/atom/property` identity string used in logs and errors.
    pub fn identity(&self) -> String {
        format!(
            "{}/{}/{}",
            self.data.system_name, self.data.atom_name, self.data.property_name
        )
    }

    /// Atom this model predicts for.
    pub fn atom_name(&self) -> &str {
        &self.data.atom_name
    }

    /// Number of training points.
    pub fn n_train(&self) -> usize {
        self.data.x.nrows()
    }

    /// Number of feature dimensions.
    pub fn n_features(&self) -> usize {
        self.data.x.ncols()
    }

    /// Nugget added to the covariance diagonal at construction (0.0 when
    /// plain inversion succeeded).
    pub fn nugget_used(&self) -> f64 {
        self.nugget_used
    }

    /// Generalized-least-squares estimate of the constant mean.
    pub fn gls_mean(&self) -> f64 {
        self.b_hat
    }

    /// Map raw query features into the model's internal space.
    fn internal_features(&self, features: &DVector<f64>) -> DVector<f64> {
        match &self.data.standardization {
            Some(s) => s.standardize_features(features),
            None => features.clone(),
        }
    }

    /// Predict the property value at a query point.
    ///
    /// Computes `mean + r^T weights` with `r = kernel.r(features, X)`; when
    /// the model is standardized the result is mapped back to raw space.
    pub fn predict(&self, features: &DVector<f64>) -> f64 {
        let q = self.internal_features(features);
        let r = self.data.kernel.r(&q, &self.data.x);
        let value = self.data.mean + r.dot(&self.data.weights);
        match &self.data.standardization {
            Some(s) => s.destandardize_value(value),
            None => value,
        }
    }

    /// Kriging predictive variance at a query point:
    /// `1 - r^T invR r + (1 - ones^T invR r)^2 / (ones^T invR ones)`.
    ///
    /// An underflowing denominator propagates as
    /// [`KrigingError::VarianceBreakdown`] rather than dividing by zero.
    pub fn variance(&self, features: &DVector<f64>) -> Result<f64> {
        let q = self.internal_features(features);
        let r = self.data.kernel.r(&q, &self.data.x);

        let res1 = r.dot(&(&self.inv_r * &r));
        let res2 = 1.0 - self.invr_ones.dot(&r);
        let res3 = self.ones_invr_ones;
        if res3.abs() < f64::EPSILON {
            return Err(KrigingError::VarianceBreakdown {
                model: self.identity(),
                denominator: res3,
            });
        }
        Ok(1.0 - res1 + res2 * res2 / res3)
    }

    /// Analytic leave-one-out cross-validation errors, one per training row.
    pub fn cross_validation(&self) -> &DVector<f64> {
        &self.cv_errors
    }

    /// Euclidean distance (in the model's internal feature space) from a
    /// query point to every training row.
    pub fn distance_to_point(&self, features: &DVector<f64>) -> DVector<f64> {
        let q = self.internal_features(features);
        DVector::from_fn(self.n_train(), |i, _| {
            (self.data.x.row(i).transpose() - &q).norm()
        })
    }

    /// Index of the training row closest to a query point.
    pub fn closest_training_point(&self, features: &DVector<f64>) -> usize {
        let distances = self.distance_to_point(features);
        let mut best = 0;
        for i in 1..distances.len() {
            if distances[i] < distances[best] {
                best = i;
            }
        }
        best
    }

    /// Cross-validation error attributed to a query point: the leave-one-out
    /// error of its nearest training row, together with that row's index.
    pub fn attributed_cv_error(&self, features: &DVector<f64>) -> (usize, f64) {
        let idx = self.closest_training_point(features);
        (idx, self.cv_errors[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rbf_all_dims(theta: &[f64]) -> Kernel {
        Kernel::Rbf {
            theta: DVector::from_row_slice(theta),
            active_dims: (0..theta.len()).collect(),
        }
    }

    /// A small well-conditioned model. Weights are chosen as
    /// invR (y - mean) so the surrogate interpolates its training data,
    /// mirroring what the external optimizer would produce.
    fn toy_model(x: DMatrix<f64>, y: DVector<f64>) -> Model {
        let kernel = rbf_all_dims(&vec![1.0; x.ncols()]);
        let mean = y.mean();
        let r = kernel.r_matrix(&x);
        let inv_r = r.try_inverse().unwrap();
        let weights = &inv_r * (&y - DVector::from_element(y.len(), mean));
        let data = ModelData {
            system_name: "TOY".to_string(),
            atom_name: "O1".to_string(),
            property_name: "iqa".to_string(),
            x,
            y,
            mean,
            sigma_squared: 1.0,
            kernel,
            weights,
            standardization: None,
            format: ModelFormat::Updated,
        };
        Model::from_parts(data, &NuggetSettings::default()).unwrap()
    }

    fn sample_model() -> Model {
        let x = DMatrix::from_row_slice(
            4,
            2,
            &[0.0, 0.0, 1.0, 0.2, 0.3, 1.1, -0.8, 0.5],
        );
        let y = DVector::from_row_slice(&[1.0, 2.0, 0.5, 1.7]);
        toy_model(x, y)
    }

    #[test]
    fn test_predict_interpolates_training_rows() {
        let model = sample_model();
        for i in 0..model.n_train() {
            let xi = model.data.x.row(i).transpose();
            let pred = model.predict(&xi);
            assert!(
                (pred - model.data.y[i]).abs() < 1e-8,
                "row {i}: {pred} vs {}",
                model.data.y[i]
            );
        }
    }

    #[test]
    fn test_variance_near_zero_at_training_rows() {
        let model = sample_model();
        assert_eq!(model.nugget_used(), 0.0);
        for i in 0..model.n_train() {
            let xi = model.data.x.row(i).transpose();
            let var = model.variance(&xi).unwrap();
            assert!(var.abs() < 1e-8, "row {i}: variance {var}");
        }
    }

    #[test]
    fn test_variance_positive_away_from_training_data() {
        let model = sample_model();
        let far = DVector::from_row_slice(&[10.0, -10.0]);
        let var = model.variance(&far).unwrap();
        assert!(var > 0.5, "variance {var} should be large far away");
    }

    #[test]
    fn test_cross_validation_set_invariant_under_permutation() {
        let x = DMatrix::from_row_slice(
            4,
            2,
            &[0.0, 0.0, 1.0, 0.2, 0.3, 1.1, -0.8, 0.5],
        );
        let y = DVector::from_row_slice(&[1.0, 2.0, 0.5, 1.7]);
        let model = toy_model(x.clone(), y.clone());

        // Reverse the row order consistently.
        let perm: Vec<usize> = (0..4).rev().collect();
        let xp = DMatrix::from_fn(4, 2, |i, j| x[(perm[i], j)]);
        let yp = DVector::from_fn(4, |i, _| y[perm[i]]);
        let permuted = toy_model(xp, yp);

        let cv = model.cross_validation();
        let cvp = permuted.cross_validation();
        for i in 0..4 {
            assert!(
                (cv[perm[i]] - cvp[i]).abs() < 1e-9,
                "cv mismatch at {i}: {} vs {}",
                cv[perm[i]],
                cvp[i]
            );
        }
    }

    #[test]
    fn test_nugget_escalation_recovers_duplicate_rows() {
        // Two identical rows make R exactly singular.
        let x = DMatrix::from_row_slice(3, 1, &[0.0, 0.0, 1.0]);
        let y = DVector::from_row_slice(&[1.0, 1.0, 2.0]);
        let kernel = rbf_all_dims(&[1.0]);
        let data = ModelData {
            system_name: "DUP".to_string(),
            atom_name: "O1".to_string(),
            property_name: "iqa".to_string(),
            x,
            y,
            mean: 0.0,
            sigma_squared: 1.0,
            kernel,
            weights: DVector::from_row_slice(&[0.1, 0.1, 0.2]),
            standardization: None,
            format: ModelFormat::Updated,
        };
        let model = Model::from_parts(data, &NuggetSettings::default()).unwrap();
        assert!(model.nugget_used() > 0.0);
    }

    #[test]
    fn test_nugget_escalation_exhaustion_is_fatal() {
        let x = DMatrix::from_row_slice(2, 1, &[0.5, 0.5]);
        let y = DVector::from_row_slice(&[1.0, 1.0]);
        let kernel = rbf_all_dims(&[1.0]);
        let data = ModelData {
            system_name: "DUP".to_string(),
            atom_name: "O1".to_string(),
            property_name: "iqa".to_string(),
            x,
            y,
            mean: 0.0,
            sigma_squared: 1.0,
            kernel,
            weights: DVector::from_row_slice(&[0.1, 0.1]),
            standardization: None,
            format: ModelFormat::Updated,
        };
        // A maximum of zero disables retries, so the first failure is fatal.
        let settings = NuggetSettings {
            initial: 1e-10,
            max: 0.0,
        };
        let err = Model::from_parts(data, &settings).unwrap_err();
        match err {
            KrigingError::SingularCovarianceMatrix {
                model,
                n_train,
                attempted,
                max_nugget,
            } => {
                assert_eq!(model, "DUP/O1/iqa");
                assert_eq!(n_train, 2);
                assert!(attempted.is_empty());
                assert_eq!(max_nugget, 0.0);
            }
            other => panic!("expected SingularCovarianceMatrix, got {other:?}"),
        }
    }

    #[test]
    fn test_distance_and_attribution() {
        let model = sample_model();
        let near_row2 = DVector::from_row_slice(&[0.31, 1.09]);
        let distances = model.distance_to_point(&near_row2);
        assert_eq!(distances.len(), 4);
        assert_eq!(model.closest_training_point(&near_row2), 2);
        let (idx, cv) = model.attributed_cv_error(&near_row2);
        assert_eq!(idx, 2);
        assert!((cv - model.cross_validation()[2]).abs() < 1e-15);
    }

    #[test]
    fn test_standardized_model_round_trips_prediction_space() {
        // Standardize by hand, then check predictions come back in raw space.
        let x_raw = DMatrix::from_row_slice(3, 1, &[1.0, 2.0, 3.0]);
        let y_raw = DVector::from_row_slice(&[10.0, 20.0, 30.0]);
        let x_mean = 2.0;
        let x_std = 1.0;
        let y_mean = 20.0;
        let y_std = (((10.0f64 - 20.0).powi(2) + 0.0 + (30.0f64 - 20.0).powi(2)) / 3.0).sqrt();

        let x = x_raw.map(|v| (v - x_mean) / x_std);
        let y = y_raw.map(|v| (v - y_mean) / y_std);
        let kernel = rbf_all_dims(&[1.0]);
        let r = kernel.r_matrix(&x);
        let weights = r.try_inverse().unwrap() * &y;
        let data = ModelData {
            system_name: "STD".to_string(),
            atom_name: "O1".to_string(),
            property_name: "q00".to_string(),
            x,
            y,
            mean: 0.0,
            sigma_squared: 1.0,
            kernel,
            weights,
            standardization: Some(Standardization {
                x_mean: DVector::from_row_slice(&[x_mean]),
                x_std: DVector::from_row_slice(&[x_std]),
                y_mean,
                y_std,
            }),
            format: ModelFormat::Updated,
        };
        let model = Model::from_parts(data, &NuggetSettings::default()).unwrap();
        let pred = model.predict(&DVector::from_row_slice(&[2.0]));
        assert!((pred - 20.0).abs() < 1e-8, "prediction {pred}");
    }
}
