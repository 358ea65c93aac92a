#![deny(missing_docs)]

//! OpenKrig - Kriging surrogate models and active learning for
//! computational-chemistry model training.
//!
//! OpenKrig is the surrogate-model engine at the core of an iterative
//! machine-learning workflow for atomistic property models: one Kriging
//! (Gaussian-Process-style) regression model per atom and property predicts
//! values and uncertainties for unlabeled candidate geometries, and an
//! active-learning layer decides which candidates are worth the cost of a
//! quantum-chemistry labeling calculation next.
//!
//! # Overview
//!
//! The engine consumes three things produced by external collaborators:
//!
//! 1. **Model files** written by an external optimizer after training, in one
//!    of two text formats (a legacy line-oriented one and an updated
//!    section-based one, see [`model_file`]).
//! 2. **Labeled training points** exposing per-atom feature vectors and true
//!    property values.
//! 3. **Unlabeled candidate points** exposing per-atom feature vectors only.
//!
//! Its single output obligation is a ranked subset of candidate indices
//! (plus optional model files and small JSON side-records that keep the
//! adaptive error-blending honest across iterations).
//!
//! # Prediction model
//!
//! Each [`model::Model`] predicts with the standard Kriging equations:
//!
//! ```text
//! prediction(x) = mu + r(x)^T w
//! variance(x)   = 1 - r^T invR r + (1 - 1^T invR r)^2 / (1^T invR 1)
//! ```
//!
//! where `r(x)` is the covariance of the query against every training point
//! under a composed [`kernel::Kernel`], and the weights `w` are read verbatim
//! from the model file; training them is the external optimizer's job.
//! Leave-one-out cross-validation errors come from the analytic estimator,
//! never from refitting.
//!
//! # Active learning
//!
//! A [`models::Models`] collection (one model per atom) scores candidates
//! with a configurable policy (expected prediction error with an adaptively
//! blended alpha, diversity-reweighted variants, pure variance, or a random
//! baseline) and selects the top `k` for labeling. See [`models`] for the
//! policy catalogue and [`config::SelectionPolicy`] for the names.
//!
//! # Quick start
//!
//! ```no_run
//! use openkrig::config::{ActiveLearningConfig, NuggetSettings, SelectionPolicy};
//! use openkrig::models::Models;
//! use openkrig::points::PointSet;
//! use std::path::Path;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let models = Models::load_directory(
//!         Path::new("MODELS/iqa"),
//!         SelectionPolicy::Epe,
//!         &NuggetSettings::default(),
//!     )?;
//!     let candidates: PointSet = /* features from the sample pool */
//! #       PointSet::default();
//!     let config = ActiveLearningConfig {
//!         points_per_iteration: 5,
//!         ..Default::default()
//!     };
//!     let selection = models.run_iteration(&candidates, &config, Path::new("TRAINING_SET"))?;
//!     println!("selected candidates: {:?}", selection.indices);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`kernel`] - composable covariance kernels (RBF, cyclic RBF, constant)
//! - [`expression`] - the kernel-composition expression language
//! - [`model`] - single-atom prediction, variance, and cross-validation
//! - [`model_file`] - the two on-disk model formats
//! - [`models`] - aggregation and the active-learning selection policies
//! - [`points`] - the point-provider seam toward the orchestration layer
//! - [`history`] - JSON side-records closing the iteration feedback loop
//! - [`config`] - selection policy and nugget configuration
//! - [`error`] - the crate-wide error taxonomy
//!
//! # License
//!
//! MIT License - see [LICENSE](../LICENSE) file for details.

pub mod config;
pub mod error;
pub mod expression;
pub mod history;
pub mod kernel;
pub mod model;
pub mod model_file;
pub mod models;
pub mod points;

pub use config::{ActiveLearningConfig, NuggetSettings, SelectionPolicy};
pub use error::{KrigingError, Result};
pub use kernel::Kernel;
pub use model::Model;
pub use models::{Models, Selection};
