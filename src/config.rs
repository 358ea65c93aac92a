//! Configuration for active-learning selection.
//!
//! This module defines the small configuration surface the orchestration
//! layer hands to the selection engine:
//!
//! - [`SelectionPolicy`]: the named candidate-scoring policies
//! - [`NuggetSettings`]: the diagonal-regularization escalation ladder
//! - [`ActiveLearningConfig`]: points-per-iteration plus the above
//!
//! Everything here has sensible defaults; an iteration can run with
//! `ActiveLearningConfig::default()` and the `epe` policy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named candidate-selection policies.
///
/// Each policy receives the whole candidate collection and returns a list of
/// selected indices. See the module docs of [`crate::models`] for the scoring
/// formulas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SelectionPolicy {
    /// Expected prediction error: `alpha*cv + (1-alpha)*variance`.
    #[default]
    Epe,
    /// EPE with iterative distance-to-picked reweighting (diversity-aware).
    Eped,
    /// EPE with distinct nearest-training-point attribution per pick.
    Epev,
    /// Pure predictive variance (accepted names: `var`, `sigma`).
    Variance,
    /// Variance with the same diversity reweighting as `eped`.
    VarianceDiverse,
    /// Variance weighted by the square root of the prediction magnitude.
    SigMu,
    /// Uniformly random baseline, seedable for reproducibility.
    Random,
}

impl FromStr for SelectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "epe" => Ok(Self::Epe),
            "eped" => Ok(Self::Eped),
            "epev" => Ok(Self::Epev),
            "var" | "sigma" => Ok(Self::Variance),
            "vard" => Ok(Self::VarianceDiverse),
            "sigmu" => Ok(Self::SigMu),
            "rand" => Ok(Self::Random),
            other => Err(format!("unknown selection policy '{other}'")),
        }
    }
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Epe => "epe",
            Self::Eped => "eped",
            Self::Epev => "epev",
            Self::Variance => "var",
            Self::VarianceDiverse => "vard",
            Self::SigMu => "sigmu",
            Self::Random => "rand",
        };
        write!(f, "{name}")
    }
}

/// Nugget-escalation ladder for covariance-matrix inversion.
///
/// When plain inversion of the covariance matrix fails, a nugget is added to
/// the diagonal starting at `initial` and multiplied by ten on every retry
/// while it stays at or below `max`. A `max` of zero disables retries
/// entirely, so the first failure is fatal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NuggetSettings {
    /// First nugget value tried after plain inversion fails.
    pub initial: f64,
    /// Largest nugget value that may be tried.
    pub max: f64,
}

impl Default for NuggetSettings {
    fn default() -> Self {
        Self {
            initial: 1e-10,
            max: 1e-1,
        }
    }
}

/// Complete configuration for one active-learning iteration.
///
/// The scoring policy itself is configured once on the
/// [`Models`](crate::models::Models) collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveLearningConfig {
    /// How many candidates to select per iteration (clipped to the number of
    /// available candidates).
    pub points_per_iteration: usize,
    /// Seed for the `rand` baseline policy. `None` seeds from entropy.
    pub random_seed: Option<u64>,
    /// Nugget ladder used when models are loaded.
    pub nugget: NuggetSettings,
}

impl Default for ActiveLearningConfig {
    fn default() -> Self {
        Self {
            points_per_iteration: 1,
            random_seed: None,
            nugget: NuggetSettings::default(),
        }
    }
}
