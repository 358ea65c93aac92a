//! Point providers: the seam between this crate and the orchestration layer.
//!
//! The collaborators that parse quantum-chemistry output expose two kinds of
//! collections to the surrogate engine:
//!
//! - labeled training points: per point, a mapping atom → feature vector and
//!   atom → true property value ([`LabelSource`]),
//! - unlabeled candidate points: atom → feature vector only
//!   ([`FeatureSource`]).
//!
//! [`PointSet`] is the in-memory implementation used by tests and by callers
//! that already hold extracted features.

use crate::error::{KrigingError, Result};
use nalgebra::DVector;
use std::collections::BTreeMap;

/// Read access to per-atom feature vectors of an ordered point collection.
pub trait FeatureSource {
    /// Number of points in the collection.
    fn len(&self) -> usize;

    /// Whether the collection is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Feature vector of atom `atom` at point `index`, if present.
    fn features(&self, index: usize, atom: &str) -> Option<&DVector<f64>>;

    /// Feature vector of atom `atom` at point `index`, or a
    /// [`KrigingError::MissingFeatures`] naming both.
    fn required_features(&self, index: usize, atom: &str) -> Result<&DVector<f64>> {
        self.features(index, atom)
            .ok_or_else(|| KrigingError::MissingFeatures {
                atom: atom.to_string(),
                index,
            })
    }
}

/// Read access to true property values of labeled points.
pub trait LabelSource: FeatureSource {
    /// True property value of atom `atom` at point `index`, if labeled.
    fn value(&self, index: usize, atom: &str) -> Option<f64>;
}

/// One sampled molecular configuration.
#[derive(Debug, Clone, Default)]
pub struct Point {
    /// Per-atom feature vectors.
    pub features: BTreeMap<String, DVector<f64>>,
    /// Per-atom true property values; empty for unlabeled candidates.
    pub values: BTreeMap<String, f64>,
}

impl Point {
    /// Create an unlabeled point from per-atom features.
    pub fn unlabeled(features: BTreeMap<String, DVector<f64>>) -> Self {
        Self {
            features,
            values: BTreeMap::new(),
        }
    }
}

/// In-memory ordered collection of points.
#[derive(Debug, Clone, Default)]
pub struct PointSet {
    /// The points, in collection order. Candidate ranking tie-breaks follow
    /// this ordering.
    pub points: Vec<Point>,
}

impl PointSet {
    /// Create a point set from a vector of points.
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }
}

impl FeatureSource for PointSet {
    fn len(&self) -> usize {
        self.points.len()
    }

    fn features(&self, index: usize, atom: &str) -> Option<&DVector<f64>> {
        self.points.get(index).and_then(|p| p.features.get(atom))
    }
}

impl LabelSource for PointSet {
    fn value(&self, index: usize, atom: &str) -> Option<f64> {
        self.points
            .get(index)
            .and_then(|p| p.values.get(atom))
            .copied()
    }
}
