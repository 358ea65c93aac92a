//! Active-learning side-records.
//!
//! Two small JSON files close the feedback loop between iterations, living in
//! the training directory the orchestration layer passes in:
//!
//! - `cv_errors.json` ([`SelectionRecord`]): written by this crate after each
//!   selection pass, recording the training-set size, the selected
//!   candidates' aggregate cross-validation errors, and their per-atom
//!   predictions.
//! - `true_errors.json` ([`TrueErrorRecord`]): produced externally the
//!   following iteration once the selected points have been labeled; consumed
//!   by the adaptive-alpha computation.
//!
//! A missing file reads as `None` rather than an error; a record whose
//! `npoints` disagrees with the current training-set size is stale (e.g. a
//! restart occurred) and is ignored by the consumer.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// File name of the record written after each selection pass.
pub const SELECTION_RECORD_FILE: &str = "cv_errors.json";
/// File name of the record produced once true values become available.
pub const TRUE_ERROR_RECORD_FILE: &str = "true_errors.json";

/// Feedback written after a selection pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionRecord {
    /// Training-set size at the time of selection.
    pub npoints: usize,
    /// Aggregate cross-validation error of each selected candidate.
    pub cv_errors: Vec<f64>,
    /// Per-atom predictions of each selected candidate.
    pub predictions: Vec<BTreeMap<String, f64>>,
}

impl SelectionRecord {
    /// Write the record to `<dir>/cv_errors.json`, overwriting any previous
    /// iteration's record.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(dir.join(SELECTION_RECORD_FILE), json)?;
        Ok(())
    }

    /// Read the record from `<dir>/cv_errors.json`; `Ok(None)` if absent.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(SELECTION_RECORD_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }
}

/// Post-hoc errors for the previously selected points, produced externally
/// once their true property values are known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrueErrorRecord {
    /// Training-set size the record refers to.
    pub npoints: usize,
    /// Cross-validation errors recorded at selection time.
    pub cv_errors: Vec<f64>,
    /// True prediction errors measured after labeling.
    pub true_errors: Vec<f64>,
}

impl TrueErrorRecord {
    /// Write the record to `<dir>/true_errors.json`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(dir.join(TRUE_ERROR_RECORD_FILE), json)?;
        Ok(())
    }

    /// Read the record from `<dir>/true_errors.json`; `Ok(None)` if absent.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(TRUE_ERROR_RECORD_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }
}
