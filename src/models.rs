//! Model collections, aggregation, and active-learning selection.
//!
//! A [`Models`] collection holds one [`Model`] per atom of one chemical
//! system, all predicting the same property. It aggregates per-atom
//! predictions, variances, and cross-validation errors into whole-molecule
//! quantities and implements the candidate-selection policies of the active
//! learning loop.
//!
//! # Selection iteration
//!
//! One iteration scores every candidate with the configured policy, ranks
//! descending (stable sort: ties keep candidate order), selects the top `k`
//! (clipped to the number of candidates), and persists a
//! [`SelectionRecord`] so the next iteration can compute the adaptive alpha
//! once true values arrive.
//!
//! # Policies
//!
//! - `epe`: `alpha*cv_error + (1-alpha)*variance`, summed across atoms.
//! - `eped`: `epe`, but after each pick the remaining candidates' scores are
//!   multiplied by their minimum distance to all points picked so far this
//!   iteration, then re-ranked before the next pick.
//! - `epev`: `epe` ranking, skipping any candidate whose nearest-training-
//!   point attribution was already used by a higher-ranked pick.
//! - `var` / `sigma`: summed predictive variance only.
//! - `vard`: like `eped` with pure variance scores.
//! - `sigmu`: variance weighted by the square root of the prediction
//!   magnitude.
//! - `rand`: uniformly random, seedable baseline.
//!
//! # Adaptive alpha
//!
//! The blend coefficient between the cross-validation term and the variance
//! term is learned from the previous iteration's [`TrueErrorRecord`]: each
//! recorded (true error, CV error) pair contributes
//! `max(0, min(0.5*(true/cv), 1) * 0.99)` and alpha is their mean. A missing
//! record, a stale record (its `npoints` disagrees with the current
//! training-set size, or its error lists differ in length), or an empty pair
//! list falls back to `alpha = 0.5`; the stale cases are logged so restarts
//! stay diagnosable.

use crate::config::{ActiveLearningConfig, NuggetSettings, SelectionPolicy};
use crate::error::{KrigingError, Result};
use crate::history::{SelectionRecord, TrueErrorRecord};
use crate::model::Model;
use crate::points::FeatureSource;
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

/// Ordered collection of per-atom models for one property of one system.
#[derive(Debug, Clone)]
pub struct Models {
    models: Vec<Model>,
    policy: SelectionPolicy,
}

/// Result of one selection pass.
#[derive(Debug, Clone)]
pub struct Selection {
    /// Selected candidate indices, in pick order.
    pub indices: Vec<usize>,
    /// Aggregate cross-validation error of each selected candidate.
    pub cv_errors: Vec<f64>,
    /// Per-atom predictions of each selected candidate.
    pub predictions: Vec<BTreeMap<String, f64>>,
    /// Alpha used by the `epe` family; `None` for other policies.
    pub alpha: Option<f64>,
}

/// Compute the adaptive blend coefficient from the previous iteration's
/// record. See the module docs for the fallback rules.
pub fn adaptive_alpha(record: Option<&TrueErrorRecord>, n_train: usize) -> f64 {
    let Some(record) = record else {
        debug!("no true-error record yet, using alpha = 0.5");
        return 0.5;
    };
    if record.npoints != n_train {
        warn!(
            "stale adaptive-alpha history ignored: recorded npoints {} != current training size {}",
            record.npoints, n_train
        );
        return 0.5;
    }
    if record.true_errors.len() != record.cv_errors.len() {
        warn!(
            "stale adaptive-alpha history ignored: {} true errors vs {} cv errors",
            record.true_errors.len(),
            record.cv_errors.len()
        );
        return 0.5;
    }
    let terms: Vec<f64> = record
        .true_errors
        .iter()
        .zip(record.cv_errors.iter())
        .map(|(t, c)| ((0.5 * (t / c)).min(1.0) * 0.99).max(0.0))
        .collect();
    if terms.is_empty() {
        return 0.5;
    }
    terms.iter().sum::<f64>() / terms.len() as f64
}

/// Indices of `scores` sorted descending; the sort is stable, so exact ties
/// keep the existing candidate ordering.
fn rank_descending(scores: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap_or(Ordering::Equal));
    order
}

impl Models {
    /// Create a collection from per-atom models and a selection policy.
    ///
    /// # Errors
    ///
    /// Returns [`KrigingError::InvalidModelCollection`] when `models` is
    /// empty or the models disagree on training-set size.
    pub fn new(models: Vec<Model>, policy: SelectionPolicy) -> Result<Self> {
        if models.is_empty() {
            return Err(KrigingError::InvalidModelCollection {
                reason: "no models".to_string(),
            });
        }
        let n = models[0].n_train();
        if let Some(odd) = models.iter().find(|m| m.n_train() != n) {
            return Err(KrigingError::InvalidModelCollection {
                reason: format!(
                    "model '{}' has {} training points, expected {}",
                    odd.identity(),
                    odd.n_train(),
                    n
                ),
            });
        }
        Ok(Self { models, policy })
    }

    /// Load every model file in a directory into one collection, sorted by
    /// file name for a stable atom order. Every regular file in the directory
    /// must parse as a model; the first parse failure propagates.
    pub fn load_directory(
        dir: &Path,
        policy: SelectionPolicy,
        settings: &NuggetSettings,
    ) -> Result<Self> {
        let mut paths: Vec<_> = fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        paths.sort();
        let mut models = Vec::with_capacity(paths.len());
        for path in &paths {
            models.push(Model::from_file(path, settings)?);
        }
        Self::new(models, policy)
    }

    /// The per-atom models, in collection order.
    pub fn models(&self) -> &[Model] {
        &self.models
    }

    /// Training-set size shared by every model in the collection.
    pub fn n_train(&self) -> usize {
        self.models[0].n_train()
    }

    /// Per-atom predictions for one candidate.
    pub fn predict<F: FeatureSource>(
        &self,
        candidates: &F,
        index: usize,
    ) -> Result<BTreeMap<String, f64>> {
        let mut out = BTreeMap::new();
        for model in &self.models {
            let features = candidates.required_features(index, model.atom_name())?;
            out.insert(model.atom_name().to_string(), model.predict(features));
        }
        Ok(out)
    }

    /// Predictive variance summed over all atoms for one candidate.
    pub fn variance<F: FeatureSource>(&self, candidates: &F, index: usize) -> Result<f64> {
        let mut total = 0.0;
        for model in &self.models {
            let features = candidates.required_features(index, model.atom_name())?;
            total += model.variance(features)?;
        }
        Ok(total)
    }

    /// Cross-validation error attributed to one candidate, summed over atoms:
    /// each model contributes the leave-one-out error of the training row
    /// nearest to the candidate.
    pub fn cv_error<F: FeatureSource>(&self, candidates: &F, index: usize) -> Result<f64> {
        let mut total = 0.0;
        for model in &self.models {
            let features = candidates.required_features(index, model.atom_name())?;
            let (_, cv) = model.attributed_cv_error(features);
            total += cv;
        }
        Ok(total)
    }

    /// Single attribution cell of a candidate: the training index minimizing
    /// the per-atom distance summed over all atoms.
    fn attribution<F: FeatureSource>(&self, candidates: &F, index: usize) -> Result<usize> {
        let mut totals = vec![0.0; self.n_train()];
        for model in &self.models {
            let features = candidates.required_features(index, model.atom_name())?;
            let distances = model.distance_to_point(features);
            for (t, d) in totals.iter_mut().zip(distances.iter()) {
                *t += d;
            }
        }
        let mut best = 0;
        for i in 1..totals.len() {
            if totals[i] < totals[best] {
                best = i;
            }
        }
        Ok(best)
    }

    /// Distance between two candidates: per-atom Euclidean distance in raw
    /// feature space, summed over atoms.
    fn candidate_distance<F: FeatureSource>(&self, candidates: &F, a: usize, b: usize) -> Result<f64> {
        let mut total = 0.0;
        for model in &self.models {
            let fa = candidates.required_features(a, model.atom_name())?;
            let fb = candidates.required_features(b, model.atom_name())?;
            total += (fa - fb).norm();
        }
        Ok(total)
    }

    fn epe_scores<F: FeatureSource>(&self, candidates: &F, alpha: f64) -> Result<Vec<f64>> {
        (0..candidates.len())
            .map(|i| Ok(alpha * self.cv_error(candidates, i)? + (1.0 - alpha) * self.variance(candidates, i)?))
            .collect()
    }

    fn variance_scores<F: FeatureSource>(&self, candidates: &F) -> Result<Vec<f64>> {
        (0..candidates.len())
            .map(|i| self.variance(candidates, i))
            .collect()
    }

    fn sigmu_scores<F: FeatureSource>(&self, candidates: &F) -> Result<Vec<f64>> {
        (0..candidates.len())
            .map(|i| {
                let mut total = 0.0;
                for model in &self.models {
                    let features = candidates.required_features(i, model.atom_name())?;
                    total += model.variance(features)? * model.predict(features).abs().sqrt();
                }
                Ok(total)
            })
            .collect()
    }

    /// Top-`k` pick with iterative diversity reweighting: after every pick,
    /// remaining scores are multiplied by the candidate's minimum distance to
    /// everything picked so far this iteration, then re-ranked.
    fn pick_diverse<F: FeatureSource>(
        &self,
        candidates: &F,
        mut scores: Vec<f64>,
        k: usize,
    ) -> Result<Vec<usize>> {
        let mut remaining: Vec<usize> = (0..scores.len()).collect();
        let mut picked = Vec::with_capacity(k);
        while picked.len() < k && !remaining.is_empty() {
            // Strict comparison so exact ties keep candidate order.
            let mut best_pos = 0;
            for pos in 1..remaining.len() {
                if scores[remaining[pos]] > scores[remaining[best_pos]] {
                    best_pos = pos;
                }
            }
            let chosen = remaining.remove(best_pos);
            picked.push(chosen);
            for &i in &remaining {
                let mut min_dist = f64::INFINITY;
                for &p in &picked {
                    min_dist = min_dist.min(self.candidate_distance(candidates, i, p)?);
                }
                scores[i] *= min_dist;
            }
        }
        Ok(picked)
    }

    /// Top-`k` pick enforcing distinct nearest-training-point attributions;
    /// if the ranking runs out of fresh cells the remainder is filled from
    /// the skipped candidates in rank order.
    fn pick_distinct_attribution<F: FeatureSource>(
        &self,
        candidates: &F,
        scores: &[f64],
        k: usize,
    ) -> Result<Vec<usize>> {
        let ranking = rank_descending(scores);
        let mut used = HashSet::new();
        let mut picked = Vec::with_capacity(k);
        let mut skipped = Vec::new();
        for &idx in &ranking {
            if picked.len() == k {
                break;
            }
            let cell = self.attribution(candidates, idx)?;
            if used.insert(cell) {
                picked.push(idx);
            } else {
                skipped.push(idx);
            }
        }
        for idx in skipped {
            if picked.len() == k {
                break;
            }
            debug!("attribution cells exhausted, falling back to rank order for candidate {idx}");
            picked.push(idx);
        }
        Ok(picked)
    }

    /// Score, rank, and select candidates for the next labeling batch.
    ///
    /// `history_dir` is the training directory holding the side-records: the
    /// previous iteration's `true_errors.json` is read from it for the alpha
    /// computation (the `epe` family only). The returned [`Selection`] carries
    /// everything [`Models::record_selection`] needs to persist feedback.
    pub fn select<F: FeatureSource>(
        &self,
        candidates: &F,
        config: &ActiveLearningConfig,
        history_dir: Option<&Path>,
    ) -> Result<Selection> {
        let n = candidates.len();
        let k = config.points_per_iteration.min(n);

        let mut alpha = None;
        let indices = match self.policy {
            SelectionPolicy::Epe | SelectionPolicy::Eped | SelectionPolicy::Epev => {
                let record = match history_dir {
                    Some(dir) => TrueErrorRecord::load(dir)?,
                    None => None,
                };
                let a = adaptive_alpha(record.as_ref(), self.n_train());
                alpha = Some(a);
                let scores = self.epe_scores(candidates, a)?;
                match self.policy {
                    SelectionPolicy::Epe => rank_descending(&scores).into_iter().take(k).collect(),
                    SelectionPolicy::Eped => self.pick_diverse(candidates, scores, k)?,
                    _ => self.pick_distinct_attribution(candidates, &scores, k)?,
                }
            }
            SelectionPolicy::Variance => {
                let scores = self.variance_scores(candidates)?;
                rank_descending(&scores).into_iter().take(k).collect()
            }
            SelectionPolicy::VarianceDiverse => {
                let scores = self.variance_scores(candidates)?;
                self.pick_diverse(candidates, scores, k)?
            }
            SelectionPolicy::SigMu => {
                let scores = self.sigmu_scores(candidates)?;
                rank_descending(&scores).into_iter().take(k).collect()
            }
            SelectionPolicy::Random => {
                let mut rng = match config.random_seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                };
                rand::seq::index::sample(&mut rng, n, k).into_vec()
            }
        };

        let mut cv_errors = Vec::with_capacity(indices.len());
        let mut predictions = Vec::with_capacity(indices.len());
        for &idx in &indices {
            cv_errors.push(self.cv_error(candidates, idx)?);
            predictions.push(self.predict(candidates, idx)?);
        }

        Ok(Selection {
            indices,
            cv_errors,
            predictions,
            alpha,
        })
    }

    /// Persist the feedback record for a completed selection pass so the next
    /// iteration can compute alpha once true values arrive.
    pub fn record_selection(&self, dir: &Path, selection: &Selection) -> Result<()> {
        SelectionRecord {
            npoints: self.n_train(),
            cv_errors: selection.cv_errors.clone(),
            predictions: selection.predictions.clone(),
        }
        .save(dir)
    }

    /// One full iteration of the selection state machine: score, rank,
    /// select, persist feedback.
    pub fn run_iteration<F: FeatureSource>(
        &self,
        candidates: &F,
        config: &ActiveLearningConfig,
        history_dir: &Path,
    ) -> Result<Selection> {
        let selection = self.select(candidates, config, Some(history_dir))?;
        self.record_selection(history_dir, &selection)?;
        Ok(selection)
    }
}
