//! Crate-wide error taxonomy.
//!
//! Every fallible operation in OpenKrig returns [`KrigingError`]. The policy
//! is strict: apart from the documented nugget-escalation retries and the
//! adaptive-alpha fallback, nothing is recovered inside this crate: a
//! malformed model file or a singular covariance matrix must stop the
//! active-learning iteration rather than silently produce a degraded ranking.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the surrogate-model engine.
#[derive(Error, Debug)]
pub enum KrigingError {
    /// A kernel-composition expression referenced a name that was never
    /// declared in the model file.
    #[error("unknown kernel name '{name}' in composition for model '{model}'")]
    UnknownKernelName {
        /// The undeclared identifier.
        name: String,
        /// Identity of the model whose composition referenced it.
        model: String,
    },

    /// Subtraction or division was attempted on kernels. Covariance functions
    /// form no field: only sums and products of positive-semidefinite kernels
    /// are defined.
    #[error("unsupported kernel operation '{operation}' in '{expression}': kernels support only '+' and '*'")]
    UnsupportedKernelOperation {
        /// The offending operator.
        operation: char,
        /// The full composition string.
        expression: String,
    },

    /// A kernel-composition string failed to tokenize or parse.
    #[error("invalid kernel expression '{expression}': {reason}")]
    InvalidKernelExpression {
        /// The full composition string.
        expression: String,
        /// What went wrong, in lexer/parser terms.
        reason: String,
    },

    /// The covariance matrix could not be inverted even after exhausting the
    /// nugget-escalation ladder.
    #[error(
        "singular covariance matrix for model '{model}' ({n_train} training points): \
         tried nuggets {attempted:?}, maximum {max_nugget:e}"
    )]
    SingularCovarianceMatrix {
        /// Identity of the model whose matrix failed to invert.
        model: String,
        /// Training-set size of that model.
        n_train: usize,
        /// Every nugget value that was attempted, in order.
        attempted: Vec<f64>,
        /// The configured escalation ceiling.
        max_nugget: f64,
    },

    /// A model collection was empty or its members disagreed on training-set
    /// size.
    #[error("invalid model collection: {reason}")]
    InvalidModelCollection {
        /// What made the collection unusable.
        reason: String,
    },

    /// A required keyword or section was missing from a model file.
    #[error("malformed model file {}: missing {field}", .path.display())]
    MalformedModelFile {
        /// Path of the offending file.
        path: PathBuf,
        /// Name of the missing keyword/section, or a short description of the
        /// malformed content.
        field: String,
    },

    /// The denominator of the predictive-variance formula underflowed.
    #[error("variance breakdown for model '{model}': ones^T invR ones = {denominator:e}")]
    VarianceBreakdown {
        /// Identity of the model.
        model: String,
        /// The near-zero denominator value.
        denominator: f64,
    },

    /// A candidate or training point carried no feature vector for an atom
    /// that has a model.
    #[error("point {index} has no features for atom '{atom}'")]
    MissingFeatures {
        /// Atom name the model expected features for.
        atom: String,
        /// Index of the point in its collection.
        index: usize,
    },

    /// Underlying file I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Side-record (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, KrigingError>;
