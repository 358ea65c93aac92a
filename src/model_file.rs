//! Reading and writing model files.
//!
//! Two mutually exclusive on-disk syntaxes exist for the same logical model;
//! both are serializers over the one in-memory [`Model`] so prediction,
//! variance, and cross-validation are written once. The active format is
//! decided by file content at load time and preserved on write; there is no
//! silent migration.
//!
//! # Legacy format
//!
//! Line-oriented with fixed keywords in order:
//!
//! ```text
//! <free-text header>
//! Feature <n_features>
//! Number_of_training_points <n_train>
//! Mu <mean> Sigma_Squared <value>
//! Theta
//! <one float per line>
//! Weights
//! <one float per line>
//! Property_value_Kriging_centers
//! <n_train floats>
//! training_data
//! <n_train rows of n_features floats, wrapped 3 values per physical line>
//! ```
//!
//! Only a single cyclic-RBF kernel over all dimensions is representable;
//! every third feature starting at index 2 (the angular φ features of the
//! atomic-local-frame layout) is treated as cyclic. The model identity is
//! taken from the `<system>_kriging_<property>_<atom>` file-stem convention.
//!
//! # Updated format
//!
//! Section-based:
//!
//! ```text
//! name WATER
//! property iqa
//! atom O1
//! number_of_features 3
//! number_of_training_points 20
//! composition k1*k2
//! scaling.x standardise
//! [mean]
//! constant -75.42
//! [kernel.k1]
//! type rbf
//! dimensions 0 1
//! theta 1.2 0.3
//! [kernel.k2]
//! type rbf-cyclic
//! dimensions 2
//! theta 0.9
//! [training_data.x]
//! <rows of floats>
//! [training_data.y]
//! <floats>
//! [weights]
//! <one float per line>
//! ```
//!
//! An `rbf-cyclic` kernel treats all of its declared dimensions as cyclic;
//! linear dimensions belong to separate `rbf` kernels combined through the
//! `composition` directive. Files store raw training data; when
//! `scaling.x standardise` is present the loader computes per-column mean and
//! standard deviation, standardizes in memory, and hands the feature stds to
//! cyclic kernels as their wrap scale.

use crate::config::NuggetSettings;
use crate::error::{KrigingError, Result};
use crate::expression;
use crate::kernel::Kernel;
use crate::model::{Model, ModelData, ModelFormat, Standardization};
use nalgebra::{DMatrix, DVector};
use regex::Regex;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

fn malformed(path: &Path, field: &str) -> KrigingError {
    KrigingError::MalformedModelFile {
        path: path.to_path_buf(),
        field: field.to_string(),
    }
}

/// Parse every whitespace-separated token of a line as a float; `None` if any
/// token fails.
fn float_line(line: &str) -> Option<Vec<f64>> {
    let values: std::result::Result<Vec<f64>, _> =
        line.split_whitespace().map(str::parse::<f64>).collect();
    match values {
        Ok(v) if !v.is_empty() => Some(v),
        _ => None,
    }
}

/// Decide which serializer a file's content belongs to. An updated file
/// always carries a `[mean]` section; anything else is parsed as legacy.
pub fn detect_format(content: &str) -> ModelFormat {
    if content.lines().any(|l| l.trim() == "[mean]") {
        ModelFormat::Updated
    } else {
        ModelFormat::Legacy
    }
}

impl Model {
    /// Load a model from a file, auto-detecting the format.
    pub fn from_file(path: &Path, settings: &NuggetSettings) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let data = match detect_format(&content) {
            ModelFormat::Legacy => parse_legacy(&content, path)?,
            ModelFormat::Updated => parse_updated(&content, path)?,
        };
        Model::from_parts(data, settings)
    }

    /// Write the model back to disk in the format it was read from.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let content = match self.data.format {
            ModelFormat::Legacy => render_legacy(&self.data),
            ModelFormat::Updated => render_updated(&self.data),
        };
        fs::write(path, content)?;
        Ok(())
    }
}

/// Cyclic mask of the legacy single-kernel layout: every third feature
/// starting at the third one.
fn legacy_cyclic_dims(n_features: usize) -> Vec<usize> {
    (2..n_features).step_by(3).collect()
}

/// `<system>_kriging_<property>_<atom>` file-stem convention of legacy files.
fn legacy_identity(path: &Path) -> (String, String, String) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    if let Some((system, rest)) = stem.split_once("_kriging_") {
        if let Some((property, atom)) = rest.rsplit_once('_') {
            return (system.to_string(), property.to_string(), atom.to_string());
        }
    }
    (stem, String::new(), String::new())
}

fn parse_legacy(content: &str, path: &Path) -> Result<ModelData> {
    let mut lines = content.lines().peekable();
    lines.next(); // free-text header

    let mut n_features: Option<usize> = None;
    let mut n_train: Option<usize> = None;
    let mut mean: Option<f64> = None;
    let mut sigma_squared: Option<f64> = None;
    let mut theta: Vec<f64> = Vec::new();
    let mut weights: Vec<f64> = Vec::new();
    let mut y: Vec<f64> = Vec::new();
    let mut x_flat: Vec<f64> = Vec::new();

    while let Some(line) = lines.next() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        match tokens[0] {
            "Feature" => {
                n_features = tokens.get(1).and_then(|t| t.parse().ok());
            }
            "Number_of_training_points" => {
                n_train = tokens.get(1).and_then(|t| t.parse().ok());
            }
            "Mu" => {
                mean = tokens.get(1).and_then(|t| t.parse().ok());
                if tokens.get(2) == Some(&"Sigma_Squared") {
                    sigma_squared = tokens.get(3).and_then(|t| t.parse().ok());
                }
            }
            keyword @ ("Theta" | "Weights" | "Property_value_Kriging_centers"
            | "training_data") => {
                let target = match keyword {
                    "Theta" => &mut theta,
                    "Weights" => &mut weights,
                    "Property_value_Kriging_centers" => &mut y,
                    _ => &mut x_flat,
                };
                // Floats follow until a non-float separator line.
                while let Some(next) = lines.peek() {
                    match float_line(next) {
                        Some(values) => {
                            target.extend(values);
                            lines.next();
                        }
                        None => break,
                    }
                }
            }
            _ => {}
        }
    }

    let n_features = n_features.ok_or_else(|| malformed(path, "Feature"))?;
    let n_train = n_train.ok_or_else(|| malformed(path, "Number_of_training_points"))?;
    let mean = mean.ok_or_else(|| malformed(path, "Mu"))?;
    let sigma_squared = sigma_squared.ok_or_else(|| malformed(path, "Sigma_Squared"))?;
    if theta.len() != n_features {
        return Err(malformed(path, "Theta"));
    }
    if weights.len() != n_train {
        return Err(malformed(path, "Weights"));
    }
    if y.len() != n_train {
        return Err(malformed(path, "Property_value_Kriging_centers"));
    }
    if x_flat.len() != n_train * n_features {
        return Err(malformed(path, "training_data"));
    }

    let kernel = Kernel::RbfCyclic {
        theta: DVector::from_vec(theta),
        active_dims: (0..n_features).collect(),
        cyclic_dims: legacy_cyclic_dims(n_features),
        scale: None,
    };

    let (system_name, property_name, atom_name) = legacy_identity(path);
    Ok(ModelData {
        system_name,
        atom_name,
        property_name,
        x: DMatrix::from_row_slice(n_train, n_features, &x_flat),
        y: DVector::from_vec(y),
        mean,
        sigma_squared,
        kernel,
        weights: DVector::from_vec(weights),
        standardization: None,
        format: ModelFormat::Legacy,
    })
}

/// A `[kernel.<name>]` declaration before kernels are constructed.
#[derive(Debug, Default)]
struct KernelDecl {
    kind: String,
    dimensions: Option<Vec<usize>>,
    theta: Vec<f64>,
    value: Option<f64>,
}

fn parse_updated(content: &str, path: &Path) -> Result<ModelData> {
    let section_re = Regex::new(r"^\[([A-Za-z0-9_.\-]+)\]$").unwrap();

    let mut name = None;
    let mut property = None;
    let mut atom = None;
    let mut n_features: Option<usize> = None;
    let mut n_train: Option<usize> = None;
    let mut composition: Option<String> = None;
    let mut standardise = false;
    let mut mean: Option<f64> = None;
    let mut kernels: Vec<(String, KernelDecl)> = Vec::new();
    let mut x_rows: Vec<Vec<f64>> = Vec::new();
    let mut y_values: Vec<f64> = Vec::new();
    let mut weights: Vec<f64> = Vec::new();

    let mut section = String::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some(caps) = section_re.captures(trimmed) {
            section = caps[1].to_string();
            if let Some(kernel_name) = section.strip_prefix("kernel.") {
                kernels.push((kernel_name.to_string(), KernelDecl::default()));
            }
            continue;
        }

        // Tolerate both `key value` and `key = value`.
        let normalized = trimmed.replacen('=', " ", 1);
        let mut tokens = normalized.split_whitespace();
        let key = tokens.next().unwrap_or_default();
        let rest: Vec<&str> = tokens.collect();

        if section.is_empty() {
            match key {
                "name" => name = rest.first().map(|s| s.to_string()),
                "property" => property = rest.first().map(|s| s.to_string()),
                "atom" => atom = rest.first().map(|s| s.to_string()),
                "number_of_features" => n_features = rest.first().and_then(|t| t.parse().ok()),
                "number_of_training_points" => {
                    n_train = rest.first().and_then(|t| t.parse().ok())
                }
                "composition" => composition = Some(rest.join("")),
                "scaling.x" => standardise = rest.first() == Some(&"standardise"),
                _ => {}
            }
        } else if section == "mean" {
            match key {
                "constant" => mean = rest.first().and_then(|t| t.parse().ok()),
                // a bare float is accepted too
                _ => {
                    if mean.is_none() {
                        mean = key.parse().ok();
                    }
                }
            }
        } else if section.starts_with("kernel.") {
            let decl = &mut kernels
                .last_mut()
                .ok_or_else(|| malformed(path, "kernel section"))?
                .1;
            match key {
                "type" => decl.kind = rest.first().unwrap_or(&"").to_string(),
                "dimensions" => {
                    let dims: std::result::Result<Vec<usize>, _> =
                        rest.iter().map(|t| t.parse()).collect();
                    decl.dimensions = dims.ok();
                }
                "theta" => {
                    let values: std::result::Result<Vec<f64>, _> =
                        rest.iter().map(|t| t.parse()).collect();
                    decl.theta = values.map_err(|_| malformed(path, "theta"))?;
                }
                "value" => decl.value = rest.first().and_then(|t| t.parse().ok()),
                _ => {}
            }
        } else if section == "training_data.x" {
            x_rows.push(float_line(trimmed).ok_or_else(|| malformed(path, "training_data.x"))?);
        } else if section == "training_data.y" {
            y_values
                .extend(float_line(trimmed).ok_or_else(|| malformed(path, "training_data.y"))?);
        } else if section == "weights" {
            weights.extend(float_line(trimmed).ok_or_else(|| malformed(path, "weights"))?);
        }
    }

    let system_name = name.ok_or_else(|| malformed(path, "name"))?;
    let property_name = property.ok_or_else(|| malformed(path, "property"))?;
    let atom_name = atom.ok_or_else(|| malformed(path, "atom"))?;
    let n_features = n_features.ok_or_else(|| malformed(path, "number_of_features"))?;
    let n_train = n_train.ok_or_else(|| malformed(path, "number_of_training_points"))?;
    let composition = composition.ok_or_else(|| malformed(path, "composition"))?;
    let mean = mean.ok_or_else(|| malformed(path, "[mean]"))?;
    if kernels.is_empty() {
        return Err(malformed(path, "[kernel.<name>]"));
    }
    if x_rows.len() != n_train || x_rows.iter().any(|r| r.len() != n_features) {
        return Err(malformed(path, "training_data.x"));
    }
    if y_values.len() != n_train {
        return Err(malformed(path, "training_data.y"));
    }
    if weights.len() != n_train {
        return Err(malformed(path, "[weights]"));
    }

    let x_flat: Vec<f64> = x_rows.into_iter().flatten().collect();
    let mut x = DMatrix::from_row_slice(n_train, n_features, &x_flat);
    let mut y = DVector::from_vec(y_values);
    let mut mean = mean;

    // Standardize in memory; the file stores raw data.
    let standardization = if standardise {
        let x_mean = DVector::from_fn(n_features, |j, _| x.column(j).mean());
        let x_std = DVector::from_fn(n_features, |j, _| {
            let col = x.column(j);
            let mu = x_mean[j];
            let var = col.iter().map(|v| (v - mu) * (v - mu)).sum::<f64>() / n_train as f64;
            let std = var.sqrt();
            if std > 0.0 {
                std
            } else {
                1.0
            }
        });
        let y_mean = y.mean();
        let y_var = y.iter().map(|v| (v - y_mean) * (v - y_mean)).sum::<f64>() / n_train as f64;
        let y_std = if y_var > 0.0 { y_var.sqrt() } else { 1.0 };

        for i in 0..n_train {
            for j in 0..n_features {
                x[(i, j)] = (x[(i, j)] - x_mean[j]) / x_std[j];
            }
        }
        y = y.map(|v| (v - y_mean) / y_std);
        mean = (mean - y_mean) / y_std;

        Some(Standardization {
            x_mean,
            x_std,
            y_mean,
            y_std,
        })
    } else {
        None
    };

    let identity = format!("{system_name}/{atom_name}/{property_name}");
    let mut symbols: HashMap<String, Kernel> = HashMap::new();
    for (kernel_name, decl) in kernels {
        let dims = decl
            .dimensions
            .clone()
            .unwrap_or_else(|| (0..n_features).collect());
        let kernel = match decl.kind.as_str() {
            "rbf" => {
                if decl.theta.len() != dims.len() {
                    return Err(malformed(path, "theta"));
                }
                Kernel::Rbf {
                    theta: DVector::from_vec(decl.theta),
                    active_dims: dims,
                }
            }
            "rbf-cyclic" => {
                if decl.theta.len() != dims.len() {
                    return Err(malformed(path, "theta"));
                }
                let scale = standardization.as_ref().map(|s| {
                    DVector::from_fn(dims.len(), |local, _| s.x_std[dims[local]])
                });
                Kernel::RbfCyclic {
                    theta: DVector::from_vec(decl.theta),
                    cyclic_dims: (0..dims.len()).collect(),
                    active_dims: dims,
                    scale,
                }
            }
            "constant" => Kernel::Constant {
                value: decl.value.ok_or_else(|| malformed(path, "value"))?,
            },
            _ => return Err(malformed(path, "type")),
        };
        symbols.insert(kernel_name, kernel);
    }
    let kernel = expression::compose(&composition, &symbols, &identity)?;

    Ok(ModelData {
        system_name,
        atom_name,
        property_name,
        x,
        y,
        mean,
        sigma_squared: 1.0,
        kernel,
        weights: DVector::from_vec(weights),
        standardization,
        format: ModelFormat::Updated,
    })
}

fn render_legacy(data: &ModelData) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Kriging model of {} for atom {} in system {}",
        data.property_name, data.atom_name, data.system_name
    );
    let _ = writeln!(out, "Feature {}", data.x.ncols());
    let _ = writeln!(out, "Number_of_training_points {}", data.x.nrows());
    let _ = writeln!(out, "Mu {:.16e} Sigma_Squared {:.16e}", data.mean, data.sigma_squared);
    let _ = writeln!(out, "Theta");
    for v in data.kernel.params() {
        let _ = writeln!(out, "{v:.16e}");
    }
    let _ = writeln!(out, "Weights");
    for v in data.weights.iter() {
        let _ = writeln!(out, "{v:.16e}");
    }
    let _ = writeln!(out, "Property_value_Kriging_centers");
    for v in data.y.iter() {
        let _ = writeln!(out, "{v:.16e}");
    }
    let _ = writeln!(out, "training_data");
    for i in 0..data.x.nrows() {
        // Wrapped three values per physical line.
        let row: Vec<f64> = data.x.row(i).iter().copied().collect();
        for chunk in row.chunks(3) {
            let text: Vec<String> = chunk.iter().map(|v| format!("{v:.16e}")).collect();
            let _ = writeln!(out, "{}", text.join(" "));
        }
    }
    out
}

/// Walk a composed kernel, naming each base kernel `k1`, `k2`, ... in tree
/// order and rebuilding the composition string with explicit parentheses
/// around summed operands of a product.
fn decompose_kernel(kernel: &Kernel, decls: &mut Vec<(String, Kernel)>) -> String {
    match kernel {
        Kernel::Sum(a, b) => {
            let left = decompose_kernel(a, decls);
            let right = decompose_kernel(b, decls);
            format!("{left}+{right}")
        }
        Kernel::Product(a, b) => {
            let wrap = |k: &Kernel, text: String| {
                if matches!(k, Kernel::Sum(_, _)) {
                    format!("({text})")
                } else {
                    text
                }
            };
            let left = wrap(a, decompose_kernel(a, decls));
            let right = wrap(b, decompose_kernel(b, decls));
            format!("{left}*{right}")
        }
        base => {
            let name = format!("k{}", decls.len() + 1);
            decls.push((name.clone(), base.clone()));
            name
        }
    }
}

fn render_updated(data: &ModelData) -> String {
    let mut decls = Vec::new();
    let composition = decompose_kernel(&data.kernel, &mut decls);

    // Write raw-space data and mean; standardization is recomputed on load.
    let (x_raw, y_raw, mean_raw) = match &data.standardization {
        Some(s) => {
            let x = DMatrix::from_fn(data.x.nrows(), data.x.ncols(), |i, j| {
                data.x[(i, j)] * s.x_std[j] + s.x_mean[j]
            });
            let y = data.y.map(|v| s.destandardize_value(v));
            (x, y, s.destandardize_value(data.mean))
        }
        None => (data.x.clone(), data.y.clone(), data.mean),
    };

    let mut out = String::new();
    let _ = writeln!(out, "name {}", data.system_name);
    let _ = writeln!(out, "property {}", data.property_name);
    let _ = writeln!(out, "atom {}", data.atom_name);
    let _ = writeln!(out, "number_of_features {}", data.x.ncols());
    let _ = writeln!(out, "number_of_training_points {}", data.x.nrows());
    let _ = writeln!(out, "composition {composition}");
    if data.standardization.is_some() {
        let _ = writeln!(out, "scaling.x standardise");
    }
    let _ = writeln!(out, "[mean]");
    let _ = writeln!(out, "constant {mean_raw:.16e}");

    for (kernel_name, kernel) in &decls {
        let _ = writeln!(out, "[kernel.{kernel_name}]");
        match kernel {
            Kernel::Rbf { theta, active_dims } => {
                let _ = writeln!(out, "type rbf");
                let dims: Vec<String> = active_dims.iter().map(|d| d.to_string()).collect();
                let _ = writeln!(out, "dimensions {}", dims.join(" "));
                let thetas: Vec<String> = theta.iter().map(|v| format!("{v:.16e}")).collect();
                let _ = writeln!(out, "theta {}", thetas.join(" "));
            }
            Kernel::RbfCyclic {
                theta, active_dims, ..
            } => {
                let _ = writeln!(out, "type rbf-cyclic");
                let dims: Vec<String> = active_dims.iter().map(|d| d.to_string()).collect();
                let _ = writeln!(out, "dimensions {}", dims.join(" "));
                let thetas: Vec<String> = theta.iter().map(|v| format!("{v:.16e}")).collect();
                let _ = writeln!(out, "theta {}", thetas.join(" "));
            }
            Kernel::Constant { value } => {
                let _ = writeln!(out, "type constant");
                let _ = writeln!(out, "value {value:.16e}");
            }
            Kernel::Sum(_, _) | Kernel::Product(_, _) => unreachable!("decls hold base kernels"),
        }
    }

    let _ = writeln!(out, "[training_data.x]");
    for i in 0..x_raw.nrows() {
        let row: Vec<String> = x_raw.row(i).iter().map(|v| format!("{v:.16e}")).collect();
        let _ = writeln!(out, "{}", row.join(" "));
    }
    let _ = writeln!(out, "[training_data.y]");
    for v in y_raw.iter() {
        let _ = writeln!(out, "{v:.16e}");
    }
    let _ = writeln!(out, "[weights]");
    for v in data.weights.iter() {
        let _ = writeln!(out, "{v:.16e}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const UPDATED: &str = "\
name WATER
property iqa
atom O1
number_of_features 3
number_of_training_points 3
composition k1*k2
[mean]
constant 1.5
[kernel.k1]
type rbf
dimensions 0 1
theta 1.0 0.5
[kernel.k2]
type rbf-cyclic
dimensions 2
theta 0.8
[training_data.x]
0.0 0.1 0.2
1.0 0.9 -0.3
0.4 1.2 2.8
[training_data.y]
1.0
2.0
1.4
[weights]
0.1
-0.2
0.05
";

    fn legacy_content() -> String {
        let mut out = String::new();
        out.push_str("Kriging model of iqa for atom O1 in system WATER\n");
        out.push_str("Feature 3\n");
        out.push_str("Number_of_training_points 2\n");
        out.push_str("Mu 1.25 Sigma_Squared 0.5\n");
        out.push_str("Theta\n0.5\n1.5\n2.5\n");
        out.push_str("Weights\n0.1\n0.2\n");
        out.push_str("Property_value_Kriging_centers\n1.0\n1.5\n");
        out.push_str("training_data\n0.0 0.1 0.2\n1.0 0.9 -0.3\n");
        out
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(detect_format(UPDATED), ModelFormat::Updated);
        assert_eq!(detect_format(&legacy_content()), ModelFormat::Legacy);
    }

    #[test]
    fn test_parse_updated_builds_composed_kernel() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("WATER_iqa_O1.model");
        fs::write(&path, UPDATED).unwrap();
        let model = Model::from_file(&path, &NuggetSettings::default()).unwrap();
        assert_eq!(model.data.system_name, "WATER");
        assert_eq!(model.data.atom_name, "O1");
        assert_eq!(model.data.property_name, "iqa");
        assert_eq!(model.n_train(), 3);
        assert_eq!(model.n_features(), 3);
        assert_eq!(model.data.format, ModelFormat::Updated);
        assert!(matches!(model.data.kernel, Kernel::Product(_, _)));
        assert_eq!(model.data.kernel.params(), vec![1.0, 0.5, 0.8]);
    }

    #[test]
    fn test_parse_legacy_single_cyclic_kernel() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("WATER_kriging_iqa_O1.txt");
        fs::write(&path, legacy_content()).unwrap();
        let model = Model::from_file(&path, &NuggetSettings::default()).unwrap();
        assert_eq!(model.data.system_name, "WATER");
        assert_eq!(model.data.property_name, "iqa");
        assert_eq!(model.data.atom_name, "O1");
        assert_eq!(model.data.mean, 1.25);
        assert_eq!(model.data.sigma_squared, 0.5);
        assert_eq!(model.data.format, ModelFormat::Legacy);
        match &model.data.kernel {
            Kernel::RbfCyclic { cyclic_dims, .. } => assert_eq!(cyclic_dims, &vec![2]),
            other => panic!("expected RbfCyclic, got {other:?}"),
        }
    }

    #[test]
    fn test_updated_round_trip_preserves_format_and_predictions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.model");
        fs::write(&path, UPDATED).unwrap();
        let model = Model::from_file(&path, &NuggetSettings::default()).unwrap();

        let back = dir.path().join("rewritten.model");
        model.write_to(&back).unwrap();
        let reloaded = Model::from_file(&back, &NuggetSettings::default()).unwrap();
        assert_eq!(reloaded.data.format, ModelFormat::Updated);

        let q = DVector::from_row_slice(&[0.5, 0.5, 0.5]);
        assert!((model.predict(&q) - reloaded.predict(&q)).abs() < 1e-10);
    }

    #[test]
    fn test_legacy_round_trip_preserves_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("WATER_kriging_iqa_O1.txt");
        fs::write(&path, legacy_content()).unwrap();
        let model = Model::from_file(&path, &NuggetSettings::default()).unwrap();

        let back = dir.path().join("WATER_kriging_iqa_O1.txt.out");
        model.write_to(&back).unwrap();
        let content = fs::read_to_string(&back).unwrap();
        assert_eq!(detect_format(&content), ModelFormat::Legacy);
        assert!(content.contains("Property_value_Kriging_centers"));
    }

    #[test]
    fn test_missing_section_reports_field() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.model");
        let broken = UPDATED.replace("composition k1*k2\n", "");
        fs::write(&path, broken).unwrap();
        let err = Model::from_file(&path, &NuggetSettings::default()).unwrap_err();
        match err {
            KrigingError::MalformedModelFile { field, .. } => {
                assert_eq!(field, "composition");
            }
            other => panic!("expected MalformedModelFile, got {other:?}"),
        }
    }

    #[test]
    fn test_standardised_model_wires_scale_into_cyclic_kernel() {
        let content = UPDATED.replace(
            "composition k1*k2\n",
            "composition k1*k2\nscaling.x standardise\n",
        );
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("std.model");
        fs::write(&path, content).unwrap();
        let model = Model::from_file(&path, &NuggetSettings::default()).unwrap();
        let std = model.data.standardization.as_ref().unwrap();
        match &model.data.kernel {
            Kernel::Product(_, b) => match b.as_ref() {
                Kernel::RbfCyclic { scale, .. } => {
                    let scale = scale.as_ref().unwrap();
                    assert!((scale[0] - std.x_std[2]).abs() < 1e-12);
                }
                other => panic!("expected RbfCyclic, got {other:?}"),
            },
            other => panic!("expected Product, got {other:?}"),
        }
    }
}
