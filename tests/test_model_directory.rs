//! Loading a directory of model files into a collection and predicting with
//! it, exercising both on-disk formats through the public API.

use nalgebra::DVector;
use openkrig::config::{NuggetSettings, SelectionPolicy};
use openkrig::model::ModelFormat;
use openkrig::models::Models;
use std::fs;
use tempfile::TempDir;

fn updated_model_file(atom: &str) -> String {
    format!(
        "\
name WATER
property iqa
atom {atom}
number_of_features 2
number_of_training_points 3
composition k1
[mean]
constant 1.5
[kernel.k1]
type rbf
dimensions 0 1
theta 1.0 0.5
[training_data.x]
0.0 0.1
1.0 0.9
0.4 1.2
[training_data.y]
1.0
2.0
1.4
[weights]
0.1
-0.2
0.05
"
    )
}

fn legacy_model_file() -> String {
    let mut out = String::new();
    out.push_str("Kriging model of iqa for atom H3 in system WATER\n");
    out.push_str("Feature 2\n");
    out.push_str("Number_of_training_points 3\n");
    out.push_str("Mu 1.5 Sigma_Squared 1.0\n");
    out.push_str("Theta\n1.0\n0.5\n");
    out.push_str("Weights\n0.1\n-0.2\n0.05\n");
    out.push_str("Property_value_Kriging_centers\n1.0\n2.0\n1.4\n");
    out.push_str("training_data\n0.0 0.1\n1.0 0.9\n0.4 1.2\n");
    out
}

#[test]
fn test_load_directory_mixed_formats() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("WATER_iqa_O1.model"), updated_model_file("O1")).unwrap();
    fs::write(dir.path().join("WATER_iqa_O2.model"), updated_model_file("O2")).unwrap();
    fs::write(
        dir.path().join("WATER_kriging_iqa_H3.txt"),
        legacy_model_file(),
    )
    .unwrap();

    let models = Models::load_directory(
        dir.path(),
        SelectionPolicy::Epe,
        &NuggetSettings::default(),
    )
    .unwrap();
    assert_eq!(models.models().len(), 3);
    assert_eq!(models.n_train(), 3);

    let atoms: Vec<&str> = models.models().iter().map(|m| m.atom_name()).collect();
    assert!(atoms.contains(&"O1"));
    assert!(atoms.contains(&"O2"));
    assert!(atoms.contains(&"H3"));

    let formats: Vec<ModelFormat> = models.models().iter().map(|m| m.data.format).collect();
    assert!(formats.contains(&ModelFormat::Legacy));
    assert!(formats.contains(&ModelFormat::Updated));
}

#[test]
fn test_loaded_model_predicts_and_writes_back() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.model"), updated_model_file("O1")).unwrap();
    let models = Models::load_directory(
        dir.path(),
        SelectionPolicy::Variance,
        &NuggetSettings::default(),
    )
    .unwrap();

    let model = &models.models()[0];
    let q = DVector::from_row_slice(&[0.3, 0.3]);
    let pred = model.predict(&q);
    assert!(pred.is_finite());
    let var = model.variance(&q).unwrap();
    assert!(var.is_finite() && var >= -1e-10);

    // Write-back preserves the format and the predictions.
    let rewritten = dir.path().join("rewritten.model");
    model.write_to(&rewritten).unwrap();
    let content = fs::read_to_string(&rewritten).unwrap();
    assert!(content.contains("[mean]"));
}
