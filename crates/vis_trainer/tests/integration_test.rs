//! End-to-end tests for the trainer and batch predictor
//!
//! Trains on small synthetic vertex files, then scores new files with the
//! persisted artifacts.

use anyhow::Result;
use meshvis_core::{ArtifactPaths, ClassifierConfig, ModelArtifact, PipelineConfig};
use meshvis_trainer::{
    predict_dir, train_from_dir, CsvTable, ErrorPolicy, Predictor, TrainMode, Trainer,
};
use std::io::Write;
use std::path::Path;
use tempfile::tempdir;

fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.training.epochs = 3;
    config.training.batch_size = 4;
    config.classifier = ClassifierConfig {
        filters: 4,
        hidden: 8,
        ..Default::default()
    };
    config
}

/// Write a labelled training file: one passthrough column plus connectivity
fn write_training_file(dir: &Path, name: &str) -> Result<()> {
    let mut file = std::fs::File::create(dir.join(name))?;
    writeln!(file, "area,Connected_Vertices,Is_Visible,BehindAMesh,Out_Of_Frame")?;
    writeln!(file, "12.5,1 2,True,False,False")?;
    for i in 0..15 {
        let visible = i % 3 == 0;
        let behind = !visible && i % 2 == 0;
        let out = !visible && !behind;
        writeln!(
            file,
            "{}.0,{} {} {},{},{},{}",
            i,
            i,
            i + 1,
            i + 7,
            visible as u8,
            behind as u8,
            out as u8
        )?;
    }
    file.flush()?;
    Ok(())
}

#[test]
fn test_train_then_predict() -> Result<()> {
    let root = tempdir()?;
    let train_dir = root.path().join("train");
    let predict_dir_path = root.path().join("control");
    let artifacts = root.path().join("artifacts");
    std::fs::create_dir_all(&train_dir)?;
    std::fs::create_dir_all(&predict_dir_path)?;
    write_training_file(&train_dir, "scene_a.csv")?;

    let report = train_from_dir(&train_dir, &artifacts, test_config(), TrainMode::Fresh)?;
    assert_eq!(report.files.len(), 1);
    assert_eq!(report.samples, 16);
    assert_eq!(report.features, 31);
    assert_eq!(report.history.losses.len(), 3);
    assert!(report.history.losses.iter().all(|l| l.is_finite()));

    std::fs::write(
        predict_dir_path.join("control.csv"),
        "area,Connected_Vertices\n7.0,1\n",
    )?;

    let batch = predict_dir(
        &predict_dir_path,
        &artifacts,
        test_config(),
        ErrorPolicy::ContinueOnError,
    )?;
    assert!(batch.is_success());
    assert_eq!(batch.written.len(), 1);

    let output = CsvTable::read(&batch.written[0])?;
    assert_eq!(
        output.path.file_name().and_then(|n| n.to_str()),
        Some("Predicted_control.csv")
    );
    assert_eq!(
        output.headers,
        vec![
            "area",
            "Predicted_Is_Visible",
            "Predicted_BehindAMesh",
            "Predicted_Out_Of_Frame"
        ]
    );
    assert_eq!(output.len(), 1);
    assert_eq!(&output.records[0][0], "7.0");
    Ok(())
}

#[test]
fn test_training_is_reproducible() -> Result<()> {
    let root = tempdir()?;
    write_training_file(root.path(), "scene.csv")?;

    let first = ArtifactPaths::new(root.path().join("first"));
    let second = ArtifactPaths::new(root.path().join("second"));
    let a = Trainer::new(test_config(), TrainMode::Fresh).run(root.path(), &first)?;
    let b = Trainer::new(test_config(), TrainMode::Fresh).run(root.path(), &second)?;

    assert_eq!(a.history, b.history);
    assert_eq!(a.scaler_hash, b.scaler_hash);

    let model_a = ModelArtifact::load(&first)?;
    let model_b = ModelArtifact::load(&second)?;
    let x = ndarray::Array2::<f32>::zeros((2, 31));
    assert_eq!(
        model_a.classifier.predict_proba(&x)?,
        model_b.classifier.predict_proba(&x)?
    );
    Ok(())
}

#[test]
fn test_resume_accumulates_epochs() -> Result<()> {
    let root = tempdir()?;
    let data = root.path().join("data");
    std::fs::create_dir_all(&data)?;
    write_training_file(&data, "scene.csv")?;
    let artifacts = root.path().join("artifacts");

    train_from_dir(&data, &artifacts, test_config(), TrainMode::Fresh)?;
    let resumed = train_from_dir(&data, &artifacts, test_config(), TrainMode::Resume)?;
    assert!(resumed.resumed);
    assert_eq!(resumed.epochs_trained, 6);

    let stored = ModelArtifact::load(&ArtifactPaths::new(&artifacts))?;
    assert_eq!(stored.classifier.epochs_trained(), 6);
    Ok(())
}

#[test]
fn test_corrupt_artifact_rejected() -> Result<()> {
    let root = tempdir()?;
    let data = root.path().join("data");
    std::fs::create_dir_all(&data)?;
    write_training_file(&data, "scene.csv")?;
    let artifacts = root.path().join("artifacts");
    train_from_dir(&data, &artifacts, test_config(), TrainMode::Fresh)?;

    let paths = ArtifactPaths::new(&artifacts);
    let mut json = std::fs::read_to_string(paths.model())?;
    json.push(' ');
    std::fs::write(paths.model(), json)?;

    let err = match Predictor::load(&paths, test_config()) {
        Ok(_) => panic!("corrupt model accepted"),
        Err(err) => err,
    };
    assert!(err.is_artifact(), "{}", err);
    Ok(())
}

#[test]
fn test_batch_continues_past_bad_file() -> Result<()> {
    let root = tempdir()?;
    let data = root.path().join("data");
    let batch = root.path().join("batch");
    std::fs::create_dir_all(&data)?;
    std::fs::create_dir_all(&batch)?;
    write_training_file(&data, "scene.csv")?;
    let artifacts = root.path().join("artifacts");
    train_from_dir(&data, &artifacts, test_config(), TrainMode::Fresh)?;

    std::fs::write(batch.join("a.csv"), "area,Connected_Vertices\n1.0,2 3\n")?;
    std::fs::write(batch.join("b.csv"), "area\n1.0\n")?;
    std::fs::write(batch.join("c.csv"), "area,Connected_Vertices\n4.0,\n")?;

    let report = predict_dir(&batch, &artifacts, test_config(), ErrorPolicy::ContinueOnError)?;
    assert_eq!(report.written.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].path, batch.join("b.csv"));
    assert!(report.failed[0].error.is_schema());
    assert!(batch.join("Predicted_a.csv").exists());
    assert!(batch.join("Predicted_c.csv").exists());
    assert!(!batch.join("Predicted_b.csv").exists());
    Ok(())
}

#[test]
fn test_reordered_columns_realigned() -> Result<()> {
    let root = tempdir()?;
    let data = root.path().join("data");
    std::fs::create_dir_all(&data)?;
    std::fs::write(
        data.join("scene.csv"),
        "area,depth,Connected_Vertices,Is_Visible,BehindAMesh,Out_Of_Frame\n\
         1.0,10.0,1 2,1,0,0\n\
         2.0,20.0,3,0,1,0\n\
         3.0,30.0,4 5 6,0,0,1\n\
         4.0,40.0,,1,0,0\n",
    )?;
    let artifacts = ArtifactPaths::new(root.path().join("artifacts"));
    Trainer::new(test_config(), TrainMode::Fresh).run(&data, &artifacts)?;
    let predictor = Predictor::load(&artifacts, test_config())?;

    let ordered = root.path().join("ordered.csv");
    let shuffled = root.path().join("shuffled.csv");
    std::fs::write(&ordered, "area,depth,Connected_Vertices\n2.5,12.0,1 9\n")?;
    std::fs::write(&shuffled, "Connected_Vertices,depth,area\n1 9,12.0,2.5\n")?;

    let a = predictor.predict_table(&CsvTable::read(&ordered)?)?;
    let b = predictor.predict_table(&CsvTable::read(&shuffled)?)?;
    assert_eq!(a, b);

    let features_a = predictor.encode_table(&CsvTable::read(&ordered)?)?;
    let features_b = predictor.encode_table(&CsvTable::read(&shuffled)?)?;
    assert_eq!(features_a, features_b);
    assert_eq!(features_a.ncols(), 32);
    Ok(())
}

#[test]
fn test_schema_drift_aborts_training() -> Result<()> {
    let root = tempdir()?;
    write_training_file(root.path(), "a.csv")?;
    std::fs::write(
        root.path().join("b.csv"),
        "area,depth,Connected_Vertices,Is_Visible,BehindAMesh,Out_Of_Frame\n1,2,3,1,0,0\n",
    )?;
    let artifacts = ArtifactPaths::new(root.path().join("artifacts"));

    let err = match Trainer::new(test_config(), TrainMode::Fresh).run(root.path(), &artifacts) {
        Ok(_) => panic!("mismatched training files accepted"),
        Err(err) => err,
    };
    assert!(err.is_schema(), "{}", err);
    assert!(!artifacts.scaler().exists());
    Ok(())
}
