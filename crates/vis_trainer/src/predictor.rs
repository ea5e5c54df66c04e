//! Batch inference over a directory of vertex CSVs
//!
//! For each input file the predictor re-applies the persisted schema and
//! scaler, runs the classifier and writes `Predicted_<name>` next to the
//! input. The output keeps every original column except the connectivity
//! field and appends one 1/0 column per label.

use meshvis_core::{
    load_artifacts, ArtifactPaths, FeatureSchema, LabelMode, PipelineConfig, Prediction,
    StandardScaler, VisError, VisibilityClassifier,
};
use ndarray::Array2;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::dataset::{list_csv_files, CsvTable};
use crate::errors::{Result, TrainerError};

/// What to do when one file of a batch fails
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    #[default]
    ContinueOnError,
    FailFast,
}

#[derive(Debug)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: TrainerError,
}

/// Outcome of a batch run
#[derive(Debug, Default)]
pub struct BatchReport {
    pub written: Vec<PathBuf>,
    pub failed: Vec<FileFailure>,
    /// Inputs that already carry the output prefix
    pub skipped: Vec<PathBuf>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Loaded artifacts ready to score files
pub struct Predictor {
    config: PipelineConfig,
    schema: FeatureSchema,
    scaler: StandardScaler,
    classifier: VisibilityClassifier,
}

impl Predictor {
    /// Load and verify both artifacts
    pub fn load(paths: &ArtifactPaths, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let (scaler, model) = load_artifacts(paths)?;
        if scaler.schema.encoder() != config.encoder {
            warn!("encoder settings differ from the trained schema; using the trained schema");
        }
        Ok(Self {
            config,
            schema: scaler.schema,
            scaler: scaler.scaler,
            classifier: model.classifier,
        })
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Output location for an input file
    pub fn output_path(&self, input: &Path) -> PathBuf {
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        input.with_file_name(format!("{}{}", self.config.prediction.output_prefix, name))
    }

    /// Encode a table with the persisted schema, ignoring any label cells
    pub fn encode_table(&self, table: &CsvTable) -> Result<Array2<f64>> {
        let layout = self
            .schema
            .layout(&table.headers, &self.config.labels, LabelMode::Ignored)
            .map_err(|e| match e {
                VisError::Schema(msg) => {
                    VisError::Schema(format!("{}: {}", table.path.display(), msg))
                }
                other => other,
            })?;
        let (features, _) = table.encode(&layout, self.schema.feature_count())?;
        Ok(features)
    }

    /// Scale, score and threshold every row of a table
    pub fn predict_table(&self, table: &CsvTable) -> Result<Vec<Prediction>> {
        debug!(stage = "ENCODE", path = %table.path.display());
        let features = self.encode_table(table)?;
        debug!(stage = "SCALE", rows = features.nrows());
        let scaled = self.scaler.transform(&features)?.mapv(|v| v as f32);
        debug!(stage = "INFER", threshold = self.config.prediction.threshold);
        let predictions = self
            .classifier
            .predict(&scaled, self.config.prediction.threshold)?;
        Ok(predictions)
    }

    /// Predict one file and write its output, returning the output path
    pub fn predict_file(&self, input: &Path) -> Result<PathBuf> {
        debug!(stage = "LOAD", path = %input.display());
        let table = CsvTable::read(input)?;
        let predictions = self.predict_table(&table)?;
        let output = self.output_path(input);
        debug!(stage = "EMIT", path = %output.display());
        self.write_output(&table, &predictions, &output)?;
        info!(
            input = %input.display(),
            output = %output.display(),
            rows = predictions.len(),
            "wrote predictions"
        );
        Ok(output)
    }

    /// Predict every CSV in `dir`
    pub fn predict_dir(&self, dir: &Path, policy: ErrorPolicy) -> Result<BatchReport> {
        let (files, skipped) = list_csv_files(dir, Some(&self.config.prediction.output_prefix))?;
        if files.is_empty() {
            return Err(TrainerError::NoInputFiles(dir.display().to_string()));
        }
        for path in &skipped {
            info!(path = %path.display(), "skipping existing prediction output");
        }

        let mut report = BatchReport {
            skipped,
            ..Default::default()
        };
        for path in files {
            match self.predict_file(&path) {
                Ok(output) => report.written.push(output),
                Err(err) if policy == ErrorPolicy::FailFast => return Err(err),
                Err(err) => {
                    error!(path = %path.display(), "prediction failed: {}", err);
                    report.failed.push(FileFailure { path, error: err });
                }
            }
        }

        info!(
            written = report.written.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "batch complete"
        );
        Ok(report)
    }

    fn write_output(&self, table: &CsvTable, predictions: &[Prediction], output: &Path) -> Result<()> {
        let dropped = table
            .headers
            .iter()
            .position(|h| *h == self.schema.connectivity_column);
        let kept: Vec<usize> = (0..table.headers.len())
            .filter(|idx| Some(*idx) != dropped)
            .collect();

        let mut header: Vec<String> = kept.iter().map(|&idx| table.headers[idx].clone()).collect();
        header.extend(
            self.config
                .prediction
                .prediction_columns(&self.config.labels),
        );

        let dir = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let tmp = tempfile::NamedTempFile::new_in(dir)?;
        let mut writer = csv::Writer::from_writer(tmp.as_file());
        writer
            .write_record(&header)
            .map_err(|e| TrainerError::csv(output, e))?;

        for (record, prediction) in table.records.iter().zip(predictions) {
            let mut row: Vec<&str> = kept
                .iter()
                .map(|&idx| record.get(idx).unwrap_or(""))
                .collect();
            row.extend(
                prediction
                    .as_array()
                    .iter()
                    .map(|&flag| if flag { "1" } else { "0" }),
            );
            writer
                .write_record(&row)
                .map_err(|e| TrainerError::csv(output, e))?;
        }
        writer.flush()?;
        drop(writer);

        tmp.persist(output).map_err(|e| TrainerError::Io(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trainer::{TrainMode, Trainer};
    use meshvis_core::ClassifierConfig;
    use tempfile::tempdir;

    fn small_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.training.epochs = 1;
        config.training.batch_size = 2;
        config.classifier = ClassifierConfig {
            filters: 2,
            hidden: 4,
            ..Default::default()
        };
        config
    }

    fn trained(dir: &Path) -> ArtifactPaths {
        let input = dir.join("train");
        std::fs::create_dir_all(&input).unwrap();
        std::fs::write(
            input.join("learn.csv"),
            "area,Connected_Vertices,Is_Visible,BehindAMesh,Out_Of_Frame\n\
             12.5,1 2,1,0,0\n\
             3.0,4 5 6,0,1,0\n\
             7.5,,0,0,1\n",
        )
        .unwrap();
        let paths = ArtifactPaths::new(dir.join("artifacts"));
        Trainer::new(small_config(), TrainMode::Fresh)
            .run(&input, &paths)
            .unwrap();
        paths
    }

    #[test]
    fn test_output_path() {
        let dir = tempdir().unwrap();
        let predictor = Predictor::load(&trained(dir.path()), small_config()).unwrap();
        assert_eq!(
            predictor.output_path(Path::new("/data/scene.csv")),
            PathBuf::from("/data/Predicted_scene.csv")
        );
    }

    #[test]
    fn test_predict_file_columns() {
        let dir = tempdir().unwrap();
        let predictor = Predictor::load(&trained(dir.path()), small_config()).unwrap();

        let input = dir.path().join("control.csv");
        std::fs::write(
            &input,
            "area,Connected_Vertices,Is_Visible,BehindAMesh,Out_Of_Frame\n7.0,1,,,\n2.0,3 4,1,0,0\n",
        )
        .unwrap();

        let output = predictor.predict_file(&input).unwrap();
        let written = CsvTable::read(&output).unwrap();
        assert_eq!(
            written.headers,
            vec![
                "area",
                "Is_Visible",
                "BehindAMesh",
                "Out_Of_Frame",
                "Predicted_Is_Visible",
                "Predicted_BehindAMesh",
                "Predicted_Out_Of_Frame",
            ]
        );
        assert_eq!(written.len(), 2);
        assert_eq!(&written.records[0][0], "7.0");
        assert_eq!(&written.records[1][1], "1");
        for record in &written.records {
            for cell in record.iter().skip(4) {
                assert!(cell == "0" || cell == "1", "{}", cell);
            }
        }
    }

    #[test]
    fn test_unknown_column_rejected() {
        let dir = tempdir().unwrap();
        let predictor = Predictor::load(&trained(dir.path()), small_config()).unwrap();
        let input = dir.path().join("extra.csv");
        std::fs::write(&input, "area,volume,Connected_Vertices\n1,2,3\n").unwrap();

        let err = predictor.predict_file(&input).unwrap_err();
        assert!(err.is_schema(), "{}", err);
        assert!(!predictor.output_path(&input).exists());
    }

    #[test]
    fn test_missing_artifacts() {
        let dir = tempdir().unwrap();
        let result = Predictor::load(&ArtifactPaths::new(dir.path()), small_config());
        assert!(result.err().map(|e| e.is_artifact()).unwrap_or(false));
    }

    #[test]
    fn test_batch_policies() {
        let dir = tempdir().unwrap();
        let predictor = Predictor::load(&trained(dir.path()), small_config()).unwrap();
        let batch = dir.path().join("batch");
        std::fs::create_dir_all(&batch).unwrap();
        std::fs::write(batch.join("a_bad.csv"), "area,Connected_Vertices\nnope,1\n").unwrap();
        std::fs::write(batch.join("b_good.csv"), "area,Connected_Vertices\n1.0,1 2\n").unwrap();
        std::fs::write(batch.join("Predicted_old.csv"), "x\n1\n").unwrap();

        let report = predictor
            .predict_dir(&batch, ErrorPolicy::ContinueOnError)
            .unwrap();
        assert!(!report.is_success());
        assert_eq!(report.written, vec![batch.join("Predicted_b_good.csv")]);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].error.is_encoding());
        assert_eq!(report.skipped, vec![batch.join("Predicted_old.csv")]);

        std::fs::remove_file(batch.join("Predicted_b_good.csv")).unwrap();
        let err = predictor.predict_dir(&batch, ErrorPolicy::FailFast).unwrap_err();
        assert!(err.is_encoding());
        assert!(!batch.join("Predicted_b_good.csv").exists());
    }
}
