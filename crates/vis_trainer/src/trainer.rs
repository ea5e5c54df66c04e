//! Training run orchestration
//!
//! A run moves through three stages: LOAD (read and encode every training
//! file), FIT (refit the scaler, then fit a fresh or resumed classifier) and
//! PERSIST (overwrite both artifacts). Any failure aborts the run before
//! anything is written.

use meshvis_core::{
    ArtifactPaths, FeatureSchema, FitHistory, ModelArtifact, PipelineConfig, ScalerArtifact,
    StandardScaler, VisError, VisibilityClassifier,
};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::dataset::TrainingSet;
use crate::errors::Result;

/// Whether a run starts from new weights or continues an existing model
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrainMode {
    Fresh,
    Resume,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrainerStage {
    Load,
    Fit,
    Persist,
}

impl fmt::Display for TrainerStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrainerStage::Load => "LOAD",
            TrainerStage::Fit => "FIT",
            TrainerStage::Persist => "PERSIST",
        };
        f.write_str(name)
    }
}

/// Summary of a completed training run
#[derive(Clone, Debug)]
pub struct TrainingReport {
    pub files: Vec<PathBuf>,
    pub samples: usize,
    pub features: usize,
    pub resumed: bool,
    pub history: FitHistory,
    pub epochs_trained: usize,
    pub scaler_hash: String,
    pub model_hash: String,
    pub artifacts: PathBuf,
}

/// Visibility classifier trainer
pub struct Trainer {
    config: PipelineConfig,
    mode: TrainMode,
}

impl Trainer {
    pub fn new(config: PipelineConfig, mode: TrainMode) -> Self {
        Self { config, mode }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Train on every CSV in `input_dir` and write artifacts to `artifacts`
    pub fn run(&self, input_dir: &Path, artifacts: &ArtifactPaths) -> Result<TrainingReport> {
        self.config.validate()?;
        info!(stage = %TrainerStage::Load, dir = %input_dir.display(), "starting training run");
        let dataset = TrainingSet::load_dir(input_dir, &self.config)?;
        self.train(dataset, artifacts)
    }

    /// Train on an explicit list of CSV files
    pub fn run_on_files(&self, files: &[PathBuf], artifacts: &ArtifactPaths) -> Result<TrainingReport> {
        self.config.validate()?;
        info!(stage = %TrainerStage::Load, files = files.len(), "starting training run");
        let dataset = TrainingSet::from_files(files, &self.config)?;
        self.train(dataset, artifacts)
    }

    fn train(&self, dataset: TrainingSet, artifacts: &ArtifactPaths) -> Result<TrainingReport> {
        let rates = dataset.positive_rates();
        info!(
            samples = dataset.len(),
            features = dataset.feature_count(),
            files = dataset.files.len(),
            "Loaded training data"
        );
        info!(
            "Positive rates: {}={:.3} {}={:.3} {}={:.3}",
            self.config.labels.is_visible,
            rates[0],
            self.config.labels.behind_a_mesh,
            rates[1],
            self.config.labels.out_of_frame,
            rates[2]
        );

        info!(stage = %TrainerStage::Fit, "fitting scaler");
        let (scaler, scaled) = StandardScaler::fit_transform(&dataset.features)?;
        let x = scaled.mapv(|v| v as f32);

        let (mut classifier, resumed) = self.initial_classifier(&dataset.schema, artifacts)?;
        info!(
            stage = %TrainerStage::Fit,
            resumed,
            epochs = self.config.training.epochs,
            batch_size = self.config.training.batch_size,
            "fitting classifier"
        );
        let history = classifier.fit(
            &x,
            &dataset.labels,
            self.config.training.epochs,
            self.config.training.batch_size,
        )?;

        info!(stage = %TrainerStage::Persist, dir = %artifacts.dir.display(), "writing artifacts");
        let scaler_artifact = ScalerArtifact::new(dataset.schema.clone(), scaler)?;
        let scaler_hash = scaler_artifact.save(artifacts)?;
        let epochs_trained = classifier.epochs_trained();
        let model_hash = ModelArtifact::new(classifier).save(artifacts)?;

        info!(
            scaler_hash = %scaler_hash,
            model_hash = %model_hash,
            epochs_trained,
            "Training complete"
        );

        Ok(TrainingReport {
            files: dataset.files,
            samples: x.nrows(),
            features: x.ncols(),
            resumed,
            history,
            epochs_trained,
            scaler_hash,
            model_hash,
            artifacts: artifacts.dir.clone(),
        })
    }

    /// Fresh classifier, or the persisted one when resuming.
    ///
    /// A resumed model must have been trained on the same feature columns,
    /// in the same order, as the new data.
    fn initial_classifier(
        &self,
        schema: &FeatureSchema,
        artifacts: &ArtifactPaths,
    ) -> Result<(VisibilityClassifier, bool)> {
        let input_width = schema.feature_count();
        if self.mode == TrainMode::Resume {
            if artifacts.model_exists() {
                let stored = ScalerArtifact::load(artifacts)?;
                stored.schema.ensure_compatible(schema).map_err(|e| match e {
                    VisError::Schema(msg) => {
                        VisError::Schema(format!("cannot resume existing model: {}", msg))
                    }
                    other => other,
                })?;
                let checkpoint = ModelArtifact::load(artifacts)?;
                let classifier = checkpoint.classifier;
                if classifier.input_width() != input_width {
                    return Err(VisError::Schema(format!(
                        "existing model expects {} features, training data has {}",
                        classifier.input_width(),
                        input_width
                    ))
                    .into());
                }
                if classifier.config() != &self.config.classifier {
                    warn!("resuming with the stored classifier settings; configured settings are ignored");
                }
                info!(
                    epochs_trained = classifier.epochs_trained(),
                    "resuming from existing model"
                );
                return Ok((classifier, true));
            }
            warn!(
                path = %artifacts.model().display(),
                "no model to resume from, starting fresh"
            );
        }

        let classifier = VisibilityClassifier::new(input_width, self.config.classifier.clone())?;
        Ok((classifier, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshvis_core::ClassifierConfig;
    use std::io::Write;
    use tempfile::tempdir;

    fn small_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.training.epochs = 2;
        config.training.batch_size = 4;
        config.classifier = ClassifierConfig {
            filters: 4,
            hidden: 6,
            ..Default::default()
        };
        config
    }

    fn write_training_file(dir: &Path) {
        let mut file = std::fs::File::create(dir.join("learn.csv")).unwrap();
        writeln!(file, "Order,Distance_to_Camera,Connected_Vertices,Is_Visible,Out_Of_Frame,BehindAMesh").unwrap();
        for i in 0..12 {
            let visible = i % 2;
            writeln!(file, "{},{}.5,{} {} {},{},0,{}", i, i, i + 1, i + 2, i + 3, visible, 1 - visible).unwrap();
        }
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(TrainerStage::Load.to_string(), "LOAD");
        assert_eq!(TrainerStage::Fit.to_string(), "FIT");
        assert_eq!(TrainerStage::Persist.to_string(), "PERSIST");
    }

    #[test]
    fn test_fresh_run_writes_artifacts() {
        let input = tempdir().unwrap();
        let out = tempdir().unwrap();
        write_training_file(input.path());
        let paths = ArtifactPaths::new(out.path());

        let report = Trainer::new(small_config(), TrainMode::Fresh)
            .run(input.path(), &paths)
            .unwrap();

        assert_eq!(report.samples, 12);
        assert_eq!(report.features, 32);
        assert!(!report.resumed);
        assert_eq!(report.epochs_trained, 2);
        assert!(paths.scaler().exists());
        assert!(paths.model().exists());
    }

    #[test]
    fn test_resume_continues_training() {
        let input = tempdir().unwrap();
        let out = tempdir().unwrap();
        write_training_file(input.path());
        let paths = ArtifactPaths::new(out.path());

        Trainer::new(small_config(), TrainMode::Fresh)
            .run(input.path(), &paths)
            .unwrap();
        let report = Trainer::new(small_config(), TrainMode::Resume)
            .run(input.path(), &paths)
            .unwrap();

        assert!(report.resumed);
        assert_eq!(report.epochs_trained, 4);

        let fresh = Trainer::new(small_config(), TrainMode::Fresh)
            .run(input.path(), &paths)
            .unwrap();
        assert_eq!(fresh.epochs_trained, 2);
    }

    #[test]
    fn test_resume_without_model_starts_fresh() {
        let input = tempdir().unwrap();
        let out = tempdir().unwrap();
        write_training_file(input.path());

        let report = Trainer::new(small_config(), TrainMode::Resume)
            .run(input.path(), &ArtifactPaths::new(out.path()))
            .unwrap();
        assert!(!report.resumed);
    }

    #[test]
    fn test_resume_width_mismatch() {
        let input = tempdir().unwrap();
        let out = tempdir().unwrap();
        write_training_file(input.path());
        let paths = ArtifactPaths::new(out.path());
        Trainer::new(small_config(), TrainMode::Fresh)
            .run(input.path(), &paths)
            .unwrap();

        let mut wider = small_config();
        wider.encoder.width = 40;
        let err = Trainer::new(wider, TrainMode::Resume)
            .run(input.path(), &paths)
            .unwrap_err();
        assert!(err.is_schema(), "{}", err);
    }

    #[test]
    fn test_resume_schema_mismatch() {
        let out = tempdir().unwrap();
        let paths = ArtifactPaths::new(out.path());
        let header = "Connected_Vertices,Is_Visible,BehindAMesh,Out_Of_Frame";

        let first = tempdir().unwrap();
        std::fs::write(
            first.path().join("scene.csv"),
            format!("area,depth,{}\n1.0,2.0,1 2,1,0,0\n3.0,4.0,3,0,1,0\n", header),
        )
        .unwrap();
        Trainer::new(small_config(), TrainMode::Fresh)
            .run(first.path(), &paths)
            .unwrap();
        let model_before = std::fs::read(paths.model()).unwrap();

        // same width, different passthrough columns
        let second = tempdir().unwrap();
        std::fs::write(
            second.path().join("scene.csv"),
            format!("volume,area,{}\n1.0,2.0,1 2,1,0,0\n3.0,4.0,3,0,1,0\n", header),
        )
        .unwrap();
        let err = Trainer::new(small_config(), TrainMode::Resume)
            .run(second.path(), &paths)
            .unwrap_err();
        assert!(err.is_schema(), "{}", err);
        assert_eq!(std::fs::read(paths.model()).unwrap(), model_before);

        // reordered columns are rejected as well
        std::fs::write(
            second.path().join("scene.csv"),
            format!("depth,area,{}\n1.0,2.0,1 2,1,0,0\n3.0,4.0,3,0,1,0\n", header),
        )
        .unwrap();
        let err = Trainer::new(small_config(), TrainMode::Resume)
            .run(second.path(), &paths)
            .unwrap_err();
        assert!(err.is_schema(), "{}", err);
    }

    #[test]
    fn test_failed_load_writes_nothing() {
        let input = tempdir().unwrap();
        let out = tempdir().unwrap();
        std::fs::write(input.path().join("bad.csv"), "Connected_Vertices,Is_Visible\n1,1\n").unwrap();
        let paths = ArtifactPaths::new(out.path());

        let result = Trainer::new(small_config(), TrainMode::Fresh).run(input.path(), &paths);
        assert!(result.is_err());
        assert!(!paths.scaler().exists());
        assert!(!paths.model().exists());
    }
}
