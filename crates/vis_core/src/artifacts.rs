//! Persisted scaler and model artifacts
//!
//! Each artifact is a canonical JSON document plus a sibling `.hash` file
//! holding the hex BLAKE3 digest of that document. Files are written to a
//! temporary path in the target directory and renamed into place, so a
//! reader never observes a half-written artifact.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::classifier::VisibilityClassifier;
use crate::errors::{Result, VisError};
use crate::features::FeatureSchema;
use crate::scaler::StandardScaler;
use crate::serialization::{blake3_hex, canonical_digest};

/// Bumped whenever the on-disk layout changes incompatibly
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

pub const SCALER_FILE: &str = "scaler.json";
pub const SCALER_HASH_FILE: &str = "scaler.hash";
pub const MODEL_FILE: &str = "model.json";
pub const MODEL_HASH_FILE: &str = "model.hash";

/// Locations of both artifacts inside one directory
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub dir: PathBuf,
}

impl ArtifactPaths {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn scaler(&self) -> PathBuf {
        self.dir.join(SCALER_FILE)
    }

    pub fn scaler_hash(&self) -> PathBuf {
        self.dir.join(SCALER_HASH_FILE)
    }

    pub fn model(&self) -> PathBuf {
        self.dir.join(MODEL_FILE)
    }

    pub fn model_hash(&self) -> PathBuf {
        self.dir.join(MODEL_HASH_FILE)
    }

    pub fn model_exists(&self) -> bool {
        self.model().exists()
    }
}

/// Fitted scaler together with the schema it was fitted against
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerArtifact {
    pub format_version: u32,
    pub created_at: u64,
    pub schema: FeatureSchema,
    pub scaler: StandardScaler,
}

impl ScalerArtifact {
    pub fn new(schema: FeatureSchema, scaler: StandardScaler) -> Result<Self> {
        let artifact = Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            created_at: chrono::Utc::now().timestamp() as u64,
            schema,
            scaler,
        };
        artifact.validate()?;
        Ok(artifact)
    }

    pub fn validate(&self) -> Result<()> {
        check_version(self.format_version, "scaler")?;
        self.scaler.validate()?;
        if self.schema.feature_count() != self.scaler.n_features() {
            return Err(VisError::Artifact(format!(
                "schema describes {} features but scaler was fitted on {}",
                self.schema.feature_count(),
                self.scaler.n_features()
            )));
        }
        Ok(())
    }

    /// Write the artifact, returning its hash
    pub fn save(&self, paths: &ArtifactPaths) -> Result<String> {
        write_artifact(&paths.scaler(), &paths.scaler_hash(), self)
    }

    pub fn load(paths: &ArtifactPaths) -> Result<Self> {
        let artifact: Self = read_artifact(&paths.scaler(), &paths.scaler_hash())?;
        artifact.validate()?;
        Ok(artifact)
    }
}

/// Trained classifier checkpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub created_at: u64,
    pub classifier: VisibilityClassifier,
}

impl ModelArtifact {
    pub fn new(classifier: VisibilityClassifier) -> Self {
        Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            created_at: chrono::Utc::now().timestamp() as u64,
            classifier,
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_version(self.format_version, "model")?;
        self.classifier.validate()
    }

    pub fn save(&self, paths: &ArtifactPaths) -> Result<String> {
        write_artifact(&paths.model(), &paths.model_hash(), self)
    }

    pub fn load(paths: &ArtifactPaths) -> Result<Self> {
        let artifact: Self = read_artifact(&paths.model(), &paths.model_hash())?;
        artifact.validate()?;
        Ok(artifact)
    }
}

/// Load and cross-check both artifacts
pub fn load_artifacts(paths: &ArtifactPaths) -> Result<(ScalerArtifact, ModelArtifact)> {
    let scaler = ScalerArtifact::load(paths)?;
    let model = ModelArtifact::load(paths)?;
    if scaler.schema.feature_count() != model.classifier.input_width() {
        return Err(VisError::Artifact(format!(
            "scaler expects {} features but model expects {}",
            scaler.schema.feature_count(),
            model.classifier.input_width()
        )));
    }
    info!(
        dir = %paths.dir.display(),
        features = scaler.schema.feature_count(),
        epochs_trained = model.classifier.epochs_trained(),
        "loaded artifacts"
    );
    Ok((scaler, model))
}

/// Read the stored hash of an artifact
pub fn read_hash(hash_path: &Path) -> Result<String> {
    std::fs::read_to_string(hash_path)
        .map(|s| s.trim().to_string())
        .map_err(|e| VisError::Artifact(format!("cannot read {}: {}", hash_path.display(), e)))
}

fn check_version(version: u32, what: &str) -> Result<()> {
    if version != ARTIFACT_FORMAT_VERSION {
        return Err(VisError::Artifact(format!(
            "{} artifact has format version {}, expected {}",
            what, version, ARTIFACT_FORMAT_VERSION
        )));
    }
    Ok(())
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| VisError::Io(e.error))?;
    Ok(())
}

fn write_artifact<T: Serialize>(json_path: &Path, hash_path: &Path, value: &T) -> Result<String> {
    let (json, hash) = canonical_digest(value)?;
    write_atomic(json_path, json.as_bytes())?;
    write_atomic(hash_path, hash.as_bytes())?;
    debug!(path = %json_path.display(), hash = %hash, "wrote artifact");
    Ok(hash)
}

fn read_artifact<T: DeserializeOwned>(json_path: &Path, hash_path: &Path) -> Result<T> {
    let json = std::fs::read_to_string(json_path)
        .map_err(|e| VisError::Artifact(format!("cannot read {}: {}", json_path.display(), e)))?;
    let expected = read_hash(hash_path)?;
    let actual = blake3_hex(json.as_bytes());
    if actual != expected {
        return Err(VisError::Artifact(format!(
            "hash mismatch for {}: expected {}, found {}",
            json_path.display(),
            expected,
            actual
        )));
    }
    serde_json::from_str(&json)
        .map_err(|e| VisError::Artifact(format!("cannot parse {}: {}", json_path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ClassifierConfig;
    use crate::encoder::EncoderConfig;
    use crate::features::LabelConfig;
    use ndarray::Array2;
    use tempfile::tempdir;

    fn schema() -> FeatureSchema {
        FeatureSchema::from_headers(
            &["area", "Connected_Vertices"],
            &EncoderConfig::default(),
            &LabelConfig::default(),
        )
        .unwrap()
    }

    fn scaler_artifact() -> ScalerArtifact {
        let x = Array2::from_shape_fn((4, 31), |(r, c)| (r * c) as f64);
        ScalerArtifact::new(schema(), StandardScaler::fit(&x).unwrap()).unwrap()
    }

    fn model_artifact() -> ModelArtifact {
        let config = ClassifierConfig {
            filters: 2,
            hidden: 4,
            ..Default::default()
        };
        ModelArtifact::new(VisibilityClassifier::new(31, config).unwrap())
    }

    #[test]
    fn test_save_and_load_pair() {
        let dir = tempdir().unwrap();
        let paths = ArtifactPaths::new(dir.path());

        let scaler_hash = scaler_artifact().save(&paths).unwrap();
        let model_hash = model_artifact().save(&paths).unwrap();
        assert_eq!(read_hash(&paths.scaler_hash()).unwrap(), scaler_hash);
        assert_eq!(read_hash(&paths.model_hash()).unwrap(), model_hash);

        let (scaler, model) = load_artifacts(&paths).unwrap();
        assert_eq!(scaler.schema, schema());
        assert_eq!(model.classifier.input_width(), 31);
    }

    #[test]
    fn test_missing_artifact() {
        let dir = tempdir().unwrap();
        let paths = ArtifactPaths::new(dir.path());
        assert!(!paths.model_exists());
        assert!(matches!(load_artifacts(&paths), Err(VisError::Artifact(_))));
    }

    #[test]
    fn test_tampered_artifact_rejected() {
        let dir = tempdir().unwrap();
        let paths = ArtifactPaths::new(dir.path());
        scaler_artifact().save(&paths).unwrap();

        let json = std::fs::read_to_string(paths.scaler()).unwrap();
        std::fs::write(paths.scaler(), json.replace("area", "volume")).unwrap();

        assert!(matches!(
            ScalerArtifact::load(&paths),
            Err(VisError::Artifact(_))
        ));
    }

    #[test]
    fn test_width_disagreement_rejected() {
        let dir = tempdir().unwrap();
        let paths = ArtifactPaths::new(dir.path());
        scaler_artifact().save(&paths).unwrap();
        let narrow = VisibilityClassifier::new(
            20,
            ClassifierConfig {
                filters: 2,
                hidden: 4,
                ..Default::default()
            },
        )
        .unwrap();
        ModelArtifact::new(narrow).save(&paths).unwrap();

        assert!(matches!(load_artifacts(&paths), Err(VisError::Artifact(_))));
    }

    #[test]
    fn test_schema_scaler_mismatch_rejected() {
        let x = Array2::from_shape_fn((3, 5), |(r, c)| (r + c) as f64);
        let result = ScalerArtifact::new(schema(), StandardScaler::fit(&x).unwrap());
        assert!(matches!(result, Err(VisError::Artifact(_))));
    }
}
