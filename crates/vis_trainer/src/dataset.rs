//! CSV loading and feature matrix construction
//!
//! Reads vertex observation CSVs (one header row, one row per vertex),
//! binds each file to the feature schema and produces the numeric feature
//! matrix and, for training, the `(rows, 3)` label matrix.

use meshvis_core::{
    FeatureSchema, LabelMode, LabelRow, PipelineConfig, RecordLayout, VisError,
};
use ndarray::Array2;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::errors::{Result, TrainerError};

/// One CSV file held in memory
#[derive(Clone, Debug)]
pub struct CsvTable {
    pub path: PathBuf,
    pub headers: Vec<String>,
    pub records: Vec<csv::StringRecord>,
}

impl CsvTable {
    /// Read a CSV file with a header row
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(|e| TrainerError::csv(path, e))?;

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| TrainerError::csv(path, e))?
            .iter()
            .map(|h| h.to_string())
            .collect();

        let mut records = Vec::new();
        for result in reader.records() {
            let record = result.map_err(|e| TrainerError::csv(path, e))?;
            if record.len() > headers.len() {
                return Err(VisError::Encoding(format!(
                    "{}: line {}: {} fields for {} columns",
                    path.display(),
                    line_of(&record),
                    record.len(),
                    headers.len()
                ))
                .into());
            }
            records.push(record);
        }

        debug!(path = %path.display(), rows = records.len(), "read CSV");
        Ok(Self {
            path: path.to_path_buf(),
            headers,
            records,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Derive the feature schema from this table's header
    pub fn schema(&self, config: &PipelineConfig) -> Result<FeatureSchema> {
        FeatureSchema::from_headers(&self.headers, &config.encoder, &config.labels)
            .map_err(|e| self.annotate(e, None))
    }

    /// Encode every record into a feature matrix, collecting labels when the
    /// layout was bound with [`LabelMode::Required`]
    pub fn encode(&self, layout: &RecordLayout, width: usize) -> Result<(Array2<f64>, Vec<LabelRow>)> {
        let mut values = Vec::with_capacity(self.records.len() * width);
        let mut labels = Vec::new();

        for record in &self.records {
            let (row, label) = layout
                .assemble(&record.iter().collect::<Vec<_>>())
                .map_err(|e| self.annotate(e, Some(record)))?;
            let numeric = row.to_numeric().map_err(|e| self.annotate(e, Some(record)))?;
            values.extend(numeric);
            if let Some(label) = label {
                labels.push(label);
            }
        }

        let matrix = Array2::from_shape_vec((self.records.len(), width), values).map_err(|e| {
            VisError::Schema(format!("{}: {}", self.path.display(), e))
        })?;
        Ok((matrix, labels))
    }

    /// Prefix a core error with the file and line it came from
    fn annotate(&self, err: VisError, record: Option<&csv::StringRecord>) -> TrainerError {
        let location = match record {
            Some(r) => format!("{}: line {}", self.path.display(), line_of(r)),
            None => self.path.display().to_string(),
        };
        let err = match err {
            VisError::Schema(msg) => VisError::Schema(format!("{}: {}", location, msg)),
            VisError::Encoding(msg) => VisError::Encoding(format!("{}: {}", location, msg)),
            other => other,
        };
        err.into()
    }
}

fn line_of(record: &csv::StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or(0)
}

/// List `*.csv` files in `dir`, sorted by name.
///
/// Files whose name starts with `skip_prefix` are returned separately.
pub fn list_csv_files(dir: &Path, skip_prefix: Option<&str>) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let mut files = Vec::new();
    let mut skipped = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_csv = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        if !path.is_file() || !is_csv {
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match skip_prefix {
            Some(prefix) if name.starts_with(prefix) => skipped.push(path),
            _ => files.push(path),
        }
    }

    files.sort();
    skipped.sort();
    Ok((files, skipped))
}

/// All training rows, concatenated across files
#[derive(Clone, Debug)]
pub struct TrainingSet {
    pub schema: FeatureSchema,
    pub features: Array2<f64>,
    pub labels: Array2<f32>,
    pub files: Vec<PathBuf>,
}

impl TrainingSet {
    /// Load every training CSV in `dir`
    pub fn load_dir(dir: &Path, config: &PipelineConfig) -> Result<Self> {
        let (files, skipped) = list_csv_files(dir, Some(&config.prediction.output_prefix))?;
        for path in &skipped {
            debug!(path = %path.display(), "skipping prediction output");
        }
        if files.is_empty() {
            return Err(TrainerError::NoInputFiles(dir.display().to_string()));
        }
        Self::from_files(&files, config)
    }

    /// Load the given training CSVs.
    ///
    /// Every file must carry the three label columns and share the first
    /// file's feature schema.
    pub fn from_files(files: &[PathBuf], config: &PipelineConfig) -> Result<Self> {
        let mut schema: Option<FeatureSchema> = None;
        let mut blocks = Vec::with_capacity(files.len());
        let mut labels = Vec::new();

        for path in files {
            let table = CsvTable::read(path)?;
            let file_schema = table.schema(config)?;
            if schema.is_none() {
                schema = Some(file_schema.clone());
            }
            if let Some(expected) = &schema {
                expected
                    .ensure_compatible(&file_schema)
                    .map_err(|e| table.annotate(e, None))?;
            }

            let layout = file_schema
                .layout(&table.headers, &config.labels, LabelMode::Required)
                .map_err(|e| table.annotate(e, None))?;
            let (block, file_labels) = table.encode(&layout, file_schema.feature_count())?;

            info!(path = %path.display(), rows = table.len(), "loaded training file");
            blocks.push(block);
            labels.extend(file_labels);
        }

        let schema = schema.ok_or_else(|| TrainerError::NoInputFiles("<empty file list>".to_string()))?;
        let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
        let features = ndarray::concatenate(ndarray::Axis(0), &views)
            .map_err(|e| VisError::Schema(e.to_string()))?;
        if features.nrows() == 0 {
            return Err(VisError::InvalidParameters("training data has no rows".to_string()).into());
        }

        let label_values: Vec<f32> = labels.iter().flat_map(|l| l.to_array()).collect();
        let labels = Array2::from_shape_vec((labels.len(), 3), label_values)
            .map_err(|e| VisError::Schema(e.to_string()))?;

        Ok(Self {
            schema,
            features,
            labels,
            files: files.to_vec(),
        })
    }

    pub fn len(&self) -> usize {
        self.features.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.features.nrows() == 0
    }

    pub fn feature_count(&self) -> usize {
        self.features.ncols()
    }

    /// Fraction of positive rows per label
    pub fn positive_rates(&self) -> [f32; 3] {
        let n = self.labels.nrows().max(1) as f32;
        let mut rates = [0.0; 3];
        for (i, rate) in rates.iter_mut().enumerate() {
            *rate = self.labels.column(i).sum() / n;
        }
        rates
    }
}
