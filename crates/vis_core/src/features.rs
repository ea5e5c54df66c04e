//! Feature schema and record assembly
//!
//! A raw record is split into three groups: the connectivity cell (handed to
//! the encoder), the three label cells, and every other column, which passes
//! through untouched. The assembled feature row is always
//! `passthrough (source order) ++ Vertex_0..Vertex_{width-1}`.
//!
//! The column order is captured in a [`FeatureSchema`] that is persisted next
//! to the fitted scaler, so inference files are checked against it instead of
//! being assumed to line up.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::encoder::{vertex_column_names, EncoderConfig, VERTEX_COLUMN_PREFIX};
use crate::errors::{Result, VisError};

/// Names of the three target columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    pub is_visible: String,
    pub behind_a_mesh: String,
    pub out_of_frame: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            is_visible: "Is_Visible".to_string(),
            behind_a_mesh: "BehindAMesh".to_string(),
            out_of_frame: "Out_Of_Frame".to_string(),
        }
    }
}

impl LabelConfig {
    /// Label names in output order
    pub fn names(&self) -> [&str; 3] {
        [
            self.is_visible.as_str(),
            self.behind_a_mesh.as_str(),
            self.out_of_frame.as_str(),
        ]
    }

    pub fn contains(&self, column: &str) -> bool {
        self.names().contains(&column)
    }

    pub fn validate(&self) -> Result<()> {
        let names = self.names();
        if names.iter().any(|n| n.trim().is_empty()) {
            return Err(VisError::InvalidParameters(
                "label column names must not be empty".to_string(),
            ));
        }
        let unique: HashSet<&str> = names.iter().copied().collect();
        if unique.len() != names.len() {
            return Err(VisError::InvalidParameters(format!(
                "label column names must be distinct: {:?}",
                names
            )));
        }
        Ok(())
    }
}

/// How label columns are treated when binding a header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelMode {
    /// All three label columns must be present and parseable
    Required,
    /// Label columns may be present or absent; their cells are never read
    Ignored,
}

/// Three independent binary targets for one vertex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRow {
    pub is_visible: bool,
    pub behind_a_mesh: bool,
    pub out_of_frame: bool,
}

impl LabelRow {
    pub fn to_array(&self) -> [f32; 3] {
        let f = |b: bool| if b { 1.0 } else { 0.0 };
        [f(self.is_visible), f(self.behind_a_mesh), f(self.out_of_frame)]
    }
}

/// Parse a label cell: `true`/`false` or a number (non-zero is true)
pub fn parse_label(cell: &str) -> Result<bool> {
    let trimmed = cell.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        return Ok(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Ok(false);
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v != 0.0),
        _ => Err(VisError::Encoding(format!(
            "invalid label value '{}'",
            cell
        ))),
    }
}

/// Parse a feature cell into the working numeric type
pub fn parse_feature(cell: &str) -> Result<f64> {
    match cell.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(VisError::Encoding(format!("'{}' is not a finite number", cell))),
    }
}

/// One assembled, label-free feature row (cells still in string form)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureRow {
    pub cells: Vec<String>,
}

impl FeatureRow {
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Cast every cell to `f64`
    pub fn to_numeric(&self) -> Result<Vec<f64>> {
        self.cells
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                parse_feature(cell)
                    .map_err(|e| VisError::Encoding(format!("feature {}: {}", i, strip_kind(e))))
            })
            .collect()
    }
}

fn strip_kind(err: VisError) -> String {
    match err {
        VisError::Encoding(msg) | VisError::Schema(msg) => msg,
        other => other.to_string(),
    }
}

/// Ordered description of the feature matrix columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    /// Non-label, non-connectivity columns in source order
    pub passthrough: Vec<String>,
    pub connectivity_column: String,
    pub width: usize,
    pub pad_value: String,
}

impl FeatureSchema {
    /// Derive the schema from a CSV header
    pub fn from_headers<S: AsRef<str>>(
        headers: &[S],
        encoder: &EncoderConfig,
        labels: &LabelConfig,
    ) -> Result<Self> {
        check_unique(headers)?;

        let mut found_connectivity = false;
        let mut passthrough = Vec::new();
        for header in headers {
            let name = header.as_ref();
            if name == encoder.connectivity_column {
                found_connectivity = true;
            } else if labels.contains(name) {
                continue;
            } else if is_vertex_column(name) {
                return Err(VisError::Schema(format!(
                    "column '{}' collides with encoded vertex columns",
                    name
                )));
            } else {
                passthrough.push(name.to_string());
            }
        }

        if !found_connectivity {
            return Err(VisError::Schema(format!(
                "missing connectivity column '{}'",
                encoder.connectivity_column
            )));
        }

        Ok(Self {
            passthrough,
            connectivity_column: encoder.connectivity_column.clone(),
            width: encoder.width,
            pad_value: encoder.pad_value.clone(),
        })
    }

    /// Positions of the three label columns, if all are present
    pub fn label_indices<S: AsRef<str>>(headers: &[S], labels: &LabelConfig) -> Option<[usize; 3]> {
        let mut idx = [0usize; 3];
        for (slot, name) in labels.names().iter().enumerate() {
            idx[slot] = headers.iter().position(|h| h.as_ref() == *name)?;
        }
        Some(idx)
    }

    /// Total number of feature columns
    pub fn feature_count(&self) -> usize {
        self.passthrough.len() + self.width
    }

    /// Passthrough names followed by the encoded vertex names
    pub fn column_names(&self) -> Vec<String> {
        let mut names = self.passthrough.clone();
        names.extend(vertex_column_names(self.width));
        names
    }

    /// Encoder settings this schema was built with
    pub fn encoder(&self) -> EncoderConfig {
        EncoderConfig {
            connectivity_column: self.connectivity_column.clone(),
            width: self.width,
            pad_value: self.pad_value.clone(),
        }
    }

    /// Fail unless `other` describes exactly the same feature columns
    pub fn ensure_compatible(&self, other: &FeatureSchema) -> Result<()> {
        if self.connectivity_column != other.connectivity_column {
            return Err(VisError::Schema(format!(
                "connectivity column differs: '{}' vs '{}'",
                self.connectivity_column, other.connectivity_column
            )));
        }
        if self.width != other.width || self.pad_value != other.pad_value {
            return Err(VisError::Schema(format!(
                "encoder differs: width {} pad '{}' vs width {} pad '{}'",
                self.width, self.pad_value, other.width, other.pad_value
            )));
        }
        if self.passthrough != other.passthrough {
            return Err(VisError::Schema(format!(
                "feature columns differ: {:?} vs {:?}",
                self.passthrough, other.passthrough
            )));
        }
        Ok(())
    }

    /// Bind this schema to a concrete header.
    ///
    /// Columns are located by name, so a header listing the same columns in a
    /// different order is realigned to schema order. Missing schema columns
    /// and unknown extra columns are rejected.
    pub fn layout<S: AsRef<str>>(
        &self,
        headers: &[S],
        labels: &LabelConfig,
        mode: LabelMode,
    ) -> Result<RecordLayout> {
        check_unique(headers)?;
        let position = |name: &str| headers.iter().position(|h| h.as_ref() == name);

        let connectivity = position(self.connectivity_column.as_str()).ok_or_else(|| {
            VisError::Schema(format!(
                "missing connectivity column '{}'",
                self.connectivity_column
            ))
        })?;

        let mut passthrough = Vec::with_capacity(self.passthrough.len());
        for name in &self.passthrough {
            let idx = position(name.as_str())
                .ok_or_else(|| VisError::Schema(format!("missing feature column '{}'", name)))?;
            passthrough.push(idx);
        }

        let label_positions: Vec<Option<usize>> =
            labels.names().iter().map(|name| position(*name)).collect();
        let labels_idx = match mode {
            LabelMode::Required => {
                let mut idx = [0usize; 3];
                for (slot, (pos, name)) in label_positions.iter().zip(labels.names()).enumerate() {
                    idx[slot] = pos.ok_or_else(|| {
                        VisError::Schema(format!("missing label column '{}'", name))
                    })?;
                }
                Some(idx)
            }
            LabelMode::Ignored => None,
        };

        for header in headers {
            let name = header.as_ref();
            if name != self.connectivity_column
                && !labels.contains(name)
                && !self.passthrough.iter().any(|p| p == name)
            {
                return Err(VisError::Schema(format!(
                    "unexpected column '{}' not present at training time",
                    name
                )));
            }
        }

        Ok(RecordLayout {
            passthrough,
            connectivity,
            labels: labels_idx,
            encoder: self.encoder(),
        })
    }
}

fn is_vertex_column(name: &str) -> bool {
    name.strip_prefix(VERTEX_COLUMN_PREFIX)
        .map(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

fn check_unique<S: AsRef<str>>(headers: &[S]) -> Result<()> {
    let mut seen = HashSet::new();
    for header in headers {
        if !seen.insert(header.as_ref()) {
            return Err(VisError::Schema(format!(
                "duplicate column '{}'",
                header.as_ref()
            )));
        }
    }
    Ok(())
}

/// A schema bound to the column positions of one file
#[derive(Debug, Clone)]
pub struct RecordLayout {
    passthrough: Vec<usize>,
    connectivity: usize,
    labels: Option<[usize; 3]>,
    encoder: EncoderConfig,
}

impl RecordLayout {
    /// Split a record into its feature row and, when bound with labels, its label row
    pub fn assemble<S: AsRef<str>>(&self, record: &[S]) -> Result<(FeatureRow, Option<LabelRow>)> {
        let field = |idx: usize, what: &str| {
            record.get(idx).map(|c| c.as_ref()).ok_or_else(|| {
                VisError::Encoding(format!(
                    "record has {} fields, {} expected at position {}",
                    record.len(),
                    what,
                    idx
                ))
            })
        };

        let connectivity = field(self.connectivity, "connectivity field")?;

        let mut cells = Vec::with_capacity(self.passthrough.len() + self.encoder.width);
        for &idx in &self.passthrough {
            cells.push(field(idx, "feature field")?.to_string());
        }
        cells.extend(self.encoder.encode_field(connectivity));

        let labels = match self.labels {
            Some([visible, behind, out]) => Some(LabelRow {
                is_visible: parse_label(field(visible, "label field")?)?,
                behind_a_mesh: parse_label(field(behind, "label field")?)?,
                out_of_frame: parse_label(field(out, "label field")?)?,
            }),
            None => None,
        };

        Ok((FeatureRow { cells }, labels))
    }
}

/// Assemble a single record against its own header.
///
/// Labels are extracted when all three label columns are present and left
/// out otherwise.
pub fn assemble<S: AsRef<str>>(
    headers: &[S],
    record: &[S],
    encoder: &EncoderConfig,
    labels: &LabelConfig,
) -> Result<(FeatureRow, Option<LabelRow>)> {
    let schema = FeatureSchema::from_headers(headers, encoder, labels)?;
    let mode = if FeatureSchema::label_indices(headers, labels).is_some() {
        LabelMode::Required
    } else {
        LabelMode::Ignored
    };
    schema.layout(headers, labels, mode)?.assemble(record)
}
