//! Gallery interchange (JSON import/export) and audit.

use crate::quality::embedding_quality;
use crate::types::{Embedding, GalleryEntry};
use serde::{de, Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Entries scoring below this are flagged by [`audit_gallery`].
pub const DEFAULT_MIN_EMBEDDING_QUALITY: f32 = 30.0;

const UNKNOWN_NAME: &str = "unknown";

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("invalid gallery JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("gallery document must be a JSON array")]
    NotAnArray,
}

/// Flat interchange record: `{id, name, embedding: [..], extractor_version?}`.
#[derive(Debug, Serialize, Deserialize)]
struct GalleryRecord {
    #[serde(default, deserialize_with = "id_from_string_or_number")]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    embedding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    extractor_version: Option<String>,
}

fn id_from_string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(d)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(de::Error::custom(format!("unsupported id value: {other}"))),
    }
}

/// Serialize a gallery as a pretty-printed JSON array.
pub fn export_gallery(entries: &[GalleryEntry]) -> Result<String, GalleryError> {
    let records: Vec<GalleryRecord> = entries
        .iter()
        .map(|e| GalleryRecord {
            id: e.id.clone(),
            name: Some(e.name.clone()),
            embedding: e.embedding.values.clone(),
            extractor_version: e.embedding.extractor_version.clone(),
        })
        .collect();
    Ok(serde_json::to_string_pretty(&records)?)
}

/// Parse a gallery exported by [`export_gallery`] or an older tool.
///
/// Missing names become `"unknown"`; missing embeddings become empty and are
/// skipped later by the matcher. Numeric ids are accepted.
pub fn import_gallery(json: &str) -> Result<Vec<GalleryEntry>, GalleryError> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    if !value.is_array() {
        return Err(GalleryError::NotAnArray);
    }
    let records: Vec<GalleryRecord> = serde_json::from_value(value)?;
    Ok(records
        .into_iter()
        .map(|r| GalleryEntry {
            id: r.id,
            name: r.name.unwrap_or_else(|| UNKNOWN_NAME.to_string()),
            embedding: Embedding {
                values: r.embedding,
                extractor_version: r.extractor_version,
            },
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditProblem {
    pub id: String,
    pub name: String,
    pub problem: String,
}

/// Readiness summary of a gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditReport {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub problems: Vec<AuditProblem>,
    /// At least one valid entry and no invalid ones.
    pub success: bool,
}

/// Check every entry for a usable embedding of sufficient quality.
pub fn audit_gallery(entries: &[GalleryEntry], min_quality: f32) -> AuditReport {
    let mut valid = 0;
    let mut problems = Vec::new();

    for entry in entries {
        let problem = if entry.embedding.is_empty() {
            Some("missing embedding".to_string())
        } else {
            let quality = embedding_quality(&entry.embedding.values);
            (quality < min_quality).then(|| format!("embedding quality too low ({quality:.0})"))
        };

        match problem {
            Some(problem) => problems.push(AuditProblem {
                id: entry.id.clone(),
                name: entry.name.clone(),
                problem,
            }),
            None => valid += 1,
        }
    }

    let invalid = problems.len();
    AuditReport {
        total: entries.len(),
        valid,
        invalid,
        problems,
        success: valid > 0 && invalid == 0,
    }
}
