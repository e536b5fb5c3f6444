//! Enrollment checks: photo suitability and embedding quality.

use crate::types::Face;
use serde::Serialize;

const MULTIPLE_FACES_PENALTY: f32 = 20.0;
const FACE_TOO_SMALL_RATIO: f32 = 0.1;
const FACE_TOO_SMALL_PENALTY: f32 = 30.0;
const FACE_TOO_LARGE_RATIO: f32 = 0.8;
const FACE_TOO_LARGE_PENALTY: f32 = 10.0;
const OFF_CENTER_RATIO: f32 = 0.3;
const OFF_CENTER_PENALTY: f32 = 15.0;
const MIN_VALID_PHOTO_SCORE: f32 = 50.0;

/// Problems found in an enrollment photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityIssue {
    NoFace,
    EmptyImage,
    MultipleFaces,
    FaceTooSmall,
    FaceTooLarge,
    OffCenter,
}

impl std::fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            QualityIssue::NoFace => "no face detected",
            QualityIssue::EmptyImage => "image has zero size",
            QualityIssue::MultipleFaces => "multiple faces detected, the largest is used",
            QualityIssue::FaceTooSmall => "face is too small, use a closer photo",
            QualityIssue::FaceTooLarge => "face is too large, leave more background",
            QualityIssue::OffCenter => "face is not centered",
        };
        f.write_str(msg)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub valid: bool,
    /// 0–100.
    pub score: f32,
    pub issues: Vec<QualityIssue>,
}

impl QualityReport {
    fn rejected(issue: QualityIssue) -> Self {
        Self {
            valid: false,
            score: 0.0,
            issues: vec![issue],
        }
    }
}

/// Pick the face with the largest bounding-box area; earlier faces win ties.
pub fn select_largest_face(faces: &[Face]) -> Option<&Face> {
    faces.iter().fold(None, |best: Option<&Face>, face| match best {
        Some(b) if b.area() >= face.area() => Some(b),
        _ => Some(face),
    })
}

/// Score an enrollment photo from the faces detected in it.
///
/// Starts at 100 and subtracts a penalty per issue; the photo is accepted
/// at 50 or above.
pub fn assess_photo(faces: &[Face], image_width: u32, image_height: u32) -> QualityReport {
    if image_width == 0 || image_height == 0 {
        return QualityReport::rejected(QualityIssue::EmptyImage);
    }
    let Some(face) = select_largest_face(faces) else {
        return QualityReport::rejected(QualityIssue::NoFace);
    };
    let Some(bbox) = face.bounding_box() else {
        return QualityReport::rejected(QualityIssue::NoFace);
    };

    let mut score = 100.0f32;
    let mut issues = Vec::new();

    if faces.len() > 1 {
        issues.push(QualityIssue::MultipleFaces);
        score -= MULTIPLE_FACES_PENALTY;
    }

    let (w, h) = (image_width as f32, image_height as f32);
    let face_ratio = bbox.area() / (w * h);
    if face_ratio < FACE_TOO_SMALL_RATIO {
        issues.push(QualityIssue::FaceTooSmall);
        score -= FACE_TOO_SMALL_PENALTY;
    }
    if face_ratio > FACE_TOO_LARGE_RATIO {
        issues.push(QualityIssue::FaceTooLarge);
        score -= FACE_TOO_LARGE_PENALTY;
    }

    let (cx, cy) = bbox.center();
    let offset_x = (cx - w / 2.0).abs() / w;
    let offset_y = (cy - h / 2.0).abs() / h;
    if offset_x > OFF_CENTER_RATIO || offset_y > OFF_CENTER_RATIO {
        issues.push(QualityIssue::OffCenter);
        score -= OFF_CENTER_PENALTY;
    }

    QualityReport {
        valid: score >= MIN_VALID_PHOTO_SCORE,
        score,
        issues,
    }
}

/// Heuristic 0–100 score of how informative an embedding is.
///
/// Penalizes non-finite values, low variance, and a narrow value range.
/// Statistics are computed over the finite values only.
pub fn embedding_quality(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }

    let mut score = 100.0f32;
    let finite: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.len() != values.len() {
        score -= 50.0;
    }
    if finite.is_empty() {
        return 0.0;
    }

    let n = finite.len() as f32;
    let mean = finite.iter().sum::<f32>() / n;
    let variance = finite.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    if variance < 0.01 {
        score -= 30.0;
    } else if variance < 0.05 {
        score -= 15.0;
    }

    let max = finite.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let min = finite.iter().copied().fold(f32::INFINITY, f32::min);
    let range = max - min;
    if range < 0.5 {
        score -= 20.0;
    } else if range < 1.0 {
        score -= 10.0;
    }

    score.clamp(0.0, 100.0)
}
