//! Command logic behind the CLI, kept free of printing so it can be tested
//! against an in-memory store.

use anyhow::{bail, Result};
use facemark_core::gallery::DEFAULT_MIN_EMBEDDING_QUALITY;
use facemark_core::quality::{assess_photo, embedding_quality, select_largest_face, QualityReport};
use facemark_core::{
    DynamicThresholdMatcher, ExtractError, Face, FeatureExtractor, MatchReport, Matcher, Tuning,
};
use facemark_store::{FaceStore, NewPerson, Person, RejectedRow};

/// Enrollment input besides the faces themselves.
pub struct EnrollRequest {
    pub name: String,
    pub description: Option<String>,
    pub image_ref: String,
    /// Photo dimensions; enables the photo quality gate.
    pub photo_size: Option<(u32, u32)>,
}

#[derive(Debug)]
pub struct Enrollment {
    pub person: Person,
    pub photo: Option<QualityReport>,
    pub embedding_quality: f32,
}

impl Enrollment {
    pub fn low_quality(&self) -> bool {
        self.embedding_quality < DEFAULT_MIN_EMBEDDING_QUALITY
    }
}

/// Photo gate, largest face, extraction, store.
pub fn enroll(
    store: &FaceStore,
    tuning: &Tuning,
    faces: &[Face],
    request: EnrollRequest,
) -> Result<Enrollment> {
    let photo = request
        .photo_size
        .map(|(width, height)| assess_photo(faces, width, height));
    if let Some(report) = photo.as_ref().filter(|r| !r.valid) {
        let issues: Vec<String> = report.issues.iter().map(ToString::to_string).collect();
        bail!(
            "photo rejected (quality score {:.0}): {}",
            report.score,
            issues.join(", ")
        );
    }

    let Some(face) = select_largest_face(faces) else {
        bail!("no face detected");
    };
    let extractor = FeatureExtractor::new(tuning.extractor.clone())?;
    let embedding = extractor.extract(face)?;
    let quality = embedding_quality(&embedding.values);

    let person = store.enroll(NewPerson {
        name: request.name,
        description: request.description,
        image_ref: request.image_ref,
        embedding: Some(embedding),
    })?;
    Ok(Enrollment {
        person,
        photo,
        embedding_quality: quality,
    })
}

/// Recompute a person's embedding from the largest face.
pub fn reenroll(store: &FaceStore, tuning: &Tuning, id: &str, faces: &[Face]) -> Result<()> {
    let Some(face) = select_largest_face(faces) else {
        bail!("no face detected");
    };
    let extractor = FeatureExtractor::new(tuning.extractor.clone())?;
    let embedding = extractor.extract(face)?;
    if !store.re_enroll(id, &embedding)? {
        bail!("no person with id {id}");
    }
    Ok(())
}

/// Base threshold for `match`: the flag wins over the tuning file.
pub fn base_threshold(flag: Option<f32>, tuning: &Tuning) -> Result<f32> {
    match flag {
        Some(t) if !t.is_finite() || !(0.0..=1.0).contains(&t) => {
            bail!("threshold must be between 0.0 and 1.0, got {t}")
        }
        Some(t) => Ok(t),
        None => Ok(tuning.matcher.base_threshold),
    }
}

pub struct MatchOutcome {
    pub faces: Vec<Result<MatchReport, ExtractError>>,
    pub rejected: Vec<RejectedRow>,
}

/// Match every face against the stored gallery.
pub fn match_faces(
    store: &FaceStore,
    tuning: &Tuning,
    faces: &[Face],
    threshold: Option<f32>,
) -> Result<MatchOutcome> {
    let threshold = base_threshold(threshold, tuning)?;
    let extractor = FeatureExtractor::new(tuning.extractor.clone())?;
    let matcher = DynamicThresholdMatcher::new(tuning.matcher.clone(), extractor.layout())?;
    let snapshot = store.gallery()?;

    let faces = faces
        .iter()
        .map(|face| {
            extractor
                .extract(face)
                .map(|embedding| matcher.compare(&embedding, &snapshot.entries, threshold))
        })
        .collect();
    Ok(MatchOutcome {
        faces,
        rejected: snapshot.rejected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use facemark_core::types::{Keypoint, FACE_MESH_KEYPOINTS};

    /// A face-mesh-sized face inside the box `(x, y, x + w, y + h)`.
    fn face(seed: u32, x: f32, y: f32, w: f32, h: f32) -> Face {
        Face::new(
            (0..FACE_MESH_KEYPOINTS)
                .map(|i| {
                    let t = (i as f32 + 1.0) * 0.618 + seed as f32 * 0.37;
                    Keypoint::new(
                        x + (t.sin() * 0.5 + 0.5) * w,
                        y + ((t * 1.3).cos() * 0.5 + 0.5) * h,
                    )
                })
                .collect(),
        )
    }

    fn request(name: &str, photo_size: Option<(u32, u32)>) -> EnrollRequest {
        EnrollRequest {
            name: name.into(),
            description: None,
            image_ref: format!("{name}.jpg"),
            photo_size,
        }
    }

    #[test]
    fn test_enroll_then_match_round_trip() {
        let store = FaceStore::open_in_memory().unwrap();
        let tuning = Tuning::default();

        let alice = enroll(&store, &tuning, &[face(1, 100.0, 50.0, 200.0, 260.0)], request("Alice", None)).unwrap();
        assert!(alice.photo.is_none());
        assert!(!alice.low_quality(), "quality {}", alice.embedding_quality);

        // same geometry, shifted and scaled
        let query = face(1, 40.0, 10.0, 300.0, 390.0);
        let outcome = match_faces(&store, &tuning, &[query, Face::default()], None).unwrap();
        assert_eq!(outcome.faces.len(), 2);

        let report = outcome.faces[0].as_ref().unwrap();
        let m = report.result.as_ref().unwrap();
        assert_eq!(m.person_id, alice.person.id);
        assert!(m.similarity > 99.0, "similarity {}", m.similarity);
        assert!(matches!(outcome.faces[1], Err(ExtractError::EmptyFace)));
    }

    #[test]
    fn test_enroll_picks_largest_face() {
        let store = FaceStore::open_in_memory().unwrap();
        let tuning = Tuning::default();
        let small = face(2, 0.0, 0.0, 40.0, 50.0);
        let large = face(3, 200.0, 100.0, 240.0, 300.0);

        let enrolled = enroll(&store, &tuning, &[small, large.clone()], request("Big", Some((640, 480)))).unwrap();
        let photo = enrolled.photo.unwrap();
        assert!(photo.valid);
        assert!(photo.issues.contains(&facemark_core::quality::QualityIssue::MultipleFaces));

        let extractor = FeatureExtractor::default();
        assert_eq!(enrolled.person.embedding, Some(extractor.extract(&large).unwrap()));
    }

    #[test]
    fn test_enroll_rejects_bad_photo() {
        let store = FaceStore::open_in_memory().unwrap();
        let tuning = Tuning::default();

        // two tiny faces in a corner: 100 - 20 - 30 - 15
        let tiny = [face(1, 0.0, 0.0, 30.0, 30.0), face(2, 10.0, 10.0, 20.0, 20.0)];
        let err = enroll(&store, &tuning, &tiny, request("Tiny", Some((1920, 1080)))).unwrap_err();
        assert!(err.to_string().contains("photo rejected"), "{err}");

        let err = enroll(&store, &tuning, &[], request("Nobody", None)).unwrap_err();
        assert_eq!(err.to_string(), "no face detected");
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_reenroll_unknown_id() {
        let store = FaceStore::open_in_memory().unwrap();
        let err = reenroll(&store, &Tuning::default(), "missing", &[face(1, 0.0, 0.0, 100.0, 100.0)]).unwrap_err();
        assert_eq!(err.to_string(), "no person with id missing");
    }

    #[test]
    fn test_base_threshold_selection() {
        let mut tuning = Tuning::default();
        assert_eq!(base_threshold(None, &tuning).unwrap(), 0.35);
        assert_eq!(base_threshold(Some(0.7), &tuning).unwrap(), 0.7);
        tuning.matcher.base_threshold = 0.5;
        assert_eq!(base_threshold(None, &tuning).unwrap(), 0.5);
        assert!(base_threshold(Some(1.5), &tuning).is_err());
        assert!(base_threshold(Some(f32::NAN), &tuning).is_err());
    }

    #[test]
    fn test_match_threshold_flag_applies() {
        let store = FaceStore::open_in_memory().unwrap();
        let tuning = Tuning::default();
        let alice = [face(1, 100.0, 50.0, 200.0, 260.0)];
        enroll(&store, &tuning, &alice, request("Alice", None)).unwrap();

        // one candidate: the base threshold is relaxed by 0.6
        let default = match_faces(&store, &tuning, &alice, None).unwrap();
        let report = default.faces[0].as_ref().unwrap();
        assert!(report.is_match());
        assert!((report.threshold - 0.21).abs() < 1e-6, "threshold {}", report.threshold);

        let flagged = match_faces(&store, &tuning, &alice, Some(0.5)).unwrap();
        let report = flagged.faces[0].as_ref().unwrap();
        assert!(report.is_match());
        assert!((report.threshold - 0.3).abs() < 1e-6, "threshold {}", report.threshold);

        assert!(match_faces(&store, &tuning, &alice, Some(2.0)).is_err());
    }
}
