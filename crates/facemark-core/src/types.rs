use serde::{Deserialize, Serialize};

/// Number of points in the MediaPipe FaceMesh topology (478 with iris refinement).
pub const FACE_MESH_KEYPOINTS: usize = 468;

/// A single landmark in image pixel space.
///
/// The landmark's meaning is given by its index within [`Face::keypoints`];
/// providers may also emit `z` or a name, both of which are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned box around a face's keypoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f32 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> (f32, f32) {
        (
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

/// Square display box used for overlays: `[x, y, size, size]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlayBox {
    pub x: f32,
    pub y: f32,
    pub size: f32,
}

/// One detected face: keypoints ordered by the provider's topology.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Face {
    pub keypoints: Vec<Keypoint>,
}

impl Face {
    pub fn new(keypoints: Vec<Keypoint>) -> Self {
        Self { keypoints }
    }

    /// Bounding box over all keypoints, or `None` for an empty face.
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let first = self.keypoints.first()?;
        let init = BoundingBox {
            min_x: first.x,
            min_y: first.y,
            max_x: first.x,
            max_y: first.y,
        };
        Some(self.keypoints.iter().fold(init, |b, p| BoundingBox {
            min_x: b.min_x.min(p.x),
            min_y: b.min_y.min(p.y),
            max_x: b.max_x.max(p.x),
            max_y: b.max_y.max(p.y),
        }))
    }

    /// Area of the bounding box (0.0 for an empty face).
    pub fn area(&self) -> f32 {
        self.bounding_box().map(|b| b.area()).unwrap_or(0.0)
    }

    /// Square box of side `max(width, height) * scale` centered on the face.
    pub fn overlay_box(&self, scale: f32) -> Option<OverlayBox> {
        let bbox = self.bounding_box()?;
        let (cx, cy) = bbox.center();
        let size = bbox.width().max(bbox.height()) * scale;
        Some(OverlayBox {
            x: cx - size / 2.0,
            y: cy - size / 2.0,
            size,
        })
    }
}

/// Geometric feature vector derived from one face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Tag of the extractor configuration that produced this embedding.
    /// `None` marks legacy data stored before tagging existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extractor_version: Option<String>,
}

impl Embedding {
    /// An embedding with no version tag.
    pub fn untagged(values: Vec<f32>) -> Self {
        Self {
            values,
            extractor_version: None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }
}

/// An enrolled person as seen by the matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub id: String,
    pub name: String,
    pub embedding: Embedding,
}

/// Accepted match for a query embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub person_id: String,
    pub name: String,
    /// Similarity in [0, 100], rounded to one decimal.
    pub similarity: f32,
    pub distance: f32,
}
