use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::ids::{AnnotationId, ImageId, RowId};

/// Height every image is normalised to on the canvas (content-space pixels).
/// Width follows the source aspect ratio.
pub const DISPLAY_HEIGHT: u32 = 320;

/// Point in image space: the image's logical (display) pixel grid,
/// independent of the viewport zoom.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImagePoint {
    pub x: f32,
    pub y: f32,
}

impl ImagePoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

// ============================================================================
// ANNOTATIONS
// ============================================================================

#[derive(Clone, Debug)]
pub enum AnnotationKind {
    /// Freehand stroke. Always holds at least one point.
    Stroke {
        points: Vec<ImagePoint>,
        width: f32,
        color: [u8; 4],
    },
    /// Single-location marker.
    Stamp {
        at: ImagePoint,
        icon: String,
        color: [u8; 4],
    },
    /// Auxiliary image handed to the generation service alongside the prompt.
    Reference { at: ImagePoint, image: Arc<RgbaImage> },
}

#[derive(Clone, Debug)]
pub struct Annotation {
    pub id: AnnotationId,
    kind: AnnotationKind,
    label: Option<String>,
}

impl Annotation {
    /// Returns `None` for an empty point list.
    pub fn stroke(points: Vec<ImagePoint>, width: f32, color: [u8; 4]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        Some(Self {
            id: AnnotationId::new(),
            kind: AnnotationKind::Stroke {
                points,
                width: width.max(1.0),
                color,
            },
            label: None,
        })
    }

    pub fn stamp(at: ImagePoint, icon: impl Into<String>, color: [u8; 4]) -> Self {
        Self {
            id: AnnotationId::new(),
            kind: AnnotationKind::Stamp {
                at,
                icon: icon.into(),
                color,
            },
            label: None,
        }
    }

    pub fn reference(at: ImagePoint, image: Arc<RgbaImage>) -> Self {
        Self {
            id: AnnotationId::new(),
            kind: AnnotationKind::Reference { at, image },
            label: None,
        }
    }

    /// Attach a text label. Blank labels are dropped.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        let label = label.into();
        self.label = if label.trim().is_empty() {
            None
        } else {
            Some(label.trim().to_string())
        };
        self
    }

    pub fn kind(&self) -> &AnnotationKind {
        &self.kind
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Where the label is centred.
    pub fn anchor(&self) -> ImagePoint {
        match &self.kind {
            AnnotationKind::Stroke { points, .. } => {
                let n = points.len() as f32;
                let (sx, sy) = points
                    .iter()
                    .fold((0.0, 0.0), |(ax, ay), p| (ax + p.x, ay + p.y));
                ImagePoint::new(sx / n, sy / n)
            }
            AnnotationKind::Stamp { at, .. } | AnnotationKind::Reference { at, .. } => *at,
        }
    }
}

// ============================================================================
// IMAGES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GenerationStatus {
    Complete,
    /// Placeholder for an in-flight generation. Times are UI-clock seconds.
    Pending { started_at: f64, estimated_secs: f32 },
}

#[derive(Clone, Debug)]
pub struct Image {
    pub id: ImageId,
    /// Logical size on the canvas (content space). Annotations live in this grid.
    pub width: u32,
    pub height: u32,
    /// `None` while a placeholder is waiting on the service.
    pub pixels: Option<Arc<RgbaImage>>,
    pub source_name: Option<String>,
    pub parent: Option<ImageId>,
    pub prompt: Option<String>,
    /// 1 for uploads, parent + 1 for generation results.
    pub version: u32,
    pub status: GenerationStatus,
    pub annotations: Vec<Annotation>,
}

/// Logical size for a bitmap of the given pixel size.
pub fn display_size(pixel_width: u32, pixel_height: u32) -> (u32, u32) {
    if pixel_width == 0 || pixel_height == 0 {
        return (DISPLAY_HEIGHT, DISPLAY_HEIGHT);
    }
    let aspect = pixel_width as f32 / pixel_height as f32;
    let width = (DISPLAY_HEIGHT as f32 * aspect).round().max(1.0) as u32;
    (width, DISPLAY_HEIGHT)
}

impl Image {
    pub fn from_upload(name: impl Into<String>, pixels: RgbaImage) -> Self {
        let (width, height) = display_size(pixels.width(), pixels.height());
        Self {
            id: ImageId::new(),
            width,
            height,
            pixels: Some(Arc::new(pixels)),
            source_name: Some(name.into()),
            parent: None,
            prompt: None,
            version: 1,
            status: GenerationStatus::Complete,
            annotations: Vec::new(),
        }
    }

    /// Pending entry standing in for the result of editing `parent`.
    pub fn placeholder(parent: &Image, prompt: &str, started_at: f64, estimated_secs: f32) -> Self {
        Self {
            id: ImageId::new(),
            width: parent.width,
            height: parent.height,
            pixels: None,
            source_name: parent.source_name.clone(),
            parent: Some(parent.id),
            prompt: Some(prompt.to_string()),
            version: parent.version + 1,
            status: GenerationStatus::Pending {
                started_at,
                estimated_secs,
            },
            annotations: Vec::new(),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, GenerationStatus::Pending { .. })
    }

    /// Estimated progress for a pending entry, capped below 1.0 until the
    /// result actually lands.
    pub fn progress(&self, now: f64) -> f32 {
        match self.status {
            GenerationStatus::Complete => 1.0,
            GenerationStatus::Pending {
                started_at,
                estimated_secs,
            } => {
                if estimated_secs <= 0.0 {
                    return 0.95;
                }
                (((now - started_at) as f32) / estimated_secs).clamp(0.0, 0.95)
            }
        }
    }

    /// Install the generated bitmap and mark the entry complete.
    pub fn complete_with(&mut self, pixels: RgbaImage) {
        let (width, height) = display_size(pixels.width(), pixels.height());
        self.width = width;
        self.height = height;
        self.pixels = Some(Arc::new(pixels));
        self.status = GenerationStatus::Complete;
    }

    pub fn add_annotation(&mut self, annotation: Annotation) {
        self.annotations.push(annotation);
    }

    pub fn remove_annotation(&mut self, id: AnnotationId) -> bool {
        let before = self.annotations.len();
        self.annotations.retain(|a| a.id != id);
        self.annotations.len() != before
    }
}

// ============================================================================
// ROWS / CANVAS
// ============================================================================

#[derive(Clone, Debug)]
pub struct Row {
    pub id: RowId,
    pub title: String,
    pub images: Vec<Image>,
}

/// Every row on the canvas, top to bottom. Images exist only inside rows.
#[derive(Clone, Debug, Default)]
pub struct Canvas {
    rows: Vec<Row>,
}

impl Canvas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn image_count(&self) -> usize {
        self.rows.iter().map(|r| r.images.len()).sum()
    }

    /// Append a new row. A row is never created empty.
    pub fn add_row(&mut self, title: impl Into<String>, images: Vec<Image>) -> Option<RowId> {
        if images.is_empty() {
            return None;
        }
        let id = RowId::new();
        self.rows.push(Row {
            id,
            title: title.into(),
            images,
        });
        Some(id)
    }

    pub fn images(&self) -> impl Iterator<Item = &Image> + '_ {
        self.rows.iter().flat_map(|r| r.images.iter())
    }

    pub fn image(&self, id: ImageId) -> Option<&Image> {
        self.images().find(|img| img.id == id)
    }

    pub fn image_mut(&mut self, id: ImageId) -> Option<&mut Image> {
        self.rows
            .iter_mut()
            .flat_map(|r| r.images.iter_mut())
            .find(|img| img.id == id)
    }

    pub fn contains(&self, id: ImageId) -> bool {
        self.image(id).is_some()
    }

    /// (row index, column index) of an image.
    pub fn position(&self, id: ImageId) -> Option<(usize, usize)> {
        self.rows.iter().enumerate().find_map(|(ri, row)| {
            row.images
                .iter()
                .position(|img| img.id == id)
                .map(|ci| (ri, ci))
        })
    }

    /// All image ids in row-major order.
    pub fn order(&self) -> Vec<ImageId> {
        self.images().map(|img| img.id).collect()
    }

    /// Image ids grouped by row.
    pub fn grid(&self) -> Vec<Vec<ImageId>> {
        self.rows
            .iter()
            .map(|r| r.images.iter().map(|img| img.id).collect())
            .collect()
    }

    /// Insert `image` directly after `source` in the same row.
    /// Returns `false` (and drops the image) when `source` no longer exists.
    pub fn insert_after(&mut self, source: ImageId, image: Image) -> bool {
        match self.position(source) {
            Some((ri, ci)) => {
                self.rows[ri].images.insert(ci + 1, image);
                true
            }
            None => false,
        }
    }

    /// Remove an image; its row goes away with its last image.
    pub fn remove_image(&mut self, id: ImageId) -> Option<Image> {
        let (ri, ci) = self.position(id)?;
        let removed = self.rows[ri].images.remove(ci);
        if self.rows[ri].images.is_empty() {
            self.rows.remove(ri);
        }
        Some(removed)
    }
}
