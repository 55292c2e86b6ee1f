//! Collaborator interfaces of the render pipeline
//!
//! The editor core never parses document bytes or produces pixels itself.
//! It talks to a [`Rasterizer`] for page bitmaps and to a [`DocumentModel`]
//! for page surgery during export. All geometry handed to an
//! [`OutputDocument`] is already in output space: origin at the bottom-left
//! of the page, +y pointing up.

use crate::raster::{Color, PageSize, RenderedPage, Rotation};

/// Opaque handle to a loaded source document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentHandle(pub(crate) u64);

impl DocumentHandle {
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Build a handle from a raw value, for collaborators implemented
    /// outside this crate.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// Result of parsing a source document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedDocument {
    pub handle: DocumentHandle,
    pub page_count: u32,
}

/// Page of an output document (position in the output page sequence)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputPage(pub usize);

/// Image embedded into an output document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageHandle(pub usize);

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("invalid document handle {0}")]
    InvalidHandle(u64),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("encrypted PDFs are not supported")]
    EncryptedUnsupported,
    #[error("backend error: {0}")]
    Backend(String),
}

/// Turns a page description into pixels.
///
/// `rotation` is the absolute display rotation. `None` renders the page with
/// its intrinsic rotation, which is what the catalog asks for before it has
/// discovered the page's metadata.
pub trait Rasterizer: Send + Sync {
    fn render_page(
        &self,
        handle: DocumentHandle,
        original_index: u32,
        scale: f32,
        rotation: Option<Rotation>,
    ) -> Result<RenderedPage, RenderError>;
}

/// Parses source documents and starts output documents.
pub trait DocumentModel: Send + Sync {
    fn load(&self, bytes: Vec<u8>) -> Result<LoadedDocument, RenderError>;

    fn close(&self, handle: DocumentHandle) -> Result<(), RenderError>;

    /// Start an empty output document that pages of `source` can be copied into.
    fn new_output(&self, source: DocumentHandle) -> Result<Box<dyn OutputDocument>, RenderError>;
}

/// Page-surgery API over a document being assembled for export.
pub trait OutputDocument {
    /// Append a copy of source page `original_index`.
    fn copy_page(
        &mut self,
        source: DocumentHandle,
        original_index: u32,
    ) -> Result<OutputPage, RenderError>;

    /// Unrotated page size (the media box).
    fn page_size(&self, page: OutputPage) -> Result<PageSize, RenderError>;

    /// Current display rotation, initially the source page's own.
    fn rotation(&self, page: OutputPage) -> Result<Rotation, RenderError>;
    fn set_rotation(&mut self, page: OutputPage, rotation: Rotation) -> Result<(), RenderError>;

    fn embed_image(&mut self, bytes: &[u8]) -> Result<ImageHandle, RenderError>;

    fn draw(&mut self, page: OutputPage, command: &DrawCommand) -> Result<(), RenderError>;

    fn save(self: Box<Self>) -> Result<Vec<u8>, RenderError>;
}

/// Anything that can both render and rebuild documents
pub trait Backend: DocumentModel + Rasterizer {}

impl<T: DocumentModel + Rasterizer> Backend for T {}

/// Stroke and fill of a vector primitive
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaintStyle {
    pub stroke: Option<Color>,
    pub stroke_width: f32,
    pub fill: Option<Color>,
}

/// Rotation of a primitive about a point, in output space.
///
/// `degrees` is counter-clockwise positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pivot {
    pub degrees: f32,
    pub cx: f32,
    pub cy: f32,
}

impl Pivot {
    /// The `cm` matrix `[a b c d e f]` that rotates about the pivot point.
    pub fn matrix(&self) -> [f32; 6] {
        let radians = self.degrees.to_radians();
        let (sin, cos) = radians.sin_cos();
        [
            cos,
            sin,
            -sin,
            cos,
            self.cx - cos * self.cx + sin * self.cy,
            self.cy - sin * self.cx - cos * self.cy,
        ]
    }
}

/// A primitive to draw onto an output page
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Rectangle {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        style: PaintStyle,
        pivot: Option<Pivot>,
    },
    /// Ellipse inscribed in the given box
    Ellipse {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        style: PaintStyle,
        pivot: Option<Pivot>,
    },
    Polyline {
        points: Vec<(f32, f32)>,
        style: PaintStyle,
        pivot: Option<Pivot>,
    },
    /// Single line of text, `y` is the baseline
    Text {
        x: f32,
        y: f32,
        text: String,
        font_size: f32,
        color: Color,
        pivot: Option<Pivot>,
    },
    Image {
        image: ImageHandle,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        pivot: Option<Pivot>,
    },
}

impl DrawCommand {
    pub fn pivot(&self) -> Option<Pivot> {
        match self {
            DrawCommand::Rectangle { pivot, .. }
            | DrawCommand::Ellipse { pivot, .. }
            | DrawCommand::Polyline { pivot, .. }
            | DrawCommand::Text { pivot, .. }
            | DrawCommand::Image { pivot, .. } => *pivot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(m: [f32; 6], x: f32, y: f32) -> (f32, f32) {
        (m[0] * x + m[2] * y + m[4], m[1] * x + m[3] * y + m[5])
    }

    #[test]
    fn test_pivot_keeps_center_fixed() {
        let pivot = Pivot { degrees: 37.0, cx: 120.0, cy: 80.0 };
        let (x, y) = apply(pivot.matrix(), 120.0, 80.0);
        assert!((x - 120.0).abs() < 1e-3);
        assert!((y - 80.0).abs() < 1e-3);
    }

    #[test]
    fn test_pivot_quarter_turn_is_counter_clockwise() {
        let pivot = Pivot { degrees: 90.0, cx: 0.0, cy: 0.0 };
        let (x, y) = apply(pivot.matrix(), 10.0, 0.0);
        assert!(x.abs() < 1e-3);
        assert!((y - 10.0).abs() < 1e-3);
    }
}
