//! PDF Overlay Render Library
//!
//! Rasterization and page-surgery backends for the overlay editor, plus the
//! shared geometry and raster types.

mod backend;
mod content;
pub mod pdf;
#[cfg(feature = "pdfium")]
pub mod pdfium;
mod raster;

pub use backend::{
    Backend, DocumentHandle, DocumentModel, DrawCommand, ImageHandle, LoadedDocument,
    OutputDocument, OutputPage, PaintStyle, Pivot, Rasterizer, RenderError,
};
pub use content::escape_text;
pub use pdf::{LopdfBackend, PageGeometry};
#[cfg(feature = "pdfium")]
pub use pdfium::PdfiumBackend;
pub use raster::{Color, PageSize, Raster, RenderedPage, Rotation};
