//! Real page rasterization via PDFium
//!
//! Document parsing and export still go through [`LopdfBackend`]; only the
//! pixels come from PDFium. Enabled with the `pdfium` feature.

use crate::backend::{
    DocumentHandle, DocumentModel, LoadedDocument, OutputDocument, Rasterizer, RenderError,
};
use crate::pdf::LopdfBackend;
use crate::raster::{Raster, RenderedPage, Rotation};
use image::{imageops, RgbaImage};
use pdfium_render::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

fn pdfium_err(e: PdfiumError) -> RenderError {
    RenderError::Backend(format!("PDFium: {e}"))
}

/// Lopdf document model with PDFium page rendering
pub struct PdfiumBackend {
    model: LopdfBackend,
    pdfium: Pdfium,
    bytes: RwLock<HashMap<DocumentHandle, Arc<Vec<u8>>>>,
    /// PDFium is not reentrant; renders run one at a time
    render_lock: Mutex<()>,
}

impl PdfiumBackend {
    /// Bind PDFium, trying the executable's directory, the working
    /// directory and finally the system library paths.
    pub fn new() -> Result<Self, RenderError> {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()));

        let bindings = exe_dir
            .and_then(|dir| {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir)).ok()
            })
            .map(Ok)
            .unwrap_or_else(|| {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                    .or_else(|_| Pdfium::bind_to_system_library())
            })
            .map_err(pdfium_err)?;

        Ok(Self {
            model: LopdfBackend::new(),
            pdfium: Pdfium::new(bindings),
            bytes: RwLock::new(HashMap::new()),
            render_lock: Mutex::new(()),
        })
    }
}

impl DocumentModel for PdfiumBackend {
    fn load(&self, bytes: Vec<u8>) -> Result<LoadedDocument, RenderError> {
        let loaded = self.model.load(bytes.clone())?;
        self.bytes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(loaded.handle, Arc::new(bytes));
        Ok(loaded)
    }

    fn close(&self, handle: DocumentHandle) -> Result<(), RenderError> {
        self.bytes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle);
        self.model.close(handle)
    }

    fn new_output(&self, source: DocumentHandle) -> Result<Box<dyn OutputDocument>, RenderError> {
        self.model.new_output(source)
    }
}

impl Rasterizer for PdfiumBackend {
    fn render_page(
        &self,
        handle: DocumentHandle,
        original_index: u32,
        scale: f32,
        rotation: Option<Rotation>,
    ) -> Result<RenderedPage, RenderError> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(RenderError::Backend(format!("invalid render scale {scale}")));
        }
        let geometry = self.model.page_geometry(handle, original_index)?;
        let bytes = self
            .bytes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .cloned()
            .ok_or(RenderError::InvalidHandle(handle.raw()))?;

        let image = {
            let _guard = self.render_lock.lock().unwrap_or_else(PoisonError::into_inner);
            let document = self
                .pdfium
                .load_pdf_from_byte_slice(&bytes, None)
                .map_err(pdfium_err)?;
            let page = document
                .pages()
                .get(original_index as u16)
                .map_err(pdfium_err)?;

            // PDFium reports the size with the page's own /Rotate applied
            let width = (page.width().value * scale).round().max(1.0) as i32;
            let height = (page.height().value * scale).round().max(1.0) as i32;
            let config = PdfRenderConfig::new()
                .set_target_width(width)
                .set_target_height(height);
            let bitmap = page.render_with_config(&config).map_err(pdfium_err)?;

            RgbaImage::from_raw(width as u32, height as u32, bitmap.as_rgba_bytes().to_vec())
                .ok_or_else(|| RenderError::Backend("PDFium bitmap size mismatch".to_string()))?
        };

        let display = rotation.unwrap_or(geometry.rotation);
        let delta = Rotation::from_degrees(display.degrees() - geometry.rotation.degrees());
        let image = match delta {
            Rotation::Deg0 => image,
            Rotation::Deg90 => imageops::rotate90(&image),
            Rotation::Deg180 => imageops::rotate180(&image),
            Rotation::Deg270 => imageops::rotate270(&image),
        };

        Ok(RenderedPage {
            raster: Raster::new(image, scale),
            page_size: geometry.size,
            rotation: geometry.rotation,
        })
    }
}
