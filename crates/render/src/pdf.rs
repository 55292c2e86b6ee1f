//! PDF backend built on lopdf
//!
//! Parses source documents, answers geometry questions and assembles export
//! documents by copying page dictionaries and appending overlay content
//! streams. Rasterization without a native renderer yields a blank page of
//! the right size, which keeps the pipeline usable in headless builds; the
//! `pdfium` feature layers real page pixels on top of this backend.

use crate::backend::{
    DocumentHandle, DocumentModel, DrawCommand, ImageHandle, LoadedDocument, OutputDocument,
    OutputPage, RenderError, Rasterizer,
};
use crate::content::{write_command, ResourceNames};
use crate::raster::{PageSize, Raster, RenderedPage, Rotation};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Resource name of the standard font used for overlay text
const OVERLAY_FONT: &str = "OvHelv";

/// Page tree inheritance is never this deep in a sane file
const MAX_INHERITANCE_DEPTH: usize = 32;

/// Geometry of a source page, resolved through the page tree
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub size: PageSize,
    pub rotation: Rotation,
}

/// A parsed source document
struct SourceDocument {
    doc: Document,
    page_ids: Vec<ObjectId>,
    geometry: Vec<PageGeometry>,
}

impl SourceDocument {
    fn parse(bytes: &[u8]) -> Result<Self, RenderError> {
        let doc = Document::load_mem(bytes)?;
        if doc.trailer.get(b"Encrypt").is_ok() {
            return Err(RenderError::EncryptedUnsupported);
        }

        let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
        let geometry = page_ids
            .iter()
            .map(|id| page_geometry(&doc, *id))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            doc,
            page_ids,
            geometry,
        })
    }

    fn page_count(&self) -> u32 {
        self.page_ids.len() as u32
    }

    fn page_id(&self, original_index: u32) -> Result<ObjectId, RenderError> {
        self.page_ids
            .get(original_index as usize)
            .copied()
            .ok_or(RenderError::PageOutOfRange {
                page: original_index,
                page_count: self.page_count(),
            })
    }

    fn geometry(&self, original_index: u32) -> Result<PageGeometry, RenderError> {
        self.geometry
            .get(original_index as usize)
            .copied()
            .ok_or(RenderError::PageOutOfRange {
                page: original_index,
                page_count: self.page_count(),
            })
    }
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

/// Look up a page attribute, following `/Parent` for inheritable keys.
fn inherited<'a>(doc: &'a Document, page: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    let mut dict = page;
    for _ in 0..MAX_INHERITANCE_DEPTH {
        if let Ok(obj) = dict.get(key) {
            return doc.dereference(obj).ok().map(|(_, obj)| obj);
        }
        let parent = dict.get(b"Parent").ok()?.as_reference().ok()?;
        dict = doc.get_dictionary(parent).ok()?;
    }
    None
}

fn media_box(obj: &Object) -> Option<PageSize> {
    let values: Vec<f32> = obj.as_array().ok()?.iter().filter_map(number).collect();
    if values.len() < 4 {
        return None;
    }
    let width = (values[2] - values[0]).abs();
    let height = (values[3] - values[1]).abs();
    if width <= 0.0 || height <= 0.0 {
        return None;
    }
    Some(PageSize::new(width, height))
}

fn page_geometry(doc: &Document, page_id: ObjectId) -> Result<PageGeometry, RenderError> {
    let page = doc.get_dictionary(page_id)?;

    let size = match inherited(doc, page, b"MediaBox").and_then(media_box) {
        Some(size) => size,
        None => {
            tracing::debug!(?page_id, "page has no usable MediaBox, assuming Letter");
            PageSize::LETTER
        }
    };
    let rotation = inherited(doc, page, b"Rotate")
        .and_then(number)
        .map(|deg| Rotation::from_degrees(deg as i32))
        .unwrap_or_default();

    Ok(PageGeometry { size, rotation })
}

/// Deep-copy a dictionary value, resolving a top-level reference.
fn owned_dictionary(doc: &Document, obj: &Object) -> Dictionary {
    match doc.dereference(obj) {
        Ok((_, Object::Dictionary(dict))) => dict.clone(),
        _ => Dictionary::new(),
    }
}

fn flate(data: &[u8]) -> Result<Vec<u8>, RenderError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn content_stream(content: &[u8]) -> Result<Stream, RenderError> {
    Ok(Stream::new(
        dictionary! { "Filter" => "FlateDecode" },
        flate(content)?,
    ))
}

/// Document backend based on lopdf
///
/// Thread-safe: documents live behind a read-write lock and handles are
/// allocated from an atomic counter.
#[derive(Default)]
pub struct LopdfBackend {
    next_handle: AtomicU64,
    docs: RwLock<HashMap<DocumentHandle, Arc<SourceDocument>>>,
}

impl LopdfBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn document(&self, handle: DocumentHandle) -> Result<Arc<SourceDocument>, RenderError> {
        self.docs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .cloned()
            .ok_or(RenderError::InvalidHandle(handle.raw()))
    }

    /// Size and intrinsic rotation of a source page
    pub fn page_geometry(
        &self,
        handle: DocumentHandle,
        original_index: u32,
    ) -> Result<PageGeometry, RenderError> {
        self.document(handle)?.geometry(original_index)
    }

    /// Number of documents currently open
    pub fn open_documents(&self) -> usize {
        self.docs.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl DocumentModel for LopdfBackend {
    fn load(&self, bytes: Vec<u8>) -> Result<LoadedDocument, RenderError> {
        let source = SourceDocument::parse(&bytes)?;
        let page_count = source.page_count();
        let handle = DocumentHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);

        self.docs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, Arc::new(source));

        tracing::info!(handle = handle.raw(), page_count, "loaded PDF document");
        Ok(LoadedDocument { handle, page_count })
    }

    fn close(&self, handle: DocumentHandle) -> Result<(), RenderError> {
        let removed = self
            .docs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle);
        if removed.is_none() {
            return Err(RenderError::InvalidHandle(handle.raw()));
        }
        tracing::debug!(handle = handle.raw(), "closed PDF document");
        Ok(())
    }

    fn new_output(&self, source: DocumentHandle) -> Result<Box<dyn OutputDocument>, RenderError> {
        let document = self.document(source)?;
        Ok(Box::new(LopdfOutput::new(source, document)))
    }
}

impl Rasterizer for LopdfBackend {
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

        let geometry = self.page_geometry(handle, original_index)?;
        let display = rotation.unwrap_or(geometry.rotation);

        Ok(RenderedPage {
            raster: Raster::blank_page(geometry.size, scale, display),
            page_size: geometry.size,
            rotation: geometry.rotation,
        })
    }
}

/// Per-page bookkeeping of an output document
struct OutputPageState {
    id: ObjectId,
    size: PageSize,
    rotation: Rotation,
    overlay: String,
    uses_font: bool,
    images: Vec<usize>,
}

/// Export document assembled from copies of source pages
pub struct LopdfOutput {
    source: DocumentHandle,
    origin: Arc<SourceDocument>,
    doc: Document,
    pages_id: ObjectId,
    pages: Vec<OutputPageState>,
    images: Vec<ObjectId>,
    font_id: Option<ObjectId>,
}

impl LopdfOutput {
    fn new(source: DocumentHandle, origin: Arc<SourceDocument>) -> Self {
        let mut doc = origin.doc.clone();
        let pages_id = doc.new_object_id();
        Self {
            source,
            origin,
            doc,
            pages_id,
            pages: Vec::new(),
            images: Vec::new(),
            font_id: None,
        }
    }

    fn page_mut(&mut self, page: OutputPage) -> Result<&mut OutputPageState, RenderError> {
        let count = self.pages.len() as u32;
        self.pages
            .get_mut(page.0)
            .ok_or(RenderError::PageOutOfRange {
                page: page.0 as u32,
                page_count: count,
            })
    }

    fn image_name(index: usize) -> String {
        format!("OvIm{index}")
    }

    fn font_id(&mut self) -> ObjectId {
        match self.font_id {
            Some(id) => id,
            None => {
                let id = self.doc.add_object(dictionary! {
                    "Type" => "Font",
                    "Subtype" => "Type1",
                    "BaseFont" => "Helvetica",
                    "Encoding" => "WinAnsiEncoding",
                });
                self.font_id = Some(id);
                id
            }
        }
    }

    /// Attach overlay content and resources to one page
    fn finish_page(&mut self, index: usize) -> Result<(), RenderError> {
        let (id, overlay, uses_font, images) = {
            let page = &self.pages[index];
            (page.id, page.overlay.clone(), page.uses_font, page.images.clone())
        };
        if overlay.is_empty() {
            return Ok(());
        }

        let font_id = if uses_font { Some(self.font_id()) } else { None };
        let push = self.doc.add_object(content_stream(b"q\n")?);
        let pop = self.doc.add_object(content_stream(b"Q\n")?);
        let overlay_id = self.doc.add_object(content_stream(overlay.as_bytes())?);

        let existing: Vec<Object> = {
            let page = self.doc.get_dictionary(id)?;
            match page.get(b"Contents") {
                Ok(Object::Array(items)) => items.clone(),
                Ok(obj @ Object::Reference(_)) => vec![obj.clone()],
                _ => Vec::new(),
            }
        };
        let mut contents = Vec::with_capacity(existing.len() + 3);
        contents.push(Object::Reference(push));
        contents.extend(existing);
        contents.push(Object::Reference(pop));
        contents.push(Object::Reference(overlay_id));

        let mut resources = {
            let page = self.doc.get_dictionary(id)?;
            page.get(b"Resources")
                .map(|obj| owned_dictionary(&self.doc, obj))
                .unwrap_or_default()
        };
        if let Some(font_id) = font_id {
            let mut fonts = resources
                .get(b"Font")
                .map(|obj| owned_dictionary(&self.doc, obj))
                .unwrap_or_default();
            fonts.set(OVERLAY_FONT, Object::Reference(font_id));
            resources.set("Font", Object::Dictionary(fonts));
        }
        if !images.is_empty() {
            let mut xobjects = resources
                .get(b"XObject")
                .map(|obj| owned_dictionary(&self.doc, obj))
                .unwrap_or_default();
            for image in images {
                xobjects.set(Self::image_name(image), Object::Reference(self.images[image]));
            }
            resources.set("XObject", Object::Dictionary(xobjects));
        }

        let page = self.doc.get_dictionary_mut(id)?;
        page.set("Contents", Object::Array(contents));
        page.set("Resources", Object::Dictionary(resources));
        Ok(())
    }
}

impl OutputDocument for LopdfOutput {
    fn copy_page(
        &mut self,
        source: DocumentHandle,
        original_index: u32,
    ) -> Result<OutputPage, RenderError> {
        if source != self.source {
            return Err(RenderError::Backend(format!(
                "cannot copy pages of document {} into an export of document {}",
                source.raw(),
                self.source.raw()
            )));
        }

        let source_id = self.origin.page_id(original_index)?;
        let geometry = self.origin.geometry(original_index)?;

        let mut page = self.doc.get_dictionary(source_id)?.clone();
        for key in [&b"MediaBox"[..], b"CropBox", b"Rotate"] {
            if !page.has(key) {
                if let Some(obj) = inherited(&self.doc, &page, key) {
                    let obj = obj.clone();
                    page.set(key.to_vec(), obj);
                }
            }
        }
        let resources = inherited(&self.doc, &page, b"Resources")
            .map(|obj| owned_dictionary(&self.doc, obj))
            .unwrap_or_default();
        page.set("Resources", Object::Dictionary(resources));
        page.set("Parent", Object::Reference(self.pages_id));

        let id = self.doc.add_object(Object::Dictionary(page));
        self.pages.push(OutputPageState {
            id,
            size: geometry.size,
            rotation: geometry.rotation,
            overlay: String::new(),
            uses_font: false,
            images: Vec::new(),
        });
        Ok(OutputPage(self.pages.len() - 1))
    }

    fn page_size(&self, page: OutputPage) -> Result<PageSize, RenderError> {
        self.pages
            .get(page.0)
            .map(|p| p.size)
            .ok_or(RenderError::PageOutOfRange {
                page: page.0 as u32,
                page_count: self.pages.len() as u32,
            })
    }

    fn rotation(&self, page: OutputPage) -> Result<Rotation, RenderError> {
        self.pages
            .get(page.0)
            .map(|p| p.rotation)
            .ok_or(RenderError::PageOutOfRange {
                page: page.0 as u32,
                page_count: self.pages.len() as u32,
            })
    }

    fn set_rotation(&mut self, page: OutputPage, rotation: Rotation) -> Result<(), RenderError> {
        let state = self.page_mut(page)?;
        state.rotation = rotation;
        let id = state.id;
        self.doc
            .get_dictionary_mut(id)?
            .set("Rotate", Object::Integer(rotation.degrees() as i64));
        Ok(())
    }

    fn embed_image(&mut self, bytes: &[u8]) -> Result<ImageHandle, RenderError> {
        let decoded = image::load_from_memory(bytes)?;
        let (width, height) = (decoded.width(), decoded.height());
        let rgba = decoded.to_rgba8();

        let mut rgb = Vec::with_capacity((width * height * 3) as usize);
        let mut alpha = Vec::with_capacity((width * height) as usize);
        for pixel in rgba.pixels() {
            rgb.extend_from_slice(&pixel.0[..3]);
            alpha.push(pixel.0[3]);
        }

        let mask_id = self.doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
            },
            flate(&alpha)?,
        ));
        let image_id = self.doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
                "SMask" => Object::Reference(mask_id),
            },
            flate(&rgb)?,
        ));

        self.images.push(image_id);
        Ok(ImageHandle(self.images.len() - 1))
    }

    fn draw(&mut self, page: OutputPage, command: &DrawCommand) -> Result<(), RenderError> {
        let image_name = match command {
            DrawCommand::Image { image, .. } => {
                if image.0 >= self.images.len() {
                    return Err(RenderError::Backend(format!(
                        "unknown image handle {}",
                        image.0
                    )));
                }
                Some(Self::image_name(image.0))
            }
            _ => None,
        };

        let state = self.page_mut(page)?;
        let names = ResourceNames {
            font: OVERLAY_FONT,
            image: image_name.as_deref(),
        };
        write_command(&mut state.overlay, command, &names)?;

        match command {
            DrawCommand::Text { .. } => state.uses_font = true,
            DrawCommand::Image { image, .. } if !state.images.contains(&image.0) => {
                state.images.push(image.0)
            }
            _ => {}
        }
        Ok(())
    }

    fn save(mut self: Box<Self>) -> Result<Vec<u8>, RenderError> {
        for index in 0..self.pages.len() {
            self.finish_page(index)?;
        }

        let kids: Vec<Object> = self.pages.iter().map(|p| Object::Reference(p.id)).collect();
        let count = kids.len() as i64;
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );

        let root = self.doc.trailer.get(b"Root")?.as_reference()?;
        let catalog = self.doc.get_dictionary_mut(root)?;
        catalog.set("Pages", Object::Reference(self.pages_id));
        // Entries that point into the old page tree
        for key in [&b"Outlines"[..], b"OpenAction", b"PageLabels", b"Dests", b"StructTreeRoot"] {
            catalog.remove(key);
        }

        self.doc.prune_objects();

        let mut buf = Vec::new();
        self.doc.save_to(&mut buf)?;
        tracing::info!(pages = count, bytes = buf.len(), "assembled export document");
        Ok(buf)
    }
}
