//! Export compositor
//!
//! Rebuilds the document in catalog order and burns every annotation into
//! the page content. Annotation geometry lives in screen convention (origin
//! top-left, +y down, rotation clockwise); output pages use page convention
//! (origin bottom-left, +y up, rotation counter-clockwise), so every
//! primitive is flipped against the page height on the way out.
//!
//! Any failure aborts the whole export. No partial output is returned.

use crate::annotation::{AnnotationStore, EditableObject, ObjectKind, ShapeKind};
use pdf_overlay_cache::PageInfo;
use pdf_overlay_render::{
    DocumentHandle, DocumentModel, DrawCommand, ImageHandle, OutputDocument, OutputPage,
    PaintStyle, Pivot, RenderError,
};
use std::fmt;

/// Step of the export that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStage {
    Open,
    CopyPage,
    Rotate,
    EmbedImage,
    Draw,
    Save,
}

impl fmt::Display for ExportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            ExportStage::Open => "opening the output document",
            ExportStage::CopyPage => "copying the page",
            ExportStage::Rotate => "rotating the page",
            ExportStage::EmbedImage => "embedding an image",
            ExportStage::Draw => "drawing annotations",
            ExportStage::Save => "saving",
        };
        f.write_str(stage)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("no document is loaded")]
    NoDocument,

    #[error("export failed while {stage} (page {page_number}): {source}")]
    Page {
        stage: ExportStage,
        page_number: u32,
        #[source]
        source: RenderError,
    },

    #[error("export failed while {stage}: {source}")]
    Document {
        stage: ExportStage,
        #[source]
        source: RenderError,
    },
}

impl ExportError {
    pub fn stage(&self) -> Option<ExportStage> {
        match self {
            ExportError::NoDocument => None,
            ExportError::Page { stage, .. } | ExportError::Document { stage, .. } => Some(*stage),
        }
    }

    /// 1-based page the export stopped on, when the failure is page-specific
    pub fn page_number(&self) -> Option<u32> {
        match self {
            ExportError::Page { page_number, .. } => Some(*page_number),
            _ => None,
        }
    }
}

/// Composes catalog order and annotations into output bytes
pub struct ExportCompositor<'a> {
    model: &'a dyn DocumentModel,
}

impl<'a> ExportCompositor<'a> {
    pub fn new(model: &'a dyn DocumentModel) -> Self {
        Self { model }
    }

    /// Build the output document for `pages` (in display order) with
    /// `annotations` drawn on top.
    pub fn export(
        &self,
        source: DocumentHandle,
        pages: &[PageInfo],
        annotations: &AnnotationStore,
    ) -> Result<Vec<u8>, ExportError> {
        let mut output = self
            .model
            .new_output(source)
            .map_err(|source| ExportError::Document {
                stage: ExportStage::Open,
                source,
            })?;

        let mut drawn = 0usize;
        for (index, page) in pages.iter().enumerate() {
            let page_number = index as u32 + 1;
            let fail = move |stage| move |source| ExportError::Page {
                stage,
                page_number,
                source,
            };

            let out = output
                .copy_page(source, page.original_index)
                .map_err(fail(ExportStage::CopyPage))?;
            // Until the first render discovers it, the catalog rotation is
            // relative to the page's own
            let rotation = if page.dimensions_known() {
                page.rotation
            } else {
                output
                    .rotation(out)
                    .map_err(fail(ExportStage::Rotate))?
                    .rotated_by(page.rotation.degrees())
            };
            output
                .set_rotation(out, rotation)
                .map_err(fail(ExportStage::Rotate))?;

            let objects = annotations.by_page(page_number);
            if objects.is_empty() {
                continue;
            }
            let page_height = output
                .page_size(out)
                .map_err(fail(ExportStage::Draw))?
                .height;
            for object in objects {
                draw_object(output.as_mut(), out, page_height, object).map_err(
                    |(stage, source)| ExportError::Page {
                        stage,
                        page_number,
                        source,
                    },
                )?;
                drawn += 1;
            }
        }

        let bytes = output.save().map_err(|source| ExportError::Document {
            stage: ExportStage::Save,
            source,
        })?;
        tracing::info!(
            pages = pages.len(),
            objects = drawn,
            bytes = bytes.len(),
            "document exported"
        );
        Ok(bytes)
    }
}

fn draw_object(
    output: &mut dyn OutputDocument,
    page: OutputPage,
    page_height: f32,
    object: &EditableObject,
) -> Result<(), (ExportStage, RenderError)> {
    let image = match &object.kind {
        ObjectKind::Image(image) => Some(
            output
                .embed_image(&image.source)
                .map_err(|err| (ExportStage::EmbedImage, err))?,
        ),
        _ => None,
    };
    let command = to_command(object, page_height, image);
    output
        .draw(page, &command)
        .map_err(|err| (ExportStage::Draw, err))
}

/// Map an object from screen convention onto a page of height `page_height`
pub fn to_command(
    object: &EditableObject,
    page_height: f32,
    image: Option<ImageHandle>,
) -> DrawCommand {
    let bounds = object.bounds;
    let x = bounds.x;
    let y = page_height - bounds.y - bounds.height;
    let pivot = (object.rotation != 0.0).then(|| Pivot {
        degrees: -object.rotation,
        cx: bounds.x + bounds.width / 2.0,
        cy: page_height - bounds.y - bounds.height / 2.0,
    });

    match &object.kind {
        ObjectKind::Shape(shape) => {
            let style = PaintStyle {
                stroke: (shape.stroke_width > 0.0).then_some(shape.stroke_color),
                stroke_width: shape.stroke_width,
                fill: shape.fill_color,
            };
            match shape.kind {
                ShapeKind::Rectangle => DrawCommand::Rectangle {
                    x,
                    y,
                    width: bounds.width,
                    height: bounds.height,
                    style,
                    pivot,
                },
                ShapeKind::Ellipse => DrawCommand::Ellipse {
                    x,
                    y,
                    width: bounds.width,
                    height: bounds.height,
                    style,
                    pivot,
                },
                ShapeKind::Freehand => DrawCommand::Polyline {
                    points: shape
                        .points
                        .iter()
                        .map(|p| (p.x, page_height - p.y))
                        .collect(),
                    style: PaintStyle { fill: None, ..style },
                    pivot,
                },
            }
        }
        ObjectKind::Text(text) => DrawCommand::Text {
            x,
            // Baseline one font size below the top edge
            y: page_height - bounds.y - text.font_size,
            text: text.text.clone(),
            font_size: text.font_size,
            color: text.color,
            pivot,
        },
        ObjectKind::Image(_) => match image {
            Some(image) => DrawCommand::Image {
                image,
                x,
                y,
                width: bounds.width,
                height: bounds.height,
                pivot,
            },
            // No embedded image: draw the placeholder outline instead
            None => DrawCommand::Rectangle {
                x,
                y,
                width: bounds.width,
                height: bounds.height,
                style: PaintStyle {
                    stroke: Some(pdf_overlay_render::Color::BLACK),
                    stroke_width: 1.0,
                    fill: None,
                },
                pivot,
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{
        EditableObject, ImageObject, ObjectPatch, Point, Rect, ShapeObject, TextObject,
    };
    use pdf_overlay_cache::{PageCatalog, PageUpdate};
    use pdf_overlay_render::{Color, LoadedDocument, PageSize, Rotation};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Op {
        Copy(u32),
        Rotate(usize, Rotation),
        Embed,
        Draw(usize, DrawCommand),
        Save,
    }

    #[derive(Default)]
    struct RecordingModel {
        ops: Arc<Mutex<Vec<Op>>>,
        fail_copy: Option<u32>,
    }

    struct RecordingOutput {
        ops: Arc<Mutex<Vec<Op>>>,
        pages: usize,
        images: usize,
        fail_copy: Option<u32>,
    }

    impl DocumentModel for RecordingModel {
        fn load(&self, _bytes: Vec<u8>) -> Result<LoadedDocument, RenderError> {
            Ok(LoadedDocument {
                handle: DocumentHandle::from_raw(1),
                page_count: 3,
            })
        }

        fn close(&self, _handle: DocumentHandle) -> Result<(), RenderError> {
            Ok(())
        }

        fn new_output(
            &self,
            _source: DocumentHandle,
        ) -> Result<Box<dyn OutputDocument>, RenderError> {
            Ok(Box::new(RecordingOutput {
                ops: self.ops.clone(),
                pages: 0,
                images: 0,
                fail_copy: self.fail_copy,
            }))
        }
    }

    impl OutputDocument for RecordingOutput {
        fn copy_page(
            &mut self,
            _source: DocumentHandle,
            original_index: u32,
        ) -> Result<OutputPage, RenderError> {
            if Some(original_index) == self.fail_copy {
                return Err(RenderError::Backend("copy failed".to_string()));
            }
            self.ops.lock().unwrap().push(Op::Copy(original_index));
            self.pages += 1;
            Ok(OutputPage(self.pages - 1))
        }

        fn page_size(&self, _page: OutputPage) -> Result<PageSize, RenderError> {
            Ok(PageSize::new(600.0, 800.0))
        }

        fn rotation(&self, _page: OutputPage) -> Result<Rotation, RenderError> {
            Ok(Rotation::Deg90)
        }

        fn set_rotation(
            &mut self,
            page: OutputPage,
            rotation: Rotation,
        ) -> Result<(), RenderError> {
            self.ops.lock().unwrap().push(Op::Rotate(page.0, rotation));
            Ok(())
        }

        fn embed_image(&mut self, _bytes: &[u8]) -> Result<ImageHandle, RenderError> {
            self.ops.lock().unwrap().push(Op::Embed);
            self.images += 1;
            Ok(ImageHandle(self.images - 1))
        }

        fn draw(&mut self, page: OutputPage, command: &DrawCommand) -> Result<(), RenderError> {
            self.ops.lock().unwrap().push(Op::Draw(page.0, command.clone()));
            Ok(())
        }

        fn save(self: Box<Self>) -> Result<Vec<u8>, RenderError> {
            self.ops.lock().unwrap().push(Op::Save);
            Ok(b"%PDF-recorded".to_vec())
        }
    }

    fn rectangle(page_number: u32, bounds: Rect) -> EditableObject {
        EditableObject::shape(
            page_number,
            bounds,
            ShapeObject {
                kind: ShapeKind::Rectangle,
                stroke_color: Color::RED,
                stroke_width: 2.0,
                fill_color: None,
                points: Vec::new(),
            },
        )
    }

    #[test]
    fn test_vertical_flip_covers_span() {
        let object = rectangle(1, Rect::new(10.0, 100.0, 50.0, 200.0));
        match to_command(&object, 800.0, None) {
            DrawCommand::Rectangle { x, y, height, pivot, .. } => {
                assert_eq!(x, 10.0);
                assert_eq!(y, 500.0);
                assert_eq!(y + height, 700.0);
                assert!(pivot.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }

        let full = rectangle(1, Rect::new(0.0, 0.0, 600.0, 800.0));
        match to_command(&full, 800.0, None) {
            DrawCommand::Rectangle { y, height, .. } => assert_eq!((y, y + height), (0.0, 800.0)),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_text_baseline_uses_font_size() {
        let object = EditableObject::text(
            1,
            Rect::new(20.0, 30.0, 100.0, 40.0),
            TextObject {
                text: "Hi".into(),
                font_size: 16.0,
                color: Color::BLUE,
            },
        );
        match to_command(&object, 800.0, None) {
            DrawCommand::Text { x, y, font_size, .. } => {
                assert_eq!(x, 20.0);
                assert_eq!(y, 800.0 - 30.0 - 16.0);
                assert_eq!(font_size, 16.0);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_object_rotation_is_negated_about_center() {
        let mut store = AnnotationStore::new();
        let id = store.add(rectangle(1, Rect::new(0.0, 0.0, 100.0, 50.0))).unwrap();
        store.update(id, ObjectPatch::new().with_rotation(30.0));

        let pivot = to_command(store.get(id).unwrap(), 800.0, None).pivot().unwrap();
        assert_eq!(pivot.degrees, -30.0);
        assert_eq!((pivot.cx, pivot.cy), (50.0, 775.0));
    }

    #[test]
    fn test_freehand_points_are_flipped() {
        let object = EditableObject::shape(
            1,
            Rect::new(0.0, 0.0, 10.0, 10.0),
            ShapeObject {
                kind: ShapeKind::Freehand,
                stroke_color: Color::BLACK,
                stroke_width: 1.0,
                fill_color: Some(Color::WHITE),
                points: vec![Point::new(0.0, 0.0), Point::new(10.0, 10.0)],
            },
        );
        match to_command(&object, 100.0, None) {
            DrawCommand::Polyline { points, style, .. } => {
                assert_eq!(points, vec![(0.0, 100.0), (10.0, 90.0)]);
                assert!(style.fill.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_export_follows_catalog_order_and_rotation() {
        let catalog = PageCatalog::new();
        let pages = catalog.initialize(3);
        for page in &pages {
            catalog.update(page.id, PageUpdate::new().with_dimensions(600.0, 800.0));
        }
        catalog.reorder(2, 0).unwrap();
        catalog.rotate(pages[1].id, 90).unwrap();

        let mut store = AnnotationStore::new();
        store.add(rectangle(1, Rect::new(0.0, 0.0, 10.0, 10.0))).unwrap();
        store
            .add(EditableObject::image(
                3,
                Rect::new(0.0, 0.0, 10.0, 10.0),
                ImageObject {
                    source: Arc::from(vec![0u8; 4]),
                    pixel_width: 1,
                    pixel_height: 1,
                },
            ))
            .unwrap();

        let model = RecordingModel::default();
        let bytes = ExportCompositor::new(&model)
            .export(DocumentHandle::from_raw(1), &catalog.pages(), &store)
            .unwrap();
        assert_eq!(bytes, b"%PDF-recorded");

        let ops = model.ops.lock().unwrap().clone();
        let copies: Vec<u32> = ops
            .iter()
            .filter_map(|op| match op {
                Op::Copy(index) => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(copies, vec![2, 0, 1]);
        assert!(ops.contains(&Op::Rotate(2, Rotation::Deg90)));
        assert!(matches!(ops[2], Op::Draw(0, DrawCommand::Rectangle { .. })));
        assert!(ops.contains(&Op::Embed));
        assert!(ops
            .iter()
            .any(|op| matches!(op, Op::Draw(2, DrawCommand::Image { .. }))));
        assert_eq!(ops.last(), Some(&Op::Save));
    }

    #[test]
    fn test_undiscovered_rotation_is_relative() {
        let catalog = PageCatalog::new();
        let pages = catalog.initialize(2);
        catalog.rotate(pages[0].id, 90).unwrap();

        let model = RecordingModel::default();
        ExportCompositor::new(&model)
            .export(DocumentHandle::from_raw(1), &catalog.pages(), &AnnotationStore::new())
            .unwrap();

        // The recorded source pages carry an intrinsic quarter turn
        let ops = model.ops.lock().unwrap().clone();
        assert!(ops.contains(&Op::Rotate(0, Rotation::Deg180)));
        assert!(ops.contains(&Op::Rotate(1, Rotation::Deg90)));
    }

    #[test]
    fn test_copy_failure_aborts_with_context() {
        let catalog = PageCatalog::new();
        catalog.initialize(3);
        let model = RecordingModel {
            fail_copy: Some(1),
            ..Default::default()
        };

        let err = ExportCompositor::new(&model)
            .export(DocumentHandle::from_raw(1), &catalog.pages(), &AnnotationStore::new())
            .unwrap_err();
        assert_eq!(err.stage(), Some(ExportStage::CopyPage));
        assert_eq!(err.page_number(), Some(2));
        assert!(!model.ops.lock().unwrap().contains(&Op::Save));
        assert!(err.to_string().contains("page 2"));
    }
}
