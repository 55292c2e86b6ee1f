//! PDF Overlay Core Library
//!
//! Editing session for drawing shapes, text and images on top of document
//! pages: the annotation store, the pointer interaction state machine,
//! debounced undo/redo history and the export compositor, tied together by
//! [`Editor`].

pub mod annotation;
pub mod config;
pub mod editor;
pub mod export;
pub mod history;
pub mod interaction;

pub use annotation::{
    AnnotationError, AnnotationStore, EditableObject, ImageObject, ObjectId, ObjectKind,
    ObjectPatch, Point, Rect, ShapeKind, ShapeObject, TextObject,
};
pub use config::{ConfigError, EditorConfig};
pub use editor::{Editor, LoadError};
pub use export::{ExportCompositor, ExportError, ExportStage};
pub use history::{History, HistoryRecorder, HistoryState};
pub use interaction::{
    DrawStyle, Gesture, ImageAsset, InteractionMachine, InteractionState, PointerEvent,
    PointerOutcome, PointerTarget, Tool,
};

pub use pdf_overlay_cache::{PageCatalog, PageId, PageInfo, RasterSlot, RenderTarget};
pub use pdf_overlay_render::{Color, Rotation};
pub use pdf_overlay_scheduler::{PageSlot, RenderConfig, Subscription, Viewport};
