//! Pointer interaction state machine
//!
//! Turns pointer events plus the selected tool into new or moved objects.
//! The machine is either idle or in the middle of one gesture; the tool is
//! a persistent mode, not a state.
//!
//! Pointer positions arrive in display pixels relative to the page element
//! and are divided by the display scale before anything is stored, so
//! object geometry never depends on the zoom it was drawn at.

use crate::annotation::{
    AnnotationStore, EditableObject, ImageObject, ObjectId, ObjectPatch, Point, Rect, ShapeKind,
    ShapeObject, TextObject,
};
use crate::config::EditorConfig;
use pdf_overlay_render::Color;
use std::sync::Arc;

/// Decoded image ready to be placed with the image tool
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAsset {
    pub source: Arc<[u8]>,
    pub pixel_width: u32,
    pub pixel_height: u32,
}

impl ImageAsset {
    /// Probe an encoded image for its pixel size
    pub fn decode(bytes: Vec<u8>) -> Result<Self, image::ImageError> {
        let decoded = image::load_from_memory(&bytes)?;
        Ok(Self {
            pixel_width: decoded.width(),
            pixel_height: decoded.height(),
            source: Arc::from(bytes),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Tool {
    #[default]
    Select,
    /// Rectangle or ellipse dragged out as a box
    Shape(ShapeKind),
    Text,
    Image(ImageAsset),
    Freehand,
}

/// What the pointer went down on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerTarget {
    Background,
    Object(ObjectId),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub page_number: u32,
    /// Display pixels from the page's left edge
    pub x: f32,
    /// Display pixels from the page's top edge
    pub y: f32,
    pub target: PointerTarget,
}

impl PointerEvent {
    pub fn new(page_number: u32, x: f32, y: f32) -> Self {
        Self {
            page_number,
            x,
            y,
            target: PointerTarget::Background,
        }
    }

    pub fn on_object(mut self, id: ObjectId) -> Self {
        self.target = PointerTarget::Object(id);
        self
    }
}

/// Gesture in progress
#[derive(Debug, Clone, PartialEq)]
pub enum Gesture {
    /// A new object being dragged out from `anchor`
    Create {
        anchor: Point,
        object: EditableObject,
    },
    /// An existing object being dragged with the select tool
    Move {
        id: ObjectId,
        page_number: u32,
        grab: Point,
        start: Rect,
        current: Rect,
    },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum InteractionState {
    #[default]
    Idle,
    Drawing(Gesture),
}

/// Result of feeding one pointer event to the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerOutcome {
    /// Nothing happened
    Ignored,
    SelectionCleared,
    Selected(ObjectId),
    /// The in-progress gesture changed; redraw the preview
    Preview,
    /// A new object was added to the store
    Created(ObjectId),
    /// An existing object was moved
    Moved(ObjectId),
}

impl PointerOutcome {
    /// Whether the annotation store changed
    pub fn is_mutation(&self) -> bool {
        matches!(self, PointerOutcome::Created(_) | PointerOutcome::Moved(_))
    }
}

/// Style applied to newly created objects
#[derive(Debug, Clone, PartialEq)]
pub struct DrawStyle {
    pub stroke_color: Color,
    pub stroke_width: f32,
    pub fill_color: Option<Color>,
    pub text: String,
    pub font_size: f32,
    pub text_color: Color,
    pub image_width: f32,
}

impl DrawStyle {
    pub fn from_config(config: &EditorConfig) -> Self {
        Self {
            stroke_color: Color::RED,
            stroke_width: config.default_stroke_width,
            fill_color: None,
            text: config.default_text.clone(),
            font_size: config.default_font_size,
            text_color: Color::BLACK,
            image_width: config.image_insert_width,
        }
    }
}

impl Default for DrawStyle {
    fn default() -> Self {
        Self::from_config(&EditorConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct InteractionMachine {
    tool: Tool,
    scale: f32,
    state: InteractionState,
    selection: Option<ObjectId>,
    style: DrawStyle,
}

impl Default for InteractionMachine {
    fn default() -> Self {
        Self::new(DrawStyle::default())
    }
}

impl InteractionMachine {
    pub fn new(style: DrawStyle) -> Self {
        Self {
            tool: Tool::Select,
            scale: 1.0,
            state: InteractionState::Idle,
            selection: None,
            style,
        }
    }

    pub fn tool(&self) -> &Tool {
        &self.tool
    }

    /// Switch tools, abandoning any gesture in progress
    pub fn set_tool(&mut self, tool: Tool) {
        self.cancel();
        self.tool = tool;
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Change the display zoom; non-positive values are ignored
    pub fn set_scale(&mut self, scale: f32) {
        if scale.is_finite() && scale > 0.0 {
            self.scale = scale;
        }
    }

    pub fn style(&self) -> &DrawStyle {
        &self.style
    }

    pub fn style_mut(&mut self) -> &mut DrawStyle {
        &mut self.style
    }

    pub fn state(&self) -> &InteractionState {
        &self.state
    }

    pub fn is_drawing(&self) -> bool {
        matches!(self.state, InteractionState::Drawing(_))
    }

    pub fn selection(&self) -> Option<ObjectId> {
        self.selection
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    /// Object being created, for live preview
    pub fn preview(&self) -> Option<&EditableObject> {
        match &self.state {
            InteractionState::Drawing(Gesture::Create { object, .. }) => Some(object),
            _ => None,
        }
    }

    /// Current bounds of an object being moved
    pub fn drag_bounds(&self) -> Option<(ObjectId, Rect)> {
        match &self.state {
            InteractionState::Drawing(Gesture::Move { id, current, .. }) => Some((*id, *current)),
            _ => None,
        }
    }

    /// Abort the gesture in progress without touching the store
    pub fn cancel(&mut self) {
        self.state = InteractionState::Idle;
    }

    fn to_page(&self, event: &PointerEvent) -> Point {
        Point::new(event.x / self.scale, event.y / self.scale)
    }

    fn new_object(&self, page_number: u32, at: Point) -> Option<EditableObject> {
        let style = &self.style;
        let shape = |kind: ShapeKind, points: Vec<Point>| ShapeObject {
            kind,
            stroke_color: style.stroke_color,
            stroke_width: style.stroke_width,
            fill_color: style.fill_color,
            points,
        };
        let bounds = Rect::at(at);
        match &self.tool {
            Tool::Shape(kind) => Some(EditableObject::shape(
                page_number,
                bounds,
                shape(*kind, Vec::new()),
            )),
            Tool::Freehand => Some(EditableObject::shape(
                page_number,
                bounds,
                shape(ShapeKind::Freehand, vec![at]),
            )),
            Tool::Text => Some(EditableObject::text(
                page_number,
                bounds,
                TextObject {
                    text: style.text.clone(),
                    font_size: style.font_size,
                    color: style.text_color,
                },
            )),
            Tool::Image(_) | Tool::Select => None,
        }
    }

    pub fn pointer_down(
        &mut self,
        event: PointerEvent,
        store: &mut AnnotationStore,
    ) -> PointerOutcome {
        if self.is_drawing() {
            return PointerOutcome::Ignored;
        }
        let at = self.to_page(&event);

        match &self.tool {
            Tool::Select => match event.target {
                PointerTarget::Object(id) => match store.get(id) {
                    Some(object) => {
                        self.selection = Some(id);
                        self.state = InteractionState::Drawing(Gesture::Move {
                            id,
                            page_number: object.page_number,
                            grab: at,
                            start: object.bounds,
                            current: object.bounds,
                        });
                        PointerOutcome::Selected(id)
                    }
                    None => PointerOutcome::Ignored,
                },
                PointerTarget::Background => {
                    self.selection = None;
                    PointerOutcome::SelectionCleared
                }
            },
            Tool::Image(asset) => {
                let width = self.style.image_width;
                let height = if asset.pixel_width > 0 {
                    width * asset.pixel_height as f32 / asset.pixel_width as f32
                } else {
                    width
                };
                let object = EditableObject::image(
                    event.page_number,
                    Rect::new(at.x, at.y, width, height),
                    ImageObject {
                        source: asset.source.clone(),
                        pixel_width: asset.pixel_width,
                        pixel_height: asset.pixel_height,
                    },
                );
                self.commit(object, store)
            }
            _ => match self.new_object(event.page_number, at) {
                Some(object) => {
                    self.state = InteractionState::Drawing(Gesture::Create { anchor: at, object });
                    PointerOutcome::Preview
                }
                None => PointerOutcome::Ignored,
            },
        }
    }

    pub fn pointer_move(&mut self, event: PointerEvent) -> PointerOutcome {
        let at = self.to_page(&event);
        match &mut self.state {
            InteractionState::Idle => PointerOutcome::Ignored,
            InteractionState::Drawing(gesture) => {
                drag(gesture, at);
                PointerOutcome::Preview
            }
        }
    }

    pub fn pointer_up(
        &mut self,
        event: PointerEvent,
        store: &mut AnnotationStore,
    ) -> PointerOutcome {
        let at = self.to_page(&event);
        let InteractionState::Drawing(mut gesture) = std::mem::take(&mut self.state) else {
            return PointerOutcome::Ignored;
        };
        drag(&mut gesture, at);

        match gesture {
            Gesture::Create { object, .. } => self.commit(object, store),
            Gesture::Move {
                id, start, current, ..
            } => {
                if current == start {
                    return PointerOutcome::Selected(id);
                }
                if store.update(id, ObjectPatch::new().with_bounds(current)) {
                    PointerOutcome::Moved(id)
                } else {
                    PointerOutcome::Ignored
                }
            }
        }
    }

    fn commit(&mut self, object: EditableObject, store: &mut AnnotationStore) -> PointerOutcome {
        match store.add(object) {
            Ok(id) => {
                self.selection = Some(id);
                tracing::debug!(object_id = %id, "object created");
                PointerOutcome::Created(id)
            }
            Err(err) => {
                tracing::warn!(error = %err, "object not committed");
                PointerOutcome::Ignored
            }
        }
    }
}

/// Apply pointer movement to a gesture
fn drag(gesture: &mut Gesture, at: Point) {
    match gesture {
        Gesture::Create { anchor, object } => {
            if let crate::annotation::ObjectKind::Shape(ShapeObject {
                kind: ShapeKind::Freehand,
                points,
                ..
            }) = &mut object.kind
            {
                if points.last() != Some(&at) {
                    points.push(at);
                }
                object.bounds = Rect::bounding(points);
            } else {
                object.bounds = Rect::from_corners(*anchor, at);
            }
        }
        Gesture::Move {
            grab,
            start,
            current,
            ..
        } => {
            *current = start.translated(at.x - grab.x, at.y - grab.y);
        }
    }
}
