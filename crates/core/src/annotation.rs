//! Editable overlay objects and the annotation store
//!
//! All geometry is in page space at scale 1.0 with the origin at the
//! top-left of the page and y growing downward, independent of the current
//! display zoom. Conversion to document space happens only at export.

use pdf_overlay_render::Color;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Unique identifier for an editable object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(Uuid);

impl ObjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Point in unscaled page space
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned box in unscaled page space, origin at its top-left corner
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Zero-size box at a point
    pub fn at(point: Point) -> Self {
        Self::new(point.x, point.y, 0.0, 0.0)
    }

    /// Box spanned by two corners, normalized to non-negative size
    ///
    /// When the drag went left or up the origin flips to the other corner,
    /// so the result is the same whichever corner came first.
    pub fn from_corners(anchor: Point, current: Point) -> Self {
        let mut x = anchor.x;
        let mut y = anchor.y;
        let mut width = current.x - anchor.x;
        let mut height = current.y - anchor.y;
        if width < 0.0 {
            x = current.x;
            width = -width;
        }
        if height < 0.0 {
            y = current.y;
            height = -height;
        }
        Self::new(x, y, width, height)
    }

    /// Bounding box of a point list
    pub fn bounding(points: &[Point]) -> Self {
        let Some(first) = points.first() else {
            return Self::default();
        };
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for point in &points[1..] {
            min_x = min_x.min(point.x);
            min_y = min_y.min(point.y);
            max_x = max_x.max(point.x);
            max_y = max_y.max(point.y);
        }
        Self::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn translated(&self, dx: f32, dy: f32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    pub fn contains(&self, point: Point, tolerance: f32) -> bool {
        point.x >= self.x - tolerance
            && point.x <= self.x + self.width + tolerance
            && point.y >= self.y - tolerance
            && point.y <= self.y + self.height + tolerance
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeKind {
    Rectangle,
    Ellipse,
    /// Freehand stroke through a list of points
    Freehand,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShapeObject {
    pub kind: ShapeKind,
    pub stroke_color: Color,
    pub stroke_width: f32,
    pub fill_color: Option<Color>,
    /// Stroke points for freehand shapes, in page space
    pub points: Vec<Point>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextObject {
    /// Single line of text with one style
    pub text: String,
    pub font_size: f32,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageObject {
    /// Encoded source image (PNG, JPEG, ...)
    pub source: Arc<[u8]>,
    pub pixel_width: u32,
    pub pixel_height: u32,
}

/// Variant-specific content of an editable object
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectKind {
    Shape(ShapeObject),
    Text(TextObject),
    Image(ImageObject),
}

/// A user-placed overlay element on one page
#[derive(Debug, Clone, PartialEq)]
pub struct EditableObject {
    pub id: ObjectId,
    /// 1-based number of the page the object is drawn on
    pub page_number: u32,
    pub bounds: Rect,
    /// Clockwise degrees on screen, about the object's center
    pub rotation: f32,
    pub kind: ObjectKind,
}

impl EditableObject {
    pub fn new(page_number: u32, bounds: Rect, kind: ObjectKind) -> Self {
        Self {
            id: ObjectId::new(),
            page_number,
            bounds,
            rotation: 0.0,
            kind,
        }
    }

    pub fn shape(page_number: u32, bounds: Rect, shape: ShapeObject) -> Self {
        Self::new(page_number, bounds, ObjectKind::Shape(shape))
    }

    pub fn text(page_number: u32, bounds: Rect, text: TextObject) -> Self {
        Self::new(page_number, bounds, ObjectKind::Text(text))
    }

    pub fn image(page_number: u32, bounds: Rect, image: ImageObject) -> Self {
        Self::new(page_number, bounds, ObjectKind::Image(image))
    }

    /// Move/resize to `bounds`, carrying freehand points along
    fn set_bounds(&mut self, bounds: Rect) {
        let old = self.bounds;
        if let ObjectKind::Shape(shape) = &mut self.kind {
            let sx = if old.width > 0.0 { bounds.width / old.width } else { 1.0 };
            let sy = if old.height > 0.0 { bounds.height / old.height } else { 1.0 };
            for point in &mut shape.points {
                point.x = bounds.x + (point.x - old.x) * sx;
                point.y = bounds.y + (point.y - old.y) * sy;
            }
        }
        self.bounds = bounds;
    }
}

/// Partial update of an [`EditableObject`]
///
/// Fields that do not apply to the object's variant are ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectPatch {
    pub page_number: Option<u32>,
    pub bounds: Option<Rect>,
    pub rotation: Option<f32>,
    pub stroke_color: Option<Color>,
    pub stroke_width: Option<f32>,
    /// `Some(None)` removes the fill
    pub fill_color: Option<Option<Color>>,
    pub text: Option<String>,
    pub font_size: Option<f32>,
    pub text_color: Option<Color>,
}

impl ObjectPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_number(mut self, page_number: u32) -> Self {
        self.page_number = Some(page_number);
        self
    }

    pub fn with_bounds(mut self, bounds: Rect) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn with_rotation(mut self, degrees: f32) -> Self {
        self.rotation = Some(degrees);
        self
    }

    pub fn with_stroke(mut self, color: Color, width: f32) -> Self {
        self.stroke_color = Some(color);
        self.stroke_width = Some(width);
        self
    }

    pub fn with_fill(mut self, fill: Option<Color>) -> Self {
        self.fill_color = Some(fill);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_font_size(mut self, size: f32) -> Self {
        self.font_size = Some(size);
        self
    }

    pub fn with_text_color(mut self, color: Color) -> Self {
        self.text_color = Some(color);
        self
    }

    fn apply(self, object: &mut EditableObject) {
        if let Some(page_number) = self.page_number {
            object.page_number = page_number;
        }
        if let Some(bounds) = self.bounds {
            object.set_bounds(bounds);
        }
        if let Some(rotation) = self.rotation {
            object.rotation = rotation;
        }
        match &mut object.kind {
            ObjectKind::Shape(shape) => {
                if let Some(color) = self.stroke_color {
                    shape.stroke_color = color;
                }
                if let Some(width) = self.stroke_width {
                    shape.stroke_width = width;
                }
                if let Some(fill) = self.fill_color {
                    shape.fill_color = fill;
                }
            }
            ObjectKind::Text(text) => {
                if let Some(content) = self.text {
                    text.text = content;
                }
                if let Some(size) = self.font_size {
                    text.font_size = size;
                }
                if let Some(color) = self.text_color {
                    text.color = color;
                }
            }
            ObjectKind::Image(_) => {}
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AnnotationError {
    #[error("object {0} already exists")]
    DuplicateId(ObjectId),
    #[error("page {0} does not exist")]
    UnknownPage(u32),
}

/// Identity-keyed collection of editable objects
///
/// Objects remember the order they were added in; per-page listings and
/// hit tests use it for stacking (later objects are on top).
#[derive(Debug, Clone, Default)]
pub struct AnnotationStore {
    objects: HashMap<ObjectId, (u64, EditableObject)>,
    next_sequence: u64,
}

impl AnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new object.
    ///
    /// An id that is already present is rejected and the stored object is
    /// left unchanged.
    pub fn add(&mut self, object: EditableObject) -> Result<ObjectId, AnnotationError> {
        let id = object.id;
        if self.objects.contains_key(&id) {
            return Err(AnnotationError::DuplicateId(id));
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.objects.insert(id, (sequence, object));
        Ok(id)
    }

    /// Merge a patch into an existing object; no-op if the id is absent
    pub fn update(&mut self, id: ObjectId, patch: ObjectPatch) -> bool {
        match self.objects.get_mut(&id) {
            Some((_, object)) => {
                patch.apply(object);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: ObjectId) -> Option<EditableObject> {
        self.objects.remove(&id).map(|(_, object)| object)
    }

    pub fn get(&self, id: ObjectId) -> Option<&EditableObject> {
        self.objects.get(&id).map(|(_, object)| object)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn clear(&mut self) {
        self.objects.clear();
    }

    /// All objects in creation order
    pub fn iter(&self) -> impl Iterator<Item = &EditableObject> {
        let mut entries: Vec<&(u64, EditableObject)> = self.objects.values().collect();
        entries.sort_by_key(|(sequence, _)| *sequence);
        entries.into_iter().map(|(_, object)| object)
    }

    /// Objects on a page, bottom to top
    pub fn by_page(&self, page_number: u32) -> Vec<&EditableObject> {
        self.iter().filter(|o| o.page_number == page_number).collect()
    }

    /// Topmost object on a page whose bounds contain `point`
    pub fn hit_test(&self, page_number: u32, point: Point, tolerance: f32) -> Option<ObjectId> {
        self.by_page(page_number)
            .into_iter()
            .rev()
            .find(|o| o.bounds.contains(point, tolerance))
            .map(|o| o.id)
    }

    /// Delete every object on a page, returning how many were removed
    pub fn remove_page(&mut self, page_number: u32) -> usize {
        let before = self.objects.len();
        self.objects.retain(|_, (_, o)| o.page_number != page_number);
        before - self.objects.len()
    }

    /// Move objects to new page numbers after pages were reordered or
    /// deleted. Objects whose page maps to `None` are dropped.
    pub fn renumber_pages<F>(&mut self, mut map: F)
    where
        F: FnMut(u32) -> Option<u32>,
    {
        self.objects.retain(|_, (_, object)| match map(object.page_number) {
            Some(page_number) => {
                object.page_number = page_number;
                true
            }
            None => false,
        });
    }
}
