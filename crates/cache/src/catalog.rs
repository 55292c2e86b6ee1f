//! Page catalog
//!
//! Ordered, shared collection of lightweight per-page metadata plus the
//! rasters rendered for each page. The catalog's sequence order is the page
//! order of the document; page numbers are derived from position and are
//! recomputed after every structural change.
//!
//! All mutation goes through narrow methods that take the internal lock for
//! the whole read-modify-write, so a render completion can never clobber a
//! field written by a different operation.

use pdf_overlay_render::{Raster, Rotation};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Stable identity of a page, survives reordering and is never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(Uuid);

impl PageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which raster of a page a render produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderTarget {
    /// Small sidebar preview
    Thumbnail,
    /// Full-size interactive view
    Canvas,
}

impl fmt::Display for RenderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderTarget::Thumbnail => f.write_str("thumbnail"),
            RenderTarget::Canvas => f.write_str("canvas"),
        }
    }
}

/// Content of a raster field once a render has finished
#[derive(Debug, Clone)]
pub enum RasterSlot {
    Ready(Arc<Raster>),
    /// Sentinel for a failed render, carries the failure message.
    /// Terminal: the page is not re-rendered automatically.
    Failed(String),
}

impl RasterSlot {
    pub fn is_ready(&self) -> bool {
        matches!(self, RasterSlot::Ready(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RasterSlot::Failed(_))
    }

    pub fn raster(&self) -> Option<&Arc<Raster>> {
        match self {
            RasterSlot::Ready(raster) => Some(raster),
            RasterSlot::Failed(_) => None,
        }
    }
}

/// Metadata for one page of the loaded document
#[derive(Debug, Clone)]
pub struct PageInfo {
    pub id: PageId,
    /// Zero-based index into the source document at load time
    pub original_index: u32,
    /// 1-based position in the catalog
    pub page_number: u32,
    /// Width in source units, 0 until discovered by the first render
    pub width: f32,
    /// Height in source units, 0 until discovered by the first render
    pub height: f32,
    /// Display rotation. Before discovery this is relative to the page's
    /// own rotation; afterwards it is absolute.
    pub rotation: Rotation,
    /// Rotation stored in the source page, once discovered
    pub intrinsic_rotation: Option<Rotation>,
    pub thumbnail: Option<RasterSlot>,
    pub canvas: Option<RasterSlot>,
}

impl PageInfo {
    fn new(original_index: u32) -> Self {
        Self {
            id: PageId::new(),
            original_index,
            page_number: 0,
            width: 0.0,
            height: 0.0,
            rotation: Rotation::Deg0,
            intrinsic_rotation: None,
            thumbnail: None,
            canvas: None,
        }
    }

    /// Raster field for a render target
    pub fn slot(&self, target: RenderTarget) -> Option<&RasterSlot> {
        match target {
            RenderTarget::Thumbnail => self.thumbnail.as_ref(),
            RenderTarget::Canvas => self.canvas.as_ref(),
        }
    }

    /// Whether size and intrinsic rotation have been discovered yet
    pub fn dimensions_known(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

/// Partial update of a [`PageInfo`]; `None` fields are left untouched
#[derive(Debug, Clone, Default)]
pub struct PageUpdate {
    pub width: Option<f32>,
    pub height: Option<f32>,
    pub rotation: Option<Rotation>,
    pub intrinsic_rotation: Option<Rotation>,
    pub thumbnail: Option<RasterSlot>,
    pub canvas: Option<RasterSlot>,
}

impl PageUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dimensions(mut self, width: f32, height: f32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = Some(rotation);
        self
    }

    pub fn with_intrinsic_rotation(mut self, rotation: Rotation) -> Self {
        self.intrinsic_rotation = Some(rotation);
        self
    }

    pub fn with_slot(mut self, target: RenderTarget, slot: RasterSlot) -> Self {
        match target {
            RenderTarget::Thumbnail => self.thumbnail = Some(slot),
            RenderTarget::Canvas => self.canvas = Some(slot),
        }
        self
    }

    fn apply(self, page: &mut PageInfo) {
        if let Some(width) = self.width {
            page.width = width;
        }
        if let Some(height) = self.height {
            page.height = height;
        }
        if let Some(rotation) = self.rotation {
            page.rotation = rotation;
        }
        if let Some(rotation) = self.intrinsic_rotation {
            page.intrinsic_rotation = Some(rotation);
        }
        if let Some(thumbnail) = self.thumbnail {
            page.thumbnail = Some(thumbnail);
        }
        if let Some(canvas) = self.canvas {
            page.canvas = Some(canvas);
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("unknown page {0}")]
    UnknownPage(PageId),
    #[error("index {index} out of range for {len} pages")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Internal catalog state
struct CatalogState {
    pages: Vec<PageInfo>,
}

impl CatalogState {
    fn renumber(&mut self) {
        for (position, page) in self.pages.iter_mut().enumerate() {
            page.page_number = position as u32 + 1;
        }
    }

    fn position(&self, id: PageId) -> Option<usize> {
        self.pages.iter().position(|p| p.id == id)
    }
}

/// Shared page catalog
///
/// Cloning is cheap and yields another handle to the same catalog.
#[derive(Clone)]
pub struct PageCatalog {
    state: Arc<Mutex<CatalogState>>,
}

impl Default for PageCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl PageCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(CatalogState { pages: Vec::new() })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the catalog with `page_count` fresh pages
    ///
    /// Ids are newly generated, original indices run `0..page_count` and no
    /// dimension or raster field is populated.
    pub fn initialize(&self, page_count: u32) -> Vec<PageInfo> {
        let mut state = self.lock();
        state.pages = (0..page_count).map(PageInfo::new).collect();
        state.renumber();
        tracing::debug!(pages = page_count, "page catalog initialized");
        state.pages.clone()
    }

    /// Snapshot of all pages in order
    pub fn pages(&self) -> Vec<PageInfo> {
        self.lock().pages.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pages.is_empty()
    }

    pub fn get(&self, id: PageId) -> Option<PageInfo> {
        let state = self.lock();
        state.position(id).map(|i| state.pages[i].clone())
    }

    pub fn contains(&self, id: PageId) -> bool {
        self.lock().position(id).is_some()
    }

    /// Zero-based position of a page
    pub fn position(&self, id: PageId) -> Option<usize> {
        self.lock().position(id)
    }

    /// Page at a 1-based page number
    pub fn page_at(&self, page_number: u32) -> Option<PageInfo> {
        let index = (page_number as usize).checked_sub(1)?;
        self.lock().pages.get(index).cloned()
    }

    /// Apply a partial update to one page.
    ///
    /// Returns `false` and changes nothing when the page no longer exists.
    pub fn update(&self, id: PageId, update: PageUpdate) -> bool {
        self.update_with(id, |_| Some(update))
    }

    /// Compute and apply a partial update under a single lock.
    ///
    /// The closure sees the current entry and may decline by returning
    /// `None`. Returns whether an update was applied.
    pub fn update_with<F>(&self, id: PageId, f: F) -> bool
    where
        F: FnOnce(&PageInfo) -> Option<PageUpdate>,
    {
        let mut state = self.lock();
        let Some(index) = state.position(id) else {
            return false;
        };
        match f(&state.pages[index]) {
            Some(update) => {
                update.apply(&mut state.pages[index]);
                true
            }
            None => false,
        }
    }

    /// Move the page at `old_index` to `new_index`
    pub fn reorder(&self, old_index: usize, new_index: usize) -> Result<(), CatalogError> {
        let mut state = self.lock();
        let len = state.pages.len();
        for index in [old_index, new_index] {
            if index >= len {
                return Err(CatalogError::IndexOutOfRange { index, len });
            }
        }
        let page = state.pages.remove(old_index);
        state.pages.insert(new_index, page);
        state.renumber();
        tracing::debug!(from = old_index, to = new_index, "page moved");
        Ok(())
    }

    /// Remove a page, returning its last state
    pub fn remove(&self, id: PageId) -> Result<PageInfo, CatalogError> {
        let mut state = self.lock();
        let index = state.position(id).ok_or(CatalogError::UnknownPage(id))?;
        let page = state.pages.remove(index);
        state.renumber();
        tracing::debug!(page_id = %id, remaining = state.pages.len(), "page removed");
        Ok(page)
    }

    /// Insert a new page referring to source page `original_index`
    pub fn insert(&self, index: usize, original_index: u32) -> Result<PageId, CatalogError> {
        let mut state = self.lock();
        let len = state.pages.len();
        if index > len {
            return Err(CatalogError::IndexOutOfRange { index, len });
        }
        let page = PageInfo::new(original_index);
        let id = page.id;
        state.pages.insert(index, page);
        state.renumber();
        Ok(id)
    }

    /// Rotate a page by a multiple of 90 degrees.
    ///
    /// Both rasters are dropped since they were drawn at the old rotation.
    pub fn rotate(&self, id: PageId, delta_degrees: i32) -> Result<Rotation, CatalogError> {
        let mut state = self.lock();
        let index = state.position(id).ok_or(CatalogError::UnknownPage(id))?;
        let page = &mut state.pages[index];
        page.rotation = page.rotation.rotated_by(delta_degrees);
        page.thumbnail = None;
        page.canvas = None;
        Ok(page.rotation)
    }

    /// Restore a page layout captured earlier (undo/redo).
    ///
    /// Pages still present with the same rotation keep their current
    /// rasters, which may be newer than the snapshot's. Entries saved
    /// before discovery pick up what has been discovered since, with their
    /// relative rotation resolved against the page's own.
    pub fn restore_layout(&self, layout: &[PageInfo]) {
        let mut state = self.lock();
        let restored: Vec<PageInfo> = layout
            .iter()
            .map(|saved| {
                let mut page = saved.clone();
                if let Some(current) = state.pages.iter().find(|p| p.id == saved.id) {
                    if let (false, Some(intrinsic)) =
                        (page.dimensions_known(), current.intrinsic_rotation)
                    {
                        page.width = current.width;
                        page.height = current.height;
                        page.intrinsic_rotation = Some(intrinsic);
                        page.rotation = intrinsic.rotated_by(saved.rotation.degrees());
                    }
                    if current.rotation == page.rotation
                        && current.dimensions_known() == page.dimensions_known()
                    {
                        page.thumbnail = current.thumbnail.clone().or(page.thumbnail);
                        page.canvas = current.canvas.clone().or(page.canvas);
                    }
                }
                page
            })
            .collect();
        state.pages = restored;
        state.renumber();
    }

    /// Drop every page
    pub fn clear(&self) {
        self.lock().pages.clear();
    }
}
