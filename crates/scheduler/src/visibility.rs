//! Viewport-driven render requests
//!
//! The interface registers every mounted page element (sidebar thumbnail or
//! canvas) with [`VisibilityTrigger::subscribe`] and keeps the returned
//! [`Subscription`] alive while the element exists. On scroll it calls
//! [`VisibilityTrigger::observe`] with the current viewport and page layout;
//! every subscribed page that intersects the viewport (grown by the preload
//! margin) and still lacks a raster is queued for rendering.
//!
//! Requests are pure condition checks against the catalog and the
//! scheduler, so calling `observe` redundantly is harmless.

use crate::scheduler::RenderScheduler;
use pdf_overlay_cache::{PageId, RenderTarget};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Vertical extent of a scroll container, in layout pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Scroll offset of the first visible pixel
    pub top: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(top: f32, height: f32) -> Self {
        Self { top, height }
    }
}

/// Where a page element sits in the scroll container
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSlot {
    pub page_id: PageId,
    pub top: f32,
    pub height: f32,
}

impl PageSlot {
    pub fn new(page_id: PageId, top: f32, height: f32) -> Self {
        Self {
            page_id,
            top,
            height,
        }
    }
}

type Registry = Mutex<HashMap<(PageId, RenderTarget), usize>>;

/// Guard for an observed page element; dropping it stops observation
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<Registry>,
    page_id: PageId,
    target: RenderTarget,
}

impl Subscription {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn target(&self) -> RenderTarget {
        self.target
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (self.page_id, self.target);
        if let Some(count) = registry.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                registry.remove(&key);
            }
        }
    }
}

/// Enqueues renders for pages that scroll into view
pub struct VisibilityTrigger {
    scheduler: RenderScheduler,
    preload_margin: f32,
    registry: Arc<Registry>,
}

impl VisibilityTrigger {
    pub fn new(scheduler: RenderScheduler, preload_margin: f32) -> Self {
        Self {
            scheduler,
            preload_margin: preload_margin.max(0.0),
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn preload_margin(&self) -> f32 {
        self.preload_margin
    }

    /// Start observing a mounted page element
    pub fn subscribe(&self, page_id: PageId, target: RenderTarget) -> Subscription {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        *registry.entry((page_id, target)).or_insert(0) += 1;
        Subscription {
            registry: Arc::downgrade(&self.registry),
            page_id,
            target,
        }
    }

    pub fn is_subscribed(&self, page_id: PageId, target: RenderTarget) -> bool {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&(page_id, target))
    }

    /// Queue a render if the page exists, lacks the raster and is not
    /// already queued or in flight.
    pub fn request(&self, page_id: PageId, target: RenderTarget) -> bool {
        let Some(page) = self.scheduler.catalog().get(page_id) else {
            return false;
        };
        if page.slot(target).is_some() || self.scheduler.is_pending(page_id, target) {
            return false;
        }
        self.scheduler.enqueue(page_id, target)
    }

    /// Pages whose slot intersects the viewport grown by the preload margin
    pub fn visible_pages(&self, viewport: Viewport, slots: &[PageSlot]) -> Vec<PageId> {
        let start = viewport.top - self.preload_margin;
        let end = viewport.top + viewport.height + self.preload_margin;
        slots
            .iter()
            .filter(|slot| slot.top + slot.height > start && slot.top < end)
            .map(|slot| slot.page_id)
            .collect()
    }

    /// Request renders for every subscribed page near the viewport.
    ///
    /// Returns the pages that were newly queued.
    pub fn observe(
        &self,
        target: RenderTarget,
        viewport: Viewport,
        slots: &[PageSlot],
    ) -> Vec<PageId> {
        let queued: Vec<PageId> = self
            .visible_pages(viewport, slots)
            .into_iter()
            .filter(|id| self.is_subscribed(*id, target))
            .filter(|id| self.request(*id, target))
            .collect();
        if !queued.is_empty() {
            tracing::debug!(render_target = %target, pages = queued.len(), "visible pages queued");
        }
        queued
    }
}
