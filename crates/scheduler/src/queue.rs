//! FIFO render request queue
//!
//! Requests are served strictly in arrival order. A page may be queued
//! once per render target; pushing the same page and target again is a
//! no-op.

use pdf_overlay_cache::{PageId, RenderTarget};
use std::collections::VecDeque;

/// A pending request for a page raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderRequest {
    pub page_id: PageId,
    pub target: RenderTarget,
}

impl RenderRequest {
    pub fn new(page_id: PageId, target: RenderTarget) -> Self {
        Self { page_id, target }
    }
}

#[derive(Debug, Default)]
pub struct RenderQueue {
    entries: VecDeque<RenderRequest>,
}

impl RenderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request unless an identical one is already waiting.
    pub fn push(&mut self, request: RenderRequest) -> bool {
        if self.contains(request) {
            return false;
        }
        self.entries.push_back(request);
        true
    }

    pub fn pop(&mut self) -> Option<RenderRequest> {
        self.entries.pop_front()
    }

    pub fn contains(&self, request: RenderRequest) -> bool {
        self.entries.contains(&request)
    }

    /// Drop every request for a page, returning how many were removed
    pub fn remove_page(&mut self, page_id: PageId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|r| r.page_id != page_id);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Snapshot of waiting requests in serving order
    pub fn requests(&self) -> Vec<RenderRequest> {
        self.entries.iter().copied().collect()
    }
}
