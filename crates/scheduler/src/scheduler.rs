//! Render scheduler
//!
//! Bounded-concurrency work queue that turns "page needs a raster" requests
//! into rasters written back into the [`PageCatalog`].
//!
//! The scheduler itself never renders. [`RenderScheduler::tick`] claims
//! requests up to the free capacity and hands out [`RenderTicket`]s; whoever
//! runs a ticket reports back through [`RenderScheduler::complete`], which
//! always frees the in-flight slot. A worker pool or a single cooperative
//! loop can drive it.
//!
//! Lock order: scheduler state, then catalog.

use crate::config::RenderConfig;
use crate::queue::{RenderQueue, RenderRequest};
use pdf_overlay_cache::{PageCatalog, PageId, PageUpdate, RasterSlot, RenderTarget};
use pdf_overlay_render::{DocumentHandle, Rasterizer, RenderError, RenderedPage, Rotation};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Render scheduler statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Requests accepted into the queue
    pub requests_submitted: u64,

    /// Rasters written back into the catalog
    pub renders_completed: u64,

    /// Renders that ended in an error sentinel
    pub renders_failed: u64,

    /// Stale requests and completions dropped without a write
    pub discarded: u64,
}

/// One claimed unit of render work
#[derive(Debug, Clone, PartialEq)]
pub struct RenderTicket {
    pub page_id: PageId,
    pub target: RenderTarget,
    pub document: DocumentHandle,
    pub original_index: u32,
    pub scale: f32,
    /// Display rotation to render at; `None` until the page has been
    /// discovered, meaning "use the page's intrinsic rotation"
    pub rotation: Option<Rotation>,
    generation: u64,
}

impl RenderTicket {
    /// Run the ticket against a rasterizer
    pub fn render(&self, rasterizer: &dyn Rasterizer) -> Result<RenderedPage, RenderError> {
        rasterizer.render_page(self.document, self.original_index, self.scale, self.rotation)
    }
}

/// Internal scheduler state
struct SchedulerState {
    queue: RenderQueue,
    in_flight: HashSet<(PageId, RenderTarget)>,
    document: Option<DocumentHandle>,
    /// Bumped whenever the document changes so stale completions are dropped
    generation: u64,
    stats: SchedulerStats,
}

/// Thread-safe render scheduler
///
/// Cloning is cheap and yields another handle to the same scheduler.
#[derive(Clone)]
pub struct RenderScheduler {
    catalog: PageCatalog,
    config: RenderConfig,
    state: Arc<Mutex<SchedulerState>>,
}

impl RenderScheduler {
    pub fn new(catalog: PageCatalog, config: RenderConfig) -> Self {
        Self {
            catalog,
            config,
            state: Arc::new(Mutex::new(SchedulerState {
                queue: RenderQueue::new(),
                in_flight: HashSet::new(),
                document: None,
                generation: 0,
                stats: SchedulerStats::default(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn catalog(&self) -> &PageCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Point the scheduler at a newly loaded document.
    ///
    /// Pending work for the previous document is dropped and its in-flight
    /// completions will be discarded.
    pub fn set_document(&self, document: DocumentHandle) {
        let mut state = self.lock();
        Self::reset(&mut state);
        state.document = Some(document);
    }

    /// Drop all queued work and detach from the document
    pub fn clear(&self) {
        let mut state = self.lock();
        Self::reset(&mut state);
        state.document = None;
    }

    fn reset(state: &mut SchedulerState) {
        state.queue.clear();
        state.in_flight.clear();
        state.generation += 1;
    }

    /// Queue a render request.
    ///
    /// Idempotent: returns `false` when the same page and target is already
    /// queued or in flight, or when the page is unknown.
    pub fn enqueue(&self, page_id: PageId, target: RenderTarget) -> bool {
        let mut state = self.lock();
        if state.in_flight.contains(&(page_id, target)) || !self.catalog.contains(page_id) {
            return false;
        }
        let accepted = state.queue.push(RenderRequest::new(page_id, target));
        if accepted {
            state.stats.requests_submitted += 1;
            tracing::debug!(
                %page_id,
                render_target = %target,
                queued = state.queue.len(),
                "render request queued"
            );
        }
        accepted
    }

    /// Whether a page and target is queued or being rendered
    pub fn is_pending(&self, page_id: PageId, target: RenderTarget) -> bool {
        let state = self.lock();
        state.in_flight.contains(&(page_id, target))
            || state.queue.contains(RenderRequest::new(page_id, target))
    }

    /// Drop queued requests for a page (in-flight work finishes and is
    /// discarded on completion if the page is gone)
    pub fn forget_page(&self, page_id: PageId) -> usize {
        self.lock().queue.remove_page(page_id)
    }

    pub fn queue_len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    /// No queued and no in-flight work
    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.queue.is_empty() && state.in_flight.is_empty()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.lock().stats
    }

    /// Claim as many requests as the concurrency bound allows
    pub fn tick(&self) -> Vec<RenderTicket> {
        self.claim(usize::MAX)
    }

    /// Claim at most one request
    pub fn next_ticket(&self) -> Option<RenderTicket> {
        self.claim(1).pop()
    }

    fn claim(&self, limit: usize) -> Vec<RenderTicket> {
        let mut state = self.lock();
        let mut tickets = Vec::new();
        let Some(document) = state.document else {
            return tickets;
        };

        while tickets.len() < limit && state.in_flight.len() < self.config.max_concurrent_renders
        {
            let Some(request) = state.queue.pop() else {
                break;
            };
            let Some(page) = self.catalog.get(request.page_id) else {
                state.stats.discarded += 1;
                tracing::debug!(page_id = %request.page_id, "discarding request for removed page");
                continue;
            };

            let needs = |target: RenderTarget, in_flight: &HashSet<(PageId, RenderTarget)>| {
                page.slot(target).is_none() && !in_flight.contains(&(page.id, target))
            };
            let target = if needs(RenderTarget::Thumbnail, &state.in_flight) {
                RenderTarget::Thumbnail
            } else if needs(RenderTarget::Canvas, &state.in_flight) {
                RenderTarget::Canvas
            } else {
                state.stats.discarded += 1;
                tracing::debug!(
                    page_id = %page.id,
                    render_target = %request.target,
                    "discarding stale render request"
                );
                continue;
            };

            // A canvas request that got served as a thumbnail goes back in line
            if target != request.target && needs(request.target, &state.in_flight) {
                state.queue.push(request);
            }

            state.in_flight.insert((page.id, target));
            tickets.push(RenderTicket {
                page_id: page.id,
                target,
                document,
                original_index: page.original_index,
                scale: self.config.scale_for(target),
                rotation: page.dimensions_known().then_some(page.rotation),
                generation: state.generation,
            });
        }

        if !tickets.is_empty() {
            tracing::debug!(
                claimed = tickets.len(),
                in_flight = state.in_flight.len(),
                "render tick"
            );
        }
        tickets
    }

    /// Write a finished render back into the catalog.
    ///
    /// The in-flight slot is released whatever the outcome. Results for
    /// pages that were removed, re-rotated or belong to a previous document
    /// are discarded. Failures store an error sentinel in the target's field.
    pub fn complete(&self, ticket: RenderTicket, result: Result<RenderedPage, RenderError>) {
        let mut state = self.lock();
        if ticket.generation != state.generation {
            state.stats.discarded += 1;
            tracing::debug!(page_id = %ticket.page_id, "discarding render for a previous document");
            return;
        }
        state.in_flight.remove(&(ticket.page_id, ticket.target));

        let target = ticket.target;
        let (rendered, error) = match result {
            Ok(rendered) => (Some(rendered), None),
            Err(err) => (None, Some(err)),
        };
        let mut outcome = Outcome::Discarded;
        let applied = self.catalog.update_with(ticket.page_id, |page| match rendered {
            Some(rendered) => {
                let mut update = PageUpdate::new();
                let current = if page.dimensions_known() {
                    page.rotation
                } else {
                    // First discovery; a rotation applied before discovery is
                    // relative to the intrinsic one
                    let rotation = rendered.rotation.rotated_by(page.rotation.degrees());
                    update = update
                        .with_dimensions(rendered.page_size.width, rendered.page_size.height)
                        .with_intrinsic_rotation(rendered.rotation)
                        .with_rotation(rotation);
                    rotation
                };
                let drawn_at = ticket.rotation.unwrap_or(rendered.rotation);
                if drawn_at == current {
                    update = update.with_slot(target, RasterSlot::Ready(Arc::new(rendered.raster)));
                    outcome = Outcome::Completed;
                }
                Some(update)
            }
            None => {
                if ticket.rotation.is_some_and(|r| r != page.rotation) {
                    return None;
                }
                let message = error
                    .as_ref()
                    .map(|err| err.to_string())
                    .unwrap_or_default();
                outcome = Outcome::Failed;
                Some(PageUpdate::new().with_slot(target, RasterSlot::Failed(message)))
            }
        });

        match (applied, outcome) {
            (true, Outcome::Completed) => state.stats.renders_completed += 1,
            (true, Outcome::Failed) => {
                state.stats.renders_failed += 1;
                if let Some(err) = &error {
                    tracing::warn!(
                        page_id = %ticket.page_id,
                        render_target = %target,
                        error = %err,
                        "page render failed"
                    );
                }
            }
            _ => {
                state.stats.discarded += 1;
                tracing::debug!(
                    page_id = %ticket.page_id,
                    render_target = %target,
                    "discarding stale render result"
                );
            }
        }
    }
}

enum Outcome {
    Completed,
    Failed,
    Discarded,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdf_overlay_render::{PageSize, Raster};

    fn rendered(rotation: Rotation) -> RenderedPage {
        RenderedPage {
            raster: Raster::blank_page(PageSize::new(100.0, 200.0), 0.25, rotation),
            page_size: PageSize::new(100.0, 200.0),
            rotation,
        }
    }

    fn setup(pages: u32, max: usize) -> (PageCatalog, RenderScheduler, Vec<PageId>) {
        let catalog = PageCatalog::new();
        let ids = catalog.initialize(pages).iter().map(|p| p.id).collect();
        let scheduler = RenderScheduler::new(
            catalog.clone(),
            RenderConfig::new().with_max_concurrent_renders(max),
        );
        scheduler.set_document(DocumentHandle::from_raw(1));
        (catalog, scheduler, ids)
    }

    #[test]
    fn test_enqueue_is_idempotent() {
        let (_, scheduler, ids) = setup(2, 4);
        assert!(scheduler.enqueue(ids[0], RenderTarget::Thumbnail));
        assert!(!scheduler.enqueue(ids[0], RenderTarget::Thumbnail));
        assert!(scheduler.enqueue(ids[0], RenderTarget::Canvas));
        assert!(!scheduler.enqueue(PageId::new(), RenderTarget::Canvas));
        assert_eq!(scheduler.queue_len(), 2);

        let tickets = scheduler.tick();
        assert_eq!(tickets.len(), 2);
        assert!(!scheduler.enqueue(ids[0], RenderTarget::Thumbnail));
        assert!(scheduler.is_pending(ids[0], RenderTarget::Canvas));
    }

    #[test]
    fn test_tick_respects_concurrency_bound() {
        let (_, scheduler, ids) = setup(6, 4);
        for id in &ids {
            scheduler.enqueue(*id, RenderTarget::Thumbnail);
        }

        let tickets = scheduler.tick();
        assert_eq!(tickets.len(), 4);
        assert_eq!(scheduler.in_flight(), 4);
        assert!(scheduler.tick().is_empty());

        // FIFO order
        let served: Vec<PageId> = tickets.iter().map(|t| t.page_id).collect();
        assert_eq!(served, ids[..4].to_vec());

        scheduler.complete(tickets[0].clone(), Ok(rendered(Rotation::Deg0)));
        let next = scheduler.tick();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].page_id, ids[4]);
        assert!(scheduler.in_flight() <= 4);
    }

    #[test]
    fn test_no_document_claims_nothing() {
        let catalog = PageCatalog::new();
        let id = catalog.initialize(1)[0].id;
        let scheduler = RenderScheduler::new(catalog, RenderConfig::default());
        scheduler.enqueue(id, RenderTarget::Thumbnail);
        assert!(scheduler.tick().is_empty());
    }

    #[test]
    fn test_target_selection() {
        let (catalog, scheduler, ids) = setup(1, 4);
        scheduler.enqueue(ids[0], RenderTarget::Canvas);

        // No thumbnail yet: the canvas request is served as a thumbnail and
        // the canvas request is re-queued
        let first = scheduler.tick();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].target, RenderTarget::Thumbnail);
        assert_eq!(first[0].scale, 0.25);
        assert_eq!(first[1].target, RenderTarget::Canvas);
        assert_eq!(first[1].scale, 1.5);
        assert!(first[0].rotation.is_none());

        for ticket in first {
            scheduler.complete(ticket, Ok(rendered(Rotation::Deg0)));
        }
        let page = catalog.get(ids[0]).unwrap();
        assert!(page.thumbnail.as_ref().unwrap().is_ready());
        assert!(page.canvas.as_ref().unwrap().is_ready());
        assert_eq!((page.width, page.height), (100.0, 200.0));

        // Both populated: a new request is discarded without work
        scheduler.enqueue(ids[0], RenderTarget::Thumbnail);
        assert!(scheduler.tick().is_empty());
        assert_eq!(scheduler.stats().discarded, 1);
    }

    #[test]
    fn test_failure_writes_sentinel() {
        let (catalog, scheduler, ids) = setup(1, 4);
        scheduler.enqueue(ids[0], RenderTarget::Thumbnail);
        let ticket = scheduler.next_ticket().unwrap();

        scheduler.complete(ticket, Err(RenderError::Backend("corrupt page".into())));
        let page = catalog.get(ids[0]).unwrap();
        assert!(matches!(
            page.thumbnail,
            Some(RasterSlot::Failed(ref msg)) if msg.contains("corrupt page")
        ));
        assert!(page.canvas.is_none());
        assert_eq!(scheduler.in_flight(), 0);
        assert_eq!(scheduler.stats().renders_failed, 1);
    }

    #[test]
    fn test_completion_for_removed_page_is_discarded() {
        let (catalog, scheduler, ids) = setup(3, 4);
        scheduler.enqueue(ids[1], RenderTarget::Thumbnail);
        let ticket = scheduler.next_ticket().unwrap();

        catalog.remove(ids[1]).unwrap();
        scheduler.complete(ticket, Ok(rendered(Rotation::Deg0)));

        assert_eq!(catalog.len(), 2);
        assert!(catalog.pages().iter().all(|p| p.thumbnail.is_none()));
        assert_eq!(scheduler.in_flight(), 0);
        assert_eq!(scheduler.stats().discarded, 1);
    }

    #[test]
    fn test_completion_after_rotation_is_discarded() {
        let (catalog, scheduler, ids) = setup(1, 4);
        catalog.update(ids[0], PageUpdate::new().with_dimensions(100.0, 200.0));
        scheduler.enqueue(ids[0], RenderTarget::Thumbnail);
        let ticket = scheduler.next_ticket().unwrap();
        assert_eq!(ticket.rotation, Some(Rotation::Deg0));

        catalog.rotate(ids[0], 90).unwrap();
        scheduler.complete(ticket, Ok(rendered(Rotation::Deg0)));
        assert!(catalog.get(ids[0]).unwrap().thumbnail.is_none());
    }

    #[test]
    fn test_discovery_applies_intrinsic_rotation() {
        let (catalog, scheduler, ids) = setup(1, 4);
        scheduler.enqueue(ids[0], RenderTarget::Thumbnail);
        let ticket = scheduler.next_ticket().unwrap();
        scheduler.complete(ticket, Ok(rendered(Rotation::Deg90)));

        let page = catalog.get(ids[0]).unwrap();
        assert_eq!(page.rotation, Rotation::Deg90);
        assert!(page.thumbnail.is_some());
    }

    #[test]
    fn test_new_document_drops_old_work() {
        let (catalog, scheduler, ids) = setup(2, 4);
        scheduler.enqueue(ids[0], RenderTarget::Thumbnail);
        scheduler.enqueue(ids[1], RenderTarget::Thumbnail);
        let ticket = scheduler.next_ticket().unwrap();

        scheduler.set_document(DocumentHandle::from_raw(2));
        assert!(scheduler.is_idle());
        scheduler.complete(ticket, Ok(rendered(Rotation::Deg0)));
        assert!(catalog.get(ids[0]).unwrap().thumbnail.is_none());
    }
}
