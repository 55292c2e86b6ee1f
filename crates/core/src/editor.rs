//! Editor context
//!
//! [`Editor`] owns every piece of session state (page catalog, annotation
//! store, history, interaction machine, render scheduler) and is the only
//! place that mutates them. Each mutating call schedules a debounced history
//! snapshot; undo, redo and export flush it first.

use crate::annotation::{AnnotationError, AnnotationStore, EditableObject, ObjectId, ObjectPatch};
use crate::config::{ConfigError, EditorConfig};
use crate::export::{ExportCompositor, ExportError};
use crate::history::{History, HistoryRecorder, HistoryState};
use crate::interaction::{DrawStyle, InteractionMachine, PointerEvent, PointerOutcome, Tool};
use pdf_overlay_cache::{CatalogError, PageCatalog, PageId, PageInfo, RenderTarget};
use pdf_overlay_render::{Backend, DocumentHandle, Rasterizer, RenderError, Rotation};
use pdf_overlay_scheduler::{
    PageSlot, RenderPool, RenderScheduler, Subscription, Viewport, VisibilityTrigger,
};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("the document is encrypted")]
    Encrypted,

    #[error("could not open the document: {0}")]
    Parse(#[source] RenderError),
}

impl From<RenderError> for LoadError {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::EncryptedUnsupported => LoadError::Encrypted,
            other => LoadError::Parse(other),
        }
    }
}

/// Editing session over one document
pub struct Editor<B: Backend + 'static> {
    config: EditorConfig,
    backend: Arc<B>,
    catalog: PageCatalog,
    annotations: AnnotationStore,
    recorder: HistoryRecorder,
    interaction: InteractionMachine,
    scheduler: RenderScheduler,
    visibility: VisibilityTrigger,
    pool: Option<RenderPool>,
    document: Option<DocumentHandle>,
    source_pages: u32,
}

impl<B: Backend + 'static> Editor<B> {
    pub fn new(backend: B, config: EditorConfig) -> Result<Self, ConfigError> {
        Self::with_shared_backend(Arc::new(backend), config)
    }

    pub fn with_shared_backend(backend: Arc<B>, config: EditorConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let catalog = PageCatalog::new();
        let scheduler = RenderScheduler::new(catalog.clone(), config.render.clone());
        let visibility = VisibilityTrigger::new(scheduler.clone(), config.preload_margin);
        let recorder = HistoryRecorder::new(History::new(), config.history_debounce);
        let interaction = InteractionMachine::new(DrawStyle::from_config(&config));

        Ok(Self {
            config,
            backend,
            catalog,
            annotations: AnnotationStore::new(),
            recorder,
            interaction,
            scheduler,
            visibility,
            pool: None,
            document: None,
            source_pages: 0,
        })
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn catalog(&self) -> &PageCatalog {
        &self.catalog
    }

    pub fn scheduler(&self) -> &RenderScheduler {
        &self.scheduler
    }

    pub fn visibility(&self) -> &VisibilityTrigger {
        &self.visibility
    }

    pub fn annotations(&self) -> &AnnotationStore {
        &self.annotations
    }

    pub fn history(&self) -> &History {
        self.recorder.history()
    }

    pub fn interaction(&self) -> &InteractionMachine {
        &self.interaction
    }

    pub fn document(&self) -> Option<DocumentHandle> {
        self.document
    }

    pub fn pages(&self) -> Vec<PageInfo> {
        self.catalog.pages()
    }

    pub fn page_count(&self) -> usize {
        self.catalog.len()
    }

    // =========================================================================
    // Document lifecycle
    // =========================================================================

    /// Parse `bytes` and replace the current session with it.
    ///
    /// On failure the current session is left untouched.
    pub fn load(&mut self, bytes: Vec<u8>) -> Result<Vec<PageInfo>, LoadError> {
        let loaded = self.backend.load(bytes)?;

        self.close_document();
        self.document = Some(loaded.handle);
        self.source_pages = loaded.page_count;
        self.scheduler.set_document(loaded.handle);
        let pages = self.catalog.initialize(loaded.page_count);
        self.recorder.history().reset(self.snapshot());

        tracing::info!(
            pages = loaded.page_count,
            document = loaded.handle.raw(),
            "document loaded"
        );
        Ok(pages)
    }

    /// Drop the current document and every piece of state built on it
    pub fn close(&mut self) {
        self.close_document();
        self.recorder.history().clear();
    }

    fn close_document(&mut self) {
        self.recorder.discard();
        self.scheduler.clear();
        self.catalog.clear();
        self.annotations.clear();
        self.interaction.cancel();
        self.interaction.clear_selection();
        self.source_pages = 0;
        if let Some(handle) = self.document.take() {
            if let Err(err) = self.backend.close(handle) {
                tracing::warn!(document = handle.raw(), error = %err, "failed to close document");
            }
        }
    }

    // =========================================================================
    // Rendering
    // =========================================================================

    /// Spawn background render workers; idempotent.
    pub fn start_render_workers(&mut self) -> std::io::Result<()> {
        if self.pool.is_none() {
            let rasterizer: Arc<dyn Rasterizer> = self.backend.clone();
            self.pool = Some(RenderPool::new(self.scheduler.clone(), rasterizer)?);
        }
        Ok(())
    }

    pub fn render_pool(&self) -> Option<&RenderPool> {
        self.pool.as_ref()
    }

    pub fn stop_render_workers(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
    }

    /// Render everything queued on the calling thread.
    ///
    /// For embeddings without worker threads. Returns how many renders ran.
    pub fn render_pending(&self) -> usize {
        let mut rendered = 0;
        while let Some(ticket) = self.scheduler.next_ticket() {
            let result = ticket.render(&*self.backend);
            self.scheduler.complete(ticket, result);
            rendered += 1;
        }
        rendered
    }

    pub fn request_render(&self, page_id: PageId, target: RenderTarget) -> bool {
        self.visibility.request(page_id, target)
    }

    pub fn subscribe(&self, page_id: PageId, target: RenderTarget) -> Subscription {
        self.visibility.subscribe(page_id, target)
    }

    pub fn observe(
        &self,
        target: RenderTarget,
        viewport: Viewport,
        slots: &[PageSlot],
    ) -> Vec<PageId> {
        self.visibility.observe(target, viewport, slots)
    }

    // =========================================================================
    // Page operations
    // =========================================================================

    pub fn delete_page(&mut self, page_id: PageId) -> Result<(), CatalogError> {
        let before = self.page_ids();
        self.catalog.remove(page_id)?;
        self.scheduler.forget_page(page_id);
        self.remap_annotations(&before);
        self.record();
        Ok(())
    }

    pub fn reorder_page(&mut self, old_index: usize, new_index: usize) -> Result<(), CatalogError> {
        let before = self.page_ids();
        self.catalog.reorder(old_index, new_index)?;
        self.remap_annotations(&before);
        self.record();
        Ok(())
    }

    /// Insert another copy of source page `original_index` at `index`
    pub fn insert_page(
        &mut self,
        index: usize,
        original_index: u32,
    ) -> Result<PageId, CatalogError> {
        if original_index >= self.source_pages {
            return Err(CatalogError::IndexOutOfRange {
                index: original_index as usize,
                len: self.source_pages as usize,
            });
        }
        let before = self.page_ids();
        let id = self.catalog.insert(index, original_index)?;
        self.remap_annotations(&before);
        self.record();
        Ok(id)
    }

    pub fn rotate_page(
        &mut self,
        page_id: PageId,
        delta_degrees: i32,
    ) -> Result<Rotation, CatalogError> {
        let rotation = self.catalog.rotate(page_id, delta_degrees)?;
        self.record();
        Ok(rotation)
    }

    fn page_ids(&self) -> Vec<PageId> {
        self.catalog.pages().iter().map(|p| p.id).collect()
    }

    /// Follow each object's page to its new position; objects on pages
    /// that no longer exist are dropped. A gesture in progress holds a page
    /// number from the old layout, so it is cancelled.
    fn remap_annotations(&mut self, before: &[PageId]) {
        self.interaction.cancel();
        let catalog = &self.catalog;
        self.annotations.renumber_pages(|page_number| {
            let id = before.get(page_number.checked_sub(1)? as usize)?;
            catalog.position(*id).map(|index| index as u32 + 1)
        });
        self.drop_stale_selection();
    }

    // =========================================================================
    // Object operations
    // =========================================================================

    pub fn add_object(&mut self, object: EditableObject) -> Result<ObjectId, AnnotationError> {
        if !self.has_page(object.page_number) {
            return Err(AnnotationError::UnknownPage(object.page_number));
        }
        let id = self.annotations.add(object)?;
        self.record();
        Ok(id)
    }

    /// Apply a property edit; `false` if the object does not exist or the
    /// patch names a page that does not exist.
    pub fn update_object(&mut self, id: ObjectId, patch: ObjectPatch) -> bool {
        if patch.page_number.is_some_and(|n| !self.has_page(n)) {
            return false;
        }
        let updated = self.annotations.update(id, patch);
        if updated {
            self.record();
        }
        updated
    }

    pub fn delete_object(&mut self, id: ObjectId) -> bool {
        let removed = self.annotations.remove(id).is_some();
        if removed {
            self.drop_stale_selection();
            self.record();
        }
        removed
    }

    fn has_page(&self, page_number: u32) -> bool {
        page_number >= 1 && page_number as usize <= self.catalog.len()
    }

    fn drop_stale_selection(&mut self) {
        if let Some(id) = self.interaction.selection() {
            if !self.annotations.contains(id) {
                self.interaction.clear_selection();
            }
        }
    }

    // =========================================================================
    // Interaction
    // =========================================================================

    pub fn set_tool(&mut self, tool: Tool) {
        self.interaction.set_tool(tool);
    }

    pub fn set_scale(&mut self, scale: f32) {
        self.interaction.set_scale(scale);
    }

    pub fn cancel_gesture(&mut self) {
        self.interaction.cancel();
    }

    pub fn selection(&self) -> Option<ObjectId> {
        self.interaction.selection()
    }

    pub fn pointer_down(&mut self, event: PointerEvent) -> PointerOutcome {
        if !self.has_page(event.page_number) {
            return PointerOutcome::Ignored;
        }
        let outcome = self.interaction.pointer_down(event, &mut self.annotations);
        self.after_pointer(outcome)
    }

    pub fn pointer_move(&mut self, event: PointerEvent) -> PointerOutcome {
        self.interaction.pointer_move(event)
    }

    pub fn pointer_up(&mut self, event: PointerEvent) -> PointerOutcome {
        let outcome = self.interaction.pointer_up(event, &mut self.annotations);
        self.after_pointer(outcome)
    }

    fn after_pointer(&mut self, outcome: PointerOutcome) -> PointerOutcome {
        if outcome.is_mutation() {
            self.record();
        }
        outcome
    }

    // =========================================================================
    // History
    // =========================================================================

    /// Rasters are left out; `restore_layout` reuses the current ones.
    fn snapshot(&self) -> HistoryState {
        let pages = self
            .catalog
            .pages()
            .into_iter()
            .map(|mut page| {
                page.thumbnail = None;
                page.canvas = None;
                page
            })
            .collect();
        HistoryState::new(pages, self.annotations.clone())
    }

    fn record(&mut self) {
        let state = self.snapshot();
        self.recorder.schedule(state, Instant::now());
    }

    /// Commit the pending snapshot if its debounce window has passed
    pub fn poll_history(&mut self) -> bool {
        self.recorder.poll(Instant::now())
    }

    /// Commit the pending snapshot immediately
    pub fn commit_history(&mut self) -> bool {
        self.recorder.commit_now()
    }

    pub fn has_pending_history(&self) -> bool {
        self.recorder.is_pending()
    }

    pub fn can_undo(&self) -> bool {
        let history = self.recorder.history();
        if self.recorder.is_pending() {
            !history.is_empty()
        } else {
            history.can_undo()
        }
    }

    pub fn can_redo(&self) -> bool {
        !self.recorder.is_pending() && self.recorder.history().can_redo()
    }

    pub fn undo(&mut self) -> bool {
        self.recorder.commit_now();
        match self.recorder.history().undo() {
            Some(state) => {
                self.restore(&state);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        self.recorder.commit_now();
        match self.recorder.history().redo() {
            Some(state) => {
                self.restore(&state);
                true
            }
            None => false,
        }
    }

    fn restore(&mut self, state: &HistoryState) {
        let before = self.page_ids();
        self.interaction.cancel();
        self.catalog.restore_layout(&state.pages);
        for id in before {
            if !self.catalog.contains(id) {
                self.scheduler.forget_page(id);
            }
        }
        self.annotations = state.annotations.clone();
        self.drop_stale_selection();
        tracing::debug!(
            pages = state.pages.len(),
            objects = state.annotations.len(),
            "history state restored"
        );
    }

    // =========================================================================
    // Export
    // =========================================================================

    /// Compose the current pages and annotations into output bytes.
    ///
    /// The session is left untouched on failure so the export can be retried.
    pub fn export(&mut self) -> Result<Vec<u8>, ExportError> {
        self.recorder.commit_now();
        let document = self.document.ok_or(ExportError::NoDocument)?;
        let pages = self.catalog.pages();
        ExportCompositor::new(&*self.backend).export(document, &pages, &self.annotations)
    }
}

impl<B: Backend + 'static> Drop for Editor<B> {
    fn drop(&mut self) {
        self.stop_render_workers();
    }
}
