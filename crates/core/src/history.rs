//! Linear undo/redo history
//!
//! [`History`] is a shared list of immutable snapshots plus a cursor.
//! [`HistoryRecorder`] sits in front of it and coalesces bursts of
//! mutations (a drag, repeated property edits) into a single entry: every
//! mutation replaces the pending commit, which lands once the debounce
//! window passes without another mutation, when flushed explicitly, or
//! when the recorder is dropped.

use crate::annotation::AnnotationStore;
use pdf_overlay_cache::PageInfo;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Snapshot of the page layout and every annotation
#[derive(Debug, Clone, Default)]
pub struct HistoryState {
    pub pages: Vec<PageInfo>,
    pub annotations: AnnotationStore,
}

impl HistoryState {
    pub fn new(pages: Vec<PageInfo>, annotations: AnnotationStore) -> Self {
        Self { pages, annotations }
    }
}

#[derive(Debug, Default)]
struct HistoryInner {
    entries: Vec<Arc<HistoryState>>,
    index: usize,
}

/// Shared handle to the snapshot list
#[derive(Debug, Clone, Default)]
pub struct History {
    inner: Arc<Mutex<HistoryInner>>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HistoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a snapshot after the cursor, dropping any redo branch
    pub fn save(&self, state: HistoryState) {
        let mut inner = self.lock();
        if !inner.entries.is_empty() {
            let keep = inner.index + 1;
            inner.entries.truncate(keep);
        }
        inner.entries.push(Arc::new(state));
        inner.index = inner.entries.len() - 1;
    }

    /// Drop every entry and start over from `state`
    pub fn reset(&self, state: HistoryState) {
        let mut inner = self.lock();
        inner.entries = vec![Arc::new(state)];
        inner.index = 0;
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.index = 0;
    }

    /// Step back one entry, returning the state to restore
    pub fn undo(&self) -> Option<Arc<HistoryState>> {
        let mut inner = self.lock();
        if inner.index == 0 || inner.entries.is_empty() {
            return None;
        }
        inner.index -= 1;
        Some(inner.entries[inner.index].clone())
    }

    /// Step forward one entry, returning the state to restore
    pub fn redo(&self) -> Option<Arc<HistoryState>> {
        let mut inner = self.lock();
        if inner.index + 1 >= inner.entries.len() {
            return None;
        }
        inner.index += 1;
        Some(inner.entries[inner.index].clone())
    }

    pub fn current(&self) -> Option<Arc<HistoryState>> {
        let inner = self.lock();
        inner.entries.get(inner.index).cloned()
    }

    pub fn can_undo(&self) -> bool {
        let inner = self.lock();
        inner.index > 0 && !inner.entries.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        let inner = self.lock();
        inner.index + 1 < inner.entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn index(&self) -> usize {
        self.lock().index
    }
}

#[derive(Debug)]
struct PendingCommit {
    token: u64,
    state: HistoryState,
    due: Instant,
}

/// Debounced writer in front of a [`History`]
#[derive(Debug)]
pub struct HistoryRecorder {
    history: History,
    debounce: Duration,
    next_token: u64,
    pending: Option<PendingCommit>,
}

impl HistoryRecorder {
    /// A zero `debounce` is raised to one millisecond.
    pub fn new(history: History, debounce: Duration) -> Self {
        Self {
            history,
            debounce: debounce.max(Duration::from_millis(1)),
            next_token: 1,
            pending: None,
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Replace the pending commit with `state`, due one window after `now`.
    /// A pending commit whose window already elapsed is committed first.
    ///
    /// Returns the token identifying the new pending commit.
    pub fn schedule(&mut self, state: HistoryState, now: Instant) -> u64 {
        self.poll(now);
        let token = self.next_token;
        self.next_token += 1;
        if let Some(previous) = self.pending.replace(PendingCommit {
            token,
            state,
            due: now + self.debounce,
        }) {
            tracing::trace!(superseded = previous.token, token, "history commit rescheduled");
        }
        token
    }

    pub fn pending_token(&self) -> Option<u64> {
        self.pending.as_ref().map(|p| p.token)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Commit the pending state if its window has elapsed
    pub fn poll(&mut self, now: Instant) -> bool {
        match &self.pending {
            Some(pending) if now >= pending.due => self.commit_now(),
            _ => false,
        }
    }

    /// Commit the pending state immediately, if any
    pub fn commit_now(&mut self) -> bool {
        let Some(pending) = self.pending.take() else {
            return false;
        };
        tracing::debug!(token = pending.token, "history committed");
        self.history.save(pending.state);
        true
    }

    /// Forget the pending state without committing it
    pub fn discard(&mut self) {
        self.pending = None;
    }
}

impl Drop for HistoryRecorder {
    fn drop(&mut self) {
        self.commit_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{EditableObject, Rect, TextObject};
    use pdf_overlay_render::Color;

    fn state_with(objects: usize) -> HistoryState {
        let mut annotations = AnnotationStore::new();
        for i in 0..objects {
            annotations
                .add(EditableObject::text(
                    1,
                    Rect::new(i as f32, 0.0, 10.0, 10.0),
                    TextObject {
                        text: format!("t{i}"),
                        font_size: 12.0,
                        color: Color::BLACK,
                    },
                ))
                .unwrap();
        }
        HistoryState::new(Vec::new(), annotations)
    }

    fn count(state: &HistoryState) -> usize {
        state.annotations.len()
    }

    #[test]
    fn test_undo_redo_bounds() {
        let history = History::new();
        assert!(!history.can_undo());
        assert!(history.undo().is_none());

        history.save(state_with(0));
        assert!(!history.can_undo());
        assert!(!history.can_redo());

        history.save(state_with(1));
        history.save(state_with(2));
        assert_eq!(history.len(), 3);

        assert_eq!(count(&history.undo().unwrap()), 1);
        assert_eq!(count(&history.undo().unwrap()), 0);
        assert!(history.undo().is_none());
        assert_eq!(history.index(), 0);

        assert_eq!(count(&history.redo().unwrap()), 1);
        assert_eq!(count(&history.redo().unwrap()), 2);
        assert!(history.redo().is_none());
        assert!(!history.can_redo());
    }

    #[test]
    fn test_save_truncates_redo_branch() {
        let history = History::new();
        history.save(state_with(0));
        history.save(state_with(1));
        history.save(state_with(2));
        history.undo();
        history.undo();

        history.save(state_with(5));
        assert_eq!(history.len(), 2);
        assert!(!history.can_redo());
        assert_eq!(count(&history.current().unwrap()), 5);
        assert_eq!(count(&history.undo().unwrap()), 0);
    }

    #[test]
    fn test_undo_then_redo_restores_state() {
        let history = History::new();
        history.save(state_with(0));
        history.save(state_with(3));

        let before = history.current().unwrap();
        history.undo();
        let after = history.redo().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_recorder_coalesces_burst() {
        let history = History::new();
        let mut recorder = HistoryRecorder::new(history.clone(), Duration::from_millis(100));
        let start = Instant::now();

        let first = recorder.schedule(state_with(1), start);
        let second = recorder.schedule(state_with(2), start + Duration::from_millis(50));
        assert!(second > first);
        assert_eq!(recorder.pending_token(), Some(second));

        // First window would have ended here, but it was replaced
        assert!(!recorder.poll(start + Duration::from_millis(120)));
        assert!(recorder.poll(start + Duration::from_millis(150)));

        assert_eq!(history.len(), 1);
        assert_eq!(count(&history.current().unwrap()), 2);
        assert!(!recorder.is_pending());
    }

    #[test]
    fn test_recorder_keeps_spaced_mutations_apart() {
        let history = History::new();
        let mut recorder = HistoryRecorder::new(history.clone(), Duration::from_millis(100));
        let start = Instant::now();

        recorder.schedule(state_with(1), start);
        recorder.schedule(state_with(2), start + Duration::from_millis(500));
        recorder.commit_now();

        assert_eq!(history.len(), 2);
        assert_eq!(count(&history.undo().unwrap()), 1);
    }

    #[test]
    fn test_commit_now_flushes() {
        let history = History::new();
        let mut recorder = HistoryRecorder::new(history.clone(), Duration::from_secs(60));

        assert!(!recorder.commit_now());
        recorder.schedule(state_with(1), Instant::now());
        assert!(recorder.commit_now());
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_drop_flushes_pending() {
        let history = History::new();
        {
            let mut recorder = HistoryRecorder::new(history.clone(), Duration::from_secs(60));
            recorder.schedule(state_with(4), Instant::now());
        }
        assert_eq!(count(&history.current().unwrap()), 4);
    }

    #[test]
    fn test_discard_and_zero_window() {
        let history = History::new();
        let mut recorder = HistoryRecorder::new(history.clone(), Duration::ZERO);
        assert_eq!(recorder.debounce(), Duration::from_millis(1));

        recorder.schedule(state_with(1), Instant::now());
        recorder.discard();
        drop(recorder);
        assert!(history.is_empty());
    }
}
