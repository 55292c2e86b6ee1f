//! Render worker pool
//!
//! A fixed set of named threads that pull tickets from the
//! [`RenderScheduler`], rasterize them and report back. One thread per
//! allowed concurrent render, so the pool never exceeds the scheduler's
//! bound even before the scheduler enforces it.

use crate::scheduler::{RenderScheduler, RenderTicket};
use pdf_overlay_render::{Rasterizer, RenderError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Pool of render worker threads
pub struct RenderPool {
    scheduler: RenderScheduler,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl RenderPool {
    /// Spawn `max_concurrent_renders` workers for `scheduler`.
    pub fn new(
        scheduler: RenderScheduler,
        rasterizer: Arc<dyn Rasterizer>,
    ) -> std::io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let count = scheduler.config().max_concurrent_renders;
        let poll_interval = scheduler.config().poll_interval;

        let mut pool = Self {
            scheduler: scheduler.clone(),
            workers: Vec::with_capacity(count),
            shutdown: shutdown.clone(),
        };
        for id in 0..count {
            let scheduler = scheduler.clone();
            let rasterizer = rasterizer.clone();
            let shutdown = shutdown.clone();
            let handle = thread::Builder::new()
                .name(format!("pdf-render-worker-{}", id))
                .spawn(move || run(scheduler, rasterizer, shutdown, poll_interval))?;
            pool.workers.push(handle);
        }

        tracing::debug!(workers = count, "render pool started");
        Ok(pool)
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn scheduler(&self) -> &RenderScheduler {
        &self.scheduler
    }

    /// Block until the scheduler has no queued or in-flight work.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.scheduler.is_idle() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Stop all workers and wait for their current render to finish
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("render worker panicked");
            }
        }
    }
}

impl Drop for RenderPool {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Main worker loop
fn run(
    scheduler: RenderScheduler,
    rasterizer: Arc<dyn Rasterizer>,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    while !shutdown.load(Ordering::Acquire) {
        match scheduler.next_ticket() {
            Some(ticket) => {
                let result = render_guarded(&ticket, rasterizer.as_ref());
                scheduler.complete(ticket, result);
            }
            None => thread::sleep(poll_interval),
        }
    }
}

/// A panicking rasterizer must not leave the ticket in flight forever
fn render_guarded(
    ticket: &RenderTicket,
    rasterizer: &dyn Rasterizer,
) -> Result<pdf_overlay_render::RenderedPage, RenderError> {
    panic::catch_unwind(AssertUnwindSafe(|| ticket.render(rasterizer)))
        .unwrap_or_else(|_| Err(RenderError::Backend("rasterizer panicked".to_string())))
}
