//! PDF Overlay Scheduler Library
//!
//! Lazy page rasterization: a FIFO render queue bounded by a maximum number
//! of concurrent renders, the worker pool that drains it, and the
//! visibility trigger that feeds it as pages scroll into view.
//!
//! # Example
//!
//! ```
//! use pdf_overlay_cache::{PageCatalog, RenderTarget};
//! use pdf_overlay_render::DocumentHandle;
//! use pdf_overlay_scheduler::{RenderConfig, RenderScheduler};
//!
//! let catalog = PageCatalog::new();
//! let pages = catalog.initialize(3);
//!
//! let scheduler = RenderScheduler::new(catalog.clone(), RenderConfig::default());
//! scheduler.set_document(DocumentHandle::from_raw(1));
//! scheduler.enqueue(pages[1].id, RenderTarget::Thumbnail);
//!
//! for ticket in scheduler.tick() {
//!     // ticket.render(&rasterizer) on a worker, then:
//!     // scheduler.complete(ticket, result);
//!     assert_eq!(ticket.page_id, pages[1].id);
//! }
//! ```

mod config;
mod queue;
mod scheduler;
mod visibility;
mod worker;

pub use config::{InvalidConfig, RenderConfig};
pub use queue::{RenderQueue, RenderRequest};
pub use scheduler::{RenderScheduler, RenderTicket, SchedulerStats};
pub use visibility::{PageSlot, Subscription, Viewport, VisibilityTrigger};
pub use worker::RenderPool;
