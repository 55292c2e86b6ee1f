//! PDF Overlay Cache Library
//!
//! Page catalog holding per-page metadata and the rendered rasters.

pub mod catalog;

pub use catalog::{
    CatalogError, PageCatalog, PageId, PageInfo, PageUpdate, RasterSlot, RenderTarget,
};
