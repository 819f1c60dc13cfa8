//! Pixel storage for rasterized tiles.
//!
//! [`ResourceProvider`] owns every backing store in a slot map and hands
//! out [`ResourceId`]s. Memory is accounted against a [`MemoryBudget`] that
//! the caller owns. Storage comes from a [`RasterBackend`]: software always,
//! and a `wgpu` backend with the `gpu` feature.
//!
//! [`ResourceId`]: raster_protocol::ResourceId

mod backend;
mod budget;
#[cfg(feature = "gpu")]
mod gpu;
mod provider;

pub use backend::{BackendError, BackingStore, RasterBackend, SoftwareBackend, swap_red_blue};
pub use budget::MemoryBudget;
#[cfg(feature = "gpu")]
pub use gpu::GpuRasterBackend;
pub use provider::{BackendChoice, ResourceInfo, ResourceProvider, ResourceRef};

use raster_protocol::IntSize;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: u64, available: u64 },
    #[error("unknown resource")]
    UnknownResource,
    #[error("raster backend failure: {0}")]
    DriverFailure(String),
    #[error("bitmap is {actual:?}, resource is {expected:?}")]
    SizeMismatch { expected: IntSize, actual: IntSize },
}
