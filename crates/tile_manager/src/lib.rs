//! Frame-level raster scheduling across every layer.
//!
//! Each frame [`TileManager::prepare_tiles`] collects tiles from all
//! layers, orders them by priority, grants memory under the global budget
//! and dispatches raster work. [`TileManager::check_for_completed_tasks`]
//! installs finished rasters on the scheduling thread. Raster failures stay
//! inside this crate: they show up in [`RasterStats`] and logs, and the
//! affected tile simply stays unrasterized.

mod manager;
mod ordering;
mod stats;

pub use manager::{PrepareTilesReport, TileManager};
pub use ordering::MemoryLimitPolicy;
pub use stats::{MemoryStats, RasterStats, TaskLog, TaskLogEntry};

use raster_protocol::{ResourceFormat, TreePriority};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileManagerSettings {
    pub format: ResourceFormat,
    pub memory_limit_bytes: u64,
    pub memory_limit_policy: MemoryLimitPolicy,
    pub tree_priority: TreePriority,
    pub task_log_capacity: usize,
    /// Tiles whose recording reduces to one color skip raster and hold no
    /// memory.
    pub solid_color_analysis: bool,
}

impl Default for TileManagerSettings {
    fn default() -> Self {
        Self {
            format: ResourceFormat::Rgba8,
            memory_limit_bytes: 64 * 1024 * 1024,
            memory_limit_policy: MemoryLimitPolicy::AllowAnything,
            tree_priority: TreePriority::SamePriorityForBothTrees,
            task_log_capacity: 1024,
            solid_color_analysis: true,
        }
    }
}

/// The part of the settings that can change between frames. Applied on the
/// next [`TileManager::prepare_tiles`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalTileState {
    pub memory_limit_bytes: u64,
    pub memory_limit_policy: MemoryLimitPolicy,
    pub tree_priority: TreePriority,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RasterError {
    #[error("tile memory refused: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: u64, available: u64 },
    #[error("raster task cancelled")]
    RasterCancelled,
    #[error("raster backend failure: {0}")]
    DriverFailure(String),
    #[error("raster of content generation {rastered} superseded by generation {current}")]
    StaleContent { rastered: u64, current: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileManagerEvent {
    /// Every tile required for activation has pending content.
    ReadyToActivate,
    /// No raster task is queued or running.
    AllTileTasksCompleted,
}
