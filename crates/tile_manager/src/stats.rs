use std::collections::VecDeque;
use std::time::Duration;

use raster_protocol::{RasterTaskId, TileId};

use crate::RasterError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RasterStats {
    pub tasks_scheduled: u64,
    pub tasks_completed: u64,
    pub tasks_cancelled: u64,
    pub stale_discards: u64,
    pub driver_failures: u64,
    pub oom_deferrals: u64,
    /// Tiles that needed raster but fell past the budget cutoff, summed
    /// over every pass.
    pub memory_denied: u64,
    pub tiles_evicted: u64,
    /// Tiles satisfied by a solid color instead of a raster.
    pub solid_color_tiles: u64,
    pub raster_time: Duration,
}

impl RasterStats {
    pub(crate) fn record_error(&mut self, error: &RasterError) {
        match error {
            RasterError::OutOfMemory { .. } => self.oom_deferrals += 1,
            RasterError::RasterCancelled => self.tasks_cancelled += 1,
            RasterError::DriverFailure(_) => self.driver_failures += 1,
            RasterError::StaleContent { .. } => self.stale_discards += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    pub limit_bytes: u64,
    pub used_bytes: u64,
    pub resource_count: usize,
    pub tasks_in_flight: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskLogEntry {
    Submitted { task: RasterTaskId, tile: TileId },
    Finished { task: RasterTaskId, tile: TileId },
}

impl TaskLogEntry {
    pub fn tile(&self) -> TileId {
        match self {
            TaskLogEntry::Submitted { tile, .. } | TaskLogEntry::Finished { tile, .. } => *tile,
        }
    }
}

/// Most recent task submissions and completions, oldest first.
#[derive(Debug, Clone)]
pub struct TaskLog {
    capacity: usize,
    entries: VecDeque<TaskLogEntry>,
}

impl TaskLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(4096)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &TaskLogEntry> + '_ {
        self.entries.iter()
    }

    pub(crate) fn push(&mut self, entry: TaskLogEntry) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }
}
