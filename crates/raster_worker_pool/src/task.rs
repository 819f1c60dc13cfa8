use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use picture_pile::PileSnapshot;
use raster_protocol::{Bitmap, IntRect, RasterTaskId, TileId};

/// Shared flag a task checks before and after playback. Setting it on a
/// running task is advisory: the task may still complete normally.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Everything a worker needs to turn one tile into pixels. The snapshot is
/// frozen, so later recordings on the scheduling thread never leak in.
#[derive(Debug, Clone)]
pub struct RasterTask {
    pub id: RasterTaskId,
    pub tile: TileId,
    pub snapshot: PileSnapshot,
    pub content_rect: IntRect,
    pub contents_scale: f32,
    pub source_generation: u64,
    pub cancel: CancellationToken,
}

static_assertions::assert_impl_all!(RasterTask: Send, Sync);

#[derive(Debug)]
pub enum RasterOutcome {
    Completed { bitmap: Bitmap, duration: Duration },
    Cancelled,
}

#[derive(Debug)]
pub struct RasterCompletion {
    pub task_id: RasterTaskId,
    pub tile: TileId,
    pub source_generation: u64,
    pub outcome: RasterOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Removed from the queue; no completion will arrive.
    CancelledBeforeStart,
    /// Flag set; a completion (possibly `Cancelled`) will still arrive.
    AlreadyRunning,
    Unknown,
}

impl RasterTask {
    pub(crate) fn execute(self) -> RasterCompletion {
        let outcome = if self.cancel.is_cancelled() {
            RasterOutcome::Cancelled
        } else {
            let started = Instant::now();
            let bitmap = self
                .snapshot
                .playback_to_bitmap(self.content_rect, self.contents_scale);
            if self.cancel.is_cancelled() {
                RasterOutcome::Cancelled
            } else {
                RasterOutcome::Completed {
                    bitmap,
                    duration: started.elapsed(),
                }
            }
        };
        RasterCompletion {
            task_id: self.id,
            tile: self.tile,
            source_generation: self.source_generation,
            outcome,
        }
    }
}
