//! Scale-independent recording of a layer's paint commands.
//!
//! The pile is mutated on the scheduling thread only. Raster workers get a
//! [`PileSnapshot`], which shares the recorded regions through `Arc` and is
//! never affected by later invalidations or re-recordings.

mod playback;

use std::sync::Arc;

use raster_protocol::{IntRect, IntSize, Rgba};
use smallvec::SmallVec;

pub use playback::scale_rect_to_pixels;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PaintCommand {
    FillRect { rect: IntRect, color: Rgba },
    /// Outline drawn inside `rect`, `width` layer pixels thick.
    StrokeRect { rect: IntRect, color: Rgba, width: i32 },
}

impl PaintCommand {
    pub fn bounds(&self) -> IntRect {
        match *self {
            PaintCommand::FillRect { rect, .. } | PaintCommand::StrokeRect { rect, .. } => rect,
        }
    }
}

/// Produces paint commands for part of a layer. Implemented by whatever
/// owns the layer's content.
pub trait ContentPainter {
    fn paint(&self, rect: IntRect) -> Vec<PaintCommand>;
}

impl<F> ContentPainter for F
where
    F: Fn(IntRect) -> Vec<PaintCommand>,
{
    fn paint(&self, rect: IntRect) -> Vec<PaintCommand> {
        self(rect)
    }
}

/// Commands that apply to `rect` only. Commands may extend past the rect;
/// playback clips them.
#[derive(Debug)]
pub struct RecordedRegion {
    rect: IntRect,
    commands: Arc<[PaintCommand]>,
}

impl RecordedRegion {
    pub fn rect(&self) -> IntRect {
        self.rect
    }

    pub fn commands(&self) -> &[PaintCommand] {
        &self.commands
    }
}

#[derive(Debug, Clone, Default)]
pub struct PicturePile {
    bounds: IntSize,
    regions: Arc<Vec<Arc<RecordedRegion>>>,
    invalidation: Vec<IntRect>,
    generation: u64,
}

impl PicturePile {
    /// An empty pile whose whole bounds are waiting to be recorded.
    pub fn new(bounds: IntSize) -> Self {
        let mut pile = Self::default();
        pile.set_bounds(bounds);
        pile
    }

    pub fn bounds(&self) -> IntSize {
        self.bounds
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn invalidation(&self) -> &[IntRect] {
        &self.invalidation
    }

    pub fn has_invalidation(&self) -> bool {
        !self.invalidation.is_empty()
    }

    /// Resizes the layer content. Recorded regions are clipped and the newly
    /// exposed area is queued for recording.
    pub fn set_bounds(&mut self, bounds: IntSize) {
        if bounds == self.bounds {
            return;
        }
        let old_rect = IntRect::from_size(self.bounds);
        let new_rect = IntRect::from_size(bounds);

        let clipped: Vec<Arc<RecordedRegion>> = self
            .regions
            .iter()
            .filter_map(|region| {
                let rect = region.rect.intersection(&new_rect)?;
                if rect == region.rect {
                    return Some(Arc::clone(region));
                }
                Some(Arc::new(RecordedRegion {
                    rect,
                    commands: Arc::clone(&region.commands),
                }))
            })
            .collect();
        self.regions = Arc::new(clipped);

        self.invalidation = self
            .invalidation
            .iter()
            .filter_map(|rect| rect.intersection(&new_rect))
            .collect();
        self.invalidation.extend(new_rect.subtract(&old_rect));

        self.bounds = bounds;
        self.generation += 1;
    }

    /// Marks `rect` stale. It stays queued until re-recorded.
    pub fn invalidate(&mut self, rect: IntRect) {
        let Some(rect) = rect.intersection(&IntRect::from_size(self.bounds)) else {
            return;
        };
        if self.invalidation.iter().any(|queued| queued.contains_rect(&rect)) {
            return;
        }
        self.invalidation.retain(|queued| !rect.contains_rect(queued));
        self.invalidation.push(rect);
    }

    /// True if any queued invalidation touches `rect`.
    pub fn is_stale(&self, rect: &IntRect) -> bool {
        self.invalidation.iter().any(|queued| queued.intersects(rect))
    }

    /// Re-records `rect`, replacing whatever was recorded there before.
    pub fn update_recording(&mut self, rect: IntRect, painter: &dyn ContentPainter) {
        let Some(rect) = rect.intersection(&IntRect::from_size(self.bounds)) else {
            return;
        };
        let commands: Arc<[PaintCommand]> = painter
            .paint(rect)
            .into_iter()
            .filter(|command| command.bounds().intersects(&rect))
            .collect();

        // Workers holding a snapshot keep the old vector alive; this clones
        // it only when one is outstanding.
        let regions = Arc::make_mut(&mut self.regions);
        let mut kept = Vec::with_capacity(regions.len() + 1);
        for region in regions.drain(..) {
            if !region.rect.intersects(&rect) {
                kept.push(region);
                continue;
            }
            for piece in region.rect.subtract(&rect) {
                kept.push(Arc::new(RecordedRegion {
                    rect: piece,
                    commands: Arc::clone(&region.commands),
                }));
            }
        }
        kept.push(Arc::new(RecordedRegion { rect, commands }));
        *regions = kept;

        let mut remaining = Vec::with_capacity(self.invalidation.len());
        for queued in self.invalidation.drain(..) {
            remaining.extend(queued.subtract(&rect));
        }
        self.invalidation = remaining;
        self.generation += 1;

        tracing::trace!(
            ?rect,
            regions = self.regions.len(),
            generation = self.generation,
            "picture pile re-recorded"
        );
    }

    /// Records every queued invalidation and returns the rects recorded.
    pub fn record_invalidation(&mut self, painter: &dyn ContentPainter) -> Vec<IntRect> {
        let queued = std::mem::take(&mut self.invalidation);
        for rect in &queued {
            self.update_recording(*rect, painter);
        }
        queued
    }

    /// True when recorded regions fully cover `rect` (clipped to bounds).
    pub fn is_rect_recorded(&self, rect: &IntRect) -> bool {
        let Some(rect) = rect.intersection(&IntRect::from_size(self.bounds)) else {
            return true;
        };
        let mut uncovered: SmallVec<[IntRect; 8]> = SmallVec::new();
        uncovered.push(rect);
        for region in self.regions.iter() {
            let mut next = SmallVec::new();
            for piece in uncovered.drain(..) {
                next.extend(piece.subtract(&region.rect));
            }
            uncovered = next;
            if uncovered.is_empty() {
                return true;
            }
        }
        uncovered.is_empty()
    }

    pub fn snapshot(&self) -> PileSnapshot {
        PileSnapshot {
            bounds: self.bounds,
            regions: Arc::clone(&self.regions),
            generation: self.generation,
        }
    }
}

static_assertions::assert_impl_all!(PileSnapshot: Send, Sync);

/// Frozen view of a pile. Cheap to clone and safe to send to workers.
#[derive(Debug, Clone)]
pub struct PileSnapshot {
    bounds: IntSize,
    regions: Arc<Vec<Arc<RecordedRegion>>>,
    generation: u64,
}

impl PileSnapshot {
    pub fn bounds(&self) -> IntSize {
        self.bounds
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn regions(&self) -> impl Iterator<Item = &RecordedRegion> + '_ {
        self.regions.iter().map(|region| region.as_ref())
    }
}

#[cfg(test)]
mod tests;
