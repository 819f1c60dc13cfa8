use picture_pile::{ContentPainter, PicturePile, PileSnapshot};
use raster_protocol::{IntRect, IntSize, LayerId, WhichTree};

use crate::tile::{ReleasedResource, TileActivation};
use crate::tiling::PriorityRects;
use crate::tiling_set::{TileDrawQuad, TilingSet, TilingSetSettings, TilingUpdate, Viewport};

/// Geometry one tree sees for a layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerTreeState {
    pub bounds: IntSize,
    pub ideal_scale: f32,
    pub viewport: Viewport,
}

/// What a commit changed for one layer.
#[derive(Debug, Default)]
pub struct LayerCommit {
    pub tilings: TilingUpdate,
    pub recorded: Vec<IntRect>,
    pub invalidated_tiles: usize,
}

/// A layer's content source and tiles, plus the state each tree last saw.
/// The scheduling thread owns it.
pub struct PictureLayer {
    id: LayerId,
    painter: Box<dyn ContentPainter + Send>,
    pile: PicturePile,
    tiling_set: TilingSet,
    pending: LayerTreeState,
    active: Option<LayerTreeState>,
}

impl std::fmt::Debug for PictureLayer {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("PictureLayer")
            .field("id", &self.id)
            .field("pile", &self.pile)
            .field("tiling_set", &self.tiling_set)
            .field("pending", &self.pending)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl PictureLayer {
    pub fn new(
        id: LayerId,
        bounds: IntSize,
        painter: Box<dyn ContentPainter + Send>,
        settings: TilingSetSettings,
    ) -> Self {
        Self {
            id,
            painter,
            pile: PicturePile::new(bounds),
            tiling_set: TilingSet::new(id, settings),
            pending: LayerTreeState {
                bounds,
                ideal_scale: 1.0,
                viewport: Viewport::new(IntRect::from_size(bounds)),
            },
            active: None,
        }
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn pile(&self) -> &PicturePile {
        &self.pile
    }

    pub fn tiling_set(&self) -> &TilingSet {
        &self.tiling_set
    }

    pub fn tiling_set_mut(&mut self) -> &mut TilingSet {
        &mut self.tiling_set
    }

    pub fn pending_state(&self) -> &LayerTreeState {
        &self.pending
    }

    pub fn active_state(&self) -> Option<&LayerTreeState> {
        self.active.as_ref()
    }

    pub fn snapshot(&self) -> PileSnapshot {
        self.pile.snapshot()
    }

    pub fn set_bounds(&mut self, bounds: IntSize) {
        self.pending.bounds = bounds;
        self.pile.set_bounds(bounds);
    }

    pub fn set_ideal_contents_scale(&mut self, ideal_scale: f32) {
        assert!(
            ideal_scale.is_finite() && ideal_scale > 0.0,
            "ideal contents scale must be positive and finite, got {ideal_scale}"
        );
        self.pending.ideal_scale = ideal_scale;
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.pending.viewport = viewport;
    }

    pub fn invalidate(&mut self, layer_rect: IntRect) {
        self.pile.invalidate(layer_rect);
    }

    /// Re-records invalidated content and brings the tilings up to date
    /// with the pending state. Stale resources come back in `released`.
    pub fn commit(&mut self) -> LayerCommit {
        let mut commit = LayerCommit {
            recorded: self.pile.record_invalidation(self.painter.as_ref()),
            ..LayerCommit::default()
        };
        let mut released = Vec::new();
        for rect in &commit.recorded {
            released.extend(self.tiling_set.invalidate(rect));
        }
        commit.invalidated_tiles = self.tiling_set.take_invalidated_count();

        let pending = self.pending;
        commit.tilings = self.tiling_set.update_tilings_to_current_state(
            pending.bounds,
            pending.ideal_scale,
            &pending.viewport,
        );
        commit.tilings.released.extend(released);
        commit
    }

    pub fn priority_rects(&self, tree: WhichTree) -> Option<PriorityRects> {
        let state = match tree {
            WhichTree::Active => self.active.as_ref()?,
            WhichTree::Pending => &self.pending,
        };
        Some(
            self.tiling_set
                .settings()
                .priority_rects(&state.viewport, state.ideal_scale, state.bounds),
        )
    }

    pub fn update_tile_priorities(&mut self) -> Vec<ReleasedResource> {
        let active = self.priority_rects(WhichTree::Active);
        let pending = self.priority_rects(WhichTree::Pending);
        self.tiling_set
            .update_tile_priorities(active.as_ref(), pending.as_ref())
    }

    /// Pending state becomes active.
    pub fn activate(&mut self) -> Vec<TileActivation> {
        self.active = Some(self.pending);
        self.tiling_set.activate()
    }

    pub fn tiles_for_region(&self, layer_rect: IntRect, tree: WhichTree) -> Vec<TileDrawQuad> {
        let ideal_scale = match tree {
            WhichTree::Active => match &self.active {
                Some(state) => state.ideal_scale,
                None => return Vec::new(),
            },
            WhichTree::Pending => self.pending.ideal_scale,
        };
        self.tiling_set
            .tiles_for_region(layer_rect, tree, ideal_scale)
    }

    pub fn release_all(&mut self) -> Vec<ReleasedResource> {
        self.tiling_set.release_all()
    }
}
