use std::time::Duration;

use raster_protocol::{
    IntRect, IntSize, LayerId, ScaleKey, TileId, TileResolution, Vector2, WhichTree,
};

use crate::tile::{ReleasedResource, Tile, TileActivation, TileContent};
use crate::tiling::{PriorityRects, Tiling};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TilingSetSettings {
    pub tile_size: IntSize,
    pub soon_margin_px: i32,
    pub eventually_margin_px: i32,
    pub skewport_target_time: Duration,
    pub skewport_extrapolation_limit_px: f32,
    pub low_res_contents_scale_factor: f32,
    pub enable_low_res_tiling: bool,
    pub minimum_contents_scale: f32,
    pub max_non_ideal_tilings: usize,
    /// Upper bound on the tiles a layer keeps around its viewport, counted
    /// at the ideal scale.
    pub max_tiles_for_interest_area: usize,
}

impl Default for TilingSetSettings {
    fn default() -> Self {
        Self {
            tile_size: IntSize::new(256, 256),
            soon_margin_px: 256,
            eventually_margin_px: 1024,
            skewport_target_time: Duration::from_millis(1000),
            skewport_extrapolation_limit_px: 2000.0,
            low_res_contents_scale_factor: 0.25,
            enable_low_res_tiling: true,
            minimum_contents_scale: 0.0625,
            max_non_ideal_tilings: 1,
            max_tiles_for_interest_area: 128,
        }
    }
}

/// Visible part of a layer plus the direction it is moving in, both in
/// layer space. Velocity is pixels per second.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub visible_rect: IntRect,
    pub scroll_velocity: Vector2,
}

impl Viewport {
    pub fn new(visible_rect: IntRect) -> Self {
        Self {
            visible_rect,
            scroll_velocity: Vector2::ZERO,
        }
    }
}

impl TilingSetSettings {
    /// Visible rect translated along the scroll direction, far enough to
    /// cover `skewport_target_time` of motion.
    pub fn skewport(&self, viewport: &Viewport) -> IntRect {
        let skew = viewport
            .scroll_velocity
            .scale(self.skewport_target_time.as_secs_f32())
            .clamp_length(self.skewport_extrapolation_limit_px);
        viewport
            .visible_rect
            .offset(skew.x.round() as i32, skew.y.round() as i32)
    }

    /// Priority rects for one tree. The eventually rect is shrunk around the
    /// visible rect until its part inside `layer_bounds` holds no more than
    /// `max_tiles_for_interest_area` tiles; soon is clipped to it.
    pub fn priority_rects(
        &self,
        viewport: &Viewport,
        ideal_scale: f32,
        layer_bounds: IntSize,
    ) -> PriorityRects {
        let visible = viewport.visible_rect;
        let soon = visible
            .outset(self.soon_margin_px)
            .union(&self.skewport(viewport));
        let eventually = visible.outset(self.eventually_margin_px).union(&soon);

        let max_area = self.interest_area_limit(ideal_scale);
        let bounds = IntRect::from_size(layer_bounds);
        if clipped_area(&eventually, &bounds) <= max_area {
            return PriorityRects {
                visible,
                soon,
                eventually,
                ideal_scale,
            };
        }

        let mut fits = 0;
        let mut too_big = self.eventually_margin_px;
        while too_big - fits > 1 {
            let margin = fits + (too_big - fits) / 2;
            if clipped_area(&visible.outset(margin), &bounds) <= max_area {
                fits = margin;
            } else {
                too_big = margin;
            }
        }
        let eventually = visible.outset(fits);
        tracing::trace!(
            margin = fits,
            max_tiles = self.max_tiles_for_interest_area,
            "interest area capped"
        );
        PriorityRects {
            visible,
            soon: soon.intersection(&eventually).unwrap_or(visible),
            eventually,
            ideal_scale,
        }
    }

    /// Layer-space area covered by `max_tiles_for_interest_area` tiles.
    fn interest_area_limit(&self, ideal_scale: f32) -> u64 {
        let tile_area = self.tile_size.area() as f64 / f64::from(ideal_scale * ideal_scale);
        (tile_area * self.max_tiles_for_interest_area as f64) as u64
    }

    fn low_res_scale(&self, ideal_scale: f32) -> Option<f32> {
        if !self.enable_low_res_tiling {
            return None;
        }
        let low = ideal_scale * self.low_res_contents_scale_factor;
        if !(low.is_finite() && low > 0.0) || low < self.minimum_contents_scale {
            return None;
        }
        if ScaleKey::from_scale(low) == ScaleKey::from_scale(ideal_scale) {
            return None;
        }
        Some(low)
    }
}

fn clipped_area(rect: &IntRect, bounds: &IntRect) -> u64 {
    rect.intersection(bounds).map_or(0, |clipped| clipped.area())
}

/// Churn produced by a tiling update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TilingUpdate {
    pub tilings_created: usize,
    pub tilings_destroyed: usize,
    pub tiles_created: usize,
    pub released: Vec<ReleasedResource>,
}

impl TilingUpdate {
    pub fn is_noop(&self) -> bool {
        self.tilings_created == 0
            && self.tilings_destroyed == 0
            && self.tiles_created == 0
            && self.released.is_empty()
    }
}

/// Region of the layer and where to get its pixels from. `source` is
/// `None` for checkerboard.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileDrawQuad {
    pub layer_rect: IntRect,
    pub source: Option<QuadSource>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadSource {
    pub tile: TileId,
    pub content: TileContent,
    pub resolution: TileResolution,
    pub contents_scale: f32,
    /// The tile's rect in its tiling's content space.
    pub tile_content_rect: IntRect,
}

#[derive(Debug)]
pub struct TilingSet {
    layer: LayerId,
    settings: TilingSetSettings,
    layer_bounds: IntSize,
    ideal_scale: Option<f32>,
    // Sorted by contents scale, highest first.
    tilings: Vec<Tiling>,
}

impl TilingSet {
    pub fn new(layer: LayerId, settings: TilingSetSettings) -> Self {
        Self {
            layer,
            settings,
            layer_bounds: IntSize::default(),
            ideal_scale: None,
            tilings: Vec::new(),
        }
    }

    pub fn layer(&self) -> LayerId {
        self.layer
    }

    pub fn settings(&self) -> &TilingSetSettings {
        &self.settings
    }

    pub fn layer_bounds(&self) -> IntSize {
        self.layer_bounds
    }

    pub fn ideal_scale(&self) -> Option<f32> {
        self.ideal_scale
    }

    pub fn tilings(&self) -> &[Tiling] {
        &self.tilings
    }

    pub fn tilings_mut(&mut self) -> &mut [Tiling] {
        &mut self.tilings
    }

    pub fn tiling(&self, resolution: TileResolution) -> Option<&Tiling> {
        self.tilings
            .iter()
            .find(|tiling| tiling.resolution() == resolution)
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile> + '_ {
        self.tilings.iter().flat_map(Tiling::tiles)
    }

    pub fn tiles_mut(&mut self) -> impl Iterator<Item = &mut Tile> + '_ {
        self.tilings.iter_mut().flat_map(Tiling::tiles_mut)
    }

    pub fn tile_count(&self) -> usize {
        self.tilings.iter().map(Tiling::tile_count).sum()
    }

    pub fn tile(&self, id: TileId) -> Option<&Tile> {
        self.tilings
            .iter()
            .find(|tiling| tiling.scale_key() == id.scale_key)?
            .tile(id.col, id.row)
    }

    pub fn tile_mut(&mut self, id: TileId) -> Option<&mut Tile> {
        self.tilings
            .iter_mut()
            .find(|tiling| tiling.scale_key() == id.scale_key)?
            .tile_mut(id.col, id.row)
    }

    /// Brings the tilings in line with the layer's geometry: one high-res
    /// tiling at `ideal_scale`, an optional low-res one, and non-ideal
    /// leftovers while they still hold pixels. Calling it again with the
    /// same arguments changes nothing.
    pub fn update_tilings_to_current_state(
        &mut self,
        layer_bounds: IntSize,
        ideal_scale: f32,
        viewport: &Viewport,
    ) -> TilingUpdate {
        assert!(
            ideal_scale.is_finite() && ideal_scale > 0.0,
            "ideal contents scale must be positive and finite, got {ideal_scale}"
        );
        let mut update = TilingUpdate::default();

        if layer_bounds != self.layer_bounds {
            update.tilings_destroyed += self.tilings.len();
            for mut tiling in self.tilings.drain(..) {
                tiling.take_all_resources(&mut update.released);
            }
            self.layer_bounds = layer_bounds;
        }
        self.ideal_scale = Some(ideal_scale);
        if layer_bounds.is_empty() {
            return update;
        }

        let ideal_key = ScaleKey::from_scale(ideal_scale);
        let low_scale = self.settings.low_res_scale(ideal_scale);
        let low_key = low_scale.map(ScaleKey::from_scale);
        for tiling in &mut self.tilings {
            let resolution = if tiling.scale_key() == ideal_key {
                TileResolution::High
            } else if Some(tiling.scale_key()) == low_key {
                TileResolution::Low
            } else {
                TileResolution::NonIdeal
            };
            tiling.set_resolution(resolution);
        }

        if self.tiling(TileResolution::High).is_none() {
            self.add_tiling(ideal_scale, TileResolution::High);
            update.tilings_created += 1;
        }
        if let Some(low_scale) = low_scale
            && self.tiling(TileResolution::Low).is_none()
        {
            self.add_tiling(low_scale, TileResolution::Low);
            update.tilings_created += 1;
        }

        update.tilings_destroyed += self.drop_unneeded_non_ideal(ideal_scale, &mut update.released);

        let eventually = self
            .settings
            .priority_rects(viewport, ideal_scale, layer_bounds)
            .eventually;
        for tiling in &mut self.tilings {
            if tiling.resolution() != TileResolution::NonIdeal {
                update.tiles_created += tiling.create_tiles_in(&eventually);
            }
        }

        if !update.is_noop() {
            tracing::debug!(
                layer = self.layer.0,
                ideal_scale,
                tilings = self.tilings.len(),
                created = update.tilings_created,
                destroyed = update.tilings_destroyed,
                tiles_created = update.tiles_created,
                "tilings updated"
            );
        }
        update
    }

    /// Recomputes per-tree priorities and prunes tiles neither tree will
    /// need. Returns resources held by pruned tiles.
    pub fn update_tile_priorities(
        &mut self,
        active: Option<&PriorityRects>,
        pending: Option<&PriorityRects>,
    ) -> Vec<ReleasedResource> {
        let keep = [active, pending]
            .into_iter()
            .flatten()
            .fold(IntRect::default(), |keep, rects| keep.union(&rects.eventually));
        let mut released = Vec::new();
        for tiling in &mut self.tilings {
            tiling.remove_tiles_outside(&keep, &mut released);
            tiling.update_tile_priorities(WhichTree::Active, active);
            tiling.update_tile_priorities(WhichTree::Pending, pending);
        }
        released
    }

    /// Marks tiles under `layer_rect` stale in every tiling. Returns the
    /// stale pending resources.
    pub fn invalidate(&mut self, layer_rect: &IntRect) -> Vec<ReleasedResource> {
        let mut released = Vec::new();
        for tiling in &mut self.tilings {
            tiling.invalidate(layer_rect, &mut released);
        }
        released
    }

    pub fn take_invalidated_count(&mut self) -> usize {
        self.tilings
            .iter_mut()
            .map(Tiling::take_invalidated_count)
            .sum()
    }

    /// Promotes every tile's pending content and drops active content that
    /// no longer matches the recording.
    pub fn activate(&mut self) -> Vec<TileActivation> {
        self.tiles_mut().filter_map(Tile::activate).collect()
    }

    /// Releases every tile resource, for layer teardown.
    pub fn release_all(&mut self) -> Vec<ReleasedResource> {
        let mut released = Vec::new();
        for mut tiling in self.tilings.drain(..) {
            tiling.take_all_resources(&mut released);
        }
        released
    }

    /// Best available pixels for each part of `layer_rect`, for `tree`.
    /// Tilings closest to `ideal_scale` win; ties go to the tiling with more
    /// ready tiles, then the sharper one. Parts nobody covers come back as
    /// checkerboard quads.
    pub fn tiles_for_region(
        &self,
        layer_rect: IntRect,
        tree: WhichTree,
        ideal_scale: f32,
    ) -> Vec<TileDrawQuad> {
        let Some(region) = layer_rect.intersection(&IntRect::from_size(self.layer_bounds)) else {
            return Vec::new();
        };

        let mut ordered: Vec<(&Tiling, usize)> = self
            .tilings
            .iter()
            .map(|tiling| (tiling, tiling.ready_tile_count(tree)))
            .collect();
        ordered.sort_by(|(a, a_ready), (b, b_ready)| {
            let a_distance = (a.contents_scale() - ideal_scale).abs();
            let b_distance = (b.contents_scale() - ideal_scale).abs();
            a_distance
                .total_cmp(&b_distance)
                .then_with(|| b_ready.cmp(a_ready))
                .then_with(|| b.contents_scale().total_cmp(&a.contents_scale()))
        });

        let mut quads = Vec::new();
        let mut uncovered = vec![region];
        for (tiling, ready) in ordered {
            if ready == 0 {
                continue;
            }
            let content_region = tiling.content_rect_for(&region);
            for (col, row) in tiling.data().cells_covering(&content_region) {
                if uncovered.is_empty() {
                    break;
                }
                let Some(tile) = tiling.tile(col, row) else {
                    continue;
                };
                let Some(content) = tile.ready_content(tree) else {
                    continue;
                };
                let tile_rect = tile.layer_rect();
                let mut next = Vec::with_capacity(uncovered.len());
                for piece in uncovered.drain(..) {
                    let Some(hit) = piece.intersection(&tile_rect) else {
                        next.push(piece);
                        continue;
                    };
                    quads.push(TileDrawQuad {
                        layer_rect: hit,
                        source: Some(QuadSource {
                            tile: tile.id(),
                            content,
                            resolution: tiling.resolution(),
                            contents_scale: tiling.contents_scale(),
                            tile_content_rect: tile.content_rect(),
                        }),
                    });
                    next.extend(piece.subtract(&tile_rect));
                }
                uncovered = next;
            }
        }
        quads.extend(uncovered.into_iter().map(|layer_rect| TileDrawQuad {
            layer_rect,
            source: None,
        }));
        quads
    }

    fn add_tiling(&mut self, contents_scale: f32, resolution: TileResolution) {
        let tiling = Tiling::new(
            self.layer,
            contents_scale,
            resolution,
            self.layer_bounds,
            self.settings.tile_size,
        );
        self.tilings.push(tiling);
        self.tilings
            .sort_by(|a, b| b.contents_scale().total_cmp(&a.contents_scale()));
    }

    /// Non-ideal tilings survive only while they hold pixels, and only the
    /// `max_non_ideal_tilings` closest to the ideal scale.
    fn drop_unneeded_non_ideal(
        &mut self,
        ideal_scale: f32,
        released: &mut Vec<ReleasedResource>,
    ) -> usize {
        let mut keep_keys: Vec<(f32, ScaleKey)> = self
            .tilings
            .iter()
            .filter(|tiling| {
                tiling.resolution() == TileResolution::NonIdeal && tiling.has_content()
            })
            .map(|tiling| {
                (
                    (tiling.contents_scale() - ideal_scale).abs(),
                    tiling.scale_key(),
                )
            })
            .collect();
        keep_keys.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        keep_keys.truncate(self.settings.max_non_ideal_tilings);

        let before = self.tilings.len();
        self.tilings.retain_mut(|tiling| {
            if tiling.resolution() != TileResolution::NonIdeal
                || keep_keys.iter().any(|(_, key)| *key == tiling.scale_key())
            {
                return true;
            }
            tiling.take_all_resources(released);
            false
        });
        before - self.tilings.len()
    }
}
