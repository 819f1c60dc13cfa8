use std::collections::BTreeMap;

use raster_protocol::{
    IntRect, IntSize, LayerId, PriorityBin, ScaleKey, TileId, TilePriority,
    TileResolution, WhichTree,
};

use crate::dirty::TileDirtyBitset;
use crate::tile::{ReleasedResource, Tile};
use crate::tiling_data::TilingData;

/// Layer-space rects a tree's priorities are computed against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityRects {
    pub visible: IntRect,
    pub soon: IntRect,
    pub eventually: IntRect,
    pub ideal_scale: f32,
}

impl PriorityRects {
    pub fn bin_for(&self, layer_rect: &IntRect) -> Option<PriorityBin> {
        if layer_rect.intersects(&self.visible) {
            Some(PriorityBin::Now)
        } else if layer_rect.intersects(&self.soon) {
            Some(PriorityBin::Soon)
        } else if layer_rect.intersects(&self.eventually) {
            Some(PriorityBin::Eventually)
        } else {
            None
        }
    }
}

/// One contents scale worth of tiles for a layer. Tiles exist only where
/// something asked for them.
#[derive(Debug)]
pub struct Tiling {
    layer: LayerId,
    scale_key: ScaleKey,
    resolution: TileResolution,
    layer_bounds: IntSize,
    data: TilingData,
    tiles: BTreeMap<(u32, u32), Tile>,
    invalidated: TileDirtyBitset,
}

impl Tiling {
    pub fn new(
        layer: LayerId,
        contents_scale: f32,
        resolution: TileResolution,
        layer_bounds: IntSize,
        tile_size: IntSize,
    ) -> Self {
        let scale_key = ScaleKey::from_scale(contents_scale);
        let data = TilingData::new(tile_size, layer_bounds.scale_to_ceil(contents_scale));
        Self {
            layer,
            scale_key,
            resolution,
            layer_bounds,
            data,
            tiles: BTreeMap::new(),
            invalidated: TileDirtyBitset::new(data.cols(), data.rows()),
        }
    }

    pub fn contents_scale(&self) -> f32 {
        self.scale_key.scale()
    }

    pub fn scale_key(&self) -> ScaleKey {
        self.scale_key
    }

    pub fn resolution(&self) -> TileResolution {
        self.resolution
    }

    pub(crate) fn set_resolution(&mut self, resolution: TileResolution) {
        self.resolution = resolution;
    }

    pub fn data(&self) -> &TilingData {
        &self.data
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn tile(&self, col: u32, row: u32) -> Option<&Tile> {
        self.tiles.get(&(col, row))
    }

    pub fn tile_mut(&mut self, col: u32, row: u32) -> Option<&mut Tile> {
        self.tiles.get_mut(&(col, row))
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile> + '_ {
        self.tiles.values()
    }

    pub fn tiles_mut(&mut self) -> impl Iterator<Item = &mut Tile> + '_ {
        self.tiles.values_mut()
    }

    pub fn ready_tile_count(&self, tree: WhichTree) -> usize {
        self.tiles
            .values()
            .filter(|tile| tile.ready_content(tree).is_some())
            .count()
    }

    pub fn has_content(&self) -> bool {
        self.tiles.values().any(Tile::has_content)
    }

    /// Layer-space rect converted to this tiling's content space.
    pub fn content_rect_for(&self, layer_rect: &IntRect) -> IntRect {
        layer_rect.scale_to_enclosing(self.contents_scale())
    }

    /// Creates missing tiles under `layer_rect`. Returns how many were made.
    pub fn create_tiles_in(&mut self, layer_rect: &IntRect) -> usize {
        let content_rect = self.content_rect_for(layer_rect);
        let mut created = 0;
        for (col, row) in self.data.cells_covering(&content_rect) {
            if self.tiles.contains_key(&(col, row)) {
                continue;
            }
            let tile = self.build_tile(col, row);
            self.tiles.insert((col, row), tile);
            created += 1;
        }
        created
    }

    /// Removes tiles that are not under `keep` (layer space). Resources they
    /// held are appended to `released`.
    pub fn remove_tiles_outside(
        &mut self,
        keep: &IntRect,
        released: &mut Vec<ReleasedResource>,
    ) -> usize {
        let before = self.tiles.len();
        self.tiles.retain(|_, tile| {
            if tile.layer_rect().intersects(keep) || tile.in_flight().is_some() {
                return true;
            }
            released.extend(tile.take_resources());
            false
        });
        before - self.tiles.len()
    }

    /// Strips every tile of its resources before the tiling is dropped.
    pub(crate) fn take_all_resources(&mut self, released: &mut Vec<ReleasedResource>) {
        for tile in self.tiles.values_mut() {
            released.extend(tile.take_resources());
        }
    }

    pub fn invalidate(
        &mut self,
        layer_rect: &IntRect,
        released: &mut Vec<ReleasedResource>,
    ) -> usize {
        let content_rect = self.content_rect_for(layer_rect);
        let mut touched = 0;
        for (col, row) in self.data.cells_covering(&content_rect) {
            let Some(tile) = self.tiles.get_mut(&(col, row)) else {
                continue;
            };
            released.extend(tile.invalidate());
            self.invalidated.set(col, row);
            touched += 1;
        }
        touched
    }

    /// Number of cells invalidated since the last call.
    pub fn take_invalidated_count(&mut self) -> usize {
        let count = self.invalidated.dirty_count();
        self.invalidated.clear();
        count
    }

    pub fn update_tile_priorities(&mut self, tree: WhichTree, rects: Option<&PriorityRects>) {
        let resolution = self.resolution;
        let scale_distance = rects
            .map(|rects| (self.contents_scale() - rects.ideal_scale).abs())
            .unwrap_or(f32::MAX);
        for tile in self.tiles.values_mut() {
            let priority = match rects {
                None => TilePriority::eventually(),
                Some(rects) => match rects.bin_for(&tile.layer_rect()) {
                    None => TilePriority::eventually(),
                    Some(bin) => TilePriority {
                        bin,
                        resolution,
                        distance_to_visible: tile.layer_rect().manhattan_distance_to(&rects.visible)
                            as f32,
                        scale_distance,
                    },
                },
            };
            tile.set_priority(tree, priority);
            if tree == WhichTree::Pending {
                tile.set_required_for_activation(
                    resolution == TileResolution::High && priority.bin == PriorityBin::Now,
                );
            }
            // Non-ideal tiles only keep pixels they already have.
            let needed = rects.is_some_and(|rects| rects.bin_for(&tile.layer_rect()).is_some());
            if needed && resolution != TileResolution::NonIdeal {
                tile.mark_needs_raster();
            }
        }
    }

    fn build_tile(&self, col: u32, row: u32) -> Tile {
        let content_rect = self.data.tile_rect(col, row);
        let layer_rect = content_rect
            .scale_to_enclosing(1.0 / self.contents_scale())
            .intersection(&IntRect::from_size(self.layer_bounds))
            .unwrap_or_default();
        let id = TileId {
            layer: self.layer,
            scale_key: self.scale_key,
            col,
            row,
        };
        Tile::new(id, content_rect, layer_rect)
    }
}
