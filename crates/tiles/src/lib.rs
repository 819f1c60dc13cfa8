//! Tiles, tilings and per-layer tiling sets.
//!
//! A [`TilingSet`] owns one [`Tiling`] per contents scale a layer currently
//! needs. Each tiling is a sparse grid of [`Tile`]s whose geometry comes from
//! [`TilingData`]. Tiles hold resource handles, never pixels.

mod dirty;
mod layer;
mod tile;
mod tiling;
mod tiling_data;
mod tiling_set;

pub use dirty::TileDirtyBitset;
pub use layer::{LayerCommit, LayerTreeState, PictureLayer};
pub use tile::{ReleasedResource, Tile, TileActivation, TileContent, TileState};
pub use tiling::{PriorityRects, Tiling};
pub use tiling_data::TilingData;
pub use tiling_set::{
    QuadSource, TileDrawQuad, TilingSet, TilingSetSettings, TilingUpdate, Viewport,
};
