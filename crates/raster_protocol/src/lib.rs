//! Types shared by every stage of the tile raster pipeline.
//!
//! Nothing in here owns state: ids, geometry, priorities and the plain
//! RGBA bitmap that raster workers produce.

mod bitmap;
mod geometry;
mod priority;

pub use bitmap::{Bitmap, Rgba};
pub use geometry::{IntRect, IntSize, Vector2};
pub use priority::{
    PriorityBin, TilePriority, TileResolution, TreePriority, WhichTree, resolution_rank,
};

use serde::{Deserialize, Serialize};

slotmap::new_key_type! {
    /// Handle into the resource provider's table. Tiles never own pixels
    /// directly, they hold one of these.
    pub struct ResourceId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LayerId(pub u64);

/// Identity of a tiling inside a layer: the bit pattern of its contents
/// scale. Positive finite floats keep their order when compared as bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScaleKey(u32);

impl ScaleKey {
    pub fn from_scale(contents_scale: f32) -> Self {
        assert!(
            contents_scale.is_finite() && contents_scale > 0.0,
            "contents scale must be positive and finite, got {contents_scale}"
        );
        Self(contents_scale.to_bits())
    }

    pub fn scale(self) -> f32 {
        f32::from_bits(self.0)
    }
}

/// (layer, tiling, column, row). Derived ordering is the stable tie-break
/// used when two tiles have identical priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileId {
    pub layer: LayerId,
    pub scale_key: ScaleKey,
    pub col: u32,
    pub row: u32,
}

impl TileId {
    pub fn contents_scale(&self) -> f32 {
        self.scale_key.scale()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RasterTaskId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RasterBackendKind {
    #[default]
    Software,
    Gpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceFormat {
    #[default]
    Rgba8,
    Bgra8,
}

impl ResourceFormat {
    pub const fn bytes_per_pixel(self) -> u64 {
        match self {
            ResourceFormat::Rgba8 | ResourceFormat::Bgra8 => 4,
        }
    }

    pub fn bytes_for(self, size: IntSize) -> u64 {
        size.area().saturating_mul(self.bytes_per_pixel())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_key_round_trips_and_orders_like_scale() {
        let low = ScaleKey::from_scale(0.25);
        let high = ScaleKey::from_scale(2.0);
        assert_eq!(low.scale(), 0.25);
        assert!(low < high);
    }

    #[test]
    #[should_panic(expected = "contents scale must be positive")]
    fn scale_key_rejects_zero() {
        let _ = ScaleKey::from_scale(0.0);
    }

    #[test]
    fn tile_ids_order_by_layer_then_tiling_then_grid() {
        let a = TileId {
            layer: LayerId(1),
            scale_key: ScaleKey::from_scale(1.0),
            col: 5,
            row: 0,
        };
        let b = TileId {
            layer: LayerId(1),
            scale_key: ScaleKey::from_scale(1.0),
            col: 0,
            row: 1,
        };
        let c = TileId {
            layer: LayerId(2),
            ..a
        };
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn format_byte_size_uses_four_bytes_per_pixel() {
        assert_eq!(
            ResourceFormat::Rgba8.bytes_for(IntSize::new(256, 256)),
            256 * 256 * 4
        );
        assert_eq!(ResourceFormat::Bgra8.bytes_for(IntSize::new(0, 10)), 0);
    }
}
