use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Coarse urgency class. Declaration order is priority order: `Now` sorts
/// first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PriorityBin {
    Now,
    Soon,
    Eventually,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileResolution {
    High,
    Low,
    NonIdeal,
}

/// Raster ordering rank: the ideal tiling first, the fast fallback next,
/// leftovers from older scales last.
pub const fn resolution_rank(resolution: TileResolution) -> u8 {
    match resolution {
        TileResolution::High => 0,
        TileResolution::Low => 1,
        TileResolution::NonIdeal => 2,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WhichTree {
    Active,
    Pending,
}

impl WhichTree {
    pub const ALL: [WhichTree; 2] = [WhichTree::Active, WhichTree::Pending];

    pub const fn index(self) -> usize {
        match self {
            WhichTree::Active => 0,
            WhichTree::Pending => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreePriority {
    #[default]
    SamePriorityForBothTrees,
    SmoothnessTakesPriority,
    NewContentTakesPriority,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TilePriority {
    pub bin: PriorityBin,
    pub resolution: TileResolution,
    /// Layer-space pixels between the tile and the visible rect.
    pub distance_to_visible: f32,
    /// |tiling scale - ideal scale|.
    pub scale_distance: f32,
}

impl Default for TilePriority {
    fn default() -> Self {
        Self::eventually()
    }
}

impl TilePriority {
    /// Least urgent priority a retained tile can have.
    pub const fn eventually() -> Self {
        Self {
            bin: PriorityBin::Eventually,
            resolution: TileResolution::NonIdeal,
            distance_to_visible: f32::MAX,
            scale_distance: f32::MAX,
        }
    }

    pub fn is_higher_priority_than(&self, other: &TilePriority) -> bool {
        self.cmp_urgency(other) == Ordering::Less
    }

    /// `Less` means `self` is more urgent.
    pub fn cmp_urgency(&self, other: &TilePriority) -> Ordering {
        self.bin
            .cmp(&other.bin)
            .then_with(|| {
                resolution_rank(self.resolution).cmp(&resolution_rank(other.resolution))
            })
            .then_with(|| self.scale_distance.total_cmp(&other.scale_distance))
            .then_with(|| {
                self.distance_to_visible
                    .total_cmp(&other.distance_to_visible)
            })
    }

    pub fn combine(
        active: TilePriority,
        pending: TilePriority,
        tree_priority: TreePriority,
    ) -> TilePriority {
        match tree_priority {
            TreePriority::SmoothnessTakesPriority => active,
            TreePriority::NewContentTakesPriority => pending,
            TreePriority::SamePriorityForBothTrees => {
                if pending.is_higher_priority_than(&active) {
                    pending
                } else {
                    active
                }
            }
        }
    }
}
