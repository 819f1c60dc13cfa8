use std::cmp::Ordering;

use raster_protocol::{
    PriorityBin, RasterTaskId, ResourceId, TileId, TilePriority, TileResolution, TreePriority,
    resolution_rank,
};
use serde::{Deserialize, Serialize};

/// Which priority bins may hold tile memory at all, independent of the byte
/// limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryLimitPolicy {
    AllowNothing,
    /// Only what is visible now.
    AllowAbsoluteMinimum,
    AllowPrepaintOnly,
    #[default]
    AllowAnything,
}

impl MemoryLimitPolicy {
    pub fn allows(self, bin: PriorityBin) -> bool {
        match self {
            MemoryLimitPolicy::AllowNothing => false,
            MemoryLimitPolicy::AllowAbsoluteMinimum => bin == PriorityBin::Now,
            MemoryLimitPolicy::AllowPrepaintOnly => bin != PriorityBin::Eventually,
            MemoryLimitPolicy::AllowAnything => true,
        }
    }
}

/// One tile as seen by a scheduling pass.
#[derive(Debug, Clone)]
pub(crate) struct TileCandidate {
    pub tile: TileId,
    pub priority: TilePriority,
    pub required_for_activation: bool,
    /// Bytes already held through active, pending and in-flight resources.
    pub held_bytes: u64,
    /// Part of `held_bytes` in locked resources, which eviction cannot
    /// return before the draw path unlocks them.
    pub locked_bytes: u64,
    /// Bytes a new raster would add, zero when no raster is wanted.
    pub raster_bytes: u64,
    pub in_flight: Option<RasterTaskId>,
    /// Active and pending resources, not the in-flight one.
    pub resources: Vec<ResourceId>,
}

impl TileCandidate {
    pub fn is_protected(&self) -> bool {
        self.priority.bin == PriorityBin::Now && self.required_for_activation
    }

    pub fn is_evictable(&self) -> bool {
        self.in_flight.is_none() && !self.resources.is_empty() && !self.is_protected()
    }

    /// Bytes this tile keeps charged to the budget whatever the grant walk
    /// decides.
    pub fn pinned_bytes(&self) -> u64 {
        if self.is_evictable() {
            self.locked_bytes
        } else {
            self.held_bytes
        }
    }
}

/// Raster and memory-grant order: most important first.
pub(crate) fn raster_order(a: &TileCandidate, b: &TileCandidate) -> Ordering {
    a.priority
        .bin
        .cmp(&b.priority.bin)
        .then_with(|| b.required_for_activation.cmp(&a.required_for_activation))
        .then_with(|| {
            resolution_rank(a.priority.resolution).cmp(&resolution_rank(b.priority.resolution))
        })
        .then_with(|| a.priority.scale_distance.total_cmp(&b.priority.scale_distance))
        .then_with(|| {
            a.priority
                .distance_to_visible
                .total_cmp(&b.priority.distance_to_visible)
        })
        .then_with(|| a.tile.cmp(&b.tile))
}

/// Reclaim order: first element goes first.
pub(crate) fn eviction_order(
    a: &TileCandidate,
    b: &TileCandidate,
    tree_priority: TreePriority,
) -> Ordering {
    b.priority
        .bin
        .cmp(&a.priority.bin)
        .then_with(|| {
            eviction_rank(a.priority.resolution, tree_priority)
                .cmp(&eviction_rank(b.priority.resolution, tree_priority))
        })
        .then_with(|| {
            b.priority
                .distance_to_visible
                .total_cmp(&a.priority.distance_to_visible)
        })
        .then_with(|| b.tile.cmp(&a.tile))
}

fn eviction_rank(resolution: TileResolution, tree_priority: TreePriority) -> u8 {
    match (resolution, tree_priority) {
        (TileResolution::NonIdeal, _) => 0,
        (TileResolution::High, TreePriority::SmoothnessTakesPriority) => 1,
        (TileResolution::Low, TreePriority::SmoothnessTakesPriority) => 2,
        (TileResolution::Low, _) => 1,
        (TileResolution::High, _) => 2,
    }
}

#[cfg(test)]
mod tests {
    use raster_protocol::{LayerId, ScaleKey};

    use super::*;

    fn candidate(
        col: u32,
        bin: PriorityBin,
        resolution: TileResolution,
        distance: f32,
        required: bool,
    ) -> TileCandidate {
        TileCandidate {
            tile: TileId {
                layer: LayerId(1),
                scale_key: ScaleKey::from_scale(1.0),
                col,
                row: 0,
            },
            priority: TilePriority {
                bin,
                resolution,
                distance_to_visible: distance,
                scale_distance: 0.0,
            },
            required_for_activation: required,
            held_bytes: 0,
            locked_bytes: 0,
            raster_bytes: 0,
            in_flight: None,
            resources: Vec::new(),
        }
    }

    fn cols(
        mut candidates: Vec<TileCandidate>,
        order: impl Fn(&TileCandidate, &TileCandidate) -> Ordering,
    ) -> Vec<u32> {
        candidates.sort_by(order);
        candidates.iter().map(|candidate| candidate.tile.col).collect()
    }

    #[test]
    fn raster_order_puts_required_first_within_bin() {
        let candidates = vec![
            candidate(0, PriorityBin::Soon, TileResolution::High, 0.0, false),
            candidate(1, PriorityBin::Now, TileResolution::Low, 0.0, false),
            candidate(2, PriorityBin::Now, TileResolution::High, 0.0, true),
            candidate(3, PriorityBin::Now, TileResolution::High, 0.0, false),
        ];
        assert_eq!(cols(candidates, raster_order), vec![2, 3, 1, 0]);
    }

    #[test]
    fn raster_order_breaks_ties_by_tile_identity() {
        let candidates = vec![
            candidate(5, PriorityBin::Now, TileResolution::High, 0.0, true),
            candidate(4, PriorityBin::Now, TileResolution::High, 0.0, true),
        ];
        assert_eq!(cols(candidates, raster_order), vec![4, 5]);
    }

    #[test]
    fn eviction_takes_far_bins_and_non_ideal_first() {
        let candidates = vec![
            candidate(0, PriorityBin::Now, TileResolution::High, 0.0, false),
            candidate(1, PriorityBin::Eventually, TileResolution::High, 900.0, false),
            candidate(2, PriorityBin::Soon, TileResolution::High, 100.0, false),
            candidate(3, PriorityBin::Eventually, TileResolution::NonIdeal, 10.0, false),
            candidate(4, PriorityBin::Eventually, TileResolution::High, 2000.0, false),
        ];
        let order = |a: &TileCandidate, b: &TileCandidate| {
            eviction_order(a, b, TreePriority::SamePriorityForBothTrees)
        };
        assert_eq!(cols(candidates, order), vec![3, 4, 1, 2, 0]);
    }

    #[test]
    fn smoothness_mode_evicts_high_res_before_low_res() {
        let candidates = vec![
            candidate(0, PriorityBin::Soon, TileResolution::Low, 0.0, false),
            candidate(1, PriorityBin::Soon, TileResolution::High, 0.0, false),
        ];
        let smoothness = |a: &TileCandidate, b: &TileCandidate| {
            eviction_order(a, b, TreePriority::SmoothnessTakesPriority)
        };
        assert_eq!(cols(candidates.clone(), smoothness), vec![1, 0]);
        let new_content = |a: &TileCandidate, b: &TileCandidate| {
            eviction_order(a, b, TreePriority::NewContentTakesPriority)
        };
        assert_eq!(cols(candidates, new_content), vec![0, 1]);
    }

    #[test]
    fn policy_caps_bins() {
        assert!(!MemoryLimitPolicy::AllowNothing.allows(PriorityBin::Now));
        assert!(MemoryLimitPolicy::AllowAbsoluteMinimum.allows(PriorityBin::Now));
        assert!(!MemoryLimitPolicy::AllowAbsoluteMinimum.allows(PriorityBin::Soon));
        assert!(MemoryLimitPolicy::AllowPrepaintOnly.allows(PriorityBin::Soon));
        assert!(!MemoryLimitPolicy::AllowPrepaintOnly.allows(PriorityBin::Eventually));
        assert!(MemoryLimitPolicy::AllowAnything.allows(PriorityBin::Eventually));
    }
}
