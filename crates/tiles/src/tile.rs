use raster_protocol::{
    IntRect, RasterTaskId, ResourceFormat, ResourceId, Rgba, TileId, TilePriority, WhichTree,
};

/// What a tile draws from: a rastered resource, or a single color the
/// recording reduced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileContent {
    Resource(ResourceId),
    SolidColor(Rgba),
}

impl TileContent {
    pub fn resource(self) -> Option<ResourceId> {
        match self {
            TileContent::Resource(resource) => Some(resource),
            TileContent::SolidColor(_) => None,
        }
    }
}

/// A resource reference a tile let go of, tagged with the tree that held
/// it. The owner of the resource table drops the matching reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleasedResource {
    pub resource: ResourceId,
    pub tree: WhichTree,
}

impl ReleasedResource {
    pub fn active(resource: ResourceId) -> Self {
        Self {
            resource,
            tree: WhichTree::Active,
        }
    }

    pub fn pending(resource: ResourceId) -> Self {
        Self {
            resource,
            tree: WhichTree::Pending,
        }
    }
}

/// Resource handover when a tile's active content changes. `promoted`
/// moves from the pending tree to the active tree; `replaced` leaves the
/// active tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileActivation {
    pub promoted: Option<ResourceId>,
    pub replaced: Option<ResourceId>,
}

/// Lifecycle of the tile's pending-tree content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileState {
    Uninitialized,
    NeedsRaster,
    RasterInProgress,
    Rasterized,
    Invalidated,
    Evicted,
}

#[derive(Debug)]
pub struct Tile {
    id: TileId,
    content_rect: IntRect,
    layer_rect: IntRect,
    priority: [TilePriority; 2],
    required_for_activation: bool,
    active: Option<TileContent>,
    pending: Option<TileContent>,
    state: TileState,
    content_generation: u64,
    // Content generation the active content was produced from.
    active_generation: u64,
    analyzed_generation: Option<u64>,
    in_flight: Option<RasterTaskId>,
    force_software: bool,
}

impl Tile {
    pub(crate) fn new(id: TileId, content_rect: IntRect, layer_rect: IntRect) -> Self {
        Self {
            id,
            content_rect,
            layer_rect,
            priority: [TilePriority::eventually(); 2],
            required_for_activation: false,
            active: None,
            pending: None,
            state: TileState::Uninitialized,
            content_generation: 0,
            active_generation: 0,
            analyzed_generation: None,
            in_flight: None,
            force_software: false,
        }
    }

    pub fn id(&self) -> TileId {
        self.id
    }

    pub fn contents_scale(&self) -> f32 {
        self.id.contents_scale()
    }

    /// Rect in the tiling's content space.
    pub fn content_rect(&self) -> IntRect {
        self.content_rect
    }

    /// Layer-space rect the tile covers, rounded outward.
    pub fn layer_rect(&self) -> IntRect {
        self.layer_rect
    }

    pub fn state(&self) -> TileState {
        self.state
    }

    pub fn priority(&self, tree: WhichTree) -> TilePriority {
        self.priority[tree.index()]
    }

    pub fn set_priority(&mut self, tree: WhichTree, priority: TilePriority) {
        self.priority[tree.index()] = priority;
    }

    pub fn required_for_activation(&self) -> bool {
        self.required_for_activation
    }

    pub fn set_required_for_activation(&mut self, required: bool) {
        self.required_for_activation = required;
    }

    pub fn active_content(&self) -> Option<TileContent> {
        self.active
    }

    pub fn pending_content(&self) -> Option<TileContent> {
        self.pending
    }

    pub fn active_resource(&self) -> Option<ResourceId> {
        self.active.and_then(TileContent::resource)
    }

    pub fn pending_resource(&self) -> Option<ResourceId> {
        self.pending.and_then(TileContent::resource)
    }

    pub fn content_generation(&self) -> u64 {
        self.content_generation
    }

    pub fn in_flight(&self) -> Option<RasterTaskId> {
        self.in_flight
    }

    pub fn force_software(&self) -> bool {
        self.force_software
    }

    pub fn set_force_software(&mut self) {
        self.force_software = true;
    }

    pub fn memory_bytes(&self, format: ResourceFormat) -> u64 {
        format.bytes_for(self.content_rect.size())
    }

    /// Content the given tree should draw, if it has any.
    pub fn ready_content(&self, tree: WhichTree) -> Option<TileContent> {
        match tree {
            WhichTree::Active => self.active,
            WhichTree::Pending => {
                if self.state != TileState::Rasterized {
                    return None;
                }
                self.pending.or(self.active)
            }
        }
    }

    pub fn has_any_resource(&self) -> bool {
        self.active_resource().is_some() || self.pending_resource().is_some()
    }

    /// True while either tree has something to draw, solid colors included.
    pub fn has_content(&self) -> bool {
        self.active.is_some() || self.pending.is_some()
    }

    pub fn is_ready_for_activation(&self) -> bool {
        self.ready_content(WhichTree::Pending).is_some()
    }

    /// Moves a freshly needed tile into the raster queue.
    pub fn mark_needs_raster(&mut self) {
        match self.state {
            TileState::Uninitialized | TileState::Invalidated | TileState::Evicted => {
                self.state = TileState::NeedsRaster;
            }
            TileState::NeedsRaster | TileState::RasterInProgress | TileState::Rasterized => {}
        }
    }

    /// The current content has not been checked for a solid color yet.
    pub fn needs_solid_color_analysis(&self) -> bool {
        self.analyzed_generation != Some(self.content_generation)
    }

    pub fn mark_solid_color_analyzed(&mut self) {
        self.analyzed_generation = Some(self.content_generation);
    }

    pub fn begin_raster(&mut self, task: RasterTaskId) {
        if let Some(existing) = self.in_flight {
            panic!(
                "tile {:?} already has raster task {existing:?} in flight, refusing {task:?}",
                self.id
            );
        }
        assert_eq!(
            self.state,
            TileState::NeedsRaster,
            "tile {:?} dispatched for raster from state {:?}",
            self.id,
            self.state
        );
        self.in_flight = Some(task);
        self.state = TileState::RasterInProgress;
    }

    /// Installs a completed raster as the pending content. Returns the
    /// superseded pending resource for release.
    pub fn finish_raster(
        &mut self,
        task: RasterTaskId,
        resource: ResourceId,
    ) -> Option<ResourceId> {
        self.expect_in_flight(task);
        self.in_flight = None;
        self.state = TileState::Rasterized;
        self.pending
            .replace(TileContent::Resource(resource))
            .and_then(TileContent::resource)
    }

    /// Satisfies the tile without a raster: its recording is one color.
    pub fn install_solid_color(&mut self, color: Rgba) -> Option<ResourceId> {
        assert!(
            self.in_flight.is_none(),
            "tile {:?} given a solid color with a raster task in flight",
            self.id
        );
        assert_eq!(
            self.state,
            TileState::NeedsRaster,
            "tile {:?} given a solid color from state {:?}",
            self.id,
            self.state
        );
        self.analyzed_generation = Some(self.content_generation);
        self.state = TileState::Rasterized;
        self.pending
            .replace(TileContent::SolidColor(color))
            .and_then(TileContent::resource)
    }

    /// The task ended without usable output.
    pub fn abort_raster(&mut self, task: RasterTaskId) {
        self.expect_in_flight(task);
        self.in_flight = None;
        self.state = TileState::NeedsRaster;
    }

    /// Content under the tile changed. The active content keeps drawing
    /// until activation; the stale pending resource is returned.
    pub fn invalidate(&mut self) -> Option<ReleasedResource> {
        self.content_generation += 1;
        match self.state {
            // The in-flight task will come back stale.
            TileState::RasterInProgress => {}
            TileState::Uninitialized => {}
            _ => self.state = TileState::Invalidated,
        }
        self.pending
            .take()
            .and_then(TileContent::resource)
            .map(ReleasedResource::pending)
    }

    /// Drops every resource reference.
    pub fn evict(&mut self) -> impl Iterator<Item = ReleasedResource> + use<> {
        assert!(
            self.in_flight.is_none(),
            "tile {:?} evicted with a raster task in flight",
            self.id
        );
        self.state = TileState::Evicted;
        self.take_resources()
    }

    /// Promotes pending content to the active tree. Active content from an
    /// older generation is dropped even when nothing replaces it.
    pub fn activate(&mut self) -> Option<TileActivation> {
        if let Some(content) = self.pending.take() {
            self.active_generation = self.content_generation;
            let replaced = self.active.replace(content);
            return Some(TileActivation {
                promoted: content.resource(),
                replaced: replaced.and_then(TileContent::resource),
            });
        }
        if self.active.is_some() && self.active_generation != self.content_generation {
            let stale = self.active.take();
            return Some(TileActivation {
                promoted: None,
                replaced: stale.and_then(TileContent::resource),
            });
        }
        None
    }

    /// Everything still referenced by the tile, for teardown.
    pub(crate) fn take_resources(&mut self) -> impl Iterator<Item = ReleasedResource> + use<> {
        let active = self
            .active
            .take()
            .and_then(TileContent::resource)
            .map(ReleasedResource::active);
        let pending = self
            .pending
            .take()
            .and_then(TileContent::resource)
            .map(ReleasedResource::pending);
        active.into_iter().chain(pending)
    }

    fn expect_in_flight(&self, task: RasterTaskId) {
        assert_eq!(
            self.in_flight,
            Some(task),
            "tile {:?} completion for task {task:?} does not match in-flight task",
            self.id
        );
    }
}

#[cfg(test)]
mod tests {
    use raster_protocol::{LayerId, ScaleKey};

    use super::*;

    fn tile() -> Tile {
        let id = TileId {
            layer: LayerId(1),
            scale_key: ScaleKey::from_scale(1.0),
            col: 0,
            row: 0,
        };
        Tile::new(id, IntRect::new(0, 0, 16, 16), IntRect::new(0, 0, 16, 16))
    }

    fn resource(raw: u64) -> ResourceId {
        use slotmap::KeyData;
        ResourceId::from(KeyData::from_ffi(raw))
    }

    #[test]
    fn raster_lifecycle_installs_pending_resource() {
        let mut tile = tile();
        tile.mark_needs_raster();
        tile.begin_raster(RasterTaskId(1));
        assert_eq!(tile.state(), TileState::RasterInProgress);

        assert_eq!(tile.finish_raster(RasterTaskId(1), resource(1)), None);
        assert_eq!(tile.state(), TileState::Rasterized);
        let content = Some(TileContent::Resource(resource(1)));
        assert_eq!(tile.ready_content(WhichTree::Pending), content);
        assert_eq!(tile.ready_content(WhichTree::Active), None);

        assert_eq!(
            tile.activate(),
            Some(TileActivation {
                promoted: Some(resource(1)),
                replaced: None
            })
        );
        assert_eq!(tile.ready_content(WhichTree::Active), content);
        assert_eq!(tile.ready_content(WhichTree::Pending), content);
        assert_eq!(tile.activate(), None);
    }

    #[test]
    #[should_panic(expected = "already has raster task")]
    fn second_dispatch_panics() {
        let mut tile = tile();
        tile.mark_needs_raster();
        tile.begin_raster(RasterTaskId(1));
        tile.begin_raster(RasterTaskId(2));
    }

    #[test]
    fn invalidate_keeps_active_content() {
        let mut tile = tile();
        tile.mark_needs_raster();
        tile.begin_raster(RasterTaskId(1));
        tile.finish_raster(RasterTaskId(1), resource(1));
        tile.activate();

        assert_eq!(tile.invalidate(), None);
        assert_eq!(tile.state(), TileState::Invalidated);
        assert_eq!(tile.content_generation(), 1);
        assert_eq!(tile.active_resource(), Some(resource(1)));
        assert_eq!(tile.ready_content(WhichTree::Pending), None);
    }

    #[test]
    fn activation_drops_active_content_of_an_older_generation() {
        let mut tile = tile();
        tile.mark_needs_raster();
        tile.begin_raster(RasterTaskId(1));
        tile.finish_raster(RasterTaskId(1), resource(1));
        tile.activate();
        tile.invalidate();
        tile.mark_needs_raster();

        assert_eq!(
            tile.activate(),
            Some(TileActivation {
                promoted: None,
                replaced: Some(resource(1))
            })
        );
        assert_eq!(tile.ready_content(WhichTree::Active), None);
        assert!(!tile.has_content());
        assert_eq!(tile.activate(), None);
    }

    #[test]
    fn solid_color_satisfies_tile_without_a_resource() {
        let red = Rgba::opaque(255, 0, 0);
        let mut tile = tile();
        tile.mark_needs_raster();
        assert!(tile.needs_solid_color_analysis());

        assert_eq!(tile.install_solid_color(red), None);
        assert_eq!(tile.state(), TileState::Rasterized);
        assert!(!tile.needs_solid_color_analysis());
        assert!(tile.is_ready_for_activation());
        assert!(!tile.has_any_resource());

        assert_eq!(
            tile.activate(),
            Some(TileActivation {
                promoted: None,
                replaced: None
            })
        );
        assert_eq!(
            tile.ready_content(WhichTree::Active),
            Some(TileContent::SolidColor(red))
        );

        tile.invalidate();
        assert!(tile.needs_solid_color_analysis());
    }

    #[test]
    fn evict_releases_both_trees() {
        let mut tile = tile();
        tile.mark_needs_raster();
        tile.begin_raster(RasterTaskId(1));
        tile.finish_raster(RasterTaskId(1), resource(1));
        tile.activate();
        tile.invalidate();
        tile.mark_needs_raster();
        tile.begin_raster(RasterTaskId(2));
        tile.finish_raster(RasterTaskId(2), resource(2));

        let released: Vec<_> = tile.evict().collect();
        assert_eq!(
            released,
            vec![
                ReleasedResource::active(resource(1)),
                ReleasedResource::pending(resource(2))
            ]
        );
        assert_eq!(tile.state(), TileState::Evicted);
        assert!(!tile.has_any_resource());
    }

    #[test]
    fn abort_returns_to_needs_raster() {
        let mut tile = tile();
        tile.mark_needs_raster();
        tile.begin_raster(RasterTaskId(7));
        tile.abort_raster(RasterTaskId(7));
        assert_eq!(tile.state(), TileState::NeedsRaster);
        assert_eq!(tile.in_flight(), None);
    }
}
