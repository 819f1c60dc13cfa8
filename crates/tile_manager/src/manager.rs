use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use picture_pile::PileSnapshot;
use raster_protocol::{
    LayerId, RasterTaskId, ResourceId, TileId, TilePriority, TileResolution, WhichTree,
};
use raster_worker_pool::{
    CancelOutcome, CancellationToken, PoolStartError, RasterCompletion, RasterOutcome, RasterTask,
    RasterWorkerPool, RasterWorkerPoolConfig,
};
use resource_provider::{
    BackendChoice, BackingStore, MemoryBudget, RasterBackend, ResourceError, ResourceProvider,
    ResourceRef,
};
use tiles::{LayerCommit, PictureLayer, ReleasedResource, Tile, TileActivation, TileState};

use crate::ordering::{TileCandidate, eviction_order, raster_order};
use crate::stats::{MemoryStats, RasterStats, TaskLog, TaskLogEntry};
use crate::{GlobalTileState, RasterError, TileManagerEvent, TileManagerSettings};

/// What one [`TileManager::prepare_tiles`] pass decided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrepareTilesReport {
    pub tiles_considered: usize,
    pub tiles_granted: usize,
    pub tasks_scheduled: usize,
    pub tasks_cancelled: usize,
    pub tiles_evicted: usize,
    pub memory_denied: usize,
}

#[derive(Debug)]
struct InFlightRaster {
    task: RasterTask,
    resource: ResourceId,
}

pub struct TileManager {
    settings: TileManagerSettings,
    budget: MemoryBudget,
    resources: ResourceProvider,
    pool: RasterWorkerPool,
    in_flight: BTreeMap<RasterTaskId, InFlightRaster>,
    next_task_id: u64,
    stats: RasterStats,
    events: Vec<TileManagerEvent>,
    task_log: TaskLog,
    ready_notified: bool,
    idle_notified: bool,
}

impl std::fmt::Debug for TileManager {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TileManager")
            .field("settings", &self.settings)
            .field("budget", &self.budget)
            .field("resources", &self.resources)
            .field("pool", &self.pool)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl TileManager {
    pub fn new(
        settings: TileManagerSettings,
        backend: Box<dyn RasterBackend>,
        pool_config: RasterWorkerPoolConfig,
    ) -> Result<Self, PoolStartError> {
        Ok(Self {
            settings,
            budget: MemoryBudget::new(settings.memory_limit_bytes),
            resources: ResourceProvider::new(backend, settings.format),
            pool: RasterWorkerPool::start(pool_config)?,
            in_flight: BTreeMap::new(),
            next_task_id: 1,
            stats: RasterStats::default(),
            events: Vec::new(),
            task_log: TaskLog::new(settings.task_log_capacity),
            ready_notified: false,
            idle_notified: false,
        })
    }

    pub fn settings(&self) -> &TileManagerSettings {
        &self.settings
    }

    pub fn resource_provider(&self) -> &ResourceProvider {
        &self.resources
    }

    pub fn memory_budget(&self) -> &MemoryBudget {
        &self.budget
    }

    pub fn raster_stats(&self) -> &RasterStats {
        &self.stats
    }

    pub fn memory_stats(&self) -> MemoryStats {
        MemoryStats {
            limit_bytes: self.budget.limit(),
            used_bytes: self.budget.used(),
            resource_count: self.resources.resource_count(),
            tasks_in_flight: self.in_flight.len(),
        }
    }

    pub fn task_log(&self) -> &TaskLog {
        &self.task_log
    }

    pub fn tasks_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn take_events(&mut self) -> Vec<TileManagerEvent> {
        std::mem::take(&mut self.events)
    }

    /// New limit, policy and tree priority. A lower limit is enforced by
    /// eviction on the next [`Self::prepare_tiles`].
    pub fn set_global_state(&mut self, state: GlobalTileState) {
        self.settings.memory_limit_bytes = state.memory_limit_bytes;
        self.settings.memory_limit_policy = state.memory_limit_policy;
        self.settings.tree_priority = state.tree_priority;
        self.budget.set_limit(state.memory_limit_bytes);
        tracing::debug!(
            limit = state.memory_limit_bytes,
            policy = ?state.memory_limit_policy,
            tree_priority = ?state.tree_priority,
            "tile manager global state changed"
        );
    }

    /// Every tile the pending tree needs for activation has content.
    pub fn is_ready_to_activate(&self, layers: &BTreeMap<LayerId, PictureLayer>) -> bool {
        layers.values().all(|layer| {
            layer
                .tiling_set()
                .tiles()
                .filter(|tile| tile.required_for_activation())
                .all(Tile::is_ready_for_activation)
        })
    }

    /// Tiles required for activation that still lack content.
    pub fn missing_required_tiles(&self, layers: &BTreeMap<LayerId, PictureLayer>) -> usize {
        layers
            .values()
            .flat_map(|layer| layer.tiling_set().tiles())
            .filter(|tile| tile.required_for_activation() && !tile.is_ready_for_activation())
            .count()
    }

    /// Commits a layer's pending changes. References held by tiles the
    /// commit made stale or destroyed are dropped here.
    pub fn commit_layer(&mut self, layer: &mut PictureLayer) -> LayerCommit {
        let commit = layer.commit();
        self.release_all(commit.tilings.released.iter().copied());
        self.ready_notified = false;
        commit
    }

    /// One scheduling pass: reprioritize, grant memory in priority order,
    /// evict what lost its grant and hand the winners to the raster pool.
    #[tracing::instrument(skip_all, fields(layers = layers.len()))]
    pub fn prepare_tiles(
        &mut self,
        layers: &mut BTreeMap<LayerId, PictureLayer>,
    ) -> PrepareTilesReport {
        let mut report = PrepareTilesReport::default();
        for layer in layers.values_mut() {
            let released = layer.update_tile_priorities();
            self.release_all(released);
        }
        if self.settings.solid_color_analysis {
            self.analyze_solid_color_tiles(layers);
        }

        let mut candidates = self.collect_candidates(layers);
        candidates.sort_by(raster_order);
        report.tiles_considered = candidates.len();

        let mut granted = self.assign_memory(&candidates, &mut report);
        self.reclaim_memory(layers, &candidates, &mut granted, &mut report);
        report.tiles_granted = granted.iter().filter(|granted| **granted).count();

        let mut ordered_tasks = Vec::new();
        let mut wanted = HashSet::new();
        let mut snapshots = HashMap::new();
        for (candidate, _) in candidates
            .iter()
            .zip(&granted)
            .filter(|(_, granted)| **granted)
        {
            if let Some(task_id) = candidate.in_flight {
                if let Some(raster) = self.in_flight.get(&task_id) {
                    wanted.insert(task_id);
                    ordered_tasks.push(raster.task.clone());
                }
                continue;
            }
            if candidate.raster_bytes == 0 {
                continue;
            }
            if let Some(task) = self.start_raster(layers, candidate.tile, &mut snapshots) {
                wanted.insert(task.id);
                ordered_tasks.push(task);
                report.tasks_scheduled += 1;
            }
        }

        let unwanted: Vec<RasterTaskId> = self
            .in_flight
            .keys()
            .filter(|task_id| !wanted.contains(task_id))
            .copied()
            .collect();
        for task_id in unwanted {
            match self.pool.cancel(task_id) {
                CancelOutcome::CancelledBeforeStart | CancelOutcome::Unknown => {
                    self.discard_unstarted(layers, task_id);
                    report.tasks_cancelled += 1;
                }
                // The completion comes back through check_for_completed_tasks.
                CancelOutcome::AlreadyRunning => {}
            }
        }
        for task_id in self.pool.schedule_tasks(ordered_tasks) {
            self.discard_unstarted(layers, task_id);
            report.tasks_cancelled += 1;
        }

        self.update_notifications(layers);
        tracing::debug!(
            considered = report.tiles_considered,
            granted = report.tiles_granted,
            scheduled = report.tasks_scheduled,
            cancelled = report.tasks_cancelled,
            evicted = report.tiles_evicted,
            denied = report.memory_denied,
            used = self.budget.used(),
            limit = self.budget.limit(),
            "tiles prepared"
        );
        report
    }

    /// Installs every raster result that has arrived. Returns how many
    /// completions were processed.
    #[tracing::instrument(skip_all)]
    pub fn check_for_completed_tasks(
        &mut self,
        layers: &mut BTreeMap<LayerId, PictureLayer>,
    ) -> usize {
        let mut completions = Vec::new();
        self.pool.collect_completed(&mut completions);
        self.process_completions(layers, completions)
    }

    /// Like [`Self::check_for_completed_tasks`], waiting up to `timeout`
    /// for the first result when none is ready.
    pub fn wait_for_completed_tasks(
        &mut self,
        layers: &mut BTreeMap<LayerId, PictureLayer>,
        timeout: Duration,
    ) -> usize {
        let mut completions = Vec::new();
        self.pool.wait_for_completions(&mut completions, timeout);
        self.process_completions(layers, completions)
    }

    /// Runs queued raster work on the calling thread. Only useful when the
    /// pool was started without threads.
    pub fn run_raster_tasks_inline(&mut self, max_tasks: usize) -> usize {
        self.pool.run_pending_inline(max_tasks)
    }

    /// Moves every layer's pending tile content to the active tree and
    /// hands the resource references over. Active content older than the
    /// committed recording is dropped, leaving checkerboard or a fallback
    /// tiling. Returns how many tiles changed.
    #[tracing::instrument(skip_all)]
    pub fn activate(&mut self, layers: &mut BTreeMap<LayerId, PictureLayer>) -> usize {
        let mut changed = 0;
        for layer in layers.values_mut() {
            for activation in layer.activate() {
                self.promote(activation);
                changed += 1;
            }
        }
        if changed > 0 {
            tracing::debug!(changed, "pending tile content activated");
        }
        changed
    }

    /// Drops every resource a departing layer holds. Raster work for it is
    /// cancelled; late results are discarded when they arrive.
    pub fn release_layer(&mut self, layer: &mut PictureLayer) {
        let released = layer.release_all();
        self.release_all(released);

        let layer_id = layer.id();
        let tasks: Vec<RasterTaskId> = self
            .in_flight
            .iter()
            .filter(|(_, raster)| raster.task.tile.layer == layer_id)
            .map(|(task_id, _)| *task_id)
            .collect();
        for task_id in tasks {
            match self.pool.cancel(task_id) {
                CancelOutcome::CancelledBeforeStart | CancelOutcome::Unknown => {
                    self.forget_in_flight(task_id);
                }
                CancelOutcome::AlreadyRunning => {}
            }
        }
    }

    /// Pins a resource for the draw path.
    pub fn lock_resource(&mut self, id: ResourceId) -> Result<&BackingStore, ResourceError> {
        self.resources.lock(id)
    }

    pub fn unlock_resource(&mut self, id: ResourceId) -> Result<(), ResourceError> {
        self.resources.unlock(&mut self.budget, id)
    }

    pub fn read_rgba8(&self, id: ResourceId) -> Option<Vec<u8>> {
        self.resources.read_rgba8(id)
    }

    fn collect_candidates(&self, layers: &BTreeMap<LayerId, PictureLayer>) -> Vec<TileCandidate> {
        let format = self.settings.format;
        let tree_priority = self.settings.tree_priority;
        let mut candidates = Vec::new();
        for layer in layers.values() {
            for tiling in layer.tiling_set().tilings() {
                let resolution = tiling.resolution();
                for tile in tiling.tiles() {
                    let priority = TilePriority::combine(
                        tile.priority(WhichTree::Active),
                        tile.priority(WhichTree::Pending),
                        tree_priority,
                    );
                    let resources: Vec<ResourceId> = tile
                        .active_resource()
                        .into_iter()
                        .chain(tile.pending_resource())
                        .collect();
                    let in_flight_resource = tile
                        .in_flight()
                        .and_then(|task_id| self.in_flight.get(&task_id))
                        .map(|raster| raster.resource);
                    let held_bytes = resources
                        .iter()
                        .copied()
                        .chain(in_flight_resource)
                        .filter_map(|resource| self.resources.info(resource))
                        .map(|info| info.bytes)
                        .sum();
                    let locked_bytes = resources
                        .iter()
                        .copied()
                        .filter(|resource| self.resources.is_locked(*resource))
                        .filter_map(|resource| self.resources.info(resource))
                        .map(|info| info.bytes)
                        .sum();
                    let wants_raster = tile.state() == TileState::NeedsRaster
                        && tile.in_flight().is_none()
                        && resolution != TileResolution::NonIdeal
                        && !layer.pile().is_stale(&tile.layer_rect());
                    candidates.push(TileCandidate {
                        tile: tile.id(),
                        priority,
                        required_for_activation: tile.required_for_activation(),
                        held_bytes,
                        locked_bytes,
                        raster_bytes: if wants_raster {
                            tile.memory_bytes(format)
                        } else {
                            0
                        },
                        in_flight: tile.in_flight(),
                        resources,
                    });
                }
            }
        }
        candidates
    }

    /// Greedy walk over `candidates` in priority order. After the first
    /// tile that does not fit, nothing further is granted memory. Bytes no
    /// eviction can return this pass are charged before the walk starts.
    fn assign_memory(
        &mut self,
        candidates: &[TileCandidate],
        report: &mut PrepareTilesReport,
    ) -> Vec<bool> {
        let limit = self.budget.limit();
        let policy = self.settings.memory_limit_policy;
        let tracked: u64 = candidates.iter().map(|candidate| candidate.held_bytes).sum();
        // Resources no tile references any more but that are still charged,
        // such as locked ones waiting for unlock.
        let untracked = self.budget.used().saturating_sub(tracked);
        let pinned: u64 = candidates.iter().map(TileCandidate::pinned_bytes).sum();
        let mut granted_bytes = untracked + pinned;
        let mut cutoff = false;
        let mut granted = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let need = candidate.held_bytes + candidate.raster_bytes - candidate.pinned_bytes();
            let allowed = policy.allows(candidate.priority.bin);
            let fits = need == 0 || (!cutoff && granted_bytes.saturating_add(need) <= limit);
            if allowed && !fits {
                cutoff = true;
            }
            let grant = allowed && fits;
            if grant {
                granted_bytes += need;
            } else if candidate.raster_bytes > 0 {
                report.memory_denied += 1;
            }
            granted.push(grant);
        }
        self.stats.memory_denied += report.memory_denied as u64;
        granted
    }

    /// Evicts tiles that lost their grant, then keeps evicting in eviction
    /// order while the budget is over its limit.
    fn reclaim_memory(
        &mut self,
        layers: &mut BTreeMap<LayerId, PictureLayer>,
        candidates: &[TileCandidate],
        granted: &mut [bool],
        report: &mut PrepareTilesReport,
    ) {
        let mut evicted = vec![false; candidates.len()];
        for (index, candidate) in candidates.iter().enumerate() {
            if !granted[index]
                && candidate.is_evictable()
                && self.evict_tile(layers, candidate.tile)
            {
                evicted[index] = true;
                report.tiles_evicted += 1;
            }
        }
        if !self.budget.is_over_limit() {
            return;
        }

        let tree_priority = self.settings.tree_priority;
        let mut order: Vec<usize> = (0..candidates.len())
            .filter(|&index| !evicted[index] && candidates[index].is_evictable())
            .collect();
        order.sort_by(|&a, &b| eviction_order(&candidates[a], &candidates[b], tree_priority));
        for index in order {
            if !self.budget.is_over_limit() {
                break;
            }
            if self.evict_tile(layers, candidates[index].tile) {
                granted[index] = false;
                report.tiles_evicted += 1;
            }
        }
        if self.budget.is_over_limit() {
            tracing::warn!(
                used = self.budget.used(),
                limit = self.budget.limit(),
                "tile memory over limit; remaining resources are locked, in flight or required"
            );
        }
    }

    /// Gives every tile waiting for raster whose recording is a single
    /// color that color as pending content. Each content generation is
    /// analyzed once.
    fn analyze_solid_color_tiles(&mut self, layers: &mut BTreeMap<LayerId, PictureLayer>) {
        let mut solid = 0;
        let mut released = Vec::new();
        for layer in layers.values_mut() {
            let snapshot = layer.snapshot();
            let queued = layer.pile().invalidation().to_vec();
            for tiling in layer.tiling_set_mut().tilings_mut() {
                if tiling.resolution() == TileResolution::NonIdeal {
                    continue;
                }
                for tile in tiling.tiles_mut() {
                    if tile.state() != TileState::NeedsRaster
                        || tile.in_flight().is_some()
                        || !tile.needs_solid_color_analysis()
                        || queued.iter().any(|rect| rect.intersects(&tile.layer_rect()))
                    {
                        continue;
                    }
                    match snapshot.solid_color(tile.content_rect(), tile.contents_scale()) {
                        Some(color) => {
                            if let Some(replaced) = tile.install_solid_color(color) {
                                released.push(ReleasedResource::pending(replaced));
                            }
                            solid += 1;
                        }
                        None => tile.mark_solid_color_analyzed(),
                    }
                }
            }
        }
        self.release_all(released);
        if solid > 0 {
            self.stats.solid_color_tiles += solid;
            tracing::trace!(solid, "tiles resolved to a solid color");
        }
    }

    fn evict_tile(&mut self, layers: &mut BTreeMap<LayerId, PictureLayer>, id: TileId) -> bool {
        let Some(tile) = tile_mut(layers, id) else {
            return false;
        };
        if tile.in_flight().is_some() {
            return false;
        }
        let released: Vec<ReleasedResource> = tile.evict().collect();
        self.release_all(released);
        self.stats.tiles_evicted += 1;
        tracing::trace!(tile = ?id, "tile evicted");
        true
    }

    fn start_raster(
        &mut self,
        layers: &mut BTreeMap<LayerId, PictureLayer>,
        id: TileId,
        snapshots: &mut HashMap<LayerId, PileSnapshot>,
    ) -> Option<RasterTask> {
        let layer = layers.get_mut(&id.layer)?;
        let snapshot = snapshots
            .entry(id.layer)
            .or_insert_with(|| layer.snapshot())
            .clone();
        let tile = layer.tiling_set_mut().tile_mut(id)?;
        let choice = if tile.force_software() {
            BackendChoice::Software
        } else {
            BackendChoice::Preferred
        };

        let resource = match self.resources.allocate(
            &mut self.budget,
            tile.content_rect().size(),
            choice,
        ) {
            Ok(resource) => resource,
            Err(ResourceError::OutOfMemory {
                requested,
                available,
            }) => {
                let error = RasterError::OutOfMemory {
                    requested,
                    available,
                };
                tracing::warn!(tile = ?id, %error, "raster deferred");
                self.stats.record_error(&error);
                return None;
            }
            Err(error) => {
                let error = RasterError::DriverFailure(error.to_string());
                tracing::warn!(
                    tile = ?id,
                    %error,
                    "raster allocation failed, switching tile to software"
                );
                self.stats.record_error(&error);
                tile.set_force_software();
                return None;
            }
        };

        let task_id = RasterTaskId(self.next_task_id);
        self.next_task_id += 1;
        tile.begin_raster(task_id);
        let task = RasterTask {
            id: task_id,
            tile: id,
            snapshot,
            content_rect: tile.content_rect(),
            contents_scale: tile.contents_scale(),
            source_generation: tile.content_generation(),
            cancel: CancellationToken::new(),
        };
        self.in_flight.insert(
            task_id,
            InFlightRaster {
                task: task.clone(),
                resource,
            },
        );
        self.task_log
            .push(TaskLogEntry::Submitted { task: task_id, tile: id });
        self.stats.tasks_scheduled += 1;
        self.idle_notified = false;
        tracing::trace!(task = ?task_id, tile = ?id, ?resource, "raster task dispatched");
        Some(task)
    }

    fn process_completions(
        &mut self,
        layers: &mut BTreeMap<LayerId, PictureLayer>,
        completions: Vec<RasterCompletion>,
    ) -> usize {
        let processed = completions.len();
        for completion in completions {
            self.install_completion(layers, completion);
        }
        if processed > 0 {
            self.update_notifications(layers);
            tracing::debug!(
                processed,
                in_flight = self.in_flight.len(),
                "raster completions processed"
            );
        }
        processed
    }

    fn install_completion(
        &mut self,
        layers: &mut BTreeMap<LayerId, PictureLayer>,
        completion: RasterCompletion,
    ) {
        let task_id = completion.task_id;
        let Some(raster) = self.in_flight.remove(&task_id) else {
            tracing::warn!(task = ?task_id, "completion for unknown raster task dropped");
            return;
        };
        self.task_log.push(TaskLogEntry::Finished {
            task: task_id,
            tile: completion.tile,
        });
        let resource = raster.resource;

        let tile =
            tile_mut(layers, completion.tile).filter(|tile| tile.in_flight() == Some(task_id));
        let Some(tile) = tile else {
            // Pruned or rebuilt since dispatch.
            self.stats.record_error(&RasterError::RasterCancelled);
            self.release_in_flight(resource);
            return;
        };

        let (bitmap, duration) = match completion.outcome {
            RasterOutcome::Completed { bitmap, duration } if !raster.task.cancel.is_cancelled() => {
                (bitmap, duration)
            }
            _ => {
                tracing::trace!(
                    task = ?task_id,
                    tile = ?completion.tile,
                    "cancelled raster discarded"
                );
                self.stats.record_error(&RasterError::RasterCancelled);
                tile.abort_raster(task_id);
                self.release_in_flight(resource);
                return;
            }
        };
        self.stats.raster_time += duration;

        if completion.source_generation != tile.content_generation() {
            let error = RasterError::StaleContent {
                rastered: completion.source_generation,
                current: tile.content_generation(),
            };
            tracing::trace!(
                task = ?task_id,
                tile = ?completion.tile,
                %error,
                "stale raster discarded"
            );
            self.stats.record_error(&error);
            tile.abort_raster(task_id);
            self.release_in_flight(resource);
            return;
        }

        if let Err(error) = self.resources.upload(resource, &bitmap) {
            let error = RasterError::DriverFailure(error.to_string());
            tracing::warn!(
                tile = ?completion.tile,
                %error,
                "raster upload failed, tile falls back to software raster"
            );
            self.stats.record_error(&error);
            tile.set_force_software();
            tile.abort_raster(task_id);
            self.release_in_flight(resource);
            return;
        }

        if let Err(error) = self.resources.add_ref(resource, ResourceRef::PendingTree) {
            panic!("in-flight resource {resource:?} vanished before install: {error}");
        }
        self.release_in_flight(resource);
        if let Some(replaced) = tile.finish_raster(task_id, resource) {
            self.release(ReleasedResource::pending(replaced));
        }
        self.stats.tasks_completed += 1;
        tracing::trace!(task = ?task_id, tile = ?completion.tile, ?duration, "raster installed");
    }

    /// For tasks that will never report back.
    fn discard_unstarted(
        &mut self,
        layers: &mut BTreeMap<LayerId, PictureLayer>,
        task_id: RasterTaskId,
    ) {
        let Some(tile_id) = self.forget_in_flight(task_id) else {
            return;
        };
        if let Some(tile) = tile_mut(layers, tile_id)
            && tile.in_flight() == Some(task_id)
        {
            tile.abort_raster(task_id);
        }
    }

    fn forget_in_flight(&mut self, task_id: RasterTaskId) -> Option<TileId> {
        let raster = self.in_flight.remove(&task_id)?;
        let tile = raster.task.tile;
        self.task_log.push(TaskLogEntry::Finished { task: task_id, tile });
        self.stats.record_error(&RasterError::RasterCancelled);
        self.release_in_flight(raster.resource);
        tracing::trace!(task = ?task_id, ?tile, "raster task cancelled before start");
        Some(tile)
    }

    fn promote(&mut self, activation: TileActivation) {
        if let Some(promoted) = activation.promoted {
            if let Err(error) = self.resources.add_ref(promoted, ResourceRef::ActiveTree) {
                panic!("activated resource {promoted:?} is not in the provider: {error}");
            }
            self.release(ReleasedResource::pending(promoted));
        }
        if let Some(replaced) = activation.replaced {
            self.release(ReleasedResource::active(replaced));
        }
    }

    fn release_all(&mut self, released: impl IntoIterator<Item = ReleasedResource>) {
        for released in released {
            self.release(released);
        }
    }

    fn release(&mut self, released: ReleasedResource) {
        let kind = match released.tree {
            WhichTree::Active => ResourceRef::ActiveTree,
            WhichTree::Pending => ResourceRef::PendingTree,
        };
        if let Err(error) = self
            .resources
            .release_ref(&mut self.budget, released.resource, kind)
        {
            panic!(
                "tile released {kind:?} reference on {:?} the provider does not hold: {error}",
                released.resource
            );
        }
    }

    fn release_in_flight(&mut self, resource: ResourceId) {
        if let Err(error) =
            self.resources
                .release_ref(&mut self.budget, resource, ResourceRef::InFlightRaster)
        {
            panic!("in-flight reference on {resource:?} already gone: {error}");
        }
    }

    fn update_notifications(&mut self, layers: &BTreeMap<LayerId, PictureLayer>) {
        if self.is_ready_to_activate(layers) {
            if !self.ready_notified {
                self.ready_notified = true;
                self.events.push(TileManagerEvent::ReadyToActivate);
            }
        } else {
            self.ready_notified = false;
        }

        if self.in_flight.is_empty() {
            if !self.idle_notified {
                self.idle_notified = true;
                self.events.push(TileManagerEvent::AllTileTasksCompleted);
            }
        } else {
            self.idle_notified = false;
        }
    }
}

fn tile_mut(layers: &mut BTreeMap<LayerId, PictureLayer>, id: TileId) -> Option<&mut Tile> {
    layers.get_mut(&id.layer)?.tiling_set_mut().tile_mut(id)
}
