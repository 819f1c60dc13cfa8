//! Layer registry and frame loop on top of the tile scheduler.
//!
//! The embedder mutates layers (bounds, scale, viewport, invalidations),
//! calls [`Compositor::commit`] to turn those changes into a new pending
//! tree and drives [`Compositor::begin_frame`] once per frame. The frame
//! installs finished rasters, schedules new ones and activates the pending
//! tree when its required tiles are in, or when it waited too long.

mod settings;

pub use settings::{CompositorSettings, SettingsError};

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use frame_scheduler::{ActivationReason, FrameScheduler, FrameSchedulerInput};
use picture_pile::ContentPainter;
use raster_protocol::{
    Bitmap, IntRect, IntSize, LayerId, RasterBackendKind, ResourceId, Rgba, WhichTree,
};
use raster_worker_pool::PoolStartError;
use resource_provider::{BackingStore, RasterBackend, ResourceError, SoftwareBackend};
use tile_manager::{
    GlobalTileState, MemoryStats, PrepareTilesReport, RasterStats, TileManager, TileManagerEvent,
};
use tiles::{PictureLayer, TileContent, TileDrawQuad, Viewport};

#[derive(thiserror::Error, Debug)]
pub enum CompositorError {
    #[error("no layer with id {0:?}")]
    UnknownLayer(LayerId),
    #[error("layer {0:?} already exists")]
    DuplicateLayer(LayerId),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("raster worker pool failed to start: {0}")]
    PoolStart(#[from] PoolStartError),
    #[error("draw path resource access failed: {0}")]
    Resource(#[from] ResourceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompositorEvent {
    /// Every tile the pending tree requires has content.
    ReadyToActivate,
    /// The raster pool has nothing queued or running.
    AllTileTasksCompleted,
    DidActivate {
        frame_sequence_id: u64,
        reason: ActivationReason,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub layers: usize,
    pub recorded_rects: usize,
    pub invalidated_tiles: usize,
    pub tiles_created: usize,
    pub tilings_created: usize,
    pub tilings_destroyed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOutput {
    pub frame_sequence_id: u64,
    /// Raster completions installed at the start of the frame.
    pub completed: usize,
    pub prepare: PrepareTilesReport,
    pub activated: Option<ActivationReason>,
    pub waiting_for_tiles: bool,
}

pub struct Compositor {
    settings: CompositorSettings,
    layers: BTreeMap<LayerId, PictureLayer>,
    tile_manager: TileManager,
    scheduler: FrameScheduler,
    pending_tree_created_at: Option<Instant>,
    next_frame_sequence_id: u64,
    events: Vec<CompositorEvent>,
}

impl std::fmt::Debug for Compositor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Compositor")
            .field("layers", &self.layers.keys().collect::<Vec<_>>())
            .field("tile_manager", &self.tile_manager)
            .field("pending_tree_created_at", &self.pending_tree_created_at)
            .finish_non_exhaustive()
    }
}

impl Compositor {
    /// Builds the pipeline with the backend `settings` asks for. A GPU
    /// request that cannot be met falls back to software.
    pub fn new(settings: CompositorSettings) -> Result<Self, CompositorError> {
        let backend = create_backend(settings.raster_backend);
        Self::with_backend(settings, backend)
    }

    pub fn with_backend(
        settings: CompositorSettings,
        backend: Box<dyn RasterBackend>,
    ) -> Result<Self, CompositorError> {
        settings.validate()?;
        let tile_manager = TileManager::new(
            settings.tile_manager_settings(),
            backend,
            settings.raster_worker_pool_config(),
        )?;
        tracing::info!(
            backend = ?tile_manager.resource_provider().preferred_backend(),
            threads = settings.raster_thread_count,
            memory_limit = settings.memory_limit_bytes,
            "compositor started"
        );
        Ok(Self {
            scheduler: FrameScheduler::new(settings.frame_scheduler_config()),
            settings,
            layers: BTreeMap::new(),
            tile_manager,
            pending_tree_created_at: None,
            next_frame_sequence_id: 1,
            events: Vec::new(),
        })
    }

    pub fn settings(&self) -> &CompositorSettings {
        &self.settings
    }

    pub fn tile_manager(&self) -> &TileManager {
        &self.tile_manager
    }

    pub fn raster_stats(&self) -> &RasterStats {
        self.tile_manager.raster_stats()
    }

    pub fn memory_stats(&self) -> MemoryStats {
        self.tile_manager.memory_stats()
    }

    pub fn forced_activations(&self) -> u64 {
        self.scheduler.forced_activations()
    }

    pub fn layer(&self, id: LayerId) -> Option<&PictureLayer> {
        self.layers.get(&id)
    }

    pub fn layer_ids(&self) -> impl Iterator<Item = LayerId> + '_ {
        self.layers.keys().copied()
    }

    /// A pending tree has been committed and not yet activated.
    pub fn has_pending_tree(&self) -> bool {
        self.pending_tree_created_at.is_some()
    }

    pub fn is_ready_to_activate(&self) -> bool {
        self.tile_manager.is_ready_to_activate(&self.layers)
    }

    pub fn take_events(&mut self) -> Vec<CompositorEvent> {
        std::mem::take(&mut self.events)
    }

    /// Registers a layer. Nothing is recorded or tiled until the next
    /// [`Self::commit`].
    pub fn add_layer(
        &mut self,
        id: LayerId,
        bounds: IntSize,
        painter: Box<dyn ContentPainter + Send>,
    ) -> Result<(), CompositorError> {
        if self.layers.contains_key(&id) {
            return Err(CompositorError::DuplicateLayer(id));
        }
        let layer = PictureLayer::new(id, bounds, painter, self.settings.tiling_set_settings());
        self.layers.insert(id, layer);
        tracing::debug!(layer = ?id, ?bounds, "layer added");
        Ok(())
    }

    /// Drops the layer and every tile resource it held.
    pub fn remove_layer(&mut self, id: LayerId) -> Result<(), CompositorError> {
        let mut layer = self
            .layers
            .remove(&id)
            .ok_or(CompositorError::UnknownLayer(id))?;
        self.tile_manager.release_layer(&mut layer);
        tracing::debug!(layer = ?id, "layer removed");
        Ok(())
    }

    pub fn set_layer_bounds(
        &mut self,
        id: LayerId,
        bounds: IntSize,
    ) -> Result<(), CompositorError> {
        self.layer_mut(id)?.set_bounds(bounds);
        Ok(())
    }

    pub fn set_ideal_contents_scale(
        &mut self,
        id: LayerId,
        ideal_scale: f32,
    ) -> Result<(), CompositorError> {
        self.layer_mut(id)?.set_ideal_contents_scale(ideal_scale);
        Ok(())
    }

    pub fn set_viewport(&mut self, id: LayerId, viewport: Viewport) -> Result<(), CompositorError> {
        self.layer_mut(id)?.set_viewport(viewport);
        Ok(())
    }

    /// Marks layer content under `layer_rect` as changed. Re-recorded on
    /// the next commit.
    pub fn invalidate(&mut self, id: LayerId, layer_rect: IntRect) -> Result<(), CompositorError> {
        self.layer_mut(id)?.invalidate(layer_rect);
        Ok(())
    }

    /// New memory limit, policy and tree priority, enforced on the next
    /// frame.
    pub fn set_global_tile_state(&mut self, state: GlobalTileState) {
        self.settings.memory_limit_bytes = state.memory_limit_bytes;
        self.settings.memory_limit_policy = state.memory_limit_policy;
        self.settings.tree_priority = state.tree_priority;
        self.tile_manager.set_global_state(state);
    }

    /// Turns the accumulated layer changes into a new pending tree. The
    /// activation deadline runs from the first commit the active tree has
    /// not seen yet.
    #[tracing::instrument(skip_all)]
    pub fn commit(&mut self, now: Instant) -> CommitReport {
        let mut report = CommitReport::default();
        for layer in self.layers.values_mut() {
            let commit = self.tile_manager.commit_layer(layer);
            report.layers += 1;
            report.recorded_rects += commit.recorded.len();
            report.invalidated_tiles += commit.invalidated_tiles;
            report.tiles_created += commit.tilings.tiles_created;
            report.tilings_created += commit.tilings.tilings_created;
            report.tilings_destroyed += commit.tilings.tilings_destroyed;
        }
        if self.pending_tree_created_at.is_none() {
            self.pending_tree_created_at = Some(now);
        }
        tracing::debug!(
            layers = report.layers,
            recorded = report.recorded_rects,
            invalidated = report.invalidated_tiles,
            tiles_created = report.tiles_created,
            "pending tree committed"
        );
        report
    }

    /// One frame: install finished rasters, schedule the next batch and
    /// decide whether the pending tree activates.
    #[tracing::instrument(skip_all)]
    pub fn begin_frame(&mut self, now: Instant) -> FrameOutput {
        let frame_sequence_id = self.next_frame_sequence_id;
        self.next_frame_sequence_id += 1;

        let completed = self.tile_manager.check_for_completed_tasks(&mut self.layers);
        let prepare = self.tile_manager.prepare_tiles(&mut self.layers);
        self.forward_tile_manager_events();

        let decision = self.scheduler.schedule_frame(FrameSchedulerInput {
            frame_sequence_id,
            now,
            pending_tree_created_at: self.pending_tree_created_at,
            ready_to_activate: self.is_ready_to_activate(),
        });
        match decision.activate {
            Some(reason) => {
                let promoted = self.tile_manager.activate(&mut self.layers);
                self.pending_tree_created_at = None;
                self.events.push(CompositorEvent::DidActivate {
                    frame_sequence_id,
                    reason,
                });
                tracing::info!(
                    frame = frame_sequence_id,
                    ?reason,
                    promoted,
                    "pending tree activated"
                );
            }
            // With no commit outstanding, late rasters go straight to the
            // active tree.
            None if self.pending_tree_created_at.is_none() => {
                self.tile_manager.activate(&mut self.layers);
            }
            None => {}
        }

        FrameOutput {
            frame_sequence_id,
            completed,
            prepare,
            activated: decision.activate,
            waiting_for_tiles: decision.waiting_for_tiles,
        }
    }

    /// Blocks up to `timeout` for raster results and installs what arrived.
    pub fn wait_for_raster(&mut self, timeout: Duration) -> usize {
        let installed = self
            .tile_manager
            .wait_for_completed_tasks(&mut self.layers, timeout);
        self.forward_tile_manager_events();
        installed
    }

    /// Runs queued raster work on the calling thread, for pools configured
    /// without threads.
    pub fn run_raster_tasks_inline(&mut self, max_tasks: usize) -> usize {
        self.tile_manager.run_raster_tasks_inline(max_tasks)
    }

    /// Active-tree quads covering `layer_rect`. Quads without a source are
    /// drawn as checkerboard.
    pub fn tiles_for_region(
        &self,
        id: LayerId,
        layer_rect: IntRect,
    ) -> Result<Vec<TileDrawQuad>, CompositorError> {
        let layer = self.layers.get(&id).ok_or(CompositorError::UnknownLayer(id))?;
        Ok(layer.tiles_for_region(layer_rect, WhichTree::Active))
    }

    /// Hands every active-tree quad over `layer_rect` to `draw` together
    /// with its pixel storage. Resources stay locked until `draw` has seen
    /// all of them. Solid-color and checkerboard quads come without storage.
    pub fn draw_layer_region(
        &mut self,
        id: LayerId,
        layer_rect: IntRect,
        mut draw: impl FnMut(&TileDrawQuad, Option<&BackingStore>),
    ) -> Result<usize, CompositorError> {
        let quads = self.tiles_for_region(id, layer_rect)?;
        let resources: Vec<ResourceId> = quads
            .iter()
            .filter_map(|quad| quad.source?.content.resource())
            .collect();
        self.lock_resources(&resources)?;

        let provider = self.tile_manager.resource_provider();
        for quad in &quads {
            let store = quad
                .source
                .and_then(|source| source.content.resource())
                .and_then(|resource| provider.store(resource));
            draw(quad, store);
        }

        for resource in resources {
            self.tile_manager.unlock_resource(resource)?;
        }
        Ok(quads.len())
    }

    /// Locks all of `resources` or none of them.
    fn lock_resources(&mut self, resources: &[ResourceId]) -> Result<(), CompositorError> {
        for (locked, resource) in resources.iter().enumerate() {
            let result = self.tile_manager.lock_resource(*resource).map(|_| ());
            if let Err(error) = result {
                for earlier in &resources[..locked] {
                    if let Err(unlock_error) = self.tile_manager.unlock_resource(*earlier) {
                        tracing::warn!(
                            resource = ?earlier,
                            %unlock_error,
                            "unlock after failed draw lock"
                        );
                    }
                }
                return Err(error.into());
            }
        }
        Ok(())
    }

    /// Composes the active tree's pixels under `layer_rect` into a bitmap.
    /// Lower-resolution tiles are scaled up nearest-neighbour; missing
    /// tiles and GPU-resident ones stay transparent.
    pub fn compose_rgba8(
        &mut self,
        id: LayerId,
        layer_rect: IntRect,
    ) -> Result<Bitmap, CompositorError> {
        let width = u32::try_from(layer_rect.width).unwrap_or(0);
        let height = u32::try_from(layer_rect.height).unwrap_or(0);
        let mut output = Bitmap::new_transparent(width, height);
        let format = self.tile_manager.resource_provider().format();
        let mut decoded: HashMap<ResourceId, Option<Vec<u8>>> = HashMap::new();

        self.draw_layer_region(id, layer_rect, |quad, store| {
            let Some(source) = quad.source else {
                return;
            };
            let Some(region) = quad.layer_rect.intersection(&layer_rect) else {
                return;
            };
            let resource = match source.content {
                TileContent::SolidColor(color) => {
                    output.fill_rect(region.offset(-layer_rect.x, -layer_rect.y), color);
                    return;
                }
                TileContent::Resource(resource) => resource,
            };
            let Some(store) = store else {
                return;
            };
            let Some(pixels) = decoded
                .entry(resource)
                .or_insert_with(|| store.read_rgba8(format))
            else {
                return;
            };
            let tile_rect = source.tile_content_rect;
            for y in region.y..region.bottom() {
                let content_y = ((y as f32 + 0.5) * source.contents_scale) as i32 - tile_rect.y;
                let content_y = content_y.clamp(0, tile_rect.height - 1);
                for x in region.x..region.right() {
                    let content_x =
                        ((x as f32 + 0.5) * source.contents_scale) as i32 - tile_rect.x;
                    let content_x = content_x.clamp(0, tile_rect.width - 1);
                    let offset = ((content_y * tile_rect.width + content_x) * 4) as usize;
                    let Some(texel) = pixels.get(offset..offset + 4) else {
                        continue;
                    };
                    output.put_pixel(
                        (x - layer_rect.x) as u32,
                        (y - layer_rect.y) as u32,
                        Rgba::new(texel[0], texel[1], texel[2], texel[3]),
                    );
                }
            }
        })?;
        Ok(output)
    }

    fn layer_mut(&mut self, id: LayerId) -> Result<&mut PictureLayer, CompositorError> {
        self.layers
            .get_mut(&id)
            .ok_or(CompositorError::UnknownLayer(id))
    }

    fn forward_tile_manager_events(&mut self) {
        self.events
            .extend(self.tile_manager.take_events().into_iter().map(|event| match event {
                TileManagerEvent::ReadyToActivate => CompositorEvent::ReadyToActivate,
                TileManagerEvent::AllTileTasksCompleted => CompositorEvent::AllTileTasksCompleted,
            }));
    }
}

fn create_backend(kind: RasterBackendKind) -> Box<dyn RasterBackend> {
    match kind {
        RasterBackendKind::Software => Box::new(SoftwareBackend),
        #[cfg(feature = "gpu")]
        RasterBackendKind::Gpu => match resource_provider::GpuRasterBackend::request_default() {
            Ok(backend) => Box::new(backend),
            Err(error) => {
                tracing::warn!(%error, "gpu raster backend unavailable, using software");
                Box::new(SoftwareBackend)
            }
        },
        #[cfg(not(feature = "gpu"))]
        RasterBackendKind::Gpu => {
            tracing::warn!("built without the gpu feature, using software raster");
            Box::new(SoftwareBackend)
        }
    }
}

#[cfg(test)]
mod tests;
