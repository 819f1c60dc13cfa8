use std::path::{Path, PathBuf};
use std::time::Duration;

use frame_scheduler::FrameSchedulerConfig;
use raster_protocol::{IntSize, RasterBackendKind, ResourceFormat, TreePriority};
use raster_worker_pool::RasterWorkerPoolConfig;
use serde::{Deserialize, Serialize};
use tile_manager::{MemoryLimitPolicy, TileManagerSettings};
use tiles::TilingSetSettings;

#[derive(thiserror::Error, Debug)]
pub enum SettingsError {
    #[error("read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse settings JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Everything tunable about the raster pipeline. Missing JSON fields take
/// their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompositorSettings {
    pub tile_size: IntSize,
    pub memory_limit_bytes: u64,
    pub memory_limit_policy: MemoryLimitPolicy,
    pub tree_priority: TreePriority,
    pub resource_format: ResourceFormat,
    pub raster_backend: RasterBackendKind,
    /// Zero runs raster work only when the embedder asks for it.
    pub raster_thread_count: usize,
    pub completion_capacity: usize,
    pub soon_margin_px: i32,
    pub eventually_margin_px: i32,
    pub skewport_target_time_ms: u64,
    pub skewport_extrapolation_limit_px: f32,
    pub activation_timeout_ms: u64,
    pub low_res_contents_scale_factor: f32,
    pub enable_low_res_tiling: bool,
    pub minimum_contents_scale: f32,
    pub max_non_ideal_tilings: usize,
    pub max_tiles_for_interest_area: usize,
    pub solid_color_analysis: bool,
    pub task_log_capacity: usize,
}

impl Default for CompositorSettings {
    fn default() -> Self {
        let tiling = TilingSetSettings::default();
        let tile_manager = TileManagerSettings::default();
        let pool = RasterWorkerPoolConfig::default();
        let scheduler = FrameSchedulerConfig::default();
        Self {
            tile_size: tiling.tile_size,
            memory_limit_bytes: tile_manager.memory_limit_bytes,
            memory_limit_policy: tile_manager.memory_limit_policy,
            tree_priority: tile_manager.tree_priority,
            resource_format: tile_manager.format,
            raster_backend: RasterBackendKind::Software,
            raster_thread_count: pool.thread_count,
            completion_capacity: pool.completion_capacity,
            soon_margin_px: tiling.soon_margin_px,
            eventually_margin_px: tiling.eventually_margin_px,
            skewport_target_time_ms: tiling.skewport_target_time.as_millis() as u64,
            skewport_extrapolation_limit_px: tiling.skewport_extrapolation_limit_px,
            activation_timeout_ms: scheduler.activation_timeout.as_millis() as u64,
            low_res_contents_scale_factor: tiling.low_res_contents_scale_factor,
            enable_low_res_tiling: tiling.enable_low_res_tiling,
            minimum_contents_scale: tiling.minimum_contents_scale,
            max_non_ideal_tilings: tiling.max_non_ideal_tilings,
            max_tiles_for_interest_area: tiling.max_tiles_for_interest_area,
            solid_color_analysis: tile_manager.solid_color_analysis,
            task_log_capacity: tile_manager.task_log_capacity,
        }
    }
}

impl CompositorSettings {
    pub fn from_json_str(json: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_path(path: &Path) -> Result<Self, SettingsError> {
        let json = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.tile_size.width <= 0 || self.tile_size.height <= 0 {
            return Err(invalid(
                "tile_size",
                format!("{:?} must be positive in both dimensions", self.tile_size),
            ));
        }
        if self.memory_limit_bytes == 0 {
            return Err(invalid("memory_limit_bytes", "must be non-zero".to_owned()));
        }
        if self.completion_capacity == 0 {
            return Err(invalid("completion_capacity", "must be non-zero".to_owned()));
        }
        if self.soon_margin_px < 0 {
            return Err(invalid(
                "soon_margin_px",
                format!("{} is negative", self.soon_margin_px),
            ));
        }
        if self.eventually_margin_px < self.soon_margin_px {
            return Err(invalid(
                "eventually_margin_px",
                format!(
                    "{} is smaller than soon_margin_px {}",
                    self.eventually_margin_px, self.soon_margin_px
                ),
            ));
        }
        let skew_limit = self.skewport_extrapolation_limit_px;
        if skew_limit.is_nan() || skew_limit < 0.0 {
            return Err(invalid(
                "skewport_extrapolation_limit_px",
                format!("{skew_limit} is not a non-negative number"),
            ));
        }
        let low_res_factor = self.low_res_contents_scale_factor;
        if low_res_factor.is_nan() || low_res_factor <= 0.0 || low_res_factor >= 1.0 {
            return Err(invalid(
                "low_res_contents_scale_factor",
                format!("{low_res_factor} is outside (0, 1)"),
            ));
        }
        if self.max_tiles_for_interest_area == 0 {
            return Err(invalid(
                "max_tiles_for_interest_area",
                "must be non-zero".to_owned(),
            ));
        }
        if self.minimum_contents_scale.is_nan() || self.minimum_contents_scale <= 0.0 {
            return Err(invalid(
                "minimum_contents_scale",
                format!("{} is not positive", self.minimum_contents_scale),
            ));
        }
        Ok(())
    }

    pub fn tiling_set_settings(&self) -> TilingSetSettings {
        TilingSetSettings {
            tile_size: self.tile_size,
            soon_margin_px: self.soon_margin_px,
            eventually_margin_px: self.eventually_margin_px,
            skewport_target_time: Duration::from_millis(self.skewport_target_time_ms),
            skewport_extrapolation_limit_px: self.skewport_extrapolation_limit_px,
            low_res_contents_scale_factor: self.low_res_contents_scale_factor,
            enable_low_res_tiling: self.enable_low_res_tiling,
            minimum_contents_scale: self.minimum_contents_scale,
            max_non_ideal_tilings: self.max_non_ideal_tilings,
            max_tiles_for_interest_area: self.max_tiles_for_interest_area,
        }
    }

    pub fn tile_manager_settings(&self) -> TileManagerSettings {
        TileManagerSettings {
            format: self.resource_format,
            memory_limit_bytes: self.memory_limit_bytes,
            memory_limit_policy: self.memory_limit_policy,
            tree_priority: self.tree_priority,
            task_log_capacity: self.task_log_capacity,
            solid_color_analysis: self.solid_color_analysis,
        }
    }

    pub fn raster_worker_pool_config(&self) -> RasterWorkerPoolConfig {
        RasterWorkerPoolConfig {
            thread_count: self.raster_thread_count,
            completion_capacity: self.completion_capacity,
        }
    }

    pub fn frame_scheduler_config(&self) -> FrameSchedulerConfig {
        FrameSchedulerConfig {
            activation_timeout: Duration::from_millis(self.activation_timeout_ms),
        }
    }
}

fn invalid(field: &'static str, reason: String) -> SettingsError {
    SettingsError::Invalid { field, reason }
}
