use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use compositor::{Compositor, CompositorSettings};
use picture_pile::PaintCommand;
use raster_protocol::{IntRect, IntSize, LayerId, Rgba, Vector2};
use tiles::Viewport;
use tracing_subscriber::EnvFilter;

const LAYER: LayerId = LayerId(1);
const CELL: i32 = 128;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Scroll a procedurally painted layer through the tile scheduler"
)]
struct Arguments {
    /// Settings JSON. Defaults apply when omitted.
    #[arg(long, short = 's', value_parser)]
    settings: Option<PathBuf>,
    /// Frames to simulate.
    #[arg(long, default_value_t = 240)]
    frames: u32,
    #[arg(long, default_value_t = 2048)]
    layer_width: i32,
    #[arg(long, default_value_t = 16384)]
    layer_height: i32,
    #[arg(long, default_value_t = 800)]
    viewport_width: i32,
    #[arg(long, default_value_t = 600)]
    viewport_height: i32,
    /// Vertical scroll speed in layer pixels per second.
    #[arg(long, default_value_t = 1200.0)]
    velocity: f32,
    #[arg(long, default_value_t = 16)]
    frame_interval_ms: u64,
    /// Repaint the visible area every N frames. Zero disables.
    #[arg(long, default_value_t = 45)]
    invalidate_every: u32,
    /// Write the final composed viewport to this PNG.
    #[arg(long, short = 'o', value_parser)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let arguments = Arguments::parse();

    let settings = match &arguments.settings {
        Some(path) => CompositorSettings::from_path(path)
            .with_context(|| format!("load settings {}", path.display()))?,
        None => CompositorSettings::default(),
    };
    let mut compositor = Compositor::new(settings).context("start compositor")?;

    let repaint_generation = Arc::new(AtomicU32::new(0));
    let painter_generation = Arc::clone(&repaint_generation);
    compositor
        .add_layer(
            LAYER,
            IntSize::new(arguments.layer_width, arguments.layer_height),
            Box::new(move |rect: IntRect| {
                paint_cells(rect, painter_generation.load(Ordering::Relaxed))
            }),
        )
        .context("add layer")?;

    let frame_interval = Duration::from_millis(arguments.frame_interval_ms);
    let max_scroll = (arguments.layer_height - arguments.viewport_height).max(0);
    let start = Instant::now();
    let mut visible = IntRect::new(0, 0, arguments.viewport_width, arguments.viewport_height);

    for frame in 0..arguments.frames {
        let elapsed = frame_interval.as_secs_f32() * frame as f32;
        let scroll = ((arguments.velocity * elapsed) as i32).min(max_scroll);
        let velocity = if scroll < max_scroll {
            arguments.velocity
        } else {
            0.0
        };
        visible.y = scroll;
        compositor
            .set_viewport(
                LAYER,
                Viewport {
                    visible_rect: visible,
                    scroll_velocity: Vector2::new(0.0, velocity),
                },
            )
            .context("set viewport")?;
        if arguments.invalidate_every > 0 && frame > 0 && frame % arguments.invalidate_every == 0 {
            repaint_generation.fetch_add(1, Ordering::Relaxed);
            compositor
                .invalidate(LAYER, visible)
                .context("invalidate visible area")?;
        }

        let commit = compositor.commit(Instant::now());
        let output = compositor.begin_frame(Instant::now());
        let memory = compositor.memory_stats();
        tracing::info!(
            frame = output.frame_sequence_id,
            scroll,
            invalidated = commit.invalidated_tiles,
            completed = output.completed,
            scheduled = output.prepare.tasks_scheduled,
            denied = output.prepare.memory_denied,
            evicted = output.prepare.tiles_evicted,
            activated = ?output.activated,
            used = memory.used_bytes,
            limit = memory.limit_bytes,
            in_flight = memory.tasks_in_flight,
            "frame"
        );

        if compositor.settings().raster_thread_count == 0 {
            compositor.run_raster_tasks_inline(usize::MAX);
        } else {
            compositor.wait_for_raster(frame_interval);
        }
    }

    let stats = compositor.raster_stats().clone();
    tracing::info!(
        elapsed = ?start.elapsed(),
        scheduled = stats.tasks_scheduled,
        completed = stats.tasks_completed,
        cancelled = stats.tasks_cancelled,
        stale = stats.stale_discards,
        driver_failures = stats.driver_failures,
        evicted = stats.tiles_evicted,
        raster_time = ?stats.raster_time,
        forced_activations = compositor.forced_activations(),
        "simulation finished"
    );

    if let Some(path) = &arguments.output {
        let composed = compositor
            .compose_rgba8(LAYER, visible)
            .context("compose final viewport")?;
        let (width, height) = (composed.width(), composed.height());
        let image = image::RgbaImage::from_raw(width, height, composed.into_pixels())
            .context("composed pixels do not match viewport size")?;
        image
            .save(path)
            .with_context(|| format!("write {}", path.display()))?;
        tracing::info!(path = %path.display(), width, height, "viewport written");
    }
    Ok(())
}

/// Coloured squares with an outline, hue shifted by `generation` so
/// repaints are visible.
fn paint_cells(rect: IntRect, generation: u32) -> Vec<PaintCommand> {
    let mut commands = Vec::new();
    let first_col = rect.x.div_euclid(CELL);
    let first_row = rect.y.div_euclid(CELL);
    let last_col = (rect.right() - 1).div_euclid(CELL);
    let last_row = (rect.bottom() - 1).div_euclid(CELL);
    for row in first_row..=last_row {
        for col in first_col..=last_col {
            let cell = IntRect::new(col * CELL, row * CELL, CELL, CELL);
            let Some(clipped) = cell.intersection(&rect) else {
                continue;
            };
            let seed = (col as u32)
                .wrapping_mul(73)
                .wrapping_add((row as u32).wrapping_mul(151))
                .wrapping_add(generation.wrapping_mul(97));
            commands.push(PaintCommand::FillRect {
                rect: clipped,
                color: Rgba::opaque(
                    (seed % 200) as u8 + 40,
                    (seed / 7 % 200) as u8 + 40,
                    (seed / 13 % 200) as u8 + 40,
                ),
            });
            commands.push(PaintCommand::StrokeRect {
                rect: cell,
                color: Rgba::opaque(20, 20, 20),
                width: 2,
            });
        }
    }
    commands
}
