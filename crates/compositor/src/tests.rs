use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use picture_pile::{ContentPainter, PaintCommand};
use raster_protocol::{IntRect, IntSize, LayerId, Rgba, TreePriority};
use tile_manager::MemoryLimitPolicy;
use tiles::Viewport;

use super::*;

const LAYER: LayerId = LayerId(7);
const RED: Rgba = Rgba::opaque(220, 30, 30);
const BLUE: Rgba = Rgba::opaque(30, 30, 220);

fn settings() -> CompositorSettings {
    CompositorSettings {
        raster_thread_count: 0,
        enable_low_res_tiling: false,
        solid_color_analysis: false,
        ..CompositorSettings::default()
    }
}

fn solid(color: Rgba) -> Box<dyn ContentPainter + Send> {
    Box::new(move |rect: IntRect| vec![PaintCommand::FillRect { rect, color }])
}

/// Paints red until `repainted` flips, blue afterwards.
fn switchable() -> (Arc<AtomicBool>, Box<dyn ContentPainter + Send>) {
    let repainted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&repainted);
    let painter: Box<dyn ContentPainter + Send> = Box::new(move |rect: IntRect| {
        let color = if flag.load(Ordering::Relaxed) { BLUE } else { RED };
        vec![PaintCommand::FillRect { rect, color }]
    });
    (repainted, painter)
}

fn compositor_with_layer(bounds: IntSize) -> Compositor {
    let mut compositor = Compositor::new(settings()).expect("start compositor");
    compositor
        .add_layer(LAYER, bounds, solid(RED))
        .expect("add layer");
    compositor
}

fn pixel(compositor: &mut Compositor, x: i32, y: i32) -> Option<Rgba> {
    let bitmap = compositor
        .compose_rgba8(LAYER, IntRect::new(x, y, 1, 1))
        .expect("compose");
    bitmap.pixel(0, 0)
}

#[test]
fn settings_default_from_empty_json() {
    let settings = CompositorSettings::from_json_str("{}").expect("parse");
    assert_eq!(settings, CompositorSettings::default());
    assert_eq!(settings.tile_size, IntSize::new(256, 256));
    assert_eq!(settings.activation_timeout_ms, 100);
    assert_eq!(settings.soon_margin_px, 256);
    assert_eq!(settings.skewport_target_time_ms, 1000);
}

#[test]
fn settings_fields_override_defaults() {
    let settings = CompositorSettings::from_json_str(
        r#"{
            "tile_size": { "width": 512, "height": 128 },
            "memory_limit_bytes": 1048576,
            "memory_limit_policy": "allow_prepaint_only",
            "tree_priority": "smoothness_takes_priority",
            "raster_thread_count": 4
        }"#,
    )
    .expect("parse");
    assert_eq!(settings.tile_size, IntSize::new(512, 128));
    assert_eq!(settings.memory_limit_bytes, 1 << 20);
    assert_eq!(settings.memory_limit_policy, MemoryLimitPolicy::AllowPrepaintOnly);
    assert_eq!(settings.tree_priority, TreePriority::SmoothnessTakesPriority);
    assert_eq!(settings.raster_worker_pool_config().thread_count, 4);
    assert_eq!(settings.tiling_set_settings().tile_size, IntSize::new(512, 128));
}

#[test]
fn settings_reject_unknown_fields_and_bad_values() {
    assert!(matches!(
        CompositorSettings::from_json_str(r#"{ "tile_sise": 3 }"#),
        Err(SettingsError::Parse(_))
    ));
    assert!(matches!(
        CompositorSettings::from_json_str(r#"{ "tile_size": { "width": 0, "height": 256 } }"#),
        Err(SettingsError::Invalid { field: "tile_size", .. })
    ));
    assert!(matches!(
        CompositorSettings::from_json_str(r#"{ "soon_margin_px": 2000 }"#),
        Err(SettingsError::Invalid {
            field: "eventually_margin_px",
            ..
        })
    ));
    assert!(matches!(
        CompositorSettings::from_json_str(r#"{ "low_res_contents_scale_factor": 1.5 }"#),
        Err(SettingsError::Invalid { .. })
    ));
    assert!(matches!(
        CompositorSettings::from_json_str(r#"{ "max_tiles_for_interest_area": 0 }"#),
        Err(SettingsError::Invalid {
            field: "max_tiles_for_interest_area",
            ..
        })
    ));
}

#[test]
fn interest_and_solid_color_settings_reach_the_tile_layers() {
    let defaults = CompositorSettings::default();
    assert_eq!(defaults.max_tiles_for_interest_area, 128);
    assert!(defaults.solid_color_analysis);

    let settings = CompositorSettings::from_json_str(
        r#"{ "max_tiles_for_interest_area": 24, "solid_color_analysis": false }"#,
    )
    .expect("parse");
    assert_eq!(settings.tiling_set_settings().max_tiles_for_interest_area, 24);
    assert!(!settings.tile_manager_settings().solid_color_analysis);
}

#[test]
fn settings_from_missing_file_is_io_error() {
    let error = CompositorSettings::from_path(std::path::Path::new("/nonexistent/raster.json"))
        .expect_err("missing file");
    assert!(matches!(error, SettingsError::Io { .. }));
}

#[test]
fn invalid_settings_refuse_to_start() {
    let settings = CompositorSettings {
        memory_limit_bytes: 0,
        ..settings()
    };
    assert!(matches!(
        Compositor::new(settings),
        Err(CompositorError::Settings(SettingsError::Invalid { .. }))
    ));
}

#[test]
fn layer_registry_reports_unknown_and_duplicate_ids() {
    let mut compositor = compositor_with_layer(IntSize::new(100, 100));
    assert!(matches!(
        compositor.add_layer(LAYER, IntSize::new(10, 10), solid(RED)),
        Err(CompositorError::DuplicateLayer(LAYER))
    ));
    let other = LayerId(99);
    assert!(matches!(
        compositor.invalidate(other, IntRect::new(0, 0, 1, 1)),
        Err(CompositorError::UnknownLayer(id)) if id == other
    ));
    assert!(matches!(
        compositor.remove_layer(other),
        Err(CompositorError::UnknownLayer(_))
    ));
    assert_eq!(compositor.layer_ids().collect::<Vec<_>>(), vec![LAYER]);
}

#[test]
fn six_hundred_pixel_layer_gets_three_by_three_grid() {
    let mut compositor = compositor_with_layer(IntSize::new(600, 600));
    let report = compositor.commit(Instant::now());
    assert_eq!(report.tiles_created, 9);

    let layer = compositor.layer(LAYER).expect("layer");
    let tiling = layer.tiling_set().tilings().first().expect("high-res tiling");
    assert_eq!(tiling.tile_count(), 9);
    let corner = tiling.tile(2, 2).expect("corner tile");
    assert_eq!(corner.layer_rect(), IntRect::new(512, 512, 88, 88));
    assert_eq!(tiling.tile(2, 0).expect("edge tile").layer_rect().width, 88);
}

#[test]
fn activation_waits_for_required_tiles() {
    let mut compositor = compositor_with_layer(IntSize::new(600, 600));
    let start = Instant::now();
    compositor.commit(start);

    let frame = compositor.begin_frame(start);
    assert_eq!(frame.prepare.tasks_scheduled, 9);
    assert_eq!(frame.activated, None);
    assert!(frame.waiting_for_tiles);

    compositor.run_raster_tasks_inline(4);
    let frame = compositor.begin_frame(start + Duration::from_millis(10));
    assert_eq!(frame.completed, 4);
    assert_eq!(frame.activated, None);
    assert!(compositor.has_pending_tree());

    compositor.run_raster_tasks_inline(usize::MAX);
    let frame = compositor.begin_frame(start + Duration::from_millis(20));
    assert_eq!(frame.completed, 5);
    assert_eq!(frame.activated, Some(ActivationReason::Ready));
    assert!(!compositor.has_pending_tree());
    assert_eq!(compositor.forced_activations(), 0);
    assert_eq!(
        compositor.take_events(),
        vec![
            CompositorEvent::ReadyToActivate,
            CompositorEvent::AllTileTasksCompleted,
            CompositorEvent::DidActivate {
                frame_sequence_id: frame.frame_sequence_id,
                reason: ActivationReason::Ready,
            },
        ]
    );
    assert_eq!(pixel(&mut compositor, 599, 599), Some(RED));
}

#[test]
fn stalled_raster_forces_activation_after_timeout() {
    let mut compositor = compositor_with_layer(IntSize::new(512, 512));
    let start = Instant::now();
    compositor.commit(start);
    compositor.begin_frame(start);

    let frame = compositor.begin_frame(start + Duration::from_millis(50));
    assert_eq!(frame.activated, None);
    let frame = compositor.begin_frame(start + Duration::from_millis(150));
    assert_eq!(frame.activated, Some(ActivationReason::ForcedTimeout));
    assert_eq!(compositor.forced_activations(), 1);

    let quads = compositor
        .tiles_for_region(LAYER, IntRect::new(0, 0, 512, 512))
        .expect("quads");
    assert!(quads.iter().all(|quad| quad.source.is_none()));
    assert_eq!(pixel(&mut compositor, 10, 10), Some(Rgba::TRANSPARENT));

    // Content finished after the forced activation still reaches the screen.
    compositor.run_raster_tasks_inline(usize::MAX);
    let frame = compositor.begin_frame(start + Duration::from_millis(160));
    assert_eq!(frame.completed, 4);
    let quads = compositor
        .tiles_for_region(LAYER, IntRect::new(0, 0, 512, 512))
        .expect("quads");
    assert_eq!(quads.len(), 4);
    assert!(quads.iter().all(|quad| quad.source.is_some()));
}

#[test]
fn invalidation_replaces_content_only_after_activation() {
    let mut compositor = Compositor::new(settings()).expect("start compositor");
    let (repainted, painter) = switchable();
    compositor
        .add_layer(LAYER, IntSize::new(512, 256), painter)
        .expect("add layer");
    let start = Instant::now();
    compositor.commit(start);
    compositor.begin_frame(start);
    compositor.run_raster_tasks_inline(usize::MAX);
    compositor.begin_frame(start);
    assert_eq!(pixel(&mut compositor, 10, 10), Some(RED));

    repainted.store(true, Ordering::Relaxed);
    compositor
        .invalidate(LAYER, IntRect::new(0, 0, 100, 100))
        .expect("invalidate");
    let commit = compositor.commit(start);
    assert_eq!(commit.invalidated_tiles, 1);
    let frame = compositor.begin_frame(start);
    assert_eq!(frame.prepare.tasks_scheduled, 1);
    assert_eq!(frame.activated, None);
    assert_eq!(pixel(&mut compositor, 10, 10), Some(RED));

    compositor.run_raster_tasks_inline(usize::MAX);
    let frame = compositor.begin_frame(start + Duration::from_millis(5));
    assert_eq!(frame.activated, Some(ActivationReason::Ready));
    assert_eq!(pixel(&mut compositor, 10, 10), Some(BLUE));
    assert_eq!(pixel(&mut compositor, 99, 99), Some(BLUE));
    assert_eq!(pixel(&mut compositor, 100, 100), Some(RED));
    assert_eq!(pixel(&mut compositor, 300, 10), Some(RED));
}

#[test]
fn forced_activation_checkerboards_tiles_still_showing_old_content() {
    let mut compositor = Compositor::new(settings()).expect("start compositor");
    let (repainted, painter) = switchable();
    compositor
        .add_layer(LAYER, IntSize::new(512, 256), painter)
        .expect("add layer");
    let start = Instant::now();
    compositor.commit(start);
    compositor.begin_frame(start);
    compositor.run_raster_tasks_inline(usize::MAX);
    compositor.begin_frame(start);
    assert_eq!(pixel(&mut compositor, 300, 10), Some(RED));

    repainted.store(true, Ordering::Relaxed);
    compositor
        .invalidate(LAYER, IntRect::new(0, 0, 512, 256))
        .expect("invalidate");
    let repaint = start + Duration::from_secs(1);
    compositor.commit(repaint);
    let frame = compositor.begin_frame(repaint);
    assert_eq!(frame.prepare.tasks_scheduled, 2);

    compositor.run_raster_tasks_inline(1);
    let frame = compositor.begin_frame(repaint + Duration::from_millis(150));
    assert_eq!(frame.completed, 1);
    assert_eq!(frame.activated, Some(ActivationReason::ForcedTimeout));

    let quads = compositor
        .tiles_for_region(LAYER, IntRect::new(0, 0, 512, 256))
        .expect("quads");
    assert_eq!(quads.len(), 2);
    assert_eq!(quads.iter().filter(|quad| quad.source.is_some()).count(), 1);
    let shown: Vec<_> = [10, 300]
        .into_iter()
        .map(|x| pixel(&mut compositor, x, 10))
        .collect();
    assert!(!shown.contains(&Some(RED)), "stale content on screen: {shown:?}");
    assert!(shown.contains(&Some(BLUE)));
    assert!(shown.contains(&Some(Rgba::TRANSPARENT)));

    compositor.run_raster_tasks_inline(usize::MAX);
    compositor.begin_frame(repaint + Duration::from_millis(160));
    assert_eq!(pixel(&mut compositor, 10, 10), Some(BLUE));
    assert_eq!(pixel(&mut compositor, 300, 10), Some(BLUE));
}

#[test]
fn solid_layers_draw_without_backing_stores() {
    let mut compositor = Compositor::new(CompositorSettings {
        solid_color_analysis: true,
        ..settings()
    })
    .expect("start compositor");
    compositor
        .add_layer(LAYER, IntSize::new(512, 512), solid(RED))
        .expect("add layer");
    let start = Instant::now();
    compositor.commit(start);
    let frame = compositor.begin_frame(start);
    assert_eq!(frame.prepare.tasks_scheduled, 0);
    compositor.begin_frame(start + Duration::from_millis(5));
    assert!(!compositor.has_pending_tree());
    assert_eq!(compositor.raster_stats().solid_color_tiles, 4);

    let mut stores = 0;
    let drawn = compositor
        .draw_layer_region(LAYER, IntRect::new(0, 0, 512, 512), |quad, store| {
            let source = quad.source.as_ref().expect("solid content");
            assert_eq!(source.content, TileContent::SolidColor(RED));
            stores += usize::from(store.is_some());
        })
        .expect("draw");
    assert_eq!(drawn, 4);
    assert_eq!(stores, 0);
    assert_eq!(pixel(&mut compositor, 10, 10), Some(RED));
    assert_eq!(pixel(&mut compositor, 511, 511), Some(RED));

    let memory = compositor.memory_stats();
    assert_eq!(memory.used_bytes, 0);
    assert_eq!(memory.resource_count, 0);
}

#[test]
fn failed_draw_lock_releases_the_locks_it_already_took() {
    let mut compositor = compositor_with_layer(IntSize::new(256, 256));
    let start = Instant::now();
    compositor.commit(start);
    compositor.begin_frame(start);
    compositor.run_raster_tasks_inline(usize::MAX);
    compositor.begin_frame(start);

    let quads = compositor
        .tiles_for_region(LAYER, IntRect::new(0, 0, 256, 256))
        .expect("quads");
    let resource = quads
        .first()
        .and_then(|quad| quad.source.as_ref())
        .and_then(|source| source.content.resource())
        .expect("rastered tile");

    let result = compositor.lock_resources(&[resource, ResourceId::default()]);
    assert!(matches!(
        result,
        Err(CompositorError::Resource(ResourceError::UnknownResource))
    ));
    assert!(!compositor.tile_manager().resource_provider().is_locked(resource));
}

#[test]
fn draw_path_sees_every_quad_and_unlocks_afterwards() {
    let mut compositor = compositor_with_layer(IntSize::new(512, 512));
    let start = Instant::now();
    compositor.commit(start);
    compositor.begin_frame(start);
    compositor.run_raster_tasks_inline(usize::MAX);
    compositor.begin_frame(start);

    let mut with_pixels = 0;
    let drawn = compositor
        .draw_layer_region(LAYER, IntRect::new(100, 100, 300, 300), |quad, store| {
            assert!(quad.source.is_some());
            if store.is_some() {
                with_pixels += 1;
            }
        })
        .expect("draw");
    assert_eq!(drawn, 4);
    assert_eq!(with_pixels, 4);

    let provider = compositor.tile_manager().resource_provider();
    let quads = compositor
        .tiles_for_region(LAYER, IntRect::new(0, 0, 512, 512))
        .expect("quads");
    for quad in quads {
        let source = quad.source.expect("rasterized");
        let resource = source.content.resource().expect("rastered content");
        assert!(!provider.is_locked(resource));
    }
}

#[test]
fn removing_a_layer_returns_its_memory() {
    let mut compositor = compositor_with_layer(IntSize::new(512, 512));
    let start = Instant::now();
    compositor.commit(start);
    compositor.begin_frame(start);
    compositor.run_raster_tasks_inline(2);
    compositor.begin_frame(start);
    assert!(compositor.memory_stats().used_bytes > 0);

    compositor.remove_layer(LAYER).expect("remove");
    let memory = compositor.memory_stats();
    assert_eq!(memory.used_bytes, 0);
    assert_eq!(memory.resource_count, 0);
    assert_eq!(memory.tasks_in_flight, 0);
}

#[test]
fn scrolling_stays_within_memory_limit() {
    let tile_bytes = 256 * 256 * 4;
    let mut compositor = Compositor::new(CompositorSettings {
        memory_limit_bytes: 10 * tile_bytes,
        ..settings()
    })
    .expect("start compositor");
    compositor
        .add_layer(LAYER, IntSize::new(1024, 8192), solid(BLUE))
        .expect("add layer");

    let start = Instant::now();
    let mut activations = 0;
    for frame in 0..40 {
        let now = start + Duration::from_millis(16 * frame as u64);
        let visible = IntRect::new(0, frame * 150, 512, 512);
        compositor
            .set_viewport(
                LAYER,
                Viewport {
                    visible_rect: visible,
                    scroll_velocity: raster_protocol::Vector2::new(0.0, 9000.0),
                },
            )
            .expect("viewport");
        compositor.commit(now);
        let output = compositor.begin_frame(now);
        activations += usize::from(output.activated.is_some());
        let memory = compositor.memory_stats();
        assert!(
            memory.used_bytes <= memory.limit_bytes,
            "frame {frame}: {} > {}",
            memory.used_bytes,
            memory.limit_bytes
        );
        compositor.run_raster_tasks_inline(6);
    }
    assert!(activations > 0);
    assert!(compositor.raster_stats().tasks_completed > 0);
}

#[test]
fn lowering_memory_limit_applies_next_frame() {
    let mut compositor = compositor_with_layer(IntSize::new(1024, 256));
    compositor
        .set_viewport(LAYER, Viewport::new(IntRect::new(0, 0, 256, 256)))
        .expect("viewport");
    let start = Instant::now();
    compositor.commit(start);
    compositor.begin_frame(start);
    compositor.run_raster_tasks_inline(usize::MAX);
    compositor.begin_frame(start);
    assert_eq!(compositor.memory_stats().used_bytes, 4 * 256 * 256 * 4);

    compositor.set_global_tile_state(GlobalTileState {
        memory_limit_bytes: 256 * 256 * 4,
        memory_limit_policy: MemoryLimitPolicy::AllowAnything,
        tree_priority: TreePriority::SamePriorityForBothTrees,
    });
    let frame = compositor.begin_frame(start);
    assert_eq!(frame.prepare.tiles_evicted, 3);
    assert_eq!(compositor.memory_stats().used_bytes, 256 * 256 * 4);
    assert_eq!(pixel(&mut compositor, 10, 10), Some(RED));
}

#[test]
fn worker_threads_drive_activation() {
    let mut compositor = Compositor::new(CompositorSettings {
        raster_thread_count: 2,
        activation_timeout_ms: 60_000,
        ..settings()
    })
    .expect("start compositor");
    compositor
        .add_layer(LAYER, IntSize::new(600, 600), solid(RED))
        .expect("add layer");
    compositor.commit(Instant::now());

    let mut activated = None;
    for _ in 0..400 {
        let frame = compositor.begin_frame(Instant::now());
        if frame.activated.is_some() {
            activated = frame.activated;
            break;
        }
        compositor.wait_for_raster(Duration::from_millis(25));
    }
    assert_eq!(activated, Some(ActivationReason::Ready));
    assert_eq!(pixel(&mut compositor, 300, 300), Some(RED));
}
