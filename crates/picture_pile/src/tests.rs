use super::*;

const RED: Rgba = Rgba::opaque(255, 0, 0);
const BLUE: Rgba = Rgba::opaque(0, 0, 255);

fn solid(color: Rgba) -> impl Fn(IntRect) -> Vec<PaintCommand> {
    move |rect| vec![PaintCommand::FillRect { rect, color }]
}

#[test]
fn new_pile_queues_whole_bounds_for_recording() {
    let pile = PicturePile::new(IntSize::new(100, 50));
    assert_eq!(pile.invalidation(), &[IntRect::new(0, 0, 100, 50)]);
    assert!(!pile.is_rect_recorded(&IntRect::new(0, 0, 10, 10)));
}

#[test]
fn playback_of_unrecorded_area_is_transparent() {
    let pile = PicturePile::new(IntSize::new(64, 64));
    let bitmap = pile
        .snapshot()
        .playback_to_bitmap(IntRect::new(0, 0, 32, 32), 1.0);
    assert_eq!(bitmap.width(), 32);
    assert!(bitmap.is_fully_transparent());
}

#[test]
fn round_trip_reflects_only_latest_recording() {
    let mut pile = PicturePile::new(IntSize::new(100, 100));
    pile.record_invalidation(&solid(RED));

    let area = IntRect::new(20, 20, 40, 40);
    pile.invalidate(area);
    assert!(pile.is_stale(&IntRect::new(30, 30, 1, 1)));
    pile.update_recording(area, &solid(BLUE));
    assert!(!pile.has_invalidation());

    let bitmap = pile.snapshot().playback_to_bitmap(area, 1.0);
    for y in 0..area.height as u32 {
        for x in 0..area.width as u32 {
            assert_eq!(bitmap.pixel(x, y), Some(BLUE), "pixel ({x}, {y})");
        }
    }

    let whole = pile
        .snapshot()
        .playback_to_bitmap(IntRect::new(0, 0, 100, 100), 1.0);
    assert_eq!(whole.pixel(10, 10), Some(RED));
    assert_eq!(whole.pixel(59, 59), Some(BLUE));
    assert_eq!(whole.pixel(60, 60), Some(RED));
}

#[test]
fn recorded_regions_never_overlap() {
    let mut pile = PicturePile::new(IntSize::new(200, 200));
    pile.record_invalidation(&solid(RED));
    pile.update_recording(IntRect::new(50, 50, 100, 100), &solid(BLUE));
    pile.update_recording(IntRect::new(0, 120, 200, 30), &solid(RED));

    let snapshot = pile.snapshot();
    let regions: Vec<IntRect> = snapshot.regions().map(RecordedRegion::rect).collect();
    let area: u64 = regions.iter().map(IntRect::area).sum();
    assert_eq!(area, 200 * 200);
    for (index, rect) in regions.iter().enumerate() {
        for other in regions.iter().skip(index + 1) {
            assert!(!rect.intersects(other), "{rect:?} overlaps {other:?}");
        }
    }
}

#[test]
fn snapshot_is_not_affected_by_later_recording() {
    let mut pile = PicturePile::new(IntSize::new(40, 40));
    pile.record_invalidation(&solid(RED));
    let before = pile.snapshot();

    pile.update_recording(IntRect::new(0, 0, 40, 40), &solid(BLUE));

    let old = before.playback_to_bitmap(IntRect::new(0, 0, 40, 40), 1.0);
    let new = pile
        .snapshot()
        .playback_to_bitmap(IntRect::new(0, 0, 40, 40), 1.0);
    assert_eq!(old.pixel(5, 5), Some(RED));
    assert_eq!(new.pixel(5, 5), Some(BLUE));
    assert!(before.generation() < pile.generation());
}

#[test]
fn playback_scales_commands_into_content_space() {
    let mut pile = PicturePile::new(IntSize::new(100, 100));
    pile.update_recording(IntRect::new(0, 0, 100, 100), &|_: IntRect| {
        vec![PaintCommand::FillRect {
            rect: IntRect::new(10, 10, 10, 10),
            color: RED,
        }]
    });

    let bitmap = pile
        .snapshot()
        .playback_to_bitmap(IntRect::new(0, 0, 50, 50), 0.5);
    assert_eq!(bitmap.pixel(5, 5), Some(RED));
    assert_eq!(bitmap.pixel(9, 9), Some(RED));
    assert_eq!(bitmap.pixel(10, 10), Some(Rgba::TRANSPARENT));
    assert_eq!(bitmap.pixel(4, 4), Some(Rgba::TRANSPARENT));
}

#[test]
fn stroke_draws_outline_only() {
    let mut pile = PicturePile::new(IntSize::new(20, 20));
    pile.update_recording(IntRect::new(0, 0, 20, 20), &|_: IntRect| {
        vec![PaintCommand::StrokeRect {
            rect: IntRect::new(0, 0, 20, 20),
            color: BLUE,
            width: 2,
        }]
    });
    let bitmap = pile
        .snapshot()
        .playback_to_bitmap(IntRect::new(0, 0, 20, 20), 1.0);
    assert_eq!(bitmap.pixel(0, 10), Some(BLUE));
    assert_eq!(bitmap.pixel(19, 1), Some(BLUE));
    assert_eq!(bitmap.pixel(10, 10), Some(Rgba::TRANSPARENT));
}

#[test]
fn growing_bounds_queues_exposed_area() {
    let mut pile = PicturePile::new(IntSize::new(50, 50));
    pile.record_invalidation(&solid(RED));
    pile.set_bounds(IntSize::new(80, 50));

    assert_eq!(pile.invalidation(), &[IntRect::new(50, 0, 30, 50)]);
    assert!(pile.is_rect_recorded(&IntRect::new(0, 0, 50, 50)));
    assert!(!pile.is_rect_recorded(&IntRect::new(0, 0, 60, 50)));
}

#[test]
fn shrinking_bounds_clips_regions() {
    let mut pile = PicturePile::new(IntSize::new(50, 50));
    pile.record_invalidation(&solid(RED));
    pile.set_bounds(IntSize::new(20, 20));

    let snapshot = pile.snapshot();
    let area: u64 = snapshot.regions().map(|region| region.rect().area()).sum();
    assert_eq!(area, 400);
    assert!(!pile.has_invalidation());
}

#[test]
fn invalidate_outside_bounds_is_ignored() {
    let mut pile = PicturePile::new(IntSize::new(10, 10));
    pile.record_invalidation(&solid(RED));
    pile.invalidate(IntRect::new(100, 100, 5, 5));
    assert!(!pile.has_invalidation());
}

#[test]
fn single_fill_reduces_to_solid_color_at_any_scale() {
    let mut pile = PicturePile::new(IntSize::new(100, 100));
    pile.record_invalidation(&solid(RED));
    let snapshot = pile.snapshot();
    assert_eq!(snapshot.solid_color(IntRect::new(0, 0, 64, 64), 1.0), Some(RED));
    assert_eq!(snapshot.solid_color(IntRect::new(0, 0, 50, 50), 0.5), Some(RED));
    assert_eq!(snapshot.solid_color(IntRect::new(0, 0, 0, 10), 1.0), None);
}

#[test]
fn mixed_or_unrecorded_content_is_not_solid() {
    let mut pile = PicturePile::new(IntSize::new(100, 100));
    assert_eq!(pile.snapshot().solid_color(IntRect::new(0, 0, 10, 10), 1.0), None);

    pile.update_recording(IntRect::new(0, 0, 50, 50), &solid(RED));
    assert_eq!(pile.snapshot().solid_color(IntRect::new(0, 0, 64, 64), 1.0), None);

    pile.record_invalidation(&solid(RED));
    pile.update_recording(IntRect::new(50, 0, 50, 100), &solid(BLUE));
    let snapshot = pile.snapshot();
    assert_eq!(snapshot.solid_color(IntRect::new(0, 0, 100, 100), 1.0), None);
    assert_eq!(snapshot.solid_color(IntRect::new(0, 0, 50, 100), 1.0), Some(RED));
    assert_eq!(snapshot.solid_color(IntRect::new(60, 0, 40, 40), 1.0), Some(BLUE));
}

#[test]
fn stroke_interior_and_band_are_solid_but_outline_is_not() {
    let mut pile = PicturePile::new(IntSize::new(20, 20));
    pile.update_recording(IntRect::new(0, 0, 20, 20), &|_: IntRect| {
        vec![PaintCommand::StrokeRect {
            rect: IntRect::new(0, 0, 20, 20),
            color: BLUE,
            width: 2,
        }]
    });
    let snapshot = pile.snapshot();
    assert_eq!(
        snapshot.solid_color(IntRect::new(8, 8, 4, 4), 1.0),
        Some(Rgba::TRANSPARENT)
    );
    assert_eq!(snapshot.solid_color(IntRect::new(0, 0, 20, 2), 1.0), Some(BLUE));
    assert_eq!(snapshot.solid_color(IntRect::new(0, 0, 20, 20), 1.0), None);
}
