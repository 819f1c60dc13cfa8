use raster_protocol::{Bitmap, IntRect, Rgba};
use smallvec::SmallVec;

use crate::{PaintCommand, PileSnapshot};

/// Maps a layer-space rect to content pixels by rounding each edge, so rects
/// that share an edge in layer space share it in content space too.
pub fn scale_rect_to_pixels(rect: IntRect, scale: f32) -> IntRect {
    let left = (rect.x as f32 * scale).round() as i32;
    let top = (rect.y as f32 * scale).round() as i32;
    let right = (rect.right() as f32 * scale).round() as i32;
    let bottom = (rect.bottom() as f32 * scale).round() as i32;
    IntRect::new(left, top, right - left, bottom - top)
}

impl PileSnapshot {
    /// Rasterizes `content_rect` (content space at `contents_scale`) into a
    /// bitmap of the same size. Areas never recorded stay transparent.
    pub fn playback_to_bitmap(&self, content_rect: IntRect, contents_scale: f32) -> Bitmap {
        assert!(
            contents_scale.is_finite() && contents_scale > 0.0,
            "playback scale must be positive and finite, got {contents_scale}"
        );
        let mut bitmap = Bitmap::new_transparent(
            content_rect.width.max(0) as u32,
            content_rect.height.max(0) as u32,
        );
        if content_rect.is_empty() {
            return bitmap;
        }
        let layer_rect = content_rect.scale_to_enclosing(1.0 / contents_scale);

        for region in self.regions() {
            if !region.rect().intersects(&layer_rect) {
                continue;
            }
            let clip = scale_rect_to_pixels(region.rect(), contents_scale);
            let Some(clip) = clip.intersection(&content_rect) else {
                continue;
            };
            for command in region.commands() {
                draw_command(
                    &mut bitmap,
                    command,
                    contents_scale,
                    &clip,
                    content_rect.x,
                    content_rect.y,
                );
            }
        }
        bitmap
    }

    /// The one color [`Self::playback_to_bitmap`] would fill `content_rect`
    /// with, if it would. Any unrecorded pixel or partially covering
    /// command rules the rect out.
    pub fn solid_color(&self, content_rect: IntRect, contents_scale: f32) -> Option<Rgba> {
        if content_rect.is_empty() || !contents_scale.is_finite() || contents_scale <= 0.0 {
            return None;
        }
        let layer_rect = content_rect.scale_to_enclosing(1.0 / contents_scale);

        let mut color = None;
        let mut uncovered: SmallVec<[IntRect; 8]> = SmallVec::new();
        uncovered.push(content_rect);
        for region in self.regions() {
            if !region.rect().intersects(&layer_rect) {
                continue;
            }
            let clip = scale_rect_to_pixels(region.rect(), contents_scale);
            let Some(clip) = clip.intersection(&content_rect) else {
                continue;
            };
            let region_color = clip_color(region.commands(), contents_scale, &clip)?;
            if *color.get_or_insert(region_color) != region_color {
                return None;
            }
            let mut next = SmallVec::new();
            for piece in uncovered.drain(..) {
                next.extend(piece.subtract(&clip));
            }
            uncovered = next;
        }
        if !uncovered.is_empty() {
            return None;
        }
        color
    }
}

fn clip_color(commands: &[PaintCommand], scale: f32, clip: &IntRect) -> Option<Rgba> {
    let mut color = Rgba::TRANSPARENT;
    for command in commands {
        let (pieces, piece_color) = painted_pieces(command, scale);
        if pieces.iter().any(|piece| piece.contains_rect(clip)) {
            color = piece_color;
        } else if pieces.iter().any(|piece| piece.intersects(clip)) {
            return None;
        }
    }
    Some(color)
}

/// Content-space rects a command paints, all in one color.
fn painted_pieces(command: &PaintCommand, scale: f32) -> (SmallVec<[IntRect; 4]>, Rgba) {
    let mut pieces = SmallVec::new();
    match *command {
        PaintCommand::FillRect { rect, color } => {
            pieces.push(scale_rect_to_pixels(rect, scale));
            (pieces, color)
        }
        PaintCommand::StrokeRect { rect, color, width } => {
            if rect.is_empty() || width <= 0 {
                return (pieces, color);
            }
            let width = width.min(rect.width).min(rect.height);
            for band in [
                IntRect::new(rect.x, rect.y, rect.width, width),
                IntRect::new(rect.x, rect.bottom() - width, rect.width, width),
                IntRect::new(rect.x, rect.y, width, rect.height),
                IntRect::new(rect.right() - width, rect.y, width, rect.height),
            ] {
                pieces.push(scale_rect_to_pixels(band, scale));
            }
            (pieces, color)
        }
    }
}

fn draw_command(
    bitmap: &mut Bitmap,
    command: &PaintCommand,
    scale: f32,
    clip: &IntRect,
    origin_x: i32,
    origin_y: i32,
) {
    let (pieces, color) = painted_pieces(command, scale);
    for piece in pieces {
        if let Some(visible) = piece.intersection(clip) {
            bitmap.fill_rect(visible.offset(-origin_x, -origin_y), color);
        }
    }
}
