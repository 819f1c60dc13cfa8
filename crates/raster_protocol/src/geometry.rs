use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct IntSize {
    pub width: i32,
    pub height: i32,
}

impl IntSize {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    pub const fn is_empty(self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn area(self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        (self.width as u64) * (self.height as u64)
    }

    /// Size of `self` after scaling, rounded up so no content is lost.
    pub fn scale_to_ceil(self, scale: f32) -> IntSize {
        IntSize {
            width: (self.width as f32 * scale).ceil() as i32,
            height: (self.height as f32 * scale).ceil() as i32,
        }
    }
}

/// Integer rectangle, half-open on the right and bottom edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct IntRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl IntRect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn from_size(size: IntSize) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    fn from_edges(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self::new(left, top, right - left, bottom - top)
    }

    pub const fn right(&self) -> i32 {
        self.x + self.width
    }

    pub const fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub const fn size(&self) -> IntSize {
        IntSize::new(self.width, self.height)
    }

    pub const fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn area(&self) -> u64 {
        self.size().area()
    }

    pub fn intersects(&self, other: &IntRect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    pub fn intersection(&self, other: &IntRect) -> Option<IntRect> {
        if !self.intersects(other) {
            return None;
        }
        Some(Self::from_edges(
            self.x.max(other.x),
            self.y.max(other.y),
            self.right().min(other.right()),
            self.bottom().min(other.bottom()),
        ))
    }

    pub fn contains_rect(&self, other: &IntRect) -> bool {
        if other.is_empty() {
            return true;
        }
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// Bounding box of both rects. Empty rects do not contribute.
    pub fn union(&self, other: &IntRect) -> IntRect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self::from_edges(
            self.x.min(other.x),
            self.y.min(other.y),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    pub fn outset(&self, amount: i32) -> IntRect {
        Self::from_edges(
            self.x.saturating_sub(amount),
            self.y.saturating_sub(amount),
            self.right().saturating_add(amount),
            self.bottom().saturating_add(amount),
        )
    }

    pub fn offset(&self, dx: i32, dy: i32) -> IntRect {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Parts of `self` not covered by `other`, as at most four
    /// non-overlapping rects (top band, bottom band, left, right).
    pub fn subtract(&self, other: &IntRect) -> SmallVec<[IntRect; 4]> {
        let mut pieces = SmallVec::new();
        let Some(hole) = self.intersection(other) else {
            if !self.is_empty() {
                pieces.push(*self);
            }
            return pieces;
        };
        if hole.y > self.y {
            pieces.push(Self::from_edges(self.x, self.y, self.right(), hole.y));
        }
        if hole.bottom() < self.bottom() {
            pieces.push(Self::from_edges(
                self.x,
                hole.bottom(),
                self.right(),
                self.bottom(),
            ));
        }
        if hole.x > self.x {
            pieces.push(Self::from_edges(self.x, hole.y, hole.x, hole.bottom()));
        }
        if hole.right() < self.right() {
            pieces.push(Self::from_edges(
                hole.right(),
                hole.y,
                self.right(),
                hole.bottom(),
            ));
        }
        pieces
    }

    /// Smallest integer rect containing `self` multiplied by `scale`.
    pub fn scale_to_enclosing(&self, scale: f32) -> IntRect {
        if self.is_empty() {
            return IntRect::default();
        }
        Self::from_edges(
            (self.x as f32 * scale).floor() as i32,
            (self.y as f32 * scale).floor() as i32,
            (self.right() as f32 * scale).ceil() as i32,
            (self.bottom() as f32 * scale).ceil() as i32,
        )
    }

    /// Manhattan gap between the two rects; zero when they touch or overlap.
    pub fn manhattan_distance_to(&self, other: &IntRect) -> i64 {
        let dx = (other.x as i64 - self.right() as i64)
            .max(self.x as i64 - other.right() as i64)
            .max(0);
        let dy = (other.y as i64 - self.bottom() as i64)
            .max(self.y as i64 - other.bottom() as i64)
            .max(0);
        dx + dy
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn scale(self, factor: f32) -> Vector2 {
        Vector2::new(self.x * factor, self.y * factor)
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Same direction, length capped at `limit`.
    pub fn clamp_length(self, limit: f32) -> Vector2 {
        let length = self.length();
        if length <= limit || length == 0.0 {
            return self;
        }
        self.scale(limit / length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersection_is_none_for_touching_rects() {
        let a = IntRect::new(0, 0, 10, 10);
        let b = IntRect::new(10, 0, 10, 10);
        assert!(!a.intersects(&b));
        assert_eq!(a.intersection(&b), None);
    }

    #[test]
    fn subtract_covers_remainder_without_overlap() {
        let outer = IntRect::new(0, 0, 100, 100);
        let hole = IntRect::new(25, 25, 50, 50);
        let pieces = outer.subtract(&hole);

        assert_eq!(pieces.len(), 4);
        let area: u64 = pieces.iter().map(IntRect::area).sum();
        assert_eq!(area, outer.area() - hole.area());
        for (index, piece) in pieces.iter().enumerate() {
            assert!(!piece.intersects(&hole));
            for other in pieces.iter().skip(index + 1) {
                assert!(!piece.intersects(other));
            }
        }
    }

    #[test]
    fn subtract_of_full_cover_is_empty() {
        let rect = IntRect::new(5, 5, 10, 10);
        assert!(rect.subtract(&IntRect::new(0, 0, 100, 100)).is_empty());
    }

    #[test]
    fn scale_to_enclosing_rounds_outward() {
        let rect = IntRect::new(1, 1, 3, 3);
        assert_eq!(rect.scale_to_enclosing(0.5), IntRect::new(0, 0, 2, 2));
        assert_eq!(rect.scale_to_enclosing(2.0), IntRect::new(2, 2, 6, 6));
    }

    #[test]
    fn manhattan_distance_is_zero_when_overlapping() {
        let viewport = IntRect::new(0, 0, 100, 100);
        assert_eq!(viewport.manhattan_distance_to(&IntRect::new(50, 50, 10, 10)), 0);
        assert_eq!(
            viewport.manhattan_distance_to(&IntRect::new(130, 120, 10, 10)),
            30 + 20
        );
    }

    #[test]
    fn clamp_length_keeps_direction() {
        let clamped = Vector2::new(300.0, 400.0).clamp_length(50.0);
        assert!((clamped.x - 30.0).abs() < 1e-4);
        assert!((clamped.y - 40.0).abs() < 1e-4);
    }
}
