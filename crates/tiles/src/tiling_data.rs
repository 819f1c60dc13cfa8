use raster_protocol::{IntRect, IntSize};

/// Grid geometry of one tiling. A pure function of the content bounds and
/// the tile size; rebuilt rather than patched when either changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilingData {
    tile_size: IntSize,
    bounds: IntSize,
    cols: u32,
    rows: u32,
}

impl TilingData {
    pub fn new(tile_size: IntSize, bounds: IntSize) -> Self {
        assert!(
            !tile_size.is_empty(),
            "tile size must be positive, got {}x{}",
            tile_size.width,
            tile_size.height
        );
        let bounds = IntSize::new(bounds.width.max(0), bounds.height.max(0));
        let cols = (bounds.width as u32).div_ceil(tile_size.width as u32);
        let rows = (bounds.height as u32).div_ceil(tile_size.height as u32);
        Self {
            tile_size,
            bounds,
            cols,
            rows,
        }
    }

    pub fn tile_size(&self) -> IntSize {
        self.tile_size
    }

    pub fn bounds(&self) -> IntSize {
        self.bounds
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn tile_count(&self) -> u64 {
        self.cols as u64 * self.rows as u64
    }

    /// Tile rect clipped to the content bounds.
    pub fn tile_rect(&self, col: u32, row: u32) -> IntRect {
        assert!(
            col < self.cols && row < self.rows,
            "tile ({col}, {row}) is outside the {}x{} grid",
            self.cols,
            self.rows
        );
        let full = IntRect::new(
            col as i32 * self.tile_size.width,
            row as i32 * self.tile_size.height,
            self.tile_size.width,
            self.tile_size.height,
        );
        full.intersection(&IntRect::from_size(self.bounds))
            .unwrap_or_else(|| panic!("tile ({col}, {row}) lies outside content bounds"))
    }

    /// Grid cells touched by `rect` (content space), row-major.
    pub fn cells_covering(&self, rect: &IntRect) -> impl Iterator<Item = (u32, u32)> + use<> {
        let (col_range, row_range) = match rect.intersection(&IntRect::from_size(self.bounds)) {
            Some(clipped) => (
                (clipped.x / self.tile_size.width) as u32
                    ..((clipped.right() - 1) / self.tile_size.width) as u32 + 1,
                (clipped.y / self.tile_size.height) as u32
                    ..((clipped.bottom() - 1) / self.tile_size.height) as u32 + 1,
            ),
            None => (0..0, 0..0),
        };
        row_range.flat_map(move |row| col_range.clone().map(move |col| (col, row)))
    }
}
