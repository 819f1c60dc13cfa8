use bitvec::prelude::{BitVec, Lsb0};

/// Grid cells invalidated since the last time the set was drained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileDirtyBitset {
    cols: u32,
    rows: u32,
    bits: BitVec<usize, Lsb0>,
    dirty_count: usize,
}

impl TileDirtyBitset {
    pub fn new(cols: u32, rows: u32) -> Self {
        let tile_count = (cols as usize)
            .checked_mul(rows as usize)
            .unwrap_or_else(|| panic!("tile grid {cols}x{rows} overflows usize"));
        Self {
            cols,
            rows,
            bits: BitVec::repeat(false, tile_count),
            dirty_count: 0,
        }
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty_count
    }

    /// Returns true if the cell was clean before.
    pub fn set(&mut self, col: u32, row: u32) -> bool {
        let index = self.tile_index(col, row);
        let Some(mut slot) = self.bits.get_mut(index) else {
            panic!("dirty bit index {index} out of bounds");
        };
        if *slot {
            return false;
        }
        *slot = true;
        self.dirty_count += 1;
        true
    }

    pub fn clear(&mut self) {
        self.bits.fill(false);
        self.dirty_count = 0;
    }

    fn tile_index(&self, col: u32, row: u32) -> usize {
        assert!(
            col < self.cols && row < self.rows,
            "tile ({col}, {row}) is outside the {}x{} grid",
            self.cols,
            self.rows
        );
        (row as usize) * (self.cols as usize) + col as usize
    }
}
