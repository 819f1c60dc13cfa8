use crate::{IntRect, IntSize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const TRANSPARENT: Rgba = Rgba::new(0, 0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self::new(r, g, b, 255)
    }

    pub const fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

/// Tightly packed RGBA8 pixels, row-major, origin at the top-left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Bitmap {
    pub fn new_transparent(width: u32, height: u32) -> Self {
        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|count| count.checked_mul(4))
            .unwrap_or_else(|| panic!("bitmap size overflow for {width}x{height}"));
        Self {
            width,
            height,
            pixels: vec![0; len],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> IntSize {
        IntSize::new(self.width as i32, self.height as i32)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = ((y as usize) * (self.width as usize) + x as usize) * 4;
        let texel = &self.pixels[offset..offset + 4];
        Some(Rgba::new(texel[0], texel[1], texel[2], texel[3]))
    }

    /// Out-of-bounds writes are ignored.
    pub fn put_pixel(&mut self, x: u32, y: u32, color: Rgba) {
        if x >= self.width || y >= self.height {
            return;
        }
        let offset = ((y as usize) * (self.width as usize) + x as usize) * 4;
        self.pixels[offset..offset + 4].copy_from_slice(&color.to_array());
    }

    pub fn is_fully_transparent(&self) -> bool {
        self.pixels.chunks_exact(4).all(|texel| texel[3] == 0)
    }

    /// Fills `rect` (bitmap coordinates) clipped to the bitmap bounds.
    pub fn fill_rect(&mut self, rect: IntRect, color: Rgba) {
        let bounds = IntRect::from_size(self.size());
        let Some(clipped) = rect.intersection(&bounds) else {
            return;
        };
        let texel = color.to_array();
        let row_bytes = (self.width as usize) * 4;
        for y in clipped.y..clipped.bottom() {
            let row_start = (y as usize) * row_bytes;
            let start = row_start + (clipped.x as usize) * 4;
            let end = row_start + (clipped.right() as usize) * 4;
            for chunk in self.pixels[start..end].chunks_exact_mut(4) {
                chunk.copy_from_slice(&texel);
            }
        }
    }
}
