//! Two-slot frame buffer for producer/consumer handoff

use image::{ImageBuffer, Pixel};

/// Capacity pre-sizing, forwarded to both halves of a [`DoubleBuffer`].
pub trait Allocate {
    fn allocate(&mut self, width: u32, height: u32);
}

impl<P: Pixel> Allocate for ImageBuffer<P, Vec<P::Subpixel>> {
    fn allocate(&mut self, width: u32, height: u32) {
        if self.dimensions() != (width, height) {
            *self = ImageBuffer::new(width, height);
        }
    }
}

impl<T: Default + Clone> Allocate for Vec<T> {
    fn allocate(&mut self, width: u32, height: u32) {
        self.resize(width as usize * height as usize, T::default());
    }
}

/// Two instances of `T` playing the "front" (consumer) and "back" (producer)
/// roles.
///
/// There is no internal locking: the owning stream serializes every access
/// behind its frame lock. `swap` only exchanges the roles, nothing is copied.
#[derive(Debug, Default, Clone)]
pub struct DoubleBuffer<T> {
    buffers: [T; 2],
    front: usize,
}

impl<T> DoubleBuffer<T> {
    pub fn new(front: T, back: T) -> Self {
        Self {
            buffers: [front, back],
            front: 0,
        }
    }

    #[inline]
    pub fn front(&self) -> &T {
        &self.buffers[self.front]
    }

    #[inline]
    pub fn front_mut(&mut self) -> &mut T {
        &mut self.buffers[self.front]
    }

    #[inline]
    pub fn back(&self) -> &T {
        &self.buffers[self.front ^ 1]
    }

    #[inline]
    pub fn back_mut(&mut self) -> &mut T {
        &mut self.buffers[self.front ^ 1]
    }

    /// Exchange the front and back roles.
    #[inline]
    pub fn swap(&mut self) {
        self.front ^= 1;
    }
}

impl<T: Allocate> DoubleBuffer<T> {
    pub fn allocate(&mut self, width: u32, height: u32) {
        for buffer in &mut self.buffers {
            buffer.allocate(width, height);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, RgbaImage};

    #[test]
    fn test_front_holds_previous_back_write() {
        let mut db: DoubleBuffer<Vec<u32>> = DoubleBuffer::default();

        for n in 1..=5u32 {
            *db.back_mut() = vec![n; 3];
            db.swap();
            assert_eq!(db.front(), &vec![n; 3]);
        }
    }

    #[test]
    fn test_swap_does_not_copy() {
        let mut db = DoubleBuffer::new(vec![1u8], vec![2u8]);
        let back_ptr = db.back().as_ptr();

        db.swap();

        assert_eq!(db.front().as_ptr(), back_ptr);
        assert_eq!(db.back(), &vec![1u8]);
    }

    #[test]
    fn test_allocate_sizes_both_halves() {
        let mut db: DoubleBuffer<RgbaImage> = DoubleBuffer::default();
        db.allocate(8, 4);
        assert_eq!(db.front().dimensions(), (8, 4));
        assert_eq!(db.back().dimensions(), (8, 4));

        let mut depth: DoubleBuffer<ImageBuffer<Luma<u16>, Vec<u16>>> = DoubleBuffer::default();
        depth.allocate(3, 2);
        assert_eq!(depth.front().as_raw().len(), 6);
    }

    #[test]
    fn test_allocate_keeps_contents_when_size_matches() {
        let mut db: DoubleBuffer<RgbaImage> = DoubleBuffer::default();
        db.allocate(2, 2);
        db.front_mut().put_pixel(1, 1, image::Rgba([9, 9, 9, 9]));

        db.allocate(2, 2);

        assert_eq!(db.front().get_pixel(1, 1).0, [9, 9, 9, 9]);
    }
}
