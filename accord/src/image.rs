//! Dense pixel/voxel volumes.
//!
//! A `Volume` is a flat, x-fastest array with up to three spatial axes. 2D
//! images are volumes with `depth == 1`. Every per-pixel stage of the fusion
//! engine walks volumes by linear index, so the layout is the only contract.

use std::ops::{Index, IndexMut};
use std::slice;

/// Spatial extent of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Dimensions {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl Dimensions {
    pub fn new_2d(width: usize, height: usize) -> Self {
        Self::new_3d(width, height, 1)
    }

    pub fn new_3d(width: usize, height: usize, depth: usize) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Total number of spatial positions.
    pub fn pixel_count(&self) -> usize {
        self.width * self.height * self.depth
    }

    #[inline]
    pub fn linear_index(&self, x: usize, y: usize, z: usize) -> usize {
        debug_assert!(x < self.width && y < self.height && z < self.depth);
        (z * self.height + y) * self.width + x
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.depth == 1 {
            write!(f, "{}x{}", self.width, self.height)
        } else {
            write!(f, "{}x{}x{}", self.width, self.height, self.depth)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Volume<T> {
    dimensions: Dimensions,
    pixels: Vec<T>,
}

impl<T> Volume<T> {
    pub fn new(dimensions: Dimensions, pixels: Vec<T>) -> Self {
        assert_eq!(
            pixels.len(),
            dimensions.pixel_count(),
            "pixels length must equal width * height * depth"
        );
        Self { dimensions, pixels }
    }

    pub fn from_fn(dimensions: Dimensions, f: impl FnMut(usize) -> T) -> Self {
        let pixels = (0..dimensions.pixel_count()).map(f).collect();
        Self { dimensions, pixels }
    }

    #[inline]
    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> &T {
        &self.pixels[self.dimensions.linear_index(x, y, z)]
    }

    #[inline]
    pub fn get_mut(&mut self, x: usize, y: usize, z: usize) -> &mut T {
        let idx = self.dimensions.linear_index(x, y, z);
        &mut self.pixels[idx]
    }

    #[inline]
    pub fn pixels(&self) -> &[T] {
        &self.pixels
    }

    #[inline]
    pub fn pixels_mut(&mut self) -> &mut [T] {
        &mut self.pixels
    }

    #[inline]
    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.pixels.iter()
    }

    #[inline]
    pub fn into_vec(self) -> Vec<T> {
        self.pixels
    }
}

impl<T: Clone> Volume<T> {
    pub fn new_filled(dimensions: Dimensions, value: T) -> Self {
        Self {
            dimensions,
            pixels: vec![value; dimensions.pixel_count()],
        }
    }
}

impl<T> Index<usize> for Volume<T> {
    type Output = T;

    #[inline]
    fn index(&self, idx: usize) -> &T {
        &self.pixels[idx]
    }
}

impl<T> IndexMut<usize> for Volume<T> {
    #[inline]
    fn index_mut(&mut self, idx: usize) -> &mut T {
        &mut self.pixels[idx]
    }
}

impl<'a, T> IntoIterator for &'a Volume<T> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.pixels.iter()
    }
}
