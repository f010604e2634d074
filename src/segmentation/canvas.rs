use std::collections::VecDeque;

use image::RgbaImage;
use log::debug;

use super::flood_fill::flood_erase;
use super::lasso::{LassoPoint, lasso_cut};
use super::pipeline::encode_png_data_url;
use crate::TallerError;

/// `SegmentationCanvas` holds the photo being cut out together with a bounded undo history.
///
/// The image as it was loaded is always kept; the current state is the newest edit, or the
/// pristine image when there are none. Every edit that changes the image records a new state and
/// once more than `undo_depth` edits are stored the oldest edit is dropped.
pub struct SegmentationCanvas {
    pristine: RgbaImage,
    edits: VecDeque<RgbaImage>,
    undo_depth: usize,
}

impl SegmentationCanvas {
    /// `undo_depth` is raised to 1 so the newest edit always survives.
    pub fn new(image: RgbaImage, undo_depth: usize) -> Self {
        let undo_depth = undo_depth.max(1);
        Self {
            pristine: image,
            edits: VecDeque::with_capacity(undo_depth),
            undo_depth,
        }
    }

    pub fn image(&self) -> &RgbaImage {
        self.edits.back().unwrap_or(&self.pristine)
    }

    pub fn pristine(&self) -> &RgbaImage {
        &self.pristine
    }

    /// Erases the region around the seed. Returns false when nothing was erased, in which case
    /// no undo entry is recorded.
    pub fn flood_erase(&mut self, seed_x: u32, seed_y: u32, tolerance: u32) -> bool {
        let mut next = self.image().clone();
        let erased = flood_erase(&mut next, seed_x, seed_y, tolerance);
        if erased == 0 {
            return false;
        }
        debug!(
            "Flood fill at {},{} (tolerance {}) erased {} pixels",
            seed_x, seed_y, tolerance, erased
        );
        self.push(next);
        true
    }

    /// Keeps only the inside of the lasso. Returns false for polygons with fewer than 3 points.
    pub fn lasso_cut(&mut self, polygon: &[LassoPoint]) -> bool {
        match lasso_cut(self.image(), polygon) {
            Some(next) => {
                self.push(next);
                true
            }
            None => false,
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.edits.is_empty()
    }

    pub fn undo(&mut self) -> bool {
        self.edits.pop_back().is_some()
    }

    /// Drops every edit and returns to the loaded image.
    pub fn reset(&mut self) {
        self.edits.clear();
    }

    pub fn undo_len(&self) -> usize {
        self.edits.len()
    }

    pub fn export_data_url(&self) -> Result<String, TallerError> {
        encode_png_data_url(self.image())
    }

    fn push(&mut self, image: RgbaImage) {
        self.edits.push_back(image);
        while self.edits.len() > self.undo_depth {
            self.edits.pop_front();
        }
    }
}
