use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType, Contour};

use crate::model::ProbabilityMap;
use crate::postprocess::padding::add_border;

/// A pixel is foreground iff its probability is strictly greater than this.
pub const MASK_THRESHOLD: f32 = 0.5;

/// Thresholded probability map, one `{0, 1}` sample per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMask(GrayImage);

impl BinaryMask {
    pub fn from_probabilities(map: &ProbabilityMap) -> Self {
        let probabilities = map.view();
        let (width, height) = map.dimensions();
        Self(GrayImage::from_fn(width, height, |x, y| {
            let foreground = probabilities[[y as usize, x as usize]] > MASK_THRESHOLD;
            Luma([u8::from(foreground)])
        }))
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.0.dimensions()
    }

    pub fn is_foreground(&self, x: u32, y: u32) -> bool {
        self.0.get_pixel(x, y).0[0] != 0
    }

    pub fn foreground_count(&self) -> usize {
        self.0.as_raw().iter().filter(|v| **v != 0).count()
    }

    /// Percentage of foreground pixels, rounded to two decimals.
    pub fn detected_area(&self) -> f64 {
        let (width, height) = self.dimensions();
        let total = f64::from(width) * f64::from(height);
        if total == 0.0 {
            return 0.0;
        }
        round_to_hundredths(self.foreground_count() as f64 / total * 100.0)
    }

    /// 0/255 rendering used for the uploaded mask artifact.
    pub fn to_image(&self) -> GrayImage {
        GrayImage::from_fn(self.0.width(), self.0.height(), |x, y| {
            Luma([if self.is_foreground(x, y) { 255 } else { 0 }])
        })
    }

    /// Every border of the foreground, outer boundaries and holes alike.
    ///
    /// The mask is padded with one background pixel first so that regions
    /// touching the frame are traced as closed boundaries.
    pub fn contours(&self) -> ContourSet {
        let padded = add_border(&self.0, 1, Luma([0u8]));
        let mut contours = find_contours::<i32>(&padded);
        for contour in &mut contours {
            for point in &mut contour.points {
                point.x -= 1;
                point.y -= 1;
            }
        }
        ContourSet(contours)
    }
}

fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Closed boundary polylines with their nesting (`parent` indexes into the set).
#[derive(Debug, Clone)]
pub struct ContourSet(Vec<Contour<i32>>);

impl ContourSet {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Contour<i32>> {
        self.0.iter()
    }

    pub fn outer(&self) -> impl Iterator<Item = &Contour<i32>> {
        self.iter().filter(|c| c.border_type == BorderType::Outer)
    }

    pub fn holes(&self) -> impl Iterator<Item = &Contour<i32>> {
        self.iter().filter(|c| c.border_type == BorderType::Hole)
    }
}
