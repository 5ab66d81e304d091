pub mod heatmap;
pub mod mask;
pub mod overlay;
mod padding;

use image::{GrayImage, Rgb, RgbImage};

use crate::model::ProbabilityMap;

pub use heatmap::Heatmap;
pub use mask::{BinaryMask, ContourSet};

/// Everything derived from the thresholded probability map.
#[derive(Debug, Clone)]
pub struct MaskOverlay {
    pub mask: BinaryMask,
    pub contours: ContourSet,
    pub labeled: RgbImage,
    /// Detected area in percent, two decimals.
    pub confidence: f64,
}

impl MaskOverlay {
    /// `base` is the resized source image the overlay is drawn on.
    pub fn build(map: &ProbabilityMap, base: &RgbImage, fill: Option<Rgb<u8>>) -> Self {
        let mask = BinaryMask::from_probabilities(map);
        let contours = mask.contours();
        let labeled = overlay::compose_labeled(base, &mask, &contours, fill);
        let confidence = mask.detected_area();
        Self {
            mask,
            contours,
            labeled,
            confidence,
        }
    }

    pub fn detected(&self) -> bool {
        self.confidence > 0.0
    }

    pub fn mask_image(&self) -> GrayImage {
        self.mask.to_image()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_prediction() {
        let base = RgbImage::from_pixel(256, 256, Rgb([10, 20, 30]));
        let result = MaskOverlay::build(&ProbabilityMap::filled(0.0), &base, None);

        assert_eq!(result.confidence, 0.0);
        assert!(!result.detected());
        assert!(result.contours.is_empty());
        assert!(result.labeled.pixels().all(|p| *p == Rgb([7, 14, 21])));
    }

    #[test]
    fn test_full_prediction() {
        let base = RgbImage::from_pixel(256, 256, Rgb([10, 20, 30]));
        let result = MaskOverlay::build(&ProbabilityMap::filled(1.0), &base, None);

        assert_eq!(result.confidence, 100.0);
        assert!(result.detected());
        assert_eq!(result.contours.outer().count(), 1);
        assert_eq!(result.contours.len(), 1);
        assert!(result.mask_image().pixels().all(|p| p.0[0] == 255));
    }
}
