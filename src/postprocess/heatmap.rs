use image::{ImageBuffer, Luma, Rgb, RgbImage};
use imageproc::filter::separable_filter_equal;
use ndarray::Array2;

use crate::model::ProbabilityMap;
use crate::postprocess::padding::add_reflect_border;

/// Side of the square Gaussian kernel used to smooth the probability map.
pub const BLUR_KERNEL_SIZE: usize = 21;

/// Smoothed probability surface plus its false-colour rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct Heatmap {
    /// Smoothed map in `[0, 1]`, quantized to 1/255 steps.
    pub smoothed: Array2<f32>,
    pub image: RgbImage,
}

impl Heatmap {
    pub fn build(map: &ProbabilityMap) -> Self {
        let smoothed = smooth(map);
        let image = colorize(&smoothed);
        Self { smoothed, image }
    }
}

/// 1-D Gaussian weights, sigma derived from the size the way OpenCV does for `sigma = 0`.
pub fn gaussian_kernel(size: usize) -> Vec<f32> {
    let sigma = 0.3 * ((size as f64 - 1.0) * 0.5 - 1.0) + 0.8;
    let center = (size / 2) as f64;
    let weights: Vec<f64> = (0..size)
        .map(|i| {
            let d = i as f64 - center;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let total: f64 = weights.iter().sum();
    weights.iter().map(|w| (w / total) as f32).collect()
}

/// Quantize to 8 bits, blur with a `BLUR_KERNEL_SIZE` Gaussian, scale back to `[0, 1]`.
///
/// The blur runs on a reflect-101 padded copy so the frame edges match OpenCV's
/// default border; the padding is cropped off again before rounding to 8 bits.
pub fn smooth(map: &ProbabilityMap) -> Array2<f32> {
    let probabilities = map.view();
    let (width, height) = map.dimensions();
    let quantized = ImageBuffer::<Luma<f32>, Vec<f32>>::from_fn(width, height, |x, y| {
        let p = probabilities[[y as usize, x as usize]];
        Luma([f32::from((p * 255.0).clamp(0.0, 255.0) as u8)])
    });

    let radius = (BLUR_KERNEL_SIZE / 2) as u32;
    let padded = add_reflect_border(&quantized, radius);
    let blurred = separable_filter_equal(&padded, &gaussian_kernel(BLUR_KERNEL_SIZE));

    Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
        let value = blurred.get_pixel(x as u32 + radius, y as u32 + radius).0[0];
        value.round().clamp(0.0, 255.0) / 255.0
    })
}

/// Map `[0, 1]` values through the jet palette (blue → cyan → yellow → red).
pub fn colorize(smoothed: &Array2<f32>) -> RgbImage {
    let lut = jet_lut();
    let (height, width) = smoothed.dim();
    RgbImage::from_fn(width as u32, height as u32, |x, y| {
        let value = smoothed[[y as usize, x as usize]].clamp(0.0, 1.0);
        let index = ((value * 256.0) as usize).min(255);
        lut[index]
    })
}

type Segment = &'static [(f64, f64)];

const JET_RED: Segment = &[(0.0, 0.0), (0.35, 0.0), (0.66, 1.0), (0.89, 1.0), (1.0, 0.5)];
const JET_GREEN: Segment = &[
    (0.0, 0.0),
    (0.125, 0.0),
    (0.375, 1.0),
    (0.64, 1.0),
    (0.91, 0.0),
    (1.0, 0.0),
];
const JET_BLUE: Segment = &[(0.0, 0.5), (0.11, 1.0), (0.34, 1.0), (0.65, 0.0), (1.0, 0.0)];

/// 256-entry jet lookup table.
pub fn jet_lut() -> [Rgb<u8>; 256] {
    let channel = |segment: Segment, x: f64| (interpolate(segment, x) * 255.0) as u8;
    std::array::from_fn(|i| {
        let x = i as f64 / 255.0;
        Rgb([
            channel(JET_RED, x),
            channel(JET_GREEN, x),
            channel(JET_BLUE, x),
        ])
    })
}

fn interpolate(segment: Segment, x: f64) -> f64 {
    for pair in segment.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        if x <= x1 {
            if x1 == x0 {
                return y1;
            }
            return y0 + (y1 - y0) * (x - x0) / (x1 - x0);
        }
    }
    segment.last().map_or(0.0, |&(_, y)| y)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn textured_map() -> ProbabilityMap {
        ProbabilityMap::new(Array2::from_shape_fn((256, 256), |(y, x)| {
            (((x * 31 + y * 17) % 97) as f32) / 96.0
        }))
    }

    #[test]
    fn test_kernel_is_normalized_and_symmetric() {
        let kernel = gaussian_kernel(BLUR_KERNEL_SIZE);

        assert_eq!(kernel.len(), 21);
        let total: f32 = kernel.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
        for i in 0..kernel.len() {
            assert!((kernel[i] - kernel[kernel.len() - 1 - i]).abs() < 1e-7);
        }
        assert!(kernel[10] > kernel[9]);
    }

    #[test]
    fn test_edge_impulse_matches_reflected_kernel() {
        let mut values = Array2::zeros((256, 256));
        values[[128, 0]] = 1.0;
        let smoothed = smooth(&ProbabilityMap::new(values));

        // reflect-101: 境界上のインパルスは折り返されず、そのまま残る
        let kernel = gaussian_kernel(BLUR_KERNEL_SIZE);
        let expected = (255.0 * kernel[10] * kernel[10]).round() / 255.0;
        assert!((smoothed[[128, 0]] - expected).abs() < 1e-6);
        assert_eq!(smoothed[[128, 1]], smoothed[[127, 0]]);
    }

    #[test]
    fn test_constant_maps_stay_constant() {
        let ones = smooth(&ProbabilityMap::filled(1.0));
        assert!(ones.iter().all(|v| *v == 1.0));

        let zeros = smooth(&ProbabilityMap::filled(0.0));
        assert!(zeros.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_impulse_spreads_symmetrically() {
        let mut values = Array2::zeros((256, 256));
        values[[128, 128]] = 1.0;
        let smoothed = smooth(&ProbabilityMap::new(values));

        assert!(smoothed[[128, 128]] < 1.0);
        assert!(smoothed[[128, 128]] > 0.0);
        assert_eq!(smoothed[[128, 127]], smoothed[[128, 129]]);
        assert_eq!(smoothed[[127, 128]], smoothed[[129, 128]]);
        assert_eq!(smoothed[[0, 0]], 0.0);
    }

    #[test]
    fn test_jet_endpoints() {
        let lut = jet_lut();
        assert_eq!(lut[0], Rgb([0, 0, 127]));
        assert_eq!(lut[255], Rgb([127, 0, 0]));
        assert_eq!(lut[128].0[1], 255);
    }

    #[test]
    fn test_heatmap_of_uniform_maps() {
        let cold = Heatmap::build(&ProbabilityMap::filled(0.0));
        assert!(cold.image.pixels().all(|p| *p == Rgb([0, 0, 127])));

        let hot = Heatmap::build(&ProbabilityMap::filled(1.0));
        assert!(hot.image.pixels().all(|p| *p == Rgb([127, 0, 0])));
        assert_eq!(hot.image.dimensions(), (256, 256));
    }

    #[test]
    fn test_heatmap_is_deterministic() {
        let map = textured_map();
        let first = Heatmap::build(&map);
        let second = Heatmap::build(&map);

        assert_eq!(first, second);
        assert_eq!(first.image.as_raw(), second.image.as_raw());
    }

    #[test]
    fn test_input_map_is_not_mutated() {
        let map = textured_map();
        let before = map.clone();
        let _ = Heatmap::build(&map);
        assert_eq!(map, before);
    }
}
