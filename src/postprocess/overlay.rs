use image::{Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;

use crate::postprocess::mask::{BinaryMask, ContourSet};

pub const BASE_WEIGHT: f32 = 0.7;
pub const FILL_WEIGHT: f32 = 0.3;
pub const CONTOUR_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const CONTOUR_THICKNESS: i32 = 2;

/// Blend the region fill onto `base` and outline every contour.
///
/// With `fill == None` the fill layer is black everywhere, which only darkens
/// the base; the contour outlines are what marks the detected region.
pub fn compose_labeled(
    base: &RgbImage,
    mask: &BinaryMask,
    contours: &ContourSet,
    fill: Option<Rgb<u8>>,
) -> RgbImage {
    let (mask_width, mask_height) = mask.dimensions();
    let mut labeled = RgbImage::from_fn(base.width(), base.height(), |x, y| {
        let in_region = x < mask_width && y < mask_height && mask.is_foreground(x, y);
        let fill = match fill {
            Some(color) if in_region => color,
            _ => Rgb([0, 0, 0]),
        };
        blend(base.get_pixel(x, y), &fill)
    });
    draw_contours(&mut labeled, contours, CONTOUR_COLOR);
    labeled
}

fn blend(base: &Rgb<u8>, fill: &Rgb<u8>) -> Rgb<u8> {
    let mix = |b: u8, f: u8| {
        (f32::from(b) * BASE_WEIGHT + f32::from(f) * FILL_WEIGHT)
            .round()
            .clamp(0.0, 255.0) as u8
    };
    Rgb([
        mix(base.0[0], fill.0[0]),
        mix(base.0[1], fill.0[1]),
        mix(base.0[2], fill.0[2]),
    ])
}

/// Draw each closed polyline with a square brush `CONTOUR_THICKNESS` wide.
///
/// Brush offsets that would leave the frame fold back inside it, so outlines on
/// the right and bottom edges keep their full width.
pub fn draw_contours(canvas: &mut RgbImage, contours: &ContourSet, color: Rgb<u8>) {
    let (width, height) = (canvas.width() as i32, canvas.height() as i32);
    for contour in contours.iter() {
        let points = &contour.points;
        for (i, start) in points.iter().enumerate() {
            let end = points[(i + 1) % points.len()];
            for dy in 0..CONTOUR_THICKNESS {
                for dx in 0..CONTOUR_THICKNESS {
                    draw_line_segment_mut(
                        canvas,
                        (brush(start.x, dx, width), brush(start.y, dy, height)),
                        (brush(end.x, dx, width), brush(end.y, dy, height)),
                        color,
                    );
                }
            }
        }
    }
}

fn brush(coordinate: i32, offset: i32, len: i32) -> f32 {
    let shifted = coordinate + offset;
    if shifted >= len {
        (shifted - CONTOUR_THICKNESS) as f32
    } else {
        shifted as f32
    }
}
