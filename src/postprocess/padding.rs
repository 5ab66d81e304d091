use image::{imageops, GenericImageView, ImageBuffer, Pixel, Primitive};

/// Surround `image` with a uniform `border` of `color` on every side.
pub fn add_border<I, P, S>(image: &I, border: u32, color: P) -> ImageBuffer<P, Vec<S>>
where
    I: GenericImageView<Pixel = P>,
    P: Pixel<Subpixel = S>,
    S: Primitive,
{
    let (width, height) = image.dimensions();
    let mut canvas = ImageBuffer::from_pixel(width + 2 * border, height + 2 * border, color);
    imageops::overlay(&mut canvas, image, i64::from(border), i64::from(border));
    canvas
}

/// Surround `image` with a `border` mirrored around the edge pixels (`gfedcb|abcdefgh|gfedcba`).
pub fn add_reflect_border<I, P, S>(image: &I, border: u32) -> ImageBuffer<P, Vec<S>>
where
    I: GenericImageView<Pixel = P>,
    P: Pixel<Subpixel = S>,
    S: Primitive,
{
    let (width, height) = image.dimensions();
    let border = i64::from(border);
    ImageBuffer::from_fn(
        width + 2 * border as u32,
        height + 2 * border as u32,
        |x, y| {
            let sx = reflect_101(i64::from(x) - border, width);
            let sy = reflect_101(i64::from(y) - border, height);
            image.get_pixel(sx, sy)
        },
    )
}

fn reflect_101(index: i64, len: u32) -> u32 {
    if len <= 1 {
        return 0;
    }
    let last = i64::from(len) - 1;
    let mut i = index;
    loop {
        if i < 0 {
            i = -i;
        } else if i > last {
            i = 2 * last - i;
        } else {
            return i as u32;
        }
    }
}
