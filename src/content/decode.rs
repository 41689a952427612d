use crate::api::ApiResult;
use crate::content::dither;
use crate::{api, config};
use image::{DynamicImage, ImageFormat, ImageReader, ImageResult, Limits, Rgb, RgbImage};
use resvg::{tiny_skia, usvg};
use std::io::Cursor;

/// Decodes a raw array of bytes into pixel data. For animated formats the
/// decoder yields the first frame.
pub fn raster(bytes: &[u8], format: ImageFormat) -> ImageResult<DynamicImage> {
    let mut reader = ImageReader::new(Cursor::new(bytes));
    reader.set_format(format);
    reader.limits(image_reader_limits());
    reader.decode()
}

fn image_reader_limits() -> Limits {
    const MB: u64 = 1024 * 1024;

    let mut limits = Limits::no_limits();
    limits.max_image_width = Some(config::get().image_max_dimension);
    limits.max_image_height = Some(config::get().image_max_dimension);
    limits.max_alloc = Some(512 * MB);
    limits
}

/// Rasterizes SVG bytes at the dimensions the page will actually use,
/// already composited onto a white background.
///
/// The target size comes from applying the Xiino scaling law to the SVG's
/// intrinsic size, so a 50 KB file declaring a billion-pixel canvas still
/// renders into a handheld-sized pixmap.
pub fn svg(bytes: &[u8], screen_width: u32) -> ApiResult<RgbImage> {
    let options = usvg::Options::default();
    let tree = usvg::Tree::from_data(bytes, &options)?;

    let intrinsic_width = tree.size().width();
    let intrinsic_height = tree.size().height();
    if intrinsic_width < 1.0 || intrinsic_height < 1.0 {
        return Err(usvg::Error::InvalidSize.into());
    }

    let (target_width, target_height) =
        dither::scale_dimensions(intrinsic_width.round() as u32, intrinsic_height.round() as u32, screen_width);
    let mut pixmap = tiny_skia::Pixmap::new(target_width, target_height).ok_or(api::Error::TooLarge)?;
    pixmap.fill(tiny_skia::Color::WHITE);

    let transform =
        tiny_skia::Transform::from_scale(target_width as f32 / intrinsic_width, target_height as f32 / intrinsic_height);
    resvg::render(&tree, transform, &mut pixmap.as_mut());

    // tiny-skia yields premultiplied RGBA; the white fill leaves every pixel
    // opaque, so the color channels can be taken as-is.
    let data = pixmap.take();
    let rgb = RgbImage::from_fn(target_width, target_height, |x, y| {
        let offset = (y * target_width + x) as usize * 4;
        Rgb([data[offset], data[offset + 1], data[offset + 2]])
    });
    Ok(rgb)
}
