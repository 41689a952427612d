use crate::config::DitherPriority;
use crate::palette::{Lab, Palette, Rgb, srgb_to_lab};
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};

/// The width above which the client would scroll horizontally even after
/// its own 2:1 downscale.
const FULL_VIEWPORT_WIDTH: u32 = 306;

/*
    The Xiino scaling law: anything wider than the 306 px viewport is
    clamped to the half-viewport width; everything else is halved, because
    the client doubles pixel sizes when laying out proxy output. Height
    follows the width's ratio. Dimensions never reach zero.
*/
pub fn scale_dimensions(width: u32, height: u32, screen_width: u32) -> (u32, u32) {
    let target_width = if width > 2 * screen_width || width > FULL_VIEWPORT_WIDTH {
        screen_width
    } else {
        (width / 2).max(1)
    };
    let target_height = ((u64::from(height) * u64::from(target_width)) / u64::from(width.max(1))).max(1) as u32;
    (target_width, target_height.min(u16::MAX as u32))
}

/// Resamples to the target size and flattens any alpha onto a white
/// background. Lanczos3 in quality mode, bilinear in performance mode.
pub fn resize(image: &DynamicImage, width: u32, height: u32, priority: DitherPriority) -> RgbImage {
    let filter = match priority {
        DitherPriority::Quality => FilterType::Lanczos3,
        DitherPriority::Performance => FilterType::Triangle,
    };

    let rgba = image.resize_exact(width, height, filter).into_rgba8();
    let mut rgb = RgbImage::new(width, height);
    for (source, target) in rgba.pixels().zip(rgb.pixels_mut()) {
        let [r, g, b, a] = source.0;
        let alpha = a as u16;
        target.0 = [
            ((r as u16 * alpha + 255 * (255 - alpha)) / 255) as u8,
            ((g as u16 * alpha + 255 * (255 - alpha)) / 255) as u8,
            ((b as u16 * alpha + 255 * (255 - alpha)) / 255) as u8,
        ];
    }
    rgb
}

/// Maps every pixel to a palette index. Quality mode runs Floyd–Steinberg
/// error diffusion in LAB space; performance mode runs ordered Bayer
/// dithering through the palette's lookup cube.
pub fn quantize(image: &RgbImage, palette: &Palette, priority: DitherPriority) -> Vec<u8> {
    match priority {
        DitherPriority::Quality => floyd_steinberg(image, palette),
        DitherPriority::Performance => ordered(image, palette),
    }
}

/*
    Floyd-Steinberg with the error carried in LAB components rather than
    RGB, so the diffused residual tracks perceptual rather than numeric
    error. Rows alternate direction (serpentine) to avoid the diagonal
    banding a fixed scan direction produces. Weights are the classic
    7/16, 3/16, 5/16, 1/16 split.
*/
fn floyd_steinberg(image: &RgbImage, palette: &Palette) -> Vec<u8> {
    let width = image.width() as usize;
    let height = image.height() as usize;
    let mut indices = vec![0; width * height];

    // Two rows of carried error: current and next
    let mut current_error = vec![[0f32; 3]; width];
    let mut next_error = vec![[0f32; 3]; width];

    for y in 0..height {
        let reverse = y % 2 == 1;
        let columns: Box<dyn Iterator<Item = usize>> = if reverse {
            Box::new((0..width).rev())
        } else {
            Box::new(0..width)
        };

        for x in columns {
            let pixel = image.get_pixel(x as u32, y as u32);
            let lab = srgb_to_lab(Rgb(pixel.0));
            let carried = current_error[x];
            let adjusted = Lab {
                l: lab.l + carried[0],
                a: lab.a + carried[1],
                b: lab.b + carried[2],
            };

            let index = palette.nearest_lab(adjusted);
            indices[y * width + x] = index;

            let chosen = palette.lab(index);
            let error = [adjusted.l - chosen.l, adjusted.a - chosen.a, adjusted.b - chosen.b];

            let forward = if reverse { x.checked_sub(1) } else { (x + 1 < width).then_some(x + 1) };
            let backward = if reverse { (x + 1 < width).then_some(x + 1) } else { x.checked_sub(1) };
            if let Some(fx) = forward {
                accumulate(&mut current_error[fx], error, 7.0 / 16.0);
                accumulate(&mut next_error[fx], error, 1.0 / 16.0);
            }
            if let Some(bx) = backward {
                accumulate(&mut next_error[bx], error, 3.0 / 16.0);
            }
            accumulate(&mut next_error[x], error, 5.0 / 16.0);
        }

        std::mem::swap(&mut current_error, &mut next_error);
        next_error.iter_mut().for_each(|e| *e = [0.0; 3]);
    }
    indices
}

fn accumulate(slot: &mut [f32; 3], error: [f32; 3], weight: f32) {
    slot[0] += error[0] * weight;
    slot[1] += error[1] * weight;
    slot[2] += error[2] * weight;
}

// Standard 8x8 Bayer threshold matrix, values 0..63
const BAYER_8X8: [[u8; 8]; 8] = [
    [0, 32, 8, 40, 2, 34, 10, 42],
    [48, 16, 56, 24, 50, 18, 58, 26],
    [12, 44, 4, 36, 14, 46, 6, 38],
    [60, 28, 52, 20, 62, 30, 54, 22],
    [3, 35, 11, 43, 1, 33, 9, 41],
    [51, 19, 59, 27, 49, 17, 57, 25],
    [15, 47, 7, 39, 13, 45, 5, 37],
    [63, 31, 55, 23, 61, 29, 53, 21],
];

/*
    Ordered dithering perturbs each channel by a position-dependent offset
    scaled to the palette's quantization step, then snaps through the
    lookup cube. No error propagation, so rows are independent and the
    whole pass vectorizes.
*/
fn ordered(image: &RgbImage, palette: &Palette) -> Vec<u8> {
    let spread = quantization_step(palette.len());

    image
        .enumerate_pixels()
        .map(|(x, y, pixel)| {
            let threshold = BAYER_8X8[(y % 8) as usize][(x % 8) as usize] as f32 / 64.0 - 0.5;
            let offset = threshold * spread;
            let perturbed = Rgb(pixel.0.map(|channel| (channel as f32 + offset).clamp(0.0, 255.0) as u8));
            palette.index_of(perturbed)
        })
        .collect()
}

/// Distance between adjacent representable levels: 255/(n-1) for the gray
/// ramps, the web-cube channel step for the color palette.
fn quantization_step(palette_len: usize) -> f32 {
    match palette_len {
        2 => 255.0,
        4 => 85.0,
        16 => 17.0,
        _ => 51.0,
    }
}
