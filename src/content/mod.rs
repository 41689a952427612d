pub mod decode;
pub mod dither;

use crate::api::ApiResult;
use crate::budget::Budget;
use crate::device::DeviceProfile;
use crate::ebd::EbdImage;
use crate::{api, config, ebd, palette};
use std::time::Instant;
use strum::{Display, EnumString};

/// Image formats the pipeline accepts. Everything else is rejected at
/// admission.
#[derive(Debug, Display, EnumString, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum ImageKind {
    Png,
    Jpeg,
    Gif,
    WebP,
    Tiff,
    Bmp,
    Svg,
}

impl ImageKind {
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type.split(';').next().unwrap_or("").trim();
        match essence {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/gif" => Some(Self::Gif),
            "image/webp" => Some(Self::WebP),
            "image/tiff" => Some(Self::Tiff),
            "image/bmp" | "image/x-ms-bmp" => Some(Self::Bmp),
            "image/svg+xml" => Some(Self::Svg),
            _ => None,
        }
    }

    /// Signature-based detection for servers that send images with a
    /// generic or wrong content-type.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0x89, b'P', b'N', b'G', ..] => Some(Self::Png),
            [0xFF, 0xD8, 0xFF, ..] => Some(Self::Jpeg),
            [b'G', b'I', b'F', b'8', ..] => Some(Self::Gif),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(Self::WebP),
            [b'I', b'I', 0x2A, 0x00, ..] | [b'M', b'M', 0x00, 0x2A, ..] => Some(Self::Tiff),
            [b'B', b'M', ..] => Some(Self::Bmp),
            _ => {
                let head = std::str::from_utf8(&bytes[..bytes.len().min(512)]).ok()?;
                let head = head.trim_start();
                (head.starts_with("<svg") || (head.starts_with("<?xml") && head.contains("<svg"))).then_some(Self::Svg)
            }
        }
    }

    pub fn detect(content_type: Option<&str>, bytes: &[u8]) -> Option<Self> {
        content_type.and_then(Self::from_content_type).or_else(|| Self::sniff(bytes))
    }

    fn to_image_format(self) -> Option<image::ImageFormat> {
        match self {
            Self::Png => Some(image::ImageFormat::Png),
            Self::Jpeg => Some(image::ImageFormat::Jpeg),
            Self::Gif => Some(image::ImageFormat::Gif),
            Self::WebP => Some(image::ImageFormat::WebP),
            Self::Tiff => Some(image::ImageFormat::Tiff),
            Self::Bmp => Some(image::ImageFormat::Bmp),
            Self::Svg => None,
        }
    }
}

/// Runs the full image pipeline: admission, decode, bounds check, resize,
/// quantize/dither, and EBD encoding. CPU-bound; callers run it on the
/// worker pool. The deadline is checked between stages so an expired
/// request unwinds at the next stage boundary.
pub fn transcode(bytes: &[u8], kind: ImageKind, device: &DeviceProfile, deadline: Instant) -> ApiResult<EbdImage> {
    let config = config::get();

    // Admission
    let size_limit = match kind {
        ImageKind::Svg => config.image_max_svg_size,
        _ => config.image_max_size,
    };
    if bytes.len() > size_limit {
        return Err(api::Error::TooLarge);
    }

    // Decode, bounds-check, resize. SVG is rasterized directly at the
    // post-resize dimensions so a tiny file declaring an enormous canvas
    // cannot force a huge allocation.
    let resized = match kind.to_image_format() {
        Some(format) => {
            let decoded = decode::raster(bytes, format)?;
            check_deadline(deadline)?;

            let (width, height) = (decoded.width(), decoded.height());
            if u64::from(width) * u64::from(height) > config.image_max_pixels
                || width > config.image_max_dimension
                || height > config.image_max_dimension
            {
                return Err(api::Error::TooLarge);
            }

            let (target_width, target_height) = dither::scale_dimensions(width, height, device.screen_width);
            dither::resize(&decoded, target_width, target_height, config.dither_priority)
        }
        None => decode::svg(bytes, device.screen_width)?,
    };
    check_deadline(deadline)?;

    // Quantize & dither
    let palette = palette::palette_for(device.depth);
    let indices = dither::quantize(&resized, palette, config.dither_priority);
    check_deadline(deadline)?;

    // Encode
    let (width, height) = (resized.width() as u16, resized.height() as u16);
    ebd::encode(&indices, width, height, device.depth).map_err(api::Error::from)
}

/// Pipeline result with everything the transcoder needs to rewrite an
/// `<IMG>` element, plus the byte cost to charge against the page budget.
#[derive(Debug, Clone)]
pub struct InlineImage {
    pub src: String,
    pub width: u16,
    pub height: u16,
    pub byte_len: usize,
}

impl InlineImage {
    pub fn from_ebd(image: &EbdImage) -> Self {
        let src = image.serialize();
        Self {
            byte_len: src.len(),
            width: image.width,
            height: image.height,
            src,
        }
    }

    /// Whether this image still fits the page. Charges the budget when it
    /// does.
    pub fn charge(&self, budget: &mut Budget) -> bool {
        budget.try_charge_bytes(self.byte_len)
    }
}

fn check_deadline(deadline: Instant) -> ApiResult<()> {
    if Instant::now() >= deadline {
        Err(api::Error::Timeout)
    } else {
        Ok(())
    }
}
