use crate::config;
use regex::Regex;
use std::sync::LazyLock;
use strum::Display;

/// Color depth of the client's display, in bits per pixel of the EBDImage
/// payloads it can decode.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum ColorDepth {
    #[strum(serialize = "1bpp")]
    Mono,
    #[strum(serialize = "2bpp")]
    Gray2,
    #[strum(serialize = "4bpp")]
    Gray4,
    #[strum(serialize = "8bpp")]
    Color8,
}

impl ColorDepth {
    pub fn bits_per_pixel(self) -> u8 {
        match self {
            Self::Mono => 1,
            Self::Gray2 => 2,
            Self::Gray4 => 4,
            Self::Color8 => 8,
        }
    }

    pub fn from_bits_per_pixel(bpp: u8) -> Option<Self> {
        match bpp {
            1 => Some(Self::Mono),
            2 => Some(Self::Gray2),
            4 => Some(Self::Gray4),
            8 => Some(Self::Color8),
            _ => None,
        }
    }
}

/// What we know about the requesting handheld. Derived once per request
/// from the User-Agent header and query parameter overrides; immutable
/// afterwards.
#[derive(Debug, Clone, Copy)]
pub struct DeviceProfile {
    /// Usable page width in pixels, after the client's 2:1 downscale.
    pub screen_width: u32,
    pub depth: ColorDepth,
    pub max_page_bytes: usize,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            screen_width: DEFAULT_SCREEN_WIDTH,
            depth: ColorDepth::Color8,
            max_page_bytes: config::get().max_page_size,
        }
    }
}

/// Half of the 306 px Xiino viewport.
pub const DEFAULT_SCREEN_WIDTH: u32 = 153;

static XIINO_UA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:Xiino|Palmscape)/(\d+)\.(\d+)([A-Z]*)").expect("static regex must compile"));

impl DeviceProfile {
    /// Builds a profile from the request's User-Agent and query string.
    /// Query parameters win over UA sniffing: `ebddepth` (1/2/4/8),
    /// `ebdwidth`, and `grayscale` (truthy forces 4bpp gray).
    pub fn detect<'a>(user_agent: Option<&str>, query_pairs: impl Iterator<Item = (&'a str, &'a str)>) -> Self {
        let mut profile = Self::default();

        if let Some(ua) = user_agent
            && let Some(captures) = XIINO_UA.captures(ua)
        {
            let build_tags = captures.get(3).map(|tags| tags.as_str()).unwrap_or("");
            if ua.contains("Palmscape") {
                // Palmscape predates color Palm devices
                profile.depth = ColorDepth::Gray4;
            } else if build_tags.contains('M') {
                profile.depth = ColorDepth::Mono;
            }
        }

        for (key, value) in query_pairs {
            match key {
                "ebddepth" => {
                    if let Some(depth) = value.parse().ok().and_then(ColorDepth::from_bits_per_pixel) {
                        profile.depth = depth;
                    }
                }
                "ebdwidth" => {
                    if let Ok(width) = value.parse::<u32>()
                        && (1..=1024).contains(&width)
                    {
                        profile.screen_width = width;
                    }
                }
                "grayscale" => {
                    if matches!(value, "1" | "true" | "yes") {
                        profile.depth = ColorDepth::Gray4;
                    }
                }
                _ => (),
            }
        }
        profile
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_is_color() {
        let profile = DeviceProfile::detect(Some("Mozilla/4.0 (compatible; MSIE 6.0)"), std::iter::empty());
        assert_eq!(profile.depth, ColorDepth::Color8);
        assert_eq!(profile.screen_width, 153);
    }

    #[test]
    fn monochrome_xiino_build() {
        let profile = DeviceProfile::detect(Some("Mozilla/1.22 (compatible; Xiino/3.4M; PalmOS 4.1)"), std::iter::empty());
        assert_eq!(profile.depth, ColorDepth::Mono);
    }

    #[test]
    fn palmscape_is_grayscale() {
        let profile = DeviceProfile::detect(Some("Palmscape/1.0 (PalmOS 3.0)"), std::iter::empty());
        assert_eq!(profile.depth, ColorDepth::Gray4);
    }

    #[test]
    fn query_overrides_user_agent() {
        let pairs = [("ebddepth", "2"), ("ebdwidth", "100")];
        let profile = DeviceProfile::detect(Some("Xiino/3.4E"), pairs.into_iter());
        assert_eq!(profile.depth, ColorDepth::Gray2);
        assert_eq!(profile.screen_width, 100);
    }

    #[test]
    fn bad_query_values_ignored() {
        let pairs = [("ebddepth", "7"), ("ebdwidth", "0")];
        let profile = DeviceProfile::detect(None, pairs.into_iter());
        assert_eq!(profile.depth, ColorDepth::Color8);
        assert_eq!(profile.screen_width, 153);
    }
}
