use crate::string::SmallString;
use std::fmt::Display;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;
use strum::{Display, EnumString};
use tracing::warn;

/// Controls the resampling filter and dithering algorithm used by the image
/// pipeline. `Quality` buys Lanczos3 + error diffusion, `Performance` buys
/// bilinear + ordered dithering.
#[derive(Debug, Display, EnumString, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DitherPriority {
    Quality,
    Performance,
}

pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub log_filter: String,

    pub http_timeout: Duration,
    pub max_page_size: usize,
    pub user_agent: SmallString,
    pub socks_proxy: Option<SmallString>,

    pub attempt_https_upgrade: bool,
    pub allow_redirects: bool,
    pub max_redirects: u32,
    pub max_requests_per_min: u32,
    pub max_request_size: usize,

    pub image_max_size: usize,
    pub image_max_svg_size: usize,
    pub image_max_pixels: u64,
    pub image_max_dimension: u32,
    pub svg_timeout: Duration,
    pub image_processing_timeout: Duration,
    pub dither_priority: DitherPriority,
}

pub fn get() -> &'static Config {
    &CONFIG
}

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Reads an environment variable, falling back to `default` when the
/// variable is unset or fails to parse. Parse failures emit a warning so
/// that typos in deployment configs surface in the logs.
fn read_var<T>(name: &str, default: T) -> T
where
    T: FromStr + Display,
{
    match std::env::var(name) {
        Ok(value) => match value.parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Invalid value '{value}' for {name}, using default of {default}");
                default
            }
        },
        Err(_) => default,
    }
}

fn read_optional_var(name: &str) -> Option<SmallString> {
    std::env::var(name).ok().filter(|value| !value.is_empty()).map(SmallString::from)
}

static CONFIG: LazyLock<Config> = LazyLock::new(|| {
    const KB: usize = 1024;
    const MB: usize = 1024 * KB;

    // A .env file is optional outside of packaged deployments
    let _ = dotenvy::dotenv();

    Config {
        host: read_var("SERVER_HOST", IpAddr::from([0, 0, 0, 0])),
        port: read_var("SERVER_PORT", 8080),
        log_filter: read_var("LOG_FILTER", String::from("info")),
        http_timeout: Duration::from_secs(read_var("HTTP_TIMEOUT", 30)),
        max_page_size: KB * read_var("HTTP_MAX_PAGE_SIZE", 512),
        user_agent: read_var(
            "HTTP_USER_AGENT",
            SmallString::from(concat!("Mozilla/5.0 (compatible; dataserver/", env!("CARGO_PKG_VERSION"), ")")),
        ),
        socks_proxy: read_optional_var("HTTP_SOCKS_PROXY"),
        attempt_https_upgrade: read_var("SECURITY_ATTEMPT_HTTPS_UPGRADE", true),
        allow_redirects: read_var("SECURITY_ALLOW_REDIRECTS", true),
        max_redirects: read_var("SECURITY_MAX_REDIRECTS", 5),
        max_requests_per_min: read_var("SECURITY_MAX_REQUESTS_PER_MIN", 60),
        max_request_size: MB * read_var("SECURITY_MAX_REQUEST_SIZE", 1),
        image_max_size: read_var("IMAGE_MAX_SIZE", 4 * MB),
        image_max_svg_size: read_var("IMAGE_MAX_SVG_SIZE", 256 * KB),
        image_max_pixels: read_var("IMAGE_MAX_PIXELS", 8_388_608),
        image_max_dimension: read_var("IMAGE_MAX_DIMENSION", 4096),
        svg_timeout: Duration::from_secs(read_var("IMAGE_SVG_TIMEOUT", 5)),
        image_processing_timeout: Duration::from_secs(read_var("IMAGE_PROCESSING_TIMEOUT", 10)),
        dither_priority: read_var("IMAGE_DITHER_PRIORITY", DitherPriority::Quality),
    }
});
