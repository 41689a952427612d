use crate::ebd::InvalidPixelIndex;
use crate::error::ErrorKind;
use crate::pages;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

pub type ApiResult<T> = Result<T, Error>;

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub enum Error {
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("request body exceeds the configured limit")]
    RequestTooLarge,
    #[error("content exceeds size limits")]
    TooLarge,
    #[error("deadline elapsed")]
    Timeout,
    #[error("upstream returned status {0}")]
    UpstreamStatus(StatusCode),
    #[error("url scheme '{0}' is not supported")]
    UnsupportedScheme(String),
    #[error("content type '{0}' cannot be rendered on the device")]
    UnsupportedContent(String),
    #[error("document could not be parsed")]
    ParseFailure,
    #[error("no such built-in page")]
    UnknownBuiltin,
    #[error("request is missing a target url")]
    MissingTarget,
    #[error("worker task was dropped before completing")]
    Canceled,
    InvalidPixel(#[from] InvalidPixelIndex),
    InvalidUrl(#[from] url::ParseError),
    Fetch(#[from] reqwest::Error),
    Image(#[from] image::ImageError),
    Svg(#[from] resvg::usvg::Error),
    StdIo(#[from] std::io::Error),
    Template(#[from] tera::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::RequestTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::TooLarge => StatusCode::BAD_GATEWAY,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamStatus(status) => *status,
            Self::UnsupportedScheme(_) | Self::MissingTarget => StatusCode::BAD_REQUEST,
            Self::UnsupportedContent(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::UnknownBuiltin => StatusCode::NOT_FOUND,
            Self::ParseFailure => StatusCode::BAD_GATEWAY,
            Self::Canceled => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidPixel(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            Self::Fetch(err) => {
                if err.is_timeout() {
                    StatusCode::GATEWAY_TIMEOUT
                } else {
                    StatusCode::BAD_GATEWAY
                }
            }
            Self::Image(_) | Self::Svg(_) => StatusCode::BAD_GATEWAY,
            Self::StdIo(_) | Self::Template(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable name for logs and tests.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited => "RateLimited",
            Self::RequestTooLarge => "RequestTooLarge",
            Self::TooLarge => "TooLarge",
            Self::Timeout => "Timeout",
            Self::UpstreamStatus(_) => "UpstreamStatus",
            Self::UnsupportedScheme(_) => "UnsupportedScheme",
            Self::UnsupportedContent(_) => "UnsupportedContent",
            Self::ParseFailure => "ParseFailure",
            Self::UnknownBuiltin => "UnknownBuiltin",
            Self::MissingTarget => "MissingTarget",
            Self::Canceled => "Canceled",
            Self::InvalidPixel(_) => "InvalidPixelIndex",
            Self::InvalidUrl(_) => "InvalidUrl",
            Self::Fetch(err) => err.kind(),
            Self::Image(err) => err.kind(),
            Self::Svg(err) => err.kind(),
            Self::StdIo(err) => crate::error::ErrorKind::kind(err),
            Self::Template(_) => "TemplateError",
        }
    }
}

/// Errors render as Xiino-legal pages: the client chokes on bare status
/// lines and cannot display JSON.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let html = pages::error_page(status, self.kind(), &self.to_string());
        (status, [("content-type", "text/html")], html).into_response()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn spec_kinds_are_distinct() {
        let errors = [
            Error::TooLarge,
            Error::Timeout,
            Error::UpstreamStatus(StatusCode::NOT_FOUND),
            Error::RateLimited,
            Error::RequestTooLarge,
            Error::UnsupportedScheme(String::from("gopher")),
            Error::ParseFailure,
        ];
        let kinds: std::collections::HashSet<_> = errors.iter().map(Error::kind).collect();
        assert_eq!(kinds.len(), errors.len());
    }

    #[test]
    fn upstream_status_propagates() {
        let error = Error::UpstreamStatus(StatusCode::UNAUTHORIZED);
        assert_eq!(error.status_code(), StatusCode::UNAUTHORIZED);
    }
}
