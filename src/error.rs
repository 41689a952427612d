pub trait ErrorKind {
    fn kind(&self) -> &'static str;
}

impl ErrorKind for reqwest::Error {
    fn kind(&self) -> &'static str {
        if self.is_timeout() {
            "RequestTimeout"
        } else if self.is_connect() {
            "ConnectionFailed"
        } else if self.is_redirect() {
            "RedirectPolicy"
        } else if self.is_body() || self.is_decode() {
            "MalformedBody"
        } else if self.is_builder() {
            "ClientBuilder"
        } else {
            "UnknownRequestError"
        }
    }
}

impl ErrorKind for image::ImageError {
    fn kind(&self) -> &'static str {
        match self {
            Self::Decoding(_) => "ImageDecoding",
            Self::Encoding(_) => "ImageEncoding",
            Self::Parameter(_) => "ImageParameter",
            Self::Limits(_) => "ImageLimits",
            Self::Unsupported(_) => "UnsupportedImage",
            Self::IoError(_) => "ImageIo",
        }
    }
}

impl ErrorKind for std::io::Error {
    fn kind(&self) -> &'static str {
        use std::io::ErrorKind as IoKind;
        match std::io::Error::kind(self) {
            IoKind::NotFound => "FileNotFound",
            IoKind::PermissionDenied => "PermissionDenied",
            IoKind::ConnectionRefused => "ConnectionRefused",
            IoKind::ConnectionReset => "ConnectionReset",
            IoKind::TimedOut => "IoTimeout",
            IoKind::UnexpectedEof => "UnexpectedEof",
            _ => "UnknownIoError",
        }
    }
}

impl ErrorKind for resvg::usvg::Error {
    fn kind(&self) -> &'static str {
        use resvg::usvg::Error as SvgError;
        match self {
            SvgError::NotAnUtf8Str => "SvgNotUtf8",
            SvgError::MalformedGZip => "SvgMalformedGzip",
            SvgError::ElementsLimitReached => "SvgElementsLimit",
            SvgError::InvalidSize => "SvgInvalidSize",
            SvgError::ParsingFailed(_) => "SvgParsingFailed",
        }
    }
}
