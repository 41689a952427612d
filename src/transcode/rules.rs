use url::Url;

/// How an attribute's value is validated before it may survive. A failed
/// validation drops the attribute, never the element.
#[derive(Debug, Clone, Copy)]
pub enum AttrValue {
    /// Free text.
    Any,
    /// Boolean attribute; the value is discarded on output.
    Flag,
    /// Non-negative integer.
    Number,
    /// Non-negative integer or percentage.
    Measure,
    /// `#rgb`/`#rrggbb` or a color name.
    Color,
    /// Member of a fixed set, case-insensitive.
    Choice(&'static [&'static str]),
    /// Resolved against the document base; http/https/mailto/`.xiino` only.
    Url,
}

pub struct AttrRule {
    pub name: &'static str,
    pub value: AttrValue,
}

const fn attr(name: &'static str, value: AttrValue) -> AttrRule {
    AttrRule { name, value }
}

use AttrValue::{Any, Choice, Color, Flag, Measure, Number, Url as UrlValue};

const ALIGN_LCR: &[&str] = &["left", "center", "right"];
const VALIGN: &[&str] = &["top", "middle", "bottom", "baseline"];

const NO_ATTRS: &[AttrRule] = &[];
const A: &[AttrRule] = &[attr("href", UrlValue), attr("name", Any)];
const AREA: &[AttrRule] = &[
    attr("href", UrlValue),
    attr("shape", Choice(&["rect", "circle", "poly", "default"])),
    attr("coords", Any),
    attr("alt", Any),
    attr("nohref", Flag),
];
const BASE: &[AttrRule] = &[attr("href", UrlValue)];
const BASEFONT: &[AttrRule] = &[attr("size", Number), attr("color", Color)];
const BODY: &[AttrRule] = &[
    attr("bgcolor", Color),
    attr("text", Color),
    attr("link", Color),
    attr("vlink", Color),
    attr("alink", Color),
    attr("background", UrlValue),
];
const BR: &[AttrRule] = &[attr("clear", Choice(&["left", "right", "all", "none"]))];
const CAPTION: &[AttrRule] = &[attr("align", Choice(&["top", "bottom", "left", "right"]))];
const DIV: &[AttrRule] = &[attr("align", Choice(ALIGN_LCR))];
const UL: &[AttrRule] = &[attr("type", Choice(&["disc", "circle", "square"])), attr("compact", Flag)];
const OL: &[AttrRule] = &[attr("type", Choice(&["1", "a", "i"])), attr("start", Number), attr("compact", Flag)];
const LI: &[AttrRule] = &[
    attr("type", Choice(&["disc", "circle", "square", "1", "a", "i"])),
    attr("value", Number),
];
const FONT: &[AttrRule] = &[attr("size", Any), attr("color", Color), attr("face", Any)];
const FORM: &[AttrRule] = &[
    attr("action", UrlValue),
    attr("method", Choice(&["get", "post"])),
    attr("enctype", Any),
    attr("name", Any),
];
const FRAME: &[AttrRule] = &[attr("src", UrlValue), attr("name", Any)];
const HEADING: &[AttrRule] = &[attr("align", Choice(ALIGN_LCR))];
const HR: &[AttrRule] = &[
    attr("align", Choice(ALIGN_LCR)),
    attr("size", Number),
    attr("width", Measure),
    attr("noshade", Flag),
];
const IMG: &[AttrRule] = &[
    attr("src", UrlValue),
    attr("ebdwidth", Number),
    attr("ebdheight", Number),
    attr("alt", Any),
    attr("align", Choice(&["top", "middle", "bottom", "left", "right"])),
    attr("width", Number),
    attr("height", Number),
    attr("border", Number),
    attr("hspace", Number),
    attr("vspace", Number),
    attr("ismap", Flag),
    attr("usemap", Any),
];
const INPUT: &[AttrRule] = &[
    attr(
        "type",
        Choice(&["text", "password", "checkbox", "radio", "submit", "reset", "hidden", "image", "button"]),
    ),
    attr("name", Any),
    attr("value", Any),
    attr("checked", Flag),
    attr("size", Number),
    attr("maxlength", Number),
    attr("src", UrlValue),
    attr("align", Choice(ALIGN_LCR)),
];
const ISINDEX: &[AttrRule] = &[attr("prompt", Any), attr("action", UrlValue)];
const MAP: &[AttrRule] = &[attr("name", Any)];
const META: &[AttrRule] = &[attr("http-equiv", Any), attr("content", Any), attr("name", Any)];
const MULTICOL: &[AttrRule] = &[attr("cols", Number)];
const SELECT: &[AttrRule] = &[attr("name", Any), attr("size", Number), attr("multiple", Flag)];
const OPTION: &[AttrRule] = &[attr("value", Any), attr("selected", Flag)];
const TABLE: &[AttrRule] = &[
    attr("border", Number),
    attr("width", Measure),
    attr("cellpadding", Number),
    attr("cellspacing", Number),
    attr("align", Choice(ALIGN_LCR)),
    attr("bgcolor", Color),
];
const TD: &[AttrRule] = &[
    attr("align", Choice(ALIGN_LCR)),
    attr("valign", Choice(VALIGN)),
    attr("width", Measure),
    attr("height", Measure),
    attr("colspan", Number),
    attr("rowspan", Number),
    attr("nowrap", Flag),
    attr("bgcolor", Color),
];
const TR: &[AttrRule] = &[attr("align", Choice(ALIGN_LCR)), attr("valign", Choice(VALIGN)), attr("bgcolor", Color)];

/// The tag allow-list, straight from the Xiino 3.4E documentation, plus
/// the structural `html`/`head`/`title` scaffolding a well-formed document
/// needs. Anything absent is stripped (children promoted); tags in
/// [`is_deleted`] are removed subtree and all.
pub fn allowed_attrs(tag: &str) -> Option<&'static [AttrRule]> {
    Some(match tag {
        "a" => A,
        "area" => AREA,
        "base" => BASE,
        "basefont" => BASEFONT,
        "body" => BODY,
        "br" => BR,
        "caption" => CAPTION,
        "center" | "div" | "p" => DIV,
        "dir" | "dl" | "ul" => UL,
        "font" => FONT,
        "form" => FORM,
        "frame" => FRAME,
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => HEADING,
        "hr" => HR,
        "img" => IMG,
        "input" => INPUT,
        "isindex" => ISINDEX,
        "li" => LI,
        "map" => MAP,
        "meta" => META,
        "multicol" => MULTICOL,
        "ol" => OL,
        "option" => OPTION,
        "select" => SELECT,
        "table" => TABLE,
        "td" | "th" => TD,
        "tr" => TR,
        "address" | "b" | "blink" | "blockquote" | "cite" | "code" | "dd" | "dt" | "frameset" | "head" | "html"
        | "i" | "kbd" | "nobr" | "noframes" | "plaintext" | "pre" | "s" | "small" | "strike" | "strong" | "sub"
        | "sup" | "title" | "tt" | "u" | "var" | "wbr" | "xmp" => NO_ATTRS,
        _ => return None,
    })
}

/// Tags whose subtree is removed outright: executable or binary content
/// the client cannot render, and head metadata that is not `title`/`base`.
pub fn is_deleted(tag: &str) -> bool {
    matches!(
        tag,
        "script"
            | "style"
            | "applet"
            | "embed"
            | "object"
            | "iframe"
            | "audio"
            | "video"
            | "source"
            | "track"
            | "canvas"
            | "svg"
            | "template"
            | "link"
    )
}

/// Void elements: serialized without a closing tag, and any parsed
/// children are promoted out.
pub fn is_void(tag: &str) -> bool {
    matches!(
        tag,
        "area" | "base" | "basefont" | "br" | "frame" | "hr" | "img" | "input" | "isindex" | "meta" | "wbr"
    )
}

/// Validates an attribute value against its rule. Returns the value to
/// keep (possibly normalized, e.g. resolved URLs) or `None` to drop the
/// attribute.
pub fn validate(rule: AttrValue, value: &str, base: &Url) -> Option<String> {
    let trimmed = value.trim();
    match rule {
        AttrValue::Any => Some(String::from(value)),
        AttrValue::Flag => Some(String::new()),
        AttrValue::Number => trimmed.parse::<u32>().ok().map(|number| number.to_string()),
        AttrValue::Measure => {
            let digits = trimmed.strip_suffix('%').unwrap_or(trimmed);
            digits.parse::<u32>().ok().map(|_| String::from(trimmed))
        }
        AttrValue::Color => {
            let is_hex = trimmed.strip_prefix('#').is_some_and(|hex| {
                matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit())
            });
            let is_name = !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_alphabetic());
            (is_hex || is_name).then(|| String::from(trimmed))
        }
        AttrValue::Choice(choices) => choices
            .iter()
            .find(|&&choice| choice.eq_ignore_ascii_case(trimmed))
            .map(|&choice| String::from(choice)),
        AttrValue::Url => resolve_url(trimmed, base).map(String::from),
    }
}

/// Resolves a URL reference against the document base and admits only the
/// schemes the client can follow: http, https, mailto, and the internal
/// `.xiino` pseudo-domain.
pub fn resolve_url(reference: &str, base: &Url) -> Option<Url> {
    let resolved = base.join(reference).ok()?;
    match resolved.scheme() {
        "http" | "https" => Some(resolved),
        "mailto" => Some(resolved),
        _ => None,
    }
}

/// Whether a URL points at the built-in pseudo-domain pages.
pub fn is_xiino_host(url: &Url) -> bool {
    url.host_str().is_some_and(|host| host.ends_with(".xiino") || host == "xiino")
}

#[cfg(test)]
mod test {
    use super::*;

    fn base() -> Url {
        Url::parse("http://example.com/dir/page.html").unwrap()
    }

    #[test]
    fn unknown_tags_are_not_allowed() {
        assert!(allowed_attrs("span").is_none());
        assert!(allowed_attrs("marquee").is_none());
        assert!(allowed_attrs("table").is_some());
    }

    #[test]
    fn deleted_tags() {
        assert!(is_deleted("script"));
        assert!(is_deleted("style"));
        assert!(!is_deleted("p"));
    }

    #[test]
    fn number_validation() {
        assert_eq!(validate(AttrValue::Number, "42", &base()).as_deref(), Some("42"));
        assert_eq!(validate(AttrValue::Number, " 7 ", &base()).as_deref(), Some("7"));
        assert!(validate(AttrValue::Number, "-3", &base()).is_none());
        assert!(validate(AttrValue::Number, "wide", &base()).is_none());
    }

    #[test]
    fn measure_accepts_percentages() {
        assert_eq!(validate(AttrValue::Measure, "100%", &base()).as_deref(), Some("100%"));
        assert_eq!(validate(AttrValue::Measure, "300", &base()).as_deref(), Some("300"));
        assert!(validate(AttrValue::Measure, "10em", &base()).is_none());
    }

    #[test]
    fn choice_normalizes_case() {
        let rule = AttrValue::Choice(ALIGN_LCR);
        assert_eq!(validate(rule, "CENTER", &base()).as_deref(), Some("center"));
        assert!(validate(rule, "justify", &base()).is_none());
    }

    #[test]
    fn color_validation() {
        assert!(validate(AttrValue::Color, "#fff", &base()).is_some());
        assert!(validate(AttrValue::Color, "#00CC99", &base()).is_some());
        assert!(validate(AttrValue::Color, "red", &base()).is_some());
        assert!(validate(AttrValue::Color, "#12345", &base()).is_none());
        assert!(validate(AttrValue::Color, "url(x)", &base()).is_none());
    }

    #[test]
    fn url_resolution_and_schemes() {
        assert_eq!(
            validate(AttrValue::Url, "../other.html", &base()).as_deref(),
            Some("http://example.com/other.html")
        );
        assert!(validate(AttrValue::Url, "https://secure.example.com/", &base()).is_some());
        assert!(validate(AttrValue::Url, "mailto:user@example.com", &base()).is_some());
        assert!(validate(AttrValue::Url, "javascript:alert(1)", &base()).is_none());
        assert!(validate(AttrValue::Url, "ftp://example.com/file", &base()).is_none());
    }

    #[test]
    fn xiino_hosts() {
        assert!(is_xiino_host(&Url::parse("http://about.xiino/").unwrap()));
        assert!(!is_xiino_host(&Url::parse("http://example.com/").unwrap()));
    }
}
