use crate::api::ApiResult;
use crate::device::DeviceProfile;
use crate::{api, config, ebd, palette};
use axum::http::StatusCode;
use std::sync::LazyLock;
use tera::{Context, Tera};
use tracing::error;

/*
    Built-in pages are served for *.xiino hosts and for error responses.
    They emit Xiino-legal HTML directly and never pass through the
    transcoder, so the templates must stay inside the restricted tag set.
*/

const ERROR_TEMPLATE: &str = "\
<HTML><HEAD><TITLE>{{ status }} {{ title }}</TITLE></HEAD>\
<BODY><H1>{{ title }}</H1>\
<P>{{ description }}</P>\
<HR><P><SMALL>dataserver {{ version }}</SMALL></P></BODY></HTML>";

const ABOUT_TEMPLATE: &str = "\
<HTML><HEAD><TITLE>About dataserver</TITLE></HEAD>\
<BODY><H1>dataserver {{ version }}</H1>\
<P>A transcoding proxy for Xiino and Palmscape handhelds.</P>\
<HR><TABLE>\
{% for entry in settings %}<TR><TD>{{ entry.0 }}</TD><TD>{{ entry.1 }}</TD></TR>{% endfor %}\
</TABLE>\
<HR><P><A HREF=\"http://palette.xiino/\">Palette test page</A></P></BODY></HTML>";

const PALETTE_TEMPLATE: &str = "\
<HTML><HEAD><TITLE>Palette test</TITLE></HEAD>\
<BODY><H1>Palette test</H1>\
<P>{{ entries }} colors at {{ depth }}.</P>\
<P><IMG SRC=\"{{ src | safe }}\" EBDWIDTH=\"{{ width }}\" EBDHEIGHT=\"{{ height }}\" ALT=\"palette swatch\"></P>\
</BODY></HTML>";

static TEMPLATES: LazyLock<Tera> = LazyLock::new(|| {
    let mut tera = Tera::default();
    tera.add_raw_templates([
        ("error.html", ERROR_TEMPLATE),
        ("about.html", ABOUT_TEMPLATE),
        ("palette.html", PALETTE_TEMPLATE),
    ])
    .expect("built-in templates must compile");
    tera
});

/// Renders an error document. Infallible: a template failure degrades to a
/// bare-bones page rather than recursing into error handling.
pub fn error_page(status: StatusCode, title: &str, description: &str) -> String {
    let mut context = Context::new();
    context.insert("status", &status.as_u16());
    context.insert("title", title);
    context.insert("description", description);
    context.insert("version", config::version());

    TEMPLATES.render("error.html", &context).unwrap_or_else(|err| {
        error!("Error template failed to render: {err}");
        format!("<HTML><BODY><H1>{}</H1></BODY></HTML>", status.as_u16())
    })
}

/// Dispatches a `*.xiino` pseudo-domain request to its built-in page.
pub fn builtin(host: &str, device: &DeviceProfile) -> ApiResult<String> {
    match host {
        "about.xiino" | "xiino" => about_page(),
        "palette.xiino" => palette_page(device),
        _ => Err(api::Error::UnknownBuiltin),
    }
}

fn about_page() -> ApiResult<String> {
    let config = config::get();
    let settings = [
        ("Max page size", format!("{} KB", config.max_page_size / 1024)),
        ("Max image size", format!("{} KB", config.image_max_size / 1024)),
        ("HTTPS upgrade", config.attempt_https_upgrade.to_string()),
        ("Redirects", format!("{} (max {})", config.allow_redirects, config.max_redirects)),
        ("Requests per minute", config.max_requests_per_min.to_string()),
        ("Dither priority", config.dither_priority.to_string()),
    ];

    let mut context = Context::new();
    context.insert("version", config::version());
    context.insert("settings", &settings);
    TEMPLATES.render("about.html", &context).map_err(api::Error::from)
}

/// A swatch strip of the device's palette, one column per entry, served as
/// an inline EBDImage like any transcoded picture would be.
fn palette_page(device: &DeviceProfile) -> ApiResult<String> {
    const SWATCH_HEIGHT: u16 = 8;

    let palette = palette::palette_for(device.depth);
    let width = palette.len() as u16;
    let row: Vec<u8> = (0..palette.len()).map(|index| index as u8).collect();
    let indices: Vec<u8> = row
        .iter()
        .cycle()
        .take(row.len() * SWATCH_HEIGHT as usize)
        .copied()
        .collect();
    let image = ebd::encode(&indices, width, SWATCH_HEIGHT, device.depth)?;

    let mut context = Context::new();
    context.insert("entries", &palette.len());
    context.insert("depth", &device.depth.to_string());
    context.insert("src", &image.serialize());
    context.insert("width", &image.width);
    context.insert("height", &image.height);
    TEMPLATES.render("palette.html", &context).map_err(api::Error::from)
}
