mod error;

pub use error::{ApiResult, Error};

use crate::app::AppState;
use crate::budget::Budget;
use crate::content::{self, ImageKind, InlineImage};
use crate::cookies::{self, Jar};
use crate::device::DeviceProfile;
use crate::ebd::EbdImage;
use crate::fetch::FetchOptions;
use crate::transcode::{self, ImageJob, rules, serialize};
use crate::{config, pages};
use axum::Router;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{Instrument, info, warn};
use url::Url;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .fallback(handle)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// One client request, end to end. The whole pipeline runs under a hard
/// deadline; when it elapses, pending stages unwind at their next
/// suspension point and the client gets the timeout page.
async fn handle(State(state): State<AppState>, request: Request) -> Response {
    let request_id = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let client_ip = client_ip(&request);
    let span = tracing::info_span!("request", id = request_id);

    let config = config::get();
    let total_timeout = config.http_timeout + config.image_processing_timeout;
    async move {
        let outcome = tokio::time::timeout(total_timeout, proxy(state, client_ip, request))
            .await
            .unwrap_or(Err(Error::Timeout));
        match outcome {
            Ok(response) => response,
            Err(err) => {
                warn!("{}: {err}", err.kind());
                err.into_response()
            }
        }
    }
    .instrument(span)
    .await
}

async fn proxy(state: AppState, client_ip: IpAddr, request: Request) -> ApiResult<Response> {
    let config = config::get();

    if !state.limiter.try_acquire(client_ip) {
        return Err(Error::RateLimited);
    }

    let user_agent = header_str(&request, header::USER_AGENT).map(String::from);
    let target = target_url(&request)?;
    let query: Vec<(String, String)> = target
        .query_pairs()
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    let device = DeviceProfile::detect(
        user_agent.as_deref(),
        query.iter().map(|(key, value)| (key.as_str(), value.as_str())),
    );

    // Built-in pseudo-domain pages: never resolved, never fetched
    if rules::is_xiino_host(&target) {
        let host = target.host_str().unwrap_or_default();
        let html = pages::builtin(host, &device)?;
        return Ok(html_response(StatusCode::OK, html, Vec::new()));
    }
    if !matches!(target.scheme(), "http" | "https") {
        return Err(Error::UnsupportedScheme(String::from(target.scheme())));
    }

    let method = request.method().clone();
    let content_type = header_str(&request, header::CONTENT_TYPE).map(String::from);
    let authorization = header_str(&request, header::AUTHORIZATION).map(String::from);
    let body = axum::body::to_bytes(request.into_body(), config.max_request_size)
        .await
        .map_err(|_| Error::RequestTooLarge)?;

    let deadline = Instant::now() + config.http_timeout + config.image_processing_timeout;
    let mut budget = Budget::new(device.max_page_bytes, deadline);

    let session = cookies::session_key(client_ip, user_agent.as_deref());
    let jar = state.sessions.jar(session);
    let mut jar = jar.lock().await;
    let cookie_version = jar.version();

    info!("{method} {target}");
    let options = FetchOptions {
        method,
        body: (!body.is_empty()).then(|| body.to_vec()),
        content_type,
        authorization,
        ..FetchOptions::document()
    };
    let response = state.fetcher.fetch(&target, &options, &mut jar).await?;

    let html = match classify(response.content_type.as_deref(), &response.body) {
        Content::Html => {
            let upstream_truncated = response.truncated;
            let image_jar = jar.clone();
            let mut html = transcode_document(
                &state,
                response.body,
                response.final_url,
                device,
                &mut budget,
                image_jar,
            )
            .await?;
            if upstream_truncated && !html.contains(serialize::TRUNCATION_NOTICE) {
                html.push_str(serialize::TRUNCATION_NOTICE);
            }
            html
        }
        Content::Image(kind) => {
            let image = transcode_image(&state, response.body, kind, device, budget.deadline()).await?;
            image_document(&InlineImage::from_ebd(&image))
        }
        Content::Plain => plaintext_document(&response.body, &mut budget),
        Content::Unsupported(content_type) => return Err(Error::UnsupportedContent(content_type)),
    };

    let set_cookies = jar.set_cookie_headers_since(cookie_version);
    Ok(html_response(StatusCode::OK, html, set_cookies))
}

enum Content {
    Html,
    Image(ImageKind),
    Plain,
    Unsupported(String),
}

/// Decides how the fetched document is presented. Sniffing only runs when
/// the upstream is silent or generic about its content type, so an HTML
/// page embedding `<svg>` markup never gets mistaken for an image.
fn classify(content_type: Option<&str>, body: &[u8]) -> Content {
    let essence = content_type
        .map(|value| value.split(';').next().unwrap_or("").trim().to_ascii_lowercase());

    match essence.as_deref() {
        Some("text/html" | "application/xhtml+xml") => Content::Html,
        Some("text/plain") => Content::Plain,
        Some(other) if other.starts_with("image/") => match ImageKind::from_content_type(other) {
            Some(kind) => Content::Image(kind),
            None => Content::Unsupported(String::from(other)),
        },
        Some("application/octet-stream") | None => match ImageKind::sniff(body) {
            Some(kind) => Content::Image(kind),
            None if essence.is_none() => Content::Html,
            None => Content::Unsupported(String::from("application/octet-stream")),
        },
        Some(other) => Content::Unsupported(String::from(other)),
    }
}

/// The HTML path: parse and rewrite on the worker pool, fetch and encode
/// the page's images concurrently (bounded by the pool width), then apply
/// them in document order and serialize under the page cap.
async fn transcode_document(
    state: &AppState,
    body: Vec<u8>,
    base: Url,
    device: DeviceProfile,
    budget: &mut Budget,
    image_jar: Jar,
) -> ApiResult<String> {
    if budget.expired() {
        return Err(Error::Timeout);
    }
    // NUL bytes mean this was never text; serve the parse-failure page
    // rather than handing the parser garbage.
    if body.contains(&0) {
        return Err(Error::ParseFailure);
    }
    let source = String::from_utf8_lossy(&body).into_owned();

    let parse_base = base.clone();
    let prepared = state
        .workers
        .run(move || transcode::prepare(&source, &parse_base))
        .await?;

    let concurrency = std::thread::available_parallelism().map(|count| count.get()).unwrap_or(1);
    let deadline = budget.deadline();
    let results: Vec<(ImageJob, Option<InlineImage>)> = futures::stream::iter(prepared.jobs.clone())
        .map(|job| {
            let state = state.clone();
            let jar = image_jar.clone();
            async move {
                let inline = inline_image(&state, &job.url, device, deadline, jar).await;
                if let Err(err) = &inline {
                    info!("Inline image {} dropped: {}", job.url, err.kind());
                }
                (job, inline.ok())
            }
        })
        .buffered(concurrency)
        .collect()
        .await;

    Ok(transcode::finish(prepared, results, budget, &device).html)
}

/// Fetches and transcodes one inline image. Failures are isolated: the
/// caller degrades the element to its ALT text.
async fn inline_image(
    state: &AppState,
    url: &Url,
    device: DeviceProfile,
    deadline: Instant,
    mut jar: Jar,
) -> ApiResult<InlineImage> {
    let response = state.fetcher.fetch(url, &FetchOptions::image(), &mut jar).await?;
    let kind = ImageKind::detect(response.content_type.as_deref(), &response.body)
        .ok_or_else(|| Error::UnsupportedContent(response.content_type.unwrap_or_default()))?;

    let image = transcode_image(state, response.body, kind, device, deadline).await?;
    Ok(InlineImage::from_ebd(&image))
}

/// Runs the CPU side of the image pipeline on the worker pool, bracketed
/// by the per-stage timeout (SVG rasterization gets its own, shorter one).
async fn transcode_image(
    state: &AppState,
    bytes: Vec<u8>,
    kind: ImageKind,
    device: DeviceProfile,
    deadline: Instant,
) -> ApiResult<EbdImage> {
    let config = config::get();
    let stage_timeout = match kind {
        ImageKind::Svg => config.svg_timeout,
        _ => config.image_processing_timeout,
    };
    let stage_deadline = deadline.min(Instant::now() + stage_timeout);

    let result = tokio::time::timeout(
        stage_timeout,
        state.workers.run(move || content::transcode(&bytes, kind, &device, stage_deadline)),
    )
    .await
    .map_err(|_| Error::Timeout)?;
    result?
}

/// A directly-requested image gets wrapped in a minimal page around its
/// inline EBD payload.
fn image_document(image: &InlineImage) -> String {
    format!(
        "<HTML><HEAD><TITLE>Image</TITLE></HEAD><BODY><IMG SRC=\"{}\" EBDWIDTH=\"{}\" EBDHEIGHT=\"{}\"></BODY></HTML>",
        image.src, image.width, image.height
    )
}

fn plaintext_document(body: &[u8], budget: &mut Budget) -> String {
    let text = String::from_utf8_lossy(body);
    let mut escaped = serialize::escape_text(&text);
    if !budget.try_charge_bytes(escaped.len()) {
        let mut cut = budget.bytes_remaining().min(escaped.len());
        while !escaped.is_char_boundary(cut) {
            cut -= 1;
        }
        escaped.truncate(cut);
        escaped.push_str(serialize::TRUNCATION_NOTICE);
    }
    format!("<HTML><BODY><PRE>{escaped}</PRE></BODY></HTML>")
}

fn client_ip(request: &Request) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
        .unwrap_or(IpAddr::from([127, 0, 0, 1]))
}

fn header_str(request: &Request, name: header::HeaderName) -> Option<&str> {
    request.headers().get(name).and_then(|value| value.to_str().ok())
}

/// The proxy accepts absolute-form request targets (the native Xiino
/// dialect) and falls back to origin-form plus the Host header.
fn target_url(request: &Request) -> ApiResult<Url> {
    let uri = request.uri();
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Url::parse(&uri.to_string()).map_err(Error::from);
    }

    let host = header_str(request, header::HOST).ok_or(Error::MissingTarget)?;
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    Url::parse(&format!("http://{host}{path_and_query}")).map_err(Error::from)
}

fn html_response(status: StatusCode, html: String, set_cookies: Vec<String>) -> Response {
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/html");
    for cookie in set_cookies {
        builder = builder.header(header::SET_COOKIE, cookie);
    }
    builder
        .body(Body::from(html))
        .expect("response construction must succeed")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::{encode_jpeg, solid_image};
    use axum_test::TestServer;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_server() -> TestServer {
        let state = AppState::new().expect("app state must be constructible");
        TestServer::new(routes(state)).expect("test server must start")
    }

    async fn upstream() -> MockServer {
        MockServer::start().await
    }

    fn host_of(server: &MockServer) -> String {
        let uri = Url::parse(&server.uri()).unwrap();
        format!("{}:{}", uri.host_str().unwrap(), uri.port().unwrap())
    }

    #[tokio::test]
    async fn image_page_carries_ebd_dimensions() {
        let server = upstream().await;
        let photo = encode_jpeg(&solid_image(600, 400, [180, 40, 40]));
        Mock::given(method("GET"))
            .and(path("/photo.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(photo).insert_header("content-type", "image/jpeg"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"<html><body><img src="/photo.jpg" width="600" height="400"></body></html>"#)
                    .insert_header("content-type", "text/html"),
            )
            .mount(&server)
            .await;

        let response = test_server().get("/").add_header("host", host_of(&server)).await;
        response.assert_status_ok();
        let html = response.text();
        assert!(html.contains("EBDWIDTH=\"153\""), "{html}");
        assert!(html.contains("EBDHEIGHT=\"102\""), "{html}");
        assert!(html.contains(crate::ebd::DATA_PREFIX));
    }

    #[tokio::test]
    async fn builtin_about_page_needs_no_upstream() {
        let response = test_server().get("/").add_header("host", "about.xiino").await;
        response.assert_status_ok();
        let html = response.text();
        assert!(html.contains(config::version()));
    }

    #[tokio::test]
    async fn oversized_document_truncates_with_notice() {
        let server = upstream().await;
        let huge = format!("<html><body>{}</body></html>", "<p>lots of filler text here</p>".repeat(100_000));
        assert!(huge.len() > config::get().max_page_size);
        Mock::given(method("GET"))
            .and(path("/big"))
            .respond_with(ResponseTemplate::new(200).set_body_string(huge).insert_header("content-type", "text/html"))
            .mount(&server)
            .await;

        let response = test_server().get("/big").add_header("host", host_of(&server)).await;
        response.assert_status_ok();
        let html = response.text();
        assert!(html.len() <= config::get().max_page_size);
        assert!(html.contains("[Page truncated]"));
    }

    #[tokio::test]
    async fn broken_inline_image_degrades_to_alt() {
        let server = upstream().await;
        Mock::given(method("GET"))
            .and(path("/missing.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"<html><body><img src="/missing.png" alt="lost picture"><p>rest</p></body></html>"#)
                    .insert_header("content-type", "text/html"),
            )
            .mount(&server)
            .await;

        let response = test_server().get("/").add_header("host", host_of(&server)).await;
        response.assert_status_ok();
        let html = response.text();
        assert!(html.contains("lost picture"));
        assert!(!html.contains("<IMG"));
        assert!(html.contains("rest"));
    }

    #[tokio::test]
    async fn rate_limit_produces_error_pages() {
        let app = test_server();
        let mut limited = 0;
        for _ in 0..100 {
            let response = app.get("/").add_header("host", "about.xiino").await;
            if response.status_code() == StatusCode::TOO_MANY_REQUESTS {
                limited += 1;
                let html = response.text();
                assert!(html.contains("RateLimited"));
            }
        }
        assert_eq!(limited, 100 - config::get().max_requests_per_min as usize);
    }

    #[tokio::test]
    async fn unsupported_content_gets_error_page() {
        let server = upstream().await;
        Mock::given(method("GET"))
            .and(path("/archive.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x50, 0x4B, 3, 4]).insert_header("content-type", "application/zip"))
            .mount(&server)
            .await;

        let response = test_server().get("/archive.zip").add_header("host", host_of(&server)).await;
        assert_eq!(response.status_code(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn plaintext_is_wrapped_in_pre() {
        let server = upstream().await;
        Mock::given(method("GET"))
            .and(path("/readme.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("a < b").insert_header("content-type", "text/plain"))
            .mount(&server)
            .await;

        let response = test_server().get("/readme.txt").add_header("host", host_of(&server)).await;
        response.assert_status_ok();
        let html = response.text();
        assert!(html.contains("<PRE>a &lt; b</PRE>"));
    }

    #[tokio::test]
    async fn upstream_status_renders_as_error_page() {
        let server = upstream().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let response = test_server().get("/gone").add_header("host", host_of(&server)).await;
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
        assert!(response.text().contains("UpstreamStatus"));
    }

    #[test]
    fn classification() {
        assert!(matches!(classify(Some("text/html; charset=utf-8"), b""), Content::Html));
        assert!(matches!(classify(Some("image/png"), b""), Content::Image(ImageKind::Png)));
        assert!(matches!(classify(Some("text/plain"), b""), Content::Plain));
        assert!(matches!(classify(Some("application/zip"), b""), Content::Unsupported(_)));
        // Generic content types fall back to sniffing
        assert!(matches!(
            classify(Some("application/octet-stream"), &[0x89, b'P', b'N', b'G', 0, 0]),
            Content::Image(ImageKind::Png)
        ));
        assert!(matches!(classify(None, b"<html></html>"), Content::Html));
        // An HTML page mentioning svg stays HTML
        assert!(matches!(classify(Some("text/html"), b"<?xml ... <svg"), Content::Html));
    }
}
