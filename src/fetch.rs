use crate::api::{self, ApiResult};
use crate::config;
use crate::cookies::Jar;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE, USER_AGENT};
use reqwest::redirect::Policy;
use reqwest::{Client, Method, Proxy, Response, StatusCode};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// How long the opportunistic https attempt may take before falling back
/// to plain http.
const UPGRADE_TIMEOUT: Duration = Duration::from_secs(2);

/// What happens when a body crosses its size cap: documents keep what was
/// read so the page can truncate gracefully, images fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapBehavior {
    Truncate,
    Reject,
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub method: Method,
    pub body: Option<Vec<u8>>,
    pub content_type: Option<String>,
    pub authorization: Option<String>,
    /// Overrides the configured proxy User-Agent for this request.
    pub user_agent: Option<String>,
    pub size_limit: usize,
    pub on_cap: CapBehavior,
}

impl FetchOptions {
    pub fn document() -> Self {
        Self {
            method: Method::GET,
            body: None,
            content_type: None,
            authorization: None,
            user_agent: None,
            size_limit: config::get().max_page_size,
            on_cap: CapBehavior::Truncate,
        }
    }

    pub fn image() -> Self {
        Self {
            size_limit: config::get().image_max_size,
            on_cap: CapBehavior::Reject,
            ..Self::document()
        }
    }
}

#[derive(Debug)]
pub struct FetchedResponse {
    pub final_url: Url,
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    /// Whether the body was cut short at the size cap.
    pub truncated: bool,
}

/// Outbound HTTP client. One instance per process; connections are pooled
/// by reqwest underneath.
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new() -> ApiResult<Self> {
        let config = config::get();
        let mut builder = Client::builder()
            .user_agent(&*config.user_agent)
            .redirect(Policy::none());

        if let Some(proxy) = &config.socks_proxy {
            let proxy_url = if proxy.contains("://") {
                String::from(&**proxy)
            } else {
                format!("socks5://{proxy}")
            };
            builder = builder.proxy(Proxy::all(proxy_url)?);
        }
        Ok(Self { client: builder.build()? })
    }

    /// Fetches a resource on the handheld's behalf: attempts the https
    /// upgrade, follows redirects up to the configured cap (storing
    /// intermediate cookies as it goes), and streams the body under a hard
    /// size cap. 4xx/5xx final statuses surface as `UpstreamStatus`.
    pub async fn fetch(&self, url: &Url, options: &FetchOptions, jar: &mut Jar) -> ApiResult<FetchedResponse> {
        let config = config::get();
        let original_host = url.host_str().map(String::from);

        let mut method = options.method.clone();
        let mut body = options.body.clone();
        let mut authorization = options.authorization.clone();
        let mut response = self.initial_response(url, options, jar).await?;

        let mut hops = 0;
        while let Some(location) = redirect_target(&response) {
            if !config.allow_redirects || hops >= config.max_redirects {
                break;
            }
            hops += 1;

            let current_url = response.url().clone();
            let next_url = current_url.join(&location)?;

            // Cross-origin hops must not carry credentials along
            if next_url.host_str().map(String::from) != original_host {
                authorization = None;
            }
            // Browsers rewrite the method on legacy redirects
            if response.status() == StatusCode::SEE_OTHER
                || (method == Method::POST
                    && matches!(response.status(), StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND))
            {
                method = Method::GET;
                body = None;
            }

            debug!("following redirect to {next_url}");
            response = self
                .request_once(
                    &next_url,
                    &method,
                    body.as_deref(),
                    options.content_type.as_deref(),
                    authorization.as_deref(),
                    options.user_agent.as_deref(),
                    config.http_timeout,
                    jar,
                )
                .await?;
        }

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(api::Error::UpstreamStatus(status));
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(String::from);
        let (body, truncated) = read_capped(response, options.size_limit, options.on_cap).await?;

        Ok(FetchedResponse {
            final_url,
            status,
            content_type,
            body,
            truncated,
        })
    }

    /// First hop, with the opportunistic https upgrade: plain-http URLs are
    /// tried over https under a short timeout, and any failure (connect,
    /// TLS, 5xx) falls back to the original URL.
    async fn initial_response(&self, url: &Url, options: &FetchOptions, jar: &mut Jar) -> ApiResult<Response> {
        let config = config::get();

        if url.scheme() == "http" && config.attempt_https_upgrade {
            let mut upgraded = url.clone();
            if upgraded.set_scheme("https").is_ok() {
                let attempt = self
                    .request_once(
                        &upgraded,
                        &options.method,
                        options.body.as_deref(),
                        options.content_type.as_deref(),
                        options.authorization.as_deref(),
                        options.user_agent.as_deref(),
                        UPGRADE_TIMEOUT,
                        jar,
                    )
                    .await;
                match attempt {
                    Ok(response) if !response.status().is_server_error() => return Ok(response),
                    _ => debug!("https upgrade failed for {url}, using plain http"),
                }
            }
        }

        self.request_once(
            url,
            &options.method,
            options.body.as_deref(),
            options.content_type.as_deref(),
            options.authorization.as_deref(),
            options.user_agent.as_deref(),
            config.http_timeout,
            jar,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn request_once(
        &self,
        url: &Url,
        method: &Method,
        body: Option<&[u8]>,
        content_type: Option<&str>,
        authorization: Option<&str>,
        user_agent: Option<&str>,
        timeout: Duration,
        jar: &mut Jar,
    ) -> ApiResult<Response> {
        let mut request = self.client.request(method.clone(), url.clone()).timeout(timeout);
        if let Some(cookies) = jar.cookie_header(url) {
            request = request.header(COOKIE, cookies);
        }
        if let Some(authorization) = authorization {
            request = request.header(AUTHORIZATION, authorization);
        }
        if let Some(user_agent) = user_agent {
            request = request.header(USER_AGENT, user_agent);
        }
        if let Some(content_type) = content_type {
            request = request.header(CONTENT_TYPE, content_type);
        }
        if let Some(body) = body {
            request = request.body(body.to_vec());
        }

        let response = request.send().await.map_err(map_request_error)?;

        // Intermediate hops may set cookies that later hops depend on
        let response_url = response.url().clone();
        for header in response.headers().get_all(SET_COOKIE) {
            if let Ok(value) = header.to_str() {
                jar.store(value, &response_url);
            }
        }
        Ok(response)
    }
}

fn redirect_target(response: &Response) -> Option<String> {
    response.status().is_redirection().then(|| {
        response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(String::from)
    })?
}

/// Streams the body, stopping once the cap is crossed. Never trusts
/// Content-Length: the cap applies to observed bytes.
async fn read_capped(mut response: Response, limit: usize, on_cap: CapBehavior) -> ApiResult<(Vec<u8>, bool)> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(map_request_error)? {
        if body.len() + chunk.len() > limit {
            return match on_cap {
                CapBehavior::Reject => Err(api::Error::TooLarge),
                CapBehavior::Truncate => {
                    body.extend_from_slice(&chunk[..limit - body.len()]);
                    Ok((body, true))
                }
            };
        }
        body.extend_from_slice(&chunk);
    }
    Ok((body, false))
}

fn map_request_error(error: reqwest::Error) -> api::Error {
    if error.is_timeout() {
        api::Error::Timeout
    } else {
        api::Error::Fetch(error)
    }
}
