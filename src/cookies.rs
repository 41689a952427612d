use crate::string::SmallString;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use time::macros::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime};
use url::Url;

/// Xiino cookie capacity: 40 cookies total, 20 per site, 4 KB each.
const MAX_TOTAL: usize = 40;
const MAX_PER_SITE: usize = 20;
const MAX_COOKIE_SIZE: usize = 4096;

#[derive(Debug, Clone)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    domain: SmallString,
    host_only: bool,
    path: String,
    secure: bool,
    expires: Option<OffsetDateTime>,
    /// Monotonic per-jar stamp; eviction removes the least-recently-set.
    set_order: u64,
}

impl Cookie {
    fn expired(&self, now: OffsetDateTime) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }

    fn matches(&self, url: &Url, now: OffsetDateTime) -> bool {
        if self.expired(now) {
            return false;
        }
        if self.secure && url.scheme() != "https" {
            return false;
        }
        let Some(host) = url.host_str() else {
            return false;
        };
        let domain_matches = if self.host_only {
            host == &*self.domain
        } else {
            host == &*self.domain || host.ends_with(&format!(".{}", self.domain))
        };
        domain_matches && path_matches(url.path(), &self.path)
    }
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    request_path == cookie_path
        || (request_path.starts_with(cookie_path)
            && (cookie_path.ends_with('/') || request_path.as_bytes().get(cookie_path.len()) == Some(&b'/')))
}

/// One session's cookies, bridging the upstream jar semantics and the
/// client's limits.
#[derive(Debug, Default, Clone)]
pub struct Jar {
    cookies: Vec<Cookie>,
    counter: u64,
}

impl Jar {
    /// Stores one `Set-Cookie` header value against the responding origin.
    /// Oversized cookies are dropped; expirations delete; overflow evicts
    /// the least-recently-set cookie in the relevant scope.
    pub fn store(&mut self, header: &str, origin: &Url) {
        let Some(mut cookie) = parse_set_cookie(header, origin) else {
            return;
        };
        if cookie.name.len() + cookie.value.len() > MAX_COOKIE_SIZE {
            return;
        }

        // Replacement or deletion of an existing cookie
        self.cookies
            .retain(|existing| !(existing.name == cookie.name && existing.domain == cookie.domain && existing.path == cookie.path));
        if cookie.expired(OffsetDateTime::now_utc()) {
            return;
        }

        cookie.set_order = self.counter;
        self.counter += 1;
        self.cookies.push(cookie);
        self.enforce_limits();
    }

    fn enforce_limits(&mut self) {
        let newest = match self.cookies.last() {
            Some(cookie) => cookie.domain.clone(),
            None => return,
        };

        while self.cookies.iter().filter(|cookie| cookie.domain == newest).count() > MAX_PER_SITE {
            self.evict_oldest(Some(&newest));
        }
        while self.cookies.len() > MAX_TOTAL {
            self.evict_oldest(None);
        }
    }

    fn evict_oldest(&mut self, domain: Option<&SmallString>) {
        let oldest = self
            .cookies
            .iter()
            .enumerate()
            .filter(|(_, cookie)| domain.is_none_or(|domain| &cookie.domain == domain))
            .min_by_key(|(_, cookie)| cookie.set_order)
            .map(|(index, _)| index);
        if let Some(index) = oldest {
            self.cookies.remove(index);
        }
    }

    /// The `Cookie` header for an outbound request, or `None` when nothing
    /// matches. Longer paths go first, ties by set order.
    pub fn cookie_header(&self, url: &Url) -> Option<String> {
        let now = OffsetDateTime::now_utc();
        let mut matching: Vec<&Cookie> = self.cookies.iter().filter(|cookie| cookie.matches(url, now)).collect();
        if matching.is_empty() {
            return None;
        }
        matching.sort_by(|a, b| b.path.len().cmp(&a.path.len()).then(a.set_order.cmp(&b.set_order)));

        Some(
            matching
                .iter()
                .map(|cookie| format!("{}={}", cookie.name, cookie.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Stamp marking the current end of the jar; pass it back to
    /// [`set_cookie_headers_since`](Self::set_cookie_headers_since) to pick
    /// up what a request added.
    pub fn version(&self) -> u64 {
        self.counter
    }

    /// `Set-Cookie` lines for cookies stored since `version`, for the
    /// downstream response. Secure cookies are withheld: the handheld side
    /// of the proxy is always plain http.
    pub fn set_cookie_headers_since(&self, version: u64) -> Vec<String> {
        self.cookies
            .iter()
            .filter(|cookie| cookie.set_order >= version && !cookie.secure)
            .map(|cookie| format!("{}={}; Path={}", cookie.name, cookie.value, cookie.path))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn count_for_site(&self, domain: &str) -> usize {
        self.cookies.iter().filter(|cookie| cookie.domain == domain).count()
    }
}

const HTTP_DATE: &[time::format_description::BorrowedFormatItem<'static>] =
    format_description!("[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT");

fn parse_set_cookie(header: &str, origin: &Url) -> Option<Cookie> {
    let mut parts = header.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let origin_host = origin.host_str()?;
    let mut cookie = Cookie {
        name: String::from(name),
        value: String::from(value.trim()),
        domain: SmallString::new(origin_host),
        host_only: true,
        path: default_path(origin),
        secure: false,
        expires: None,
        set_order: 0,
    };

    let mut max_age: Option<i64> = None;
    for part in parts {
        let (key, attr_value) = match part.split_once('=') {
            Some((key, attr_value)) => (key.trim(), attr_value.trim()),
            None => (part.trim(), ""),
        };
        if key.eq_ignore_ascii_case("domain") {
            let domain = attr_value.trim_start_matches('.');
            // A server may only widen to its own registrable suffix
            if origin_host == domain || origin_host.ends_with(&format!(".{domain}")) {
                cookie.domain = SmallString::new(domain).to_lowercase();
                cookie.host_only = false;
            }
        } else if key.eq_ignore_ascii_case("path") {
            if attr_value.starts_with('/') {
                cookie.path = String::from(attr_value);
            }
        } else if key.eq_ignore_ascii_case("secure") {
            cookie.secure = true;
        } else if key.eq_ignore_ascii_case("max-age") {
            max_age = attr_value.parse().ok();
        } else if key.eq_ignore_ascii_case("expires") {
            cookie.expires = PrimitiveDateTime::parse(attr_value, HTTP_DATE)
                .ok()
                .map(PrimitiveDateTime::assume_utc);
        }
    }

    // Max-Age wins over Expires
    if let Some(seconds) = max_age {
        cookie.expires = Some(OffsetDateTime::now_utc() + Duration::seconds(seconds));
    }
    Some(cookie)
}

fn default_path(origin: &Url) -> String {
    let path = origin.path();
    match path.rfind('/') {
        Some(0) | None => String::from("/"),
        Some(index) => String::from(&path[..index]),
    }
}

/// Session identity: a stable token derived from the client address and
/// User-Agent. Not meant to be unguessable, only to keep handhelds apart.
pub fn session_key(ip: IpAddr, user_agent: Option<&str>) -> u64 {
    let mut hasher = DefaultHasher::new();
    ip.hash(&mut hasher);
    user_agent.unwrap_or("").hash(&mut hasher);
    hasher.finish()
}

/// Process-wide map of session jars behind sharded locks. Each jar itself
/// sits behind an async mutex so a request task can hold it across
/// outbound fetches.
pub struct SessionStore {
    shards: Vec<Mutex<HashMap<u64, Arc<tokio::sync::Mutex<Jar>>>>>,
}

const SHARD_COUNT: usize = 16;

impl SessionStore {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    pub fn jar(&self, key: u64) -> Arc<tokio::sync::Mutex<Jar>> {
        let shard = &self.shards[key as usize % SHARD_COUNT];
        let mut guard = shard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.entry(key).or_default().clone()
    }

    /// Number of live session jars across all shards.
    pub fn session_count(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len())
            .sum()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn origin(url: &str) -> Url {
        Url::parse(url).unwrap()
    }

    #[test]
    fn store_and_match() {
        let mut jar = Jar::default();
        jar.store("a=1; path=/", &origin("http://example.com/index.html"));

        assert_eq!(jar.cookie_header(&origin("http://example.com/other")), Some(String::from("a=1")));
        assert_eq!(jar.cookie_header(&origin("http://elsewhere.com/")), None);
    }

    #[test]
    fn host_only_cookies_do_not_leak_to_subdomains() {
        let mut jar = Jar::default();
        jar.store("a=1; path=/", &origin("http://example.com/"));
        assert_eq!(jar.cookie_header(&origin("http://sub.example.com/")), None);
    }

    #[test]
    fn domain_cookies_cover_subdomains() {
        let mut jar = Jar::default();
        jar.store("a=1; path=/; domain=example.com", &origin("http://www.example.com/"));
        assert!(jar.cookie_header(&origin("http://other.example.com/")).is_some());
    }

    #[test]
    fn foreign_domain_attribute_is_rejected() {
        let mut jar = Jar::default();
        jar.store("a=1; domain=evil.com", &origin("http://example.com/"));
        // Falls back to host-only on the origin
        assert!(jar.cookie_header(&origin("http://evil.com/")).is_none());
        assert!(jar.cookie_header(&origin("http://example.com/")).is_some());
    }

    #[test]
    fn path_scoping() {
        let mut jar = Jar::default();
        jar.store("a=1; path=/admin", &origin("http://example.com/admin/"));
        assert!(jar.cookie_header(&origin("http://example.com/admin/panel")).is_some());
        assert!(jar.cookie_header(&origin("http://example.com/adminx")).is_none());
        assert!(jar.cookie_header(&origin("http://example.com/")).is_none());
    }

    #[test]
    fn secure_cookies_require_https_upstream() {
        let mut jar = Jar::default();
        jar.store("s=1; secure", &origin("https://example.com/"));
        assert!(jar.cookie_header(&origin("http://example.com/")).is_none());
        assert!(jar.cookie_header(&origin("https://example.com/")).is_some());
    }

    #[test]
    fn secure_cookies_never_reach_the_handheld() {
        let mut jar = Jar::default();
        let version = jar.version();
        jar.store("s=1; secure", &origin("https://example.com/"));
        jar.store("p=2", &origin("https://example.com/"));

        let downstream = jar.set_cookie_headers_since(version);
        assert_eq!(downstream.len(), 1);
        assert!(downstream[0].starts_with("p=2"));
    }

    #[test]
    fn max_age_zero_deletes() {
        let mut jar = Jar::default();
        jar.store("a=1", &origin("http://example.com/"));
        jar.store("a=1; max-age=0", &origin("http://example.com/"));
        assert_eq!(jar.len(), 0);
    }

    #[test]
    fn expires_parsing() {
        let mut jar = Jar::default();
        jar.store("a=1; expires=Wed, 21 Oct 2015 07:28:00 GMT", &origin("http://example.com/"));
        assert_eq!(jar.len(), 0, "cookie from 2015 is long expired");

        jar.store("b=2; expires=Fri, 01 Jan 2100 00:00:00 GMT", &origin("http://example.com/"));
        assert_eq!(jar.len(), 1);
    }

    #[test]
    fn per_site_cap_evicts_least_recently_set() {
        let mut jar = Jar::default();
        for i in 0..41 {
            jar.store(&format!("c{i}={i}; path=/"), &origin("http://example.com/"));
        }

        assert_eq!(jar.len(), MAX_PER_SITE);
        assert_eq!(jar.count_for_site("example.com"), MAX_PER_SITE);
        // The earliest cookies went first
        let header = jar.cookie_header(&origin("http://example.com/")).unwrap();
        assert!(!header.contains("c0="));
        assert!(header.contains("c40=40"));
    }

    #[test]
    fn total_cap_across_sites() {
        let mut jar = Jar::default();
        for site in 0..3 {
            for i in 0..MAX_PER_SITE {
                jar.store(&format!("c{i}={i}"), &origin(&format!("http://site{site}.example/")));
            }
        }
        assert_eq!(jar.len(), MAX_TOTAL);
    }

    #[test]
    fn session_keys_differ_by_client() {
        let a = session_key("10.0.0.1".parse().unwrap(), Some("Xiino/3.4E"));
        let b = session_key("10.0.0.2".parse().unwrap(), Some("Xiino/3.4E"));
        let c = session_key("10.0.0.1".parse().unwrap(), Some("Palmscape/1.0"));
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn session_store_returns_same_jar() {
        let store = SessionStore::new();
        let jar = store.jar(7);
        {
            let mut guard = jar.try_lock().unwrap();
            guard.store("a=1", &origin("http://example.com/"));
        }
        let again = store.jar(7);
        assert_eq!(again.try_lock().unwrap().len(), 1);
    }

    #[test]
    fn session_count_spans_shards() {
        let store = SessionStore::new();
        assert_eq!(store.session_count(), 0);
        for key in 0..50 {
            let _ = store.jar(key);
        }
        assert_eq!(store.session_count(), 50);
    }
}
