//! HTTP transport shared by every platform resolver.
//!
//! Redirects are followed here rather than by reqwest, so that per-platform
//! headers survive every hop and the landing URL is reported back. Credential
//! headers only follow a hop to another origin inside the request's
//! credential scope.

use super::types::{ParseError, TransportError, VideoSource};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, COOKIE, LOCATION, PROXY_AUTHORIZATION, REFERER,
    USER_AGENT,
};
use reqwest::{Method, StatusCode};
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_REDIRECTS: usize = 5;

pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
pub const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 16_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Mobile/15E148 Safari/604.1";

#[derive(Debug, Clone)]
pub enum RequestBody {
    Form(String),
    Json(serde_json::Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redirects {
    /// Follow up to the given number of hops.
    Follow(usize),
    /// Return the first response as-is, 3xx included.
    Manual,
}

/// One Transport call: method, URL, headers and redirect handling.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    step: &'static str,
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Option<RequestBody>,
    redirects: Option<Redirects>,
    timeout: Option<Duration>,
    credential_scope: Option<&'static str>,
}

impl FetchRequest {
    /// `step` names this call in errors and logs, e.g. `"share page"`.
    pub fn get(step: &'static str, url: impl Into<String>) -> Self {
        Self::new(step, Method::GET, url)
    }

    pub fn post(step: &'static str, url: impl Into<String>) -> Self {
        Self::new(step, Method::POST, url)
    }

    fn new(step: &'static str, method: Method, url: impl Into<String>) -> Self {
        Self {
            step,
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            redirects: None,
            timeout: None,
            credential_scope: None,
        }
    }

    pub fn step(&self) -> &'static str {
        self.step
    }

    /// Invalid header values are dropped rather than failing the call.
    pub fn header(mut self, name: HeaderName, value: impl AsRef<str>) -> Self {
        match HeaderValue::from_str(value.as_ref()) {
            Ok(v) => {
                self.headers.insert(name, v);
            }
            Err(_) => debug!(step = self.step, header = %name, "dropping invalid header value"),
        }
        self
    }

    pub fn user_agent(self, ua: impl AsRef<str>) -> Self {
        self.header(USER_AGENT, ua)
    }

    pub fn referer(self, referer: impl AsRef<str>) -> Self {
        self.header(REFERER, referer)
    }

    pub fn cookie(self, cookie: Option<&str>) -> Self {
        match cookie.filter(|c| !c.trim().is_empty()) {
            Some(c) => self.header(COOKIE, c),
            None => self,
        }
    }

    pub fn form(mut self, body: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Form(body.into()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn follow_redirects(mut self, limit: usize) -> Self {
        self.redirects = Some(Redirects::Follow(limit));
        self
    }

    pub fn no_redirects(mut self) -> Self {
        self.redirects = Some(Redirects::Manual);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Keep credential headers on redirects to `domain` and its subdomains,
    /// e.g. a short-link host handing over to the platform's main site.
    pub fn credential_scope(mut self, domain: &'static str) -> Self {
        self.credential_scope = Some(domain);
        self
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    /// URL of the last hop.
    pub final_url: Url,
    pub headers: HeaderMap,
    pub body: String,
}

impl FetchResponse {
    /// The `Location` of a 3xx response, resolved against the request URL.
    pub fn location(&self) -> Option<Url> {
        redirect_target(&self.headers, &self.final_url)
    }
}

/// Pooled HTTP client. Cheap to clone; clones share connections.
#[derive(Debug, Clone)]
pub struct Transport {
    client: reqwest::Client,
    timeout: Duration,
    max_redirects: usize,
    desktop_user_agent: String,
    mobile_user_agent: String,
}

impl Transport {
    pub fn new(timeout: Duration, max_redirects: usize) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            timeout,
            max_redirects,
            desktop_user_agent: DESKTOP_USER_AGENT.to_string(),
            mobile_user_agent: MOBILE_USER_AGENT.to_string(),
        })
    }

    pub fn with_user_agents(mut self, desktop: Option<String>, mobile: Option<String>) -> Self {
        if let Some(ua) = desktop {
            self.desktop_user_agent = ua;
        }
        if let Some(ua) = mobile {
            self.mobile_user_agent = ua;
        }
        self
    }

    pub fn desktop_user_agent(&self) -> &str {
        &self.desktop_user_agent
    }

    pub fn mobile_user_agent(&self) -> &str {
        &self.mobile_user_agent
    }

    pub fn max_redirects(&self) -> usize {
        self.max_redirects
    }

    /// Run one request under its own timeout, tagging failures with the
    /// platform and step.
    pub async fn send(&self, platform: VideoSource, request: FetchRequest) -> Result<FetchResponse, ParseError> {
        let step = request.step;
        self.fetch(request)
            .await
            .map_err(|error| ParseError::Transport { platform, step, error })
    }

    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TransportError> {
        let timeout = request.timeout.unwrap_or(self.timeout);
        match tokio::time::timeout(timeout, self.execute(request, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }

    async fn execute(&self, request: FetchRequest, timeout: Duration) -> Result<FetchResponse, TransportError> {
        let step = request.step;
        let redirects = request
            .redirects
            .unwrap_or(Redirects::Follow(self.max_redirects));
        let mut url = Url::parse(&request.url).map_err(|_| TransportError::InvalidUrl(request.url.clone()))?;
        let mut method = request.method;
        let mut body = request.body;
        let mut headers = request.headers;
        let scope = request.credential_scope;
        let mut hops = 0usize;

        loop {
            let mut builder = self
                .client
                .request(method.clone(), url.clone())
                .headers(headers.clone())
                .timeout(timeout);
            builder = match &body {
                Some(RequestBody::Form(form)) => builder
                    .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(form.clone()),
                Some(RequestBody::Json(json)) => builder.json(json),
                None => builder,
            };

            let resp = builder.send().await.map_err(|e| classify_reqwest_error(e, timeout))?;
            let status = resp.status();
            debug!(step, url = %url, status = status.as_u16(), hop = hops, "upstream response");

            if let Redirects::Follow(limit) = redirects {
                if status.is_redirection() {
                    if let Some(next) = redirect_target(resp.headers(), &url) {
                        if hops >= limit {
                            return Err(TransportError::TooManyRedirects { limit });
                        }
                        hops += 1;
                        if !same_origin(&url, &next) && !in_scope(&next, scope) {
                            debug!(step, to = ?next.host_str(), "dropping credentials on cross-origin redirect");
                            strip_credentials(&mut headers);
                        }
                        carry_cookies(&mut headers, &resp);
                        if status == StatusCode::SEE_OTHER
                            || (method == Method::POST
                                && matches!(status, StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND))
                        {
                            method = Method::GET;
                            body = None;
                        }
                        url = next;
                        continue;
                    }
                }
            }

            let accepted = status.is_success()
                || (redirects == Redirects::Manual && status.is_redirection());
            if !accepted {
                return Err(TransportError::Status(status.as_u16()));
            }

            let response_headers = resp.headers().clone();
            let text = resp.text().await.map_err(|e| classify_reqwest_error(e, timeout))?;
            return Ok(FetchResponse {
                status,
                final_url: url,
                headers: response_headers,
                body: text,
            });
        }
    }
}

fn redirect_target(headers: &HeaderMap, base: &Url) -> Option<Url> {
    let location = headers.get(LOCATION)?.to_str().ok()?;
    base.join(location.trim()).ok()
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}

fn in_scope(url: &Url, scope: Option<&str>) -> bool {
    match (url.host_str(), scope) {
        (Some(host), Some(domain)) => {
            host == domain || host.strip_suffix(domain).is_some_and(|rest| rest.ends_with('.'))
        }
        _ => false,
    }
}

fn strip_credentials(headers: &mut HeaderMap) {
    headers.remove(COOKIE);
    headers.remove(AUTHORIZATION);
    headers.remove(PROXY_AUTHORIZATION);
}

/// Cookies set on an intermediate hop are sent on the following ones.
fn carry_cookies(headers: &mut HeaderMap, resp: &reqwest::Response) {
    let fresh: Vec<String> = resp
        .cookies()
        .map(|c| format!("{}={}", c.name(), c.value()))
        .collect();
    if fresh.is_empty() {
        return;
    }

    let mut jar: Vec<String> = headers
        .get(COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(';')
                .map(|pair| pair.trim().to_string())
                .filter(|pair| !pair.is_empty())
                .collect()
        })
        .unwrap_or_default();

    for cookie in fresh {
        let name = cookie.split('=').next().unwrap_or_default().to_string();
        jar.retain(|existing| existing.split('=').next() != Some(name.as_str()));
        jar.push(cookie);
    }

    if let Ok(value) = HeaderValue::from_str(&jar.join("; ")) {
        headers.insert(COOKIE, value);
    }
}

fn classify_reqwest_error(e: reqwest::Error, timeout: Duration) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(timeout)
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Request(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_location_resolves_against_request_url() {
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_static("/share/video/123/?a=b"));
        let base = Url::parse("https://v.douyin.com/abc/").unwrap();
        assert_eq!(
            redirect_target(&headers, &base).unwrap().as_str(),
            "https://v.douyin.com/share/video/123/?a=b"
        );
    }

    #[test]
    fn test_cookie_helper_ignores_blank() {
        let req = FetchRequest::get("page", "https://example.com").cookie(Some("  "));
        assert!(req.headers.get(COOKIE).is_none());
        let req = FetchRequest::get("page", "https://example.com").cookie(Some("a=1"));
        assert_eq!(req.headers.get(COOKIE).unwrap(), "a=1");
    }

    #[test]
    fn test_origin_and_scope_checks() {
        let a = Url::parse("https://xhslink.com/a/b").unwrap();
        assert!(same_origin(&a, &Url::parse("https://xhslink.com/c").unwrap()));
        assert!(!same_origin(&a, &Url::parse("https://xhslink.com:8443/c").unwrap()));
        assert!(!same_origin(&a, &Url::parse("https://www.xiaohongshu.com/").unwrap()));

        let next = Url::parse("https://www.xiaohongshu.com/explore/1").unwrap();
        assert!(in_scope(&next, Some("xiaohongshu.com")));
        assert!(!in_scope(&next, None));
        assert!(!in_scope(&Url::parse("https://evilxiaohongshu.com/").unwrap(), Some("xiaohongshu.com")));
    }

    #[test]
    fn test_strip_credentials_keeps_other_headers() {
        let req = FetchRequest::get("page", "https://example.com")
            .cookie(Some("a=1"))
            .header(AUTHORIZATION, "Bearer x")
            .user_agent("ua");
        let mut headers = req.headers;
        strip_credentials(&mut headers);
        assert!(headers.get(COOKIE).is_none());
        assert!(headers.get(AUTHORIZATION).is_none());
        assert_eq!(headers.get(USER_AGENT).unwrap(), "ua");
    }

    #[test]
    fn test_invalid_header_value_is_dropped() {
        let req = FetchRequest::get("page", "https://example.com").referer("bad\nvalue");
        assert!(req.headers.get(REFERER).is_none());
    }
}
