use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::ResolveError;

/// One resolution attempt: the embed page plus the caller's headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedRequest {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub referer: Option<String>,
}

impl EmbedRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::new(),
            referer: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    pub fn parsed_url(&self) -> Result<Url, ResolveError> {
        Ok(Url::parse(&self.url)?)
    }

    /// Caller headers plus the referer, as a request for the embed page.
    pub fn to_fetch_request(&self) -> FetchRequest {
        let mut request = FetchRequest::get(&self.url).headers(&self.headers);
        if let Some(referer) = &self.referer {
            request = request.header("Referer", referer);
        }
        request
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Text(String),
    Form(Vec<(String, String)>),
}

/// A single HTTP transaction as seen by the fetcher.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
    pub follow_redirects: bool,
    /// Send `Cache-Control: no-store` and `Pragma: no-cache`.
    pub no_store: bool,
    pub timeout: Option<Duration>,
}

impl FetchRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            follow_redirects: true,
            no_store: false,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Insert a header, skipping invalid names or values.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        match HeaderName::from_str(name.as_ref()) {
            Ok(name) => match HeaderValue::from_str(value.as_ref()) {
                Ok(value) => {
                    self.headers.insert(name, value);
                }
                Err(e) => debug!(error = %e, "Invalid header value; skipping"),
            },
            Err(e) => debug!(error = %e, "Invalid header name; skipping"),
        }
        self
    }

    pub fn headers<'a>(mut self, headers: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        for (name, value) in headers {
            self = self.header(name, value);
        }
        self
    }

    pub fn text_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Text(body.into()));
        self
    }

    pub fn form_body(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = Some(RequestBody::Form(fields));
        self
    }

    pub fn no_redirect(mut self) -> Self {
        self.follow_redirects = false;
        self
    }

    pub fn no_store(mut self) -> Self {
        self.no_store = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// URL after redirects were followed.
    pub final_url: Url,
}

impl FetchResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, ResolveError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn location(&self) -> Option<&str> {
        self.header("location")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embed_request_carries_referer() {
        let req = EmbedRequest::new("https://host.example/e/abc")
            .with_header("X-Requested-With", "XMLHttpRequest")
            .with_referer("https://catalog.example/");
        let fetch = req.to_fetch_request();
        assert_eq!(fetch.header_value("referer"), Some("https://catalog.example/"));
        assert_eq!(fetch.header_value("x-requested-with"), Some("XMLHttpRequest"));
        assert!(fetch.follow_redirects);
    }

    #[test]
    fn test_invalid_header_is_skipped() {
        let req = FetchRequest::get("https://a.example/").header("bad header", "v");
        assert!(req.headers.is_empty());
    }
}
