use std::time::Duration;

use reqwest::Client;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, HeaderMap, HeaderValue, PRAGMA, USER_AGENT,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::client::{DEFAULT_UA, build_client};
use super::request::{FetchRequest, FetchResponse, RequestBody};
use crate::error::ResolveError;

/// HTTP leaf of the pipeline.
///
/// Holds one client that follows redirects and one that never does. Default
/// headers are applied first and request headers override them. Retries are
/// left to the layers above.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    no_redirect_client: Client,
    default_headers: HeaderMap,
    cancel: Option<CancellationToken>,
}

impl Fetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, ResolveError> {
        Ok(Self::from_clients(
            build_client(timeout, true)?,
            build_client(timeout, false)?,
            user_agent,
        ))
    }

    pub fn from_clients(client: Client, no_redirect_client: Client, user_agent: &str) -> Self {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent).unwrap_or(HeaderValue::from_static(DEFAULT_UA)),
        );
        default_headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        default_headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        Self {
            client,
            no_redirect_client,
            default_headers,
            cancel: None,
        }
    }

    /// Abort in-flight and future requests once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn user_agent(&self) -> &str {
        self.default_headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_UA)
    }

    /// Perform the request and return the response whatever its status.
    pub async fn send(&self, request: &FetchRequest) -> Result<FetchResponse, ResolveError> {
        if let Some(token) = &self.cancel {
            if token.is_cancelled() {
                return Err(ResolveError::Cancelled);
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(ResolveError::Cancelled),
                result = self.execute(request) => result,
            }
        } else {
            self.execute(request).await
        }
    }

    /// Like [`send`](Self::send) but maps unexpected statuses to
    /// [`ResolveError::HttpStatus`]. Redirect statuses count as success when
    /// redirects are suppressed.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, ResolveError> {
        let response = self.send(request).await?;
        check_status(response, request)
    }

    pub async fn get_text(&self, request: &FetchRequest) -> Result<String, ResolveError> {
        Ok(self.fetch(request).await?.text())
    }

    async fn execute(&self, request: &FetchRequest) -> Result<FetchResponse, ResolveError> {
        let client = if request.follow_redirects {
            &self.client
        } else {
            &self.no_redirect_client
        };

        let mut headers = self.default_headers.clone();
        for (name, value) in request.headers.iter() {
            headers.insert(name.clone(), value.clone());
        }
        if request.no_store {
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
            headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        }

        let mut builder = client
            .request(request.method.clone(), &request.url)
            .headers(headers);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        builder = match &request.body {
            Some(RequestBody::Text(text)) => builder.body(text.clone()),
            Some(RequestBody::Form(fields)) => builder.form(fields),
            None => builder,
        };

        debug!(method = %request.method, url = %request.url, "sending request");
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let final_url = response.url().clone();
        let body = response.bytes().await?;
        debug!(status, url = %final_url, bytes = body.len(), "response received");

        Ok(FetchResponse {
            status,
            headers,
            body,
            final_url,
        })
    }
}

pub(crate) fn check_status(
    response: FetchResponse,
    request: &FetchRequest,
) -> Result<FetchResponse, ResolveError> {
    if response.is_success() || (!request.follow_redirects && response.is_redirect()) {
        Ok(response)
    } else {
        Err(ResolveError::HttpStatus {
            code: response.status,
            url: response.final_url.to_string(),
        })
    }
}
