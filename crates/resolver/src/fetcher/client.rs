use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use rustls::{ClientConfig, crypto::aws_lc_rs};
use rustls_platform_verifier::BuilderVerifierExt;

use crate::error::ResolveError;

pub const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Build a reqwest client on a preconfigured rustls stack.
///
/// With `follow_redirects == false` the client never follows `3xx`, so the
/// caller can read the `Location` header itself.
pub fn build_client(timeout: Duration, follow_redirects: bool) -> Result<Client, ResolveError> {
    let provider = Arc::new(aws_lc_rs::default_provider());
    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ResolveError::ClientSetup(e.to_string()))?
        .with_platform_verifier()
        .map_err(|e| ResolveError::ClientSetup(e.to_string()))?
        .with_no_client_auth();

    let redirect = if follow_redirects {
        reqwest::redirect::Policy::limited(10)
    } else {
        reqwest::redirect::Policy::none()
    };

    Client::builder()
        .use_preconfigured_tls(tls_config)
        .timeout(timeout)
        .redirect(redirect)
        .build()
        .map_err(|e| ResolveError::ClientSetup(e.to_string()))
}
