use std::sync::LazyLock;

use regex::Regex;
use reqwest::header::SERVER;

use crate::fetcher::FetchResponse;

/// Server header fragments of known challenge providers.
const CHALLENGE_SERVERS: &[&str] = &["cloudflare", "ddos-guard"];

static INLINE_SCRIPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script([^>]*)>(.*?)</script>").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeVerdict {
    /// Not a challenge response.
    Clear,
    /// 403/503 from a challenge-serving front; needs a browser-grade solve.
    Interstitial { provider: String },
    /// 202 "still solving": a cookie-computing script in the page.
    Pending,
}

impl ChallengeVerdict {
    pub fn is_challenge(&self) -> bool {
        !matches!(self, ChallengeVerdict::Clear)
    }
}

pub fn detect_challenge(response: &FetchResponse) -> ChallengeVerdict {
    match response.status {
        202 => ChallengeVerdict::Pending,
        403 | 503 => {
            let server = response
                .headers
                .get(SERVER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_ascii_lowercase();
            CHALLENGE_SERVERS
                .iter()
                .find(|provider| server.contains(*provider))
                .map(|provider| ChallengeVerdict::Interstitial {
                    provider: provider.to_string(),
                })
                .unwrap_or(ChallengeVerdict::Clear)
        }
        _ => ChallengeVerdict::Clear,
    }
}

/// Inline (non-`src`) scripts of a challenge page that assign `document.cookie`.
pub fn cookie_scripts(body: &str) -> Vec<&str> {
    INLINE_SCRIPT
        .captures_iter(body)
        .filter(|caps| !caps[1].to_ascii_lowercase().contains("src="))
        .filter_map(|caps| caps.get(2))
        .map(|m| m.as_str().trim())
        .filter(|script| script.contains("document.cookie"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use reqwest::header::{HeaderMap, HeaderValue};
    use rstest::rstest;
    use url::Url;

    fn response(status: u16, server: Option<&'static str>) -> FetchResponse {
        let mut headers = HeaderMap::new();
        if let Some(server) = server {
            headers.insert(SERVER, HeaderValue::from_static(server));
        }
        FetchResponse {
            status,
            headers,
            body: Bytes::new(),
            final_url: Url::parse("https://host.example/e/1").unwrap(),
        }
    }

    #[rstest]
    #[case(403, Some("cloudflare"), true)]
    #[case(503, Some("ddos-guard"), true)]
    #[case(403, Some("nginx"), false)]
    #[case(503, None, false)]
    #[case(200, Some("cloudflare"), false)]
    fn test_interstitial_detection(
        #[case] status: u16,
        #[case] server: Option<&'static str>,
        #[case] challenged: bool,
    ) {
        assert_eq!(detect_challenge(&response(status, server)).is_challenge(), challenged);
    }

    #[test]
    fn test_pending_detection() {
        assert_eq!(detect_challenge(&response(202, None)), ChallengeVerdict::Pending);
    }

    #[test]
    fn test_cookie_scripts_skip_external_and_unrelated() {
        let page = r#"<html><script src="/cdn.js"></script>
<script>var a = 1;</script>
<SCRIPT type="text/javascript">document.cookie = "k=" + (1 + 1);</SCRIPT></html>"#;
        assert_eq!(cookie_scripts(page), [r#"document.cookie = "k=" + (1 + 1);"#]);
    }
}
