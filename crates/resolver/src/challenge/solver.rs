use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::ResolveError;
use crate::fetcher::{CookieJar, FetchRequest, Fetcher};
use crate::js_engine::{ScriptEvaluator, evaluate_program_offloaded};

/// What a successful solve hands back to the request being retried.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolvedChallenge {
    pub cookies: CookieJar,
    /// Some fronts bind the clearance cookie to the solving browser's UA.
    pub user_agent: Option<String>,
}

/// Out-of-band challenge solver, typically a real or headless browser.
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    fn name(&self) -> &str;

    async fn solve_challenge(
        &self,
        url: &str,
        headers: &HeaderMap,
        timeout: Duration,
    ) -> Result<SolvedChallenge, ResolveError>;
}

/// Browser solve through a FlareSolverr endpoint (`POST {endpoint}/v1`).
pub struct FlareSolverr {
    endpoint: String,
    fetcher: Fetcher,
}

#[derive(Debug, Deserialize)]
struct FlareResponse {
    status: String,
    #[serde(default)]
    message: String,
    solution: Option<FlareSolution>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlareSolution {
    #[serde(default)]
    cookies: Vec<FlareCookie>,
    user_agent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FlareCookie {
    name: String,
    value: String,
}

impl FlareSolverr {
    pub fn new(endpoint: impl Into<String>, fetcher: Fetcher) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            fetcher,
        }
    }
}

#[async_trait]
impl ChallengeSolver for FlareSolverr {
    fn name(&self) -> &str {
        "flaresolverr"
    }

    async fn solve_challenge(
        &self,
        url: &str,
        _headers: &HeaderMap,
        timeout: Duration,
    ) -> Result<SolvedChallenge, ResolveError> {
        let body = json!({
            "cmd": "request.get",
            "url": url,
            "maxTimeout": timeout.as_millis() as u64,
        });
        let request = FetchRequest::post(format!("{}/v1", self.endpoint))
            .header("Content-Type", "application/json")
            .text_body(body.to_string())
            .timeout(timeout + Duration::from_secs(5));

        let response: FlareResponse = self.fetcher.fetch(&request).await?.json()?;
        if response.status != "ok" {
            return Err(ResolveError::Challenge(format!(
                "flaresolverr: {} {}",
                response.status, response.message
            )));
        }
        let solution = response
            .solution
            .ok_or_else(|| ResolveError::Challenge("flaresolverr returned no solution".into()))?;

        let mut cookies = CookieJar::new();
        for cookie in &solution.cookies {
            cookies.insert(&cookie.name, &cookie.value);
        }
        debug!(count = cookies.len(), "flaresolverr solved challenge");
        Ok(SolvedChallenge {
            cookies,
            user_agent: solution.user_agent,
        })
    }
}

/// Compute challenge cookies by running the page's own cookie script in the
/// sandbox. No browser involved.
pub async fn solve_with_script(
    evaluator: Arc<dyn ScriptEvaluator>,
    script: &str,
) -> Result<SolvedChallenge, ResolveError> {
    let cookie = evaluate_program_offloaded(evaluator, script.to_string(), "document.cookie".into()).await?;
    let mut cookies = CookieJar::parse(&cookie);
    cookies.strip_attributes();
    if cookies.is_empty() {
        return Err(ResolveError::Challenge("cookie script produced no cookie".into()));
    }
    Ok(SolvedChallenge {
        cookies,
        user_agent: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::js_engine::JsError;

    struct CookieEval(&'static str);

    impl ScriptEvaluator for CookieEval {
        fn evaluate(&self, _function_source: &str, _arg: &str) -> Result<String, JsError> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn test_script_solve_parses_cookie() {
        let solved = solve_with_script(Arc::new(CookieEval("__ddg1=abc; path=/")), "ignored")
            .await
            .unwrap();
        assert_eq!(solved.cookies.get("__ddg1"), Some("abc"));
        assert_eq!(solved.cookies.len(), 1);
    }

    #[tokio::test]
    async fn test_script_solve_keeps_every_pair() {
        let solved = solve_with_script(Arc::new(CookieEval("__ddg1=a; __ddg2=b")), "ignored")
            .await
            .unwrap();
        assert_eq!(solved.cookies.get("__ddg1"), Some("a"));
        assert_eq!(solved.cookies.get("__ddg2"), Some("b"));
    }

    #[tokio::test]
    async fn test_script_solve_without_cookie_fails() {
        let err = solve_with_script(Arc::new(CookieEval("")), "ignored").await.unwrap_err();
        assert!(matches!(err, ResolveError::Challenge(_)));
    }
}
