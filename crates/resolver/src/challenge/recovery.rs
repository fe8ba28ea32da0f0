use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{COOKIE, HeaderValue, USER_AGENT};
use tracing::{debug, info, warn};

use super::detect::{ChallengeVerdict, cookie_scripts, detect_challenge};
use super::solver::{ChallengeSolver, SolvedChallenge, solve_with_script};
use crate::error::ResolveError;
use crate::fetcher::http::check_status;
use crate::fetcher::{FetchRequest, FetchResponse, Fetcher, merge_cookie_header};
use crate::js_engine::ScriptEvaluator;

pub const DEFAULT_CHALLENGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-transaction anti-bot recovery state. Never outlives one `fetch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeState {
    Direct,
    ChallengeDetected(ChallengeVerdict),
    Solving,
    Solved { cookies: usize },
    Retried,
    Success,
    Fatal(String),
}

impl fmt::Display for ChallengeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeState::Direct => write!(f, "direct"),
            ChallengeState::ChallengeDetected(verdict) => write!(f, "challenge-detected({verdict:?})"),
            ChallengeState::Solving => write!(f, "solving"),
            ChallengeState::Solved { cookies } => write!(f, "solved({cookies} cookies)"),
            ChallengeState::Retried => write!(f, "retried"),
            ChallengeState::Success => write!(f, "success"),
            ChallengeState::Fatal(reason) => write!(f, "fatal({reason})"),
        }
    }
}

struct Transaction<'a> {
    url: &'a str,
    state: ChallengeState,
}

impl<'a> Transaction<'a> {
    fn new(url: &'a str) -> Self {
        Self {
            url,
            state: ChallengeState::Direct,
        }
    }

    fn advance(&mut self, next: ChallengeState) {
        debug!(url = self.url, from = %self.state, to = %next, "challenge state");
        self.state = next;
    }
}

/// Fetcher wrapper that detects challenge responses and retries exactly once.
///
/// 202 responses are solved by running the page's cookie script in the
/// sandbox. 403/503 responses from a known challenge front try the same
/// script path first and fall back to the browser solver, bounded by
/// `timeout`. A timed-out or failed solve still retries once with whatever
/// cookies are available; a second challenged response is
/// [`ResolveError::Challenge`].
#[derive(Clone)]
pub struct ChallengeRecovery {
    fetcher: Fetcher,
    solver: Option<Arc<dyn ChallengeSolver>>,
    evaluator: Option<Arc<dyn ScriptEvaluator>>,
    timeout: Duration,
}

impl ChallengeRecovery {
    pub fn new(fetcher: Fetcher) -> Self {
        Self {
            fetcher,
            solver: None,
            evaluator: None,
            timeout: DEFAULT_CHALLENGE_TIMEOUT,
        }
    }

    pub fn with_solver(mut self, solver: Arc<dyn ChallengeSolver>) -> Self {
        self.solver = Some(solver);
        self
    }

    pub fn with_evaluator(mut self, evaluator: Option<Arc<dyn ScriptEvaluator>>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Fetch with challenge recovery. Non-challenge responses are status
    /// checked like [`Fetcher::fetch`].
    pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, ResolveError> {
        let mut tx = Transaction::new(&request.url);
        let response = self.fetcher.send(request).await?;

        let verdict = detect_challenge(&response);
        if !verdict.is_challenge() {
            return check_status(response, request);
        }
        info!(url = %request.url, status = response.status, ?verdict, "challenge detected");
        tx.advance(ChallengeState::ChallengeDetected(verdict.clone()));

        tx.advance(ChallengeState::Solving);
        let solved = self.solve(&verdict, &response, request).await;
        tx.advance(ChallengeState::Solved {
            cookies: solved.cookies.len(),
        });

        let retry = with_solution(request, &solved);
        let response = self.fetcher.send(&retry).await?;
        tx.advance(ChallengeState::Retried);

        if detect_challenge(&response).is_challenge() {
            let reason = format!("still challenged after one retry (status {})", response.status);
            tx.advance(ChallengeState::Fatal(reason.clone()));
            return Err(ResolveError::Challenge(reason));
        }
        tx.advance(ChallengeState::Success);
        check_status(response, &retry)
    }

    /// Run the applicable solvers. Failure is not fatal here: the caller
    /// retries with whatever came back.
    async fn solve(
        &self,
        verdict: &ChallengeVerdict,
        response: &FetchResponse,
        request: &FetchRequest,
    ) -> SolvedChallenge {
        if let Some(evaluator) = &self.evaluator {
            let body = response.text();
            let mut collected = SolvedChallenge::default();
            for script in cookie_scripts(&body) {
                match solve_with_script(evaluator.clone(), script).await {
                    Ok(solved) => collected.cookies.merge(&solved.cookies),
                    Err(e) => debug!(error = %e, "cookie script did not solve challenge"),
                }
            }
            if !collected.cookies.is_empty() {
                return collected;
            }
        }

        if matches!(verdict, ChallengeVerdict::Pending) {
            warn!(url = %request.url, "no cookie script solved the pending challenge");
            return SolvedChallenge::default();
        }

        let Some(solver) = &self.solver else {
            warn!(url = %request.url, "no browser solver configured");
            return SolvedChallenge::default();
        };

        let solve = solver.solve_challenge(&request.url, &request.headers, self.timeout);
        match tokio::time::timeout(self.timeout, solve).await {
            Ok(Ok(solved)) => solved,
            Ok(Err(e)) => {
                warn!(solver = solver.name(), error = %e, "browser solve failed");
                SolvedChallenge::default()
            }
            Err(_) => {
                warn!(
                    solver = solver.name(),
                    timeout_secs = self.timeout.as_secs_f64(),
                    "browser solve timed out, retrying without cookies"
                );
                SolvedChallenge::default()
            }
        }
    }
}

/// The original request with recovered cookies merged into its `Cookie`
/// header and the solver's user agent, if any.
fn with_solution(request: &FetchRequest, solved: &SolvedChallenge) -> FetchRequest {
    let mut retry = request.clone();
    if let Some(cookie) = merge_cookie_header(request.header_value("cookie"), &solved.cookies)
        && let Ok(value) = HeaderValue::from_str(&cookie)
    {
        retry.headers.insert(COOKIE, value);
    }
    if let Some(ua) = &solved.user_agent
        && let Ok(value) = HeaderValue::from_str(ua)
    {
        retry.headers.insert(USER_AGENT, value);
    }
    retry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::CookieJar;

    #[test]
    fn test_retry_request_merges_cookies_and_ua() {
        let request = FetchRequest::get("https://host.example/e/1")
            .header("Cookie", "cf_clearance=stale; session=1");
        let solved = SolvedChallenge {
            cookies: CookieJar::parse("cf_clearance=fresh"),
            user_agent: Some("SolverUA/1.0".into()),
        };
        let retry = with_solution(&request, &solved);
        assert_eq!(
            retry.header_value("cookie"),
            Some("cf_clearance=fresh; session=1")
        );
        assert_eq!(retry.header_value("user-agent"), Some("SolverUA/1.0"));
        assert_eq!(retry.url, request.url);
    }

    #[test]
    fn test_empty_solution_keeps_request() {
        let request = FetchRequest::get("https://host.example/e/1");
        let retry = with_solution(&request, &SolvedChallenge::default());
        assert!(retry.headers.is_empty());
    }
}
