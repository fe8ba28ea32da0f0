use std::sync::Arc;

use crate::challenge::ChallengeRecovery;
use crate::js_engine::ScriptEvaluator;
use crate::keys::KeyStore;

/// Collaborators shared by every extractor of a resolver.
#[derive(Clone)]
pub struct PipelineContext {
    pub http: ChallengeRecovery,
    pub keys: Arc<KeyStore>,
    pub evaluator: Option<Arc<dyn ScriptEvaluator>>,
    pub user_agent: String,
}

impl PipelineContext {
    pub fn new(
        http: ChallengeRecovery,
        keys: Arc<KeyStore>,
        evaluator: Option<Arc<dyn ScriptEvaluator>>,
    ) -> Self {
        let user_agent = http.fetcher().user_agent().to_string();
        Self {
            http,
            keys,
            evaluator,
            user_agent,
        }
    }

    pub fn evaluator(&self) -> Result<Arc<dyn ScriptEvaluator>, crate::error::ResolveError> {
        self.evaluator
            .clone()
            .ok_or(crate::error::ResolveError::ScriptUnavailable)
    }
}
