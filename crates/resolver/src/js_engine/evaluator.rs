//! The narrow script-evaluation seam used by the decoders.

use std::sync::Arc;

use super::error::JsError;

/// Evaluates a self-contained JavaScript function against one string input.
///
/// `function_source` is an expression that evaluates to a callable taking a
/// single argument; the call result is coerced to a string. Implementations
/// must sandbox execution (bounded memory and time, no host I/O).
pub trait ScriptEvaluator: Send + Sync {
    fn evaluate(&self, function_source: &str, arg: &str) -> Result<String, JsError>;

    /// Run `prelude` for its side effects, then return `expression`.
    fn evaluate_program(&self, prelude: &str, expression: &str) -> Result<String, JsError> {
        let function_source = format!("function(_) {{\n{prelude}\n;return ({expression});\n}}");
        self.evaluate(&function_source, "")
    }
}

/// Run an evaluation on the blocking pool so a slow script never stalls the
/// async executor.
pub async fn evaluate_offloaded(
    evaluator: Arc<dyn ScriptEvaluator>,
    function_source: String,
    arg: String,
) -> Result<String, JsError> {
    tokio::task::spawn_blocking(move || evaluator.evaluate(&function_source, &arg))
        .await
        .map_err(|e| JsError::Offload(e.to_string()))?
}

/// Program variant of [`evaluate_offloaded`].
pub async fn evaluate_program_offloaded(
    evaluator: Arc<dyn ScriptEvaluator>,
    prelude: String,
    expression: String,
) -> Result<String, JsError> {
    tokio::task::spawn_blocking(move || evaluator.evaluate_program(&prelude, &expression))
        .await
        .map_err(|e| JsError::Offload(e.to_string()))?
}

/// QuickJS-backed evaluator running on the thread-local runtime cache.
#[cfg(feature = "rquickjs")]
#[derive(Debug, Clone, Copy, Default)]
pub struct QuickJsEvaluator {
    manager: super::JsEngineManager,
}

#[cfg(feature = "rquickjs")]
impl QuickJsEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_budget(budget: std::time::Duration) -> Self {
        Self {
            manager: super::JsEngineManager::global().with_budget(budget),
        }
    }
}

#[cfg(feature = "rquickjs")]
impl ScriptEvaluator for QuickJsEvaluator {
    fn evaluate(&self, function_source: &str, arg: &str) -> Result<String, JsError> {
        self.manager
            .execute_with_browser_env(|ctx| ctx.call_with_string_arg(function_source, arg))
    }
}

/// The evaluator used when none is injected, if a script engine is compiled in.
pub fn default_evaluator() -> Option<Arc<dyn ScriptEvaluator>> {
    #[cfg(feature = "rquickjs")]
    {
        Some(Arc::new(QuickJsEvaluator::new()))
    }
    #[cfg(not(feature = "rquickjs"))]
    {
        None
    }
}
