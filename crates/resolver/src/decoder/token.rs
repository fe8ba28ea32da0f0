//! Tokens computed by host-supplied JavaScript.
//!
//! Some hosts publish a small script (a `futoken` file or an inline IIFE)
//! whose function turns the embed id into the token their API expects. The
//! script runs in the sandbox and `entry` names the function to call.

use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::error::ResolveError;
use crate::js_engine::{ScriptEvaluator, evaluate_offloaded};

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*(?:\.[A-Za-z_$][A-Za-z0-9_$]*)*$").unwrap());

/// Wrap `script` so that calling the result with one argument runs
/// `entry(arg)` after the script's own top-level statements.
pub fn token_function_source(script: &str, entry: &str) -> Result<String, ResolveError> {
    if !IDENTIFIER.is_match(entry) {
        return Err(ResolveError::format(format!("invalid token entry point {entry:?}")));
    }
    Ok(format!(
        "function(__arg) {{\n{script}\n;if (typeof {entry} !== 'function') {{ throw new Error('{entry} is not defined'); }}\nreturn {entry}(__arg);\n}}"
    ))
}

/// Evaluate `entry(arg)` against `script` in the sandbox.
pub async fn derive_token(
    evaluator: Arc<dyn ScriptEvaluator>,
    script: &str,
    entry: &str,
    arg: &str,
) -> Result<String, ResolveError> {
    let source = token_function_source(script, entry)?;
    let token = evaluate_offloaded(evaluator, source, arg.to_string()).await?;
    if token.is_empty() {
        return Err(ResolveError::format("token script returned an empty value"));
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_identifier_entry() {
        assert!(token_function_source("", "alert(1);x").is_err());
        assert!(token_function_source("", "window.futoken").is_ok());
    }

    #[cfg(feature = "rquickjs")]
    #[tokio::test]
    async fn test_futoken_style_script() {
        let script = r#"
            var k = 'abc';
            window.futoken = function(v) {
                var a = [k];
                for (var i = 0; i < v.length; i++) {
                    a.push(k.charCodeAt(i % k.length) + v.charCodeAt(i));
                }
                return a.join(',');
            };
        "#;
        let evaluator: Arc<dyn ScriptEvaluator> = Arc::new(crate::js_engine::QuickJsEvaluator::new());
        let token = derive_token(evaluator, script, "window.futoken", "AB").await.unwrap();
        // 'a'(97)+'A'(65), 'b'(98)+'B'(66)
        assert_eq!(token, "abc,162,164");
    }

    #[cfg(feature = "rquickjs")]
    #[tokio::test]
    async fn test_missing_entry_is_script_error() {
        let evaluator: Arc<dyn ScriptEvaluator> = Arc::new(crate::js_engine::QuickJsEvaluator::new());
        let err = derive_token(evaluator, "var x = 1;", "futoken", "id").await.unwrap_err();
        assert!(matches!(err, ResolveError::Script(_)));
    }
}
