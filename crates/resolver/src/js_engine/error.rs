//! Script sandbox errors.

use std::fmt;

/// Failures of the obfuscation script sandbox.
#[derive(Debug)]
pub enum JsError {
    /// The sandbox itself could not be set up (`stage` is `runtime` or `context`).
    Sandbox { stage: &'static str, reason: String },
    /// A host script threw or did not parse.
    Evaluation {
        message: String,
        stack: Option<String>,
    },
    /// The script ran past its execution budget and was interrupted.
    Timeout,
    /// The blocking task running the script failed to complete.
    Offload(String),
}

impl fmt::Display for JsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsError::Sandbox { stage, reason } => {
                write!(f, "script sandbox {stage} setup failed: {reason}")
            }
            JsError::Evaluation {
                message,
                stack: Some(stack),
            } => write!(f, "host script failed: {message}\n{stack}"),
            JsError::Evaluation { message, .. } => write!(f, "host script failed: {message}"),
            JsError::Timeout => f.write_str("host script interrupted after its time budget"),
            JsError::Offload(msg) => write!(f, "script task did not complete: {msg}"),
        }
    }
}

impl std::error::Error for JsError {}

impl JsError {
    pub fn sandbox(stage: &'static str, reason: impl fmt::Display) -> Self {
        JsError::Sandbox {
            stage,
            reason: reason.to_string(),
        }
    }

    pub fn eval(message: impl Into<String>) -> Self {
        JsError::Evaluation {
            message: message.into(),
            stack: None,
        }
    }

    pub fn eval_with_stack(message: impl Into<String>, stack: impl Into<String>) -> Self {
        JsError::Evaluation {
            message: message.into(),
            stack: Some(stack.into()),
        }
    }
}

#[cfg(feature = "rquickjs")]
impl From<rquickjs::Error> for JsError {
    fn from(err: rquickjs::Error) -> Self {
        JsError::eval(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_stack_when_present() {
        let err = JsError::eval_with_stack("p is not defined", "at <eval>:1");
        assert_eq!(err.to_string(), "host script failed: p is not defined\nat <eval>:1");
        assert_eq!(
            JsError::sandbox("runtime", "out of memory").to_string(),
            "script sandbox runtime setup failed: out of memory"
        );
    }
}
