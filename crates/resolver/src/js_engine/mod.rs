//! Sandboxed JavaScript evaluation.
//!
//! Used only to defeat host obfuscation: packer symbol tables that are
//! computed by a nested function, `futoken`-style token functions, and
//! cookie-computing challenge scripts. Everything else is decoded natively.
//!
//! # Example
//!
//! ```ignore
//! use stream_resolver::js_engine::{QuickJsEvaluator, ScriptEvaluator};
//!
//! let token = QuickJsEvaluator::new()
//!     .evaluate("function(v) { return v + '!'; }", "hello")?;
//! ```

#[cfg(feature = "rquickjs")]
mod context;
mod error;
mod evaluator;
#[cfg(feature = "rquickjs")]
mod manager;

#[cfg(feature = "rquickjs")]
pub use context::{BROWSER_ENV_SETUP, JsContext};
pub use error::JsError;
#[cfg(feature = "rquickjs")]
pub use evaluator::QuickJsEvaluator;
pub use evaluator::{
    ScriptEvaluator, default_evaluator, evaluate_offloaded, evaluate_program_offloaded,
};
#[cfg(feature = "rquickjs")]
pub use manager::{DEFAULT_EXECUTION_BUDGET, DEFAULT_MEMORY_LIMIT, JsEngineManager};
