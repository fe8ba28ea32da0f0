//! JavaScript context wrapper with ergonomic API.

use super::error::JsError;

use rquickjs::CatchResultExt;

/// Minimal browser environment for host scripts.
/// Provides stubs for window, document, navigator, atob/btoa, etc.
pub const BROWSER_ENV_SETUP: &str = r#"
    var window = window || {};
    var document = document || {};
    var navigator = navigator || {
        userAgent: 'Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36',
        platform: 'Win32',
        language: 'en-US',
        appCodeName: 'Mozilla',
        appVersion: '5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36',
        onLine: true,
        cookieEnabled: true
    };
    window.navigator = navigator;
    window.document = document;
    window.innerHeight = 910;
    window.innerWidth = 1920;
    window.location = window.location || { href: '', hostname: '', protocol: 'https:' };
    window.addEventListener = function() {};
    window.setTimeout = function(fn) { if (typeof fn === 'function') { fn(); } return 0; };
    var setTimeout = window.setTimeout;
    var location = window.location;
    var __cookies = {};
    Object.defineProperty(document, 'cookie', {
        configurable: true,
        get: function() {
            return Object.keys(__cookies).map(function(name) {
                return name + '=' + __cookies[name];
            }).join('; ');
        },
        set: function(value) {
            var pair = String(value).split(';')[0];
            var eq = pair.indexOf('=');
            if (eq <= 0) { return; }
            __cookies[pair.slice(0, eq).trim()] = pair.slice(eq + 1).trim();
        }
    });
    document.location = window.location;
    document.addEventListener = function() {};
    document.getElementById = function() { return null; };
    document.querySelector = function() { return null; };
    var __b64 = 'ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/=';
    var btoa = btoa || function(input) {
        var str = String(input), output = '';
        for (var block, charCode, idx = 0, map = __b64;
             str.charAt(idx | 0) || (map = '=', idx % 1);
             output += map.charAt(63 & block >> 8 - idx % 1 * 8)) {
            charCode = str.charCodeAt(idx += 3 / 4);
            block = block << 8 | charCode;
        }
        return output;
    };
    var atob = atob || function(input) {
        var str = String(input).replace(/=+$/, ''), output = '';
        for (var bc = 0, bs, buffer, idx = 0;
             buffer = str.charAt(idx++);
             ~buffer && (bs = bc % 4 ? bs * 64 + buffer : buffer, bc++ % 4)
                ? output += String.fromCharCode(255 & bs >> (-2 * bc & 6)) : 0) {
            buffer = __b64.indexOf(buffer);
        }
        return output;
    };
    window.atob = atob;
    window.btoa = btoa;
"#;

/// A wrapper around rquickjs::Context providing an ergonomic API.
pub struct JsContext {
    ctx: rquickjs::Context,
}

impl JsContext {
    /// Create a new JsContext from a rquickjs Runtime.
    pub fn new(runtime: &rquickjs::Runtime) -> Result<Self, JsError> {
        let ctx = rquickjs::Context::full(runtime)
            .map_err(|e| JsError::sandbox("context", e))?;
        Ok(Self { ctx })
    }

    /// Set up browser environment stubs (window, document, navigator, etc.).
    pub fn setup_browser_env(&self) -> Result<(), JsError> {
        self.eval_void(BROWSER_ENV_SETUP)
    }

    /// Evaluate JavaScript code and return the result as a String.
    pub fn eval_string(&self, code: &str) -> Result<String, JsError> {
        self.ctx.with(|ctx| {
            let result: Result<String, _> = ctx.eval(code);
            result.catch(&ctx).map_err(Self::convert_caught_error)
        })
    }

    /// Evaluate JavaScript code without returning a value.
    pub fn eval_void(&self, code: &str) -> Result<(), JsError> {
        self.ctx.with(|ctx| {
            let result: Result<(), _> = ctx.eval(code);
            result.catch(&ctx).map_err(Self::convert_caught_error)
        })
    }

    /// Call a function expression with a single string argument and coerce the
    /// result to a string.
    ///
    /// `function_source` must evaluate to a callable, e.g.
    /// `function(v) { return v.split('').reverse().join(''); }`.
    pub fn call_with_string_arg(&self, function_source: &str, arg: &str) -> Result<String, JsError> {
        // JSON string literals are valid JS string literals.
        let arg_literal = serde_json::to_string(arg)
            .map_err(|e| JsError::eval(format!("failed to quote argument: {e}")))?;
        let code = format!(
            "(function() {{ var __fn = ({function_source}\n); var __out = __fn({arg_literal}); return __out === undefined || __out === null ? '' : String(__out); }})()"
        );
        self.eval_string(&code)
    }

    /// Convert a CaughtError to JsError with detailed information.
    fn convert_caught_error(caught: rquickjs::CaughtError) -> JsError {
        use rquickjs::CaughtError;
        match caught {
            CaughtError::Exception(exc) => {
                let msg = exc.message().unwrap_or_default();
                if msg.contains("interrupted") {
                    return JsError::Timeout;
                }
                if let Some(stack) = exc.stack()
                    && !stack.is_empty()
                {
                    return JsError::eval_with_stack(msg, stack);
                }
                JsError::eval(msg)
            }
            CaughtError::Value(val) => JsError::eval(format!(
                "JS threw value: {:?}",
                val.as_string().and_then(|s| s.to_string().ok())
            )),
            CaughtError::Error(err) => JsError::eval(err.to_string()),
        }
    }
}
