//! JavaScript engine manager with thread-local runtime caching.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::context::JsContext;
use super::error::JsError;

/// Heap ceiling for a sandboxed runtime.
pub const DEFAULT_MEMORY_LIMIT: usize = 32 * 1024 * 1024;

/// Wall-clock budget for a single script evaluation.
pub const DEFAULT_EXECUTION_BUDGET: Duration = Duration::from_secs(5);

struct CachedRuntime {
    runtime: rquickjs::Runtime,
    deadline: Arc<Mutex<Option<Instant>>>,
}

// QuickJS runtimes use Rc internally, so each thread owns one.
thread_local! {
    static THREAD_RUNTIME: RefCell<Option<CachedRuntime>> = const { RefCell::new(None) };
}

/// A manager for sandboxed JavaScript execution using thread-local runtimes.
///
/// Every runtime is created with a memory limit and an interrupt handler
/// that aborts evaluation once the per-call deadline has passed.
#[derive(Debug, Clone, Copy)]
pub struct JsEngineManager {
    memory_limit: usize,
    budget: Duration,
}

impl JsEngineManager {
    pub fn global() -> Self {
        Self {
            memory_limit: DEFAULT_MEMORY_LIMIT,
            budget: DEFAULT_EXECUTION_BUDGET,
        }
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    fn create_runtime(memory_limit: usize) -> Result<CachedRuntime, JsError> {
        let runtime =
            rquickjs::Runtime::new().map_err(|e| JsError::sandbox("runtime", e))?;
        runtime.set_memory_limit(memory_limit);
        runtime.set_max_stack_size(1024 * 1024);

        let deadline: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
        let handler_deadline = deadline.clone();
        runtime.set_interrupt_handler(Some(Box::new(move || {
            handler_deadline
                .lock()
                .is_some_and(|deadline| Instant::now() >= deadline)
        })));

        Ok(CachedRuntime { runtime, deadline })
    }

    /// Get or create the thread-local runtime.
    fn with_runtime<F, T>(&self, f: F) -> Result<T, JsError>
    where
        F: FnOnce(&CachedRuntime) -> Result<T, JsError>,
    {
        THREAD_RUNTIME.with(|cell| {
            let mut runtime_ref = cell.borrow_mut();
            let cached = match runtime_ref.take() {
                Some(cached) => cached,
                None => Self::create_runtime(self.memory_limit)?,
            };
            let cached = runtime_ref.insert(cached);
            f(cached)
        })
    }

    /// Execute a function with a fresh JavaScript context under the
    /// configured time budget.
    pub fn execute<F, T>(&self, f: F) -> Result<T, JsError>
    where
        F: FnOnce(&JsContext) -> Result<T, JsError>,
    {
        self.with_runtime(|cached| {
            *cached.deadline.lock() = Some(Instant::now() + self.budget);
            let result = JsContext::new(&cached.runtime).and_then(|ctx| f(&ctx));
            *cached.deadline.lock() = None;
            result
        })
    }

    /// Execute with browser environment stubs pre-configured.
    pub fn execute_with_browser_env<F, T>(&self, f: F) -> Result<T, JsError>
    where
        F: FnOnce(&JsContext) -> Result<T, JsError>,
    {
        self.execute(|ctx| {
            ctx.setup_browser_env()?;
            f(ctx)
        })
    }

    /// Clear the thread-local runtime cache.
    pub fn clear_cache() {
        THREAD_RUNTIME.with(|cell| {
            *cell.borrow_mut() = None;
        });
    }
}

impl Default for JsEngineManager {
    fn default() -> Self {
        Self::global()
    }
}
