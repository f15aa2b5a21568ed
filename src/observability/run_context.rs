//! Run context propagation for correlation IDs.
//!
//! Every rotation run carries a run id that is recorded on its spans and in
//! the [`RotationReport`](crate::RotationReport). An HTTP trigger enters a
//! context per request so the run reuses the request's id.

use std::cell::RefCell;
use uuid::Uuid;

/// Per-run context with correlation ID.
#[derive(Clone, Debug)]
pub struct RunContext {
    run_id: String,
}

impl RunContext {
    /// Creates a new run context with a generated ID.
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
        }
    }

    /// Creates a run context with an existing ID.
    #[must_use]
    pub fn from_id(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }

    /// Returns the run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    static THREAD_CONTEXT: RefCell<Option<RunContext>> = const { RefCell::new(None) };
}

/// Guard that restores the previous thread-local context on drop.
pub struct RunContextGuard {
    previous: Option<RunContext>,
}

impl Drop for RunContextGuard {
    fn drop(&mut self) {
        THREAD_CONTEXT.with(|slot| {
            *slot.borrow_mut() = self.previous.take();
        });
    }
}

/// Enters a run context for synchronous flows.
#[must_use]
pub fn enter_run_context(context: RunContext) -> RunContextGuard {
    let previous = THREAD_CONTEXT.with(|slot| slot.borrow_mut().replace(context));
    RunContextGuard { previous }
}

/// Returns the current run ID, if set.
#[must_use]
pub fn current_run_id() -> Option<String> {
    THREAD_CONTEXT.with(|slot| slot.borrow().as_ref().map(|ctx| ctx.run_id.clone()))
}
