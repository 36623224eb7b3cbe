use crate::caller::{self, CallerContext};
use crate::tenant;

/// Snapshot of the ambient call state: the caller and tenant that were
/// installed on the thread that captured it.
///
/// Context never crosses a thread or task boundary on its own. Capture a
/// scope where the values are known, hand it to the worker, and install it
/// there with [`CallScope::enter`], [`CallScope::run`], or by wrapping the
/// work with [`CallScope::bind`] at the submission site.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallScope {
    caller: Option<CallerContext>,
    tenant: Option<String>,
}

impl CallScope {
    /// Scope with no caller and no tenant; entering it clears both slots.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Snapshot the current thread's caller and tenant.
    #[must_use]
    pub fn capture() -> Self {
        Self {
            caller: caller::current(),
            tenant: tenant::identifier(),
        }
    }

    /// Replace the snapshot's caller
    #[must_use]
    pub fn with_caller(mut self, ctx: CallerContext) -> Self {
        self.caller = Some(ctx);
        self
    }

    /// Replace the snapshot's tenant identifier
    #[must_use]
    pub fn with_tenant(mut self, id: impl Into<String>) -> Self {
        self.tenant = Some(id.into());
        self
    }

    #[must_use]
    pub fn caller(&self) -> Option<&CallerContext> {
        self.caller.as_ref()
    }

    #[must_use]
    pub fn tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    /// Install the snapshot on the current thread until the guard drops.
    pub fn enter(&self) -> ScopeGuard {
        ScopeGuard {
            previous_caller: caller::swap(self.caller.clone()),
            previous_tenant: tenant::swap(self.tenant.clone()),
        }
    }

    /// Run `f` with the snapshot installed, restoring the thread's previous
    /// state afterwards.
    pub fn run<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = self.enter();
        f()
    }

    /// Wrap `f` so that whenever and wherever it eventually runs, it
    /// observes this snapshot and leaves the executing thread's state as it
    /// found it.
    ///
    /// This is the hand-off point for thread pools and spawned workers:
    /// capture on the submitting thread, bind the task, submit the wrapper.
    pub fn bind<F, R>(self, f: F) -> impl FnOnce() -> R
    where
        F: FnOnce() -> R,
    {
        move || self.run(f)
    }
}

/// Restores the previous caller and tenant when dropped.
#[must_use]
#[derive(Debug)]
pub struct ScopeGuard {
    previous_caller: Option<CallerContext>,
    previous_tenant: Option<String>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        caller::swap(self.previous_caller.take());
        tenant::swap(self.previous_tenant.take());
    }
}
