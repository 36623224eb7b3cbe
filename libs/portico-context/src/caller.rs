use std::cell::RefCell;

thread_local! {
    static CURRENT_CALLER: RefCell<Option<CallerContext>> = const { RefCell::new(None) };
}

/// Identity a call is performed on behalf of: the user identifier and the
/// credential forwarded on their behalf.
///
/// The access token is an opaque string. It is transmitted unchanged, so any
/// scheme prefix (e.g. `Bearer `) must already be part of the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    user_identifier: String,
    access_token: String,
}

impl CallerContext {
    #[must_use]
    pub fn new(user_identifier: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            user_identifier: user_identifier.into(),
            access_token: access_token.into(),
        }
    }

    /// Identifier of the acting user
    #[must_use]
    pub fn user_identifier(&self) -> &str {
        &self.user_identifier
    }

    /// Credential forwarded on the user's behalf
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

/// Caller installed on the current thread, if any
#[must_use]
pub fn current() -> Option<CallerContext> {
    CURRENT_CALLER.with(|slot| slot.borrow().clone())
}

/// Install `ctx` as the current thread's caller
pub fn set(ctx: CallerContext) {
    swap(Some(ctx));
}

/// Remove the current thread's caller
pub fn clear() {
    swap(None);
}

pub(crate) fn swap(new: Option<CallerContext>) -> Option<CallerContext> {
    CURRENT_CALLER.with(|slot| std::mem::replace(&mut *slot.borrow_mut(), new))
}

/// Installs a caller on the current thread for the guard's lifetime.
///
/// On drop the slot is restored to whatever it held before, so guards nest:
/// dropping an inner guard restores the outer guard's caller.
#[must_use]
#[derive(Debug)]
pub struct CallerGuard {
    previous: Option<CallerContext>,
}

impl CallerGuard {
    pub fn new(ctx: CallerContext) -> Self {
        Self {
            previous: swap(Some(ctx)),
        }
    }
}

impl Drop for CallerGuard {
    fn drop(&mut self) {
        swap(self.previous.take());
    }
}
