use std::cell::RefCell;

thread_local! {
    static CURRENT_TENANT: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Tenant identifier installed on the current thread, if any
#[must_use]
pub fn identifier() -> Option<String> {
    CURRENT_TENANT.with(|slot| slot.borrow().clone())
}

/// Install `id` as the current thread's tenant identifier
pub fn set(id: impl Into<String>) {
    swap(Some(id.into()));
}

/// Remove the current thread's tenant identifier
pub fn clear() {
    swap(None);
}

pub(crate) fn swap(new: Option<String>) -> Option<String> {
    CURRENT_TENANT.with(|slot| std::mem::replace(&mut *slot.borrow_mut(), new))
}

/// Installs a tenant identifier on the current thread for the guard's
/// lifetime, restoring the previous one on drop.
#[must_use]
#[derive(Debug)]
pub struct TenantGuard {
    previous: Option<String>,
}

impl TenantGuard {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            previous: swap(Some(id.into())),
        }
    }
}

impl Drop for TenantGuard {
    fn drop(&mut self) {
        swap(self.previous.take());
    }
}
