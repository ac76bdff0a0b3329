//! Thread-local autocast scope for reduced-precision forward passes.
//!
//! While an [`AutocastGuard`] is alive, layers that honor autocast produce
//! activations in the guard's dtype. The previous setting is restored on drop.

use super::DType;
use std::cell::Cell;

thread_local! {
    static AUTOCAST: Cell<Option<DType>> = const { Cell::new(None) };
}

/// Dtype requested by the innermost active autocast scope, if any.
pub fn autocast_dtype() -> Option<DType> {
    AUTOCAST.with(|cell| cell.get())
}

/// Enter an autocast scope. Scopes nest; dropping the guard restores the outer one.
pub fn autocast(dtype: DType) -> AutocastGuard {
    let previous = AUTOCAST.with(|cell| cell.replace(Some(dtype)));
    tracing::debug!(?dtype, "autocast enabled");
    AutocastGuard { previous }
}

/// Guard returned by [`autocast`].
#[must_use = "autocast ends as soon as the guard is dropped"]
pub struct AutocastGuard {
    previous: Option<DType>,
}

impl Drop for AutocastGuard {
    fn drop(&mut self) {
        AUTOCAST.with(|cell| cell.set(self.previous));
    }
}
