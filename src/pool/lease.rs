use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use super::pool::PoolInner;

// -----------------------------------------------------------------------------
// ----- Lease -----------------------------------------------------------------

/// Move-only handle on a pooled instance. The instance goes back to its pool
/// exactly once, when the lease is dropped or released.
pub struct Lease<T> {
    value: Option<T>,
    pool: Arc<PoolInner<T>>,
}

impl<T> Lease<T> {
    pub(super) fn new(value: T, pool: Arc<PoolInner<T>>) -> Self {
        Self {
            value: Some(value),
            pool,
        }
    }

    pub fn release(self) {
        drop(self);
    }
}

impl<T> Deref for Lease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `Drop` takes the value out.
        self.value.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<T> DerefMut for Lease<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T> Drop for Lease<T> {
    fn drop(&mut self) {
        let Some(value) = self.value.take() else {
            return;
        };

        self.pool.take_back(value);
    }
}

impl<T: fmt::Debug> fmt::Debug for Lease<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Lease").field(&self.value).finish()
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
