use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::lease::Lease;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const DEFAULT_MAX_IDLE: usize = 1024;

// -----------------------------------------------------------------------------
// ----- Pool ------------------------------------------------------------------

/// Recycler for instances that are expensive to build on the hot path.
///
/// `rent` hands out a [`Lease`]; dropping (or releasing) the lease returns the
/// instance. Returned instances that pass the reuse predicate are reset and
/// kept, the rest are destroyed. The pool never blocks and never runs dry: an
/// empty store just means a fresh `create`.
pub struct Pool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

pub(super) struct PoolInner<T> {
    idle: Mutex<Vec<T>>,
    max_idle: usize,
    create: Box<dyn Fn() -> T + Send + Sync>,
    reset: Box<dyn Fn(&mut T) + Send + Sync>,
    destroy: Box<dyn Fn(T) + Send + Sync>,
    should_reuse: Box<dyn Fn(&T) -> bool + Send + Sync>,
    counters: PoolCounters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub created: u64,
    pub reused: u64,
    pub returned: u64,
    pub destroyed: u64,
    pub idle: usize,
    pub outstanding: u64,
}

impl PoolStats {
    pub fn rented(&self) -> u64 {
        self.created + self.reused
    }
}

// -----------------------------------------------------------------------------
// ----- Pool: Static ----------------------------------------------------------

impl<T: Send + 'static> Pool<T> {
    pub fn builder<F>(create: F) -> PoolBuilder<T>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        PoolBuilder {
            max_idle: DEFAULT_MAX_IDLE,
            create: Box::new(create),
            reset: Box::new(|_| {}),
            destroy: Box::new(drop::<T>),
            should_reuse: Box::new(|_| true),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Pool: Public ----------------------------------------------------------

impl<T: Send + 'static> Pool<T> {
    pub fn rent(&self) -> Lease<T> {
        let recycled = self.inner.idle.lock().pop();

        let value = match recycled {
            Some(value) => {
                self.inner.counters.reused.fetch_add(1, Ordering::Relaxed);
                value
            }
            None => {
                self.inner.counters.created.fetch_add(1, Ordering::Relaxed);
                (self.inner.create)()
            }
        };

        Lease::new(value, self.inner.clone())
    }

    /// Explicit form of dropping the lease.
    pub fn give_back(&self, lease: Lease<T>) {
        lease.release();
    }

    /// Destroy every idle instance. Returns how many were dropped.
    pub fn shrink(&self) -> usize {
        let drained: Vec<T> = std::mem::take(&mut *self.inner.idle.lock());
        let count = drained.len();
        for value in drained {
            self.inner.destroy_one(value);
        }
        count
    }

    pub fn stats(&self) -> PoolStats {
        let counters = &self.inner.counters;
        let created = counters.created.load(Ordering::Acquire);
        let reused = counters.reused.load(Ordering::Acquire);
        let returned = counters.returned.load(Ordering::Acquire);

        PoolStats {
            created,
            reused,
            returned,
            destroyed: counters.destroyed.load(Ordering::Acquire),
            idle: self.inner.idle.lock().len(),
            outstanding: (created + reused).saturating_sub(returned),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- PoolInner -------------------------------------------------------------

impl<T> PoolInner<T> {
    /// Called exactly once per lease, from `Lease::drop`.
    pub(super) fn take_back(&self, mut value: T) {
        self.counters.returned.fetch_add(1, Ordering::AcqRel);

        if !(self.should_reuse)(&value) {
            self.destroy_one(value);
            return;
        }

        (self.reset)(&mut value);

        let rejected = {
            let mut idle = self.idle.lock();
            if idle.len() < self.max_idle {
                idle.push(value);
                None
            } else {
                Some(value)
            }
        };

        if let Some(value) = rejected {
            self.destroy_one(value);
        }
    }

    fn destroy_one(&self, value: T) {
        self.counters.destroyed.fetch_add(1, Ordering::Relaxed);
        (self.destroy)(value);
    }
}

#[derive(Debug, Default)]
struct PoolCounters {
    created: AtomicU64,
    reused: AtomicU64,
    returned: AtomicU64,
    destroyed: AtomicU64,
}

// -----------------------------------------------------------------------------
// ----- PoolBuilder -----------------------------------------------------------

pub struct PoolBuilder<T> {
    max_idle: usize,
    create: Box<dyn Fn() -> T + Send + Sync>,
    reset: Box<dyn Fn(&mut T) + Send + Sync>,
    destroy: Box<dyn Fn(T) + Send + Sync>,
    should_reuse: Box<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T: Send + 'static> PoolBuilder<T> {
    pub fn reset<F>(mut self, reset: F) -> Self
    where
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        self.reset = Box::new(reset);
        self
    }

    pub fn destroy<F>(mut self, destroy: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.destroy = Box::new(destroy);
        self
    }

    pub fn reuse_if<F>(mut self, should_reuse: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.should_reuse = Box::new(should_reuse);
        self
    }

    pub fn max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    pub fn build(self) -> Pool<T> {
        Pool {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(Vec::new()),
                max_idle: self.max_idle,
                create: self.create,
                reset: self.reset,
                destroy: self.destroy,
                should_reuse: self.should_reuse,
                counters: PoolCounters::default(),
            }),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
