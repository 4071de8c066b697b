use std::{
    ops::{Deref, DerefMut},
    sync::PoisonError,
    time::Duration,
};
#[cfg(feature = "lock_tracking")]
use std::{sync::TryLockError, time::Instant};

#[cfg(feature = "lock_tracking")]
use tracing::{debug, trace, warn};

/// Serializes the operations of one scenario
///
/// Operations hold the lock across blocking host calls, so waiting for another operation to
/// finish is normal. `patience` is how long one step may take; with the `lock_tracking` feature,
/// waits and holds beyond it are reported together with the operation that held the lock.
pub(crate) struct Mutex<T> {
    value: std::sync::Mutex<T>,
    #[cfg(feature = "lock_tracking")]
    holder: std::sync::Mutex<Option<Holder>>,
    #[cfg(feature = "lock_tracking")]
    patience: Duration,
}

#[cfg(feature = "lock_tracking")]
#[derive(Debug, Copy, Clone)]
struct Holder {
    purpose: &'static str,
    since: Instant,
}

impl<T> Mutex<T> {
    #[cfg_attr(not(feature = "lock_tracking"), allow(unused_variables))]
    pub(crate) fn new(value: T, patience: Duration) -> Self {
        Self {
            value: std::sync::Mutex::new(value),
            #[cfg(feature = "lock_tracking")]
            holder: std::sync::Mutex::new(None),
            #[cfg(feature = "lock_tracking")]
            patience,
        }
    }

    /// Acquires the lock for the operation `purpose`
    #[cfg(not(feature = "lock_tracking"))]
    pub(crate) fn lock(&self, _purpose: &'static str) -> MutexGuard<'_, T> {
        MutexGuard {
            guard: self.value.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Acquires the lock for the operation `purpose`, which is recorded as the holder
    #[cfg(feature = "lock_tracking")]
    pub(crate) fn lock(&self, purpose: &'static str) -> MutexGuard<'_, T> {
        let guard = match self.value.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => {
                if let Some(holder) = self.holder() {
                    debug!(
                        purpose,
                        held_by = holder.purpose,
                        held_for = ?holder.since.elapsed(),
                        "waiting for scenario lock"
                    );
                }
                let start = Instant::now();
                let guard = self.value.lock().unwrap_or_else(PoisonError::into_inner);
                let waited = start.elapsed();
                if waited > self.patience {
                    warn!(purpose, ?waited, patience = ?self.patience, "slow scenario lock");
                }
                guard
            }
        };
        let since = Instant::now();
        *self.holder.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Holder { purpose, since });
        MutexGuard {
            guard,
            lock: self,
            purpose,
            since,
        }
    }

    #[cfg(feature = "lock_tracking")]
    fn holder(&self) -> Option<Holder> {
        *self.holder.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) struct MutexGuard<'a, T> {
    guard: std::sync::MutexGuard<'a, T>,
    #[cfg(feature = "lock_tracking")]
    lock: &'a Mutex<T>,
    #[cfg(feature = "lock_tracking")]
    purpose: &'static str,
    #[cfg(feature = "lock_tracking")]
    since: Instant,
}

#[cfg(feature = "lock_tracking")]
impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        *self.lock.holder.lock().unwrap_or_else(PoisonError::into_inner) = None;
        let held = self.since.elapsed();
        if held > self.lock.patience {
            warn!(
                purpose = self.purpose,
                ?held,
                "scenario operation held the lock past one step"
            );
        } else {
            trace!(purpose = self.purpose, ?held, "released scenario lock");
        }
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
