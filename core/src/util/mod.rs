pub mod arbiter;
pub mod drain;
pub mod seen;
pub mod scalar;
pub mod slot;

pub use arbiter::SubscriptionArbiter;
pub use drain::{DrainQueue, Push};
pub use seen::SeenSet;
pub use scalar::ScalarSubscription;
pub use slot::SubscriptionSlot;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks the mutex, recovering the guard if a previous holder panicked.
/// Hold it briefly and never call into a subscriber while holding it.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> { mutex.lock().unwrap_or_else(PoisonError::into_inner) }
