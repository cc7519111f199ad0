use std::sync::{Mutex, MutexGuard, PoisonError};

use twinsync::counter::{ApplyOutcome, Bounds, CounterField, Counters};

use tracing::{debug, warn};

/// The owner of the live counters.
///
/// Every access goes through a single lock, held only for the duration of a
/// read or a read-modify-write. The lock is never held across an `.await`.
#[derive(Debug)]
pub struct CounterStore {
    counters: Mutex<Counters>,
    bounds: Bounds,
}

impl CounterStore {
    /// Creates a [`CounterStore`] with the startup values for the given
    /// [`Bounds`].
    #[must_use]
    pub fn new(bounds: Bounds) -> Self {
        Self::with_counters(Counters::initial(bounds), bounds)
    }

    /// Creates a [`CounterStore`] with the given [`Counters`].
    ///
    /// Values outside the [`Bounds`] are replaced by the startup values.
    #[must_use]
    pub fn with_counters(counters: Counters, bounds: Bounds) -> Self {
        let initial = Counters::initial(bounds);
        let counters = Counters::new(
            if bounds.contains(i64::from(counters.up)) {
                counters.up
            } else {
                initial.up
            },
            if bounds.contains(i64::from(counters.down)) {
                counters.down
            } else {
                initial.down
            },
        );

        Self {
            counters: Mutex::new(counters),
            bounds,
        }
    }

    /// Returns the counter [`Bounds`].
    #[must_use]
    pub const fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Returns a consistent snapshot of both counters.
    #[must_use]
    pub fn get(&self) -> Counters {
        *self.lock()
    }

    /// Advances both counters by one step and returns the new snapshot.
    pub fn increment_local(&self) -> Counters {
        let mut counters = self.lock();
        counters.step(self.bounds);
        *counters
    }

    /// Applies a desired value to a counter.
    pub fn apply_desired(&self, field: CounterField, value: i64) -> ApplyOutcome {
        let outcome = self.lock().apply(field, value, self.bounds);

        match outcome {
            ApplyOutcome::NoRequest => debug!("No change requested for `{field}`"),
            ApplyOutcome::Rejected => warn!(
                "Desired `{field}` value {value} is outside [{}, {})",
                self.bounds.min(),
                self.bounds.max()
            ),
            ApplyOutcome::Unchanged => debug!("Desired `{field}` already matches {value}"),
            ApplyOutcome::Changed => debug!("Validated desired `{field}` value: {value}"),
        }

        outcome
    }

    // A panic while holding the lock cannot leave the counters half-written,
    // since every update replaces a `Copy` value.
    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
