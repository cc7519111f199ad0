use serde::{Deserialize, Serialize};

/// The lowest value a counter can hold.
pub const MIN_COUNT: u32 = 0;

/// The exclusive upper bound of a counter.
pub const MAX_COUNT: u32 = 10_000;

/// The reserved value meaning "no change requested" for a desired field.
pub const SENTINEL: i64 = -1;

/// A reconciled counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterField {
    /// The counter which counts up.
    Up,
    /// The counter which counts down.
    Down,
}

impl CounterField {
    /// All counter fields, in document order.
    pub const ALL: [Self; 2] = [Self::Up, Self::Down];

    /// Returns the field name used in state documents.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Up => "counter_up",
            Self::Down => "counter_down",
        }
    }

    /// Finds the [`CounterField`] with the given document name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.name() == name)
    }
}

impl core::fmt::Display for CounterField {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.name().fmt(f)
    }
}

/// The half-open `[min, max)` range a counter value must lie in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    min: u32,
    max: u32,
}

impl Default for Bounds {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl Bounds {
    /// The `[MIN_COUNT, MAX_COUNT)` bounds.
    pub const DEFAULT: Self = Self {
        min: MIN_COUNT,
        max: MAX_COUNT,
    };

    /// Creates [`Bounds`].
    ///
    /// Returns `None` when the range is empty, that is when `min >= max`.
    #[must_use]
    pub const fn new(min: u32, max: u32) -> Option<Self> {
        if min < max {
            Some(Self { min, max })
        } else {
            None
        }
    }

    /// Returns the inclusive lower bound.
    #[must_use]
    pub const fn min(&self) -> u32 {
        self.min
    }

    /// Returns the exclusive upper bound.
    #[must_use]
    pub const fn max(&self) -> u32 {
        self.max
    }

    /// Returns the largest value a counter can hold.
    #[must_use]
    pub const fn last(&self) -> u32 {
        self.max - 1
    }

    /// Checks whether a value lies within the bounds.
    #[must_use]
    pub const fn contains(&self, value: i64) -> bool {
        value >= self.min as i64 && value < self.max as i64
    }
}

/// The outcome of applying a single desired value to a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The sentinel was received: nothing was requested.
    NoRequest,
    /// The value lies outside the counter bounds and was discarded.
    Rejected,
    /// The value matches the current one.
    Unchanged,
    /// The value has been stored.
    Changed,
}

impl ApplyOutcome {
    /// Whether the desired field has been processed.
    ///
    /// Every outcome except [`ApplyOutcome::NoRequest`] requires the desired
    /// field to be reset.
    #[must_use]
    pub const fn is_processed(self) -> bool {
        !matches!(self, Self::NoRequest)
    }

    /// Whether the counter value has changed.
    #[must_use]
    pub const fn is_changed(self) -> bool {
        matches!(self, Self::Changed)
    }
}

/// A snapshot of both counters.
///
/// It is also the actual state document published by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    /// Counter which counts up.
    #[serde(rename = "counter_up")]
    pub up: u32,
    /// Counter which counts down.
    #[serde(rename = "counter_down")]
    pub down: u32,
}

impl core::fmt::Display for Counters {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "counter_up: {}, counter_down: {}", self.up, self.down)
    }
}

impl Counters {
    /// Creates [`Counters`] with the given values.
    #[must_use]
    pub const fn new(up: u32, down: u32) -> Self {
        Self { up, down }
    }

    /// Creates the startup [`Counters`]: the up counter at the lower bound
    /// and the down counter at the upper one.
    #[must_use]
    pub const fn initial(bounds: Bounds) -> Self {
        Self {
            up: bounds.min(),
            down: bounds.last(),
        }
    }

    /// Returns the value of a counter.
    #[must_use]
    pub const fn get(&self, field: CounterField) -> u32 {
        match field {
            CounterField::Up => self.up,
            CounterField::Down => self.down,
        }
    }

    /// Advances both counters by one step.
    ///
    /// The up counter wraps to the lower bound after the last value, the down
    /// counter wraps to the last value after the lower bound.
    pub const fn step(&mut self, bounds: Bounds) {
        self.up = if self.up >= bounds.last() {
            bounds.min()
        } else {
            self.up + 1
        };

        self.down = if self.down <= bounds.min() || self.down > bounds.last() {
            bounds.last()
        } else {
            self.down - 1
        };
    }

    /// Applies a desired value to a counter.
    pub fn apply(&mut self, field: CounterField, value: i64, bounds: Bounds) -> ApplyOutcome {
        if value == SENTINEL {
            return ApplyOutcome::NoRequest;
        }

        if !bounds.contains(value) {
            return ApplyOutcome::Rejected;
        }

        // Bounds are u32, so the conversion cannot fail once contained.
        let Ok(value) = u32::try_from(value) else {
            return ApplyOutcome::Rejected;
        };

        let current = match field {
            CounterField::Up => &mut self.up,
            CounterField::Down => &mut self.down,
        };

        if *current == value {
            ApplyOutcome::Unchanged
        } else {
            *current = value;
            ApplyOutcome::Changed
        }
    }
}
