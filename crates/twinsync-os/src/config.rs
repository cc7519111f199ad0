use std::borrow::Cow;

use twinsync::counter::{Bounds, Counters};
use twinsync::desired::LayoutKind;
use twinsync::settings::LoopDelay;

/// The default path of the actual state document.
pub const ACTUAL_PATH: &str = "state";

/// The default path of the settings document.
pub const SETTINGS_PATH: &str = "settings";

/// The configuration of a node.
///
/// ```
/// use twinsync::desired::LayoutKind;
/// use twinsync::settings::LoopDelay;
/// use twinsync_os::config::Config;
///
/// let config = Config::new()
///     .layout(LayoutKind::Split)
///     .loop_delay(LoopDelay::MIN)
///     .actual_path("device/state");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub(crate) bounds: Bounds,
    pub(crate) counters: Option<Counters>,
    pub(crate) layout: LayoutKind,
    pub(crate) actual_path: Cow<'static, str>,
    pub(crate) settings_path: Cow<'static, str>,
    pub(crate) loop_delay: LoopDelay,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Creates a [`Config`] with the default bounds, the map layout and a
    /// one minute loop delay.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bounds: Bounds::DEFAULT,
            counters: None,
            layout: LayoutKind::Map,
            actual_path: Cow::Borrowed(ACTUAL_PATH),
            settings_path: Cow::Borrowed(SETTINGS_PATH),
            loop_delay: LoopDelay::DEFAULT,
        }
    }

    /// Sets the counter [`Bounds`].
    #[must_use]
    pub const fn bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = bounds;
        self
    }

    /// Sets the startup [`Counters`].
    ///
    /// Values outside the bounds are replaced by the default startup values.
    #[must_use]
    pub const fn counters(mut self, counters: Counters) -> Self {
        self.counters = Some(counters);
        self
    }

    /// Sets the desired document layout.
    #[must_use]
    pub const fn layout(mut self, layout: LayoutKind) -> Self {
        self.layout = layout;
        self
    }

    /// Sets the startup [`LoopDelay`].
    #[must_use]
    pub const fn loop_delay(mut self, loop_delay: LoopDelay) -> Self {
        self.loop_delay = loop_delay;
        self
    }

    /// Sets the actual state path.
    #[must_use]
    pub fn actual_path(mut self, path: impl Into<Cow<'static, str>>) -> Self {
        self.actual_path = path.into();
        self
    }

    /// Sets the settings path.
    #[must_use]
    pub fn settings_path(mut self, path: impl Into<Cow<'static, str>>) -> Self {
        self.settings_path = path.into();
        self
    }
}
