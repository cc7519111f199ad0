use alloc::string::String;
use alloc::vec::Vec;

use core::time::Duration;

use serde_json::Value;

use log::debug;

use crate::desired::DecodeError;

/// The remote setting key which controls the main loop delay.
pub const LOOP_DELAY_KEY: &str = "LOOP_DELAY_S";

/// The outcome of applying a remote setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingStatus {
    /// The setting has been accepted.
    Success,
    /// The setting key is not known to the device.
    KeyNotRecognized,
    /// The setting value has the wrong type.
    FormatNotValid,
    /// The setting value lies outside the allowed range.
    OutsideRange,
}

impl core::fmt::Display for SettingStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Success => "success",
            Self::KeyNotRecognized => "key not recognized",
            Self::FormatNotValid => "format not valid",
            Self::OutsideRange => "outside range",
        }
        .fmt(f)
    }
}

/// The delay, in seconds, between two main loop iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LoopDelay(u32);

impl Default for LoopDelay {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl LoopDelay {
    /// Shortest delay: one second.
    pub const MIN: Self = Self(1);
    /// Longest delay: twelve hours.
    pub const MAX: Self = Self(43_200);
    /// Startup delay: one minute.
    pub const DEFAULT: Self = Self(60);

    /// Creates a [`LoopDelay`] from a number of seconds.
    ///
    /// # Errors
    ///
    /// [`SettingStatus::OutsideRange`] is returned when the value lies
    /// outside `[1, 43200]`.
    pub fn from_secs(secs: i64) -> Result<Self, SettingStatus> {
        if secs < i64::from(Self::MIN.0) || secs > i64::from(Self::MAX.0) {
            return Err(SettingStatus::OutsideRange);
        }

        u32::try_from(secs)
            .map(Self)
            .map_err(|_| SettingStatus::OutsideRange)
    }

    /// Returns the delay in seconds.
    #[must_use]
    pub const fn as_secs(self) -> u32 {
        self.0
    }

    /// Returns the delay as a [`Duration`].
    #[must_use]
    pub const fn as_duration(self) -> Duration {
        Duration::from_secs(self.0 as u64)
    }
}

/// A decoded settings document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SettingsUpdate {
    /// The accepted loop delay, if present and valid.
    pub loop_delay: Option<LoopDelay>,
    /// The status of each received key.
    pub statuses: Vec<(String, SettingStatus)>,
}

fn loop_delay(value: &Value) -> Result<LoopDelay, SettingStatus> {
    let secs = value.as_i64().ok_or(SettingStatus::FormatNotValid)?;
    LoopDelay::from_secs(secs)
}

/// Decodes a settings document.
///
/// A settings document is a map from setting keys to values. Each key is
/// validated on its own, so an invalid key does not discard the others.
///
/// # Errors
///
/// An error is returned when the payload is not a valid map.
pub fn decode_settings(payload: &[u8]) -> Result<SettingsUpdate, DecodeError> {
    let map = match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(map)) => map,
        Ok(Value::Null) => return Err(DecodeError::Null),
        Ok(_) => return Err(DecodeError::NotAnObject),
        Err(e) => {
            debug!("Unable to parse the settings payload: {e}");
            return Err(DecodeError::Malformed);
        }
    };

    let mut update = SettingsUpdate::default();
    for (key, value) in map {
        let status = if key == LOOP_DELAY_KEY {
            match loop_delay(&value) {
                Ok(delay) => {
                    update.loop_delay = Some(delay);
                    SettingStatus::Success
                }
                Err(status) => status,
            }
        } else {
            SettingStatus::KeyNotRecognized
        };

        debug!("Setting `{key}`: {status}");
        update.statuses.push((key, status));
    }

    Ok(update)
}

#[cfg(test)]
mod tests {
    use alloc::string::String;

    use core::time::Duration;

    use crate::desired::DecodeError;

    use super::{LOOP_DELAY_KEY, LoopDelay, SettingStatus, decode_settings};

    #[test]
    fn loop_delay_range() {
        assert_eq!(LoopDelay::from_secs(0), Err(SettingStatus::OutsideRange));
        assert_eq!(LoopDelay::from_secs(1), Ok(LoopDelay::MIN));
        assert_eq!(LoopDelay::from_secs(43_200), Ok(LoopDelay::MAX));
        assert_eq!(
            LoopDelay::from_secs(43_201),
            Err(SettingStatus::OutsideRange)
        );
        assert_eq!(LoopDelay::from_secs(-5), Err(SettingStatus::OutsideRange));
        assert_eq!(LoopDelay::DEFAULT.as_duration(), Duration::from_secs(60));
    }

    #[test]
    fn settings_document() {
        let update = decode_settings(br#"{"LOOP_DELAY_S":30,"RED_INTENSITY_PCT":50}"#).unwrap();

        assert_eq!(update.loop_delay, Some(LoopDelay::from_secs(30).unwrap()));
        assert!(
            update
                .statuses
                .contains(&(String::from(LOOP_DELAY_KEY), SettingStatus::Success))
        );
        assert!(update.statuses.contains(&(
            String::from("RED_INTENSITY_PCT"),
            SettingStatus::KeyNotRecognized
        )));
    }

    #[test]
    fn invalid_loop_delay() {
        let update = decode_settings(br#"{"LOOP_DELAY_S":"soon"}"#).unwrap();
        assert_eq!(update.loop_delay, None);
        assert_eq!(
            update.statuses,
            [(String::from(LOOP_DELAY_KEY), SettingStatus::FormatNotValid)]
        );

        let update = decode_settings(br#"{"LOOP_DELAY_S":86400}"#).unwrap();
        assert_eq!(update.loop_delay, None);
        assert_eq!(
            update.statuses,
            [(String::from(LOOP_DELAY_KEY), SettingStatus::OutsideRange)]
        );
    }

    #[test]
    fn malformed_settings() {
        assert_eq!(decode_settings(b"null"), Err(DecodeError::Null));
        assert_eq!(decode_settings(b"42"), Err(DecodeError::NotAnObject));
        assert_eq!(decode_settings(b"{"), Err(DecodeError::Malformed));
    }
}
