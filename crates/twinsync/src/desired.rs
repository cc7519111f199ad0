use alloc::borrow::Cow;
use alloc::boxed::Box;
use alloc::vec::Vec;

use serde_json::Value;

use log::debug;

use crate::counter::{CounterField, SENTINEL};

/// The default path of the desired document when stored as a single map.
pub const DESIRED_PATH: &str = "desired";

/// The default desired path of the up counter when each counter owns a path.
pub const DESIRED_UP_PATH: &str = "desired/counter_up";

/// The default desired path of the down counter when each counter owns a path.
pub const DESIRED_DOWN_PATH: &str = "desired/counter_down";

/// The reasons a desired payload cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The payload is not valid or is truncated.
    Malformed,
    /// The payload is an explicit `null`.
    Null,
    /// A map was expected but another kind of value was received.
    NotAnObject,
    /// A known field does not carry an integer.
    WrongType(CounterField),
    /// The payload arrived on a path the layout does not own.
    UnknownPath,
}

impl DecodeError {
    /// Whether the desired path must be reset to its defaults.
    ///
    /// Only a payload on an unknown path has no desired path to reset.
    #[must_use]
    pub const fn requires_reset(&self) -> bool {
        !matches!(self, Self::UnknownPath)
    }
}

impl core::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Malformed => "malformed or truncated payload".fmt(f),
            Self::Null => "null payload".fmt(f),
            Self::NotAnObject => "payload is not a map".fmt(f),
            Self::WrongType(field) => write!(f, "`{field}` is not an integer"),
            Self::UnknownPath => "payload on an unknown path".fmt(f),
        }
    }
}

impl core::error::Error for DecodeError {}

/// A decoded desired document.
///
/// Each counter appears at most once, and a counter may be missing. The
/// order in which the fields were received does not matter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DesiredUpdate([Option<i64>; 2]);

const fn slot(field: CounterField) -> usize {
    match field {
        CounterField::Up => 0,
        CounterField::Down => 1,
    }
}

impl DesiredUpdate {
    /// Creates an empty [`DesiredUpdate`].
    #[must_use]
    pub const fn empty() -> Self {
        Self([None; 2])
    }

    /// Adds a desired value for a counter.
    ///
    /// A later value for the same counter replaces the earlier one.
    #[must_use]
    pub const fn field(mut self, field: CounterField, value: i64) -> Self {
        self.0[slot(field)] = Some(value);
        self
    }

    /// Returns the desired value of a counter, if present.
    #[must_use]
    pub const fn get(&self, field: CounterField) -> Option<i64> {
        self.0[slot(field)]
    }

    /// Returns the number of counters carried by the update.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.iter().flatten().count()
    }

    /// Checks whether the update carries no counters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }

    /// Returns an iterator over the `(field, value)` pairs, the up counter
    /// first.
    pub fn iter(&self) -> impl Iterator<Item = (CounterField, i64)> + '_ {
        CounterField::ALL
            .into_iter()
            .filter_map(|field| self.get(field).map(|value| (field, value)))
    }
}

/// A serialized document bound to a logical path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Logical path.
    pub path: Cow<'static, str>,
    /// JSON payload.
    pub payload: Vec<u8>,
}

/// How the desired document is laid out over logical paths.
///
/// The reconciliation engine only talks to this interface, so the layouts
/// are interchangeable.
pub trait DesiredLayout {
    /// Returns the desired paths to observe.
    fn paths(&self) -> Vec<&str>;

    /// Decodes a payload received on the given desired path.
    ///
    /// # Errors
    ///
    /// An error is returned when the payload is malformed, carries a value
    /// of the wrong type, or comes from a path not owned by the layout.
    fn decode(&self, path: &str, payload: &[u8]) -> Result<DesiredUpdate, DecodeError>;

    /// Builds the document which resets the given desired path to the
    /// sentinel.
    ///
    /// Returns `None` if the path is not owned by the layout.
    fn reset(&self, path: &str) -> Option<Document>;
}

/// The available desired layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayoutKind {
    /// A single map with a key for each counter.
    #[default]
    Map,
    /// A path for each counter, holding a single integer.
    Split,
}

impl LayoutKind {
    /// Builds the layout with its default paths.
    #[must_use]
    pub fn into_layout(self) -> Box<dyn DesiredLayout + Send + Sync> {
        match self {
            Self::Map => Box::new(MapLayout::default()),
            Self::Split => Box::new(SplitLayout::default()),
        }
    }
}

fn parse(payload: &[u8]) -> Result<Value, DecodeError> {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Null) => Err(DecodeError::Null),
        Ok(value) => Ok(value),
        Err(e) => {
            debug!("Unable to parse the desired payload: {e}");
            Err(DecodeError::Malformed)
        }
    }
}

// Integers which do not fit an `i64` saturate, so they stay outside every
// counter bound and get rejected instead of failing the whole document.
fn integer(value: &Value) -> Option<i64> {
    if let Some(value) = value.as_i64() {
        return Some(value);
    }

    if value.as_u64().is_some() {
        return Some(i64::MAX);
    }

    match value.as_f64()? {
        f if f >= i64::MAX as f64 => Some(i64::MAX),
        f if f <= i64::MIN as f64 => Some(i64::MIN),
        _ => None,
    }
}

fn sentinel_payload() -> Vec<u8> {
    alloc::format!("{SENTINEL}").into_bytes()
}

/// A desired document stored as a single map on one path.
///
/// ```json
/// {"counter_up": 500, "counter_down": -1}
/// ```
///
/// Keys are matched by name, so their order does not matter.
/// Unknown keys are ignored and missing keys are left out of the update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapLayout {
    path: Cow<'static, str>,
}

impl Default for MapLayout {
    fn default() -> Self {
        Self::new(DESIRED_PATH)
    }
}

impl MapLayout {
    /// Creates a [`MapLayout`] on the given path.
    #[must_use]
    pub fn new(path: impl Into<Cow<'static, str>>) -> Self {
        Self { path: path.into() }
    }
}

impl DesiredLayout for MapLayout {
    fn paths(&self) -> Vec<&str> {
        alloc::vec![self.path.as_ref()]
    }

    fn decode(&self, path: &str, payload: &[u8]) -> Result<DesiredUpdate, DecodeError> {
        if path != self.path {
            return Err(DecodeError::UnknownPath);
        }

        let Value::Object(map) = parse(payload)? else {
            return Err(DecodeError::NotAnObject);
        };

        let mut update = DesiredUpdate::empty();
        for (key, value) in &map {
            let Some(field) = CounterField::from_name(key) else {
                debug!("Ignoring unknown desired key `{key}`");
                continue;
            };

            let value = integer(value).ok_or(DecodeError::WrongType(field))?;
            update = update.field(field, value);
        }

        Ok(update)
    }

    fn reset(&self, path: &str) -> Option<Document> {
        if path != self.path {
            return None;
        }

        let payload = alloc::format!(
            "{{\"{}\":{SENTINEL},\"{}\":{SENTINEL}}}",
            CounterField::Up.name(),
            CounterField::Down.name()
        );

        Some(Document {
            path: self.path.clone(),
            payload: payload.into_bytes(),
        })
    }
}

/// A desired document split over a path for each counter.
///
/// Each path holds a single integer, so the counter is identified by the
/// path the payload arrives on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitLayout {
    up_path: Cow<'static, str>,
    down_path: Cow<'static, str>,
}

impl Default for SplitLayout {
    fn default() -> Self {
        Self::new(DESIRED_UP_PATH, DESIRED_DOWN_PATH)
    }
}

impl SplitLayout {
    /// Creates a [`SplitLayout`] on the given paths.
    #[must_use]
    pub fn new(
        up_path: impl Into<Cow<'static, str>>,
        down_path: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            up_path: up_path.into(),
            down_path: down_path.into(),
        }
    }

    fn field(&self, path: &str) -> Option<(CounterField, &Cow<'static, str>)> {
        if path == self.up_path {
            Some((CounterField::Up, &self.up_path))
        } else if path == self.down_path {
            Some((CounterField::Down, &self.down_path))
        } else {
            None
        }
    }
}

impl DesiredLayout for SplitLayout {
    fn paths(&self) -> Vec<&str> {
        alloc::vec![self.up_path.as_ref(), self.down_path.as_ref()]
    }

    fn decode(&self, path: &str, payload: &[u8]) -> Result<DesiredUpdate, DecodeError> {
        let (field, _) = self.field(path).ok_or(DecodeError::UnknownPath)?;

        let value = integer(&parse(payload)?).ok_or(DecodeError::WrongType(field))?;

        Ok(DesiredUpdate::empty().field(field, value))
    }

    fn reset(&self, path: &str) -> Option<Document> {
        self.field(path).map(|(_, path)| Document {
            path: path.clone(),
            payload: sentinel_payload(),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::counter::{Bounds, CounterField};

    use super::{
        DESIRED_DOWN_PATH, DESIRED_PATH, DESIRED_UP_PATH, DecodeError, DesiredLayout,
        DesiredUpdate, LayoutKind, MapLayout, SplitLayout,
    };

    #[test]
    fn map_decode() {
        let layout = MapLayout::default();

        assert_eq!(
            layout.decode(DESIRED_PATH, br#"{"counter_up":500,"counter_down":-1}"#),
            Ok(DesiredUpdate::empty()
                .field(CounterField::Up, 500)
                .field(CounterField::Down, -1))
        );

        // Key order and unknown keys do not matter.
        let update = layout
            .decode(
                DESIRED_PATH,
                br#"{"color":"red","counter_down":7,"counter_up":3}"#,
            )
            .unwrap();
        assert_eq!(update.len(), 2);
        assert_eq!(update.get(CounterField::Up), Some(3));
        assert_eq!(update.get(CounterField::Down), Some(7));

        // Partial presence.
        let update = layout.decode(DESIRED_PATH, br#"{"counter_up":20000}"#).unwrap();
        assert_eq!(update.get(CounterField::Up), Some(20_000));
        assert_eq!(update.get(CounterField::Down), None);

        assert!(layout.decode(DESIRED_PATH, b"{}").unwrap().is_empty());
    }

    #[test]
    fn oversized_integers_stay_out_of_bounds() {
        let layout = MapLayout::default();

        let update = layout
            .decode(
                DESIRED_PATH,
                br#"{"counter_up":18446744073709551615,"counter_down":5}"#,
            )
            .unwrap();
        assert_eq!(update.get(CounterField::Up), Some(i64::MAX));
        assert_eq!(update.get(CounterField::Down), Some(5));

        let update = layout
            .decode(DESIRED_PATH, br#"{"counter_up":1e20,"counter_down":-1e20}"#)
            .unwrap();
        assert_eq!(update.get(CounterField::Up), Some(i64::MAX));
        assert_eq!(update.get(CounterField::Down), Some(i64::MIN));

        for (_, value) in update.iter() {
            assert!(!Bounds::DEFAULT.contains(value));
        }

        assert_eq!(
            SplitLayout::default().decode(DESIRED_UP_PATH, b"99999999999999999999"),
            Ok(DesiredUpdate::empty().field(CounterField::Up, i64::MAX))
        );
    }

    #[test]
    fn update_ignores_field_order() {
        let update = DesiredUpdate::empty()
            .field(CounterField::Down, -1)
            .field(CounterField::Up, 500);

        assert_eq!(
            update,
            DesiredUpdate::empty()
                .field(CounterField::Up, 500)
                .field(CounterField::Down, -1)
        );
        assert_eq!(
            update.iter().collect::<alloc::vec::Vec<_>>(),
            [(CounterField::Up, 500), (CounterField::Down, -1)]
        );

        let update = update.field(CounterField::Down, 3);
        assert_eq!(update.len(), 2);
        assert_eq!(update.get(CounterField::Down), Some(3));
    }

    #[test]
    fn map_decode_failures() {
        let layout = MapLayout::default();

        assert_eq!(
            layout.decode(DESIRED_PATH, br#"{"counter_up":5"#),
            Err(DecodeError::Malformed)
        );
        assert_eq!(layout.decode(DESIRED_PATH, b""), Err(DecodeError::Malformed));
        assert_eq!(layout.decode(DESIRED_PATH, b"null"), Err(DecodeError::Null));
        assert_eq!(
            layout.decode(DESIRED_PATH, b"[1, 2]"),
            Err(DecodeError::NotAnObject)
        );
        assert_eq!(
            layout.decode(DESIRED_PATH, br#"{"counter_down":"five"}"#),
            Err(DecodeError::WrongType(CounterField::Down))
        );
        assert_eq!(
            layout.decode(DESIRED_PATH, br#"{"counter_up":1.5}"#),
            Err(DecodeError::WrongType(CounterField::Up))
        );
        assert_eq!(
            layout.decode(DESIRED_UP_PATH, br#"{"counter_up":1}"#),
            Err(DecodeError::UnknownPath)
        );
    }

    #[test]
    fn map_reset() {
        let layout = MapLayout::default();

        let document = layout.reset(DESIRED_PATH).unwrap();
        assert_eq!(document.path, DESIRED_PATH);
        assert_eq!(
            document.payload,
            br#"{"counter_up":-1,"counter_down":-1}"#.to_vec()
        );

        assert_eq!(layout.reset("state"), None);
    }

    #[test]
    fn split_decode() {
        let layout = SplitLayout::default();

        assert_eq!(layout.paths(), [DESIRED_UP_PATH, DESIRED_DOWN_PATH]);

        assert_eq!(
            layout.decode(DESIRED_UP_PATH, b"500"),
            Ok(DesiredUpdate::empty().field(CounterField::Up, 500))
        );
        assert_eq!(
            layout.decode(DESIRED_DOWN_PATH, b"-1"),
            Ok(DesiredUpdate::empty().field(CounterField::Down, -1))
        );
        assert_eq!(
            layout.decode(DESIRED_DOWN_PATH, b"null"),
            Err(DecodeError::Null)
        );
        assert_eq!(
            layout.decode(DESIRED_UP_PATH, br#""500""#),
            Err(DecodeError::WrongType(CounterField::Up))
        );
        assert_eq!(layout.decode(DESIRED_UP_PATH, b"5 0"), Err(DecodeError::Malformed));
        assert_eq!(
            layout.decode(DESIRED_PATH, b"500"),
            Err(DecodeError::UnknownPath)
        );
    }

    #[test]
    fn split_reset() {
        let layout = SplitLayout::default();

        let document = layout.reset(DESIRED_DOWN_PATH).unwrap();
        assert_eq!(document.path, DESIRED_DOWN_PATH);
        assert_eq!(document.payload, b"-1".to_vec());

        assert_eq!(layout.reset(DESIRED_PATH), None);
    }

    #[test]
    fn layout_kinds() {
        assert_eq!(LayoutKind::Map.into_layout().paths(), [DESIRED_PATH]);
        assert_eq!(
            LayoutKind::Split.into_layout().paths(),
            [DESIRED_UP_PATH, DESIRED_DOWN_PATH]
        );
    }

    #[test]
    fn unknown_path_is_not_reset() {
        assert!(DecodeError::Malformed.requires_reset());
        assert!(!DecodeError::UnknownPath.requires_reset());
    }
}
