use std::future::Future;

use tokio::sync::watch;

use crate::error::Result;

/// Content types of the documents sent over a [`Transport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentType {
    /// A JSON document.
    #[default]
    Json,
}

impl ContentType {
    /// Returns the `MIME` type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "application/json",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.as_str().fmt(f)
    }
}

/// A payload received on an observed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observed {
    /// The logical path the payload arrived on.
    pub path: String,
    /// The raw payload.
    pub payload: Vec<u8>,
}

impl Observed {
    /// Creates an [`Observed`] payload.
    #[must_use]
    pub fn new(path: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            payload: payload.into(),
        }
    }
}

/// The link between a device and the cloud state service.
///
/// A transport is addressed through logical paths, such as `state` or
/// `desired`, and is responsible for mapping them onto its own protocol.
pub trait Transport: Send + Sync + 'static {
    /// Sends a payload to a logical path.
    ///
    /// The returned future completes when the transport has either accepted
    /// or rejected the payload. It must never wait indefinitely.
    ///
    /// # Errors
    ///
    /// An error is returned when the payload cannot be delivered.
    fn send(
        &self,
        path: &str,
        content_type: ContentType,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Observes a logical path.
    ///
    /// Every payload received on the path, including the current one when
    /// the observation starts, is forwarded to `sender`.
    ///
    /// # Errors
    ///
    /// An error is returned when the observation cannot be registered.
    fn observe(
        &self,
        path: &str,
        sender: flume::Sender<Observed>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Checks whether the transport is connected.
    fn is_connected(&self) -> bool;

    /// Returns a receiver of the connection status.
    ///
    /// The receiver is notified whenever the transport connects or
    /// disconnects, so that work skipped while offline can be resumed.
    fn connection(&self) -> watch::Receiver<bool>;
}
