use std::borrow::Cow;
use std::sync::Arc;

use twinsync::counter::Counters;
use twinsync::desired::Document;

use tracing::{debug, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::transport::{ContentType, Transport};

// Hands a document over to the transport and logs its completion.
//
// A failed delivery is reported to the caller and never retried: the next
// tick or desired update publishes a fresh document anyway.
async fn deliver<T: Transport>(transport: &T, path: &str, payload: Vec<u8>) -> Result<()> {
    if !transport.is_connected() {
        debug!("Transport not connected, skip `{path}` publish");
        return Err(Error::new(
            ErrorKind::NotConnected,
            format!("`{path}` publish skipped"),
        ));
    }

    match transport.send(path, ContentType::Json, payload).await {
        Ok(()) => {
            debug!("`{path}` successfully set");
            Ok(())
        }
        Err(e) => {
            warn!("Failed to set `{path}`: {e}");
            Err(e)
        }
    }
}

/// Publishes the actual state of the counters.
#[derive(Debug)]
pub struct ActualStatePublisher<T: Transport> {
    transport: Arc<T>,
    path: Cow<'static, str>,
}

impl<T: Transport> ActualStatePublisher<T> {
    /// Creates an [`ActualStatePublisher`] which writes to the given path.
    #[must_use]
    pub fn new(transport: Arc<T>, path: impl Into<Cow<'static, str>>) -> Self {
        Self {
            transport,
            path: path.into(),
        }
    }

    /// Returns the actual state path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Publishes a [`Counters`] snapshot.
    ///
    /// # Errors
    ///
    /// An error is returned when the snapshot cannot be encoded, the
    /// transport is not connected, or the transport fails to send it.
    pub async fn publish(&self, counters: Counters) -> Result<()> {
        let payload = serde_json::to_vec(&counters)?;
        deliver(self.transport.as_ref(), &self.path, payload).await
    }
}

/// Publishes the sentinel documents that reset the desired paths.
#[derive(Debug)]
pub struct DesiredResetPublisher<T: Transport> {
    transport: Arc<T>,
}

impl<T: Transport> DesiredResetPublisher<T> {
    /// Creates a [`DesiredResetPublisher`].
    #[must_use]
    pub const fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    /// Publishes a reset [`Document`].
    ///
    /// # Errors
    ///
    /// An error is returned when the transport is not connected or fails to
    /// send the document.
    pub async fn publish(&self, document: Document) -> Result<()> {
        debug!("Resetting `{}` to defaults", document.path);
        deliver(self.transport.as_ref(), &document.path, document.payload).await
    }
}
