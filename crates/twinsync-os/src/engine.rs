use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use twinsync::counter::Counters;
use twinsync::desired::{DecodeError, DesiredLayout};

use tokio_util::sync::CancellationToken;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{ErrorKind, Result};
use crate::publisher::{ActualStatePublisher, DesiredResetPublisher};
use crate::store::CounterStore;
use crate::transport::{Observed, Transport};

/// The outcome of a publish requested by the [`Engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishStatus {
    /// No publish was needed.
    #[default]
    NotNeeded,
    /// The document has been accepted by the transport.
    Published,
    /// The publish failed, and it will not be retried.
    Failed(ErrorKind),
}

impl PublishStatus {
    /// Checks whether the document has been published.
    #[must_use]
    pub const fn is_published(self) -> bool {
        matches!(self, Self::Published)
    }
}

impl From<Result<()>> for PublishStatus {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => Self::Published,
            Err(e) => Self::Failed(e.kind()),
        }
    }
}

impl std::fmt::Display for PublishStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotNeeded => "not needed".fmt(f),
            Self::Published => "published".fmt(f),
            Self::Failed(kind) => write!(f, "failed ({kind})"),
        }
    }
}

/// The outcome of the reconciliation of a desired payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReconciliationResult {
    /// Number of fields carrying a request, the sentinel excluded.
    pub processed: usize,
    /// Number of counters whose value has changed.
    pub changed: usize,
    /// The actual state publish.
    pub actual: PublishStatus,
    /// The desired reset publish.
    pub reset: PublishStatus,
    /// The reason the payload could not be decoded, if any.
    pub decode_error: Option<DecodeError>,
}

impl std::fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(error) = &self.decode_error {
            write!(f, "{error}, ")?;
        }
        write!(
            f,
            "processed {}, changed {}, actual {}, reset {}",
            self.processed, self.changed, self.actual, self.reset
        )
    }
}

/// The reconciliation engine.
///
/// It applies desired updates to the local counters, publishes the actual
/// state whenever a counter changes, and resets the desired document once
/// it has been processed.
pub struct Engine<T: Transport> {
    store: CounterStore,
    layout: Box<dyn DesiredLayout + Send + Sync>,
    actual: ActualStatePublisher<T>,
    reset: DesiredResetPublisher<T>,
    transport: Arc<T>,
    initial_update_pending: AtomicBool,
}

impl<T: Transport> Engine<T> {
    /// Creates an [`Engine`] from a [`Config`] and a [`Transport`].
    #[must_use]
    pub fn new(config: &Config, transport: Arc<T>) -> Self {
        let store = match config.counters {
            Some(counters) => CounterStore::with_counters(counters, config.bounds),
            None => CounterStore::new(config.bounds),
        };

        Self {
            store,
            layout: config.layout.into_layout(),
            actual: ActualStatePublisher::new(Arc::clone(&transport), config.actual_path.clone()),
            reset: DesiredResetPublisher::new(Arc::clone(&transport)),
            transport,
            initial_update_pending: AtomicBool::new(true),
        }
    }

    /// Returns the [`CounterStore`].
    #[must_use]
    pub const fn store(&self) -> &CounterStore {
        &self.store
    }

    /// Returns the [`Transport`].
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Checks whether the actual state has never been published.
    #[must_use]
    pub fn is_initial_update_pending(&self) -> bool {
        self.initial_update_pending.load(Ordering::SeqCst)
    }

    /// Advances both counters by one step and publishes the actual state.
    pub async fn increment_local(&self) -> PublishStatus {
        let counters = self.store.increment_local();
        debug!("Local step: {counters}");
        self.publish_actual(counters).await
    }

    /// Starts observing the desired paths.
    ///
    /// The returned receiver yields every desired payload and is meant to
    /// be driven by [`Engine::run`]. If the actual state has never been
    /// published, it is published now.
    ///
    /// # Errors
    ///
    /// An error is returned when a desired path cannot be observed.
    pub async fn start_observing(&self) -> Result<flume::Receiver<Observed>> {
        let (sender, receiver) = flume::unbounded();

        for path in self.layout.paths() {
            self.transport.observe(path, sender.clone()).await?;
            info!("Observing desired path `{path}`");
        }

        self.publish_initial_update().await;

        Ok(receiver)
    }

    /// Reconciles a payload received on a desired path.
    pub async fn on_desired_payload(&self, path: &str, payload: &[u8]) -> ReconciliationResult {
        let update = match self.layout.decode(path, payload) {
            Ok(update) => update,
            Err(e) if !e.requires_reset() => {
                warn!("Dropping desired payload on `{path}`: {e}");
                return ReconciliationResult {
                    decode_error: Some(e),
                    ..ReconciliationResult::default()
                };
            }
            Err(e) => {
                warn!("Failed to decode desired payload on `{path}`: {e}");
                return ReconciliationResult {
                    reset: self.reset_desired(path).await,
                    decode_error: Some(e),
                    ..ReconciliationResult::default()
                };
            }
        };

        let mut result = ReconciliationResult::default();
        for (field, value) in update.iter() {
            let outcome = self.store.apply_desired(field, value);
            if outcome.is_processed() {
                result.processed += 1;
            }
            if outcome.is_changed() {
                result.changed += 1;
            }
        }

        if result.changed > 0 {
            result.actual = self.publish_actual(self.store.get()).await;
        }

        if result.processed > 0 {
            result.reset = self.reset_desired(path).await;
        }

        result
    }

    /// Reconciles every observed payload until the token is cancelled or
    /// the observation ends.
    ///
    /// Every time the transport connects, the actual state is published if
    /// it has never been.
    pub async fn run(&self, receiver: flume::Receiver<Observed>, token: CancellationToken) {
        let mut connection = self.transport.connection();
        let mut connection_open = true;

        // The transport may have connected since the observation started.
        if *connection.borrow_and_update() {
            self.publish_initial_update().await;
        }

        loop {
            tokio::select! {
                // Use the cancellation token to stop the loop
                () = token.cancelled() => { break; }
                observed = receiver.recv_async() => {
                    let Ok(Observed { path, payload }) = observed else {
                        warn!("Desired observation ended");
                        break;
                    };

                    let result = self.on_desired_payload(&path, &payload).await;
                    info!("Desired update on `{path}`: {result}");
                }
                changed = connection.changed(), if connection_open => {
                    if changed.is_err() {
                        debug!("Connection status no longer available");
                        connection_open = false;
                    } else if *connection.borrow_and_update() {
                        self.publish_initial_update().await;
                    }
                }
            }
        }
    }

    async fn publish_initial_update(&self) {
        if self.is_initial_update_pending() {
            let status = self.publish_actual(self.store.get()).await;
            debug!("Initial actual state: {status}");
        }
    }

    async fn publish_actual(&self, counters: Counters) -> PublishStatus {
        let result = self.actual.publish(counters).await;

        if result.is_ok() && self.initial_update_pending.swap(false, Ordering::SeqCst) {
            info!("Initial actual state published: {counters}");
        }

        result.into()
    }

    async fn reset_desired(&self, path: &str) -> PublishStatus {
        match self.layout.reset(path) {
            Some(document) => self.reset.publish(document).await.into(),
            None => PublishStatus::NotNeeded,
        }
    }
}
