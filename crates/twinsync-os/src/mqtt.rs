use std::borrow::Cow;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rumqttc::v5::{
    AsyncClient, Event, EventLoop, MqttOptions,
    mqttbytes::QoS,
    mqttbytes::v5::{ConnAck, ConnectReturnCode, Packet, PublishProperties},
};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use tokio_util::sync::CancellationToken;

use tracing::{debug, error, info, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::transport::{ContentType, Observed, Transport};

// The capacity of the bounded asynchronous channel.
const ASYNC_CHANNEL_CAPACITY: usize = 10;

// Keep alive time to send `pingreq` to broker when the connection is idle.
const KEEP_ALIVE_TIME: Duration = Duration::from_secs(5);

// Time to wait before polling the broker again after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

// Time granted to the client to accept a publish request.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// The default broker port.
pub const DEFAULT_PORT: u16 = 1883;

/// The configuration of an [`MqttTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttConfig {
    client_id: Cow<'static, str>,
    host: Cow<'static, str>,
    port: u16,
    topic_prefix: Option<Cow<'static, str>>,
    keep_alive: Duration,
}

impl MqttConfig {
    /// Creates an [`MqttConfig`] for the given client identifier.
    ///
    /// The broker is expected on `localhost` at the default port, and the
    /// logical paths are mapped under the client identifier.
    #[must_use]
    pub fn new(client_id: impl Into<Cow<'static, str>>) -> Self {
        Self {
            client_id: client_id.into(),
            host: Cow::Borrowed("localhost"),
            port: DEFAULT_PORT,
            topic_prefix: None,
            keep_alive: KEEP_ALIVE_TIME,
        }
    }

    /// Sets the broker host.
    #[must_use]
    pub fn host(mut self, host: impl Into<Cow<'static, str>>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the broker port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the prefix prepended to every logical path.
    #[must_use]
    pub fn topic_prefix(mut self, prefix: impl Into<Cow<'static, str>>) -> Self {
        self.topic_prefix = Some(prefix.into());
        self
    }

    /// Sets the keep alive interval.
    #[must_use]
    pub const fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    fn prefix(&self) -> &str {
        self.topic_prefix.as_deref().unwrap_or(&self.client_id)
    }
}

#[derive(Debug)]
struct Observer {
    topic: String,
    path: String,
    sender: flume::Sender<Observed>,
}

type Observers = Arc<Mutex<Vec<Observer>>>;

fn lock(observers: &Observers) -> std::sync::MutexGuard<'_, Vec<Observer>> {
    observers.lock().unwrap_or_else(PoisonError::into_inner)
}

fn topics(observers: &Observers) -> Vec<String> {
    let mut topics = lock(observers)
        .iter()
        .map(|observer| observer.topic.clone())
        .collect::<Vec<_>>();
    topics.sort_unstable();
    topics.dedup();
    topics
}

fn route(observers: &Observers, topic: &str) -> Vec<(String, flume::Sender<Observed>)> {
    lock(observers)
        .iter()
        .filter(|observer| observer.topic == topic)
        .map(|observer| (observer.path.clone(), observer.sender.clone()))
        .collect()
}

async fn forward(observers: &Observers, topic: &[u8], payload: &[u8]) {
    let Ok(topic) = std::str::from_utf8(topic) else {
        warn!("Topic is not valid UTF-8, discard the packet");
        return;
    };

    let routes = route(observers, topic);
    if routes.is_empty() {
        debug!("No observer for topic `{topic}`");
    }

    for (path, sender) in routes {
        if let Err(e) = sender.send_async(Observed::new(path, payload)).await {
            warn!("Stop forwarding `{topic}` payloads: {e}");
        }
    }
}

fn connection_accepted(connack: &ConnAck) -> bool {
    matches!(connack.code, ConnectReturnCode::Success)
}

async fn run_event_loop(
    client: AsyncClient,
    mut eventloop: EventLoop,
    connected: Arc<watch::Sender<bool>>,
    observers: Observers,
    cancellation_token: CancellationToken,
) {
    loop {
        tokio::select! {
            // Use the cancellation token to stop the loop
            () = cancellation_token.cancelled() => { break; }
            // Poll the `MQTT` event coming from the network
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                        if !connection_accepted(&connack) {
                            error!("Connection refused by the broker: {:?}", connack.code);
                            continue;
                        }

                        info!("Connected to the broker");
                        let _ = connected.send_replace(true);

                        // Subscriptions do not survive a reconnection.
                        for topic in topics(&observers) {
                            if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                                error!("Impossible to subscribe to topic {topic}: {e}");
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        forward(&observers, &publish.topic, &publish.payload).await;
                    }
                    Ok(Event::Incoming(Packet::Disconnect(_))) => {
                        warn!("Disconnected by the broker");
                        let _ = connected.send_replace(false);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if connected.send_replace(false) {
                            warn!("Connection to the broker lost: {e}");
                        } else {
                            debug!("Unable to reach the broker: {e}");
                        }
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        }
    }
    drop(eventloop);
    drop(client);
}

/// A [`Transport`] over an `MQTT` v5 broker.
///
/// Each logical path is mapped onto the `<prefix>/<path>` topic. Documents
/// are published as retained messages, so that a new observer receives the
/// current document right away.
#[derive(Debug)]
pub struct MqttTransport {
    client: AsyncClient,
    prefix: String,
    connected: Arc<watch::Sender<bool>>,
    observers: Observers,
}

impl MqttTransport {
    /// Starts an [`MqttTransport`].
    ///
    /// The broker connection is driven by the returned task until the
    /// token is cancelled. The connection is retried whenever it is lost.
    #[must_use]
    pub fn start(config: &MqttConfig, cancellation_token: CancellationToken) -> (Self, JoinHandle<()>) {
        let mut mqttoptions =
            MqttOptions::new(config.client_id.as_ref(), config.host.as_ref(), config.port);
        let _ = mqttoptions.set_keep_alive(config.keep_alive);

        let (client, eventloop) = AsyncClient::new(mqttoptions, ASYNC_CHANNEL_CAPACITY);

        let transport = Self {
            client: client.clone(),
            prefix: config.prefix().trim_end_matches('/').into(),
            connected: Arc::new(watch::Sender::new(false)),
            observers: Arc::new(Mutex::new(Vec::new())),
        };

        let task = tokio::spawn(run_event_loop(
            client,
            eventloop,
            Arc::clone(&transport.connected),
            Arc::clone(&transport.observers),
            cancellation_token,
        ));

        (transport, task)
    }

    /// Returns the topic of a logical path.
    #[must_use]
    pub fn topic(&self, path: &str) -> String {
        format!("{}/{path}", self.prefix)
    }
}

impl Transport for MqttTransport {
    async fn send(&self, path: &str, content_type: ContentType, payload: Vec<u8>) -> Result<()> {
        let properties = PublishProperties {
            content_type: Some(content_type.as_str().into()),
            ..PublishProperties::default()
        };

        let publish = self.client.publish_with_properties(
            self.topic(path),
            QoS::AtLeastOnce,
            true,
            payload,
            properties,
        );

        tokio::time::timeout(SEND_TIMEOUT, publish)
            .await
            .map_err(|_| Error::new(ErrorKind::Transport, format!("`{path}` publish timed out")))??;

        Ok(())
    }

    async fn observe(&self, path: &str, sender: flume::Sender<Observed>) -> Result<()> {
        let topic = self.topic(path);

        lock(&self.observers).push(Observer {
            topic: topic.clone(),
            path: path.into(),
            sender,
        });

        // Otherwise the subscription is sent on connection.
        if self.is_connected() {
            self.client
                .subscribe(topic.as_str(), QoS::AtLeastOnce)
                .await
                .map_err(|e| {
                    Error::new(
                        ErrorKind::Observe,
                        format!("Impossible to subscribe to topic {topic}: {e}"),
                    )
                })?;
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    fn connection(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }
}
