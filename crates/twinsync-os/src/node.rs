use std::borrow::Cow;
use std::sync::{Arc, Mutex, PoisonError};

use twinsync::desired::DecodeError;
use twinsync::settings::{LoopDelay, SettingStatus, SettingsUpdate, decode_settings};

use tokio::sync::Notify;

use tokio_util::sync::CancellationToken;

use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::engine::Engine;
use crate::error::Result;
use crate::transport::{Observed, Transport};

/// A handle to control a running [`Node`].
#[derive(Debug, Clone)]
pub struct NodeHandle {
    wake: Arc<Notify>,
    loop_delay: Arc<Mutex<LoopDelay>>,
}

impl NodeHandle {
    fn new(loop_delay: LoopDelay) -> Self {
        Self {
            wake: Arc::new(Notify::new()),
            loop_delay: Arc::new(Mutex::new(loop_delay)),
        }
    }

    /// Ends the current main loop sleep, as a button press does.
    ///
    /// If the main loop is not sleeping, its next sleep ends immediately.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Returns the current [`LoopDelay`].
    #[must_use]
    pub fn loop_delay(&self) -> LoopDelay {
        *self.loop_delay.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the [`LoopDelay`].
    ///
    /// A changed delay wakes the main loop, so that it takes effect right
    /// away. Returns whether the delay has changed.
    pub fn set_loop_delay(&self, delay: LoopDelay) -> bool {
        {
            let mut current = self.loop_delay.lock().unwrap_or_else(PoisonError::into_inner);
            if *current == delay {
                debug!("Loop delay already set to {}s", delay.as_secs());
                return false;
            }
            *current = delay;
        }

        info!("Loop delay set to {}s", delay.as_secs());
        self.wake();
        true
    }

    /// Applies a settings document.
    ///
    /// # Errors
    ///
    /// An error is returned when the document is not a valid map.
    pub fn apply_settings(&self, payload: &[u8]) -> std::result::Result<SettingsUpdate, DecodeError> {
        let update = decode_settings(payload)?;

        for (key, status) in &update.statuses {
            if *status == SettingStatus::Success {
                debug!("Setting `{key}` accepted");
            } else {
                warn!("Setting `{key}` rejected: {status}");
            }
        }

        if let Some(delay) = update.loop_delay {
            let _ = self.set_loop_delay(delay);
        }

        Ok(update)
    }

    async fn follow_settings(&self, receiver: flume::Receiver<Observed>, token: CancellationToken) {
        loop {
            tokio::select! {
                // Use the cancellation token to stop the loop
                () = token.cancelled() => { break; }
                observed = receiver.recv_async() => {
                    let Ok(observed) = observed else {
                        warn!("Settings observation ended");
                        break;
                    };

                    if let Err(e) = self.apply_settings(&observed.payload) {
                        warn!("Invalid settings on `{}`: {e}", observed.path);
                    }
                }
            }
        }
    }
}

/// The main context of a device.
///
/// At every iteration the counters advance by one step and the actual
/// state is published. The node then sleeps for the loop delay, unless
/// woken up earlier through its [`NodeHandle`].
pub struct Node<T: Transport> {
    engine: Arc<Engine<T>>,
    settings_path: Cow<'static, str>,
    handle: NodeHandle,
}

impl<T: Transport> Node<T> {
    /// Creates a [`Node`] from a [`Config`] and a [`Transport`].
    #[must_use]
    pub fn new(config: &Config, transport: Arc<T>) -> Self {
        Self {
            engine: Arc::new(Engine::new(config, transport)),
            settings_path: config.settings_path.clone(),
            handle: NodeHandle::new(config.loop_delay),
        }
    }

    /// Returns the reconciliation [`Engine`].
    #[must_use]
    pub const fn engine(&self) -> &Arc<Engine<T>> {
        &self.engine
    }

    /// Returns a [`NodeHandle`].
    #[must_use]
    pub fn handle(&self) -> NodeHandle {
        self.handle.clone()
    }

    /// Runs the node until the token is cancelled.
    ///
    /// The desired paths and the settings path are observed for the whole
    /// run, each on its own task.
    ///
    /// # Errors
    ///
    /// An error is returned when a path cannot be observed.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        let desired = self.engine.start_observing().await?;

        let (sender, settings) = flume::unbounded();
        self.engine
            .transport()
            .observe(&self.settings_path, sender)
            .await?;
        info!("Observing settings path `{}`", self.settings_path);

        let engine_task = tokio::spawn({
            let engine = Arc::clone(&self.engine);
            let token = token.clone();
            async move { engine.run(desired, token).await }
        });

        let settings_task = tokio::spawn({
            let handle = self.handle.clone();
            let token = token.clone();
            async move { handle.follow_settings(settings, token).await }
        });

        loop {
            let status = self.engine.increment_local().await;
            debug!("Actual state {status}");

            let delay = self.handle.loop_delay();
            tokio::select! {
                // Use the cancellation token to stop the loop
                () = token.cancelled() => { break; }
                () = self.handle.wake.notified() => {
                    debug!("Woken up");
                }
                () = tokio::time::sleep(delay.as_duration()) => {}
            }
        }

        for task in [engine_task, settings_task] {
            if let Err(e) = task.await {
                error!("Node task failed: {e}");
            }
        }
        info!("Node stopped");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use twinsync::desired::DESIRED_PATH;
    use twinsync::settings::{LoopDelay, SettingStatus};

    use tokio::time::sleep;

    use tokio_util::sync::CancellationToken;

    use crate::config::{ACTUAL_PATH, Config, SETTINGS_PATH};
    use crate::tests::{RecordingTransport, Sent, init_tracing};

    use super::{Node, NodeHandle};

    fn start(config: &Config) -> (Arc<RecordingTransport>, NodeHandle, CancellationToken) {
        init_tracing();
        let transport = Arc::new(RecordingTransport::connected());
        let node = Node::new(config, Arc::clone(&transport));
        let handle = node.handle();
        let token = CancellationToken::new();

        let _task = tokio::spawn({
            let token = token.clone();
            async move { node.run(token).await.unwrap() }
        });

        (transport, handle, token)
    }

    fn ticks(transport: &RecordingTransport) -> usize {
        transport.sent_to(ACTUAL_PATH).len()
    }

    #[test]
    fn loop_delay_changes() {
        let handle = NodeHandle::new(LoopDelay::DEFAULT);

        assert!(!handle.set_loop_delay(LoopDelay::DEFAULT));
        assert!(handle.set_loop_delay(LoopDelay::MIN));
        assert_eq!(handle.loop_delay(), LoopDelay::MIN);
    }

    #[test]
    fn settings_document() {
        let handle = NodeHandle::new(LoopDelay::DEFAULT);

        let update = handle.apply_settings(br#"{"LOOP_DELAY_S":0}"#).unwrap();
        assert_eq!(update.statuses[0].1, SettingStatus::OutsideRange);
        assert_eq!(handle.loop_delay(), LoopDelay::DEFAULT);

        let _ = handle.apply_settings(br#"{"LOOP_DELAY_S":120}"#).unwrap();
        assert_eq!(handle.loop_delay().as_secs(), 120);

        assert!(handle.apply_settings(b"[120]").is_err());
        assert_eq!(handle.loop_delay().as_secs(), 120);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_follow_loop_delay() {
        let (transport, _handle, token) = start(&Config::new());

        sleep(Duration::from_secs(1)).await;
        // The initial actual state, then the first step.
        assert_eq!(
            transport.sent_to(ACTUAL_PATH),
            [
                Sent::json(ACTUAL_PATH, r#"{"counter_up":0,"counter_down":9999}"#),
                Sent::json(ACTUAL_PATH, r#"{"counter_up":1,"counter_down":9998}"#),
            ]
        );

        sleep(Duration::from_secs(60)).await;
        assert_eq!(ticks(&transport), 3);

        token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn wake_ends_sleep() {
        let (transport, handle, token) = start(&Config::new());

        sleep(Duration::from_secs(1)).await;
        assert_eq!(ticks(&transport), 2);

        handle.wake();
        sleep(Duration::from_millis(1)).await;
        assert_eq!(ticks(&transport), 3);

        token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn loop_delay_setting() {
        let (transport, handle, token) = start(&Config::new());

        sleep(Duration::from_secs(1)).await;
        assert_eq!(ticks(&transport), 2);

        // A changed delay wakes the node up.
        transport.deliver(SETTINGS_PATH, br#"{"LOOP_DELAY_S":5}"#);
        sleep(Duration::from_millis(1)).await;
        assert_eq!(handle.loop_delay().as_secs(), 5);
        assert_eq!(ticks(&transport), 3);

        // An equal delay does not.
        transport.deliver(SETTINGS_PATH, br#"{"LOOP_DELAY_S":5}"#);
        sleep(Duration::from_millis(1)).await;
        assert_eq!(ticks(&transport), 3);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks(&transport), 4);

        token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn desired_update_while_running() {
        let (transport, _handle, token) = start(&Config::new());

        sleep(Duration::from_secs(1)).await;
        transport.deliver(DESIRED_PATH, br#"{"counter_up":500,"counter_down":-1}"#);
        sleep(Duration::from_millis(1)).await;

        assert_eq!(
            transport.sent().last(),
            Some(&Sent::json(
                DESIRED_PATH,
                r#"{"counter_up":-1,"counter_down":-1}"#
            ))
        );
        assert_eq!(
            transport.sent_to(ACTUAL_PATH).last(),
            Some(&Sent::json(
                ACTUAL_PATH,
                r#"{"counter_up":500,"counter_down":9998}"#
            ))
        );

        token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn connecting_after_start_publishes_actual_state() {
        init_tracing();
        let transport = Arc::new(RecordingTransport::disconnected());
        let node = Node::new(&Config::new(), Arc::clone(&transport));
        let engine = Arc::clone(node.engine());
        let token = CancellationToken::new();

        let _task = tokio::spawn({
            let token = token.clone();
            async move { node.run(token).await.unwrap() }
        });

        sleep(Duration::from_millis(500)).await;
        assert_eq!(ticks(&transport), 0);

        transport.set_connected(true);
        sleep(Duration::from_millis(1)).await;

        // Published well before the next step.
        assert_eq!(
            transport.sent_to(ACTUAL_PATH),
            [Sent::json(
                ACTUAL_PATH,
                r#"{"counter_up":1,"counter_down":9998}"#
            )]
        );
        assert!(!engine.is_initial_update_pending());

        token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_node() {
        init_tracing();
        let transport = Arc::new(RecordingTransport::connected());
        let node = Node::new(&Config::new(), Arc::clone(&transport));
        let token = CancellationToken::new();

        let task = tokio::spawn({
            let token = token.clone();
            async move { node.run(token).await }
        });

        sleep(Duration::from_secs(1)).await;
        token.cancel();
        task.await.unwrap().unwrap();

        sleep(Duration::from_secs(600)).await;
        assert_eq!(ticks(&transport), 2);
    }
}
