use std::sync::Arc;

use clap::{Parser, ValueEnum};

use tokio::io::{AsyncBufReadExt, BufReader};

use tokio_util::sync::CancellationToken;

use tracing::{Level, error, info};

use twinsync::desired::LayoutKind;
use twinsync::settings::LoopDelay;

use twinsync_os::config::Config;
use twinsync_os::mqtt::{DEFAULT_PORT, MqttConfig, MqttTransport};
use twinsync_os::node::{Node, NodeHandle};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Layout {
    /// A single desired map.
    Map,
    /// A desired path for each counter.
    Split,
}

impl From<Layout> for LayoutKind {
    fn from(layout: Layout) -> Self {
        match layout {
            Layout::Map => Self::Map,
            Layout::Split => Self::Split,
        }
    }
}

#[derive(Parser)]
#[command(
    version,
    about,
    long_about = "A node which keeps two counters synchronized with an `MQTT` broker."
)]
struct Cli {
    /// Client identifier.
    #[arg(long, default_value = "twinsync-node")]
    id: String,

    /// Broker host.
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Broker port.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Topic prefix. Defaults to the client identifier.
    #[arg(long)]
    prefix: Option<String>,

    /// Desired document layout.
    #[arg(long, value_enum, default_value_t = Layout::Map)]
    layout: Layout,

    /// Main loop delay, in seconds.
    #[arg(long, default_value_t = LoopDelay::DEFAULT.as_secs())]
    loop_delay: u32,

    /// Log debug messages.
    #[arg(short, long)]
    verbose: bool,
}

// Every line on the standard input acts as a button press.
async fn button(handle: NodeHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(_)) = lines.next_line().await {
        info!("Button pressed");
        handle.wake();
    }
}

async fn shutdown(token: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Unable to listen for the shutdown signal: {e}");
        return;
    }
    info!("Shutting down");
    token.cancel();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .init();

    let loop_delay = match LoopDelay::from_secs(i64::from(cli.loop_delay)) {
        Ok(loop_delay) => loop_delay,
        Err(e) => {
            error!("Invalid loop delay {}s: {e}", cli.loop_delay);
            return;
        }
    };

    let mut mqtt_config = MqttConfig::new(cli.id).host(cli.host).port(cli.port);
    if let Some(prefix) = cli.prefix {
        mqtt_config = mqtt_config.topic_prefix(prefix);
    }

    let token = CancellationToken::new();
    let (transport, mqtt_task) = MqttTransport::start(&mqtt_config, token.clone());

    let config = Config::new()
        .layout(cli.layout.into())
        .loop_delay(loop_delay);
    let node = Node::new(&config, Arc::new(transport));

    let button_task = tokio::spawn(button(node.handle()));
    let signal_task = tokio::spawn(shutdown(token.clone()));

    if let Err(e) = node.run(token.clone()).await {
        error!("Node failed: {e}");
        token.cancel();
    }

    signal_task.abort();
    button_task.abort();
    if let Err(e) = mqtt_task.await {
        error!("Broker connection task failed: {e}");
    }
}
