mod core;
mod output;

use std::sync::Arc;

use signage_proto::config::Config;
use signage_proto::protocol::Event;
use signage_proto::state::StateManager;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Forwards WARN and ERROR records to the event channel as `log` events.
struct EventLogLayer {
    sender: broadcast::Sender<Event>,
}

impl<S> tracing_subscriber::Layer<S> for EventLogLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // No receivers is fine.
        let _ = self.sender.send(Event::Log { message });
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (event_tx, event_rx) = broadcast::channel::<Event>(256);

    let data_dir = signage_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(EventLogLayer {
            sender: event_tx.clone(),
        })
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,signage_daemon=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());
    info!("Manifest: {}", config.manifest.url);

    let state = Arc::new(Mutex::new(StateManager::new(config.daemon.state_file.clone())));
    let shutdown = CancellationToken::new();

    let writer = output::spawn_writer(event_rx, state.clone(), shutdown.clone());

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            ctrl_c.cancel();
        }
    });

    let daemon_core = core::DaemonCore::new(config, state, event_tx)?;
    let result = daemon_core.run(shutdown.clone()).await;

    shutdown.cancel();
    let _ = writer.await;
    result
}
