/// Stdout writer: the single consumer of the event channel.
///
/// Every event becomes one JSON line. `asset_due` events are also recorded
/// in the state file so a restarted player can resume.
use std::sync::Arc;

use signage_proto::protocol::Event;
use signage_proto::state::StateManager;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub fn spawn_writer(
    mut rx: broadcast::Receiver<Event>,
    state: Arc<Mutex<StateManager>>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        loop {
            // Drain whatever is queued before honouring shutdown.
            let event = tokio::select! {
                biased;
                msg = rx.recv() => match msg {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Event writer lagged, {} events dropped", n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.cancelled() => break,
            };

            if let Event::AssetDue { cycle_id, asset, .. } = &event {
                if let Err(e) = state.lock().await.set_presented(cycle_id, &asset.id).await {
                    warn!("Could not save state: {}", e);
                }
            }

            let line = match event.encode_line() {
                Ok(line) => line,
                Err(e) => {
                    warn!("Could not encode event: {}", e);
                    continue;
                }
            };
            if stdout.write_all(line.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
                // Nobody is reading any more.
                break;
            }
        }
    })
}
