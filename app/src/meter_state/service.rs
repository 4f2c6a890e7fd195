use tokio::sync::{RwLock, broadcast};

use super::{MeterId, MeterStateEvent, UsageSnapshot};

struct State {
    snapshot: Option<UsageSnapshot>,
    healthy: bool,
}

pub struct MeterStateService {
    state: RwLock<State>,
    event_tx: broadcast::Sender<MeterStateEvent>,
}

impl MeterStateService {
    pub fn new(event_tx: broadcast::Sender<MeterStateEvent>) -> Self {
        Self {
            state: RwLock::new(State {
                snapshot: None,
                healthy: false,
            }),
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MeterStateEvent> {
        self.event_tx.subscribe()
    }

    pub async fn handle_snapshot_replaced(&self, snapshot: UsageSnapshot) {
        {
            let mut state = self.state.write().await;
            state.snapshot = Some(snapshot.clone());
            state.healthy = true;
        }

        tracing::info!("Usage snapshot replaced, {} meters", snapshot.len());

        if let Err(e) = self.event_tx.send(MeterStateEvent::SnapshotUpdated(snapshot)) {
            tracing::error!("Error sending snapshot updated event: {}", e);
        }
    }

    pub async fn handle_refresh_failed(&self, reason: String) {
        //previous snapshot stays in place, only the health flag flips
        {
            let mut state = self.state.write().await;
            state.healthy = false;
        }

        tracing::info!("Meter state marked unhealthy: {}", reason);

        if let Err(e) = self.event_tx.send(MeterStateEvent::RefreshFailed(reason)) {
            tracing::error!("Error sending refresh failed event: {}", e);
        }
    }

    pub async fn reading(&self, meter_id: MeterId) -> Option<f64> {
        let state = self.state.read().await;
        state
            .snapshot
            .as_ref()
            .and_then(|snapshot| snapshot.get(&meter_id).copied().flatten())
    }

    pub async fn is_healthy(&self) -> bool {
        self.state.read().await.healthy
    }
}
