mod service;

pub mod sensor;

pub use sensor::CumulativeSensor;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use service::MeterStateService;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    derive_more::Display,
    derive_more::From,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct MeterId(pub i64);

//one refresh cycle's complete result, absent values are failed fetches
pub type UsageSnapshot = HashMap<MeterId, Option<f64>>;

#[derive(Debug, Clone)]
pub enum MeterStateEvent {
    SnapshotUpdated(UsageSnapshot),
    RefreshFailed(String),
}

#[derive(Debug, Clone)]
pub enum MeterStateIncomingEvent {
    SnapshotReplaced(UsageSnapshot),
    RefreshFailed(String),
}

pub struct MeterStateRunner {
    service: Arc<MeterStateService>,
    incoming_tx: mpsc::Sender<MeterStateIncomingEvent>,
    incoming_rx: mpsc::Receiver<MeterStateIncomingEvent>,
}

impl MeterStateRunner {
    pub fn new() -> Self {
        let (incoming_tx, incoming_rx) = mpsc::channel(16);
        let (event_tx, _event_rx) = broadcast::channel(16);

        let service = MeterStateService::new(event_tx);

        MeterStateRunner {
            service: Arc::new(service),
            incoming_tx,
            incoming_rx,
        }
    }

    pub fn client(&self) -> MeterStateClient {
        MeterStateClient {
            service: self.service.clone(),
        }
    }

    pub fn incoming_event_sender(&self) -> mpsc::Sender<MeterStateIncomingEvent> {
        self.incoming_tx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MeterStateEvent> {
        self.service.subscribe()
    }

    pub async fn run(mut self) {
        while let Some(event) = self.incoming_rx.recv().await {
            match event {
                MeterStateIncomingEvent::SnapshotReplaced(snapshot) => {
                    self.service.handle_snapshot_replaced(snapshot).await;
                }
                MeterStateIncomingEvent::RefreshFailed(reason) => {
                    self.service.handle_refresh_failed(reason).await;
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct MeterStateClient {
    service: Arc<MeterStateService>,
}

impl MeterStateClient {
    pub async fn reading(&self, meter_id: MeterId) -> Option<f64> {
        self.service.reading(meter_id).await
    }

    pub async fn is_healthy(&self) -> bool {
        self.service.is_healthy().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MeterStateEvent> {
        self.service.subscribe()
    }
}
