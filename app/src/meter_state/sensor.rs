use std::collections::HashMap;

use tokio::sync::broadcast;

use super::{MeterId, MeterStateClient, MeterStateEvent};

#[derive(Clone)]
pub struct CumulativeSensor {
    client: MeterStateClient,
    meter_id: MeterId,
}

impl CumulativeSensor {
    pub const DEVICE_CLASS: &'static str = "energy";
    pub const STATE_CLASS: &'static str = "total_increasing";
    pub const UNIT_OF_MEASUREMENT: &'static str = "kWh";

    pub fn new(client: MeterStateClient, meter_id: MeterId) -> Self {
        Self { client, meter_id }
    }

    pub fn meter_id(&self) -> MeterId {
        self.meter_id
    }

    pub fn name(&self) -> String {
        format!("SEV Cumulative ({})", self.meter_id)
    }

    pub fn unique_id(&self) -> String {
        format!("sev_cumulative_{}", self.meter_id)
    }

    pub async fn value(&self) -> Option<f64> {
        self.client.reading(self.meter_id).await
    }

    pub async fn available(&self) -> bool {
        self.client.is_healthy().await && self.value().await.is_some()
    }
}

//stand-in for the host platform rendering entities: log every sensor on
//each state event, skipping values that did not change
pub async fn export_sensor_states(
    sensors: Vec<CumulativeSensor>,
    mut events: broadcast::Receiver<MeterStateEvent>,
) {
    let mut last_exported: HashMap<String, String> = HashMap::new();

    loop {
        match events.recv().await {
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("Sensor state export lagging, {} events dropped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::error!("Meter state event channel closed, stopping sensor export");
                return;
            }
        }

        for sensor in &sensors {
            let state = if sensor.available().await {
                match sensor.value().await {
                    Some(value) => format!("{} {}", value, CumulativeSensor::UNIT_OF_MEASUREMENT),
                    None => "unavailable".to_owned(),
                }
            } else {
                "unavailable".to_owned()
            };

            let unique_id = sensor.unique_id();
            if last_exported.get(&unique_id) == Some(&state) {
                continue;
            }

            tracing::info!("{}: {}", sensor.name(), state);
            last_exported.insert(unique_id, state);
        }
    }
}
