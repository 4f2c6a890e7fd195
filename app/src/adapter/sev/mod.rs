mod client;

pub use client::SevHttpClient;

use serde::Deserialize;
use tokio::sync::mpsc;

use crate::meter_state::{MeterId, MeterStateIncomingEvent, UsageSnapshot};

fn default_api_url() -> String {
    "https://api.sev.fo".to_owned()
}

fn default_poll_interval_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
#[allow(unused)]
pub struct Sev {
    #[serde(default = "default_api_url")]
    pub url: String,
    pub user_id: String,
    pub api_key: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Sev {
    pub fn new_client(&self) -> anyhow::Result<SevHttpClient> {
        SevHttpClient::new(&self.url)
    }

    pub fn new_collector(
        &self,
        client: SevHttpClient,
        tx: mpsc::Sender<MeterStateIncomingEvent>,
    ) -> SevCollector {
        SevCollector {
            client,
            user_id: self.user_id.clone(),
            api_key: self.api_key.clone(),
            poll_interval: std::time::Duration::from_secs(self.poll_interval_secs),
            meter_ids: vec![],
            tx,
        }
    }
}

pub struct SevCollector {
    client: SevHttpClient,
    user_id: String,
    api_key: String,
    poll_interval: std::time::Duration,
    meter_ids: Vec<MeterId>,
    tx: mpsc::Sender<MeterStateIncomingEvent>,
}

impl SevCollector {
    pub fn meter_ids(&self) -> &[MeterId] {
        &self.meter_ids
    }

    pub async fn refresh(&mut self) -> anyhow::Result<()> {
        match self.refresh_cycle().await {
            Ok(snapshot) => {
                self.send(MeterStateIncomingEvent::SnapshotReplaced(snapshot)).await;
                Ok(())
            }
            Err(e) => {
                tracing::error!("SEV refresh cycle failed: {:#}", e);
                self.send(MeterStateIncomingEvent::RefreshFailed(format!("{:#}", e)))
                    .await;
                Err(e)
            }
        }
    }

    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(self.poll_interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        //the immediate first tick is consumed here, main already ran the startup refresh
        timer.tick().await;

        loop {
            timer.tick().await;
            //failures are recorded in the meter state store, recovery is the next tick
            let _ = self.refresh().await;
        }
    }

    async fn refresh_cycle(&mut self) -> anyhow::Result<UsageSnapshot> {
        let jwt = match self.client.authenticate(&self.user_id, &self.api_key).await {
            Some(jwt) => jwt,
            None => anyhow::bail!("Failed to authenticate with SEV"),
        };

        if self.meter_ids.is_empty() {
            let meter_ids = self.client.get_available_meters(&jwt).await;
            if meter_ids.is_empty() {
                anyhow::bail!("No meters found from SEV API");
            }
            self.meter_ids = meter_ids;
        }

        let mut snapshot = UsageSnapshot::new();
        for meter_id in &self.meter_ids {
            let value = self.client.fetch_cumulative_max(&jwt, *meter_id).await;
            snapshot.insert(*meter_id, value);
        }

        Ok(snapshot)
    }

    async fn send(&self, event: MeterStateIncomingEvent) {
        if let Err(e) = self.tx.send(event).await {
            tracing::error!("Error sending meter state event: {}", e);
        }
    }
}
