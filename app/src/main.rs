use settings::Settings;

use crate::meter_state::{CumulativeSensor, MeterStateRunner};

mod adapter;
mod meter_state;
mod settings;

#[tokio::main(flavor = "current_thread")]
pub async fn main() {
    let settings = Settings::new().expect("Error reading configuration");

    settings
        .monitoring
        .init()
        .expect("Error initializing monitoring");

    let sev_client = settings
        .sev
        .new_client()
        .expect("Error initializing SEV REST client");

    let credentials_valid = sev_client
        .validate_credentials(&settings.sev.user_id, &settings.sev.api_key)
        .await;
    if !credentials_valid {
        panic!("SEV rejected the configured credentials, check user_id and api_key");
    }

    let meter_state_runner = MeterStateRunner::new();
    let meter_state_client = meter_state_runner.client();

    let mut collector = settings
        .sev
        .new_collector(sev_client, meter_state_runner.incoming_event_sender());

    collector
        .refresh()
        .await
        .expect("Error running initial SEV refresh");

    let sensors: Vec<CumulativeSensor> = collector
        .meter_ids()
        .iter()
        .map(|meter_id| CumulativeSensor::new(meter_state_client.clone(), *meter_id))
        .collect();

    for sensor in &sensors {
        tracing::info!("Tracking sensor {} ({})", sensor.name(), sensor.unique_id());
    }

    let sensor_export = meter_state::sensor::export_sensor_states(sensors, meter_state_runner.subscribe());

    tokio::select!(
        _ = collector.run() => {},
        _ = meter_state_runner.run() => {},
        _ = sensor_export => {},
    );
}
