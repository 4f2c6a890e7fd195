use anyhow::{Context, bail};
use chrono::Utc;
use chrono_tz::Atlantic::Faroe;
use infrastructure::HttpClientConfig;
use reqwest::{StatusCode, header};
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;

use crate::meter_state::MeterId;

const LOGIN_PATH: &str = "/api/CustomerRESTApi/login_and_get_jwt_token";
const METERS_PATH: &str = "/api/CustomerRESTApi/get_available_meters";
const USAGE_PATH: &str = "/api/CustomerRESTApi/hourly_kwh_usage";

//local wall time in the provider's zone, no UTC offset
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone)]
pub struct SevHttpClient {
    client: ClientWithMiddleware,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct Customer {
    #[serde(default)]
    installations: Vec<Installation>,
}

#[derive(Debug, Deserialize)]
struct Installation {
    #[serde(default)]
    meters: Vec<Meter>,
}

#[derive(Debug, Deserialize)]
struct Meter {
    meter_id: Option<MeterId>,
}

#[derive(Debug, Deserialize)]
struct MeterUsage {
    #[serde(default)]
    readings: Vec<Reading>,
}

#[derive(Debug, Deserialize)]
struct Reading {
    cumulative_value: Option<f64>,
}

impl SevHttpClient {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        //JWT rotates every refresh cycle, so no default bearer header
        let client = HttpClientConfig::new(None).new_tracing_client()?;

        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_owned(),
        })
    }

    pub async fn authenticate(&self, user_id: &str, api_key: &str) -> Option<String> {
        let response = match self.post_login(user_id, api_key).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("SEV auth error: {:?}", e);
                return None;
            }
        };

        if response.status() != StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!("SEV auth failed: status={}, resp={}", status, body);
            return None;
        }

        match response.text().await {
            Ok(body) => Some(body.trim().to_owned()),
            Err(e) => {
                tracing::error!("SEV auth error reading token body: {:?}", e);
                None
            }
        }
    }

    pub async fn validate_credentials(&self, user_id: &str, api_key: &str) -> bool {
        match self.post_login(user_id, api_key).await {
            Ok(response) if response.status() == StatusCode::OK => {
                tracing::debug!("SEV credential check succeeded for {}", user_id);
                true
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                tracing::error!("SEV credential check failed: status={}, resp={}", status, body);
                false
            }
            Err(e) => {
                tracing::error!("SEV credential check error: {:?}", e);
                false
            }
        }
    }

    pub async fn get_available_meters(&self, jwt: &str) -> Vec<MeterId> {
        match self.fetch_available_meters(jwt).await {
            Ok(meter_ids) => meter_ids,
            Err(e) => {
                tracing::error!("SEV get_available_meters failed: {:?}", e);
                vec![]
            }
        }
    }

    pub async fn fetch_cumulative_max(&self, jwt: &str, meter_id: MeterId) -> Option<f64> {
        match self.fetch_usage_window(jwt, meter_id).await {
            Ok(usage) => max_cumulative_value(meter_id, &usage),
            Err(e) => {
                tracing::error!("Error fetching usage for meter {}: {:?}", meter_id, e);
                None
            }
        }
    }

    async fn post_login(&self, user_id: &str, api_key: &str) -> anyhow::Result<reqwest::Response> {
        let payload = serde_json::json!({
            "user_name": user_id,
            "password": api_key,
        });

        let response = self
            .client
            .post(format!("{}{}", self.base_url, LOGIN_PATH))
            .header(header::CONTENT_TYPE, "application/json-patch+json")
            .header(header::ACCEPT, "*/*")
            .json(&payload)
            .send()
            .await?;

        Ok(response)
    }

    async fn fetch_available_meters(&self, jwt: &str) -> anyhow::Result<Vec<MeterId>> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, METERS_PATH))
            .bearer_auth(jwt)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            bail!("status={}, resp={}", status, response.text().await.unwrap_or_default());
        }

        let customers: Vec<Customer> = response.json().await.context("Error parsing available meters")?;

        //response order, duplicates preserved, entries without a meter_id skipped
        let meter_ids = customers
            .iter()
            .flat_map(|customer| &customer.installations)
            .flat_map(|installation| &installation.meters)
            .filter_map(|meter| meter.meter_id)
            .collect();

        Ok(meter_ids)
    }

    async fn fetch_usage_window(&self, jwt: &str, meter_id: MeterId) -> anyhow::Result<Vec<MeterUsage>> {
        let to_date = Utc::now().with_timezone(&Faroe);
        let from_date = to_date - chrono::Duration::days(1);

        let payload = serde_json::json!({
            "meters": [meter_id],
            "from_date": from_date.format(TIMESTAMP_FORMAT).to_string(),
            "to_date": to_date.format(TIMESTAMP_FORMAT).to_string(),
        });

        let response = self
            .client
            .post(format!("{}{}", self.base_url, USAGE_PATH))
            .bearer_auth(jwt)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            bail!("status={}, resp={}", status, response.text().await.unwrap_or_default());
        }

        response.json().await.context("Error parsing hourly usage")
    }
}

fn max_cumulative_value(meter_id: MeterId, usage: &[MeterUsage]) -> Option<f64> {
    let readings = match usage.first() {
        Some(usage) => &usage.readings,
        None => {
            tracing::error!("Unexpected usage response for meter {}: empty result", meter_id);
            return None;
        }
    };

    if readings.is_empty() {
        tracing::warn!("No readings for meter {} in last 24h", meter_id);
        return None;
    }

    let mut max_val = 0.0;
    for reading in readings {
        if let Some(cumulative) = reading.cumulative_value
            && cumulative > max_val
        {
            max_val = cumulative;
        }
    }

    Some(max_val)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    #[tokio::test]
    async fn authenticate_returns_trimmed_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/CustomerRESTApi/login_and_get_jwt_token")
            .match_header("content-type", "application/json-patch+json")
            .match_body(Matcher::Json(json!({"user_name": "user", "password": "key"})))
            .with_status(200)
            .with_body("  T1\n")
            .create_async()
            .await;

        let client = SevHttpClient::new(&server.url()).unwrap();
        let token = client.authenticate("user", "key").await;

        assert_eq!(token.as_deref(), Some("T1"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn authenticate_returns_none_on_non_200() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/CustomerRESTApi/login_and_get_jwt_token")
            .with_status(401)
            .with_body("bad credentials")
            .create_async()
            .await;

        let client = SevHttpClient::new(&server.url()).unwrap();

        assert_eq!(client.authenticate("user", "wrong").await, None);
    }

    #[tokio::test]
    async fn authenticate_returns_none_on_connection_error() {
        let client = SevHttpClient::new("http://127.0.0.1:1").unwrap();

        assert_eq!(client.authenticate("user", "key").await, None);
    }

    #[tokio::test]
    async fn validate_credentials_accepts_200() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/CustomerRESTApi/login_and_get_jwt_token")
            .with_status(200)
            .with_body("T1")
            .create_async()
            .await;

        let client = SevHttpClient::new(&server.url()).unwrap();

        assert!(client.validate_credentials("user", "key").await);
    }

    #[tokio::test]
    async fn validate_credentials_rejects_non_200_and_transport_errors() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/CustomerRESTApi/login_and_get_jwt_token")
            .with_status(403)
            .create_async()
            .await;

        let client = SevHttpClient::new(&server.url()).unwrap();
        assert!(!client.validate_credentials("user", "key").await);

        let unreachable = SevHttpClient::new("http://127.0.0.1:1").unwrap();
        assert!(!unreachable.validate_credentials("user", "key").await);
    }

    #[tokio::test]
    async fn meters_flattened_in_response_order() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/CustomerRESTApi/get_available_meters")
            .match_header("authorization", "Bearer T1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!([
                    {
                        "customer_id": 1,
                        "installations": [
                            { "meters": [ { "meter_id": 101 }, { "meter_id": 102 } ] },
                            { "meters": [ { "meter_id": 103 } ] }
                        ]
                    },
                    {
                        "customer_id": 2,
                        "installations": [
                            { "meters": [ { "meter_id": 101 } ] }
                        ]
                    }
                ])
                .to_string(),
            )
            .create_async()
            .await;

        let client = SevHttpClient::new(&server.url()).unwrap();
        let meter_ids = client.get_available_meters("T1").await;

        //duplicates are kept, order follows the response
        assert_eq!(
            meter_ids,
            vec![MeterId(101), MeterId(102), MeterId(103), MeterId(101)]
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn meters_missing_fields_are_skipped() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/CustomerRESTApi/get_available_meters")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!([
                    { "customer_id": 1 },
                    { "installations": [ {} ] },
                    { "installations": [ { "meters": [ { "serial": "x" }, { "meter_id": 7 } ] } ] }
                ])
                .to_string(),
            )
            .create_async()
            .await;

        let client = SevHttpClient::new(&server.url()).unwrap();

        assert_eq!(client.get_available_meters("T1").await, vec![MeterId(7)]);
    }

    #[tokio::test]
    async fn meters_empty_on_failure() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/CustomerRESTApi/get_available_meters")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let client = SevHttpClient::new(&server.url()).unwrap();
        assert_eq!(client.get_available_meters("T1").await, vec![]);

        let unreachable = SevHttpClient::new("http://127.0.0.1:1").unwrap();
        assert_eq!(unreachable.get_available_meters("T1").await, vec![]);
    }

    #[tokio::test]
    async fn meters_empty_on_malformed_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/CustomerRESTApi/get_available_meters")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "unexpected": "object" }).to_string())
            .create_async()
            .await;

        let client = SevHttpClient::new(&server.url()).unwrap();

        assert_eq!(client.get_available_meters("T1").await, vec![]);
    }

    #[tokio::test]
    async fn usage_max_skips_null_readings() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/CustomerRESTApi/hourly_kwh_usage")
            .match_header("authorization", "Bearer T1")
            .match_body(Matcher::PartialJson(json!({ "meters": [101] })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!([
                    {
                        "meter_id": 101,
                        "readings": [
                            { "time_stamp": "2026-08-05T10:00:00", "cumulative_value": 5.0 },
                            { "time_stamp": "2026-08-05T11:00:00", "cumulative_value": 12.3 },
                            { "time_stamp": "2026-08-05T12:00:00", "cumulative_value": null },
                            { "time_stamp": "2026-08-05T13:00:00", "cumulative_value": 8.0 }
                        ]
                    }
                ])
                .to_string(),
            )
            .create_async()
            .await;

        let client = SevHttpClient::new(&server.url()).unwrap();

        assert_eq!(client.fetch_cumulative_max("T1", MeterId(101)).await, Some(12.3));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn usage_none_on_empty_readings() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/CustomerRESTApi/hourly_kwh_usage")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!([ { "meter_id": 102, "readings": [] } ]).to_string())
            .create_async()
            .await;

        let client = SevHttpClient::new(&server.url()).unwrap();

        //no readings means no value, not a 0.0 reading
        assert_eq!(client.fetch_cumulative_max("T1", MeterId(102)).await, None);
    }

    #[tokio::test]
    async fn usage_all_null_readings_floor_at_zero() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/CustomerRESTApi/hourly_kwh_usage")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!([
                    {
                        "meter_id": 101,
                        "readings": [
                            { "cumulative_value": null },
                            { "cumulative_value": null }
                        ]
                    }
                ])
                .to_string(),
            )
            .create_async()
            .await;

        let client = SevHttpClient::new(&server.url()).unwrap();

        assert_eq!(client.fetch_cumulative_max("T1", MeterId(101)).await, Some(0.0));
    }

    #[tokio::test]
    async fn usage_none_on_empty_response_array() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/CustomerRESTApi/hourly_kwh_usage")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("[]")
            .create_async()
            .await;

        let client = SevHttpClient::new(&server.url()).unwrap();

        assert_eq!(client.fetch_cumulative_max("T1", MeterId(101)).await, None);
    }

    #[tokio::test]
    async fn usage_none_on_failure() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/CustomerRESTApi/hourly_kwh_usage")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let client = SevHttpClient::new(&server.url()).unwrap();
        assert_eq!(client.fetch_cumulative_max("T1", MeterId(101)).await, None);

        let unreachable = SevHttpClient::new("http://127.0.0.1:1").unwrap();
        assert_eq!(unreachable.fetch_cumulative_max("T1", MeterId(101)).await, None);
    }
}
