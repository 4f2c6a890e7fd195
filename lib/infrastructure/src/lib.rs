mod http;
mod monitoring;

pub use monitoring::MonitoringConfig;

pub use http::client::HttpClientConfig;
