use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{ExporterBuildError, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_opentelemetry::OpenTelemetryLayer;

use std::error::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MonitoringConfig {
    pub service_name: String,
    pub logs: EnvFilterConfig,
    pub traces: EnvFilterConfig,
    pub otlp: Option<OtlpConfig>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct EnvFilterConfig {
    pub default_level: String,
    #[serde(default)]
    pub filters: Vec<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct OtlpConfig {
    pub url: Option<String>,
}

impl TryInto<EnvFilter> for EnvFilterConfig {
    type Error = tracing_subscriber::filter::ParseError;

    fn try_into(self) -> Result<EnvFilter, Self::Error> {
        EnvFilter::builder()
            .with_default_directive(self.default_level.parse()?)
            .parse(self.filters.join(","))
    }
}

impl MonitoringConfig {
    pub fn init(&self) -> Result<(), Box<dyn Error>> {
        opentelemetry::global::set_text_map_propagator(TraceContextPropagator::default());

        let fmt_filter: EnvFilter = self.logs.clone().try_into()?;

        match &self.otlp {
            Some(otlp_config) => {
                let resource = Resource::builder()
                    .with_attribute(KeyValue::new("service.name", self.service_name.clone()))
                    .build();

                let tracer_provider = init_traces(resource, otlp_config.url.clone())?;
                let tracer = tracer_provider.tracer(self.service_name.clone());
                let tracing_filter: EnvFilter = self.traces.clone().try_into()?;
                let tracing_layer = OpenTelemetryLayer::new(tracer).with_filter(tracing_filter);

                tracing_subscriber::registry()
                    .with(tracing_layer)
                    .with(tracing_subscriber::fmt::layer().with_filter(fmt_filter))
                    .init();
            }
            None => {
                tracing_subscriber::registry()
                    .with(tracing_subscriber::fmt::layer().with_filter(fmt_filter))
                    .init();
            }
        }

        Ok(())
    }
}

fn init_traces(resource: Resource, url: Option<String>) -> Result<SdkTracerProvider, ExporterBuildError> {
    match url {
        Some(url) => {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(url)
                .build()?;
            Ok(SdkTracerProvider::builder()
                .with_resource(resource)
                .with_batch_exporter(exporter)
                .build())
        }
        None => Ok(SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build()),
    }
}
