//! OTLP span export and the tracer provider that feeds it.

use std::collections::HashMap;

use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::{SpanExporterBuilder, WithExportConfig};
use opentelemetry_sdk::trace::{Config, TracerProvider};
use opentelemetry_sdk::{runtime, Resource};
use tonic::metadata::{MetadataMap, MetadataValue};

use crate::config::{OtlpEndpoint, OtlpProtocol, TelemetrySettings};
use crate::error::{ConfigError, Result};

pub const SERVICE_NAME: &str = "service.name";
pub const SERVICE_VERSION: &str = "service.version";
pub const DEPLOYMENT_NAME: &str = "deployment_name";

/// Resource attached to every exported span: the composed service name, the
/// service version and, when set, the deployment environment.
pub fn trace_resource(settings: &TelemetrySettings) -> Resource {
    let mut attributes = vec![
        KeyValue::new(SERVICE_NAME, settings.service_name_composed()),
        KeyValue::new(SERVICE_VERSION, settings.version.clone()),
    ];
    if !settings.environment.is_empty() {
        attributes.push(KeyValue::new(DEPLOYMENT_NAME, settings.environment.clone()));
    }
    Resource::default().merge(&Resource::new(attributes))
}

fn span_exporter(endpoint: &OtlpEndpoint, auth_token: Option<&str>) -> Result<SpanExporterBuilder> {
    let authorization = OtlpEndpoint::auth_header(auth_token);
    match endpoint.protocol {
        OtlpProtocol::Grpc => {
            let mut metadata = MetadataMap::new();
            if let Some((_, value)) = authorization {
                let value = MetadataValue::try_from(value.as_str()).map_err(|_| ConfigError::InvalidAuthToken)?;
                metadata.insert("authorization", value);
            }
            // gRPC endpoints are always plaintext; only HTTP carries TLS.
            Ok(opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(format!("http://{}", endpoint.exporter_url()))
                .with_metadata(metadata)
                .into())
        }
        OtlpProtocol::Http => {
            let headers: HashMap<String, String> = authorization
                .map(|(name, value)| (name.to_string(), value))
                .into_iter()
                .collect();
            Ok(opentelemetry_otlp::new_exporter()
                .http()
                .with_endpoint(endpoint.exporter_url())
                .with_headers(headers)
                .into())
        }
    }
}

/// Builds a batching OTLP tracer provider from `settings` and installs it as
/// the global provider. Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Fails on an invalid endpoint or auth token, or when the exporter cannot be
/// built.
pub fn install_tracer_provider(settings: &TelemetrySettings) -> Result<TracerProvider> {
    let endpoint = settings.otlp_endpoint()?;
    let exporter = span_exporter(&endpoint, settings.otlp.auth_token.as_deref())?;
    let provider = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(Config::default().with_resource(trace_resource(settings)))
        .install_batch(runtime::Tokio)?;
    global::set_tracer_provider(provider.clone());

    tracing::info!(
        service = %settings.service_name_composed(),
        version = %settings.version,
        endpoint = %endpoint,
        "OTLP trace export enabled"
    );
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TelemetryError;
    use opentelemetry::{Key, Value};

    fn settings() -> TelemetrySettings {
        TelemetrySettings {
            service_name: "orders".to_string(),
            environment: "prod".to_string(),
            version: "2.3.0".to_string(),
            ..TelemetrySettings::default()
        }
    }

    #[test]
    fn test_resource_carries_composed_identity() {
        let resource = trace_resource(&settings());
        assert_eq!(resource.get(Key::new(SERVICE_NAME)), Some(Value::from("prod-orders")));
        assert_eq!(resource.get(Key::new(SERVICE_VERSION)), Some(Value::from("2.3.0")));
        assert_eq!(resource.get(Key::new(DEPLOYMENT_NAME)), Some(Value::from("prod")));
    }

    #[test]
    fn test_resource_omits_empty_deployment() {
        let settings = TelemetrySettings {
            environment: String::new(),
            ..settings()
        };
        assert_eq!(trace_resource(&settings).get(Key::new(DEPLOYMENT_NAME)), None);
    }

    #[test]
    fn test_exporters_build_for_both_protocols() {
        let grpc = OtlpEndpoint::parse("collector:4317", "grpc", false).unwrap();
        assert!(span_exporter(&grpc, Some("t0k")).is_ok());

        let http = OtlpEndpoint::parse("https://otel.example.com", "grpc", false).unwrap();
        assert!(span_exporter(&http, Some("t0k")).is_ok());
    }

    #[test]
    fn test_unencodable_token_is_a_config_error() {
        let grpc = OtlpEndpoint::parse("collector:4317", "grpc", false).unwrap();
        assert!(matches!(
            span_exporter(&grpc, Some("line\nbreak")),
            Err(TelemetryError::Config(ConfigError::InvalidAuthToken))
        ));
    }
}
