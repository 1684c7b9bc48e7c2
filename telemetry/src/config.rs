// Telemetry settings
use std::collections::HashMap;
use std::fmt;

use config::{Config, Environment};
use logger_redacted::{LogFormat, LoggerConfig, ServiceIdentity};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const DEFAULT_OTLP_PORT: u16 = 4317;

/// OTLP exporter settings, read from `OTEL_EXPORTER_OTLP_*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OtlpSettings {
    /// Exports spans to the endpoint below when set.
    pub enabled: bool,
    pub protocol: String,
    pub endpoint: String,
    pub http_encrypted: bool,
    pub auth_token: Option<String>,
}

impl Default for OtlpSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            protocol: "grpc".to_string(),
            endpoint: format!("localhost:{DEFAULT_OTLP_PORT}"),
            http_encrypted: false,
            auth_token: None,
        }
    }
}

/// Service identity and instrumentation switches, read from `TELEMETRY_*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub service_name: String,
    pub environment: String,
    pub domain: String,
    pub subdomain: String,
    pub version: String,
    pub log_level: String,
    pub log_format: Option<LogFormat>,
    pub enable_memory_profiling: bool,
    pub sampling_memory_profiling: f64,
    #[serde(skip)]
    pub otlp: OtlpSettings,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            service_name: "app".to_string(),
            environment: "dev".to_string(),
            domain: String::new(),
            subdomain: String::new(),
            version: "1.0.0".to_string(),
            log_level: "INFO".to_string(),
            log_format: None,
            enable_memory_profiling: false,
            sampling_memory_profiling: 0.01,
            otlp: OtlpSettings::default(),
        }
    }
}

impl TelemetrySettings {
    /// Loads settings from the process environment after reading `.env`.
    ///
    /// # Errors
    ///
    /// Fails when a variable cannot be converted or the result is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_source(None)
    }

    /// Loads settings from an explicit variable map instead of the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Fails when a variable cannot be converted or the result is invalid.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_source(Some(vars))
    }

    fn from_source(vars: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        let mut settings: Self = Config::builder()
            .add_source(
                Environment::with_prefix("TELEMETRY")
                    .prefix_separator("_")
                    .source(vars.clone()),
            )
            .build()?
            .try_deserialize()?;

        settings.otlp = Config::builder()
            .add_source(
                Environment::with_prefix("OTEL_EXPORTER_OTLP")
                    .prefix_separator("_")
                    .source(vars),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::MissingServiceName);
        }
        if !(0.0..=1.0).contains(&self.sampling_memory_profiling) {
            return Err(ConfigError::InvalidSamplingRatio(self.sampling_memory_profiling));
        }
        self.otlp_endpoint()?;
        Ok(())
    }

    /// `<environment>-<service_name>`, as used for exported resources.
    pub fn service_name_composed(&self) -> String {
        format!("{}-{}", self.environment, self.service_name)
    }

    /// # Errors
    ///
    /// Fails on an unsupported protocol or an unparsable port.
    pub fn otlp_endpoint(&self) -> Result<OtlpEndpoint, ConfigError> {
        OtlpEndpoint::parse(&self.otlp.endpoint, &self.otlp.protocol, self.otlp.http_encrypted)
    }

    pub fn service_identity(&self) -> ServiceIdentity {
        ServiceIdentity {
            name: self.service_name.clone(),
            version: self.version.clone(),
            environment: self.environment.clone(),
            domain: self.domain.clone(),
            subdomain: self.subdomain.clone(),
        }
    }

    pub fn logger_config(&self) -> LoggerConfig {
        let mut config = LoggerConfig::for_service(self.service_identity());
        config.log_level.clone_from(&self.log_level);
        if let Some(format) = self.log_format {
            config.format = format;
        }
        config
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtlpProtocol {
    Grpc,
    Http,
}

impl OtlpProtocol {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "grpc" => Ok(Self::Grpc),
            "http" | "http/protobuf" => Ok(Self::Http),
            _ => Err(ConfigError::InvalidProtocol(value.to_string())),
        }
    }
}

/// Resolved exporter target.
///
/// A scheme on the endpoint overrides the configured protocol: `https://`
/// selects encrypted HTTP, `http://` plain HTTP and `grpc://` gRPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtlpEndpoint {
    pub host: String,
    pub port: u16,
    pub protocol: OtlpProtocol,
    pub encrypted: bool,
}

impl OtlpEndpoint {
    /// # Errors
    ///
    /// Fails on an unsupported protocol or an unparsable port.
    pub fn parse(endpoint: &str, protocol: &str, http_encrypted: bool) -> Result<Self, ConfigError> {
        let mut protocol = OtlpProtocol::parse(protocol)?;
        let mut encrypted = http_encrypted;

        let mut rest = endpoint.trim();
        if let Some(stripped) = rest.strip_prefix("https://") {
            protocol = OtlpProtocol::Http;
            encrypted = true;
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix("http://") {
            protocol = OtlpProtocol::Http;
            encrypted = false;
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix("grpc://") {
            protocol = OtlpProtocol::Grpc;
            rest = stripped;
        }
        let authority = rest.split('/').next().unwrap_or(rest);

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| ConfigError::InvalidPort(endpoint.to_string()))?;
                (host, port)
            }
            None => (authority, DEFAULT_OTLP_PORT),
        };
        let host = if host.is_empty() { "localhost" } else { host };

        Ok(Self {
            host: host.to_string(),
            port,
            protocol,
            encrypted: encrypted && protocol == OtlpProtocol::Http,
        })
    }

    /// Endpoint in the form the matching exporter expects.
    pub fn exporter_url(&self) -> String {
        match self.protocol {
            OtlpProtocol::Grpc => format!("{}:{}", self.host, self.port),
            OtlpProtocol::Http => {
                let scheme = if self.encrypted { "https" } else { "http" };
                format!("{scheme}://{}:{}/v1/traces", self.host, self.port)
            }
        }
    }

    /// Authorization header for exporters that need a token.
    pub fn auth_header(token: Option<&str>) -> Option<(&'static str, String)> {
        token
            .filter(|token| !token.is_empty())
            .map(|token| ("Authorization", format!("Api-Token {token}")))
    }
}

impl fmt::Display for OtlpEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.exporter_url())
    }
}
