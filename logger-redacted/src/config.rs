// Logger configuration
use serde::{Deserialize, Serialize};

/// Identity stamped on every log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub name: String,
    pub version: String,
    pub environment: String,
    pub domain: String,
    pub subdomain: String,
}

impl Default for ServiceIdentity {
    fn default() -> Self {
        Self {
            name: "app".to_string(),
            version: "1.0.0".to_string(),
            environment: "dev".to_string(),
            domain: String::new(),
            subdomain: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Colorized single line for terminals.
    Pretty,
    /// One ECS JSON object per line.
    Json,
}

impl LogFormat {
    pub fn for_environment(environment: &str) -> Self {
        if environment.eq_ignore_ascii_case("development") {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    pub redaction_enabled: bool,
    pub log_level: String,
    pub format: LogFormat,
    pub service: ServiceIdentity,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            redaction_enabled: true,
            log_level: "info".to_string(),
            format: LogFormat::Json,
            service: ServiceIdentity::default(),
        }
    }
}

impl LoggerConfig {
    pub fn for_service(service: ServiceIdentity) -> Self {
        Self {
            format: LogFormat::for_environment(&service.environment),
            service,
            ..Self::default()
        }
    }

    /// Log level as an `EnvFilter` directive.
    pub fn filter_directive(&self) -> String {
        match self.log_level.to_ascii_lowercase().as_str() {
            "warning" => "warn".to_string(),
            "critical" | "fatal" => "error".to_string(),
            other => other.to_string(),
        }
    }
}
