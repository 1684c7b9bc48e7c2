use std::fmt;
use std::io::Write;
use std::sync::Arc;

use axum::Router;
use logger_redacted::{parse_filter, LogSink, MaskingEngine};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::TracerProvider;

use crate::config::TelemetrySettings;
use crate::error::Result;
use crate::exporter::install_tracer_provider;
use crate::instrumentation::Instrumentation;
use crate::memory::{MemoryProbe, MemorySampler, ProcessMemoryProbe};
use crate::metrics::MetricRegistry;
use crate::middleware::{metrics_router, RequestMetricsLayer, RouteTemplates};
use crate::trace::{OtelTraceBridge, TraceBridge};

const INSTRUMENTATION_NAME: &str = "telemetry";

/// Wires settings, registry, trace bridge, memory sampler and masking engine
/// into the instrumentation, middleware and log sink built from them.
pub struct TelemetryEngine {
    settings: TelemetrySettings,
    registry: Arc<MetricRegistry>,
    bridge: Arc<dyn TraceBridge>,
    masking: Arc<MaskingEngine>,
    instrumentation: Instrumentation,
    tracer_provider: Option<TracerProvider>,
}

impl fmt::Debug for TelemetryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryEngine")
            .field("settings", &self.settings)
            .field("instrumentation", &self.instrumentation)
            .field("exporting", &self.tracer_provider.is_some())
            .finish_non_exhaustive()
    }
}

impl TelemetryEngine {
    pub fn builder(settings: TelemetrySettings) -> TelemetryEngineBuilder {
        TelemetryEngineBuilder {
            settings,
            registry: None,
            bridge: None,
            probe: None,
            masking: None,
        }
    }

    /// Builds an engine from `TELEMETRY_*` and `OTEL_EXPORTER_OTLP_*`
    /// variables. With `OTEL_EXPORTER_OTLP_ENABLED` set, spans are exported
    /// over OTLP; otherwise the global tracer provider is used.
    ///
    /// # Errors
    ///
    /// Fails when the settings cannot be loaded or are invalid.
    pub fn from_env() -> Result<Self> {
        Self::builder(TelemetrySettings::from_env()?).build()
    }

    pub fn settings(&self) -> &TelemetrySettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    pub fn masking(&self) -> &Arc<MaskingEngine> {
        &self.masking
    }

    pub fn instrumentation(&self) -> &Instrumentation {
        &self.instrumentation
    }

    pub fn request_metrics_layer(&self, routes: RouteTemplates) -> RequestMetricsLayer {
        RequestMetricsLayer::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.bridge),
            self.settings.service_name.clone(),
            routes,
        )
    }

    pub fn metrics_router(&self) -> Router {
        metrics_router(Arc::clone(&self.registry))
    }

    pub fn log_sink(&self, writer: impl Write + Send + 'static) -> LogSink {
        LogSink::new(&self.settings.logger_config(), Arc::clone(&self.masking), writer)
    }

    /// Flushes pending spans and shuts the exporting provider down.
    pub fn shutdown(&self) {
        if let Some(provider) = &self.tracer_provider {
            for result in provider.force_flush() {
                if let Err(err) = result {
                    tracing::warn!(error = %err, "failed to flush spans");
                }
            }
            opentelemetry::global::shutdown_tracer_provider();
        }
    }

    /// Routes `tracing` events through a masked stdout sink.
    ///
    /// # Errors
    ///
    /// Fails when the log level is not a valid filter or a global subscriber
    /// is already installed.
    pub fn init_logging(&self) -> Result<()> {
        let config = self.settings.logger_config();
        let sink = Arc::new(LogSink::stdout(&config, Arc::clone(&self.masking)));
        logger_redacted::init_logging(sink, &config.filter_directive())?;
        Ok(())
    }
}

#[must_use]
pub struct TelemetryEngineBuilder {
    settings: TelemetrySettings,
    registry: Option<Arc<MetricRegistry>>,
    bridge: Option<Arc<dyn TraceBridge>>,
    probe: Option<Arc<dyn MemoryProbe>>,
    masking: Option<Arc<MaskingEngine>>,
}

impl TelemetryEngineBuilder {
    pub fn registry(mut self, registry: Arc<MetricRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn trace_bridge(mut self, bridge: Arc<dyn TraceBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn masking(mut self, masking: Arc<MaskingEngine>) -> Self {
        self.masking = Some(masking);
        self
    }

    /// Installs an OTLP tracer provider when export is enabled and no trace
    /// bridge was given; this needs a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails on invalid settings, an unparsable log level, or an exporter
    /// that cannot be built.
    pub fn build(self) -> Result<TelemetryEngine> {
        let Self {
            settings,
            registry,
            bridge,
            probe,
            masking,
        } = self;
        settings.validate()?;
        parse_filter(&settings.logger_config().filter_directive())?;

        let registry = registry.unwrap_or_default();
        let tracer_provider = match &bridge {
            None if settings.otlp.enabled => Some(install_tracer_provider(&settings)?),
            _ => None,
        };
        let bridge: Arc<dyn TraceBridge> = match (bridge, &tracer_provider) {
            (Some(bridge), _) => bridge,
            (None, Some(provider)) => Arc::new(OtelTraceBridge::new(provider.tracer(INSTRUMENTATION_NAME))),
            (None, None) => Arc::new(OtelTraceBridge::global(INSTRUMENTATION_NAME)),
        };
        let probe = probe.unwrap_or_else(|| Arc::new(ProcessMemoryProbe::new()));
        let masking = masking.unwrap_or_default();
        let sampler = MemorySampler::new(
            settings.enable_memory_profiling,
            settings.sampling_memory_profiling,
            probe,
        );
        let instrumentation = Instrumentation::new(
            Arc::clone(&registry),
            Arc::clone(&bridge),
            sampler,
            settings.service_name.clone(),
        );

        tracing::debug!(
            service = %settings.service_name_composed(),
            memory_profiling = settings.enable_memory_profiling,
            "telemetry engine ready"
        );
        Ok(TelemetryEngine {
            settings,
            registry,
            bridge,
            masking,
            instrumentation,
            tracer_provider,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, TelemetryError};

    #[test]
    fn test_invalid_settings_fail_fast() {
        let settings = TelemetrySettings {
            sampling_memory_profiling: 1.5,
            ..TelemetrySettings::default()
        };
        assert!(matches!(
            TelemetryEngine::builder(settings).build(),
            Err(TelemetryError::Config(ConfigError::InvalidSamplingRatio(_)))
        ));
    }

    #[test]
    fn test_unparsable_log_level_fails_fast() {
        let settings = TelemetrySettings {
            log_level: "app=loud".to_string(),
            ..TelemetrySettings::default()
        };
        assert!(matches!(
            TelemetryEngine::builder(settings).build(),
            Err(TelemetryError::Logging(_))
        ));
    }

    #[test]
    fn test_defaults_are_wired() {
        let engine = TelemetryEngine::builder(TelemetrySettings::default()).build().unwrap();
        assert_eq!(engine.instrumentation().app_name(), "app");
        assert!(Arc::ptr_eq(engine.registry(), engine.instrumentation().registry()));
        assert!(engine.tracer_provider.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enabled_export_installs_provider() {
        let mut settings = TelemetrySettings::default();
        settings.otlp.enabled = true;
        settings.otlp.endpoint = "http://127.0.0.1:4318".to_string();
        let engine = TelemetryEngine::builder(settings).build().unwrap();
        assert!(engine.tracer_provider.is_some());
        engine.shutdown();
    }

    #[test]
    fn test_given_bridge_skips_export() {
        let mut settings = TelemetrySettings::default();
        settings.otlp.enabled = true;
        let bridge: Arc<dyn TraceBridge> = Arc::new(OtelTraceBridge::global("engine-tests"));
        let engine = TelemetryEngine::builder(settings).trace_bridge(bridge).build().unwrap();
        assert!(engine.tracer_provider.is_none());
    }
}
