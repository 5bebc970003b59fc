//! Logging and trace export set-up for Pebble.
//!
//! Call [`init_tracing`] once at process startup.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `PEBBLE_LOG_FORMAT=json` | Newline-delimited JSON logs; overrides [`LogSettings::format`]. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP/HTTP collector URL, used when [`LogSettings::otlp_endpoint`] is unset. |
//!
//! # Example
//!
//! ```rust,no_run
//! use pebble_runtime::telemetry::{init_tracing, LogSettings};
//!
//! // Hold the guard for the entire lifetime of the process.
//! let _guard = init_tracing("pebble", &LogSettings::default());
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// The `[logging]` section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub format: LogFormat,
    /// Collector base URL, e.g. `http://localhost:4318`.
    pub otlp_endpoint: Option<String>,
}

impl LogSettings {
    fn effective_format(&self) -> LogFormat {
        match std::env::var("PEBBLE_LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("compact") => LogFormat::Compact,
            _ => self.format,
        }
    }

    fn effective_endpoint(&self) -> Option<String> {
        self.otlp_endpoint
            .clone()
            .or_else(|| std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok())
            .filter(|e| !e.trim().is_empty())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Install the global `tracing` subscriber, with span export when an OTLP
/// endpoint is configured.
///
/// The returned [`TracerProviderGuard`] must be held for the lifetime of the
/// process; dropping it flushes pending spans.
pub fn init_tracing(service_name: &str, settings: &LogSettings) -> TracerProviderGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let use_json = settings.effective_format() == LogFormat::Json;
    let provider = settings
        .effective_endpoint()
        .and_then(|endpoint| build_provider(service_name, endpoint));

    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("pebble")));

    let registry = tracing_subscriber::registry().with(env_filter).with(otel_layer);
    if use_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().compact())
            .init();
    }

    TracerProviderGuard(provider)
}

// ─────────────────────────────────────────────────────────────────────────────
// RAII guard
// ─────────────────────────────────────────────────────────────────────────────

/// Shuts the [`SdkTracerProvider`] down on drop, flushing pending spans.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("[pebble] trace provider shutdown error: {e}");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal helpers
// ─────────────────────────────────────────────────────────────────────────────

fn build_provider(service_name: &str, endpoint: String) -> Option<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[pebble] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            // The CLI starts its Tokio runtime after this call, so the batch
            // exporter (which spawns tasks) cannot be used.
            .with_simple_exporter(exporter)
            .build(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_parse_from_toml_section() {
        let settings: LogSettings =
            toml::from_str("format = \"json\"\notlp_endpoint = \"http://localhost:4318\"")
                .unwrap();
        assert_eq!(settings.format, LogFormat::Json);
        assert_eq!(
            settings.otlp_endpoint.as_deref(),
            Some("http://localhost:4318")
        );
        assert_eq!(
            toml::from_str::<LogSettings>("").unwrap(),
            LogSettings::default()
        );
    }

    #[test]
    fn blank_endpoint_disables_export() {
        // SAFETY: single-threaded test; no other thread reads this env-var.
        unsafe { std::env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT") };
        let settings = LogSettings {
            otlp_endpoint: Some("  ".to_string()),
            ..LogSettings::default()
        };
        assert_eq!(settings.effective_endpoint(), None);
        assert_eq!(LogSettings::default().effective_endpoint(), None);
    }

    #[test]
    fn guard_drop_with_none_is_safe() {
        let guard = TracerProviderGuard(None);
        assert!(!guard.is_exporting());
        drop(guard);
    }
}
