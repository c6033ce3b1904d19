use std::collections::HashMap;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::Resource;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Resource attributes for one process: the binary, and the node it runs on if known.
fn process_resource(service_name: &str, node: Option<&str>) -> Resource {
    let mut attributes = vec![KeyValue::new("service.name", service_name.to_string())];
    attributes.extend(node.map(|n| KeyValue::new("host.name", n.to_string())));
    Resource::new(attributes)
}

/// Batch span exporter over OTLP/HTTP. `None` (with a message on stderr) when the
/// exporter cannot be built; logging then stays local.
fn otlp_provider(
    endpoint: &str,
    token: Option<&str>,
    resource: Resource,
) -> Option<TracerProvider> {
    let headers: HashMap<String, String> = token
        .filter(|t| !t.is_empty())
        .map(|t| ("Authorization".to_string(), format!("Bearer {t}")))
        .into_iter()
        .collect();

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .with_headers(headers)
        .build()
        .map_err(|err| eprintln!("OTLP exporter for {endpoint} unavailable ({err}); logging locally only"))
        .ok()?;

    Some(
        TracerProvider::builder()
            .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
            .with_resource(resource)
            .build(),
    )
}

/// Install the global subscriber: `RUST_LOG`-filtered (default `info`) fmt output, plus
/// span export when `otlp_endpoint` is set. Spans carry the node name so the launchers of
/// one job can be told apart.
///
/// The returned provider must outlive all tracing and be shut down before exit.
pub fn init_tracing(
    service_name: &str,
    node: Option<&str>,
    otlp_endpoint: Option<&str>,
    otlp_token: Option<&str>,
) -> Option<TracerProvider> {
    let endpoint = otlp_endpoint.filter(|e| !e.is_empty());
    let provider = endpoint.and_then(|e| {
        otlp_provider(e, otlp_token, process_resource(service_name, node))
    });
    let span_layer = provider.as_ref().map(|p| {
        tracing_opentelemetry::layer().with_tracer(p.tracer(service_name.to_string()))
    });

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(span_layer)
        .init();

    if provider.is_some() {
        tracing::info!(endpoint = endpoint.unwrap_or_default(), service_name, node, "exporting spans over OTLP");
    }
    provider
}
