use serde_json::Value;

/// Observability sink for raw stream events the canonical model does not
/// recognize. Unknown provider event tags are never errors; they flow here so
/// new event types cannot break a conversion. Injected at chat construction,
/// defaulting to a no-op, so the engine carries no global mutable state.
pub trait StreamObserver: Send + Sync {
    fn on_unrecognized(&self, provider: &str, raw: &Value) {
        tracing::debug!(provider, %raw, "unrecognized stream event");
    }
}

#[derive(Debug, Default)]
pub struct NoopObserver;

impl StreamObserver for NoopObserver {}
