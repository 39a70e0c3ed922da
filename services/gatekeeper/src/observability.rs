//! Observability wiring for the gatekeeper service.
//!
//! # Purpose
//! Initializes tracing, the Prometheus metrics recorder and its listener, and
//! the process-wide panic hook that logs panics with a captured backtrace.
//!
//! # Notes
//! Initialization is guarded by `OnceLock` to keep startup idempotent in tests.
use metrics_exporter_prometheus::PrometheusBuilder;
use metrics_exporter_prometheus::PrometheusHandle;
use std::any::Any;
use std::backtrace::Backtrace;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static OBS_INIT: OnceLock<()> = OnceLock::new();
static PANIC_HOOK: OnceLock<()> = OnceLock::new();

pub const PANICS_METRIC: &str = "warden_panics_total";

pub fn init_observability(service_name: &str) -> PrometheusHandle {
    OBS_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let fmt_layer = tracing_subscriber::fmt::layer();
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init();
        tracing::debug!(service = service_name, "tracing initialized");
    });
    install_panic_hook();
    install_metrics_recorder()
}

/// Route panics through `tracing` with location and a forced backtrace. The
/// default hook is replaced, so nothing is printed to stderr twice.
pub fn install_panic_hook() {
    PANIC_HOOK.get_or_init(|| {
        std::panic::set_hook(Box::new(|info| {
            let backtrace = Backtrace::force_capture();
            let location = info
                .location()
                .map(|location| location.to_string())
                .unwrap_or_else(|| "<unknown>".to_string());
            tracing::error!(
                panic.message = %panic_message(info.payload()),
                panic.location = %location,
                backtrace = %backtrace,
                "panic in request processing"
            );
        }));
    });
}

pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

pub const METRICS_PATH: &str = "/metrics";

/// Router exposing the Prometheus text rendering of `handle`.
pub fn metrics_router(handle: PrometheusHandle) -> axum::Router {
    axum::Router::new().route(
        METRICS_PATH,
        axum::routing::get(move || async move { handle.render() }),
    )
}

/// Serve the metrics router on its own listener until the task is aborted.
pub async fn serve_metrics(handle: PrometheusHandle, listener: TcpListener) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "metrics listening");
    }
    axum::serve(listener, metrics_router(handle).into_make_service()).await
}

fn install_metrics_recorder() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => handle,
            Err(err) => {
                // Another recorder owns the process; render from a detached one.
                tracing::warn!(error = %err, "metrics recorder already installed");
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serial_test::serial;
    use tower::ServiceExt;

    #[test]
    fn panic_message_handles_payload_types() {
        let from_str: Box<dyn Any + Send> = Box::new("boom");
        let from_string: Box<dyn Any + Send> = Box::new(String::from("bang"));
        let other: Box<dyn Any + Send> = Box::new(42_u32);
        assert_eq!(panic_message(from_str.as_ref()), "boom");
        assert_eq!(panic_message(from_string.as_ref()), "bang");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }

    #[tokio::test]
    #[serial]
    async fn repeated_init_reuses_the_recorder() {
        let first = init_observability("gatekeeper-test");
        let second = init_observability("gatekeeper-test");
        let _ = (first.render(), second.render());
    }

    fn explode() -> u32 {
        panic!("hook smoke test")
    }

    #[test]
    #[serial]
    fn panic_hook_survives_caught_panic() {
        install_panic_hook();
        assert!(std::panic::catch_unwind(explode).is_err());
        install_panic_hook();
    }

    #[tokio::test]
    #[serial]
    async fn metrics_route_renders_prometheus_text() {
        let handle = init_observability("gatekeeper-metrics-test");
        let response = metrics_router(handle)
            .oneshot(
                Request::builder()
                    .uri(METRICS_PATH)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("infallible router");
        assert_eq!(response.status(), StatusCode::OK);

        let missing = metrics_router(install_metrics_recorder())
            .oneshot(
                Request::builder()
                    .uri("/other")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("infallible router");
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
