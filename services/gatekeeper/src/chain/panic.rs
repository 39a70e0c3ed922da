//! Panic boundary around the whole router.
//!
//! A panic anywhere below this layer becomes the uniform internal-error
//! envelope; the connection task survives and the server keeps accepting.
//! Location and backtrace are logged by the process-wide hook installed in
//! `observability`.
use crate::api::error::internal_error;
use crate::observability::{PANICS_METRIC, panic_message};
use axum::response::{IntoResponse, Response};
use std::any::Any;
use tower_http::catch_panic::CatchPanicLayer;

pub type PanicResponder = fn(Box<dyn Any + Send + 'static>) -> Response;

/// Outermost layer; wraps routing, the chain and the handlers.
pub fn panic_boundary() -> CatchPanicLayer<PanicResponder> {
    CatchPanicLayer::custom(recover as PanicResponder)
}

/// Count and log the panic, then answer with the internal-error envelope.
pub fn recover(payload: Box<dyn Any + Send + 'static>) -> Response {
    metrics::counter!(PANICS_METRIC).increment(1);
    tracing::error!(
        panic.message = %panic_message(payload.as_ref()),
        "request panicked; answered with internal error"
    );
    internal_error().into_response()
}
