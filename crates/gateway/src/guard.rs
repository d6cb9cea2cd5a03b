//! Failure isolation around handler execution.

use std::{future::Future, panic::AssertUnwindSafe};

use {
    axum::{
        http::StatusCode,
        response::{Html, IntoResponse, Response},
    },
    futures::FutureExt,
    switchyard_common::{
        OnPanic, PanicReport,
        panic::{deliver, install_backtrace_hook, panic_message, take_backtrace},
    },
    tracing::error,
};

/// What the guard knows about the request it protects.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    pub url: String,
    /// Request parameters serialized as JSON.
    pub params: String,
}

/// Outcome of a guarded execution.
#[derive(Debug)]
pub enum Guarded<T> {
    Ok(T),
    Failed(PanicReport),
}

impl<T> Guarded<T> {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Runs handlers so that a panic becomes a report instead of a dead task.
#[derive(Clone)]
pub struct PanicGuard {
    on_panic: OnPanic,
}

impl PanicGuard {
    pub fn new(on_panic: OnPanic) -> Self {
        install_backtrace_hook();
        Self { on_panic }
    }

    /// Build the future with `make` and drive it to completion, catching any
    /// panic raised while building or polling it.
    ///
    /// A caught panic is reported to the operator callback exactly once. A
    /// panic inside a nested guard is handled by that guard and never
    /// reaches this one.
    pub async fn run<M, F, T>(&self, info: RequestInfo, make: M) -> Guarded<T>
    where
        M: FnOnce() -> F,
        F: Future<Output = T>,
    {
        match AssertUnwindSafe(async move { make().await }).catch_unwind().await {
            Ok(value) => Guarded::Ok(value),
            Err(payload) => {
                // Same poll as the panic, so the hook's backtrace is ours.
                let report = PanicReport {
                    message: panic_message(payload.as_ref()),
                    url: info.url,
                    params: info.params,
                    stack: take_backtrace(),
                };
                error!(url = %report.url, message = %report.message, "handler panicked");
                deliver(&self.on_panic, &report);
                Guarded::Failed(report)
            },
        }
    }
}

/// Generic 500 page returned after an HTML handler fails.
pub fn html_error_page() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(
            "<!doctype html><html><head><title>Server error</title></head>\
             <body><h1>Something went wrong</h1><p>The error has been reported.</p></body></html>",
        ),
    )
        .into_response()
}
