//! HTTP request metrics as a tower layer.
//!
//! Every request passing through [`HttpMetricsLayer`] is counted and timed
//! with `method`, `path` and `status_code` attributes.

use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Instant;

use axum::http::{Request, Response, StatusCode};
use futures::future::BoxFuture;
use tower::{Layer, Service};

use crate::observability::metrics::http_attributes;
use crate::telemetry::Telemetry;

/// Write-once holder for the status committed to a response.
///
/// The middleware inserts one into each request's extensions. Handlers can
/// extract it (`Extension<StatusLatch>`) to commit a status before they
/// return; only the first commit is kept, and the response leaving the
/// middleware carries it.
#[derive(Clone, Debug, Default)]
pub struct StatusLatch {
    status: Arc<OnceLock<StatusCode>>,
}

impl StatusLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit `status`. Returns `false` if a status was already committed.
    pub fn commit(&self, status: StatusCode) -> bool {
        self.status.set(status).is_ok()
    }

    /// The committed status, if any.
    pub fn get(&self) -> Option<StatusCode> {
        self.status.get().copied()
    }

    /// The committed status, or `200 OK` when nothing was committed.
    pub fn status(&self) -> StatusCode {
        self.get().unwrap_or(StatusCode::OK)
    }
}

/// Layer that wraps a service with [`HttpMetricsService`].
#[derive(Clone, Debug)]
pub struct HttpMetricsLayer {
    telemetry: Telemetry,
}

impl HttpMetricsLayer {
    pub fn new(telemetry: Telemetry) -> Self {
        Self { telemetry }
    }
}

impl<S> Layer<S> for HttpMetricsLayer {
    type Service = HttpMetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HttpMetricsService {
            inner,
            telemetry: self.telemetry.clone(),
        }
    }
}

/// Records one counter increment and one duration sample per request.
#[derive(Clone, Debug)]
pub struct HttpMetricsService<S> {
    inner: S,
    telemetry: Telemetry,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for HttpMetricsService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let start = Instant::now();
        let method = req.method().to_string();
        let path = req.uri().path().to_string();

        let latch = StatusLatch::new();
        req.extensions_mut().insert(latch.clone());

        let telemetry = self.telemetry.clone();
        let fut = self.inner.call(req);

        Box::pin(async move {
            let result = fut.await;

            let status = match &result {
                Ok(response) => {
                    latch.commit(response.status());
                    latch.status()
                }
                Err(_) => latch.get().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            };

            telemetry.record_request(
                start.elapsed(),
                &http_attributes(&method, &path, status.as_u16()),
            );

            result.map(|mut response| {
                *response.status_mut() = status;
                response
            })
        })
    }
}
