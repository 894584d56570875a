//! Request metrics for tonic servers.
//!
//! [`GrpcMetricsLayer`] is mounted once on the server and records every
//! RPC, taking the full method name from the request path and the status
//! code from the `grpc-status` header or trailer:
//!
//! ```ignore
//! Server::builder()
//!     .layer(telemetry.grpc_layer())
//!     .add_service(UsersServer::new(users))
//!     .serve(addr)
//!     .await?;
//! ```
//!
//! The per-handler wrappers ([`UnaryMetricsInterceptor`],
//! [`StreamMetricsInterceptor`]) record the same metrics from inside a
//! handler, for services that are not served through a layered tonic server.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::future::BoxFuture;
use futures::Stream;
use http_body::{Body, Frame, SizeHint};
use tonic::codegen::http;
use tonic::{Code, Response, Status};
use tower::{Layer, Service};

use crate::observability::metrics::rpc_attributes;
use crate::telemetry::Telemetry;

const GRPC_STATUS: &str = "grpc-status";

/// Layer that wraps a tonic server with [`GrpcMetricsService`].
#[derive(Clone, Debug)]
pub struct GrpcMetricsLayer {
    telemetry: Telemetry,
}

impl GrpcMetricsLayer {
    pub fn new(telemetry: Telemetry) -> Self {
        Self { telemetry }
    }
}

impl<S> Layer<S> for GrpcMetricsLayer {
    type Service = GrpcMetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GrpcMetricsService {
            inner,
            telemetry: self.telemetry.clone(),
        }
    }
}

/// Records one counter increment and one duration sample per RPC.
///
/// Trailers-only responses (how tonic reports most handler errors) are
/// recorded as soon as the headers arrive. Otherwise the response body is
/// wrapped in a [`MeteredBody`] and the RPC is recorded when its trailers
/// are read, with a missing `grpc-status` counted as `OK`.
#[derive(Clone, Debug)]
pub struct GrpcMetricsService<S> {
    inner: S,
    telemetry: Telemetry,
}

impl<S, ReqBody, ResBody> Service<http::Request<ReqBody>> for GrpcMetricsService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ResBody: Body + Unpin + Send + 'static,
{
    type Response = http::Response<MeteredBody<ResBody>>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<ReqBody>) -> Self::Future {
        let recorder = Recorder {
            telemetry: self.telemetry.clone(),
            full_method: req.uri().path().to_string(),
            start: Instant::now(),
        };
        let fut = self.inner.call(req);

        Box::pin(async move {
            match fut.await {
                Ok(response) => {
                    let trailers_only = grpc_status(response.headers());
                    Ok(response.map(|body| match trailers_only {
                        Some(code) => {
                            recorder.finish(code);
                            MeteredBody::recorded(body)
                        }
                        None => MeteredBody::new(body, recorder),
                    }))
                }
                Err(e) => {
                    recorder.finish(Code::Unknown);
                    Err(e)
                }
            }
        })
    }
}

/// Response body that records the RPC once its status is known.
///
/// Dropped before the trailers are read, the RPC counts as `CANCELLED`.
#[derive(Debug)]
pub struct MeteredBody<B> {
    inner: B,
    recorder: Option<Recorder>,
}

impl<B> MeteredBody<B> {
    fn new(inner: B, recorder: Recorder) -> Self {
        Self {
            inner,
            recorder: Some(recorder),
        }
    }

    fn recorded(inner: B) -> Self {
        Self {
            inner,
            recorder: None,
        }
    }

    fn finish(&mut self, code: Code) {
        if let Some(recorder) = self.recorder.take() {
            recorder.finish(code);
        }
    }
}

impl<B> Body for MeteredBody<B>
where
    B: Body + Unpin,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_frame(cx);

        match &poll {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(trailers) = frame.trailers_ref() {
                    this.finish(grpc_status(trailers).unwrap_or(Code::Ok));
                }
            }
            Poll::Ready(Some(Err(_))) => this.finish(Code::Unknown),
            Poll::Ready(None) => this.finish(Code::Ok),
            Poll::Pending => {}
        }

        poll
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B> Drop for MeteredBody<B> {
    fn drop(&mut self) {
        self.finish(Code::Cancelled);
    }
}

/// Status code carried in a `grpc-status` header or trailer.
fn grpc_status(headers: &http::HeaderMap) -> Option<Code> {
    let value = headers.get(GRPC_STATUS)?;
    let code = value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<i32>().ok())
        .map_or(Code::Unknown, Code::from_i32);
    Some(code)
}

/// Records request metrics around unary handlers.
#[derive(Clone, Debug)]
pub struct UnaryMetricsInterceptor {
    telemetry: Telemetry,
}

impl UnaryMetricsInterceptor {
    pub fn new(telemetry: Telemetry) -> Self {
        Self { telemetry }
    }

    /// Run `handler` and record its duration and status code.
    ///
    /// # Arguments
    ///
    /// * `full_method` - Full RPC name, e.g. `/pkg.Service/Method`
    /// * `handler` - The handler body
    pub async fn intercept<T, F>(&self, full_method: &str, handler: F) -> Result<Response<T>, Status>
    where
        F: Future<Output = Result<Response<T>, Status>>,
    {
        record_completion(&self.telemetry, full_method, handler).await
    }
}

/// Records request metrics around streaming handlers.
#[derive(Clone, Debug)]
pub struct StreamMetricsInterceptor {
    telemetry: Telemetry,
}

impl StreamMetricsInterceptor {
    pub fn new(telemetry: Telemetry) -> Self {
        Self { telemetry }
    }

    /// Run a server-streaming (or bidirectional) handler.
    ///
    /// A handler error is recorded immediately. Otherwise the returned stream
    /// records when it ends (`OK`), yields an error (that code), or is
    /// dropped before finishing (`CANCELLED`). The duration covers the whole
    /// session, from this call to the end of the stream.
    pub async fn intercept<S, T, F>(
        &self,
        full_method: &str,
        handler: F,
    ) -> Result<Response<MeteredStream<S>>, Status>
    where
        F: Future<Output = Result<Response<S>, Status>>,
        S: Stream<Item = Result<T, Status>> + Unpin,
    {
        let start = Instant::now();

        match handler.await {
            Ok(response) => {
                let (metadata, stream, extensions) = response.into_parts();
                let recorder = Recorder {
                    telemetry: self.telemetry.clone(),
                    full_method: full_method.to_string(),
                    start,
                };
                Ok(Response::from_parts(
                    metadata,
                    MeteredStream::new(stream, recorder),
                    extensions,
                ))
            }
            Err(status) => {
                self.telemetry
                    .record_request(start.elapsed(), &rpc_attributes(full_method, status.code()));
                Err(status)
            }
        }
    }

    /// Run a client-streaming handler.
    ///
    /// The session is over once the handler has consumed the inbound stream
    /// and produced its single response.
    pub async fn intercept_client_streaming<T, F>(
        &self,
        full_method: &str,
        handler: F,
    ) -> Result<Response<T>, Status>
    where
        F: Future<Output = Result<Response<T>, Status>>,
    {
        record_completion(&self.telemetry, full_method, handler).await
    }
}

async fn record_completion<T, F>(
    telemetry: &Telemetry,
    full_method: &str,
    handler: F,
) -> Result<Response<T>, Status>
where
    F: Future<Output = Result<Response<T>, Status>>,
{
    let start = Instant::now();
    let result = handler.await;

    let code = match &result {
        Ok(_) => Code::Ok,
        Err(status) => status.code(),
    };
    telemetry.record_request(start.elapsed(), &rpc_attributes(full_method, code));

    result
}

#[derive(Debug)]
struct Recorder {
    telemetry: Telemetry,
    full_method: String,
    start: Instant,
}

impl Recorder {
    fn finish(self, code: Code) {
        self.telemetry
            .record_request(self.start.elapsed(), &rpc_attributes(&self.full_method, code));
    }
}

/// Response stream that records request metrics exactly once.
#[derive(Debug)]
pub struct MeteredStream<S> {
    inner: S,
    recorder: Option<Recorder>,
}

impl<S> MeteredStream<S> {
    fn new(inner: S, recorder: Recorder) -> Self {
        Self {
            inner,
            recorder: Some(recorder),
        }
    }

    fn finish(&mut self, code: Code) {
        if let Some(recorder) = self.recorder.take() {
            recorder.finish(code);
        }
    }
}

impl<S, T> Stream for MeteredStream<S>
where
    S: Stream<Item = Result<T, Status>> + Unpin,
{
    type Item = Result<T, Status>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_next(cx);

        match &poll {
            Poll::Ready(None) => this.finish(Code::Ok),
            Poll::Ready(Some(Err(status))) => this.finish(status.code()),
            _ => {}
        }

        poll
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<S> Drop for MeteredStream<S> {
    fn drop(&mut self) {
        self.finish(Code::Cancelled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_grpc_status_parsing() {
        let mut headers = http::HeaderMap::new();
        assert_eq!(grpc_status(&headers), None);

        headers.insert(GRPC_STATUS, http::HeaderValue::from_static("5"));
        assert_eq!(grpc_status(&headers), Some(Code::NotFound));

        headers.insert(GRPC_STATUS, http::HeaderValue::from_static("bogus"));
        assert_eq!(grpc_status(&headers), Some(Code::Unknown));
    }

    #[tokio::test]
    async fn test_unary_passes_result_through() {
        let interceptor = UnaryMetricsInterceptor::new(Telemetry::disabled());

        let ok = interceptor
            .intercept("/pkg.Svc/Ok", async { Ok(Response::new(7_u32)) })
            .await
            .unwrap();
        assert_eq!(ok.into_inner(), 7);

        let err = interceptor
            .intercept::<u32, _>("/pkg.Svc/Err", async { Err(Status::not_found("nope")) })
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
    }

    #[tokio::test]
    async fn test_stream_yields_all_items() {
        let interceptor = StreamMetricsInterceptor::new(Telemetry::disabled());
        let items: Vec<Result<u32, Status>> = vec![Ok(1), Ok(2)];

        let response = interceptor
            .intercept("/pkg.Svc/List", async move {
                Ok(Response::new(tokio_stream::iter(items)))
            })
            .await
            .unwrap();

        let collected: Vec<u32> = response
            .into_inner()
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(collected, vec![1, 2]);
    }
}
