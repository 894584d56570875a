//! Outbound HTTP with trace context propagation.
//!
//! Requests sent through [`HttpClient`] carry trace context in their
//! headers, encoded by the process-wide propagator. A client bound to a
//! [`Telemetry`] wraps each request in a `CLIENT` span and propagates that
//! span; an unbound client propagates the caller's context as-is. No
//! metrics are recorded for outbound calls.

use std::time::Duration;

use opentelemetry::propagation::Injector;
use opentelemetry::trace::{SpanKind, Status, TraceContextExt};
use opentelemetry::{global, Context, KeyValue};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::Result;
use crate::observability::trace::SpanOptions;
use crate::telemetry::Telemetry;

/// Timeout applied to every outbound request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

pub const ATTR_HTTP_REQUEST_METHOD: &str = "http.request.method";
pub const ATTR_URL_FULL: &str = "url.full";
pub const ATTR_HTTP_RESPONSE_STATUS_CODE: &str = "http.response.status_code";

/// A reusable client that propagates trace context.
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    telemetry: Option<Telemetry>,
}

impl HttpClient {
    /// Build a client with the default request timeout.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self::with_client(client))
    }

    /// Wrap an existing client, keeping its own settings.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            telemetry: None,
        }
    }

    /// Record a client span per request with `telemetry`'s tracer.
    ///
    /// Until tracing is set up on `telemetry` the spans are no-ops and the
    /// caller's context is propagated unchanged.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// The underlying client, for building requests.
    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }

    /// Inject trace context into the request headers and send it.
    ///
    /// With a bound [`Telemetry`], a `CLIENT` span named after the HTTP
    /// method is started as a child of `cx` and its context is injected. The
    /// span ends once the response headers arrive, carrying the response
    /// status code; 4xx/5xx responses and transport failures mark it as an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`crate::TelemetryError::Request`] on transport failure.
    /// Non-2xx responses are returned as-is.
    pub async fn execute(&self, cx: &Context, mut request: reqwest::Request) -> Result<reqwest::Response> {
        let Some(telemetry) = &self.telemetry else {
            inject_context(cx, request.headers_mut());
            return Ok(self.client.execute(request).await?);
        };

        let cx = telemetry.start_span_with(cx, client_span_options(&request));
        inject_context(&cx, request.headers_mut());

        let result = self.client.execute(request).await;

        let span = cx.span();
        match &result {
            Ok(response) => {
                let status = response.status();
                span.set_attribute(KeyValue::new(
                    ATTR_HTTP_RESPONSE_STATUS_CODE,
                    i64::from(status.as_u16()),
                ));
                if status.is_client_error() || status.is_server_error() {
                    span.set_status(Status::error(status.to_string()));
                }
            }
            Err(e) => {
                span.record_error(e);
                span.set_status(Status::error(e.to_string()));
            }
        }
        span.end();

        Ok(result?)
    }
}

fn client_span_options(request: &reqwest::Request) -> SpanOptions {
    let method = request.method().as_str().to_string();
    SpanOptions::named(method.clone())
        .with_kind(SpanKind::Client)
        .with_attributes([
            KeyValue::new(ATTR_HTTP_REQUEST_METHOD, method),
            KeyValue::new(ATTR_URL_FULL, request.url().to_string()),
        ])
}

/// Send one request with trace context propagation on a fresh client.
pub async fn do_request(cx: &Context, request: reqwest::Request) -> Result<reqwest::Response> {
    HttpClient::new()?.execute(cx, request).await
}

/// Write `cx` into `headers` using the process-wide propagator.
pub fn inject_context(cx: &Context, headers: &mut HeaderMap) {
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(cx, &mut HeaderInjector(headers));
    });
}

struct HeaderInjector<'a>(&'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        let Ok(name) = HeaderName::from_bytes(key.as_bytes()) else {
            return;
        };
        let Ok(value) = HeaderValue::from_str(&value) else {
            return;
        };
        self.0.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::propagation::TextMapPropagator;
    use opentelemetry::trace::{
        SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState,
    };
    use opentelemetry_sdk::propagation::TraceContextPropagator;

    const TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
    const SPAN_ID: &str = "00f067aa0ba902b7";

    fn remote_context() -> Context {
        let span_context = SpanContext::new(
            TraceId::from_hex(TRACE_ID).unwrap(),
            SpanId::from_hex(SPAN_ID).unwrap(),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        );
        Context::new().with_remote_span_context(span_context)
    }

    #[test]
    fn test_header_injector_writes_traceparent() {
        let mut headers = HeaderMap::new();
        TraceContextPropagator::new()
            .inject_context(&remote_context(), &mut HeaderInjector(&mut headers));

        let traceparent = headers.get("traceparent").unwrap().to_str().unwrap();
        assert_eq!(traceparent, format!("00-{TRACE_ID}-{SPAN_ID}-01"));
    }

    #[test]
    fn test_header_injector_skips_invalid_values() {
        let mut headers = HeaderMap::new();
        HeaderInjector(&mut headers).set("bad header", "v".into());
        HeaderInjector(&mut headers).set("x-ok", "line\nbreak".into());
        assert!(headers.is_empty());
    }

    #[test]
    fn test_client_builds() {
        let client = HttpClient::new().unwrap();
        let request = client.inner().get("http://localhost/").build().unwrap();
        assert_eq!(request.method(), reqwest::Method::GET);
    }
}
