use crate::nats::traits::MessageHeaders;
use opentelemetry::{
    global,
    propagation::{Extractor, Injector},
    Context,
};
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// W3C Trace Context header names
pub const TRACEPARENT: &str = "traceparent";
pub const TRACESTATE: &str = "tracestate";

struct HeaderInjector<'a>(&'a mut MessageHeaders);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key.to_string(), value);
    }
}

struct HeaderExtractor<'a>(&'a MessageHeaders);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

/// Inject the current span's trace context into outgoing headers.
///
/// Uses W3C Trace Context format (traceparent, tracestate headers).
pub fn inject_trace_context(headers: &mut MessageHeaders) {
    global::get_text_map_propagator(|propagator| {
        let ctx = tracing::Span::current().context();
        propagator.inject_context(&ctx, &mut HeaderInjector(headers));
    });
}

pub fn extract_trace_context(headers: &MessageHeaders) -> Context {
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)))
}

/// Link `span` to the trace that published the message
pub fn set_parent_from_headers(span: &tracing::Span, headers: &MessageHeaders) {
    if headers.is_empty() {
        return;
    }
    span.set_parent(extract_trace_context(headers));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inject_without_propagator_does_not_panic() {
        let mut headers = MessageHeaders::new();
        inject_trace_context(&mut headers);
    }

    #[test]
    fn test_set_parent_handles_empty_headers() {
        let headers = MessageHeaders::new();
        set_parent_from_headers(&tracing::Span::current(), &headers);
    }

    #[test]
    fn test_extractor_reads_traceparent() {
        let mut headers = MessageHeaders::new();
        headers.insert(
            TRACEPARENT.to_string(),
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01".to_string(),
        );

        let extractor = HeaderExtractor(&headers);
        let value = extractor.get(TRACEPARENT);
        assert!(value.is_some_and(|v| v.starts_with("00-")));
        assert_eq!(extractor.keys(), vec![TRACEPARENT]);
    }
}
