// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration
//!
//! Span helpers for the adapter's instrumented call sites: connection open,
//! ack, and reject. Spans are emitted through the global tracer so the hosting
//! framework decides where they go.

use crate::errors::AmqpError;
use opentelemetry::{
    global::{self, BoxedSpan},
    trace::{Span, SpanKind, Status, Tracer},
    KeyValue,
};
use std::borrow::Cow;

/// Starts a client span for a broker round-trip.
pub(crate) fn start_span(name: &'static str, attributes: Vec<KeyValue>) -> BoxedSpan {
    let tracer = global::tracer("rabbitmq-source");

    tracer
        .span_builder(name)
        .with_kind(SpanKind::Client)
        .with_attributes(attributes)
        .start(&tracer)
}

/// Ends a span with OK status.
pub(crate) fn end_ok(mut span: BoxedSpan) {
    span.set_status(Status::Ok);
    span.end();
}

/// Records the error on the span and ends it with error status.
pub(crate) fn end_error(span: &mut BoxedSpan, err: &AmqpError) {
    span.record_error(err);
    span.set_status(Status::Error {
        description: Cow::from(err.to_string()),
    });
    span.end();
}
