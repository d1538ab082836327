// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration
//!
//! Propagates trace context through message headers: the publisher injects the
//! current context, the consumer extracts it and opens a consumer span for the
//! delivery.

use crate::broker::Delivery;
use opentelemetry::{
    global::{self, BoxedSpan, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, Tracer},
    Context,
};
use std::{borrow::Cow, collections::BTreeMap};

/// Adapter letting OpenTelemetry read and write message headers.
pub(crate) struct HeaderPropagator<'a> {
    headers: &'a mut BTreeMap<String, String>,
}

impl<'a> HeaderPropagator<'a> {
    pub(crate) fn new(headers: &'a mut BTreeMap<String, String>) -> Self {
        Self { headers }
    }
}

impl Injector for HeaderPropagator<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.headers.insert(key.to_lowercase(), value);
    }
}

impl Extractor for HeaderPropagator<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(String::as_str).collect()
    }
}

/// Writes `ctx` into `headers` using the global text-map propagator.
pub(crate) fn inject(ctx: &Context, headers: &mut BTreeMap<String, String>) {
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(ctx, &mut HeaderPropagator::new(headers))
    });
}

/// Extracts the publisher's context from a delivery and starts a consumer span.
pub(crate) fn new_span(delivery: &Delivery, tracer: &BoxedTracer, name: &str) -> (Context, BoxedSpan) {
    let mut headers = delivery.headers.clone();
    let ctx = global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderPropagator::new(&mut headers))
    });

    let span = tracer
        .span_builder(Cow::from(name.to_owned()))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, &ctx);

    (ctx, span)
}
