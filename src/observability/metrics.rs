//! Metrics collection.
//!
//! # Metrics
//! - `transport_requests_total` (counter): completed `handle` calls by outcome
//! - `transport_request_duration_seconds` (histogram): time to response head
//! - `transport_aborts_total` (counter): requests settled by their abort signal
//! - `transport_connections_opened_total` (counter): new sockets by protocol
//! - `transport_connections_reused_total` (counter): idle sockets reused
//!
//! # Design Decisions
//! - Labels are low-cardinality (outcome, protocol)
//! - Recording is a no-op until the application installs a recorder

use std::time::Instant;

use crate::error::TransportError;
use crate::http::request::Protocol;

pub fn record_request(result: Result<u16, &TransportError>, start: Instant) {
    let outcome = match result {
        Ok(_) => "completed",
        Err(e) => e.name(),
    };
    metrics::counter!("transport_requests_total", "outcome" => outcome).increment(1);
    metrics::histogram!("transport_request_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_abort() {
    metrics::counter!("transport_aborts_total").increment(1);
}

pub fn record_connection_opened(protocol: Protocol) {
    let protocol = match protocol {
        Protocol::Http => "http",
        Protocol::Https => "https",
    };
    metrics::counter!("transport_connections_opened_total", "protocol" => protocol).increment(1);
}

pub fn record_connection_reused() {
    metrics::counter!("transport_connections_reused_total").increment(1);
}
