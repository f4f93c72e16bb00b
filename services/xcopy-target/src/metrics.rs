// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Prometheus metrics for the storage target
//!
//! Exports:
//! - Objects and bytes copied, by xaction kind
//! - Objects and bytes received from peers
//! - Errors by type
//! - Finished xactions by outcome

use prometheus::{Counter, CounterVec, Opts, Registry, TextEncoder};

// Static metric definitions cannot fail short of a programming error (an
// invalid name), so construction panics at startup.
#[allow(clippy::expect_used)]
mod metrics_impl {
    use super::*;
    use lazy_static::lazy_static;

    lazy_static! {
        /// Registry for all target metrics
        pub static ref REGISTRY: Registry = Registry::new();

        pub static ref OBJECTS_TOTAL: CounterVec = CounterVec::new(
            Opts::new("xcopy_objects_total", "Objects copied or transformed, by xaction kind"),
            &["kind"]
        ).expect("valid metric name and labels");

        pub static ref BYTES_TOTAL: CounterVec = CounterVec::new(
            Opts::new("xcopy_bytes_total", "Bytes copied or transformed, by xaction kind"),
            &["kind"]
        ).expect("valid metric name and labels");

        pub static ref RECV_OBJECTS_TOTAL: Counter = Counter::with_opts(
            Opts::new("xcopy_recv_objects_total", "Objects received from peers")
        ).expect("valid metric name");

        pub static ref RECV_BYTES_TOTAL: Counter = Counter::with_opts(
            Opts::new("xcopy_recv_bytes_total", "Bytes received from peers")
        ).expect("valid metric name");

        pub static ref ERRORS_TOTAL: CounterVec = CounterVec::new(
            Opts::new("xcopy_errors_total", "Errors by type"),
            &["error_type"]
        ).expect("valid metric name and labels");

        pub static ref XACTIONS_TOTAL: CounterVec = CounterVec::new(
            Opts::new("xcopy_xactions_total", "Finished xactions by outcome"),
            &["outcome"]
        ).expect("valid metric name and labels");
    }
}

pub use metrics_impl::{
    BYTES_TOTAL, ERRORS_TOTAL, OBJECTS_TOTAL, RECV_BYTES_TOTAL, RECV_OBJECTS_TOTAL, REGISTRY,
    XACTIONS_TOTAL,
};

/// Register all metrics with the registry
///
/// Should be called once during application startup.
/// Panics if registration fails (indicates a programming error).
#[allow(clippy::expect_used)]
pub fn register_metrics() {
    REGISTRY
        .register(Box::new(OBJECTS_TOTAL.clone()))
        .expect("Failed to register OBJECTS_TOTAL");
    REGISTRY
        .register(Box::new(BYTES_TOTAL.clone()))
        .expect("Failed to register BYTES_TOTAL");
    REGISTRY
        .register(Box::new(RECV_OBJECTS_TOTAL.clone()))
        .expect("Failed to register RECV_OBJECTS_TOTAL");
    REGISTRY
        .register(Box::new(RECV_BYTES_TOTAL.clone()))
        .expect("Failed to register RECV_BYTES_TOTAL");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("Failed to register ERRORS_TOTAL");
    REGISTRY
        .register(Box::new(XACTIONS_TOTAL.clone()))
        .expect("Failed to register XACTIONS_TOTAL");
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

/// Record an object copied (or sent) by an xaction of `kind`
pub fn record_object(kind: &str, bytes: u64) {
    OBJECTS_TOTAL.with_label_values(&[kind]).inc();
    BYTES_TOTAL.with_label_values(&[kind]).inc_by(bytes as f64);
}

/// Record an object received from a peer and written locally
pub fn record_recv(bytes: u64) {
    RECV_OBJECTS_TOTAL.inc();
    RECV_BYTES_TOTAL.inc_by(bytes as f64);
}

pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Record an xaction reaching its terminal state
pub fn record_xaction(outcome: &str) {
    XACTIONS_TOTAL.with_label_values(&[outcome]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_object() {
        let before = OBJECTS_TOTAL.with_label_values(&["copy-objects"]).get();
        let before_bytes = BYTES_TOTAL.with_label_values(&["copy-objects"]).get();

        record_object("copy-objects", 512);

        // Other tests run in parallel; only a lower bound holds.
        assert!(OBJECTS_TOTAL.with_label_values(&["copy-objects"]).get() - before >= 1.0);
        assert!(BYTES_TOTAL.with_label_values(&["copy-objects"]).get() - before_bytes >= 512.0);
    }

    #[test]
    fn test_record_recv_and_errors() {
        let before = RECV_BYTES_TOTAL.get();
        let before_errors = ERRORS_TOTAL.with_label_values(&["storage"]).get();

        record_recv(100);
        record_error("storage");

        assert!(RECV_BYTES_TOTAL.get() - before >= 100.0);
        assert!(ERRORS_TOTAL.with_label_values(&["storage"]).get() - before_errors >= 1.0);
    }

    #[test]
    fn test_gather_metrics() {
        // Registration may already have happened in another test.
        let _ = std::panic::catch_unwind(register_metrics);
        record_xaction("completed");

        let output = gather_metrics();
        assert!(output.contains("xcopy_xactions_total"));
    }
}
