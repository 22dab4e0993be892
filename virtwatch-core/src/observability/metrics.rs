//! Core metrics definitions.
//!
//! All metrics follow Prometheus naming conventions:
//! - `_total` suffix for counters
//! - `_seconds` suffix for histograms measuring duration
//!
//! Without an installed recorder every call is a no-op.

use crate::types::{DomainEvent, DomainField, EventKind};
use metrics::{counter, describe_counter, describe_histogram, histogram};

/// Register all core metrics with descriptions.
pub fn register_core_metrics() {
    // Snapshot metrics
    describe_counter!(
        "virtwatch_snapshot_passes_total",
        "Total number of aggregation passes (by outcome: ok, list_failed)"
    );
    describe_histogram!("virtwatch_snapshot_duration_seconds", "Duration of one aggregation pass");
    describe_counter!(
        "virtwatch_domains_skipped_total",
        "Domains left out of a snapshot (by failing field)"
    );
    describe_counter!(
        "virtwatch_volume_capacity_failures_total",
        "Disk volumes whose capacity could not be read"
    );

    // API metrics
    describe_counter!(
        "virtwatch_api_requests_total",
        "Total number of API requests (by endpoint, status)"
    );
    describe_counter!("virtwatch_ws_messages_total", "VM snapshots sent over WebSocket");

    // Event metrics
    describe_counter!(
        "virtwatch_events_total",
        "Hypervisor events received (by kind, action)"
    );
    describe_counter!(
        "virtwatch_subscription_failures_total",
        "Event subscriptions that could not be registered (by kind)"
    );
}

pub fn record_snapshot_pass(ok: bool, duration_secs: f64) {
    let outcome = if ok { "ok" } else { "list_failed" };
    counter!("virtwatch_snapshot_passes_total", "outcome" => outcome).increment(1);
    histogram!("virtwatch_snapshot_duration_seconds").record(duration_secs);
}

pub fn record_domain_skipped(field: DomainField) {
    counter!("virtwatch_domains_skipped_total", "field" => field.as_str()).increment(1);
}

pub fn record_volume_capacity_failure() {
    counter!("virtwatch_volume_capacity_failures_total").increment(1);
}

pub fn record_api_request(endpoint: &'static str, status: u16) {
    counter!(
        "virtwatch_api_requests_total",
        "endpoint" => endpoint,
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_ws_message() {
    counter!("virtwatch_ws_messages_total").increment(1);
}

pub fn record_event(event: &DomainEvent) {
    let action = match event {
        DomainEvent::Lifecycle { event, .. } => event.action(),
        DomainEvent::BlockJob { job, .. } => job.status_name(),
    };
    counter!("virtwatch_events_total", "kind" => event.kind().as_str(), "action" => action)
        .increment(1);
}

pub fn record_subscription_failure(kind: EventKind) {
    counter!("virtwatch_subscription_failures_total", "kind" => kind.as_str()).increment(1);
}
