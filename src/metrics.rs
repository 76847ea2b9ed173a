// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the dnsman controller.
//!
//! All metrics carry the namespace prefix `dnsman_io_` (prometheus-safe
//! version of the API group "dnsman.io") and are served over the `/metrics`
//! endpoint.
//!
//! # Metrics Categories
//!
//! - **Reconciliation Metrics** - reconcile operations and their outcomes
//! - **Zone Metrics** - batched change application per hosted zone
//! - **Error Metrics** - error conditions by category
//! - **Leader Election Metrics** - leadership state changes

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;
use std::time::Duration;

/// Namespace prefix for all dnsman metrics (prometheus-safe)
const METRICS_NAMESPACE: &str = "dnsman_io";

/// Global Prometheus metrics registry
///
/// All metrics are registered in this registry and exposed via `/metrics`.
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Total number of reconciliations by resource type and status
///
/// Labels:
/// - `resource_type`: Kind of resource (e.g., `DNSEntry`, `DNSProvider`)
/// - `status`: Outcome (`success`, `error`)
pub static RECONCILIATION_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_reconciliations_total"),
        "Total number of reconciliations by resource type and status",
    );
    let counter = CounterVec::new(opts, &["resource_type", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of reconciliations in seconds
///
/// Labels:
/// - `resource_type`: Kind of resource
pub static RECONCILIATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_reconciliation_duration_seconds"),
        "Duration of reconciliations in seconds by resource type",
    )
    .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]);
    let histogram = HistogramVec::new(opts, &["resource_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

/// Total number of record-set changes submitted per zone and change kind
///
/// Labels:
/// - `zone`: Hosted zone id
/// - `kind`: `create`, `update` or `delete`
pub static ZONE_CHANGES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_zone_changes_total"),
        "Total number of record-set changes submitted by zone and kind",
    );
    let counter = CounterVec::new(opts, &["zone", "kind"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total number of change batches applied per zone
///
/// Labels:
/// - `zone`: Hosted zone id
pub static ZONE_APPLIES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_zone_applies_total"),
        "Total number of change batches applied by zone",
    );
    let counter = CounterVec::new(opts, &["zone"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Number of currently indexed entries
///
/// Labels:
/// - `kind`: `entry` or `lock`
pub static ENTRIES_ACTIVE: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_entries_active"),
        "Number of currently indexed entries by kind",
    );
    let gauge = GaugeVec::new(opts, &["kind"]).unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Total number of errors by resource type and error category
///
/// Labels:
/// - `resource_type`: Kind of resource
/// - `error_type`: Category of error (`api_error`, `provider_error`, `validation_error`)
pub static ERRORS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_errors_total"),
        "Total number of errors by resource type and error category",
    );
    let counter = CounterVec::new(opts, &["resource_type", "error_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Current leader election status
///
/// Labels:
/// - `pod_name`: Name of the pod
///
/// Value: 1 if leader, 0 if follower
pub static LEADER_STATUS: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_leader_status"),
        "Current leader election status (1 = leader, 0 = follower)",
    );
    let gauge = GaugeVec::new(opts, &["pod_name"]).unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Record a successful reconciliation
///
/// # Arguments
/// * `resource_type` - The kind of resource reconciled (e.g., `DNSEntry`)
/// * `duration` - Duration of the reconciliation
pub fn record_reconciliation_success(resource_type: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "success"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[resource_type])
        .observe(duration.as_secs_f64());
}

/// Record a failed reconciliation
///
/// # Arguments
/// * `resource_type` - The kind of resource reconciled
/// * `duration` - Duration of the reconciliation before failure
pub fn record_reconciliation_error(resource_type: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "error"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[resource_type])
        .observe(duration.as_secs_f64());
}

/// Record an error
///
/// # Arguments
/// * `resource_type` - The kind of resource where the error occurred
/// * `error_type` - Category of error (e.g., `api_error`, `provider_error`)
pub fn record_error(resource_type: &str, error_type: &str) {
    ERRORS_TOTAL
        .with_label_values(&[resource_type, error_type])
        .inc();
}

/// Record one zone change batch with its per-kind change counts
pub fn record_zone_changes(zone: &str, changes: &[crate::provider::Change]) {
    if changes.is_empty() {
        return;
    }
    ZONE_APPLIES_TOTAL.with_label_values(&[zone]).inc();
    for change in changes {
        let kind = match change {
            crate::provider::Change::Create { .. } => "create",
            crate::provider::Change::Update { .. } => "update",
            crate::provider::Change::Delete { .. } => "delete",
        };
        ZONE_CHANGES_TOTAL.with_label_values(&[zone, kind]).inc();
    }
}

/// Update the indexed entry gauge
pub fn set_entries_active(kind: &str, count: usize) {
    #[allow(clippy::cast_precision_loss)]
    ENTRIES_ACTIVE
        .with_label_values(&[kind])
        .set(count as f64);
}

/// Record leader election acquired
///
/// # Arguments
/// * `pod_name` - Name of the pod that acquired leadership
pub fn record_leader_elected(pod_name: &str) {
    LEADER_STATUS.with_label_values(&[pod_name]).set(1.0);
}

/// Record leader election lost
///
/// # Arguments
/// * `pod_name` - Name of the pod that lost leadership
pub fn record_leader_lost(pod_name: &str) {
    LEADER_STATUS.with_label_values(&[pod_name]).set(0.0);
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Errors
/// Returns error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_reconciliation_success() {
        record_reconciliation_success("TestResource", Duration::from_millis(500));

        let counter = RECONCILIATION_TOTAL.with_label_values(&["TestResource", "success"]);
        assert!(counter.get() > 0.0);

        let histogram = RECONCILIATION_DURATION_SECONDS.with_label_values(&["TestResource"]);
        assert!(histogram.get_sample_count() > 0);
    }

    #[test]
    fn test_record_zone_changes() {
        use crate::dns::{RecordSet, RecordType};
        use crate::provider::Change;

        let changes = vec![
            Change::Create {
                name: "www.example.com".to_string(),
                rset: RecordSet::from_values(RecordType::A, 300, ["1.2.3.4"]),
            },
            Change::Delete {
                name: "old.example.com".to_string(),
                rtype: RecordType::A,
            },
        ];
        record_zone_changes("test-zone", &changes);

        assert!(ZONE_APPLIES_TOTAL.with_label_values(&["test-zone"]).get() > 0.0);
        assert!(
            ZONE_CHANGES_TOTAL
                .with_label_values(&["test-zone", "create"])
                .get()
                > 0.0
        );
        assert!(
            ZONE_CHANGES_TOTAL
                .with_label_values(&["test-zone", "delete"])
                .get()
                > 0.0
        );
    }

    #[test]
    fn test_gather_metrics() {
        record_reconciliation_success("GatherTest", Duration::from_millis(100));

        let result = gather_metrics();
        assert!(result.is_ok(), "Gathering metrics should succeed");

        let metrics_text = result.unwrap();
        assert!(
            metrics_text.contains("dnsman_io"),
            "Metrics should contain namespace prefix"
        );
        assert!(
            metrics_text.contains("reconciliations_total"),
            "Metrics should contain reconciliation counter"
        );
    }
}
