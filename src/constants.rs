// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the dnsman controller.
//!
//! This module contains all numeric and string constants used throughout the
//! codebase. Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// API group for all dnsman CRDs
pub const API_GROUP: &str = "dnsman.io";

/// API version for all dnsman CRDs
pub const API_VERSION: &str = "v1alpha1";

/// Fully qualified API version (group/version)
pub const API_GROUP_VERSION: &str = "dnsman.io/v1alpha1";

/// Kind name for `DNSEntry` resource
pub const KIND_DNS_ENTRY: &str = "DNSEntry";

/// Kind name for `DNSProvider` resource
pub const KIND_DNS_PROVIDER: &str = "DNSProvider";

/// Kind name for `DNSOwner` resource
pub const KIND_DNS_OWNER: &str = "DNSOwner";

/// Kind name for `DNSLock` resource
pub const KIND_DNS_LOCK: &str = "DNSLock";

// ============================================================================
// DNS Record Constants
// ============================================================================

/// Default TTL for managed DNS records (5 minutes)
pub const DEFAULT_DNS_RECORD_TTL_SECS: i64 = 300;

// ============================================================================
// Reconciliation Constants
// ============================================================================

/// Requeue duration for controller errors (30 seconds)
pub const ERROR_REQUEUE_DURATION_SECS: u64 = 30;

/// Periodic resync interval for settled resources (10 minutes)
pub const SYNC_PERIOD_SECS: u64 = 600;

/// Requeue delay used for an immediate repeat after a premise change
pub const REPEAT_REQUEUE_SECS: u64 = 1;

/// Window during which recently-mutated entries defer their zone batch,
/// so bursts of changes land in a single provider call
pub const ZONE_BLOCKING_WINDOW_SECS: u64 = 2;

/// Period of the background DNS-lock lookup refresh
pub const LOCK_REFRESH_INTERVAL_SECS: u64 = 30;

/// Refresh interval applied to resolved hostname targets when the entry
/// does not declare one
pub const DEFAULT_CNAME_LOOKUP_INTERVAL_SECS: i64 = 600;

/// Bounded number of re-read attempts after a status write conflict
pub const MAX_STATUS_CONFLICT_RETRIES: usize = 3;

// ============================================================================
// Leader Election Constants
// ============================================================================

/// Default leader election lease duration (15 seconds)
pub const DEFAULT_LEASE_DURATION_SECS: u64 = 15;

/// Default leader election retry period (2 seconds)
pub const DEFAULT_LEASE_RETRY_PERIOD_SECS: u64 = 2;

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

// ============================================================================
// Metrics Server Constants
// ============================================================================

/// Port for Prometheus metrics HTTP server
pub const METRICS_SERVER_PORT: u16 = 8080;

/// Path for Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";

/// Bind address for metrics HTTP server
pub const METRICS_SERVER_BIND_ADDRESS: &str = "0.0.0.0";
