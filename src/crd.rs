// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for DNS management.
//!
//! This module defines all Kubernetes Custom Resource Definitions used by
//! dnsman to manage DNS records on external hosting providers declaratively.
//!
//! # Resource Types
//!
//! - [`DNSEntry`] - one desired DNS record set on a hosted zone
//! - [`DNSProvider`] - a credentialed connection to a DNS back-end
//! - [`DNSOwner`] - an owner-id switch gating which entries are managed
//! - [`DNSLock`] - a TXT-record-based cross-cluster mutual exclusion primitive
//!
//! # Example: Creating a DNS Entry
//!
//! ```rust,no_run
//! use dnsman::crd::DNSEntrySpec;
//!
//! let spec = DNSEntrySpec {
//!     dns_name: "www.example.com".to_string(),
//!     targets: vec!["1.2.3.4".to_string()],
//!     text: vec![],
//!     ttl: Some(300),
//!     owner_id: None,
//!     provider_type: None,
//!     cname_lookup_interval: None,
//! };
//! ```

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reference to a Kubernetes secret holding provider credentials.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    /// Name of the secret.
    pub name: String,

    /// Namespace of the secret; defaults to the provider's namespace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Include/exclude selection of domains or zone ids.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    /// Included names; empty means everything the provider offers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,

    /// Excluded names; exclusion always wins over inclusion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

/// `DNSEntry` declares one DNS record set that should exist on a hosted zone
/// of some provider.
///
/// The controller resolves the responsible provider and zone from the DNS
/// name, claims the name (the earliest entry wins a contested name), writes
/// the record set through the provider back-end and maintains it until the
/// entry is deleted.
///
/// # Example
///
/// ```yaml
/// apiVersion: dnsman.io/v1alpha1
/// kind: DNSEntry
/// metadata:
///   name: www
///   namespace: default
/// spec:
///   dnsName: www.example.com
///   targets:
///   - 1.2.3.4
///   ttl: 300
/// ```
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "dnsman.io",
    version = "v1alpha1",
    kind = "DNSEntry",
    namespaced,
    status = "DNSEntryStatus",
    shortname = "dnse",
    doc = "DNSEntry declares a DNS record set to be maintained on an external DNS hosting provider.",
    printcolumn = r#"{"name":"DNS","type":"string","jsonPath":".spec.dnsName"}"#,
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".status.providerType"}"#,
    printcolumn = r#"{"name":"Provider","type":"string","jsonPath":".status.provider"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DNSEntrySpec {
    /// Fully qualified DNS name of the record set.
    pub dns_name: String,

    /// Target values: IPv4 addresses become an A set, IPv6 addresses an
    /// AAAA set and a hostname a CNAME. Multiple hostname targets are
    /// resolved to addresses when a lookup interval is set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,

    /// Text values for a TXT record set; mutually exclusive with targets.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub text: Vec<String>,

    /// TTL in seconds; the provider's default TTL applies when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,

    /// Owner id this entry belongs to; entries with an owner id outside the
    /// active owner set are observed but not managed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,

    /// Restrict provider resolution to this provider type code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_type: Option<String>,

    /// Refresh interval in seconds for resolving hostname targets to
    /// addresses through the resolver.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cname_lookup_interval: Option<i64>,
}

/// `DNSEntry` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DNSEntryStatus {
    /// One of `pending`, `ready`, `error`, `invalid`, `stale`, `deleting`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// Human-readable explanation of the current state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Object name of the provider the entry is bound to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Type code of the bound provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_type: Option<String>,

    /// Hosted zone id the entry is bound to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,

    /// Target values last written to the provider.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,

    /// TTL last written to the provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,

    /// Time of the last successful provider write (RFC3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// `DNSProvider` connects the controller to one DNS hosting back-end.
///
/// The referenced secret carries the vendor credentials; the type code
/// selects the adapter. Domain and zone selections scope which names this
/// provider is responsible for.
///
/// # Example
///
/// ```yaml
/// apiVersion: dnsman.io/v1alpha1
/// kind: DNSProvider
/// metadata:
///   name: account-one
///   namespace: default
/// spec:
///   type: in-memory
///   secretRef:
///     name: account-one-credentials
///   domains:
///     include:
///     - example.com
/// ```
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "dnsman.io",
    version = "v1alpha1",
    kind = "DNSProvider",
    namespaced,
    status = "DNSProviderStatus",
    shortname = "dnspr",
    doc = "DNSProvider holds the credentials and scoping for one external DNS hosting back-end.",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DNSProviderSpec {
    /// Provider type code (e.g. `aws-route53`, `google-clouddns`,
    /// `in-memory`).
    pub r#type: String,

    /// Secret holding the vendor credentials.
    pub secret_ref: SecretReference,

    /// Domain scoping for entry-to-provider matching.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domains: Option<Selection>,

    /// Hosted zone scoping by zone id or domain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zones: Option<Selection>,

    /// TTL applied to entries that do not declare one.
    #[serde(rename = "defaultTTL", skip_serializing_if = "Option::is_none")]
    pub default_ttl: Option<i64>,
}

/// `DNSProvider` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DNSProviderStatus {
    /// One of `pending`, `ready`, `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Domains this provider is effectively responsible for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domains: Option<Selection>,

    /// Hosted zone ids observed on the back-end.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zones: Option<Selection>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// `DNSOwner` switches a set of entries (by owner id) on or off for the
/// local controller.
///
/// # Example
///
/// ```yaml
/// apiVersion: dnsman.io/v1alpha1
/// kind: DNSOwner
/// metadata:
///   name: cluster-blue
///   namespace: default
/// spec:
///   ownerId: blue
///   active: true
/// ```
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "dnsman.io",
    version = "v1alpha1",
    kind = "DNSOwner",
    namespaced,
    status = "DNSOwnerStatus",
    shortname = "dnso",
    doc = "DNSOwner activates or deactivates management of all DNSEntries carrying an owner id.",
    printcolumn = r#"{"name":"OwnerId","type":"string","jsonPath":".spec.ownerId"}"#,
    printcolumn = r#"{"name":"Active","type":"boolean","jsonPath":".spec.active"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DNSOwnerSpec {
    /// The owner id asserted by this object.
    pub owner_id: String,

    /// Whether entries with this owner id are managed; defaults to true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

/// `DNSOwner` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DNSOwnerStatus {
    /// Number of indexed entries carrying this owner id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<i64>,
}

/// `DNSLock` owns a coordination TXT record with timestamp-based conflict
/// resolution, providing coarse mutual exclusion across clusters.
///
/// # Example
///
/// ```yaml
/// apiVersion: dnsman.io/v1alpha1
/// kind: DNSLock
/// metadata:
///   name: failover-lock
///   namespace: default
/// spec:
///   dnsName: lock.example.com
///   lockId: cluster-blue
///   ttl: 60
///   timestamp: 1700000000
///   attributes:
///     leader: node-1
/// ```
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "dnsman.io",
    version = "v1alpha1",
    kind = "DNSLock",
    namespaced,
    status = "DNSLockStatus",
    shortname = "dnsl",
    doc = "DNSLock owns a TXT record used as a distributed coordination primitive with timestamp-based conflict resolution.",
    printcolumn = r#"{"name":"DNS","type":"string","jsonPath":".spec.dnsName"}"#,
    printcolumn = r#"{"name":"LockId","type":"string","jsonPath":".spec.lockId"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DNSLockSpec {
    /// Fully qualified DNS name of the coordination TXT record.
    pub dns_name: String,

    /// Identity of this writer; a differing id on the record makes the
    /// local lock stale.
    pub lock_id: String,

    /// TTL of the TXT record in seconds; also scales the lookup failure
    /// window of the background refresh.
    pub ttl: i64,

    /// Writer timestamp in unix seconds; a newer timestamp on the record
    /// wins and suppresses the local write.
    pub timestamp: i64,

    /// Arbitrary attributes published as `key=value` TXT strings.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// `DNSLock` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DNSLockStatus {
    /// One of `pending`, `ready`, `stale`, `error`, `invalid`, `deleting`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,

    /// Timestamp observed on the TXT record, unix seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,

    /// Attributes observed on the TXT record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<BTreeMap<String, String>>,

    /// Start of the current lookup failure streak (RFC3339); cleared on a
    /// successful lookup or write.
    #[serde(rename = "firstFailedDNSLookup", skip_serializing_if = "Option::is_none")]
    pub first_failed_dns_lookup: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

#[cfg(test)]
#[path = "crd_tests.rs"]
mod crd_tests;
