// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Control-plane object access for the reconciliation engine.
//!
//! The state engine never touches the Kubernetes API directly. It consumes
//! [`EntryObject`] snapshots and writes back through the [`ObjectAccess`]
//! trait, which the controller layer implements against `kube` (with a
//! bounded conflict-retry) and tests implement in memory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Namespace + name pair identifying an input object.
///
/// The `Ord` impl (namespace, then name) is the deterministic tie-break used
/// by duplicate arbitration.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectName {
    pub namespace: String,
    pub name: String,
}

impl ObjectName {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Kind of a reconciled input object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// A regular DNS entry declaring a record set.
    Regular,
    /// A DNS lock owning a coordination TXT record.
    Lock,
}

/// Entry lifecycle states. `New` is internal to the engine (never
/// published); the remaining values appear in status subresources.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryState {
    New,
    Pending,
    Ready,
    Error,
    Invalid,
    Stale,
    Deleting,
}

impl EntryState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Error => "error",
            Self::Invalid => "invalid",
            Self::Stale => "stale",
            Self::Deleting => "deleting",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "pending" => Some(Self::Pending),
            "ready" => Some(Self::Ready),
            "error" => Some(Self::Error),
            "invalid" => Some(Self::Invalid),
            "stale" => Some(Self::Stale),
            "deleting" => Some(Self::Deleting),
            _ => None,
        }
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-specific spec fields carried by DNSLock objects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockFields {
    pub lock_id: String,
    /// Unix seconds; the CAS arbiter of the lock protocol.
    pub timestamp: i64,
    pub ttl: i64,
    pub attributes: BTreeMap<String, String>,
}

/// Status fields previously observed on the object.
///
/// The engine reads these to recover bindings (zone hints for orphaned
/// entries, lock lookup failure tracking) across restarts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObservedStatus {
    pub state: Option<String>,
    pub message: Option<String>,
    pub zone: Option<String>,
    pub provider: Option<String>,
    pub provider_type: Option<String>,
    pub first_failed_dns_lookup: Option<DateTime<Utc>>,
}

/// Immutable snapshot of one input object as observed from the watch stream.
#[derive(Clone, Debug)]
pub struct EntryObject {
    pub name: ObjectName,
    pub kind: EntryKind,
    pub generation: i64,
    pub created: DateTime<Utc>,
    /// Deletion timestamp present on the object.
    pub deleting: bool,
    /// The controller finalizer is present on the object.
    pub has_finalizer: bool,
    pub dns_name: String,
    pub targets: Vec<String>,
    pub text: Vec<String>,
    pub ttl: Option<i64>,
    pub owner_id: Option<String>,
    /// Optional provider-type restriction from the spec.
    pub provider_type: Option<String>,
    /// Refresh interval for hostname-target resolution, seconds.
    pub lookup_interval: Option<i64>,
    /// Hostname targets resolved to addresses by the controller layer, when
    /// lookup is in effect. `None` means targets are used as declared.
    pub resolved_targets: Option<Vec<String>>,
    pub lock: Option<LockFields>,
    pub status: ObservedStatus,
}

/// Partial status update; `None` fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusPatch {
    pub state: Option<EntryState>,
    pub message: Option<String>,
    pub provider: Option<String>,
    pub provider_type: Option<String>,
    pub zone: Option<String>,
    pub targets: Option<Vec<String>>,
    pub ttl: Option<i64>,
    pub observed_generation: Option<i64>,
    /// Observed lock timestamp (locks only).
    pub lock_timestamp: Option<i64>,
    /// Observed lock attributes (locks only).
    pub lock_attributes: Option<BTreeMap<String, String>>,
    /// `Some(None)` clears the failure marker, `Some(Some(t))` sets it.
    pub first_failed_dns_lookup: Option<Option<DateTime<Utc>>>,
}

impl StatusPatch {
    /// Shorthand for a plain state + message transition.
    #[must_use]
    pub fn state(state: EntryState, message: impl Into<String>) -> Self {
        Self {
            state: Some(state),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Errors from the control-plane access layer.
#[derive(Error, Debug)]
pub enum AccessError {
    #[error("object not found")]
    NotFound,
    #[error("write conflict")]
    Conflict,
    #[error("control plane error: {0}")]
    Api(String),
}

/// Uniform access to the input objects the engine manages.
///
/// Implementations must be cheap to clone behind an `Arc` and safe to call
/// from concurrent reconcile workers. Status writes must be retried on
/// conflict internally (see [`with_conflict_retry`]), so the engine can treat
/// a returned [`AccessError::Conflict`] as terminal for this attempt.
#[async_trait]
pub trait ObjectAccess: Send + Sync {
    /// Re-read the current object, `Ok(None)` when it is gone.
    async fn read_entry(
        &self,
        name: &ObjectName,
        kind: EntryKind,
    ) -> Result<Option<EntryObject>, AccessError>;

    /// Apply a partial status update.
    async fn write_entry_status(
        &self,
        name: &ObjectName,
        kind: EntryKind,
        patch: StatusPatch,
    ) -> Result<(), AccessError>;

    /// Ensure the controller finalizer is present (idempotent).
    async fn set_finalizer(&self, name: &ObjectName, kind: EntryKind) -> Result<(), AccessError>;

    /// Remove the controller finalizer (idempotent).
    async fn remove_finalizer(&self, name: &ObjectName, kind: EntryKind)
        -> Result<(), AccessError>;

    /// Enqueue the object for another reconcile pass.
    fn trigger_entry(&self, name: &ObjectName, kind: EntryKind);
}

/// Retry `op` on write conflicts, up to `max_retries` additional attempts.
///
/// The closure is expected to re-read the object on every attempt; anything
/// other than [`AccessError::Conflict`] is returned immediately.
pub async fn with_conflict_retry<T, F, Fut>(max_retries: usize, mut op: F) -> Result<T, AccessError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, AccessError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(AccessError::Conflict) if attempt < max_retries => {
                attempt += 1;
                tracing::debug!(attempt, "write conflict, re-reading and retrying");
            }
            other => return other,
        }
    }
}

#[cfg(test)]
#[path = "object_tests.rs"]
mod object_tests;
