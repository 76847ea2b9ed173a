// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for provider back-ends and entry reconciliation.
//!
//! Two families:
//! - [`ProviderError`] - failures surfaced by provider adapters, classified
//!   transient vs. permanent so callers can decide between backoff requeue
//!   and a terminal status.
//! - [`EntryFault`] - per-entry reconciliation faults that become status
//!   messages (`error` / `invalid`) on the entry object.

use crate::object::ObjectName;
use thiserror::Error;

/// Errors returned by provider adapters.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// The back-end throttled the request.
    #[error("provider request throttled: {0}")]
    Throttled(String),

    /// Network failure, 5xx, timeout - safe to retry with backoff.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// The hosted zone is unknown to the back-end.
    #[error("hosted zone '{zone}' not found")]
    ZoneNotFound { zone: String },

    /// The back-end rejected a record-set mutation.
    #[error("record set '{name}' ({rtype}): {reason}")]
    InvalidChange {
        name: String,
        rtype: String,
        reason: String,
    },

    /// Credentials were rejected during validation or a call.
    #[error("provider credentials rejected: {0}")]
    Unauthorized(String),

    /// No adapter factory is registered for this type code.
    #[error("unknown provider type '{0}'")]
    UnknownProviderType(String),
}

impl ProviderError {
    /// Whether the failed call should be retried with backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Throttled(_) | Self::Transient(_))
    }
}

/// Per-entry reconciliation faults.
///
/// These map to entry status transitions: [`EntryFault::AlreadyBusy`],
/// [`EntryFault::NoProvider`] and [`EntryFault::NoZone`] yield `error`,
/// [`EntryFault::Invalid`] yields `invalid`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EntryFault {
    /// The DNS name is already claimed by an earlier entry.
    #[error("DNS name \"{dns_name}\" already busy for entry \"{holder}\"")]
    AlreadyBusy {
        dns_name: String,
        holder: ObjectName,
    },

    /// No provider's domain filters cover the DNS name.
    #[error("no matching provider found for \"{dns_name}\"")]
    NoProvider { dns_name: String },

    /// A provider matched but carries no hosted zone for the name.
    #[error("no hosted zone found for \"{dns_name}\"")]
    NoZone { dns_name: String },

    /// The entry spec itself is malformed.
    #[error("invalid entry: {0}")]
    Invalid(String),
}

#[cfg(test)]
#[path = "dns_errors_tests.rs"]
mod dns_errors_tests;
