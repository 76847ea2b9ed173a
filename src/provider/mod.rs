// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Provider adapter interface.
//!
//! A [`DnsAdapter`] is the uniform facade over one DNS hosting back-end:
//! list hosted zones, read a record set, and apply a batch of record-set
//! mutations in a zone. Adapters are built by an [`AdapterFactory`] keyed by
//! provider type code; each adapter embeds its own credentials and client.
//!
//! Adapters must be idempotent: creating an identical existing record set
//! succeeds, deleting an absent record set succeeds. Rate limiting and
//! vendor-specific batching live inside the adapter, not in the engine.

pub mod inmemory;

use crate::dns::{RecordSet, RecordType};
use crate::dns_errors::ProviderError;
use crate::object::ObjectName;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Type code of the bundled in-memory adapter.
pub const TYPE_INMEMORY: &str = "in-memory";

/// Credentials resolved from a provider's secret reference.
pub type Credentials = BTreeMap<String, String>;

/// One hosted zone on a provider back-end.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostedZone {
    /// Provider-assigned zone id, unique per provider type.
    pub id: String,
    /// Base domain of the zone, normalized (lowercase, no trailing dot).
    pub domain: String,
    /// Subdomains delegated away from this zone; names under them do not
    /// belong to the zone even though they match its domain.
    pub forwarded: Vec<String>,
    /// Type code of the owning provider.
    pub provider_type: String,
    /// Object name of the provider this zone was listed from.
    pub provider: ObjectName,
}

impl HostedZone {
    /// Whether `dns_name` belongs to this zone.
    #[must_use]
    pub fn includes(&self, dns_name: &str) -> bool {
        if !crate::dns::name_in_domain(dns_name, &self.domain) {
            return false;
        }
        !self
            .forwarded
            .iter()
            .any(|sub| crate::dns::name_in_domain(dns_name, sub))
    }
}

/// One record-set mutation submitted to a zone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Change {
    Create { name: String, rset: RecordSet },
    Update { name: String, rset: RecordSet },
    Delete { name: String, rtype: RecordType },
}

impl Change {
    /// The DNS name this change applies to.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Create { name, .. } | Self::Update { name, .. } | Self::Delete { name, .. } => {
                name
            }
        }
    }

    /// The record type this change applies to.
    #[must_use]
    pub fn rtype(&self) -> RecordType {
        match self {
            Self::Create { rset, .. } | Self::Update { rset, .. } => rset.rtype,
            Self::Delete { rtype, .. } => *rtype,
        }
    }
}

/// Uniform facade over one DNS hosting back-end.
#[async_trait]
pub trait DnsAdapter: Send + Sync + std::fmt::Debug {
    /// The provider type code this adapter serves.
    fn provider_type(&self) -> &str;

    /// List the hosted zones visible with these credentials.
    async fn list_zones(&self) -> Result<Vec<HostedZone>, ProviderError>;

    /// Read a single record set, used for lock verification.
    async fn get_record_set(
        &self,
        zone: &HostedZone,
        dns_name: &str,
        rtype: RecordType,
    ) -> Result<Option<RecordSet>, ProviderError>;

    /// Read the full record-set state of a zone for diffing.
    async fn list_record_sets(
        &self,
        zone: &HostedZone,
    ) -> Result<Vec<(String, RecordSet)>, ProviderError>;

    /// Apply a batch of mutations; the result vector is positionally aligned
    /// with `changes`. Back-ends that support it commit atomically per zone,
    /// otherwise best effort with per-change outcomes.
    async fn apply_changes(
        &self,
        zone: &HostedZone,
        changes: &[Change],
    ) -> Vec<Result<(), ProviderError>>;
}

/// Constructor signature for a registered adapter type.
pub type AdapterCtor =
    Arc<dyn Fn(&ObjectName, &Credentials) -> Result<Arc<dyn DnsAdapter>, ProviderError>
        + Send
        + Sync>;

/// Registry of adapter constructors keyed by provider type code.
#[derive(Clone, Default)]
pub struct AdapterFactory {
    ctors: BTreeMap<String, AdapterCtor>,
}

impl AdapterFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The factory with all bundled adapter types registered.
    #[must_use]
    pub fn bundled() -> Self {
        let mut factory = Self::new();
        factory.register(TYPE_INMEMORY, |name, creds| {
            Ok(Arc::new(inmemory::InMemoryAdapter::from_credentials(
                name, creds,
            )?) as Arc<dyn DnsAdapter>)
        });
        factory
    }

    /// Register a constructor for a provider type code.
    pub fn register<F>(&mut self, type_code: &str, ctor: F)
    where
        F: Fn(&ObjectName, &Credentials) -> Result<Arc<dyn DnsAdapter>, ProviderError>
            + Send
            + Sync
            + 'static,
    {
        self.ctors.insert(type_code.to_string(), Arc::new(ctor));
    }

    /// Build an adapter for a provider object.
    ///
    /// # Errors
    ///
    /// [`ProviderError::UnknownProviderType`] when no constructor is
    /// registered for `type_code`, or the constructor's own error when the
    /// credentials are unusable.
    pub fn create(
        &self,
        type_code: &str,
        provider: &ObjectName,
        credentials: &Credentials,
    ) -> Result<Arc<dyn DnsAdapter>, ProviderError> {
        let ctor = self
            .ctors
            .get(type_code)
            .ok_or_else(|| ProviderError::UnknownProviderType(type_code.to_string()))?;
        ctor(provider, credentials)
    }

    /// Type codes with a registered constructor.
    #[must_use]
    pub fn known_types(&self) -> Vec<String> {
        self.ctors.keys().cloned().collect()
    }

    /// Whether a type code has a registered constructor.
    #[must_use]
    pub fn supports(&self, type_code: &str) -> bool {
        self.ctors.contains_key(type_code)
    }
}
