// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory provider adapter.
//!
//! Serves the `in-memory` provider type: hosted zones and record sets held
//! in process memory. Used as the test and demo back-end; the zone list is
//! declared up front through the credentials key `zones` (comma-separated
//! domains) instead of being discovered remotely.

use super::{Change, Credentials, DnsAdapter, HostedZone, TYPE_INMEMORY};
use crate::dns::{normalize_dns_name, RecordSet, RecordType};
use crate::dns_errors::ProviderError;
use crate::object::ObjectName;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::debug;

type ZoneRecords = HashMap<(String, RecordType), RecordSet>;

/// Adapter state for one provider object.
#[derive(Debug)]
pub struct InMemoryAdapter {
    provider: ObjectName,
    zones: Vec<HostedZone>,
    records: Mutex<HashMap<String, ZoneRecords>>,
    apply_calls: AtomicUsize,
    fail_applies: AtomicUsize,
}

impl InMemoryAdapter {
    /// Build from the `zones` credentials key.
    ///
    /// # Errors
    ///
    /// [`ProviderError::Unauthorized`] when the key is absent or empty, so
    /// provider validation fails the same way a rejected cloud credential
    /// would.
    pub fn from_credentials(
        provider: &ObjectName,
        credentials: &Credentials,
    ) -> Result<Self, ProviderError> {
        let domains = credentials
            .get("zones")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(normalize_dns_name)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if domains.is_empty() {
            return Err(ProviderError::Unauthorized(
                "in-memory provider needs a non-empty 'zones' credential".to_string(),
            ));
        }
        Ok(Self::with_zones(
            provider,
            &domains.iter().map(String::as_str).collect::<Vec<_>>(),
        ))
    }

    /// Build with a fixed set of zone domains.
    #[must_use]
    pub fn with_zones(provider: &ObjectName, domains: &[&str]) -> Self {
        let zones = domains
            .iter()
            .map(|d| HostedZone {
                id: normalize_dns_name(d),
                domain: normalize_dns_name(d),
                forwarded: Vec::new(),
                provider_type: TYPE_INMEMORY.to_string(),
                provider: provider.clone(),
            })
            .collect::<Vec<_>>();
        let records = zones
            .iter()
            .map(|z| (z.id.clone(), ZoneRecords::new()))
            .collect();
        Self {
            provider: provider.clone(),
            zones,
            records: Mutex::new(records),
            apply_calls: AtomicUsize::new(0),
            fail_applies: AtomicUsize::new(0),
        }
    }

    /// Mark a zone's subdomain as forwarded (delegated away).
    pub fn forward_subdomain(&mut self, zone_domain: &str, sub: &str) {
        if let Some(zone) = self
            .zones
            .iter_mut()
            .find(|z| z.domain == normalize_dns_name(zone_domain))
        {
            zone.forwarded.push(normalize_dns_name(sub));
        }
    }

    /// Number of `apply_changes` batches received so far.
    pub fn apply_call_count(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }

    /// Fail the next `n` `apply_changes` batches with a transient error.
    pub fn fail_next_applies(&self, n: usize) {
        self.fail_applies.store(n, Ordering::SeqCst);
    }

    /// Direct read of a record set, for test assertions.
    pub fn record_set(&self, zone_id: &str, name: &str, rtype: RecordType) -> Option<RecordSet> {
        let records = self.records.lock().expect("in-memory records poisoned");
        records
            .get(zone_id)?
            .get(&(normalize_dns_name(name), rtype))
            .cloned()
    }
}

#[async_trait]
impl DnsAdapter for InMemoryAdapter {
    fn provider_type(&self) -> &str {
        TYPE_INMEMORY
    }

    async fn list_zones(&self) -> Result<Vec<HostedZone>, ProviderError> {
        Ok(self.zones.clone())
    }

    async fn get_record_set(
        &self,
        zone: &HostedZone,
        dns_name: &str,
        rtype: RecordType,
    ) -> Result<Option<RecordSet>, ProviderError> {
        let records = self.records.lock().expect("in-memory records poisoned");
        let zone_records = records
            .get(&zone.id)
            .ok_or_else(|| ProviderError::ZoneNotFound {
                zone: zone.id.clone(),
            })?;
        Ok(zone_records
            .get(&(normalize_dns_name(dns_name), rtype))
            .cloned())
    }

    async fn list_record_sets(
        &self,
        zone: &HostedZone,
    ) -> Result<Vec<(String, RecordSet)>, ProviderError> {
        let records = self.records.lock().expect("in-memory records poisoned");
        let zone_records = records
            .get(&zone.id)
            .ok_or_else(|| ProviderError::ZoneNotFound {
                zone: zone.id.clone(),
            })?;
        Ok(zone_records
            .iter()
            .map(|((name, _), rs)| (name.clone(), rs.clone()))
            .collect())
    }

    async fn apply_changes(
        &self,
        zone: &HostedZone,
        changes: &[Change],
    ) -> Vec<Result<(), ProviderError>> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_applies
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return changes
                .iter()
                .map(|_| {
                    Err(ProviderError::Transient(
                        "injected in-memory failure".to_string(),
                    ))
                })
                .collect();
        }

        let mut records = self.records.lock().expect("in-memory records poisoned");
        let Some(zone_records) = records.get_mut(&zone.id) else {
            return changes
                .iter()
                .map(|_| {
                    Err(ProviderError::ZoneNotFound {
                        zone: zone.id.clone(),
                    })
                })
                .collect();
        };

        debug!(
            provider = %self.provider,
            zone = %zone.id,
            changes = changes.len(),
            "applying in-memory change batch"
        );

        changes
            .iter()
            .map(|change| {
                let key = (normalize_dns_name(change.name()), change.rtype());
                match change {
                    Change::Create { rset, .. } | Change::Update { rset, .. } => {
                        if rset.is_empty() {
                            return Err(ProviderError::InvalidChange {
                                name: change.name().to_string(),
                                rtype: change.rtype().to_string(),
                                reason: "empty record set".to_string(),
                            });
                        }
                        zone_records.insert(key, rset.clone());
                        Ok(())
                    }
                    Change::Delete { .. } => {
                        zone_records.remove(&key);
                        Ok(())
                    }
                }
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "inmemory_tests.rs"]
mod inmemory_tests;
