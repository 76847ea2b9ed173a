// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared fixtures for state engine tests: an in-memory object access layer,
//! a scripted resolver and a pre-registered in-memory provider.

use crate::lookup::NameResolver;
use crate::object::{
    AccessError, EntryKind, EntryObject, LockFields, ObjectAccess, ObjectName, ObservedStatus,
    StatusPatch,
};
use crate::provider::inmemory::InMemoryAdapter;
use crate::provider::{AdapterFactory, DnsAdapter, TYPE_INMEMORY};
use crate::state::providers::{DomainSelection, ProviderRegistration};
use crate::state::{State, StateConfig};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Deterministic base creation timestamp for test objects.
pub(crate) fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
}

/// In-memory [`ObjectAccess`] recording all engine writebacks.
#[derive(Default)]
pub(crate) struct MockAccess {
    pub objects: Mutex<HashMap<ObjectName, EntryObject>>,
    pub status_writes: Mutex<Vec<(ObjectName, StatusPatch)>>,
    pub finalizers: Mutex<HashSet<ObjectName>>,
    pub triggers: Mutex<Vec<ObjectName>>,
}

impl MockAccess {
    pub fn insert(&self, object: EntryObject) {
        if object.has_finalizer {
            self.finalizers.lock().unwrap().insert(object.name.clone());
        }
        self.objects
            .lock()
            .unwrap()
            .insert(object.name.clone(), object);
    }

    pub fn has_finalizer(&self, name: &ObjectName) -> bool {
        self.finalizers.lock().unwrap().contains(name)
    }

    pub fn last_status(&self, name: &ObjectName) -> Option<StatusPatch> {
        self.status_writes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p.clone())
    }

    pub fn triggered(&self, name: &ObjectName) -> bool {
        self.triggers.lock().unwrap().iter().any(|n| n == name)
    }
}

#[async_trait]
impl ObjectAccess for MockAccess {
    async fn read_entry(
        &self,
        name: &ObjectName,
        _kind: EntryKind,
    ) -> Result<Option<EntryObject>, AccessError> {
        Ok(self.objects.lock().unwrap().get(name).cloned())
    }

    async fn write_entry_status(
        &self,
        name: &ObjectName,
        _kind: EntryKind,
        patch: StatusPatch,
    ) -> Result<(), AccessError> {
        if let Some(object) = self.objects.lock().unwrap().get_mut(name) {
            if let Some(state) = patch.state {
                object.status.state = Some(state.as_str().to_string());
            }
            if let Some(message) = &patch.message {
                object.status.message = Some(message.clone());
            }
            if let Some(zone) = &patch.zone {
                object.status.zone = Some(zone.clone());
            }
            if let Some(provider) = &patch.provider {
                object.status.provider = Some(provider.clone());
            }
            if let Some(first_failed) = patch.first_failed_dns_lookup {
                object.status.first_failed_dns_lookup = first_failed;
            }
        }
        self.status_writes
            .lock()
            .unwrap()
            .push((name.clone(), patch));
        Ok(())
    }

    async fn set_finalizer(&self, name: &ObjectName, _kind: EntryKind) -> Result<(), AccessError> {
        self.finalizers.lock().unwrap().insert(name.clone());
        if let Some(object) = self.objects.lock().unwrap().get_mut(name) {
            object.has_finalizer = true;
        }
        Ok(())
    }

    async fn remove_finalizer(
        &self,
        name: &ObjectName,
        _kind: EntryKind,
    ) -> Result<(), AccessError> {
        self.finalizers.lock().unwrap().remove(name);
        if let Some(object) = self.objects.lock().unwrap().get_mut(name) {
            object.has_finalizer = false;
        }
        Ok(())
    }

    fn trigger_entry(&self, name: &ObjectName, _kind: EntryKind) {
        self.triggers.lock().unwrap().push(name.clone());
    }
}

/// Scripted resolver for lock refresh tests.
#[derive(Default)]
pub(crate) struct MockResolver {
    pub txt: Mutex<HashMap<String, Result<Vec<String>, String>>>,
}

impl MockResolver {
    pub fn set_txt(&self, name: &str, records: &[&str]) {
        self.txt.lock().unwrap().insert(
            name.to_string(),
            Ok(records.iter().map(ToString::to_string).collect()),
        );
    }

    pub fn fail_txt(&self, name: &str, reason: &str) {
        self.txt
            .lock()
            .unwrap()
            .insert(name.to_string(), Err(reason.to_string()));
    }
}

#[async_trait]
impl NameResolver for MockResolver {
    async fn lookup_txt(&self, name: &str) -> anyhow::Result<Vec<String>> {
        match self.txt.lock().unwrap().get(name) {
            Some(Ok(records)) => Ok(records.clone()),
            Some(Err(reason)) => Err(anyhow!("{reason}")),
            None => Err(anyhow!("no answer for {name}")),
        }
    }

    async fn lookup_addrs(&self, _name: &str) -> anyhow::Result<Vec<IpAddr>> {
        Ok(Vec::new())
    }
}

/// A state engine wired to an in-memory provider covering the given domains.
pub(crate) struct Fixture {
    pub state: Arc<State>,
    pub access: Arc<MockAccess>,
    pub adapter: Arc<InMemoryAdapter>,
    pub resolver: Arc<MockResolver>,
    pub provider_name: ObjectName,
}

impl Fixture {
    pub async fn with_provider(domains: &[&str]) -> Self {
        Self::with_provider_and_blocking(domains, Duration::ZERO).await
    }

    pub async fn with_provider_and_blocking(domains: &[&str], blocking: Duration) -> Self {
        let fixture = Self::bare(domains, blocking);
        fixture.register_provider().await;
        fixture
    }

    /// Build the engine without registering the provider yet.
    pub fn bare(domains: &[&str], blocking: Duration) -> Self {
        let provider_name = ObjectName::new("default", "mem");
        let adapter = Arc::new(InMemoryAdapter::with_zones(&provider_name, domains));
        let shared = adapter.clone();
        let mut factory = AdapterFactory::new();
        factory.register(TYPE_INMEMORY, move |_, _| {
            Ok(shared.clone() as Arc<dyn DnsAdapter>)
        });

        let access = Arc::new(MockAccess::default());
        let resolver = Arc::new(MockResolver::default());
        let config = StateConfig {
            enabled_types: HashSet::from([TYPE_INMEMORY.to_string()]),
            default_ttl: 300,
            blocking_interval: blocking,
            lock_refresh_interval: Duration::from_secs(60),
        };
        let state = State::new(config, access.clone(), factory, resolver.clone());
        Self {
            state,
            access,
            adapter,
            resolver,
            provider_name,
        }
    }

    /// Register the fixture's in-memory provider (for tests using `bare`).
    pub async fn register_provider(&self) {
        self.state
            .register_provider(
                &self.provider_name,
                ProviderRegistration {
                    type_code: TYPE_INMEMORY.to_string(),
                    domains: DomainSelection::default(),
                    zone_filter: DomainSelection::default(),
                    default_ttl: None,
                    credentials: BTreeMap::new(),
                },
            )
            .await
            .expect("provider registration should succeed");
    }

    /// Poll until the adapter has seen at least `n` apply batches.
    pub async fn wait_for_applies(&self, n: usize) {
        for _ in 0..200 {
            if self.adapter.apply_call_count() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "adapter saw only {} apply batches, expected at least {n}",
            self.adapter.apply_call_count()
        );
    }

    /// Let in-flight zone workers drain.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Build a regular entry object snapshot.
pub(crate) fn entry_object(name: &str, dns_name: &str, targets: &[&str]) -> EntryObject {
    let (ns, n) = name.split_once('/').expect("name must be namespace/name");
    EntryObject {
        name: ObjectName::new(ns, n),
        kind: EntryKind::Regular,
        generation: 1,
        created: base_time(),
        deleting: false,
        has_finalizer: false,
        dns_name: dns_name.to_string(),
        targets: targets.iter().map(ToString::to_string).collect(),
        text: Vec::new(),
        ttl: None,
        owner_id: None,
        provider_type: None,
        lookup_interval: None,
        resolved_targets: None,
        lock: None,
        status: ObservedStatus::default(),
    }
}

/// Build a lock object snapshot.
pub(crate) fn lock_object(
    name: &str,
    dns_name: &str,
    lock_id: &str,
    timestamp: i64,
    ttl: i64,
) -> EntryObject {
    let mut object = entry_object(name, dns_name, &[]);
    object.kind = EntryKind::Lock;
    object.lock = Some(LockFields {
        lock_id: lock_id.to_string(),
        timestamp,
        ttl,
        attributes: BTreeMap::new(),
    });
    object
}
