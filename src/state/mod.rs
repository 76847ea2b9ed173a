// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The entry reconciliation state engine.
//!
//! [`State`] is the process-wide core sitting between the declarative input
//! objects and the provider back-ends. It owns the entry index with its
//! secondary maps (DNS names, zones, providers, blocking and outdated sets),
//! all guarded by one read-write lock that is never held across I/O.
//!
//! Sub-modules:
//! - [`entry`] - entries, observed versions and validation
//! - [`entries`] - the per-event state transition kernel
//! - [`providers`] - provider registry, zone cache and premise resolution
//! - [`zones`] - per-zone batched reconciliation against the adapters
//! - [`locks`] - the DNS-lock TXT protocol and background refresh
//! - [`owners`] - the owner filter gating which entries are managed

pub mod entries;
pub mod entry;
pub mod locks;
pub mod owners;
pub mod providers;
pub mod zones;

#[cfg(test)]
pub(crate) mod testsupport;

use crate::lookup::NameResolver;
use crate::object::{EntryKind, ObjectAccess, ObjectName};
use crate::provider::{AdapterFactory, HostedZone};
use crate::state::entry::Entry;
use crate::state::owners::OwnerFilter;
use crate::state::providers::ProviderState;
use crate::state::zones::ZoneSlot;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Tunables of the state engine.
#[derive(Clone, Debug)]
pub struct StateConfig {
    /// Provider type codes this process manages. Entries resolving to other
    /// types are observed but never modified.
    pub enabled_types: HashSet<String>,
    /// TTL applied when neither the entry nor its provider declares one.
    pub default_ttl: i64,
    /// How long a recently-mutated entry defers its zone's next batch.
    pub blocking_interval: Duration,
    /// Period of the background lock lookup refresh.
    pub lock_refresh_interval: Duration,
}

impl StateConfig {
    /// Defaults with all factory-registered provider types enabled.
    #[must_use]
    pub fn for_factory(factory: &AdapterFactory) -> Self {
        Self {
            enabled_types: factory.known_types().into_iter().collect(),
            default_ttl: crate::constants::DEFAULT_DNS_RECORD_TTL_SECS,
            blocking_interval: Duration::from_secs(crate::constants::ZONE_BLOCKING_WINDOW_SECS),
            lock_refresh_interval: Duration::from_secs(
                crate::constants::LOCK_REFRESH_INTERVAL_SECS,
            ),
        }
    }
}

/// Outcome of one reconcile step, mapped to a requeue decision by the
/// controller layer.
#[derive(Debug)]
pub enum ReconcileStatus {
    /// Done; periodic resync only.
    Succeeded,
    /// Done; come back after the given delay.
    RescheduleAfter(Duration),
    /// The premise shifted under the reconcile; run again immediately.
    Repeat,
    /// A recoverable failure; requeue with backoff.
    Delayed(anyhow::Error),
}

impl ReconcileStatus {
    /// `Succeeded` on `Ok`, `Delayed` carrying the error otherwise.
    #[must_use]
    pub fn delay_on_error<E: Into<anyhow::Error>>(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self::Succeeded,
            Err(e) => Self::Delayed(e.into()),
        }
    }

    #[must_use]
    pub fn is_succeeded(&self) -> bool {
        matches!(self, Self::Succeeded | Self::RescheduleAfter(_))
    }

    /// Merge a reschedule request into a successful status.
    #[must_use]
    pub fn reschedule_after(self, delay: Duration) -> Self {
        match self {
            Self::Succeeded => Self::RescheduleAfter(delay),
            Self::RescheduleAfter(cur) => Self::RescheduleAfter(cur.min(delay)),
            other => other,
        }
    }
}

/// Index maps shared by all workers, guarded by [`State::inner`].
#[derive(Default)]
pub(crate) struct StateData {
    /// All known entries by object name.
    pub entries: HashMap<ObjectName, Arc<Entry>>,
    /// Active claim per DNS name.
    pub dnsnames: HashMap<String, Arc<Entry>>,
    /// Validated (and last-known) providers by object name.
    pub providers: BTreeMap<ObjectName, Arc<ProviderState>>,
    /// Hosted zones by zone id, derived from the providers.
    pub zones: HashMap<String, HostedZone>,
    /// Recently-mutated entries deferring their zone batch.
    pub blocking: HashMap<ObjectName, Instant>,
    /// Entries awaiting provider-side deletion before finalizer removal.
    pub outdated: HashMap<ObjectName, Arc<Entry>>,
    /// Active owner ids.
    pub owners: OwnerFilter,
}

/// The process-wide reconciliation state.
pub struct State {
    pub(crate) config: StateConfig,
    pub(crate) access: Arc<dyn ObjectAccess>,
    pub(crate) factory: AdapterFactory,
    pub(crate) resolver: Arc<dyn NameResolver>,
    pub(crate) startup: DateTime<Utc>,
    pub(crate) inner: RwLock<StateData>,
    pub(crate) zone_slots: Mutex<HashMap<String, Arc<ZoneSlot>>>,
}

impl State {
    #[must_use]
    pub fn new(
        config: StateConfig,
        access: Arc<dyn ObjectAccess>,
        factory: AdapterFactory,
        resolver: Arc<dyn NameResolver>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            access,
            factory,
            resolver,
            startup: Utc::now(),
            inner: RwLock::new(StateData::default()),
            zone_slots: Mutex::new(HashMap::new()),
        })
    }

    /// Whether entries of this provider type are managed by this process.
    #[must_use]
    pub fn is_managing(&self, provider_type: Option<&str>) -> bool {
        provider_type.is_some_and(|t| self.config.enabled_types.contains(t))
    }

    /// Look up an entry by object name.
    #[must_use]
    pub fn get_entry(&self, name: &ObjectName) -> Option<Arc<Entry>> {
        self.data().entries.get(name).cloned()
    }

    /// Number of indexed entries.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.data().entries.len()
    }

    /// The entry holding the active claim on a DNS name.
    #[must_use]
    pub fn active_claim(&self, dns_name: &str) -> Option<ObjectName> {
        self.data()
            .dnsnames
            .get(&crate::dns::normalize_dns_name(dns_name))
            .map(|e| e.name().clone())
    }

    /// Number of entries awaiting provider-side deletion.
    #[must_use]
    pub fn outdated_count(&self) -> usize {
        self.data().outdated.len()
    }

    /// Refresh the indexed-entry gauges.
    pub(crate) fn publish_entry_metrics(&self) {
        let data = self.data();
        let locks = data
            .entries
            .values()
            .filter(|e| e.kind() == EntryKind::Lock)
            .count();
        crate::metrics::set_entries_active("lock", locks);
        crate::metrics::set_entries_active("entry", data.entries.len() - locks);
    }

    /// Entries carrying one of the given owner ids.
    #[must_use]
    pub fn entries_by_owner(&self, owner_ids: &HashSet<String>) -> Vec<Arc<Entry>> {
        if owner_ids.is_empty() {
            return Vec::new();
        }
        self.data()
            .entries
            .values()
            .filter(|e| {
                e.snapshot()
                    .owner_id
                    .as_ref()
                    .is_some_and(|id| owner_ids.contains(id))
            })
            .cloned()
            .collect()
    }

    /// Re-enqueue every entry whose owner id is in `owner_ids`, deferring
    /// their zones through the blocking set to batch the resulting writes.
    pub fn trigger_entries_by_owner(&self, owner_ids: &HashSet<String>) {
        let entries = self.entries_by_owner(owner_ids);
        if entries.is_empty() {
            return;
        }
        tracing::info!(
            entries = entries.len(),
            "blocking hosted zone reconciliation for re-triggered entries"
        );
        let now = Instant::now();
        {
            let mut data = self.data_mut();
            for e in &entries {
                data.blocking.entry(e.name().clone()).or_insert(now);
            }
        }
        for e in entries {
            self.access.trigger_entry(e.name(), e.kind());
        }
    }

    /// Re-enqueue all indexed entries, used when the provider landscape
    /// changes and premises may resolve differently.
    pub fn trigger_all_entries(&self) {
        let entries: Vec<(ObjectName, EntryKind)> = self
            .data()
            .entries
            .values()
            .map(|e| (e.name().clone(), e.kind()))
            .collect();
        for (name, kind) in entries {
            self.access.trigger_entry(&name, kind);
        }
    }

    pub(crate) fn data(&self) -> std::sync::RwLockReadGuard<'_, StateData> {
        self.inner.read().expect("state lock poisoned")
    }

    pub(crate) fn data_mut(&self) -> std::sync::RwLockWriteGuard<'_, StateData> {
        self.inner.write().expect("state lock poisoned")
    }

    pub(crate) fn has_providers(&self) -> bool {
        !self.data().providers.is_empty()
    }

    /// Log at info when providers exist, debug otherwise; quiet startup on
    /// clusters that only observe foreign entries.
    pub(crate) fn smart_info(&self, msg: &str) {
        if self.has_providers() {
            tracing::info!("{msg}");
        } else {
            tracing::debug!("{msg}");
        }
    }
}

/// [`State::smart_info`] for call sites already holding the state lock.
pub(crate) fn smart_info_locked(data: &StateData, msg: &str) {
    if data.providers.is_empty() {
        tracing::debug!("{msg}");
    } else {
        tracing::info!("{msg}");
    }
}
