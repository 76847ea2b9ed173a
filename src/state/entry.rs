// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Entries and observed entry versions.
//!
//! An [`Entry`] is the engine's long-lived record of one input object. Each
//! observation builds an [`EntryVersion`] - the validated, premise-resolved
//! view of the object at that point - which the transition kernel folds into
//! the entry under the state lock.

use crate::dns::{is_valid_dns_name, normalize_dns_name, RecordSet, RecordType};
use crate::dns_errors::EntryFault;
use crate::object::{EntryKind, EntryObject, EntryState, LockFields, ObjectName};
use crate::state::providers::EntryPremise;
use crate::state::StateConfig;
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::sync::Arc;

/// Mutable view of an entry, guarded by the entry's data mutex.
///
/// The shared index maps additionally require the process-wide state lock;
/// the data mutex alone only protects the fields below.
#[derive(Clone, Debug)]
pub struct EntryData {
    pub dns_name: String,
    pub record_sets: Vec<RecordSet>,
    pub ttl: i64,
    pub owner_id: Option<String>,
    pub generation: i64,
    pub valid: bool,
    pub duplicate: bool,
    pub modified: bool,
    pub update_required: bool,
    /// Zone id this entry was last bound to.
    pub active_zone: Option<String>,
    pub provider: Option<ObjectName>,
    pub provider_type: Option<String>,
    pub state: EntryState,
    pub message: Option<String>,
    /// Reschedule interval in seconds, for resolved hostname targets.
    pub interval: Option<i64>,
    pub lock: Option<LockFields>,
    pub first_failed_lookup: Option<DateTime<Utc>>,
    pub deleting: bool,
    pub has_finalizer: bool,
}

/// One entry in the index.
pub struct Entry {
    name: ObjectName,
    kind: EntryKind,
    created: DateTime<Utc>,
    /// Serialises reconcile steps for this entry across workers.
    pub(crate) reconcile_lock: tokio::sync::Mutex<()>,
    data: std::sync::Mutex<EntryData>,
}

impl Entry {
    pub(crate) fn from_version(v: &EntryVersion) -> Arc<Self> {
        let entry = Arc::new(Self {
            name: v.object.name.clone(),
            kind: v.object.kind,
            created: v.object.created,
            reconcile_lock: tokio::sync::Mutex::new(()),
            data: std::sync::Mutex::new(EntryData {
                dns_name: v.dns_name().to_string(),
                record_sets: Vec::new(),
                ttl: v.ttl,
                owner_id: None,
                generation: 0,
                valid: false,
                duplicate: false,
                modified: false,
                update_required: false,
                active_zone: None,
                provider: None,
                provider_type: None,
                state: EntryState::Pending,
                message: None,
                interval: None,
                lock: None,
                first_failed_lookup: None,
                deleting: false,
                has_finalizer: false,
            }),
        });
        entry.apply_version(v);
        entry
    }

    /// Fold a new observed version into this entry.
    ///
    /// Returns `self` when the DNS name is unchanged (the entry keeps its
    /// identity); a fresh entry otherwise, leaving the old one for cleanup.
    pub(crate) fn update_from(self: &Arc<Self>, v: &EntryVersion) -> Arc<Self> {
        if self.snapshot().dns_name == v.dns_name() {
            self.apply_version(v);
            return self.clone();
        }
        Self::from_version(v)
    }

    fn apply_version(&self, v: &EntryVersion) {
        let mut data = self.data.lock().expect("entry data poisoned");
        data.dns_name = v.dns_name().to_string();
        if !(v.object.deleting && v.record_sets.is_empty()) {
            data.record_sets = v.record_sets.clone();
        }
        data.ttl = v.ttl;
        data.owner_id = v.object.owner_id.clone();
        data.generation = v.object.generation;
        data.valid = v.valid;
        // Re-arbitrated by the kernel on every observation.
        data.duplicate = false;
        data.modified = v.modified;
        data.update_required = data.update_required || v.modified;
        if v.zone_id.is_some() {
            data.active_zone = v.zone_id.clone();
        }
        if v.provider.is_some() {
            data.provider = v.provider.clone();
            data.provider_type = v.provider_type.clone();
        }
        data.state = v.state;
        data.message = v.message.clone();
        data.interval = v.interval;
        data.lock = v.object.lock.clone();
        if data.first_failed_lookup.is_none() {
            data.first_failed_lookup = v.object.status.first_failed_dns_lookup;
        }
        data.deleting = v.object.deleting;
        data.has_finalizer = v.object.has_finalizer;
    }

    #[must_use]
    pub fn name(&self) -> &ObjectName {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    #[must_use]
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Duplicate-arbitration order: earlier creation wins, object name
    /// breaks ties.
    #[must_use]
    pub fn before(&self, other: &Self) -> bool {
        (self.created, &self.name) < (other.created, &other.name)
    }

    /// Clone the current mutable view.
    #[must_use]
    pub fn snapshot(&self) -> EntryData {
        self.data.lock().expect("entry data poisoned").clone()
    }

    pub(crate) fn with_data<R>(&self, f: impl FnOnce(&mut EntryData) -> R) -> R {
        let mut data = self.data.lock().expect("entry data poisoned");
        f(&mut data)
    }

    #[must_use]
    pub fn dns_name(&self) -> String {
        self.data.lock().expect("entry data poisoned").dns_name.clone()
    }

    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        self.data.lock().expect("entry data poisoned").duplicate
    }

    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.data.lock().expect("entry data poisoned").modified
    }

    #[must_use]
    pub fn active_zone(&self) -> Option<String> {
        self.data
            .lock()
            .expect("entry data poisoned")
            .active_zone
            .clone()
    }
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("data", &self.snapshot())
            .finish()
    }
}

/// Validated, premise-resolved view of one observation.
#[derive(Debug)]
pub struct EntryVersion {
    pub object: EntryObject,
    pub record_sets: Vec<RecordSet>,
    pub ttl: i64,
    pub valid: bool,
    /// The premise only resolved through the fallback provider.
    pub obsolete: bool,
    pub interval: Option<i64>,
    pub state: EntryState,
    pub message: Option<String>,
    pub modified: bool,
    pub zone_id: Option<String>,
    pub provider: Option<ObjectName>,
    pub provider_type: Option<String>,
}

impl EntryVersion {
    /// Build and validate a version from an observed object; `old` is the
    /// prior entry for modification detection.
    #[must_use]
    pub fn build(
        object: EntryObject,
        premise: &EntryPremise,
        config: &StateConfig,
        old: Option<&Entry>,
    ) -> Self {
        let ttl = object
            .ttl
            .or_else(|| premise.provider.as_ref().and_then(|p| p.default_ttl))
            .unwrap_or(config.default_ttl);

        let mut version = Self {
            record_sets: Vec::new(),
            ttl,
            valid: false,
            obsolete: premise.provider.is_none() && premise.fallback.is_some(),
            interval: None,
            state: old.map_or_else(
                || {
                    object
                        .status
                        .state
                        .as_deref()
                        .and_then(EntryState::parse)
                        .unwrap_or(EntryState::New)
                },
                |o| o.snapshot().state,
            ),
            message: None,
            modified: false,
            zone_id: premise.zone_id.clone(),
            provider: premise.effective_provider().map(|p| p.name.clone()),
            provider_type: premise.ptype.clone(),
            object,
        };

        if version.object.deleting {
            version.valid = is_valid_dns_name(&version.object.dns_name);
            version.state = EntryState::Deleting;
            version.message = Some("entry is marked for deletion".to_string());
            // Keep the declared record sets around so a pending provider-side
            // deletion knows what to remove.
            version.record_sets = build_record_sets(&version.object, ttl).unwrap_or_default();
            return version;
        }

        if !is_valid_dns_name(&version.object.dns_name) {
            version.invalidate(format!(
                "invalid DNS name \"{}\"",
                version.object.dns_name
            ));
            return version;
        }

        match build_record_sets(&version.object, ttl) {
            Ok(sets) => version.record_sets = sets,
            Err(reason) => {
                version.invalidate(reason);
                return version;
            }
        }

        if premise.effective_provider().is_none() {
            version.state = EntryState::Error;
            version.message = Some(
                EntryFault::NoProvider {
                    dns_name: version.object.dns_name.clone(),
                }
                .to_string(),
            );
            return version;
        }
        if version.zone_id.is_none() {
            version.state = EntryState::Error;
            version.message = Some(
                EntryFault::NoZone {
                    dns_name: version.object.dns_name.clone(),
                }
                .to_string(),
            );
            return version;
        }

        version.valid = true;
        if version.object.resolved_targets.is_some() {
            version.interval = version.object.lookup_interval;
        }
        version.modified = match old {
            None => true,
            Some(old) => {
                let prior = old.snapshot();
                // An entry that never went ready has nothing on the zone yet,
                // whatever its last observed spec looked like.
                prior.state != EntryState::Ready
                    || prior.dns_name != version.dns_name()
                    || prior.ttl != version.ttl
                    || prior.active_zone.as_deref() != version.zone_id.as_deref()
                    || !same_record_sets(&prior.record_sets, &version.record_sets)
            }
        };
        version
    }

    fn invalidate(&mut self, reason: String) {
        self.valid = false;
        self.state = EntryState::Invalid;
        self.message = Some(EntryFault::Invalid(reason).to_string());
    }

    #[must_use]
    pub fn dns_name(&self) -> String {
        normalize_dns_name(&self.object.dns_name)
    }
}

fn same_record_sets(a: &[RecordSet], b: &[RecordSet]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().all(|ra| {
        b.iter()
            .any(|rb| ra.rtype == rb.rtype && ra.same_values(rb))
    })
}

/// Build the desired record sets for a non-deleting object.
///
/// Targets are classified per value: IPv4 addresses into an A set, IPv6 into
/// AAAA, and a single hostname into a CNAME. `text` values become a TXT set
/// and exclude targets. Multiple hostname targets must already be resolved
/// to addresses by the controller layer.
fn build_record_sets(object: &EntryObject, ttl: i64) -> Result<Vec<RecordSet>, String> {
    if object.kind == EntryKind::Lock {
        let lock = object
            .lock
            .as_ref()
            .ok_or_else(|| "lock entry without lock fields".to_string())?;
        if lock.lock_id.is_empty() {
            return Err("lock entry without lock id".to_string());
        }
        return Ok(vec![RecordSet::txt_from_attrs(
            object.ttl.unwrap_or(lock.ttl),
            &lock.lock_id,
            lock.timestamp,
            &lock.attributes,
        )]);
    }

    if !object.text.is_empty() {
        if !object.targets.is_empty() {
            return Err("only one of targets and text may be set".to_string());
        }
        return Ok(vec![RecordSet::from_values(
            RecordType::TXT,
            ttl,
            object.text.iter().cloned(),
        )]);
    }

    let targets = object
        .resolved_targets
        .as_ref()
        .unwrap_or(&object.targets);
    if targets.is_empty() {
        return Err("no targets specified".to_string());
    }

    let mut v4: Vec<String> = Vec::new();
    let mut v6: Vec<String> = Vec::new();
    let mut hosts: Vec<String> = Vec::new();
    for t in targets {
        match t.parse::<IpAddr>() {
            Ok(IpAddr::V4(_)) => push_unique(&mut v4, t.clone()),
            Ok(IpAddr::V6(_)) => push_unique(&mut v6, t.clone()),
            Err(_) => {
                if !is_valid_dns_name(t) {
                    return Err(format!("invalid target \"{t}\""));
                }
                push_unique(&mut hosts, normalize_dns_name(t));
            }
        }
    }

    if !hosts.is_empty() {
        if hosts.len() > 1 || !v4.is_empty() || !v6.is_empty() {
            return Err(
                "multiple hostname targets require address resolution (set a lookup interval)"
                    .to_string(),
            );
        }
        return Ok(vec![RecordSet::from_values(RecordType::CNAME, ttl, hosts)]);
    }

    let mut sets = Vec::new();
    if !v4.is_empty() {
        sets.push(RecordSet::from_values(RecordType::A, ttl, v4));
    }
    if !v6.is_empty() {
        sets.push(RecordSet::from_values(RecordType::AAAA, ttl, v6));
    }
    Ok(sets)
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

#[cfg(test)]
#[path = "entry_tests.rs"]
mod entry_tests;
