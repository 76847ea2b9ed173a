// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-zone batched reconciliation.
//!
//! Each hosted zone has one slot: at most one batch runs at a time, and
//! triggers arriving during a run set a dirty flag that coalesces into one
//! follow-up run. A batch gathers all index entries bound to the zone, diffs
//! them against the adapter's current record sets, applies the minimal
//! change set and writes per-entry outcomes back. Entries awaiting deletion
//! lose their finalizer only after their delete is observed to succeed.

use crate::dns::{RecordSet, RecordType};
use crate::dns_errors::ProviderError;
use crate::object::{EntryKind, EntryState, ObjectName, StatusPatch};
use crate::provider::{Change, DnsAdapter, HostedZone};
use crate::state::entry::Entry;
use crate::state::providers::ProviderState;
use crate::state::State;
use anyhow::anyhow;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Concurrency gate for one zone: capacity one, with trigger coalescing.
#[derive(Default)]
pub(crate) struct ZoneSlot {
    dirty: AtomicBool,
    running: AtomicBool,
}

/// Everything one batch needs, snapshotted under the read lock.
struct ZoneWork {
    zone: HostedZone,
    adapter: Arc<dyn DnsAdapter>,
    provider: Arc<ProviderState>,
    desired: Vec<DesiredEntry>,
    outdated: Vec<Arc<Entry>>,
}

struct DesiredEntry {
    entry: Arc<Entry>,
    dns_name: String,
    sets: Vec<RecordSet>,
}

#[derive(Clone, Copy)]
enum ChangeRef {
    Desired(usize),
    Outdated(usize),
}

impl State {
    /// Request a reconciliation batch for a zone.
    ///
    /// Starts the zone worker when idle; otherwise marks the slot dirty so
    /// the in-flight batch is followed by exactly one more run.
    pub fn trigger_hosted_zone(self: &Arc<Self>, zone_id: &str) {
        let slot = {
            let mut slots = self.zone_slots.lock().expect("zone slots poisoned");
            slots
                .entry(zone_id.to_string())
                .or_insert_with(|| Arc::new(ZoneSlot::default()))
                .clone()
        };
        slot.dirty.store(true, Ordering::SeqCst);
        if !slot.running.swap(true, Ordering::SeqCst) {
            let state = self.clone();
            let zone_id = zone_id.to_string();
            tokio::spawn(async move {
                State::zone_worker(state, zone_id, slot).await;
            });
        } else {
            debug!(zone = %zone_id, "zone batch in flight, trigger coalesced");
        }
    }

    async fn zone_worker(state: Arc<Self>, zone_id: String, slot: Arc<ZoneSlot>) {
        let mut backoff = crate::reconcilers::retry::default_backoff();
        loop {
            // Recently-mutated entries defer the batch so bursts land in a
            // single provider call.
            while let Some(delay) = state.zone_blocking_delay(&zone_id) {
                debug!(zone = %zone_id, ?delay, "zone batch deferred by blocking entries");
                tokio::time::sleep(delay).await;
            }

            slot.dirty.store(false, Ordering::SeqCst);
            match state.reconcile_zone(&zone_id).await {
                Ok(()) => backoff = crate::reconcilers::retry::default_backoff(),
                Err(e) => {
                    warn!(zone = %zone_id, error = %e, "zone reconciliation failed, will retry");
                    slot.dirty.store(true, Ordering::SeqCst);
                    let delay = match backoff.next_backoff() {
                        Some(d) => d,
                        None => {
                            backoff = crate::reconcilers::retry::default_backoff();
                            Duration::from_secs(30)
                        }
                    };
                    tokio::time::sleep(delay).await;
                }
            }

            if !slot.dirty.load(Ordering::SeqCst) {
                slot.running.store(false, Ordering::SeqCst);
                // A trigger may have slipped in between the check and the
                // release; reclaim the slot instead of losing the run.
                if slot.dirty.load(Ordering::SeqCst) && !slot.running.swap(true, Ordering::SeqCst) {
                    continue;
                }
                return;
            }
        }
    }

    /// Remaining time before the zone's blocking window is clear.
    fn zone_blocking_delay(&self, zone_id: &str) -> Option<Duration> {
        let interval = self.config.blocking_interval;
        if interval.is_zero() {
            return None;
        }
        let now = std::time::Instant::now();
        let mut data = self.data_mut();
        data.blocking
            .retain(|_, marked| now.duration_since(*marked) < interval);
        let crate::state::StateData {
            blocking, entries, ..
        } = &*data;
        blocking
            .iter()
            .filter(|(name, _)| {
                entries
                    .get(*name)
                    .is_some_and(|e| e.active_zone().as_deref() == Some(zone_id))
            })
            .map(|(_, marked)| *marked + interval)
            .max()
            .and_then(|deadline| deadline.checked_duration_since(now))
    }

    /// Run one reconciliation batch for a zone.
    ///
    /// # Errors
    ///
    /// Transient adapter or control-plane failures; the worker retries with
    /// backoff. Permanent per-change failures become entry statuses and do
    /// not fail the batch.
    pub(crate) async fn reconcile_zone(&self, zone_id: &str) -> anyhow::Result<()> {
        let Some(work) = self.gather_zone_work(zone_id) else {
            return Ok(());
        };

        let current_sets = work
            .adapter
            .list_record_sets(&work.zone)
            .await
            .map_err(|e| anyhow!("listing record sets of zone {zone_id}: {e}"))?;
        let current: HashMap<(String, RecordType), RecordSet> = current_sets
            .into_iter()
            .map(|(name, rs)| ((crate::dns::normalize_dns_name(&name), rs.rtype), rs))
            .collect();

        let (changes, change_refs) = compute_changes(&work, &current);
        crate::metrics::record_zone_changes(zone_id, &changes);

        let outcomes = if changes.is_empty() {
            Vec::new()
        } else {
            info!(
                zone = %zone_id,
                provider = %work.provider.name,
                changes = changes.len(),
                "applying zone change batch"
            );
            work.adapter.apply_changes(&work.zone, &changes).await
        };

        let mut desired_errors: Vec<Option<ProviderError>> = Vec::new();
        desired_errors.resize_with(work.desired.len(), || None);
        let mut outdated_errors: Vec<Option<ProviderError>> = Vec::new();
        outdated_errors.resize_with(work.outdated.len(), || None);
        for (outcome, change_ref) in outcomes.iter().zip(change_refs.iter()) {
            if let Err(e) = outcome {
                match change_ref {
                    ChangeRef::Desired(i) => {
                        desired_errors[*i].get_or_insert_with(|| e.clone());
                    }
                    ChangeRef::Outdated(i) => {
                        outdated_errors[*i].get_or_insert_with(|| e.clone());
                    }
                }
            }
        }

        let mut transient_failures = 0usize;

        for (d, error) in work.desired.iter().zip(desired_errors.iter()) {
            match error {
                None => {
                    if let Err(e) = self.publish_entry_ready(&work, d).await {
                        warn!(object = %d.entry.name(), error = %e, "status writeback failed");
                        transient_failures += 1;
                    }
                }
                Some(e) if e.is_transient() => {
                    transient_failures += 1;
                }
                Some(e) => {
                    let patch = StatusPatch::state(EntryState::Error, e.to_string());
                    d.entry.with_data(|data| {
                        data.state = EntryState::Error;
                        data.message = Some(e.to_string());
                        data.modified = false;
                    });
                    if let Err(err) = self
                        .access
                        .write_entry_status(d.entry.name(), d.entry.kind(), patch)
                        .await
                    {
                        warn!(object = %d.entry.name(), error = %err, "status writeback failed");
                        transient_failures += 1;
                    }
                }
            }
        }

        for (entry, error) in work.outdated.iter().zip(outdated_errors.iter()) {
            match error {
                None => {
                    if let Err(e) = self.finish_entry_deletion(entry).await {
                        warn!(object = %entry.name(), error = %e, "finalizer removal failed");
                        transient_failures += 1;
                    }
                }
                Some(e) => {
                    debug!(object = %entry.name(), error = %e, "provider-side deletion pending");
                    transient_failures += 1;
                }
            }
        }

        if transient_failures > 0 {
            return Err(anyhow!(
                "{transient_failures} pending operations in zone {zone_id}"
            ));
        }
        Ok(())
    }

    /// Snapshot the batch input under the read lock. `None` means there is
    /// nothing to do (zone unknown or provider unable to accept changes).
    fn gather_zone_work(&self, zone_id: &str) -> Option<ZoneWork> {
        let mut stranded: Vec<(ObjectName, EntryKind)> = Vec::new();
        let mut work = None;
        {
            let data = self.data();
            match data.zones.get(zone_id).cloned() {
                None => {
                    // Zone disappeared with its provider; re-enqueue deleting
                    // entries so the entry path can release their finalizers.
                    for e in data.outdated.values() {
                        if e.active_zone().as_deref() == Some(zone_id) {
                            stranded.push((e.name().clone(), e.kind()));
                        }
                    }
                    debug!(zone = %zone_id, "zone no longer known, skipping batch");
                }
                Some(zone) => match data.providers.get(&zone.provider).cloned() {
                    None => debug!(zone = %zone_id, "owning provider unknown, skipping batch"),
                    Some(provider) if !provider.valid => info!(
                        zone = %zone_id,
                        provider = %provider.name,
                        "provider not valid, zone changes withheld"
                    ),
                    Some(provider) => {
                        if let Some(adapter) = provider.adapter.clone() {
                            let mut desired = Vec::new();
                            for entry in data.entries.values() {
                                if entry.kind() != EntryKind::Regular {
                                    continue;
                                }
                                let d = entry.snapshot();
                                if d.active_zone.as_deref() != Some(zone_id)
                                    || !d.valid
                                    || d.duplicate
                                    || d.deleting
                                    || !data.owners.is_active(d.owner_id.as_deref())
                                {
                                    continue;
                                }
                                desired.push(DesiredEntry {
                                    entry: entry.clone(),
                                    dns_name: d.dns_name.clone(),
                                    sets: d.record_sets.clone(),
                                });
                            }
                            let outdated: Vec<Arc<Entry>> = data
                                .outdated
                                .values()
                                .filter(|e| {
                                    e.kind() == EntryKind::Regular
                                        && e.active_zone().as_deref() == Some(zone_id)
                                })
                                .cloned()
                                .collect();
                            work = Some(ZoneWork {
                                zone,
                                adapter,
                                provider,
                                desired,
                                outdated,
                            });
                        }
                    }
                },
            }
        }
        for (name, kind) in stranded {
            self.access.trigger_entry(&name, kind);
        }
        work
    }

    async fn publish_entry_ready(&self, work: &ZoneWork, d: &DesiredEntry) -> anyhow::Result<()> {
        let snapshot = d.entry.snapshot();
        if snapshot.state == EntryState::Ready && !snapshot.modified {
            return Ok(());
        }
        let targets: Vec<String> = d
            .sets
            .iter()
            .flat_map(|rs| rs.records.iter().map(|r| r.value.clone()))
            .collect();
        let patch = StatusPatch {
            state: Some(EntryState::Ready),
            message: Some("dns entry active".to_string()),
            provider: Some(work.provider.name.to_string()),
            provider_type: Some(work.provider.type_code.clone()),
            zone: Some(work.zone.id.clone()),
            targets: Some(targets),
            ttl: Some(snapshot.ttl),
            observed_generation: Some(snapshot.generation),
            ..StatusPatch::default()
        };
        self.access
            .write_entry_status(d.entry.name(), d.entry.kind(), patch)
            .await?;
        d.entry.with_data(|data| {
            data.state = EntryState::Ready;
            data.message = Some("dns entry active".to_string());
            data.modified = false;
        });
        Ok(())
    }

    /// Provider-side deletion confirmed: drop the finalizer and forget the
    /// entry.
    async fn finish_entry_deletion(&self, entry: &Arc<Entry>) -> anyhow::Result<()> {
        self.access
            .remove_finalizer(entry.name(), entry.kind())
            .await?;
        entry.with_data(|d| d.has_finalizer = false);
        info!(object = %entry.name(), "provider record deleted, finalizer released");
        let mut data = self.data_mut();
        data.outdated.remove(entry.name());
        if data
            .entries
            .get(entry.name())
            .is_some_and(|cur| Arc::ptr_eq(cur, entry))
        {
            data.entries.remove(entry.name());
        }
        Ok(())
    }
}

/// Compute the minimal change set between desired entries and the zone's
/// current record sets. Outdated record sets are only deleted while no
/// remaining entry claims the same (name, type).
fn compute_changes(
    work: &ZoneWork,
    current: &HashMap<(String, RecordType), RecordSet>,
) -> (Vec<Change>, Vec<ChangeRef>) {
    let mut changes = Vec::new();
    let mut refs = Vec::new();

    let mut claimed: HashSet<(String, RecordType)> = HashSet::new();
    for d in &work.desired {
        for rs in &d.sets {
            claimed.insert((d.dns_name.clone(), rs.rtype));
        }
    }

    for (i, d) in work.desired.iter().enumerate() {
        for rs in &d.sets {
            let key = (d.dns_name.clone(), rs.rtype);
            match current.get(&key) {
                None => {
                    changes.push(Change::Create {
                        name: d.dns_name.clone(),
                        rset: rs.clone(),
                    });
                    refs.push(ChangeRef::Desired(i));
                }
                Some(cur) if !cur.same_values(rs) => {
                    changes.push(Change::Update {
                        name: d.dns_name.clone(),
                        rset: rs.clone(),
                    });
                    refs.push(ChangeRef::Desired(i));
                }
                Some(_) => {}
            }
        }
    }

    for (i, entry) in work.outdated.iter().enumerate() {
        let snapshot = entry.snapshot();
        for rs in &snapshot.record_sets {
            let key = (snapshot.dns_name.clone(), rs.rtype);
            if claimed.contains(&key) {
                continue;
            }
            if current.contains_key(&key) {
                changes.push(Change::Delete {
                    name: snapshot.dns_name.clone(),
                    rtype: rs.rtype,
                });
                refs.push(ChangeRef::Outdated(i));
            }
        }
    }

    (changes, refs)
}

#[cfg(test)]
#[path = "zones_tests.rs"]
mod zones_tests;
