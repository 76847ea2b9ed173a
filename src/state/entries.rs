// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The per-event state transition kernel.
//!
//! [`State::update_entry`] and [`State::delete_entry`] are the engine's
//! public contract per observed event. Decisions are taken under the global
//! state lock in `add_entry_version_locked`; all control-plane I/O (status
//! writes, finalizer changes, re-triggers) is collected into a
//! [`VersionOutcome`] and performed after the lock is released.

use crate::dns_errors::EntryFault;
use crate::object::{EntryKind, EntryObject, EntryState, ObjectName, StatusPatch};
use crate::state::entry::{Entry, EntryVersion};
use crate::state::{smart_info_locked, ReconcileStatus, State, StateData};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Deferred effects of one kernel pass.
#[derive(Default)]
struct VersionOutcome {
    /// The installed entry; `None` when the entry is foreign and skipped.
    entry: Option<Arc<Entry>>,
    /// Remove the controller finalizer after the lock is released.
    remove_finalizer: bool,
    /// Status to write for this entry, if it changed.
    status_patch: Option<StatusPatch>,
    /// Other entries to re-enqueue (demoted holders, promoted duplicates).
    retrigger: Vec<(ObjectName, EntryKind)>,
    /// Zones to trigger (old zone after a zone move, deletion batches).
    trigger_zones: Vec<String>,
    /// The entry went to the outdated set awaiting provider-side deletion.
    deferred_to_outdated: bool,
}

impl State {
    /// Handle an observed (non-deleting) entry or lock object.
    pub async fn update_entry(self: &Arc<Self>, object: EntryObject) -> ReconcileStatus {
        self.handle_update_entry("reconcile", object).await
    }

    /// Handle an observed object carrying a deletion timestamp.
    pub async fn delete_entry(self: &Arc<Self>, object: EntryObject) -> ReconcileStatus {
        self.handle_update_entry("delete", object).await
    }

    async fn handle_update_entry(
        self: &Arc<Self>,
        op: &str,
        object: EntryObject,
    ) -> ReconcileStatus {
        debug!(%op, object = %object.name, dns_name = %object.dns_name, "handling entry event");

        let old = self.get_entry(&object.name);
        let _entry_guard = match &old {
            Some(e) => Some(e.reconcile_lock.lock().await),
            None => None,
        };

        let premise = self.entry_premise(&object);
        let version = EntryVersion::build(object, &premise, &self.config, old.as_deref());
        if version.obsolete {
            self.smart_info(&format!(
                "entry {} resolved through fallback provider",
                version.object.name
            ));
        }

        let managed = self.is_managing(version.provider_type.as_deref())
            && self.owner_active(version.object.owner_id.as_deref());

        // The finalizer must be on the object before any provider-side
        // record can come into existence.
        if !version.object.deleting && version.valid && managed && !version.object.has_finalizer {
            if let Err(e) = self
                .access
                .set_finalizer(&version.object.name, version.object.kind)
                .await
            {
                return ReconcileStatus::Delayed(e.into());
            }
        }

        let outcome = {
            let mut data = self.data_mut();
            self.add_entry_version_locked(&mut data, &version, managed)
        };
        self.publish_entry_metrics();
        if !version.object.deleting && version.valid && managed {
            if let Some(entry) = &outcome.entry {
                entry.with_data(|d| d.has_finalizer = true);
            }
        }

        for zone_id in &outcome.trigger_zones {
            self.trigger_hosted_zone(zone_id);
        }
        for (name, kind) in &outcome.retrigger {
            self.access.trigger_entry(name, *kind);
        }
        if let Some(patch) = outcome.status_patch.clone() {
            if let Err(e) = self
                .access
                .write_entry_status(&version.object.name, version.object.kind, patch)
                .await
            {
                return ReconcileStatus::Delayed(e.into());
            }
        }
        if outcome.remove_finalizer {
            if let Err(e) = self
                .access
                .remove_finalizer(&version.object.name, version.object.kind)
                .await
            {
                return ReconcileStatus::Delayed(e.into());
            }
            if let Some(entry) = &outcome.entry {
                entry.with_data(|d| d.has_finalizer = false);
            }
        }

        let mut status = ReconcileStatus::Succeeded;

        if let Some(entry) = &outcome.entry {
            if entry.kind() == EntryKind::Lock {
                return if version.object.deleting {
                    self.check_and_delete_lock(entry, &premise).await
                } else {
                    self.check_and_update_lock(entry, &premise).await
                };
            }

            if version.object.deleting {
                if outcome.deferred_to_outdated {
                    if let Some(zone) = entry.active_zone() {
                        self.trigger_hosted_zone(&zone);
                    }
                }
            } else {
                if let Some(interval) = entry.snapshot().interval.filter(|i| *i > 0) {
                    #[allow(clippy::cast_sign_loss)]
                    {
                        status = status.reschedule_after(Duration::from_secs(interval as u64));
                    }
                }
                if entry.is_modified() {
                    if let Some(zone) = entry.active_zone() {
                        if self.get_zone(&zone).is_some() {
                            self.smart_info(&format!("triggering hosted zone {zone}"));
                            self.trigger_hosted_zone(&zone);
                        }
                    }
                } else {
                    debug!(object = %version.object.name, "entry not modified, no zone trigger");
                }
            }
        }

        // A premise shift during the reconcile invalidates what was just
        // committed; run again rather than publish a stale binding.
        if !version.object.deleting {
            let check = self.entry_premise(&version.object);
            if !check.matches(&premise) {
                info!(
                    "{} -> repeating reconciliation",
                    premise.describe_change(&check)
                );
                return ReconcileStatus::Repeat;
            }
        }
        status
    }

    /// The state transition kernel, executed under the global write lock.
    fn add_entry_version_locked(
        &self,
        data: &mut StateData,
        version: &EntryVersion,
        managed: bool,
    ) -> VersionOutcome {
        let name = &version.object.name;
        data.blocking.remove(name);

        let old = data.entries.get(name).cloned();
        let was_duplicate = old.as_ref().is_some_and(|o| o.is_duplicate());
        let new = match &old {
            None => Entry::from_version(version),
            Some(o) => o.update_from(version),
        };

        let mut out = VersionOutcome {
            entry: Some(new.clone()),
            ..VersionOutcome::default()
        };

        if version.object.deleting {
            if let Some(old_entry) = &old {
                if old_entry.kind() != EntryKind::Lock {
                    // Lock entries keep their index slot until the object is
                    // actually gone; the lock delete protocol handles them.
                    if let Some(promoted) = self.cleanup_entry_locked(data, old_entry) {
                        out.retrigger.push(promoted);
                    }
                }
            }

            if version.valid {
                let zone_known = new
                    .active_zone()
                    .is_some_and(|z| data.zones.contains_key(&z));
                if zone_known {
                    if version.object.has_finalizer {
                        info!(
                            object = %name,
                            "deletion deferred until the provider record is removed"
                        );
                        data.entries.insert(name.clone(), new.clone());
                        data.outdated.insert(name.clone(), new.clone());
                        out.deferred_to_outdated = true;
                        return out;
                    }
                    // No finalizer means no live record; let the object go.
                } else {
                    if let Some(zone) = new.active_zone() {
                        info!(object = %name, %zone, "hosted zone of deleted entry is gone");
                    }
                    out.remove_finalizer = version.object.has_finalizer;
                }
            } else if !data.owners.is_active(version.object.owner_id.as_deref())
                || version.object.status.state.as_deref() != Some(EntryState::Stale.as_str())
            {
                smart_info_locked(data, "deleting yet unmanaged or erroneous entry");
                out.remove_finalizer = version.object.has_finalizer;
            } else if version.object.has_finalizer {
                smart_info_locked(data, "preventing deletion of stale entry");
            }
            return out;
        }

        data.entries.insert(name.clone(), new.clone());

        if let Some(old_entry) = &old {
            if !Arc::ptr_eq(old_entry, &new) {
                info!(object = %name, dns_name = %new.dns_name(), "dns name changed");
                if let Some(promoted) = self.cleanup_entry_locked(data, old_entry) {
                    out.retrigger.push(promoted);
                }
                // The new entry took the index slot back from the cleanup.
                data.entries.insert(name.clone(), new.clone());
                if let Some(old_zone) = old_entry.active_zone() {
                    if new.active_zone().as_deref() != Some(old_zone.as_str())
                        && data.zones.contains_key(&old_zone)
                    {
                        info!(zone = %old_zone, "dns name moved, triggering old zone");
                        out.trigger_zones.push(old_zone);
                    }
                }
            }
        }

        if !version.valid {
            // Error and invalid transitions are published even when nobody
            // here manages the entry, so the object tells its own story.
            out.status_patch =
                changed_state_patch(&version.object, version.state, version.message.as_deref());
        }

        if !managed {
            smart_info_locked(
                data,
                &format!(
                    "foreign zone {}({}) -> skipping reconciliation",
                    version.zone_id.as_deref().unwrap_or("<unknown>"),
                    version.provider_type.as_deref().unwrap_or("<unknown>"),
                ),
            );
            out.entry = None;
            return out;
        }

        let dns_name = new.dns_name();
        if !dns_name.is_empty() {
            if let Some(cur) = data.dnsnames.get(&dns_name).cloned() {
                if cur.name() != new.name() {
                    if cur.before(&new) {
                        new.with_data(|d| {
                            d.duplicate = true;
                            d.modified = false;
                        });
                        let fault = EntryFault::AlreadyBusy {
                            dns_name: dns_name.clone(),
                            holder: cur.name().clone(),
                        };
                        warn!("{fault}");
                        out.status_patch = changed_state_patch(
                            &version.object,
                            EntryState::Error,
                            Some(&fault.to_string()),
                        );
                        return out;
                    }
                    // This entry is earlier; the current holder loses.
                    cur.with_data(|d| {
                        d.duplicate = true;
                        d.modified = false;
                    });
                    warn!(
                        "DNS name {dns_name} already busy for entry {}, but this one was earlier",
                        cur.name()
                    );
                    info!(object = %cur.name(), "rescheduling demoted entry for error update");
                    out.retrigger.push((cur.name().clone(), cur.kind()));
                }
            }
            if version.valid
                && !matches!(new.snapshot().state, EntryState::Ready | EntryState::Pending)
            {
                let msg = format!("activating for {dns_name}");
                info!(object = %name, "{msg}");
                new.with_data(|d| {
                    d.state = EntryState::Pending;
                    d.message = Some(msg.clone());
                });
                out.status_patch = Some(StatusPatch {
                    observed_generation: Some(version.object.generation),
                    ..StatusPatch::state(EntryState::Pending, msg)
                });
            }
            if was_duplicate && version.valid {
                // A promoted duplicate takes over the claim; its records are
                // not on the zone yet no matter what the old entry said.
                new.with_data(|d| d.modified = true);
            }
            data.dnsnames.insert(dns_name, new.clone());
        }

        if new.is_modified() {
            // Defer this entry's zone batch so bursts of mutations land in
            // one provider call.
            data.blocking
                .insert(name.clone(), std::time::Instant::now());
        }

        out
    }

    /// Remove an entry from the index; when it held the active claim on its
    /// DNS name, release the claim and promote the earliest waiting
    /// duplicate. Returns the promoted entry to re-enqueue.
    pub(crate) fn cleanup_entry_locked(
        &self,
        data: &mut StateData,
        entry: &Arc<Entry>,
    ) -> Option<(ObjectName, EntryKind)> {
        smart_info_locked(
            data,
            &format!(
                "cleaning up entry {} (duplicate={})",
                entry.name(),
                entry.is_duplicate()
            ),
        );
        if data
            .entries
            .get(entry.name())
            .is_some_and(|cur| Arc::ptr_eq(cur, entry))
        {
            data.entries.remove(entry.name());
        }

        let dns_name = entry.dns_name();
        let mut promoted = None;
        if data
            .dnsnames
            .get(&dns_name)
            .is_some_and(|cur| cur.name() == entry.name())
        {
            let mut found: Option<Arc<Entry>> = None;
            for candidate in data.entries.values() {
                if candidate.is_duplicate() && candidate.dns_name() == dns_name {
                    let earlier = found.as_ref().is_none_or(|f| candidate.before(f));
                    if earlier {
                        found = Some(candidate.clone());
                    }
                }
            }
            match &found {
                None => info!(%dns_name, "no duplicate found to reactivate"),
                Some(f) => {
                    info!(
                        %dns_name,
                        promoted = %f.name(),
                        replacing = %entry.name(),
                        "reactivating duplicate claim"
                    );
                    promoted = Some((f.name().clone(), f.kind()));
                }
            }
            data.dnsnames.remove(&dns_name);
        }
        promoted
    }

    /// Handle the disappearance of an input object from the watch stream.
    pub async fn entry_deleted(self: &Arc<Self>, name: &ObjectName) -> ReconcileStatus {
        let mut retrigger = None;
        let mut zone_trigger = None;
        {
            let mut data = self.data_mut();
            data.blocking.remove(name);
            data.outdated.remove(name);
            if let Some(old) = data.entries.get(name).cloned() {
                match old.active_zone().filter(|z| data.zones.contains_key(z)) {
                    Some(zone) => {
                        info!(object = %name, dns_name = %old.dns_name(), %zone, "removing entry");
                        zone_trigger = Some(zone);
                    }
                    None => smart_info_locked(
                        &data,
                        &format!("removing foreign entry {name} ({})", old.dns_name()),
                    ),
                }
                retrigger = self.cleanup_entry_locked(&mut data, &old);
            } else {
                debug!(object = %name, "removing unknown entry");
            }
        }
        self.publish_entry_metrics();
        if let Some(zone) = zone_trigger {
            self.trigger_hosted_zone(&zone);
        }
        if let Some((name, kind)) = retrigger {
            self.access.trigger_entry(&name, kind);
        }
        ReconcileStatus::Succeeded
    }
}

/// Build a status patch when the target state or message differs from what
/// is already observed on the object.
fn changed_state_patch(
    object: &EntryObject,
    state: EntryState,
    message: Option<&str>,
) -> Option<StatusPatch> {
    let unchanged = object.status.state.as_deref() == Some(state.as_str())
        && object.status.message.as_deref() == message;
    if unchanged {
        return None;
    }
    Some(StatusPatch {
        state: Some(state),
        message: message.map(ToString::to_string),
        observed_generation: Some(object.generation),
        ..StatusPatch::default()
    })
}

#[cfg(test)]
#[path = "entries_tests.rs"]
mod entries_tests;
