// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The DNS-lock subsystem.
//!
//! A lock owns a TXT record on its DNS name and uses it as a coarse
//! cross-cluster mutual exclusion primitive. Writes follow CAS semantics on
//! the record's `lockid` and `timestamp` attributes: a foreign lock id makes
//! the local lock `stale`, a newer remote timestamp backs off, and deletion
//! only removes a record the local writer still owns.
//!
//! A background refresh resolves every lock's TXT set through the operating
//! system's resolver (not the provider adapter) and re-arms the writer when
//! the record cannot be looked up for longer than twice its TTL.

use crate::dns::{parse_txt_attrs, RecordType, ATTR_LOCKID, ATTR_TIMESTAMP};
use crate::object::{EntryKind, EntryState, StatusPatch};
use crate::provider::Change;
use crate::state::entry::Entry;
use crate::state::providers::EntryPremise;
use crate::state::{ReconcileStatus, State};
use anyhow::anyhow;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

impl State {
    /// Write or refresh the lock's TXT record, honouring the CAS protocol.
    pub(crate) async fn check_and_update_lock(
        &self,
        entry: &Arc<Entry>,
        premise: &EntryPremise,
    ) -> ReconcileStatus {
        let snapshot = entry.snapshot();
        if !snapshot.update_required {
            return ReconcileStatus::Succeeded;
        }
        let Some(lock) = snapshot.lock.clone() else {
            return ReconcileStatus::Succeeded;
        };
        let Some(desired) = snapshot.record_sets.first() else {
            return ReconcileStatus::Succeeded;
        };
        let Some(adapter) = premise
            .effective_provider()
            .filter(|p| p.valid)
            .and_then(|p| p.adapter.clone())
        else {
            // No provider to write through; the entry status already says so.
            return ReconcileStatus::Succeeded;
        };
        let Some(zone) = premise
            .zone_id
            .as_deref()
            .and_then(|z| self.get_zone(z))
        else {
            return ReconcileStatus::Succeeded;
        };

        let observed = match adapter
            .get_record_set(&zone, &snapshot.dns_name, RecordType::TXT)
            .await
        {
            Ok(rs) => rs,
            Err(e) => return ReconcileStatus::Delayed(anyhow!(e)),
        };

        let mut changed = true;
        if let Some(observed) = observed.filter(|rs| !rs.is_empty()) {
            let remote_id = observed.attr(ATTR_LOCKID).unwrap_or_default();
            if lock.lock_id != remote_id {
                return self
                    .publish_lock_state(
                        entry,
                        EntryState::Stale,
                        &format!("mismatching lock ids {} != {remote_id}", lock.lock_id),
                    )
                    .await;
            }
            let raw_ts = observed.attr(ATTR_TIMESTAMP).unwrap_or_default();
            let remote_ts = match raw_ts.parse::<i64>() {
                Ok(ts) => ts,
                Err(_) => {
                    return self
                        .publish_lock_state(
                            entry,
                            EntryState::Stale,
                            &format!("invalid timestamp in DNS record: {raw_ts}"),
                        )
                        .await;
                }
            };
            if lock.timestamp < remote_ts {
                info!(
                    object = %entry.name(),
                    "skipping lock update because of timestamp {} < {remote_ts}",
                    lock.timestamp
                );
                return ReconcileStatus::Succeeded;
            }
            changed = !desired.same_values(&observed);
        }

        if changed {
            let change = Change::Create {
                name: snapshot.dns_name.clone(),
                rset: desired.clone(),
            };
            if let Some(Err(e)) = adapter
                .apply_changes(&zone, &[change])
                .await
                .into_iter()
                .next()
            {
                return ReconcileStatus::Delayed(anyhow!(e));
            }
        }

        entry.with_data(|d| {
            d.update_required = false;
            d.state = EntryState::Ready;
            d.message = Some("lock record is set".to_string());
            d.first_failed_lookup = None;
        });
        let patch = StatusPatch {
            state: Some(EntryState::Ready),
            message: Some("lock record is set".to_string()),
            provider: premise
                .effective_provider()
                .map(|p| p.name.to_string()),
            provider_type: premise.ptype.clone(),
            zone: premise.zone_id.clone(),
            observed_generation: Some(snapshot.generation),
            first_failed_dns_lookup: Some(None),
            ..StatusPatch::default()
        };
        ReconcileStatus::delay_on_error(
            self.access
                .write_entry_status(entry.name(), EntryKind::Lock, patch)
                .await,
        )
    }

    /// Delete the lock's TXT record when this writer still owns it, then
    /// release the finalizer.
    pub(crate) async fn check_and_delete_lock(
        &self,
        entry: &Arc<Entry>,
        premise: &EntryPremise,
    ) -> ReconcileStatus {
        let snapshot = entry.snapshot();
        let adapter = premise
            .effective_provider()
            .filter(|p| p.valid)
            .and_then(|p| p.adapter.clone());
        let zone = premise.zone_id.as_deref().and_then(|z| self.get_zone(z));

        if let (Some(lock), Some(adapter), Some(zone)) = (snapshot.lock.clone(), adapter, zone) {
            let observed = match adapter
                .get_record_set(&zone, &snapshot.dns_name, RecordType::TXT)
                .await
            {
                Ok(rs) => rs,
                Err(e) => return ReconcileStatus::Delayed(anyhow!(e)),
            };
            if let Some(observed) = observed.filter(|rs| !rs.is_empty()) {
                let remote_id = observed.attr(ATTR_LOCKID).unwrap_or_default();
                let remote_ts = observed
                    .attr(ATTR_TIMESTAMP)
                    .and_then(|v| v.parse::<i64>().ok())
                    .unwrap_or(0);
                if lock.lock_id == remote_id && remote_ts <= lock.timestamp {
                    let change = Change::Delete {
                        name: snapshot.dns_name.clone(),
                        rtype: RecordType::TXT,
                    };
                    if let Some(Err(e)) = adapter
                        .apply_changes(&zone, &[change])
                        .await
                        .into_iter()
                        .next()
                    {
                        return ReconcileStatus::Delayed(anyhow!(e));
                    }
                    info!(object = %entry.name(), "lock record deleted");
                } else {
                    info!(
                        object = %entry.name(),
                        "lock record taken over by {remote_id}, leaving it in place"
                    );
                }
            }
        }

        let result = self
            .access
            .remove_finalizer(entry.name(), EntryKind::Lock)
            .await;
        if result.is_ok() {
            entry.with_data(|d| d.has_finalizer = false);
        }
        ReconcileStatus::delay_on_error(result)
    }

    async fn publish_lock_state(
        &self,
        entry: &Arc<Entry>,
        state: EntryState,
        message: &str,
    ) -> ReconcileStatus {
        entry.with_data(|d| {
            d.state = state;
            d.message = Some(message.to_string());
        });
        ReconcileStatus::delay_on_error(
            self.access
                .write_entry_status(
                    entry.name(),
                    EntryKind::Lock,
                    StatusPatch::state(state, message),
                )
                .await,
        )
    }

    /// Run the periodic lock lookup refresh until the task is aborted.
    pub async fn run_lock_refresh(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.lock_refresh_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.update_lock_states().await;
        }
    }

    /// Refresh the observed status of every lock entry via the OS resolver.
    pub async fn update_lock_states(&self) {
        self.update_lock_states_at(Utc::now()).await;
    }

    pub(crate) async fn update_lock_states_at(&self, now: DateTime<Utc>) {
        let locks: Vec<Arc<Entry>> = self
            .data()
            .entries
            .values()
            .filter(|e| e.kind() == EntryKind::Lock)
            .cloned()
            .collect();

        for entry in locks {
            let snapshot = entry.snapshot();
            let Some(lock) = snapshot.lock.clone() else {
                continue;
            };

            let mut update_required = false;
            let mut first_failed: Option<DateTime<Utc>> = None;
            let mut observed_ts: Option<i64> = None;
            let mut attrs = std::collections::BTreeMap::new();

            match self.resolver.lookup_txt(&snapshot.dns_name).await {
                Ok(records) => {
                    debug!(object = %entry.name(), ?records, "lock lookup succeeded");
                    attrs = parse_txt_attrs(records.iter().map(String::as_str));
                    if let Some(raw) = attrs.remove(ATTR_TIMESTAMP) {
                        observed_ts = raw.parse::<i64>().ok();
                    }
                }
                Err(err) => {
                    warn!(
                        dns_name = %snapshot.dns_name,
                        "dns lookup failed for lock: {err}"
                    );
                    let ttl = ChronoDuration::seconds(lock.ttl.max(0));
                    match snapshot.first_failed_lookup.filter(|ff| *ff > self.startup) {
                        Some(ff) => {
                            first_failed = Some(ff);
                            if now - ff > ttl * 2 {
                                info!(object = %entry.name(), "trying to resurrect dns lock");
                                update_required = true;
                            }
                        }
                        None => {
                            first_failed = Some(now);
                            if snapshot.state != EntryState::Ready {
                                info!(object = %entry.name(), "requesting update for dns lock");
                                update_required = true;
                            }
                        }
                    }
                }
            }

            let (state, message) = if first_failed.is_some() {
                (EntryState::Stale, "DNS record cannot be looked up")
            } else {
                (EntryState::Ready, "DNS record is set")
            };

            let _guard = entry.reconcile_lock.lock().await;
            entry.with_data(|d| {
                d.first_failed_lookup = first_failed;
                d.state = state;
                d.message = Some(message.to_string());
                if update_required {
                    d.update_required = true;
                }
            });

            let patch = StatusPatch {
                state: Some(state),
                message: Some(message.to_string()),
                lock_timestamp: observed_ts,
                lock_attributes: Some(attrs),
                first_failed_dns_lookup: Some(first_failed),
                ..StatusPatch::default()
            };
            if let Err(err) = self
                .access
                .write_entry_status(entry.name(), EntryKind::Lock, patch)
                .await
            {
                warn!(object = %entry.name(), "lock status writeback failed: {err}");
            }

            if update_required {
                self.access.trigger_entry(entry.name(), EntryKind::Lock);
            }
        }
    }
}

#[cfg(test)]
#[path = "locks_tests.rs"]
mod locks_tests;
