// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes implementation of the engine's object access layer.
//!
//! Translates between the CRD types and the engine's [`EntryObject`]
//! snapshots, performs status writes as merge patches on the status
//! subresource (with a bounded conflict retry), manages the controller
//! finalizer and feeds engine-initiated re-triggers into the controllers'
//! external trigger streams.

use crate::constants::MAX_STATUS_CONFLICT_RETRIES;
use crate::crd::{DNSEntry, DNSLock};
use crate::labels::FINALIZER_DNS_ENTRY;
use crate::object::{
    with_conflict_retry, AccessError, EntryKind, EntryObject, EntryState, LockFields, ObjectAccess,
    ObjectName, ObservedStatus, StatusPatch,
};
use crate::reconcilers::finalizers;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::channel::mpsc;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde_json::json;
use tracing::warn;

/// Build the engine snapshot of a `DNSEntry`.
#[must_use]
pub fn snapshot_from_entry(entry: &DNSEntry) -> EntryObject {
    let meta = entry.meta();
    let status = entry.status.clone().unwrap_or_default();
    EntryObject {
        name: ObjectName::new(meta.namespace.clone().unwrap_or_default(), entry.name_any()),
        kind: EntryKind::Regular,
        generation: meta.generation.unwrap_or_default(),
        created: meta
            .creation_timestamp
            .as_ref()
            .map_or_else(Utc::now, |t| t.0),
        deleting: meta.deletion_timestamp.is_some(),
        has_finalizer: finalizers::has_finalizer(entry, FINALIZER_DNS_ENTRY),
        dns_name: entry.spec.dns_name.clone(),
        targets: entry.spec.targets.clone(),
        text: entry.spec.text.clone(),
        ttl: entry.spec.ttl,
        owner_id: entry.spec.owner_id.clone(),
        provider_type: entry.spec.provider_type.clone(),
        lookup_interval: entry.spec.cname_lookup_interval,
        resolved_targets: None,
        lock: None,
        status: ObservedStatus {
            state: status.state,
            message: status.message,
            zone: status.zone,
            provider: status.provider,
            provider_type: status.provider_type,
            first_failed_dns_lookup: None,
        },
    }
}

/// Build the engine snapshot of a `DNSLock`.
#[must_use]
pub fn snapshot_from_lock(lock: &DNSLock) -> EntryObject {
    let meta = lock.meta();
    let status = lock.status.clone().unwrap_or_default();
    EntryObject {
        name: ObjectName::new(meta.namespace.clone().unwrap_or_default(), lock.name_any()),
        kind: EntryKind::Lock,
        generation: meta.generation.unwrap_or_default(),
        created: meta
            .creation_timestamp
            .as_ref()
            .map_or_else(Utc::now, |t| t.0),
        deleting: meta.deletion_timestamp.is_some(),
        has_finalizer: finalizers::has_finalizer(lock, FINALIZER_DNS_ENTRY),
        dns_name: lock.spec.dns_name.clone(),
        targets: Vec::new(),
        text: Vec::new(),
        ttl: Some(lock.spec.ttl),
        owner_id: None,
        provider_type: None,
        lookup_interval: None,
        resolved_targets: None,
        lock: Some(LockFields {
            lock_id: lock.spec.lock_id.clone(),
            timestamp: lock.spec.timestamp,
            ttl: lock.spec.ttl,
            attributes: lock.spec.attributes.clone(),
        }),
        status: ObservedStatus {
            state: status.state,
            message: status.message,
            zone: status.zone,
            provider: status.provider,
            provider_type: status.provider_type,
            first_failed_dns_lookup: status
                .first_failed_dns_lookup
                .as_deref()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&Utc)),
        },
    }
}

/// Object access backed by the Kubernetes API.
pub struct KubeAccess {
    client: Client,
    entry_tx: mpsc::UnboundedSender<()>,
    lock_tx: mpsc::UnboundedSender<()>,
}

impl KubeAccess {
    /// Build the access layer plus the trigger streams to wire into the
    /// entry and lock controllers via `reconcile_all_on`.
    #[must_use]
    pub fn new(
        client: Client,
    ) -> (
        std::sync::Arc<Self>,
        mpsc::UnboundedReceiver<()>,
        mpsc::UnboundedReceiver<()>,
    ) {
        let (entry_tx, entry_rx) = mpsc::unbounded();
        let (lock_tx, lock_rx) = mpsc::unbounded();
        (
            std::sync::Arc::new(Self {
                client,
                entry_tx,
                lock_tx,
            }),
            entry_rx,
            lock_rx,
        )
    }

    fn entry_api(&self, namespace: &str) -> Api<DNSEntry> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn lock_api(&self, namespace: &str) -> Api<DNSLock> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn map_kube_error(e: kube::Error) -> AccessError {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => AccessError::NotFound,
        kube::Error::Api(ae) if ae.code == 409 => AccessError::Conflict,
        other => AccessError::Api(other.to_string()),
    }
}

/// Render a [`StatusPatch`] as the merge-patch body for a status
/// subresource update.
fn status_patch_body(patch: &StatusPatch, kind: EntryKind) -> serde_json::Value {
    let mut status = serde_json::Map::new();
    if let Some(state) = patch.state {
        status.insert("state".into(), json!(state.as_str()));
        if kind == EntryKind::Regular && state == EntryState::Ready {
            status.insert("lastUpdateTime".into(), json!(Utc::now().to_rfc3339()));
        }
    }
    if let Some(message) = &patch.message {
        status.insert("message".into(), json!(message));
    }
    if let Some(provider) = &patch.provider {
        status.insert("provider".into(), json!(provider));
    }
    if let Some(provider_type) = &patch.provider_type {
        status.insert("providerType".into(), json!(provider_type));
    }
    if let Some(zone) = &patch.zone {
        status.insert("zone".into(), json!(zone));
    }
    if let Some(targets) = &patch.targets {
        status.insert("targets".into(), json!(targets));
    }
    if let Some(ttl) = patch.ttl {
        status.insert("ttl".into(), json!(ttl));
    }
    if let Some(generation) = patch.observed_generation {
        status.insert("observedGeneration".into(), json!(generation));
    }
    if let Some(timestamp) = patch.lock_timestamp {
        status.insert("timestamp".into(), json!(timestamp));
    }
    if let Some(attributes) = &patch.lock_attributes {
        status.insert("attributes".into(), json!(attributes));
    }
    if let Some(first_failed) = &patch.first_failed_dns_lookup {
        status.insert(
            "firstFailedDNSLookup".into(),
            first_failed.map_or(serde_json::Value::Null, |t| json!(t.to_rfc3339())),
        );
    }
    json!({ "status": serde_json::Value::Object(status) })
}

#[async_trait]
impl ObjectAccess for KubeAccess {
    async fn read_entry(
        &self,
        name: &ObjectName,
        kind: EntryKind,
    ) -> Result<Option<EntryObject>, AccessError> {
        match kind {
            EntryKind::Regular => self
                .entry_api(&name.namespace)
                .get_opt(&name.name)
                .await
                .map(|o| o.map(|e| snapshot_from_entry(&e)))
                .map_err(map_kube_error),
            EntryKind::Lock => self
                .lock_api(&name.namespace)
                .get_opt(&name.name)
                .await
                .map(|o| o.map(|l| snapshot_from_lock(&l)))
                .map_err(map_kube_error),
        }
    }

    async fn write_entry_status(
        &self,
        name: &ObjectName,
        kind: EntryKind,
        patch: StatusPatch,
    ) -> Result<(), AccessError> {
        if patch.is_empty() {
            return Ok(());
        }
        let body = status_patch_body(&patch, kind);
        let params = PatchParams::default();
        with_conflict_retry(MAX_STATUS_CONFLICT_RETRIES, || async {
            let result = match kind {
                EntryKind::Regular => self
                    .entry_api(&name.namespace)
                    .patch_status(&name.name, &params, &Patch::Merge(&body))
                    .await
                    .map(|_| ()),
                EntryKind::Lock => self
                    .lock_api(&name.namespace)
                    .patch_status(&name.name, &params, &Patch::Merge(&body))
                    .await
                    .map(|_| ()),
            };
            result.map_err(map_kube_error)
        })
        .await
        .or_else(|e| match e {
            // The object vanished under us; its deletion event follows.
            AccessError::NotFound => Ok(()),
            other => Err(other),
        })
    }

    async fn set_finalizer(&self, name: &ObjectName, kind: EntryKind) -> Result<(), AccessError> {
        let result = match kind {
            EntryKind::Regular => match self
                .entry_api(&name.namespace)
                .get_opt(&name.name)
                .await
                .map_err(map_kube_error)?
            {
                Some(entry) => {
                    finalizers::ensure_finalizer(&self.client, &entry, FINALIZER_DNS_ENTRY).await
                }
                None => return Ok(()),
            },
            EntryKind::Lock => match self
                .lock_api(&name.namespace)
                .get_opt(&name.name)
                .await
                .map_err(map_kube_error)?
            {
                Some(lock) => {
                    finalizers::ensure_finalizer(&self.client, &lock, FINALIZER_DNS_ENTRY).await
                }
                None => return Ok(()),
            },
        };
        result.map_err(|e| AccessError::Api(e.to_string()))
    }

    async fn remove_finalizer(
        &self,
        name: &ObjectName,
        kind: EntryKind,
    ) -> Result<(), AccessError> {
        let result = match kind {
            EntryKind::Regular => match self
                .entry_api(&name.namespace)
                .get_opt(&name.name)
                .await
                .map_err(map_kube_error)?
            {
                Some(entry) => {
                    finalizers::remove_finalizer(&self.client, &entry, FINALIZER_DNS_ENTRY).await
                }
                None => return Ok(()),
            },
            EntryKind::Lock => match self
                .lock_api(&name.namespace)
                .get_opt(&name.name)
                .await
                .map_err(map_kube_error)?
            {
                Some(lock) => {
                    finalizers::remove_finalizer(&self.client, &lock, FINALIZER_DNS_ENTRY).await
                }
                None => return Ok(()),
            },
        };
        result.map_err(|e| AccessError::Api(e.to_string()))
    }

    fn trigger_entry(&self, name: &ObjectName, kind: EntryKind) {
        let sent = match kind {
            EntryKind::Regular => self.entry_tx.unbounded_send(()).is_ok(),
            EntryKind::Lock => self.lock_tx.unbounded_send(()).is_ok(),
        };
        if !sent {
            warn!(object = %name, "trigger channel closed, dropping re-enqueue");
        }
    }
}
