// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconciliation of `DNSOwner` objects.
//!
//! Owners are pure switches: each asserts an (owner-id, active) pair, the
//! union of active ids forms the owner filter set, and membership changes
//! re-enqueue all indexed entries whose owner id changed sides.

use crate::constants::SYNC_PERIOD_SECS;
use crate::crd::DNSOwner;
use crate::object::ObjectName;
use crate::reconcilers::entry::Context;
use anyhow::{Context as AnyhowContext, Result};
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, Resource, ResourceExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Reconcile one `DNSOwner` event.
///
/// # Errors
///
/// Returns an error (for backoff requeue) on control-plane failures.
pub async fn reconcile_dnsowner(ctx: Arc<Context>, owner: Arc<DNSOwner>) -> Result<Action> {
    let namespace = owner.namespace().unwrap_or_default();
    let name = ObjectName::new(namespace.clone(), owner.name_any());
    info!("Reconciling DNSOwner: {name}");

    let api: Api<DNSOwner> = Api::namespaced(ctx.client.clone(), &namespace);
    let Some(current) = api
        .get_opt(&name.name)
        .await
        .with_context(|| format!("reading DNSOwner {name}"))?
    else {
        ctx.state.owner_deleted(&name);
        return Ok(Action::await_change());
    };

    if current.meta().deletion_timestamp.is_some() {
        ctx.state.owner_deleted(&name);
        return Ok(Action::await_change());
    }

    let active = current.spec.active.unwrap_or(true);
    let (_, entry_count) = ctx
        .state
        .update_owner(&name, &current.spec.owner_id, active);

    api.patch_status(
        &name.name,
        &PatchParams::default(),
        &Patch::Merge(&json!({ "status": { "entries": entry_count as i64 } })),
    )
    .await
    .with_context(|| format!("writing DNSOwner status for {name}"))?;

    Ok(Action::requeue(Duration::from_secs(SYNC_PERIOD_SECS)))
}
