// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconciliation of `DNSEntry` and `DNSLock` objects.
//!
//! These reconcilers are thin: they re-read the live object, build the
//! engine snapshot (resolving hostname targets where a lookup interval is
//! in effect) and hand the event to the state engine, which performs
//! premise resolution, the transition kernel and zone triggering. The
//! engine's outcome is mapped to a controller `Action`.

use crate::constants::{
    DEFAULT_CNAME_LOOKUP_INTERVAL_SECS, REPEAT_REQUEUE_SECS, SYNC_PERIOD_SECS,
};
use crate::crd::{DNSEntry, DNSLock};
use crate::lookup::NameResolver;
use crate::object::{EntryObject, ObjectName};
use crate::reconcilers::access::{snapshot_from_entry, snapshot_from_lock};
use crate::state::{ReconcileStatus, State};
use anyhow::{Context as AnyhowContext, Result};
use kube::runtime::controller::Action;
use kube::{Api, Client, ResourceExt};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Shared context for the entry, lock, provider and owner controllers.
pub struct Context {
    pub client: Client,
    pub state: Arc<State>,
    pub resolver: Arc<dyn NameResolver>,
}

/// Map an engine outcome to a controller action.
///
/// # Errors
///
/// A `Delayed` outcome becomes an error so the controller's error policy
/// requeues with backoff.
pub fn action_for(outcome: ReconcileStatus) -> Result<Action> {
    match outcome {
        ReconcileStatus::Succeeded => Ok(Action::requeue(Duration::from_secs(SYNC_PERIOD_SECS))),
        ReconcileStatus::RescheduleAfter(delay) => Ok(Action::requeue(delay)),
        ReconcileStatus::Repeat => Ok(Action::requeue(Duration::from_secs(REPEAT_REQUEUE_SECS))),
        ReconcileStatus::Delayed(e) => Err(e),
    }
}

/// Reconcile one `DNSEntry` event.
///
/// # Errors
///
/// Returns an error (for backoff requeue) on transient control-plane,
/// resolver or provider failures.
pub async fn reconcile_dnsentry(ctx: Arc<Context>, entry: Arc<DNSEntry>) -> Result<Action> {
    let namespace = entry.namespace().unwrap_or_default();
    let name = ObjectName::new(namespace.clone(), entry.name_any());
    info!("Reconciling DNSEntry: {name}");

    // Watch events can be stale; decisions are taken on the live object.
    let api: Api<DNSEntry> = Api::namespaced(ctx.client.clone(), &namespace);
    let Some(current) = api
        .get_opt(&name.name)
        .await
        .with_context(|| format!("reading DNSEntry {name}"))?
    else {
        debug!(object = %name, "DNSEntry gone from the API server");
        return action_for(ctx.state.entry_deleted(&name).await);
    };

    let mut snapshot = snapshot_from_entry(&current);
    if !snapshot.deleting {
        resolve_hostname_targets(ctx.resolver.as_ref(), &mut snapshot).await?;
    }

    let outcome = if snapshot.deleting {
        ctx.state.delete_entry(snapshot).await
    } else {
        ctx.state.update_entry(snapshot).await
    };
    action_for(outcome)
}

/// Reconcile one `DNSLock` event.
///
/// # Errors
///
/// Returns an error (for backoff requeue) on transient control-plane or
/// provider failures.
pub async fn reconcile_dnslock(ctx: Arc<Context>, lock: Arc<DNSLock>) -> Result<Action> {
    let namespace = lock.namespace().unwrap_or_default();
    let name = ObjectName::new(namespace.clone(), lock.name_any());
    info!("Reconciling DNSLock: {name}");

    let api: Api<DNSLock> = Api::namespaced(ctx.client.clone(), &namespace);
    let Some(current) = api
        .get_opt(&name.name)
        .await
        .with_context(|| format!("reading DNSLock {name}"))?
    else {
        debug!(object = %name, "DNSLock gone from the API server");
        return action_for(ctx.state.entry_deleted(&name).await);
    };

    let snapshot = snapshot_from_lock(&current);
    let outcome = if snapshot.deleting {
        ctx.state.delete_entry(snapshot).await
    } else {
        ctx.state.update_entry(snapshot).await
    };
    action_for(outcome)
}

/// Resolve hostname targets to addresses when lookup is in effect.
///
/// A single hostname target without a lookup interval stays a plain CNAME;
/// multiple hostname targets, or any hostname target combined with a lookup
/// interval, are resolved through the resolver and refreshed on the
/// interval.
async fn resolve_hostname_targets(
    resolver: &dyn NameResolver,
    snapshot: &mut EntryObject,
) -> Result<()> {
    let hostnames: Vec<String> = snapshot
        .targets
        .iter()
        .filter(|t| t.parse::<IpAddr>().is_err())
        .cloned()
        .collect();
    let lookup_needed =
        hostnames.len() > 1 || (!hostnames.is_empty() && snapshot.lookup_interval.is_some());
    if !lookup_needed {
        return Ok(());
    }

    let mut resolved: Vec<String> = snapshot
        .targets
        .iter()
        .filter(|t| t.parse::<IpAddr>().is_ok())
        .cloned()
        .collect();
    for hostname in &hostnames {
        let addrs = resolver
            .lookup_addrs(hostname)
            .await
            .with_context(|| format!("resolving target {hostname} for {}", snapshot.name))?;
        resolved.extend(addrs.iter().map(ToString::to_string));
    }
    debug!(
        object = %snapshot.name,
        hostnames = hostnames.len(),
        addresses = resolved.len(),
        "resolved hostname targets"
    );
    snapshot.resolved_targets = Some(resolved);
    if snapshot.lookup_interval.is_none() {
        snapshot.lookup_interval = Some(DEFAULT_CNAME_LOOKUP_INTERVAL_SECS);
    }
    Ok(())
}
