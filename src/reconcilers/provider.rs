// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconciliation of `DNSProvider` objects.
//!
//! A provider is validated by building its adapter from the referenced
//! secret and listing its hosted zones. Success installs the refreshed zone
//! cache into the state engine; failure marks the provider invalid while
//! keeping its last-known zone list, so entries bound to those zones can
//! still be cleaned up.

use crate::constants::{ERROR_REQUEUE_DURATION_SECS, SYNC_PERIOD_SECS};
use crate::crd::{DNSProvider, Selection};
use crate::labels::FINALIZER_DNS_PROVIDER;
use crate::object::ObjectName;
use crate::provider::Credentials;
use crate::reconcilers::entry::Context;
use crate::reconcilers::{finalizers, retry};
use crate::state::providers::{DomainSelection, ProviderRegistration};
use anyhow::{anyhow, Context as AnyhowContext, Result};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, Resource, ResourceExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Reconcile one `DNSProvider` event.
///
/// # Errors
///
/// Returns an error (for backoff requeue) on transient control-plane or
/// back-end failures.
pub async fn reconcile_dnsprovider(ctx: Arc<Context>, provider: Arc<DNSProvider>) -> Result<Action> {
    let namespace = provider.namespace().unwrap_or_default();
    let name = ObjectName::new(namespace.clone(), provider.name_any());
    info!("Reconciling DNSProvider: {name}");

    let api: Api<DNSProvider> = Api::namespaced(ctx.client.clone(), &namespace);
    let Some(current) = api
        .get_opt(&name.name)
        .await
        .with_context(|| format!("reading DNSProvider {name}"))?
    else {
        ctx.state.remove_provider(&name);
        return Ok(Action::await_change());
    };

    if current.meta().deletion_timestamp.is_some() {
        ctx.state.remove_provider(&name);
        finalizers::remove_finalizer(&ctx.client, &current, FINALIZER_DNS_PROVIDER).await?;
        info!("DNSProvider {name} removed");
        return Ok(Action::await_change());
    }

    finalizers::ensure_finalizer(&ctx.client, &current, FINALIZER_DNS_PROVIDER).await?;

    let credentials = match read_provider_credentials(&ctx, &namespace, &current).await {
        Ok(credentials) => credentials,
        Err(e) => {
            warn!(provider = %name, "credentials unavailable: {e}");
            ctx.state
                .fail_provider(&name, &current.spec.r#type, &e.to_string());
            write_provider_status(&api, &current, "error", &format!("credentials unavailable: {e}"), None)
                .await?;
            return Ok(Action::requeue(Duration::from_secs(
                ERROR_REQUEUE_DURATION_SECS,
            )));
        }
    };

    let registration = ProviderRegistration {
        type_code: current.spec.r#type.clone(),
        domains: selection_to_domains(current.spec.domains.as_ref()),
        zone_filter: selection_to_domains(current.spec.zones.as_ref()),
        default_ttl: current.spec.default_ttl,
        credentials,
    };

    match ctx.state.register_provider(&name, registration).await {
        Ok(validation) => {
            let zones = Selection {
                include: validation.zones.clone(),
                exclude: Vec::new(),
            };
            let domains = Selection {
                include: validation.domains.clone(),
                exclude: Vec::new(),
            };
            write_provider_status(
                &api,
                &current,
                "ready",
                &format!("provider validated with {} zone(s)", validation.zones.len()),
                Some((domains, zones)),
            )
            .await?;
            Ok(Action::requeue(Duration::from_secs(SYNC_PERIOD_SECS)))
        }
        Err(e) => {
            ctx.state
                .fail_provider(&name, &current.spec.r#type, &e.to_string());
            write_provider_status(&api, &current, "error", &e.to_string(), None).await?;
            if e.is_transient() {
                Err(anyhow!(e))
            } else {
                Ok(Action::requeue(Duration::from_secs(SYNC_PERIOD_SECS)))
            }
        }
    }
}

fn selection_to_domains(selection: Option<&Selection>) -> DomainSelection {
    selection.map_or_else(DomainSelection::default, |s| {
        DomainSelection::new(s.include.clone(), s.exclude.clone())
    })
}

/// Resolve the provider's secret reference into the adapter credentials.
async fn read_provider_credentials(
    ctx: &Context,
    provider_namespace: &str,
    provider: &DNSProvider,
) -> Result<Credentials> {
    let secret_ref = &provider.spec.secret_ref;
    let namespace = secret_ref
        .namespace
        .as_deref()
        .unwrap_or(provider_namespace);
    let api: Api<Secret> = Api::namespaced(ctx.client.clone(), namespace);
    let secret = retry::retry_api_call(
        || api.get(&secret_ref.name),
        &format!("get secret {namespace}/{}", secret_ref.name),
    )
    .await?;

    let mut credentials = Credentials::new();
    for (key, value) in secret.data.unwrap_or_default() {
        credentials.insert(key, String::from_utf8_lossy(&value.0).into_owned());
    }
    for (key, value) in secret.string_data.unwrap_or_default() {
        credentials.insert(key, value);
    }
    Ok(credentials)
}

async fn write_provider_status(
    api: &Api<DNSProvider>,
    provider: &DNSProvider,
    state: &str,
    message: &str,
    scopes: Option<(Selection, Selection)>,
) -> Result<()> {
    let mut status = json!({
        "state": state,
        "message": message,
        "observedGeneration": provider.meta().generation,
    });
    if let Some((domains, zones)) = scopes {
        status["domains"] = serde_json::to_value(domains)?;
        status["zones"] = serde_json::to_value(zones)?;
    }
    api.patch_status(
        &provider.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&json!({ "status": status })),
    )
    .await
    .with_context(|| format!("writing DNSProvider status for {}", provider.name_any()))?;
    Ok(())
}
