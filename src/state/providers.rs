// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Provider registry, zone cache and premise resolution.
//!
//! Providers are validated asynchronously by listing their zones through the
//! adapter. A provider that fails validation keeps its last-known zone list
//! (marked invalid) so entries bound to those zones can still resolve a
//! premise for cleanup, but it never accepts changes.

use crate::dns::{name_in_domain, normalize_dns_name};
use crate::dns_errors::ProviderError;
use crate::object::{EntryObject, ObjectName};
use crate::provider::{Credentials, DnsAdapter, HostedZone};
use crate::state::State;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Include/exclude domain or zone-id filter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DomainSelection {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl DomainSelection {
    #[must_use]
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self {
            include: include.iter().map(|d| normalize_dns_name(d)).collect(),
            exclude: exclude.iter().map(|d| normalize_dns_name(d)).collect(),
        }
    }

    /// Whether `name` falls under an excluded domain.
    #[must_use]
    pub fn excludes(&self, name: &str) -> bool {
        self.exclude.iter().any(|d| name_in_domain(name, d))
    }

    /// Length of the longest matching include domain, `None` when the
    /// include list does not cover `name`. An empty include list matches
    /// nothing here; callers fall back to the provider's zone domains.
    #[must_use]
    pub fn match_include_len(&self, name: &str) -> Option<usize> {
        self.include
            .iter()
            .filter(|d| name_in_domain(name, d))
            .map(String::len)
            .max()
    }
}

/// Everything the registry needs to (re)validate one provider object.
#[derive(Clone, Debug)]
pub struct ProviderRegistration {
    pub type_code: String,
    pub domains: DomainSelection,
    pub zone_filter: DomainSelection,
    pub default_ttl: Option<i64>,
    pub credentials: Credentials,
}

/// Summary returned to the provider reconciler for status reporting.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderValidation {
    pub zones: Vec<String>,
    pub domains: Vec<String>,
}

/// Immutable snapshot of one provider, replaced wholesale on each reconcile.
pub struct ProviderState {
    pub name: ObjectName,
    pub type_code: String,
    pub valid: bool,
    pub adapter: Option<Arc<dyn DnsAdapter>>,
    pub zones: Vec<HostedZone>,
    pub domains: DomainSelection,
    pub default_ttl: Option<i64>,
    pub last_sync: Option<DateTime<Utc>>,
}

impl ProviderState {
    /// Match strength of this provider for a DNS name: the length of the
    /// longest covering domain, from the include list when present,
    /// otherwise from the hosted zone domains. `None` when not covered or
    /// explicitly excluded.
    #[must_use]
    pub fn match_len(&self, dns_name: &str) -> Option<usize> {
        let name = normalize_dns_name(dns_name);
        if self.domains.excludes(&name) {
            return None;
        }
        if !self.domains.include.is_empty() {
            return self.domains.match_include_len(&name);
        }
        self.zones
            .iter()
            .filter(|z| z.includes(&name))
            .map(|z| z.domain.len())
            .max()
    }

    /// The hosted zone responsible for a DNS name on this provider:
    /// longest-domain match honouring forwarded subdomains.
    #[must_use]
    pub fn zone_for_name(&self, dns_name: &str) -> Option<&HostedZone> {
        self.zones
            .iter()
            .filter(|z| z.includes(dns_name))
            .max_by_key(|z| z.domain.len())
    }

    /// The domain list reported in the provider status.
    #[must_use]
    pub fn effective_domains(&self) -> Vec<String> {
        if self.domains.include.is_empty() {
            self.zones.iter().map(|z| z.domain.clone()).collect()
        } else {
            self.domains.include.clone()
        }
    }
}

impl std::fmt::Debug for ProviderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderState")
            .field("name", &self.name)
            .field("type_code", &self.type_code)
            .field("valid", &self.valid)
            .field("zones", &self.zones.len())
            .finish()
    }
}

/// Provider/zone resolution result for one entry at one point in time.
#[derive(Clone, Default)]
pub struct EntryPremise {
    pub ptype: Option<String>,
    pub zone_id: Option<String>,
    pub zone_domain: Option<String>,
    pub provider: Option<Arc<ProviderState>>,
    pub fallback: Option<Arc<ProviderState>>,
}

impl EntryPremise {
    /// The provider a reconcile acts through, preferring the primary match.
    #[must_use]
    pub fn effective_provider(&self) -> Option<&Arc<ProviderState>> {
        self.provider.as_ref().or(self.fallback.as_ref())
    }

    /// Premise equality as defined for repeat detection: provider type,
    /// zone id, provider object and fallback presence.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        self.ptype == other.ptype
            && self.zone_id == other.zone_id
            && self.provider.as_ref().map(|p| &p.name) == other.provider.as_ref().map(|p| &p.name)
            && self.fallback.is_some() == other.fallback.is_some()
    }

    /// Human-readable description of what changed, for the repeat log line.
    #[must_use]
    pub fn describe_change(&self, new: &Self) -> String {
        fn fmt_opt<T: std::fmt::Display>(v: Option<&T>) -> String {
            v.map_or_else(|| "<none>".to_string(), ToString::to_string)
        }
        format!(
            "premise changed: type {} -> {}, zone {} -> {}, provider {} -> {}",
            fmt_opt(self.ptype.as_ref()),
            fmt_opt(new.ptype.as_ref()),
            fmt_opt(self.zone_id.as_ref()),
            fmt_opt(new.zone_id.as_ref()),
            fmt_opt(self.provider.as_ref().map(|p| &p.name)),
            fmt_opt(new.provider.as_ref().map(|p| &p.name)),
        )
    }
}

impl std::fmt::Debug for EntryPremise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryPremise")
            .field("ptype", &self.ptype)
            .field("zone_id", &self.zone_id)
            .field("provider", &self.provider.as_ref().map(|p| p.name.to_string()))
            .field("fallback", &self.fallback.as_ref().map(|p| p.name.to_string()))
            .finish()
    }
}

impl State {
    /// Resolve the premise for an observed object: provider via domain
    /// inclusion, hosted zone on that provider, fallback to any secondary
    /// provider also covering the name. Invalid providers resolve through
    /// the object's zone hint so orphaned entries can still be cleaned up.
    #[must_use]
    pub fn entry_premise(&self, object: &EntryObject) -> EntryPremise {
        let data = self.data();
        let dns_name = normalize_dns_name(&object.dns_name);
        let (provider, fallback) =
            lookup_provider(&data.providers, &dns_name, object.provider_type.as_deref());

        let mut premise = EntryPremise {
            provider,
            fallback,
            ..EntryPremise::default()
        };

        if let Some(zone) = premise
            .provider
            .as_ref()
            .and_then(|p| p.zone_for_name(&dns_name))
        {
            premise.ptype = Some(zone.provider_type.clone());
            premise.zone_id = Some(zone.id.clone());
            premise.zone_domain = Some(zone.domain.clone());
        } else if let Some(p) = premise.provider.as_ref().filter(|p| !p.valid) {
            if let Some(zone_hint) = object.status.zone.as_ref() {
                premise.ptype = Some(p.type_code.clone());
                premise.zone_id = Some(zone_hint.clone());
            }
        } else if let Some(zone) = premise
            .fallback
            .as_ref()
            .and_then(|p| p.zone_for_name(&dns_name))
        {
            premise.ptype = Some(zone.provider_type.clone());
            premise.zone_id = Some(zone.id.clone());
            premise.zone_domain = Some(zone.domain.clone());
        }
        premise
    }

    /// Validate and (re)register a provider: build the adapter, list zones,
    /// install the refreshed snapshot and re-evaluate entry premises.
    ///
    /// # Errors
    ///
    /// Adapter construction or zone listing errors; the caller decides
    /// between backoff (transient) and an invalid status (permanent), and
    /// marks the provider failed via [`State::fail_provider`].
    pub async fn register_provider(
        self: &Arc<Self>,
        name: &ObjectName,
        registration: ProviderRegistration,
    ) -> Result<ProviderValidation, ProviderError> {
        let adapter =
            self.factory
                .create(&registration.type_code, name, &registration.credentials)?;
        let all_zones = adapter.list_zones().await?;

        let zones: Vec<HostedZone> = all_zones
            .into_iter()
            .filter(|z| zone_selected(z, &registration.zone_filter))
            .collect();

        let provider = Arc::new(ProviderState {
            name: name.clone(),
            type_code: registration.type_code.clone(),
            valid: true,
            adapter: Some(adapter),
            zones,
            domains: registration.domains,
            default_ttl: registration.default_ttl,
            last_sync: Some(Utc::now()),
        });

        let validation = ProviderValidation {
            zones: provider.zones.iter().map(|z| z.id.clone()).collect(),
            domains: provider.effective_domains(),
        };

        {
            let mut data = self.data_mut();
            data.providers.insert(name.clone(), provider);
            rebuild_zones(&mut data);
        }
        info!(provider = %name, zones = validation.zones.len(), "provider validated");
        self.trigger_all_entries();
        Ok(validation)
    }

    /// Mark a provider invalid, keeping its last-known zone list.
    pub fn fail_provider(&self, name: &ObjectName, type_code: &str, message: &str) {
        warn!(provider = %name, "provider validation failed: {message}");
        let mut data = self.data_mut();
        let previous = data.providers.get(name).cloned();
        let provider = Arc::new(ProviderState {
            name: name.clone(),
            type_code: type_code.to_string(),
            valid: false,
            adapter: previous.as_ref().and_then(|p| p.adapter.clone()),
            zones: previous.as_ref().map(|p| p.zones.clone()).unwrap_or_default(),
            domains: previous
                .as_ref()
                .map(|p| p.domains.clone())
                .unwrap_or_default(),
            default_ttl: previous.as_ref().and_then(|p| p.default_ttl),
            last_sync: previous.as_ref().and_then(|p| p.last_sync),
        });
        data.providers.insert(name.clone(), provider);
        rebuild_zones(&mut data);
    }

    /// Drop a deleted provider and its zones; bound entries are re-triggered
    /// and will observe their zone as gone.
    pub fn remove_provider(self: &Arc<Self>, name: &ObjectName) {
        {
            let mut data = self.data_mut();
            if data.providers.remove(name).is_none() {
                debug!(provider = %name, "removing unknown provider");
                return;
            }
            rebuild_zones(&mut data);
        }
        info!(provider = %name, "provider removed");
        self.trigger_all_entries();
    }

    /// The hosted zone currently known under an id.
    #[must_use]
    pub fn get_zone(&self, zone_id: &str) -> Option<HostedZone> {
        self.data().zones.get(zone_id).cloned()
    }
}

fn zone_selected(zone: &HostedZone, filter: &DomainSelection) -> bool {
    let excluded = filter
        .exclude
        .iter()
        .any(|x| *x == zone.id || name_in_domain(&zone.domain, x));
    if excluded {
        return false;
    }
    filter.include.is_empty()
        || filter
            .include
            .iter()
            .any(|x| *x == zone.id || name_in_domain(&zone.domain, x))
}

fn lookup_provider(
    providers: &std::collections::BTreeMap<ObjectName, Arc<ProviderState>>,
    dns_name: &str,
    ptype_hint: Option<&str>,
) -> (Option<Arc<ProviderState>>, Option<Arc<ProviderState>>) {
    let mut candidates: Vec<(&Arc<ProviderState>, usize)> = providers
        .values()
        .filter(|p| ptype_hint.is_none_or(|t| p.type_code == t))
        .filter_map(|p| p.match_len(dns_name).map(|len| (p, len)))
        .collect();
    // Valid providers first, then the most specific domain match; the map's
    // name order keeps the result deterministic.
    candidates.sort_by(|(pa, la), (pb, lb)| {
        pb.valid
            .cmp(&pa.valid)
            .then(lb.cmp(la))
            .then(pa.name.cmp(&pb.name))
    });
    let mut it = candidates.into_iter().map(|(p, _)| p.clone());
    (it.next(), it.next())
}

fn rebuild_zones(data: &mut crate::state::StateData) {
    data.zones.clear();
    for provider in data.providers.values() {
        for zone in &provider.zones {
            data.zones
                .entry(zone.id.clone())
                .or_insert_with(|| zone.clone());
        }
    }
}

#[cfg(test)]
#[path = "providers_tests.rs"]
mod providers_tests;
