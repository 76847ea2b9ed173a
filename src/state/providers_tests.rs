// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Tests for the provider registry, zone cache and premise resolution.

#[cfg(test)]
mod tests {
    use crate::lookup::NameResolver;
    use crate::object::ObjectName;
    use crate::provider::{AdapterFactory, TYPE_INMEMORY};
    use crate::state::providers::{DomainSelection, ProviderRegistration};
    use crate::state::testsupport::{entry_object, MockAccess, MockResolver};
    use crate::state::{State, StateConfig};
    use std::collections::{BTreeMap, HashSet};
    use std::sync::Arc;
    use std::time::Duration;

    fn creds(zones: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("zones".to_string(), zones.to_string())])
    }

    fn registration(zones: &str) -> ProviderRegistration {
        ProviderRegistration {
            type_code: TYPE_INMEMORY.to_string(),
            domains: DomainSelection::default(),
            zone_filter: DomainSelection::default(),
            default_ttl: None,
            credentials: creds(zones),
        }
    }

    /// A state engine with the bundled factory (fresh adapter per provider).
    fn bundled_state() -> (Arc<State>, Arc<MockAccess>) {
        let access = Arc::new(MockAccess::default());
        let resolver: Arc<dyn NameResolver> = Arc::new(MockResolver::default());
        let config = StateConfig {
            enabled_types: HashSet::from([TYPE_INMEMORY.to_string()]),
            default_ttl: 300,
            blocking_interval: Duration::ZERO,
            lock_refresh_interval: Duration::from_secs(60),
        };
        let state = State::new(config, access.clone(), AdapterFactory::bundled(), resolver);
        (state, access)
    }

    /// Test domain selection matching rules
    #[test]
    fn test_domain_selection() {
        let selection = DomainSelection::new(
            vec!["example.com".to_string()],
            vec!["internal.example.com".to_string()],
        );
        assert_eq!(
            selection.match_include_len("www.example.com"),
            Some("example.com".len())
        );
        assert!(selection.excludes("db.internal.example.com"));
        assert_eq!(selection.match_include_len("www.other.org"), None);
    }

    /// Test provider validation populates the zone cache
    #[tokio::test]
    async fn test_register_provider() {
        let (state, _) = bundled_state();
        let name = ObjectName::new("default", "p1");
        let validation = state
            .register_provider(&name, registration("example.com"))
            .await
            .expect("registration should succeed");

        assert_eq!(validation.zones, vec!["example.com"]);
        assert_eq!(validation.domains, vec!["example.com"]);
        assert!(state.get_zone("example.com").is_some());
    }

    /// Test credential failure surfaces and a failed provider keeps its
    /// last-known zones
    #[tokio::test]
    async fn test_fail_provider_keeps_zones() {
        let (state, _) = bundled_state();
        let name = ObjectName::new("default", "p1");
        state
            .register_provider(&name, registration("example.com"))
            .await
            .unwrap();

        // Empty credentials are rejected by the in-memory adapter.
        let mut bad = registration("example.com");
        bad.credentials = BTreeMap::new();
        let err = state.register_provider(&name, bad).await.unwrap_err();
        assert!(!err.is_transient());

        state.fail_provider(&name, TYPE_INMEMORY, &err.to_string());
        assert!(
            state.get_zone("example.com").is_some(),
            "invalid providers keep their last-known zone list"
        );

        let object = entry_object("default/e1", "www.example.com", &["1.2.3.4"]);
        let premise = state.entry_premise(&object);
        assert_eq!(
            premise.zone_id.as_deref(),
            Some("example.com"),
            "entries still resolve for cleanup"
        );
    }

    /// Test the most specific provider wins and the runner-up becomes the
    /// fallback
    #[tokio::test]
    async fn test_premise_prefers_longest_match() {
        let (state, _) = bundled_state();
        let broad = ObjectName::new("default", "broad");
        let narrow = ObjectName::new("default", "narrow");
        state
            .register_provider(&broad, registration("example.com"))
            .await
            .unwrap();
        state
            .register_provider(&narrow, registration("sub.example.com"))
            .await
            .unwrap();

        let object = entry_object("default/e1", "www.sub.example.com", &["1.2.3.4"]);
        let premise = state.entry_premise(&object);
        assert_eq!(
            premise.provider.as_ref().map(|p| p.name.clone()),
            Some(narrow),
            "the most specific domain match wins"
        );
        assert_eq!(premise.zone_id.as_deref(), Some("sub.example.com"));
        assert!(premise.fallback.is_some(), "the broad provider is the fallback");

        let object = entry_object("default/e2", "www.example.com", &["1.2.3.4"]);
        let premise = state.entry_premise(&object);
        assert_eq!(
            premise.provider.as_ref().map(|p| p.name.clone()),
            Some(broad)
        );
        assert!(premise.fallback.is_none());
    }

    /// Test an invalid provider resolves through the entry's zone hint
    #[tokio::test]
    async fn test_premise_uses_zone_hint_for_invalid_provider() {
        let (state, _) = bundled_state();
        let name = ObjectName::new("default", "p1");
        state
            .register_provider(&name, registration("example.com"))
            .await
            .unwrap();

        // Validation breaks and the refreshed zone list is lost; only the
        // domain scoping survives.
        {
            let mut data = state.data_mut();
            let previous = data.providers.get(&name).cloned().unwrap();
            data.providers.insert(
                name.clone(),
                Arc::new(crate::state::providers::ProviderState {
                    name: name.clone(),
                    type_code: previous.type_code.clone(),
                    valid: false,
                    adapter: None,
                    zones: Vec::new(),
                    domains: DomainSelection::new(vec!["example.com".to_string()], vec![]),
                    default_ttl: None,
                    last_sync: None,
                }),
            );
            data.zones.clear();
        }

        let mut object = entry_object("default/e1", "www.example.com", &["1.2.3.4"]);
        object.status.zone = Some("example.com".to_string());
        let premise = state.entry_premise(&object);
        assert_eq!(
            premise.zone_id.as_deref(),
            Some("example.com"),
            "the status zone hint keeps orphaned entries resolvable"
        );
        assert_eq!(premise.ptype.as_deref(), Some(TYPE_INMEMORY));
    }

    /// Test zone include/exclude filtering at registration
    #[tokio::test]
    async fn test_zone_filter() {
        let (state, _) = bundled_state();
        let name = ObjectName::new("default", "p1");
        let mut reg = registration("example.com,other.org");
        reg.zone_filter = DomainSelection::new(vec![], vec!["other.org".to_string()]);
        let validation = state.register_provider(&name, reg).await.unwrap();

        assert_eq!(validation.zones, vec!["example.com"]);
        assert!(state.get_zone("other.org").is_none());
    }

    /// Test provider removal drops its zones and re-enqueues entries
    #[tokio::test]
    async fn test_remove_provider() {
        let (state, access) = bundled_state();
        let name = ObjectName::new("default", "p1");
        state
            .register_provider(&name, registration("example.com"))
            .await
            .unwrap();

        let object = entry_object("default/e1", "www.example.com", &["1.2.3.4"]);
        access.insert(object.clone());
        state.update_entry(object.clone()).await;
        access.triggers.lock().unwrap().clear();

        state.remove_provider(&name);
        assert!(state.get_zone("example.com").is_none());
        assert!(
            access.triggered(&object.name),
            "bound entries are re-enqueued when the provider goes away"
        );
    }

    /// Test the provider-type hint restricts matching
    #[tokio::test]
    async fn test_provider_type_hint() {
        let (state, _) = bundled_state();
        let name = ObjectName::new("default", "p1");
        state
            .register_provider(&name, registration("example.com"))
            .await
            .unwrap();

        let mut object = entry_object("default/e1", "www.example.com", &["1.2.3.4"]);
        object.provider_type = Some("aws-route53".to_string());
        let premise = state.entry_premise(&object);
        assert!(
            premise.provider.is_none(),
            "a mismatching type hint excludes the provider"
        );

        object.provider_type = Some(TYPE_INMEMORY.to_string());
        let premise = state.entry_premise(&object);
        assert!(premise.provider.is_some());
    }

    /// Test forwarded subdomains are not part of the zone
    #[test]
    fn test_forwarded_subdomain_zone_lookup() {
        use crate::provider::HostedZone;
        let provider_name = ObjectName::new("default", "p1");
        let provider = crate::state::providers::ProviderState {
            name: provider_name.clone(),
            type_code: TYPE_INMEMORY.to_string(),
            valid: true,
            adapter: None,
            zones: vec![HostedZone {
                id: "example.com".to_string(),
                domain: "example.com".to_string(),
                forwarded: vec!["sub.example.com".to_string()],
                provider_type: TYPE_INMEMORY.to_string(),
                provider: provider_name,
            }],
            domains: DomainSelection::default(),
            default_ttl: None,
            last_sync: None,
        };
        assert!(provider.zone_for_name("www.example.com").is_some());
        assert!(
            provider.zone_for_name("www.sub.example.com").is_none(),
            "names under a forwarded subdomain do not belong to the zone"
        );
    }
}
