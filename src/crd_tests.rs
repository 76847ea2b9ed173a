// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `crd.rs`

#[cfg(test)]
mod tests {
    use super::super::{
        DNSEntry, DNSEntrySpec, DNSLock, DNSLockSpec, DNSOwner, DNSProvider, DNSProviderSpec,
        SecretReference, Selection,
    };
    use kube::{CustomResourceExt, Resource};

    /// Test CRD metadata of all four resource kinds
    #[test]
    fn test_crd_identities() {
        assert_eq!(DNSEntry::kind(&()), "DNSEntry");
        assert_eq!(DNSEntry::group(&()), "dnsman.io");
        assert_eq!(DNSEntry::version(&()), "v1alpha1");
        assert_eq!(DNSProvider::kind(&()), "DNSProvider");
        assert_eq!(DNSOwner::kind(&()), "DNSOwner");
        assert_eq!(DNSLock::kind(&()), "DNSLock");
    }

    /// Test the generated CRD manifests carry a status subresource
    #[test]
    fn test_crd_status_subresource() {
        for crd in [DNSEntry::crd(), DNSProvider::crd(), DNSLock::crd()] {
            let version = &crd.spec.versions[0];
            assert!(
                version
                    .subresources
                    .as_ref()
                    .is_some_and(|s| s.status.is_some()),
                "{} should have a status subresource",
                crd.spec.names.kind
            );
        }
    }

    /// Test spec serialization uses camelCase wire names
    #[test]
    fn test_entry_spec_wire_names() {
        let spec = DNSEntrySpec {
            dns_name: "www.example.com".to_string(),
            targets: vec!["1.2.3.4".to_string()],
            text: vec![],
            ttl: Some(300),
            owner_id: Some("blue".to_string()),
            provider_type: None,
            cname_lookup_interval: Some(120),
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["dnsName"], "www.example.com");
        assert_eq!(json["ownerId"], "blue");
        assert_eq!(json["cnameLookupInterval"], 120);
        assert!(
            json.get("text").is_none(),
            "empty text list should be omitted"
        );
    }

    /// Test provider spec wire names, including the defaultTTL rename
    #[test]
    fn test_provider_spec_wire_names() {
        let spec = DNSProviderSpec {
            r#type: "in-memory".to_string(),
            secret_ref: SecretReference {
                name: "creds".to_string(),
                namespace: None,
            },
            domains: Some(Selection {
                include: vec!["example.com".to_string()],
                exclude: vec![],
            }),
            zones: None,
            default_ttl: Some(600),
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["type"], "in-memory");
        assert_eq!(json["secretRef"]["name"], "creds");
        assert_eq!(json["domains"]["include"][0], "example.com");
        assert_eq!(json["defaultTTL"], 600);
    }

    /// Test lock spec round-trip with attributes
    #[test]
    fn test_lock_spec_roundtrip() {
        let mut attributes = std::collections::BTreeMap::new();
        attributes.insert("leader".to_string(), "node-1".to_string());
        let spec = DNSLockSpec {
            dns_name: "lock.example.com".to_string(),
            lock_id: "cluster-blue".to_string(),
            ttl: 60,
            timestamp: 1_700_000_000,
            attributes,
        };
        let json = serde_json::to_string(&spec).unwrap();
        let back: DNSLockSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back.lock_id, "cluster-blue");
        assert_eq!(back.timestamp, 1_700_000_000);
        assert_eq!(back.attributes.get("leader").map(String::as_str), Some("node-1"));
    }
}
