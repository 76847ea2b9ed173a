// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `dns_errors.rs`

#[cfg(test)]
mod tests {
    use super::super::{EntryFault, ProviderError};
    use crate::object::ObjectName;

    /// Test transient classification of provider errors
    #[test]
    fn test_provider_error_transient_classification() {
        assert!(ProviderError::Throttled("rate limit".into()).is_transient());
        assert!(ProviderError::Transient("connection reset".into()).is_transient());

        assert!(!ProviderError::ZoneNotFound {
            zone: "z1".into()
        }
        .is_transient());
        assert!(!ProviderError::Unauthorized("bad key".into()).is_transient());
        assert!(!ProviderError::UnknownProviderType("foo".into()).is_transient());
        assert!(!ProviderError::InvalidChange {
            name: "www.example.com".into(),
            rtype: "A".into(),
            reason: "empty".into(),
        }
        .is_transient());
    }

    /// Test the already-busy diagnostic cites the holding entry
    #[test]
    fn test_already_busy_cites_holder() {
        let fault = EntryFault::AlreadyBusy {
            dns_name: "www.example.com".into(),
            holder: ObjectName::new("default", "e1"),
        };
        let msg = fault.to_string();
        assert!(
            msg.contains("already busy for entry \"default/e1\""),
            "diagnostic should cite the holder, got: {msg}"
        );
        assert!(msg.contains("www.example.com"));
    }
}
