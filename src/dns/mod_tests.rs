// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the record-set vocabulary.

#[cfg(test)]
mod tests {
    use super::super::*;

    /// Test that record types round-trip through their textual form
    #[test]
    fn test_record_type_parse_display() {
        for (text, rtype) in [
            ("A", RecordType::A),
            ("AAAA", RecordType::AAAA),
            ("CNAME", RecordType::CNAME),
            ("TXT", RecordType::TXT),
            ("NS", RecordType::NS),
        ] {
            assert_eq!(RecordType::parse(text), Some(rtype));
            assert_eq!(rtype.to_string(), text);
        }
        assert_eq!(
            RecordType::parse("aaaa"),
            Some(RecordType::AAAA),
            "parsing should be case-insensitive"
        );
        assert_eq!(RecordType::parse("SOA"), None);
    }

    /// Test TXT attribute lookup with quoted values
    #[test]
    fn test_txt_attr_lookup() {
        let rs = RecordSet::from_values(
            RecordType::TXT,
            60,
            ["\"lockid=cluster-a\"", "timestamp=1700000000", "owner=me"],
        );
        assert_eq!(rs.attr(ATTR_LOCKID), Some("cluster-a"));
        assert_eq!(rs.attr(ATTR_TIMESTAMP), Some("1700000000"));
        assert_eq!(rs.attr("owner"), Some("me"));
        assert_eq!(rs.attr("missing"), None);
    }

    /// Test that non-TXT sets never expose attributes
    #[test]
    fn test_attr_on_non_txt() {
        let rs = RecordSet::from_values(RecordType::A, 60, ["lockid=1.2.3.4"]);
        assert_eq!(rs.attr(ATTR_LOCKID), None);
    }

    /// Test unnamed TXT strings get synthetic keys in order
    #[test]
    fn test_parse_txt_attrs_unnamed() {
        let attrs = parse_txt_attrs(["plain", "key=value", "\"other\""]);
        assert_eq!(attrs.get("_0").map(String::as_str), Some("plain"));
        assert_eq!(attrs.get("_1").map(String::as_str), Some("other"));
        assert_eq!(attrs.get("key").map(String::as_str), Some("value"));
    }

    /// Test lock record-set construction carries id, timestamp and attributes
    #[test]
    fn test_txt_from_attrs() {
        let mut attrs = std::collections::BTreeMap::new();
        attrs.insert("leader".to_string(), "node-1".to_string());
        // Well-known keys in the attribute map must not shadow the spec fields.
        attrs.insert(ATTR_LOCKID.to_string(), "bogus".to_string());

        let rs = RecordSet::txt_from_attrs(120, "cluster-a", 1_700_000_000, &attrs);
        assert_eq!(rs.attr(ATTR_LOCKID), Some("cluster-a"));
        assert_eq!(rs.attr(ATTR_TIMESTAMP), Some("1700000000"));
        assert_eq!(rs.attr("leader"), Some("node-1"));
        assert_eq!(rs.ttl, 120);
        assert_eq!(rs.len(), 3);
    }

    /// Test value comparison ignores record order
    #[test]
    fn test_same_values_order_independent() {
        let a = RecordSet::from_values(RecordType::A, 300, ["1.2.3.4", "5.6.7.8"]);
        let b = RecordSet::from_values(RecordType::A, 300, ["5.6.7.8", "1.2.3.4"]);
        assert!(a.same_values(&b), "order must not matter");

        let c = RecordSet::from_values(RecordType::A, 600, ["1.2.3.4", "5.6.7.8"]);
        assert!(!a.same_values(&c), "TTL change must be detected");

        let d = RecordSet::from_values(RecordType::A, 300, ["1.2.3.4"]);
        assert!(!a.same_values(&d), "cardinality change must be detected");
    }

    /// Test DNS name validation rules
    #[test]
    fn test_is_valid_dns_name() {
        assert!(is_valid_dns_name("www.example.com"));
        assert!(is_valid_dns_name("www.example.com."));
        assert!(is_valid_dns_name("*.example.com"));
        assert!(is_valid_dns_name("_acme-challenge.example.com"));

        assert!(!is_valid_dns_name(""));
        assert!(!is_valid_dns_name("double..dot.example.com"));
        assert!(!is_valid_dns_name("-leading.example.com"));
        assert!(!is_valid_dns_name("trailing-.example.com"));
        assert!(!is_valid_dns_name("bad char.example.com"));
        assert!(!is_valid_dns_name(&format!("{}.com", "a".repeat(64))));
    }

    /// Test domain membership checks
    #[test]
    fn test_name_in_domain() {
        assert!(name_in_domain("www.example.com", "example.com"));
        assert!(name_in_domain("example.com", "example.com"));
        assert!(name_in_domain("WWW.Example.COM.", "example.com"));
        assert!(!name_in_domain("example.com", "www.example.com"));
        assert!(
            !name_in_domain("notexample.com", "example.com"),
            "suffix match must respect label boundaries"
        );
    }
}
