// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Uniform DNS record-set vocabulary.
//!
//! All provider adapters and the reconciliation engine speak in terms of
//! [`RecordSet`]s: a DNS name paired with a record type, a TTL and a list of
//! record values. Adapters translate this vocabulary to their vendor APIs.
//!
//! TXT record sets double as attribute carriers for DNS locks: each record
//! value is a single `"<key>=<value>"` string. [`RecordSet::attr`] and
//! [`RecordSet::txt_attrs`] implement that encoding.

use std::collections::BTreeMap;
use std::fmt;

/// Attribute key carrying the lock timestamp (unix seconds) in a TXT set.
pub const ATTR_TIMESTAMP: &str = "timestamp";

/// Attribute key carrying the lock id in a TXT set.
pub const ATTR_LOCKID: &str = "lockid";

/// Supported DNS record types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(clippy::upper_case_acronyms)]
pub enum RecordType {
    A,
    AAAA,
    CNAME,
    TXT,
    NS,
}

impl RecordType {
    /// Parse a record type from its textual form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Some(Self::A),
            "AAAA" => Some(Self::AAAA),
            "CNAME" => Some(Self::CNAME),
            "TXT" => Some(Self::TXT),
            "NS" => Some(Self::NS),
            _ => None,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::A => "A",
            Self::AAAA => "AAAA",
            Self::CNAME => "CNAME",
            Self::TXT => "TXT",
            Self::NS => "NS",
        };
        f.write_str(s)
    }
}

/// A single record value within a record set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub value: String,
}

impl Record {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

/// A full record set: all values for one (name, type) pair plus the TTL.
///
/// The DNS name itself is carried alongside the set where needed (changes,
/// zone state listings) so that a `RecordSet` can be compared value-for-value
/// independently of its name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordSet {
    pub rtype: RecordType,
    pub ttl: i64,
    pub records: Vec<Record>,
}

impl RecordSet {
    #[must_use]
    pub fn new(rtype: RecordType, ttl: i64) -> Self {
        Self {
            rtype,
            ttl,
            records: Vec::new(),
        }
    }

    /// Build a record set from plain string values.
    #[must_use]
    pub fn from_values<I, S>(rtype: RecordType, ttl: i64, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rtype,
            ttl,
            records: values.into_iter().map(Record::new).collect(),
        }
    }

    /// Build the TXT record set for a DNS lock from its attribute map.
    ///
    /// Every attribute becomes one `"<key>=<value>"` record; the lock id and
    /// timestamp use the well-known keys [`ATTR_LOCKID`] and
    /// [`ATTR_TIMESTAMP`].
    #[must_use]
    pub fn txt_from_attrs(
        ttl: i64,
        lock_id: &str,
        timestamp: i64,
        attributes: &BTreeMap<String, String>,
    ) -> Self {
        let mut rs = Self::new(RecordType::TXT, ttl);
        rs.records
            .push(Record::new(format!("{ATTR_LOCKID}={lock_id}")));
        rs.records
            .push(Record::new(format!("{ATTR_TIMESTAMP}={timestamp}")));
        for (k, v) in attributes {
            if k == ATTR_LOCKID || k == ATTR_TIMESTAMP {
                continue;
            }
            rs.records.push(Record::new(format!("{k}={v}")));
        }
        rs
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Look up a TXT attribute value by key.
    ///
    /// Record values are trimmed of surrounding quotes before splitting on
    /// the first `=`. Returns `None` for non-TXT sets or absent keys.
    #[must_use]
    pub fn attr(&self, key: &str) -> Option<&str> {
        if self.rtype != RecordType::TXT {
            return None;
        }
        self.records.iter().find_map(|r| {
            let raw = r.value.trim_matches('"');
            let (k, v) = raw.split_once('=')?;
            (k == key).then_some(v)
        })
    }

    /// Parse all TXT attributes from this set.
    ///
    /// Values without a `=` separator are assigned synthetic keys `_<n>` in
    /// record order, so unnamed strings survive round trips.
    #[must_use]
    pub fn txt_attrs(&self) -> BTreeMap<String, String> {
        parse_txt_attrs(self.records.iter().map(|r| r.value.as_str()))
    }

    /// Compare the value set and TTL of two record sets, ignoring order.
    #[must_use]
    pub fn same_values(&self, other: &Self) -> bool {
        if self.ttl != other.ttl || self.records.len() != other.records.len() {
            return false;
        }
        let mut a: Vec<&str> = self.records.iter().map(|r| r.value.as_str()).collect();
        let mut b: Vec<&str> = other.records.iter().map(|r| r.value.as_str()).collect();
        a.sort_unstable();
        b.sort_unstable();
        a == b
    }
}

/// Parse `"<key>=<value>"` TXT strings into an attribute map.
///
/// Shared by [`RecordSet::txt_attrs`] and the resolver-based lock refresh,
/// which sees raw strings rather than record sets.
pub fn parse_txt_attrs<'a, I>(values: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut attrs = BTreeMap::new();
    let mut unnamed = 0usize;
    for raw in values {
        let raw = raw.trim_matches('"');
        match raw.split_once('=') {
            Some((k, v)) => {
                attrs.insert(k.to_string(), v.to_string());
            }
            None => {
                attrs.insert(format!("_{unnamed}"), raw.to_string());
                unnamed += 1;
            }
        }
    }
    attrs
}

/// Normalize a DNS name: lowercase, no trailing dot.
#[must_use]
pub fn normalize_dns_name(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// Check structural validity of a DNS name.
///
/// Accepts a leading wildcard label; every other label must be 1-63
/// characters of letters, digits or hyphens, not starting or ending with a
/// hyphen, and the whole name at most 253 characters.
#[must_use]
pub fn is_valid_dns_name(name: &str) -> bool {
    let name = name.trim_end_matches('.');
    if name.is_empty() || name.len() > 253 {
        return false;
    }
    let mut labels = name.split('.').peekable();
    let mut first = true;
    while let Some(label) = labels.next() {
        if first && label == "*" && labels.peek().is_some() {
            first = false;
            continue;
        }
        first = false;
        if label.is_empty() || label.len() > 63 {
            return false;
        }
        let bytes = label.as_bytes();
        if bytes[0] == b'-' || bytes[bytes.len() - 1] == b'-' {
            return false;
        }
        if !bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || *b == b'-' || *b == b'_')
        {
            return false;
        }
    }
    true
}

/// Check whether `name` equals `domain` or is a subdomain of it.
#[must_use]
pub fn name_in_domain(name: &str, domain: &str) -> bool {
    let name = normalize_dns_name(name);
    let domain = normalize_dns_name(domain);
    name == domain || name.ends_with(&format!(".{domain}"))
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
