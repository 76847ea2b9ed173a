// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Tests for the DNS-lock protocol: CAS writes, timestamp monotonicity,
//! contested locks, deletion ownership and the background lookup refresh.

#[cfg(test)]
mod tests {
    use crate::dns::{RecordType, ATTR_LOCKID, ATTR_TIMESTAMP};
    use crate::object::EntryState;
    use crate::provider::DnsAdapter;
    use crate::state::testsupport::{lock_object, Fixture};
    use chrono::{Duration as ChronoDuration, Utc};

    /// A fresh lock writes its TXT record and becomes ready
    #[tokio::test]
    async fn test_lock_create_writes_txt() {
        let f = Fixture::with_provider(&["example.com"]).await;
        let lock = lock_object("default/la", "lock.example.com", "cluster-a", 100, 60);
        f.access.insert(lock.clone());

        let outcome = f.state.update_entry(lock.clone()).await;
        assert!(outcome.is_succeeded(), "lock write should succeed: {outcome:?}");

        assert!(f.access.has_finalizer(&lock.name));
        let record = f
            .adapter
            .record_set("example.com", "lock.example.com", RecordType::TXT)
            .expect("coordination TXT record should exist");
        assert_eq!(record.attr(ATTR_LOCKID), Some("cluster-a"));
        assert_eq!(record.attr(ATTR_TIMESTAMP), Some("100"));
        assert_eq!(record.ttl, 60);

        let status = f.access.last_status(&lock.name).unwrap();
        assert_eq!(status.state, Some(EntryState::Ready));
    }

    /// Lock contention: a writer with a foreign lock id goes stale and does
    /// not overwrite
    #[tokio::test]
    async fn test_lock_contention_foreign_id() {
        let f = Fixture::with_provider(&["example.com"]).await;
        let la = lock_object("default/la", "lock.example.com", "A", 100, 60);
        f.access.insert(la.clone());
        f.state.update_entry(la).await;

        let lb = lock_object("default/lb", "lock.example.com", "B", 50, 60);
        f.access.insert(lb.clone());
        f.state.update_entry(lb.clone()).await;

        let status = f.access.last_status(&lb.name).unwrap();
        assert_eq!(status.state, Some(EntryState::Stale));
        assert!(
            status
                .message
                .as_deref()
                .unwrap_or("")
                .contains("mismatching lock ids"),
            "got {:?}",
            status.message
        );

        let record = f
            .adapter
            .record_set("example.com", "lock.example.com", RecordType::TXT)
            .unwrap();
        assert_eq!(record.attr(ATTR_LOCKID), Some("A"), "record not overwritten");
        assert_eq!(record.attr(ATTR_TIMESTAMP), Some("100"));
    }

    /// Monotonicity: a writer never overwrites a record with a newer
    /// timestamp, even under its own lock id
    #[tokio::test]
    async fn test_lock_timestamp_monotonicity() {
        let f = Fixture::with_provider(&["example.com"]).await;
        let la = lock_object("default/la", "lock.example.com", "A", 100, 60);
        f.access.insert(la.clone());
        f.state.update_entry(la).await;

        let mut older = lock_object("default/la", "lock.example.com", "A", 50, 60);
        older.generation = 2;
        f.access.insert(older.clone());
        let outcome = f.state.update_entry(older).await;
        assert!(outcome.is_succeeded());

        let record = f
            .adapter
            .record_set("example.com", "lock.example.com", RecordType::TXT)
            .unwrap();
        assert_eq!(
            record.attr(ATTR_TIMESTAMP),
            Some("100"),
            "an older timestamp must never overwrite a newer record"
        );
    }

    /// An equal or newer own timestamp refreshes the record
    #[tokio::test]
    async fn test_lock_refresh_with_newer_timestamp() {
        let f = Fixture::with_provider(&["example.com"]).await;
        let la = lock_object("default/la", "lock.example.com", "A", 100, 60);
        f.access.insert(la.clone());
        f.state.update_entry(la).await;

        let mut newer = lock_object("default/la", "lock.example.com", "A", 200, 60);
        newer.generation = 2;
        f.access.insert(newer.clone());
        f.state.update_entry(newer).await;

        let record = f
            .adapter
            .record_set("example.com", "lock.example.com", RecordType::TXT)
            .unwrap();
        assert_eq!(record.attr(ATTR_TIMESTAMP), Some("200"));
    }

    /// Deletion removes the record only while this writer still owns it
    #[tokio::test]
    async fn test_lock_delete_owned() {
        let f = Fixture::with_provider(&["example.com"]).await;
        let la = lock_object("default/la", "lock.example.com", "A", 100, 60);
        f.access.insert(la.clone());
        f.state.update_entry(la.clone()).await;

        let mut la_del = la.clone();
        la_del.deleting = true;
        la_del.has_finalizer = true;
        let outcome = f.state.delete_entry(la_del).await;
        assert!(outcome.is_succeeded());

        assert!(
            f.adapter
                .record_set("example.com", "lock.example.com", RecordType::TXT)
                .is_none(),
            "owned lock record is deleted"
        );
        assert!(!f.access.has_finalizer(&la.name));
    }

    /// Deletion leaves a taken-over record in place but still releases the
    /// object
    #[tokio::test]
    async fn test_lock_delete_taken_over() {
        let f = Fixture::with_provider(&["example.com"]).await;
        let la = lock_object("default/la", "lock.example.com", "A", 100, 60);
        f.access.insert(la.clone());
        f.state.update_entry(la.clone()).await;

        // Another writer took the record over with a newer timestamp.
        let takeover = crate::dns::RecordSet::txt_from_attrs(
            60,
            "B",
            200,
            &std::collections::BTreeMap::new(),
        );
        let zone = f.adapter.list_zones().await.unwrap().remove(0);
        f.adapter
            .apply_changes(
                &zone,
                &[crate::provider::Change::Create {
                    name: "lock.example.com".to_string(),
                    rset: takeover,
                }],
            )
            .await;

        let mut la_del = la.clone();
        la_del.deleting = true;
        la_del.has_finalizer = true;
        f.state.delete_entry(la_del).await;

        let record = f
            .adapter
            .record_set("example.com", "lock.example.com", RecordType::TXT)
            .expect("foreign record must survive");
        assert_eq!(record.attr(ATTR_LOCKID), Some("B"));
        assert!(
            !f.access.has_finalizer(&la.name),
            "the object is released even though the record stays"
        );
    }

    /// Background refresh parses observed TXT attributes into the status
    #[tokio::test]
    async fn test_lock_refresh_parses_attributes() {
        let f = Fixture::with_provider(&["example.com"]).await;
        let la = lock_object("default/la", "lock.example.com", "A", 100, 60);
        f.access.insert(la.clone());
        f.state.update_entry(la.clone()).await;

        f.resolver.set_txt(
            "lock.example.com",
            &["lockid=A", "timestamp=100", "leader=node-1", "plain"],
        );
        f.state.update_lock_states().await;

        let status = f.access.last_status(&la.name).unwrap();
        assert_eq!(status.state, Some(EntryState::Ready));
        assert_eq!(status.lock_timestamp, Some(100));
        let attrs = status.lock_attributes.expect("attributes observed");
        assert_eq!(attrs.get("lockid").map(String::as_str), Some("A"));
        assert_eq!(attrs.get("leader").map(String::as_str), Some("node-1"));
        assert_eq!(
            attrs.get("_0").map(String::as_str),
            Some("plain"),
            "unnamed TXT strings get synthetic keys"
        );
        assert!(
            !attrs.contains_key("timestamp"),
            "the timestamp is reported separately"
        );
    }

    /// Persistent lookup failure beyond twice the TTL re-arms the writer
    #[tokio::test]
    async fn test_lock_expiry_rearms_writer() {
        let f = Fixture::with_provider(&["example.com"]).await;
        let la = lock_object("default/la", "lock.example.com", "A", 100, 60);
        f.access.insert(la.clone());
        f.state.update_entry(la.clone()).await;
        let applies_before = f.adapter.apply_call_count();

        f.resolver.fail_txt("lock.example.com", "server failure");

        // First failed lookup starts the failure streak; the entry is ready,
        // so no re-arm yet.
        let t0 = Utc::now();
        f.state.update_lock_states_at(t0).await;
        let status = f.access.last_status(&la.name).unwrap();
        assert_eq!(status.state, Some(EntryState::Stale));
        assert!(!f.access.triggered(&la.name), "no re-arm before the window");

        // 130 seconds of failures exceeds 2 x TTL (120s): re-arm and requeue.
        f.state
            .update_lock_states_at(t0 + ChronoDuration::seconds(130))
            .await;
        assert!(
            f.access.triggered(&la.name),
            "the writer must be requeued after the failure window"
        );

        // The record vanished meanwhile; the re-delivered event rewrites it.
        let zone = f.adapter.list_zones().await.unwrap().remove(0);
        f.adapter
            .apply_changes(
                &zone,
                &[crate::provider::Change::Delete {
                    name: "lock.example.com".to_string(),
                    rtype: RecordType::TXT,
                }],
            )
            .await;
        f.state.update_entry(la.clone()).await;
        assert!(
            f.adapter.apply_call_count() > applies_before + 1,
            "a write is re-attempted"
        );
        assert!(
            f.adapter
                .record_set("example.com", "lock.example.com", RecordType::TXT)
                .is_some(),
            "the lock record is resurrected"
        );
    }
}
