// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Tests for batched zone reconciliation: minimal change sets, trigger
//! coalescing, retry on transient failure and deletion ordering.

#[cfg(test)]
mod tests {
    use crate::dns::RecordType;
    use crate::object::EntryState;
    use crate::state::testsupport::{base_time, entry_object, Fixture};
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    /// Several triggers within the blocking window coalesce into one batch
    #[tokio::test]
    async fn test_zone_batch_coalescing() {
        let f =
            Fixture::with_provider_and_blocking(&["example.com"], Duration::from_millis(150)).await;

        for (name, target) in [
            ("default/e1", "1.1.1.1"),
            ("default/e2", "2.2.2.2"),
            ("default/e3", "3.3.3.3"),
        ] {
            let object = entry_object(name, &format!("{}.example.com", name.split('/').nth(1).unwrap()), &[target]);
            f.access.insert(object.clone());
            f.state.update_entry(object).await;
        }

        f.wait_for_applies(1).await;
        f.settle().await;

        assert_eq!(
            f.adapter.apply_call_count(),
            1,
            "triggers within the window must land in a single batch"
        );
        for name in ["e1", "e2", "e3"] {
            assert!(
                f.adapter
                    .record_set("example.com", &format!("{name}.example.com"), RecordType::A)
                    .is_some(),
                "record for {name} should exist after the single batch"
            );
        }
    }

    /// A re-trigger without differences does not call the adapter again
    #[tokio::test]
    async fn test_no_changes_no_apply() {
        let f = Fixture::with_provider(&["example.com"]).await;
        let object = entry_object("default/e1", "www.example.com", &["1.2.3.4"]);
        f.access.insert(object.clone());
        f.state.update_entry(object.clone()).await;
        f.wait_for_applies(1).await;
        f.settle().await;

        f.state.trigger_hosted_zone("example.com");
        f.settle().await;
        assert_eq!(
            f.adapter.apply_call_count(),
            1,
            "an in-sync zone must not produce another apply"
        );

        // An unchanged re-observation does not even trigger the zone.
        f.state.update_entry(object).await;
        f.settle().await;
        assert_eq!(f.adapter.apply_call_count(), 1);
    }

    /// Target changes produce an update of the existing record set
    #[tokio::test]
    async fn test_target_change_updates_record() {
        let f = Fixture::with_provider(&["example.com"]).await;
        let object = entry_object("default/e1", "www.example.com", &["1.2.3.4"]);
        f.access.insert(object.clone());
        f.state.update_entry(object).await;
        f.wait_for_applies(1).await;
        f.settle().await;

        let mut changed = entry_object("default/e1", "www.example.com", &["9.9.9.9"]);
        changed.generation = 2;
        f.access.insert(changed.clone());
        f.state.update_entry(changed).await;
        f.wait_for_applies(2).await;
        f.settle().await;

        let record = f
            .adapter
            .record_set("example.com", "www.example.com", RecordType::A)
            .unwrap();
        assert_eq!(record.records[0].value, "9.9.9.9");
    }

    /// Transient adapter failures are retried with backoff until they pass
    #[tokio::test]
    async fn test_transient_failure_retried() {
        let f = Fixture::with_provider(&["example.com"]).await;
        f.adapter.fail_next_applies(1);

        let object = entry_object("default/e1", "www.example.com", &["1.2.3.4"]);
        f.access.insert(object.clone());
        f.state.update_entry(object.clone()).await;

        f.wait_for_applies(2).await;
        f.settle().await;

        assert!(
            f.adapter
                .record_set("example.com", "www.example.com", RecordType::A)
                .is_some(),
            "the batch must eventually land"
        );
        let status = f.access.last_status(&object.name).unwrap();
        assert_eq!(status.state, Some(EntryState::Ready));
    }

    /// A record set is never deleted while another entry still claims the
    /// same name and type in the zone
    #[tokio::test]
    async fn test_no_delete_while_claimed() {
        // A large blocking window keeps the background workers out of the
        // way; batches run through direct reconcile calls.
        let f =
            Fixture::with_provider_and_blocking(&["example.com"], Duration::from_secs(10)).await;

        let e1 = entry_object("default/e1", "www.example.com", &["1.2.3.4"]);
        f.access.insert(e1.clone());
        f.state.update_entry(e1.clone()).await;
        f.state.reconcile_zone("example.com").await.unwrap();
        assert!(f
            .adapter
            .record_set("example.com", "www.example.com", RecordType::A)
            .is_some());

        let mut e2 = entry_object("default/e2", "www.example.com", &["5.6.7.8"]);
        e2.created = base_time() + ChronoDuration::seconds(60);
        f.access.insert(e2.clone());
        f.state.update_entry(e2.clone()).await;

        // Delete the holder and promote the duplicate before the next batch.
        let mut e1_del = e1.clone();
        e1_del.deleting = true;
        e1_del.has_finalizer = true;
        f.state.delete_entry(e1_del).await;
        assert_eq!(f.state.outdated_count(), 1);
        f.state.update_entry(e2.clone()).await;

        let applies_before = f.adapter.apply_call_count();
        f.state.reconcile_zone("example.com").await.unwrap();

        assert_eq!(
            f.adapter.apply_call_count(),
            applies_before + 1,
            "one batch handles takeover and deletion confirmation"
        );
        let record = f
            .adapter
            .record_set("example.com", "www.example.com", RecordType::A)
            .expect("the claimed record set must survive the holder's deletion");
        assert_eq!(
            record.records[0].value, "5.6.7.8",
            "the record now carries the new claimant's targets"
        );
        assert!(
            !f.access.has_finalizer(&e1.name),
            "the old holder's finalizer is released without an orphaning delete"
        );
        assert_eq!(f.state.outdated_count(), 0);
    }

    /// Entries pending deletion are finalized only after their delete lands
    #[tokio::test]
    async fn test_deletion_confirmed_before_finalizer_removal() {
        let f =
            Fixture::with_provider_and_blocking(&["example.com"], Duration::from_secs(10)).await;
        let e1 = entry_object("default/e1", "www.example.com", &["1.2.3.4"]);
        f.access.insert(e1.clone());
        f.state.update_entry(e1.clone()).await;
        f.state.reconcile_zone("example.com").await.unwrap();

        let mut e1_del = e1.clone();
        e1_del.deleting = true;
        e1_del.has_finalizer = true;
        f.state.delete_entry(e1_del).await;
        assert!(
            f.access.has_finalizer(&e1.name),
            "finalizer held while the provider record still exists"
        );

        // First confirmation attempt fails transiently; the finalizer stays.
        f.adapter.fail_next_applies(1);
        assert!(
            f.state.reconcile_zone("example.com").await.is_err(),
            "transient failure surfaces for retry"
        );
        assert!(f.access.has_finalizer(&e1.name));
        assert_eq!(f.state.outdated_count(), 1);

        f.state.reconcile_zone("example.com").await.unwrap();
        assert!(
            f.adapter
                .record_set("example.com", "www.example.com", RecordType::A)
                .is_none(),
            "record deleted on retry"
        );
        assert!(!f.access.has_finalizer(&e1.name));
        assert_eq!(f.state.outdated_count(), 0);
    }

    /// Invalid providers never receive zone changes
    #[tokio::test]
    async fn test_invalid_provider_withholds_changes() {
        let f =
            Fixture::with_provider_and_blocking(&["example.com"], Duration::from_secs(10)).await;
        let object = entry_object("default/e1", "www.example.com", &["1.2.3.4"]);
        f.access.insert(object.clone());
        f.state.update_entry(object).await;

        f.state
            .fail_provider(&f.provider_name, crate::provider::TYPE_INMEMORY, "credentials expired");

        let applies_before = f.adapter.apply_call_count();
        f.state.reconcile_zone("example.com").await.unwrap();
        assert_eq!(
            f.adapter.apply_call_count(),
            applies_before,
            "invalid providers cannot accept changes"
        );
    }
}
