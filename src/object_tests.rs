// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `object.rs`

#[cfg(test)]
mod tests {
    use super::super::{with_conflict_retry, AccessError, EntryState, ObjectName, StatusPatch};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Test the ordering used for duplicate tie-breaks
    #[test]
    fn test_object_name_order() {
        let a = ObjectName::new("default", "a");
        let b = ObjectName::new("default", "b");
        let c = ObjectName::new("other", "a");
        assert!(a < b);
        assert!(b < c, "namespace orders before name");
        assert_eq!(a.to_string(), "default/a");
    }

    /// Test state strings match the published status vocabulary
    #[test]
    fn test_entry_state_strings() {
        assert_eq!(EntryState::Pending.as_str(), "pending");
        assert_eq!(EntryState::Ready.as_str(), "ready");
        assert_eq!(EntryState::Error.as_str(), "error");
        assert_eq!(EntryState::Invalid.as_str(), "invalid");
        assert_eq!(EntryState::Stale.as_str(), "stale");
        assert_eq!(EntryState::Deleting.as_str(), "deleting");
    }

    /// Test the empty patch shorthand
    #[test]
    fn test_status_patch_empty() {
        assert!(StatusPatch::default().is_empty());
        assert!(!StatusPatch::state(EntryState::Ready, "ok").is_empty());
    }

    /// Test conflict retry retries conflicts and stops at the bound
    #[tokio::test]
    async fn test_conflict_retry_bounded() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), AccessError> = with_conflict_retry(2, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AccessError::Conflict) }
        })
        .await;
        assert!(matches!(result, Err(AccessError::Conflict)));
        assert_eq!(
            calls.load(Ordering::SeqCst),
            3,
            "one initial attempt plus two retries"
        );
    }

    /// Test conflict retry passes through other errors immediately
    #[tokio::test]
    async fn test_conflict_retry_passthrough() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), AccessError> = with_conflict_retry(5, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AccessError::NotFound) }
        })
        .await;
        assert!(matches!(result, Err(AccessError::NotFound)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Test conflict retry succeeds once the write goes through
    #[tokio::test]
    async fn test_conflict_retry_success_after_conflict() {
        let calls = AtomicUsize::new(0);
        let result = with_conflict_retry(3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(AccessError::Conflict)
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
