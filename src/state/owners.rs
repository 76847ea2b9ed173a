// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The owner filter.
//!
//! Owner objects assert (owner-id, active) pairs; the union of active ids
//! forms the filter set. Entries carrying an owner id outside the set are
//! observed but not managed. Changes to the set re-enqueue every entry whose
//! id changed membership, with zone reconciliation deferred through the
//! blocking set so the resulting writes batch up.

use crate::object::ObjectName;
use crate::state::{ReconcileStatus, State};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;

/// Active owner-id set derived from all owner objects.
#[derive(Default)]
pub struct OwnerFilter {
    assertions: HashMap<ObjectName, (String, bool)>,
    active: HashSet<String>,
}

impl OwnerFilter {
    /// Entries without an owner id are always managed; owned entries only
    /// when their id is currently active.
    #[must_use]
    pub fn is_active(&self, owner_id: Option<&str>) -> bool {
        owner_id.is_none_or(|id| self.active.contains(id))
    }

    #[must_use]
    pub fn active_ids(&self) -> &HashSet<String> {
        &self.active
    }

    fn rebuild(&mut self) {
        self.active = self
            .assertions
            .values()
            .filter(|(_, active)| *active)
            .map(|(id, _)| id.clone())
            .collect();
    }

    fn set(&mut self, name: ObjectName, owner_id: String, active: bool) -> HashSet<String> {
        let before = self.active.clone();
        self.assertions.insert(name, (owner_id, active));
        self.rebuild();
        &before ^ &self.active
    }

    fn remove(&mut self, name: &ObjectName) -> HashSet<String> {
        let before = self.active.clone();
        self.assertions.remove(name);
        self.rebuild();
        &before ^ &self.active
    }
}

impl State {
    /// Apply one owner object's assertion and re-trigger entries whose
    /// membership changed. Returns the number of entries carrying this id,
    /// for the owner status.
    pub fn update_owner(
        self: &Arc<Self>,
        name: &ObjectName,
        owner_id: &str,
        active: bool,
    ) -> (ReconcileStatus, usize) {
        let changed = {
            let mut data = self.data_mut();
            data.owners
                .set(name.clone(), owner_id.to_string(), active)
        };
        if !changed.is_empty() {
            info!(owner = %name, ids = ?changed, "owner filter membership changed");
            self.trigger_entries_by_owner(&changed);
        }
        let count = self
            .entries_by_owner(&HashSet::from([owner_id.to_string()]))
            .len();
        (ReconcileStatus::Succeeded, count)
    }

    /// Drop a deleted owner object's assertion.
    pub fn owner_deleted(self: &Arc<Self>, name: &ObjectName) -> ReconcileStatus {
        let changed = {
            let mut data = self.data_mut();
            data.owners.remove(name)
        };
        if !changed.is_empty() {
            info!(owner = %name, ids = ?changed, "owner removed, filter membership changed");
            self.trigger_entries_by_owner(&changed);
        }
        ReconcileStatus::Succeeded
    }

    /// Whether an entry with this owner id is managed right now.
    #[must_use]
    pub fn owner_active(&self, owner_id: Option<&str>) -> bool {
        self.data().owners.is_active(owner_id)
    }
}

#[cfg(test)]
#[path = "owners_tests.rs"]
mod owners_tests;
