//! Topic configuration diffing
//!
//! Writes and reads are deliberately asymmetric. An alteration always carries
//! the full declared set, because the cluster replaces a topic's whole
//! configuration on alter. A read-back only reports keys the caller declared,
//! so broker defaults never leak into recorded state.

use std::collections::{BTreeMap, BTreeSet};

use crate::kafka::ConfigEntry;

/// Configuration key/value entries of a topic
pub type ConfigEntries = BTreeMap<String, String>;

/// Configuration keys the caller has declared interest in
pub type TrackedKeys = BTreeSet<String>;

/// Payload for a full-overwrite alteration: every declared entry, nothing else
pub fn alteration_entries(declared: &ConfigEntries) -> ConfigEntries {
    declared.clone()
}

/// Keys of a configuration map
pub fn tracked_keys(entries: &ConfigEntries) -> TrackedKeys {
    entries.keys().cloned().collect()
}

/// Cluster-reported configuration narrowed to the tracked keys.
///
/// Tracked keys the cluster does not report are left out, and so are
/// sensitive entries, which come back without a value.
pub fn observed_entries<'a>(
    reported: impl IntoIterator<Item = &'a ConfigEntry>,
    tracked: &TrackedKeys,
) -> ConfigEntries {
    reported
        .into_iter()
        .filter(|entry| tracked.contains(&entry.name))
        .filter_map(|entry| Some((entry.name.clone(), entry.value.clone()?)))
        .collect()
}

/// Tracked keys the cluster reported with the value withheld
pub fn withheld_keys<'a>(
    reported: impl IntoIterator<Item = &'a ConfigEntry>,
    tracked: &TrackedKeys,
) -> TrackedKeys {
    reported
        .into_iter()
        .filter(|entry| entry.value.is_none() && tracked.contains(&entry.name))
        .map(|entry| entry.name.clone())
        .collect()
}

/// Key-level difference between observed and declared configuration
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigDiff {
    /// Declared but not observed
    pub added: Vec<String>,
    /// Observed with a different value than declared
    pub changed: Vec<String>,
    /// Observed but no longer declared
    pub removed: Vec<String>,
}

impl ConfigDiff {
    pub fn between(observed: &ConfigEntries, declared: &ConfigEntries) -> Self {
        let mut diff = ConfigDiff::default();

        for (key, value) in declared {
            match observed.get(key) {
                None => diff.added.push(key.clone()),
                Some(current) if current != value => diff.changed.push(key.clone()),
                Some(_) => {}
            }
        }
        diff.removed = observed
            .keys()
            .filter(|key| !declared.contains_key(*key))
            .cloned()
            .collect();

        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}
