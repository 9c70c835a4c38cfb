//! Snapshot change detection
//!
//! Compares two snapshots of the same table and splits their attribute names
//! into four disjoint sets.

use crate::types::Snapshot;
use std::collections::BTreeSet;

/// Attribute-level difference between a new and an old snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    /// In the new snapshot only
    pub added: BTreeSet<String>,
    /// In the old snapshot only
    pub removed: BTreeSet<String>,
    /// In both, with different values
    pub changed: BTreeSet<String>,
    /// In both, with equal values
    pub unchanged: BTreeSet<String>,
}

impl SnapshotDiff {
    /// True if the table gained or lost attributes
    pub fn is_schema_change(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }

    /// Changed attributes that are not in the volatile set
    pub fn material_changes<'a>(&'a self, volatile: &'a BTreeSet<String>) -> impl Iterator<Item = &'a String> + 'a {
        self.changed.difference(volatile)
    }

    /// False when the only changes are to volatile attributes (e.g. `timestamp`)
    pub fn has_material_change(&self, volatile: &BTreeSet<String>) -> bool {
        self.material_changes(volatile).next().is_some()
    }
}

/// Compute the difference between `new` and `old`
pub fn diff(new: &Snapshot, old: &Snapshot) -> SnapshotDiff {
    let mut result = SnapshotDiff::default();

    for (name, value) in new.iter() {
        match old.get(name) {
            None => {
                result.added.insert(name.clone());
            }
            Some(previous) if previous != value => {
                result.changed.insert(name.clone());
            }
            Some(_) => {
                result.unchanged.insert(name.clone());
            }
        }
    }

    result.removed = old.keys().filter(|name| !new.contains(name)).cloned().collect();

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    fn names(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn sample_pair() -> (Snapshot, Snapshot) {
        let old = Snapshot::new()
            .with("latitude", 37.46)
            .with("longitude", -122.17)
            .with("speed", Value::Null)
            .with("timestamp", 1000i64)
            .with("power", 0i64);
        let new = Snapshot::new()
            .with("latitude", 37.46)
            .with("longitude", -122.18)
            .with("speed", 25i64)
            .with("timestamp", 1005i64)
            .with("heading", 90i64);
        (new, old)
    }

    #[test]
    fn test_diff_partitions_keys() {
        let (new, old) = sample_pair();
        let d = diff(&new, &old);

        assert_eq!(d.added, names(&["heading"]));
        assert_eq!(d.removed, names(&["power"]));
        assert_eq!(d.changed, names(&["longitude", "speed", "timestamp"]));
        assert_eq!(d.unchanged, names(&["latitude"]));

        let mut all = BTreeSet::new();
        for set in [&d.added, &d.removed, &d.changed, &d.unchanged] {
            for name in set {
                assert!(all.insert(name.clone()), "{} appears in two sets", name);
            }
        }
        let union: BTreeSet<String> = new.keys().chain(old.keys()).cloned().collect();
        assert_eq!(all, union);
    }

    #[test]
    fn test_diff_is_symmetric_under_swap() {
        let (new, old) = sample_pair();
        let forward = diff(&new, &old);
        let backward = diff(&old, &new);

        assert_eq!(forward.added, backward.removed);
        assert_eq!(forward.removed, backward.added);
        assert_eq!(forward.changed, backward.changed);
        assert_eq!(forward.unchanged, backward.unchanged);
    }

    #[test]
    fn test_identical_snapshots() {
        let (new, _) = sample_pair();
        let d = diff(&new, &new.clone());
        assert!(d.added.is_empty() && d.removed.is_empty() && d.changed.is_empty());
        assert_eq!(d.unchanged.len(), new.len());
        assert!(!d.is_schema_change());
    }

    #[test]
    fn test_volatile_only_change_is_not_material() {
        let old = Snapshot::new().with("latitude", 37.46).with("timestamp", 1000i64).with("gps_as_of", 999i64);
        let new = Snapshot::new().with("latitude", 37.46).with("timestamp", 1005i64).with("gps_as_of", 1004i64);
        let volatile = names(&["timestamp", "gps_as_of"]);

        let d = diff(&new, &old);
        assert_eq!(d.changed.len(), 2);
        assert!(!d.has_material_change(&volatile));

        let moved = new.clone().with("latitude", 37.47);
        let d = diff(&moved, &old);
        assert!(d.has_material_change(&volatile));
        assert_eq!(d.material_changes(&volatile).collect::<Vec<_>>(), vec!["latitude"]);
    }

    #[test]
    fn test_type_change_counts_as_change() {
        let old = Snapshot::new().with("charge_limit", 80i64);
        let new = Snapshot::new().with("charge_limit", 80.0);
        assert_eq!(diff(&new, &old).changed, names(&["charge_limit"]));
    }
}
