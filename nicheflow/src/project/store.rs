//! Thread-safe append-merge store.

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::debug;

/// A partial or full project mapping.
pub type ProjectMap = Map<String, Value>;

/// The shared project data store.
///
/// Mutation goes exclusively through [`ProjectData::merge`], so concurrent
/// stages never discard each other's keys. Every effective merge bumps a
/// version counter that observers can watch.
#[derive(Debug)]
pub struct ProjectData {
    data: RwLock<ProjectMap>,
    version: watch::Sender<u64>,
}

impl Default for ProjectData {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectData {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            data: RwLock::new(Map::new()),
            version,
        }
    }

    /// Creates a store seeded with existing data.
    #[must_use]
    pub fn from_map(data: ProjectMap) -> Self {
        let store = Self::new();
        *store.data.write() = data;
        store
    }

    /// Merges `partial` into the store and returns the keys that changed.
    ///
    /// Keys absent from `partial` are left untouched.
    pub fn merge(&self, partial: ProjectMap) -> Vec<String> {
        let mut changed = Vec::new();
        {
            let mut data = self.data.write();
            for (key, value) in partial {
                if data.get(&key) != Some(&value) {
                    changed.push(key.clone());
                    data.insert(key, value);
                }
            }
        }

        if !changed.is_empty() {
            debug!(keys = ?changed, "Project data merged");
            self.version.send_modify(|v| *v += 1);
        }
        changed
    }

    /// Merges a single key.
    pub fn merge_value(&self, key: impl Into<String>, value: Value) -> bool {
        let mut partial = Map::new();
        partial.insert(key.into(), value);
        !self.merge(partial).is_empty()
    }

    /// Gets a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.read().get(key).cloned()
    }

    /// Returns true if `key` is present and not null.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.data.read().get(key).is_some_and(|v| !v.is_null())
    }

    /// Returns the keys from `required` that are absent or null.
    #[must_use]
    pub fn missing<'a, I>(&self, required: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let data = self.data.read();
        required
            .into_iter()
            .filter(|key| data.get(key.as_str()).map_or(true, Value::is_null))
            .cloned()
            .collect()
    }

    /// Returns a copy of all data.
    #[must_use]
    pub fn snapshot(&self) -> ProjectMap {
        self.data.read().clone()
    }

    /// Returns the number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if no keys are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Returns the current mutation version.
    #[must_use]
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// Subscribes to mutation notifications.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> ProjectMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_merge_preserves_other_keys() {
        let store = ProjectData::new();
        store.merge(map(json!({"selectedNiche": {"name": "plumber"}})));
        store.merge(map(json!({"selectedDomain": "plumberbirmingham.com"})));

        assert_eq!(store.len(), 2);
        assert_eq!(store.get("selectedNiche"), Some(json!({"name": "plumber"})));
    }

    #[test]
    fn test_last_writer_wins() {
        let store = ProjectData::new();
        store.merge_value("selectedDomain", json!("a.com"));
        store.merge_value("selectedDomain", json!("b.com"));
        assert_eq!(store.get("selectedDomain"), Some(json!("b.com")));
    }

    #[test]
    fn test_merge_reports_changed_keys_only() {
        let store = ProjectData::from_map(map(json!({"a": 1})));
        let changed = store.merge(map(json!({"a": 1, "b": 2})));
        assert_eq!(changed, vec!["b".to_string()]);
    }

    #[test]
    fn test_null_counts_as_missing() {
        let store = ProjectData::new();
        store.merge(map(json!({"selectedNiche": null, "selectedDomain": "x.com"})));

        assert!(!store.has("selectedNiche"));
        assert!(store.has("selectedDomain"));

        let required = vec!["selectedNiche".to_string(), "selectedDomain".to_string()];
        assert_eq!(store.missing(&required), vec!["selectedNiche".to_string()]);
    }

    #[test]
    fn test_version_bumps_on_effective_merge() {
        let store = ProjectData::new();
        let rx = store.subscribe();
        assert_eq!(store.version(), 0);

        store.merge_value("k", json!(1));
        assert_eq!(store.version(), 1);
        assert!(rx.has_changed().unwrap());

        store.merge_value("k", json!(1));
        assert_eq!(store.version(), 1);
    }

    #[test]
    fn test_concurrent_merges_keep_all_keys() {
        let store = std::sync::Arc::new(ProjectData::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store.merge_value(format!("key{i}"), json!(i));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 8);
    }
}
