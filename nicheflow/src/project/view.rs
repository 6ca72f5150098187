//! Read access scoped to a stage's declared keys.

use super::ProjectData;
use crate::errors::UndeclaredKeyError;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// A read-only view of [`ProjectData`] limited to an allow-list of keys.
///
/// Task bodies receive one of these: they may read their stage's
/// prerequisites and any key declared as an output of a task in the same
/// stage, and nothing else.
#[derive(Debug, Clone)]
pub struct ScopedProjectView {
    store: Arc<ProjectData>,
    stage: String,
    task: String,
    allowed: Arc<HashSet<String>>,
}

impl ScopedProjectView {
    /// Creates a new scoped view.
    #[must_use]
    pub fn new(
        store: Arc<ProjectData>,
        stage: impl Into<String>,
        task: impl Into<String>,
        allowed: Arc<HashSet<String>>,
    ) -> Self {
        Self {
            store,
            stage: stage.into(),
            task: task.into(),
            allowed,
        }
    }

    /// Reads a declared key.
    ///
    /// # Errors
    ///
    /// Returns `UndeclaredKeyError` if the key is outside the stage contract.
    pub fn get(&self, key: &str) -> Result<Option<Value>, UndeclaredKeyError> {
        if !self.allowed.contains(key) {
            return Err(UndeclaredKeyError::read(&self.stage, &self.task, key));
        }
        Ok(self.store.get(key))
    }

    /// Reads a declared key that must be present.
    ///
    /// # Errors
    ///
    /// Returns `UndeclaredKeyError` for undeclared keys, or a message naming
    /// the key when it is declared but absent.
    pub fn require(&self, key: &str) -> Result<Value, crate::errors::TaskFailure> {
        match self.get(key)? {
            Some(value) if !value.is_null() => Ok(value),
            _ => Err(crate::errors::TaskFailure::new(
                &self.task,
                format!("required project key '{key}' is not set"),
            )),
        }
    }

    /// Returns true if the key may be read through this view.
    #[must_use]
    pub fn allows(&self, key: &str) -> bool {
        self.allowed.contains(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn view(store: Arc<ProjectData>, keys: &[&str]) -> ScopedProjectView {
        let allowed: HashSet<String> = keys.iter().map(|k| (*k).to_string()).collect();
        ScopedProjectView::new(store, "emd-finder", "check-availability", Arc::new(allowed))
    }

    #[test]
    fn test_declared_read() {
        let store = Arc::new(ProjectData::new());
        store.merge_value("selectedNiche", json!({"name": "roofer"}));

        let view = view(store, &["selectedNiche"]);
        assert_eq!(view.get("selectedNiche").unwrap(), Some(json!({"name": "roofer"})));
    }

    #[test]
    fn test_undeclared_read_rejected() {
        let store = Arc::new(ProjectData::new());
        store.merge_value("adCampaigns", json!([]));

        let view = view(store, &["selectedNiche"]);
        let err = view.get("adCampaigns").unwrap_err();
        assert_eq!(err.key, "adCampaigns");
        assert_eq!(err.access, "read");
    }

    #[test]
    fn test_require_missing_key() {
        let view = view(Arc::new(ProjectData::new()), &["selectedNiche"]);
        let err = view.require("selectedNiche").unwrap_err();
        assert_eq!(err.task, "check-availability");
        assert!(err.message.contains("selectedNiche"));
    }
}
