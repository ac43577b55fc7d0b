use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::environment::Mutation;
use crate::error::DevEnvError;

/// Pre-activation value of one variable; `None` means it was not set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Everything needed to undo an activation session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub key: String,
    pub created_at: String,
    /// Values before the first activation touched each variable
    #[serde(default)]
    pub original: BTreeMap<String, RecordedValue>,
    /// Entries the latest activation put into each list-valued variable
    #[serde(default)]
    pub contributed: BTreeMap<String, Vec<String>>,
}

impl EnvironmentSnapshot {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            created_at: chrono::Utc::now().to_rfc3339(),
            original: BTreeMap::new(),
            contributed: BTreeMap::new(),
        }
    }

    /// Remember `current` as the original value unless one is already recorded
    pub fn record(&mut self, name: &str, current: Option<&str>) {
        self.original
            .entry(name.to_string())
            .or_insert_with(|| RecordedValue {
                value: current.map(str::to_string),
            });
    }

    pub fn original_value(&self, name: &str) -> Option<Option<&str>> {
        self.original
            .get(name)
            .map(|recorded| recorded.value.as_deref())
    }

    pub fn contributed(&self, name: &str) -> &[String] {
        self.contributed
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Mutations restoring every recorded variable; `last` is restored after
    /// all others so an interrupted restore can be retried.
    pub fn restore_mutations(&self, last: &str) -> Vec<Mutation> {
        let mut mutations: Vec<Mutation> = self
            .original
            .iter()
            .filter(|(name, _)| name.as_str() != last)
            .map(|(name, recorded)| Mutation::restore(name.clone(), recorded.value.clone()))
            .collect();

        if let Some(recorded) = self.original.get(last) {
            mutations.push(Mutation::restore(last, recorded.value.clone()));
        }
        mutations
    }
}

/// Snapshots persisted under `<state dir>/activations/<key>.toml`
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join("activations"),
        }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.toml"))
    }

    /// Load the snapshot for `key`, failing if activation state is missing
    pub fn load(&self, key: &str) -> Result<EnvironmentSnapshot> {
        let path = self.path_for(key);
        if !path.is_file() {
            return Err(DevEnvError::MissingActivationState { path }.into());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read activation state {:?}", path))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse activation state {:?}", path))
    }

    pub fn save(&self, snapshot: &EnvironmentSnapshot) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create state directory {:?}", self.dir))?;

        let path = self.path_for(&snapshot.key);
        let contents =
            toml::to_string_pretty(snapshot).context("Failed to serialize activation state")?;
        fs::write(&path, contents)
            .with_context(|| format!("Failed to write activation state {:?}", path))?;
        Ok(path)
    }

    /// Delete the snapshot for `key`; a missing file is not an error
    pub fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("Failed to remove activation state {:?}", path))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_record_keeps_first_value() {
        let mut snapshot = EnvironmentSnapshot::new("abc");
        snapshot.record("PATH", Some("/usr/bin"));
        snapshot.record("PATH", Some("/changed"));
        snapshot.record("PYTHONPATH", None);

        assert_eq!(snapshot.original_value("PATH"), Some(Some("/usr/bin")));
        assert_eq!(snapshot.original_value("PYTHONPATH"), Some(None));
        assert_eq!(snapshot.original_value("OTHER"), None);
    }

    #[test]
    fn test_restore_mutations_order() {
        let mut snapshot = EnvironmentSnapshot::new("abc");
        snapshot.record("KEY", None);
        snapshot.record("PATH", Some("/usr/bin"));
        snapshot.record("AAA", None);

        let mutations = snapshot.restore_mutations("KEY");
        assert_eq!(
            mutations,
            vec![
                Mutation::unset("AAA"),
                Mutation::set("PATH", "/usr/bin"),
                Mutation::unset("KEY"),
            ]
        );
    }

    #[test]
    fn test_store_save_load() {
        let temp = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp.path());

        let mut snapshot = EnvironmentSnapshot::new("abc");
        snapshot.record("PATH", Some("/usr/bin"));
        snapshot.record("PYTHONPATH", None);
        snapshot
            .contributed
            .insert("PATH".into(), vec!["/repo/Scripts".into()]);

        let path = store.save(&snapshot).unwrap();
        assert!(path.ends_with("activations/abc.toml"));

        let loaded = store.load("abc").unwrap();
        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.contributed("PATH"), ["/repo/Scripts".to_string()]);
    }

    #[test]
    fn test_store_remove() {
        let temp = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp.path());
        let path = store.save(&EnvironmentSnapshot::new("abc")).unwrap();

        store.remove("abc").unwrap();
        assert!(!path.exists());
        store.remove("abc").unwrap();
    }

    #[test]
    fn test_record_keeps_empty_value() {
        let mut snapshot = EnvironmentSnapshot::new("abc");
        snapshot.record("PYTHONPATH", Some(""));

        assert_eq!(snapshot.original_value("PYTHONPATH"), Some(Some("")));
        assert_eq!(
            snapshot.restore_mutations("KEY"),
            vec![Mutation::set("PYTHONPATH", "")]
        );
    }

    #[test]
    fn test_store_missing_state() {
        let temp = TempDir::new().unwrap();
        let err = SnapshotStore::new(temp.path()).load("missing").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DevEnvError>(),
            Some(DevEnvError::MissingActivationState { .. })
        ));
    }
}
