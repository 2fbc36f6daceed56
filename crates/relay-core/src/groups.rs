//! Registered group lookup backed by a JSON file.
//!
//! File format: `{ "slack:C123": { "name": "team", "folder": "team" }, ... }`.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
};

use crate::{messaging::types::RegisteredGroup, Result};

#[derive(Debug)]
pub struct GroupRegistry {
    path: PathBuf,
    groups: RwLock<HashMap<String, RegisteredGroup>>,
}

impl GroupRegistry {
    /// Load the registry. A missing file yields an empty registry.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let groups = read_groups(&path)?;
        tracing::info!(path = %path.display(), count = groups.len(), "registered groups loaded");
        Ok(Self {
            path,
            groups: RwLock::new(groups),
        })
    }

    pub fn from_map(groups: HashMap<String, RegisteredGroup>) -> Self {
        Self {
            path: PathBuf::new(),
            groups: RwLock::new(groups),
        }
    }

    /// Re-read the backing file, keeping the old snapshot on error.
    pub fn reload(&self) -> Result<()> {
        let fresh = read_groups(&self.path)?;
        match self.groups.write() {
            Ok(mut guard) => *guard = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
        Ok(())
    }

    pub fn snapshot(&self) -> HashMap<String, RegisteredGroup> {
        match self.groups.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn get(&self, jid: &str) -> Option<RegisteredGroup> {
        self.snapshot().get(jid).cloned()
    }
}

fn read_groups(path: &Path) -> Result<HashMap<String, RegisteredGroup>> {
    if path.as_os_str().is_empty() || !path.exists() {
        return Ok(HashMap::new());
    }
    let raw = fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Ok(HashMap::new());
    }
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_file(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        PathBuf::from(format!("/tmp/{prefix}-{}-{ts}.json", std::process::id()))
    }

    #[test]
    fn missing_file_is_empty() {
        let reg = GroupRegistry::load(tmp_file("relay-groups-missing")).unwrap();
        assert!(reg.snapshot().is_empty());
    }

    #[test]
    fn loads_and_reloads() {
        let path = tmp_file("relay-groups");
        fs::write(&path, r#"{"slack:C1":{"name":"team","folder":"team"}}"#).unwrap();

        let reg = GroupRegistry::load(&path).unwrap();
        assert_eq!(reg.get("slack:C1").unwrap().folder, "team");

        fs::write(
            &path,
            r#"{"slack:C1":{"name":"team","folder":"team"},"tg:42":{"name":"dm","folder":"dm"}}"#,
        )
        .unwrap();
        reg.reload().unwrap();
        assert_eq!(reg.snapshot().len(), 2);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn bad_json_is_an_error() {
        let path = tmp_file("relay-groups-bad");
        fs::write(&path, "{not json").unwrap();
        assert!(GroupRegistry::load(&path).is_err());
        let _ = fs::remove_file(&path);
    }
}
