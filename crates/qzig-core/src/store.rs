//! On-disk persistence of the device tree
//!
//! Layout below the root directory:
//!
//! ```text
//! store/network.json
//! store/device/<id>/device.json
//! store/device/<id>/value/<id>/value.json
//! store/device/<id>/value/<id>/state/<id>/state.json
//! ```
//!
//! Each file holds a [`NodeRecord`]. Children are never embedded in their
//! parent's file.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{StoreError, StoreResult};
use crate::models::{Node, NodeKind, NodeRecord};
use crate::routing::NodePath;

#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    /// Store living in `<root_dir>/store`
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            root: root_dir.as_ref().join("store"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a node; the network itself lives at the root
    pub fn dir(&self, path: &NodePath) -> PathBuf {
        let mut dir = self.root.clone();
        for (kind, id) in path.segments() {
            if *kind == NodeKind::Network {
                continue;
            }
            dir.push(kind.as_str());
            dir.push(id);
        }
        dir
    }

    fn file(&self, path: &NodePath) -> PathBuf {
        self.dir(path).join(format!("{}.json", path.kind()))
    }

    /// Write a node and its whole subtree
    pub fn save(&self, path: &NodePath, node: &dyn Node) -> StoreResult<()> {
        let dir = self.dir(path);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let file = self.file(path);
        let bytes = serde_json::to_vec(&node.record()).map_err(|source| StoreError::Malformed {
            path: file.clone(),
            source,
        })?;
        write_atomic(&file, &bytes)?;

        for child in node.children() {
            self.save(&path.child(child.kind(), child.id()), child)?;
        }
        Ok(())
    }

    /// Delete a node's directory with everything below it
    pub fn remove(&self, path: &NodePath) -> StoreResult<()> {
        let dir = self.dir(path);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(dir, e)),
        }
    }

    /// Read a node's record; `None` when the file does not exist
    pub fn load_record(&self, path: &NodePath) -> StoreResult<Option<NodeRecord>> {
        let file = self.file(path);
        let bytes = match fs::read(&file) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(file, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Malformed { path: file, source })
    }

    /// Records of every `kind` child below `parent`, in directory name order
    ///
    /// Unreadable or malformed children are logged and skipped.
    pub fn child_records(&self, parent: &NodePath, kind: NodeKind) -> Vec<(NodePath, NodeRecord)> {
        let dir = self.dir(parent).join(kind.as_str());
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Failed to list children");
                return Vec::new();
            }
        };

        let mut ids: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        ids.sort();

        let mut records = Vec::new();
        for id in ids {
            let path = parent.child(kind, id);
            match self.load_record(&path) {
                Ok(Some(record)) => records.push((path, record)),
                Ok(None) => {
                    tracing::debug!(dir = %self.dir(&path).display(), "Directory without node file")
                }
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable node"),
            }
        }
        records
    }
}

/// Write next to the target, then rename over it
fn write_atomic(file: &Path, bytes: &[u8]) -> StoreResult<()> {
    let tmp = file.with_extension("json.tmp");
    fs::write(&tmp, bytes).map_err(|e| StoreError::io(&tmp, e))?;
    fs::rename(&tmp, file).map_err(|e| StoreError::io(file, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Device, State, StateStatus, StateType, Value};
    use crate::values::ValueKind;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn directories_skip_network_segment() {
        let store = Store::new("/var/qzig");
        let path = NodePath::network("n").device("d").value("v").state("s");
        assert_eq!(
            store.dir(&path),
            PathBuf::from("/var/qzig/store/device/d/value/v/state/s")
        );
        assert_eq!(store.dir(&NodePath::network("n")), PathBuf::from("/var/qzig/store"));
    }

    #[test]
    fn save_writes_every_level() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        let mut device = Device::new("aa");
        device.ensure_gateway_values();
        let path = NodePath::network("n").device(device.id());

        store.save(&path, &device).unwrap();

        let device_file = tmp
            .path()
            .join(format!("store/device/{}/device.json", device.id()));
        assert!(device_file.exists());
        for value in device.values() {
            let value_path = path.value(value.id());
            assert!(store.load_record(&value_path).unwrap().is_some());
            for state in value.states() {
                let record = store.load_record(&value_path.state(state.id())).unwrap();
                assert_eq!(record.unwrap().data, state.payload());
            }
        }
    }

    #[test]
    fn record_format_is_data_and_attr() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        let value = Value::new(ValueKind::OnOff, 1);
        let path = NodePath::network("n").device("d").value(value.id());
        store.save(&path, &value).unwrap();

        let raw = fs::read_to_string(store.dir(&path).join("value.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["attr"]["cluster_id"], json!(6));
        assert!(parsed["data"].get("state").is_none());
    }

    #[test]
    fn missing_record_is_none() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        assert!(store
            .load_record(&NodePath::network("n"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn malformed_record_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        fs::create_dir_all(store.root()).unwrap();
        fs::write(store.root().join("network.json"), b"{not json").unwrap();
        assert!(matches!(
            store.load_record(&NodePath::network("n")),
            Err(StoreError::Malformed { .. })
        ));
    }

    #[test]
    fn child_records_skip_corrupt_children() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        let parent = NodePath::network("n").device("d").value("v");
        let good = State::new(StateType::Report, "0");
        store.save(&parent.state(good.id()), &good).unwrap();
        let bad = store.dir(&parent.state("bad"));
        fs::create_dir_all(&bad).unwrap();
        fs::write(bad.join("state.json"), b"[").unwrap();
        fs::create_dir_all(store.dir(&parent.state("empty"))).unwrap();

        let records = store.child_records(&parent, NodeKind::State);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0.id(), good.id());
    }

    #[test]
    fn save_replaces_file_without_leftovers() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        let path = NodePath::network("n").device("d").value("v").state("s");
        let mut state = State::new(StateType::Report, "0");
        store.save(&path, &state).unwrap();
        state.update("1", StateStatus::Send);
        store.save(&path, &state).unwrap();

        let files: Vec<_> = fs::read_dir(store.dir(&path))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(files, vec!["state.json".to_string()]);
        let record = store.load_record(&path).unwrap().unwrap();
        assert_eq!(record.data["data"], "1");
    }

    #[test]
    fn remove_deletes_subtree_and_tolerates_missing() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        let device = Device::gateway();
        let path = NodePath::network("n").device(device.id());
        store.save(&path, &device).unwrap();

        store.remove(&path).unwrap();
        assert!(!store.dir(&path).exists());
        store.remove(&path).unwrap();
    }
}
