/// This module persists deployments as JSON files under a deployments
/// directory:
///
/// - `<network>/<Name>.json` is the current record of `Name`.
/// - `<network>/dump/<address>.json` is the record of whatever was deployed at
///   an address, keyed by the checksummed address.
/// - `<network>/<version>/<Name>.json` is the record of `Name` for a version.
/// - `<network>/sstore2Pointers.json` is the SSTORE2 pointer registry.
/// - `deployments.md` is the version manifest shared by every network.
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use ethers::{types::Address, utils::to_checksum};
use eyre::{Result, WrapErr};
use fluid_addresses::{DeploymentRecord, PointerRecord};
use serde::{de::DeserializeOwned, Serialize};

use super::{snapshot_is_writable, DeploymentStore};
use crate::manifest::{self, ManifestEntry};

const DUMP_DIR: &str = "dump";
const POINTERS_FILE: &str = "sstore2Pointers.json";
const MANIFEST_FILE: &str = "deployments.md";

#[derive(Clone, Debug)]
pub struct FileStore {
    root: PathBuf,
    network: String,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>, network: &str) -> Self {
        Self {
            root: root.into(),
            network: network.to_string(),
        }
    }

    fn network_dir(&self) -> PathBuf {
        self.root.join(&self.network)
    }

    pub fn current_path(&self, name: &str) -> PathBuf {
        self.network_dir().join(format!("{}.json", name))
    }

    pub fn dump_path(&self, address: Address) -> PathBuf {
        self.network_dir()
            .join(DUMP_DIR)
            .join(format!("{}.json", to_checksum(&address, None)))
    }

    pub fn snapshot_path(&self, version: &str, name: &str) -> PathBuf {
        self.network_dir().join(version).join(format!("{}.json", name))
    }

    pub fn pointers_path(&self) -> PathBuf {
        self.network_dir().join(POINTERS_FILE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(
            serde_json::from_str(&contents)
                .wrap_err_with(|| format!("failed to parse {}", path.display()))?,
        )),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error).wrap_err_with(|| format!("failed to read {}", path.display())),
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .wrap_err_with(|| format!("failed to create {}", parent.display()))?;
    }
    let contents = serde_json::to_string_pretty(value)?;
    fs::write(path, contents).wrap_err_with(|| format!("failed to write {}", path.display()))
}

impl DeploymentStore for FileStore {
    fn load(&self, name: &str) -> Result<Option<DeploymentRecord>> {
        read_json(&self.current_path(name))
    }

    fn save(&self, name: &str, version: &str, record: &DeploymentRecord) -> Result<()> {
        write_json(&self.current_path(name), record)?;
        write_json(&self.dump_path(record.address), record)?;

        let snapshot = self.snapshot_path(version, name);
        let existing = read_json::<DeploymentRecord>(&snapshot)?;
        if snapshot_is_writable(existing.as_ref(), name, version) {
            write_json(&snapshot, record)?;
        }
        Ok(())
    }

    fn load_dump(&self, address: Address) -> Result<Option<DeploymentRecord>> {
        read_json(&self.dump_path(address))
    }

    fn list(&self) -> Result<Vec<(String, DeploymentRecord)>> {
        let dir = self.network_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => {
                return Err(error).wrap_err_with(|| format!("failed to list {}", dir.display()))
            }
        };

        let mut records = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() || path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            if path.file_name().map_or(false, |file| file == POINTERS_FILE) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if let Some(record) = read_json::<DeploymentRecord>(&path)? {
                records.push((name.to_string(), record));
            }
        }
        records.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(records)
    }

    fn load_pointers(&self) -> Result<Vec<PointerRecord>> {
        Ok(read_json(&self.pointers_path())?.unwrap_or_default())
    }

    fn save_pointers(&self, records: &[PointerRecord]) -> Result<()> {
        write_json(&self.pointers_path(), records)
    }

    fn update_manifest(&self, entry: &ManifestEntry) -> Result<()> {
        let path = self.manifest_path();
        let existing = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == ErrorKind::NotFound => String::new(),
            Err(error) => {
                return Err(error).wrap_err_with(|| format!("failed to read {}", path.display()))
            }
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, manifest::apply(&existing, entry))
            .wrap_err_with(|| format!("failed to write {}", path.display()))
    }
}
