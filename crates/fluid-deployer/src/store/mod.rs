mod file;

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use ethers::types::Address;
use eyre::Result;
use fluid_addresses::{DeploymentRecord, PointerRecord};
use tracing::warn;

pub use file::FileStore;

use crate::manifest::{self, ManifestEntry};

/// Persistence for one network's deployment records, SSTORE2 pointers, and the
/// shared version manifest. Implementations report failures and leave it to
/// the caller to decide whether they are fatal.
pub trait DeploymentStore: Send + Sync {
    /// The current record for `name`, if there is one.
    fn load(&self, name: &str) -> Result<Option<DeploymentRecord>>;

    /// Writes `record` as the current record for `name`, as the historical
    /// record for its address, and as the `version` snapshot of `name`.
    fn save(&self, name: &str, version: &str, record: &DeploymentRecord) -> Result<()>;

    /// The historical record of whatever was deployed at `address`.
    fn load_dump(&self, address: Address) -> Result<Option<DeploymentRecord>>;

    /// Every current record, ordered by name.
    fn list(&self) -> Result<Vec<(String, DeploymentRecord)>>;

    fn load_pointers(&self) -> Result<Vec<PointerRecord>>;

    /// Replaces the pointer registry with `records`.
    fn save_pointers(&self, records: &[PointerRecord]) -> Result<()>;

    fn update_manifest(&self, entry: &ManifestEntry) -> Result<()>;
}

impl<T: DeploymentStore + ?Sized> DeploymentStore for Arc<T> {
    fn load(&self, name: &str) -> Result<Option<DeploymentRecord>> {
        (**self).load(name)
    }

    fn save(&self, name: &str, version: &str, record: &DeploymentRecord) -> Result<()> {
        (**self).save(name, version, record)
    }

    fn load_dump(&self, address: Address) -> Result<Option<DeploymentRecord>> {
        (**self).load_dump(address)
    }

    fn list(&self) -> Result<Vec<(String, DeploymentRecord)>> {
        (**self).list()
    }

    fn load_pointers(&self) -> Result<Vec<PointerRecord>> {
        (**self).load_pointers()
    }

    fn save_pointers(&self, records: &[PointerRecord]) -> Result<()> {
        (**self).save_pointers(records)
    }

    fn update_manifest(&self, entry: &ManifestEntry) -> Result<()> {
        (**self).update_manifest(entry)
    }
}

/// Whether a snapshot may be replaced. Snapshots that carry a real
/// transaction hash are history and stay as they are.
pub(crate) fn snapshot_is_writable(existing: Option<&DeploymentRecord>, name: &str, version: &str) -> bool {
    match existing {
        Some(existing) if !existing.is_pending() => {
            warn!(
                contract = name,
                version,
                "snapshot already holds a mined deployment, leaving it untouched"
            );
            false
        }
        _ => true,
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    current: BTreeMap<String, DeploymentRecord>,
    dumps: HashMap<Address, DeploymentRecord>,
    snapshots: BTreeMap<(String, String), DeploymentRecord>,
    pointers: Vec<PointerRecord>,
    manifest: String,
}

/// A store that keeps everything in memory. Useful for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The `version` snapshot of `name`.
    pub fn snapshot(&self, version: &str, name: &str) -> Option<DeploymentRecord> {
        self.state()
            .snapshots
            .get(&(version.to_string(), name.to_string()))
            .cloned()
    }

    /// The rendered version manifest.
    pub fn manifest(&self) -> String {
        self.state().manifest.clone()
    }
}

impl DeploymentStore for MemoryStore {
    fn load(&self, name: &str) -> Result<Option<DeploymentRecord>> {
        Ok(self.state().current.get(name).cloned())
    }

    fn save(&self, name: &str, version: &str, record: &DeploymentRecord) -> Result<()> {
        let mut state = self.state();
        state.current.insert(name.to_string(), record.clone());
        state.dumps.insert(record.address, record.clone());
        let key = (version.to_string(), name.to_string());
        if snapshot_is_writable(state.snapshots.get(&key), name, version) {
            state.snapshots.insert(key, record.clone());
        }
        Ok(())
    }

    fn load_dump(&self, address: Address) -> Result<Option<DeploymentRecord>> {
        Ok(self.state().dumps.get(&address).cloned())
    }

    fn list(&self) -> Result<Vec<(String, DeploymentRecord)>> {
        Ok(self
            .state()
            .current
            .iter()
            .map(|(name, record)| (name.clone(), record.clone()))
            .collect())
    }

    fn load_pointers(&self) -> Result<Vec<PointerRecord>> {
        Ok(self.state().pointers.clone())
    }

    fn save_pointers(&self, records: &[PointerRecord]) -> Result<()> {
        self.state().pointers = records.to_vec();
        Ok(())
    }

    fn update_manifest(&self, entry: &ManifestEntry) -> Result<()> {
        let mut state = self.state();
        state.manifest = manifest::apply(&state.manifest, entry);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use ethers::types::{Bytes, H256};
    use fluid_addresses::TransactionHash;
    use serde_json::json;

    use super::*;

    pub(crate) fn record(byte: u8, tx_hash: TransactionHash) -> DeploymentRecord {
        DeploymentRecord {
            abi: json!([]),
            address: Address::repeat_byte(byte),
            args: vec![json!(format!("{:#x}", Address::repeat_byte(byte)))],
            bytecode: Bytes::from(vec![0xaa]),
            deployed_bytecode: Bytes::from(vec![0xaa, byte]),
            transaction_hash: tx_hash,
            receipt: None,
            linked_data: None,
            libraries: Default::default(),
            created_for_version: Some("v1_0_0".to_string()),
        }
    }

    #[test]
    fn test_memory_store_save_and_load() -> Result<()> {
        let store = MemoryStore::new();
        let first = record(0x11, TransactionHash::Mined(H256::repeat_byte(1)));
        let second = record(0x22, TransactionHash::Mined(H256::repeat_byte(2)));
        store.save("Widget", "v1_0_0", &first)?;
        store.save("Widget", "v1_1_0", &second)?;

        assert_eq!(store.load("Widget")?, Some(second.clone()));
        assert_eq!(store.load("Gadget")?, None);
        assert_eq!(store.load_dump(first.address)?, Some(first.clone()));
        assert_eq!(store.load_dump(second.address)?, Some(second.clone()));
        assert_eq!(store.snapshot("v1_0_0", "Widget"), Some(first));
        assert_eq!(store.list()?, vec![("Widget".to_string(), second)]);
        Ok(())
    }

    #[test]
    fn test_mined_snapshot_is_immutable() -> Result<()> {
        let store = MemoryStore::new();
        let pending = record(0x11, TransactionHash::Pending);
        let mined = record(0x22, TransactionHash::Mined(H256::repeat_byte(2)));
        let later = record(0x33, TransactionHash::Mined(H256::repeat_byte(3)));

        store.save("Widget", "v1_0_0", &pending)?;
        store.save("Widget", "v1_0_0", &mined)?;
        assert_eq!(store.snapshot("v1_0_0", "Widget"), Some(mined.clone()));

        store.save("Widget", "v1_0_0", &later)?;
        assert_eq!(store.snapshot("v1_0_0", "Widget"), Some(mined));
        assert_eq!(store.load("Widget")?, Some(later));
        Ok(())
    }
}
