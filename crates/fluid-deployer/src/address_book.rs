/// This module contains the `AddressBook`, the run's view of the deployments
/// on one network. Reads go through an in-memory cache that is authoritative
/// for the rest of the run, so a failed write only costs the on-disk copy.
use std::collections::HashMap;

use ethers::types::{Address, H256};
use eyre::Result;
use fluid_addresses::{DeploymentRecord, PointerRecord, TransactionHash};
use tracing::{debug, info, warn};

use crate::{
    config::Network,
    errors::DeployError,
    manifest::ManifestEntry,
    store::DeploymentStore,
};

pub struct AddressBook<S: DeploymentStore> {
    store: S,
    network: Network,
    version: String,
    current: HashMap<String, DeploymentRecord>,
    dumps: HashMap<Address, DeploymentRecord>,
    pointers: Option<Vec<PointerRecord>>,
}

impl<S: DeploymentStore> AddressBook<S> {
    pub fn new(store: S, network: Network, version: &str) -> Self {
        Self {
            store,
            network,
            version: version.to_string(),
            current: HashMap::new(),
            dumps: HashMap::new(),
            pointers: None,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// The current record for `name`, failing with `NotFound` if there is
    /// none.
    pub fn get(&mut self, name: &str) -> Result<DeploymentRecord> {
        self.get_or_null(name).ok_or_else(|| {
            DeployError::NotFound {
                name: name.to_string(),
                network: self.network.name.clone(),
            }
            .into()
        })
    }

    pub fn get_or_null(&mut self, name: &str) -> Option<DeploymentRecord> {
        if let Some(record) = self.current.get(name) {
            return Some(record.clone());
        }
        match self.store.load(name) {
            Ok(Some(record)) => {
                self.current.insert(name.to_string(), record.clone());
                Some(record)
            }
            Ok(None) => None,
            Err(error) => {
                warn!(contract = name, network = %self.network.name, "failed to read deployment: {:#}", error);
                None
            }
        }
    }

    /// The historical record of the deployment at `address`.
    pub fn load_dump(&mut self, address: Address) -> Option<DeploymentRecord> {
        if let Some(record) = self.dumps.get(&address) {
            return Some(record.clone());
        }
        match self.store.load_dump(address) {
            Ok(Some(record)) => {
                self.dumps.insert(address, record.clone());
                Some(record)
            }
            Ok(None) => None,
            Err(error) => {
                warn!(address = ?address, network = %self.network.name, "failed to read deployment dump: {:#}", error);
                None
            }
        }
    }

    /// Every known record of a deployment at `address`: the historical record
    /// first, followed by current records that point at it.
    pub fn get_deployments_from_address(&mut self, address: Address) -> Vec<DeploymentRecord> {
        let mut records = self.load_dump(address).into_iter().collect::<Vec<_>>();
        let current = match self.store.list() {
            Ok(current) => current,
            Err(error) => {
                warn!(network = %self.network.name, "failed to list deployments: {:#}", error);
                Vec::new()
            }
        };
        for (name, record) in current {
            let record = self.current.get(&name).cloned().unwrap_or(record);
            if record.address == address && !records.contains(&record) {
                records.push(record);
            }
        }
        for record in self.current.values() {
            if record.address == address && !records.contains(record) {
                records.push(record.clone());
            }
        }
        records
    }

    /// Makes `record` the current record for `name` and writes it through to
    /// the store along with its manifest row.
    pub fn save(&mut self, name: &str, mut record: DeploymentRecord) {
        if record.created_for_version.is_none() {
            record.created_for_version = Some(self.version.clone());
        }
        let version = record
            .created_for_version
            .clone()
            .unwrap_or_else(|| self.version.clone());
        info!(
            contract = name,
            network = %self.network.name,
            address = ?record.address,
            tx_hash = %record.transaction_hash,
            "saving deployment"
        );

        self.current.insert(name.to_string(), record.clone());
        self.dumps.insert(record.address, record.clone());

        if let Err(error) = self.store.save(name, &version, &record) {
            warn!(contract = name, network = %self.network.name, "failed to write deployment: {:#}", error);
        }
        let entry = ManifestEntry {
            contract: name.to_string(),
            network: self.network.name.clone(),
            address: record.address,
            explorer_link: self.network.address_url(record.address),
            args: record.args.clone(),
            salt: record.salt(),
        };
        if let Err(error) = self.store.update_manifest(&entry) {
            warn!(contract = name, network = %self.network.name, "failed to update the manifest: {:#}", error);
        }
    }

    /// Saves a record for a deployment that was queued for the multisig. Its
    /// transaction hash stays pending until it is filled in by hand.
    pub fn record_pending(&mut self, name: &str, mut record: DeploymentRecord) {
        record.transaction_hash = TransactionHash::Pending;
        record.receipt = None;
        self.save(name, record);
    }

    fn pointers(&mut self) -> &mut Vec<PointerRecord> {
        let store = &self.store;
        let network = &self.network.name;
        self.pointers.get_or_insert_with(|| match store.load_pointers() {
            Ok(pointers) => pointers,
            Err(error) => {
                warn!(network = %network, "failed to read the SSTORE2 pointer registry: {:#}", error);
                Vec::new()
            }
        })
    }

    /// The registered pointer(s) of the bytecode with hash `bytecode_hash`.
    pub fn pointer(&mut self, bytecode_hash: H256) -> Option<PointerRecord> {
        self.pointers()
            .iter()
            .find(|record| record.bytecode_hash == bytecode_hash)
            .cloned()
    }

    /// Appends `record` to the pointer registry. Registering a hash twice is
    /// a no-op.
    pub fn register_pointer(&mut self, record: PointerRecord) {
        let pointers = self.pointers();
        if pointers
            .iter()
            .any(|existing| existing.bytecode_hash == record.bytecode_hash)
        {
            debug!(bytecode_hash = ?record.bytecode_hash, "pointer already registered");
            return;
        }
        pointers.push(record);
        let snapshot = pointers.clone();
        if let Err(error) = self.store.save_pointers(&snapshot) {
            warn!(network = %self.network.name, "failed to write the SSTORE2 pointer registry: {:#}", error);
        }
    }
}
