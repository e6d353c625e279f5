/// This module contains the deployment flows on the `Deployer`: deterministic
/// CREATE3 deployments that are idempotent across runs and plain CREATE
/// deployments for contracts that don't need a fixed address.
use std::{
    collections::BTreeMap,
    time::{SystemTime, UNIX_EPOCH},
};

use ethers::{
    abi::{self, ParamType, Token},
    types::{Address, Bytes, H256},
    utils::{get_contract_address, get_create2_address_from_hash, keccak256},
};
use eyre::{Result, WrapErr};
use fluid_addresses::{DeploymentRecord, TransactionHash};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::{
    abi::{creation_code, encode_constructor_args},
    artifact::Artifact,
    chain::DeployChain,
    constants::MAX_RECONCILE_ATTEMPTS,
    deployer::{CreatedDeployment, Deployer},
    errors::DeployError,
    queue::QueuedTransaction,
    retry::retry_on_fee_too_low,
    store::DeploymentStore,
};

/// The init code of the proxy the CREATE3 factory deploys with CREATE2. The
/// proxy CREATEs whatever code it is called with.
const PROXY_BYTECODE: [u8; 16] = [
    0x67, 0x36, 0x3d, 0x3d, 0x37, 0x36, 0x3d, 0x34, 0xf0, 0x3d, 0x52, 0x60, 0x08, 0x60, 0x18,
    0xf3,
];

/// The address a CREATE3 factory at `factory` deploys `salt` to. It only
/// depends on the factory and the salt, never on the deployed code.
pub fn create3_address(factory: Address, salt: H256) -> Address {
    let proxy = get_create2_address_from_hash(factory, salt, keccak256(PROXY_BYTECODE));
    get_contract_address(proxy, 1u64)
}

/// `keccak256(bytecode ++ version ++ global_salt ++ disambiguator)`. The
/// disambiguator is empty unless earlier salts conflicted.
pub fn compute_salt(
    bytecode: &[u8],
    version: &str,
    global_salt: &str,
    disambiguator: &str,
) -> H256 {
    let mut preimage = bytecode.to_vec();
    preimage.extend_from_slice(version.as_bytes());
    preimage.extend_from_slice(global_salt.as_bytes());
    preimage.extend_from_slice(disambiguator.as_bytes());
    H256::from(keccak256(preimage))
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
}

/// Millisecond timestamps that strictly increase even when the clock
/// doesn't.
#[derive(Debug)]
pub(crate) struct Disambiguator {
    last: u128,
    clock: fn() -> u128,
}

impl Default for Disambiguator {
    fn default() -> Self {
        Self {
            last: 0,
            clock: unix_millis,
        }
    }
}

impl Disambiguator {
    /// A clock stuck at zero, so the disambiguators are 1, 2, 3 and so on.
    #[cfg(test)]
    pub(crate) fn frozen() -> Self {
        Self {
            last: 0,
            clock: || 0,
        }
    }

    fn next(&mut self) -> String {
        self.last = (self.clock)().max(self.last + 1);
        self.last.to_string()
    }
}

/// A contract to deploy.
#[derive(Clone, Debug)]
pub struct DeployRequest {
    pub name: String,
    pub artifact: Artifact,
    pub args: Vec<Value>,
    pub libraries: BTreeMap<String, Address>,
}

impl DeployRequest {
    pub fn new(name: &str, artifact: Artifact, args: Vec<Value>) -> Self {
        Self {
            name: name.to_string(),
            artifact,
            args,
            libraries: BTreeMap::new(),
        }
    }

    pub fn with_libraries(mut self, libraries: BTreeMap<String, Address>) -> Self {
        self.libraries = libraries;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeployResult {
    pub address: Address,
    /// The salt of deterministic deployments.
    pub salt: Option<H256>,
    pub newly_deployed: bool,
    pub record: DeploymentRecord,
}

/// Where a deterministic deployment should end up.
enum Resolution {
    Deploy { salt: H256, address: Address },
    Existing(DeployResult),
}

/// The request's encoded constructor arguments and full creation code.
struct Prepared {
    encoded_args: Bytes,
    creation_code: Bytes,
}

impl<C: DeployChain, S: DeploymentStore> Deployer<C, S> {
    fn prepare(&self, request: &DeployRequest) -> Result<Prepared> {
        let abi = request.artifact.parsed_abi()?;
        let encoded_args = encode_constructor_args(&request.name, &abi, &request.args)?;
        let creation_code = creation_code(&request.artifact.bytecode, &encoded_args);
        Ok(Prepared {
            encoded_args,
            creation_code,
        })
    }

    /// Whether `record` describes a deployment of exactly this request.
    fn matches(&self, record: &DeploymentRecord, request: &DeployRequest, prepared: &Prepared) -> bool {
        let Ok(abi) = request.artifact.parsed_abi() else {
            return false;
        };
        let recorded = encode_constructor_args(&request.name, &abi, &record.args);
        recorded.as_ref().ok() == Some(&prepared.encoded_args)
            && record.deployed_bytecode == prepared.creation_code
    }

    fn new_record(
        &self,
        request: &DeployRequest,
        address: Address,
        prepared: &Prepared,
        transaction_hash: TransactionHash,
        receipt: Option<Value>,
        salt: Option<H256>,
        version: &str,
    ) -> DeploymentRecord {
        DeploymentRecord {
            abi: request.artifact.abi.clone(),
            address,
            args: request.args.clone(),
            bytecode: request.artifact.bytecode.clone(),
            deployed_bytecode: prepared.creation_code.clone(),
            transaction_hash,
            receipt,
            linked_data: salt.map(|salt| json!({ "salt": format!("{:#x}", salt) })),
            libraries: request.libraries.clone(),
            created_for_version: Some(version.to_string()),
        }
    }

    /// Returns the current record for `name` if it is a live or queued
    /// deployment of this exact request.
    async fn current_match(
        &mut self,
        request: &DeployRequest,
        prepared: &Prepared,
    ) -> Result<Option<DeploymentRecord>> {
        let Some(current) = self.book.get_or_null(&request.name) else {
            return Ok(None);
        };
        if !self.matches(&current, request, prepared) {
            return Ok(None);
        }
        if current.is_pending() {
            return Ok(Some(current));
        }
        let code = self.chain.get_code(current.address).await?;
        Ok((!code.is_empty()).then_some(current))
    }

    /// Walks salts until one is either free or already holds this exact
    /// deployment. A deployment queued for the multisig holds its salt even
    /// though nothing is on chain yet.
    async fn resolve(
        &mut self,
        request: &DeployRequest,
        prepared: &Prepared,
        version: &str,
    ) -> Result<Resolution> {
        let network = self.network().name.clone();
        let mut disambiguator = String::new();

        for attempt in 1..=MAX_RECONCILE_ATTEMPTS {
            let salt = compute_salt(
                &request.artifact.bytecode,
                version,
                &self.global_salt,
                &disambiguator,
            );
            let address = self
                .chain
                .create3_address(salt)
                .await
                .wrap_err_with(|| format!("{}: failed to precompute the address on {}", request.name, network))?;
            let code = self.chain.get_code(address).await?;
            let recorded = if code.is_empty() {
                match self.book.load_dump(address).filter(DeploymentRecord::is_pending) {
                    Some(queued) => queued,
                    None => return Ok(Resolution::Deploy { salt, address }),
                }
            } else {
                self.book.load_dump(address).ok_or_else(|| DeployError::UntrackedDeployment {
                    contract: request.name.clone(),
                    network: network.clone(),
                    address,
                })?
            };
            if self.matches(&recorded, request, prepared) {
                info!(
                    contract = %request.name,
                    network = %network,
                    address = ?address,
                    pending = recorded.is_pending(),
                    "already deployed, skipped"
                );
                return Ok(Resolution::Existing(DeployResult {
                    address,
                    salt: Some(salt),
                    newly_deployed: false,
                    record: recorded,
                }));
            }

            // The contract was redeployed under a fresh salt on an earlier
            // run, so that deployment is the one to reuse.
            if let Some(current) = self.current_match(request, prepared).await? {
                info!(
                    contract = %request.name,
                    network = %network,
                    address = ?current.address,
                    pending = current.is_pending(),
                    "already deployed, skipped"
                );
                return Ok(Resolution::Existing(DeployResult {
                    address: current.address,
                    salt: current.salt(),
                    newly_deployed: false,
                    record: current,
                }));
            }

            warn!(
                contract = %request.name,
                network = %network,
                address = ?address,
                attempt,
                "constructor arguments differ from the recorded deployment, deriving a new salt"
            );
            disambiguator = self.disambiguator.next();
        }

        Err(DeployError::ReconcileExhausted {
            contract: request.name.clone(),
            network,
            attempts: MAX_RECONCILE_ATTEMPTS,
        }
        .into())
    }

    fn adopt(&mut self, request: &DeployRequest, result: &DeployResult) {
        let current = self.book.get_or_null(&request.name);
        if current.map(|record| record.address) != Some(result.address) {
            self.book.save(&request.name, result.record.clone());
        }
    }

    /// Deploys `request` through the CREATE3 factory unless the exact same
    /// deployment already exists. Changed constructor arguments never touch
    /// an earlier deployment, they produce a new address instead.
    pub async fn deploy_deterministic(&mut self, request: &DeployRequest) -> Result<DeployResult> {
        let version = self.version().to_string();
        self.deploy_deterministic_for(&version, request).await
    }

    /// `deploy_deterministic` for the protocol version `version` rather than
    /// the run's default. The version goes into the salt and the record.
    pub async fn deploy_deterministic_for(
        &mut self,
        version: &str,
        request: &DeployRequest,
    ) -> Result<DeployResult> {
        let prepared = self.prepare(request)?;
        let (salt, address) = match self.resolve(request, &prepared, version).await? {
            Resolution::Existing(result) => {
                self.adopt(request, &result);
                return Ok(result);
            }
            Resolution::Deploy { salt, address } => (salt, address),
        };

        let network = self.network().name.clone();
        info!(
            contract = %request.name,
            network = %network,
            address = ?address,
            salt = ?salt,
            "deploying with CREATE3"
        );
        let receipt = self
            .chain
            .create3_deploy(salt, prepared.creation_code.clone())
            .await
            .wrap_err_with(|| format!("{}: CREATE3 deployment on {} failed", request.name, network))?;
        if receipt.address != address {
            return Err(DeployError::AddressMismatch {
                contract: request.name.clone(),
                expected: address,
                actual: receipt.address,
            }
            .into());
        }

        let record = self.new_record(
            request,
            address,
            &prepared,
            receipt.tx_hash.into(),
            receipt.receipt,
            Some(salt),
            version,
        );
        self.book.save(&request.name, record.clone());
        self.created.push(CreatedDeployment {
            name: request.name.clone(),
            fully_qualified_name: request.artifact.fully_qualified_name(),
            record: record.clone(),
        });
        info!(
            contract = %request.name,
            network = %network,
            address = ?address,
            tx_hash = ?receipt.tx_hash,
            gas_used = %receipt.gas_used,
            "deployed"
        );

        Ok(DeployResult {
            address,
            salt: Some(salt),
            newly_deployed: true,
            record,
        })
    }

    /// Like `deploy_deterministic`, but the factory call is queued instead of
    /// sent. The record is saved with a pending transaction hash.
    pub async fn queue_deterministic(&mut self, request: &DeployRequest) -> Result<DeployResult> {
        let version = self.version().to_string();
        self.queue_deterministic_for(&version, request).await
    }

    pub async fn queue_deterministic_for(
        &mut self,
        version: &str,
        request: &DeployRequest,
    ) -> Result<DeployResult> {
        let prepared = self.prepare(request)?;
        let (salt, address) = match self.resolve(request, &prepared, version).await? {
            Resolution::Existing(result) => {
                self.adopt(request, &result);
                return Ok(result);
            }
            Resolution::Deploy { salt, address } => (salt, address),
        };

        let mut calldata = abi::short_signature("deploy", &[ParamType::FixedBytes(32), ParamType::Bytes]).to_vec();
        calldata.extend(abi::encode(&[
            Token::FixedBytes(salt.as_bytes().to_vec()),
            Token::Bytes(prepared.creation_code.to_vec()),
        ]));
        let mut method_params = Map::new();
        method_params.insert("salt".to_string(), json!(format!("{:#x}", salt)));
        method_params.insert("creationCode".to_string(), json!(prepared.creation_code));
        self.queue.queue(QueuedTransaction {
            target: self.create3_factory,
            calldata: calldata.into(),
            abi: json!([{
                "type": "function",
                "name": "deploy",
                "stateMutability": "payable",
                "inputs": [
                    {"name": "salt", "type": "bytes32"},
                    {"name": "creationCode", "type": "bytes"}
                ],
                "outputs": [{"name": "deployed", "type": "address"}]
            }]),
            contract_address_for_abi: self.create3_factory,
            method: "deploy(bytes32,bytes)".to_string(),
            method_params,
        })?;

        let record = self.new_record(
            request,
            address,
            &prepared,
            TransactionHash::Pending,
            None,
            Some(salt),
            version,
        );
        self.book.record_pending(&request.name, record.clone());
        info!(
            contract = %request.name,
            network = %self.network().name,
            address = ?address,
            "queued CREATE3 deployment"
        );

        Ok(DeployResult {
            address,
            salt: Some(salt),
            newly_deployed: true,
            record,
        })
    }

    /// Deploys `request` with a plain CREATE transaction. Fee-too-low
    /// failures are retried on a fixed interval.
    pub async fn deploy_plain(&mut self, request: &DeployRequest) -> Result<DeployResult> {
        let version = self.version().to_string();
        self.deploy_plain_for(&version, request).await
    }

    pub async fn deploy_plain_for(
        &mut self,
        version: &str,
        request: &DeployRequest,
    ) -> Result<DeployResult> {
        let prepared = self.prepare(request)?;
        let network = self.network().name.clone();
        info!(contract = %request.name, network = %network, "deploying with CREATE");

        let chain = &self.chain;
        let creation_code = &prepared.creation_code;
        let receipt = retry_on_fee_too_low("create deploy", self.fee_policy, move || {
            chain.create_deploy(creation_code.clone())
        })
        .await
        .wrap_err_with(|| format!("{}: CREATE deployment on {} failed", request.name, network))?;

        let record = self.new_record(
            request,
            receipt.address,
            &prepared,
            receipt.tx_hash.into(),
            receipt.receipt,
            None,
            version,
        );
        self.book.save(&request.name, record.clone());
        self.created.push(CreatedDeployment {
            name: request.name.clone(),
            fully_qualified_name: request.artifact.fully_qualified_name(),
            record: record.clone(),
        });
        info!(
            contract = %request.name,
            network = %network,
            address = ?receipt.address,
            "deployed"
        );

        Ok(DeployResult {
            address: receipt.address,
            salt: None,
            newly_deployed: true,
            record,
        })
    }
}
