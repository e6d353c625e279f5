/// This module provides `MockChain`, an in-memory chain for tests and dry
/// runs. It computes CREATE3 and SSTORE2 addresses the way the real helper
/// contracts do and can be told to fail in the ways live networks fail.
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use ethers::{
    signers::Signer,
    types::{Address, Bytes, H256, U256},
    utils::get_contract_address,
};
use eyre::{eyre, Result};
use serde_json::json;

use crate::{
    address_book::AddressBook,
    artifact::Artifact,
    chain::{DeployChain, DeployReceipt, PointerReceipt, SentTransaction},
    config::Network,
    constants::{DEFAULT_VERSION, DEPLOYER},
    create3::create3_address,
    deployer::Deployer,
    errors::DeployError,
    queue::TransactionQueue,
    store::MemoryStore,
};

pub const MOCK_CHAIN_ID: u64 = 31337;
pub const MOCK_GLOBAL_SALT: &str = "fluid";

pub type MockDeployer = Deployer<Arc<MockChain>, Arc<MemoryStore>>;

/// A deployer for `network` backed by a fresh mock chain and memory store.
/// The chain and store are returned too so tests can look behind the
/// deployer's back.
pub fn mock_deployer(
    network: &str,
    batches_dir: impl Into<PathBuf>,
) -> (Arc<MockChain>, Arc<MemoryStore>, MockDeployer) {
    let chain = Arc::new(MockChain::new());
    let store = Arc::new(MemoryStore::new());
    let network = Network::new(network);
    let deployer = Deployer::new(
        chain.clone(),
        AddressBook::new(store.clone(), network.clone(), DEFAULT_VERSION),
        TransactionQueue::new(network, batches_dir),
        MOCK_GLOBAL_SALT,
        chain.factory(),
    );
    (chain, store, deployer)
}

/// A tiny contract with an `address owner` constructor argument.
pub fn widget_artifact() -> Artifact {
    Artifact::new(
        "Widget",
        json!([{
            "type": "constructor",
            "stateMutability": "nonpayable",
            "inputs": [{"name": "owner_", "type": "address", "internalType": "address"}]
        }]),
        Bytes::from(vec![0xaa]),
    )
}

/// A transaction the mock chain mined.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MockTransaction {
    pub to: Option<Address>,
    pub data: Bytes,
    pub tx_hash: H256,
}

#[derive(Debug, Default)]
struct MockState {
    code: HashMap<Address, Bytes>,
    sender_nonce: u64,
    helper_nonce: u64,
    transactions: Vec<MockTransaction>,
    attempts: u64,
    revert_at: Option<u64>,
    fee_failures: usize,
    wrong_address: bool,
}

#[derive(Debug)]
pub struct MockChain {
    factory: Address,
    sstore2_deployer: Address,
    sender: Address,
    state: Mutex<MockState>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            factory: Address::repeat_byte(0xfa),
            sstore2_deployer: Address::repeat_byte(0x52),
            sender: DEPLOYER.address(),
            state: Mutex::new(MockState {
                // Contract accounts start at nonce 1.
                helper_nonce: 1,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn factory(&self) -> Address {
        self.factory
    }

    pub fn sstore2_deployer(&self) -> Address {
        self.sstore2_deployer
    }

    /// The account that sends every transaction.
    pub fn sender(&self) -> Address {
        self.sender
    }

    /// Makes the `n`th transaction from now revert.
    pub fn revert_on(&self, n: u64) {
        let mut state = self.state();
        state.revert_at = Some(state.attempts + n);
    }

    /// Makes the next `n` transactions fail with a fee-too-low error before
    /// they are sent.
    pub fn fail_with_fee_too_low(&self, n: usize) {
        self.state().fee_failures = n;
    }

    /// Makes the CREATE3 factory emit an address other than the one it
    /// reports from `getDeployed`.
    pub fn emit_wrong_address(&self, enabled: bool) {
        self.state().wrong_address = enabled;
    }

    /// Puts code at `address` without a transaction.
    pub fn set_code(&self, address: Address, code: Bytes) {
        self.state().code.insert(address, code);
    }

    pub fn code(&self, address: Address) -> Bytes {
        self.state().code.get(&address).cloned().unwrap_or_default()
    }

    /// Reads an SSTORE2 pointer back, dropping the leading STOP byte.
    pub fn read_pointer(&self, pointer: Address) -> Bytes {
        let code = self.code(pointer);
        code.get(1..).map(|data| data.to_vec()).unwrap_or_default().into()
    }

    /// Every mined transaction, in order.
    pub fn transactions(&self) -> Vec<MockTransaction> {
        self.state().transactions.clone()
    }

    /// Runs the failure injections for a transaction about to be sent and
    /// returns its hash.
    fn begin(state: &mut MockState, step: &str) -> Result<H256> {
        if state.fee_failures > 0 {
            state.fee_failures -= 1;
            return Err(eyre!(
                "{}: max fee per gas less than block base fee",
                step
            ));
        }
        state.attempts += 1;
        let tx_hash = H256::from_low_u64_be(state.attempts);
        if state.revert_at == Some(state.attempts) {
            state.revert_at = None;
            return Err(DeployError::TransactionReverted {
                step: step.to_string(),
                tx_hash,
            }
            .into());
        }
        Ok(tx_hash)
    }

    fn mine(state: &mut MockState, to: Option<Address>, data: Bytes, tx_hash: H256) {
        state.sender_nonce += 1;
        state.transactions.push(MockTransaction { to, data, tx_hash });
    }

    fn gas(data: &Bytes, base: u64) -> U256 {
        U256::from(base + 16 * data.len() as u64)
    }

    fn store_pointer(state: &mut MockState, helper: Address, data: &[u8]) -> Address {
        let pointer = get_contract_address(helper, state.helper_nonce);
        state.helper_nonce += 1;
        let mut code = vec![0x00];
        code.extend_from_slice(data);
        state.code.insert(pointer, code.into());
        pointer
    }
}

#[async_trait]
impl DeployChain for MockChain {
    async fn chain_id(&self) -> Result<u64> {
        Ok(MOCK_CHAIN_ID)
    }

    async fn get_code(&self, address: Address) -> Result<Bytes> {
        Ok(self.code(address))
    }

    async fn create3_address(&self, salt: H256) -> Result<Address> {
        Ok(create3_address(self.factory, salt))
    }

    async fn create3_deploy(&self, salt: H256, creation_code: Bytes) -> Result<DeployReceipt> {
        let mut state = self.state();
        let tx_hash = Self::begin(&mut state, "create3 deploy")?;
        let address = create3_address(self.factory, salt);
        if state.code.get(&address).map_or(false, |code| !code.is_empty()) {
            return Err(DeployError::TransactionReverted {
                step: "create3 deploy".to_string(),
                tx_hash,
            }
            .into());
        }
        state.code.insert(address, creation_code.clone());
        let gas_used = Self::gas(&creation_code, 53_000);
        Self::mine(&mut state, Some(self.factory), creation_code, tx_hash);

        let emitted = if state.wrong_address {
            Address::repeat_byte(0xee)
        } else {
            address
        };
        Ok(DeployReceipt {
            address: emitted,
            tx_hash,
            gas_used,
            receipt: None,
        })
    }

    async fn create_deploy(&self, creation_code: Bytes) -> Result<DeployReceipt> {
        let mut state = self.state();
        let tx_hash = Self::begin(&mut state, "create deploy")?;
        let address = get_contract_address(self.sender, state.sender_nonce);
        state.code.insert(address, creation_code.clone());
        let gas_used = Self::gas(&creation_code, 53_000);
        Self::mine(&mut state, None, creation_code, tx_hash);
        Ok(DeployReceipt {
            address,
            tx_hash,
            gas_used,
            receipt: None,
        })
    }

    async fn deploy_code(&self, code: Bytes) -> Result<PointerReceipt> {
        let mut state = self.state();
        let tx_hash = Self::begin(&mut state, "sstore2 deployCode")?;
        let pointer = Self::store_pointer(&mut state, self.sstore2_deployer, &code);
        Self::mine(&mut state, Some(self.sstore2_deployer), code, tx_hash);
        Ok(PointerReceipt {
            pointers: vec![pointer],
            tx_hash,
        })
    }

    async fn deploy_code_split(&self, code: Bytes) -> Result<PointerReceipt> {
        let mut state = self.state();
        let tx_hash = Self::begin(&mut state, "sstore2 deployCodeSplit")?;
        let (first, second) = code.split_at((code.len() + 1) / 2);
        let pointer = Self::store_pointer(&mut state, self.sstore2_deployer, first);
        let second_pointer = Self::store_pointer(&mut state, self.sstore2_deployer, second);
        Self::mine(&mut state, Some(self.sstore2_deployer), code.clone(), tx_hash);
        Ok(PointerReceipt {
            pointers: vec![pointer, second_pointer],
            tx_hash,
        })
    }

    async fn send_transaction(&self, to: Address, data: Bytes) -> Result<SentTransaction> {
        let mut state = self.state();
        let tx_hash = Self::begin(&mut state, "send transaction")?;
        let gas_used = Self::gas(&data, 21_000);
        Self::mine(&mut state, Some(to), data, tx_hash);
        Ok(SentTransaction { tx_hash, gas_used })
    }
}
