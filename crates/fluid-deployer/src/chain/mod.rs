mod client;
mod ethers_chain;

use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use eyre::Result;
use serde_json::Value;

pub use client::{Chain, ChainClient};
pub use ethers_chain::EthersChain;

/// The outcome of a mined contract creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeployReceipt {
    /// The address the chain reports the contract was created at. For CREATE3
    /// deployments this is the address emitted by the factory.
    pub address: Address,
    pub tx_hash: H256,
    pub gas_used: U256,
    pub receipt: Option<Value>,
}

/// The pointers emitted by the SSTORE2 deployer, in emission order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PointerReceipt {
    pub pointers: Vec<Address>,
    pub tx_hash: H256,
}

/// A mined transaction sent by the deployer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentTransaction {
    pub tx_hash: H256,
    pub gas_used: U256,
}

/// The chain operations the deployment tooling depends on. Every call is a
/// suspension point and completes once the chain answered (or, for writes,
/// once the transaction has the configured number of confirmations).
#[async_trait]
pub trait DeployChain: Send + Sync {
    async fn chain_id(&self) -> Result<u64>;

    /// The runtime bytecode at `address`, empty if nothing is deployed there.
    async fn get_code(&self, address: Address) -> Result<Bytes>;

    /// Asks the CREATE3 factory where `salt` deploys to.
    async fn create3_address(&self, salt: H256) -> Result<Address>;

    async fn create3_deploy(&self, salt: H256, creation_code: Bytes) -> Result<DeployReceipt>;

    /// Deploys with a plain CREATE transaction from the deployer account.
    async fn create_deploy(&self, creation_code: Bytes) -> Result<DeployReceipt>;

    /// Stores `code` behind one SSTORE2 pointer.
    async fn deploy_code(&self, code: Bytes) -> Result<PointerReceipt>;

    /// Stores `code` split across two SSTORE2 pointers.
    async fn deploy_code_split(&self, code: Bytes) -> Result<PointerReceipt>;

    async fn send_transaction(&self, to: Address, data: Bytes) -> Result<SentTransaction>;
}

#[async_trait]
impl<T: DeployChain + ?Sized> DeployChain for Arc<T> {
    async fn chain_id(&self) -> Result<u64> {
        (**self).chain_id().await
    }

    async fn get_code(&self, address: Address) -> Result<Bytes> {
        (**self).get_code(address).await
    }

    async fn create3_address(&self, salt: H256) -> Result<Address> {
        (**self).create3_address(salt).await
    }

    async fn create3_deploy(&self, salt: H256, creation_code: Bytes) -> Result<DeployReceipt> {
        (**self).create3_deploy(salt, creation_code).await
    }

    async fn create_deploy(&self, creation_code: Bytes) -> Result<DeployReceipt> {
        (**self).create_deploy(creation_code).await
    }

    async fn deploy_code(&self, code: Bytes) -> Result<PointerReceipt> {
        (**self).deploy_code(code).await
    }

    async fn deploy_code_split(&self, code: Bytes) -> Result<PointerReceipt> {
        (**self).deploy_code_split(code).await
    }

    async fn send_transaction(&self, to: Address, data: Bytes) -> Result<SentTransaction> {
        (**self).send_transaction(to, data).await
    }
}
