/// This module implements `DeployChain` on top of an ethers middleware stack
/// and the generated helper contract wrappers.
use std::sync::Arc;

use async_trait::async_trait;
use ethers::{
    contract::parse_log,
    prelude::EthLogDecode,
    providers::{Middleware, PendingTransaction},
    types::{Address, Bytes, Eip1559TransactionRequest, TransactionReceipt, H256, U64},
};
use eyre::{eyre, Result};
use fluid_wrappers::{
    create3_factory::{Create3Factory, LogContractDeployedFilter},
    sstore2_deployer::{Sstore2Deployer, Sstore2DeployerEvents},
};
use tracing::debug;

use super::{DeployChain, DeployReceipt, PointerReceipt, SentTransaction};
use crate::errors::DeployError;

pub struct EthersChain<M: Middleware> {
    client: Arc<M>,
    factory: Create3Factory<M>,
    sstore2_deployer: Option<Sstore2Deployer<M>>,
    confirmations: usize,
}

impl<M: Middleware + 'static> EthersChain<M> {
    pub fn new(
        client: Arc<M>,
        create3_factory: Address,
        sstore2_deployer: Option<Address>,
        confirmations: usize,
    ) -> Self {
        Self {
            factory: Create3Factory::new(create3_factory, client.clone()),
            sstore2_deployer: sstore2_deployer
                .map(|address| Sstore2Deployer::new(address, client.clone())),
            client,
            confirmations,
        }
    }

    fn sstore2_deployer(&self) -> Result<&Sstore2Deployer<M>> {
        self.sstore2_deployer.as_ref().ok_or_else(|| {
            DeployError::ZeroAddress {
                what: "FLUID_SSTORE2_DEPLOYER".to_string(),
            }
            .into()
        })
    }

    /// Waits for the configured number of confirmations and fails on reverts.
    async fn confirm(
        &self,
        step: &str,
        pending: PendingTransaction<'_, M::Provider>,
    ) -> Result<TransactionReceipt> {
        let tx_hash = pending.tx_hash();
        debug!(step, tx_hash = ?tx_hash, "waiting for confirmations");
        let receipt = pending
            .confirmations(self.confirmations)
            .await?
            .ok_or_else(|| eyre!("{}: transaction {:#x} was dropped", step, tx_hash))?;
        if receipt.status == Some(U64::zero()) {
            return Err(DeployError::TransactionReverted {
                step: step.to_string(),
                tx_hash,
            }
            .into());
        }
        Ok(receipt)
    }

    fn pointers(&self, step: &str, receipt: TransactionReceipt) -> Result<PointerReceipt> {
        let tx_hash = receipt.transaction_hash;
        let pointers = receipt
            .logs
            .into_iter()
            .find_map(|log| match Sstore2DeployerEvents::decode_log(&log.into()) {
                Ok(Sstore2DeployerEvents::LogCodeDeployedFilter(event)) => {
                    Some(vec![event.pointer])
                }
                Ok(Sstore2DeployerEvents::LogCodeSplitDeployedFilter(event)) => {
                    Some(vec![event.pointer, event.second_pointer])
                }
                Err(_) => None,
            })
            .ok_or_else(|| DeployError::MissingEvent {
                step: step.to_string(),
                tx_hash,
            })?;
        Ok(PointerReceipt { pointers, tx_hash })
    }
}

#[async_trait]
impl<M: Middleware + 'static> DeployChain for EthersChain<M> {
    async fn chain_id(&self) -> Result<u64> {
        Ok(self.client.get_chainid().await?.as_u64())
    }

    async fn get_code(&self, address: Address) -> Result<Bytes> {
        Ok(self.client.get_code(address, None).await?)
    }

    async fn create3_address(&self, salt: H256) -> Result<Address> {
        Ok(self
            .factory
            .get_deployed(salt.to_fixed_bytes())
            .call()
            .await?)
    }

    async fn create3_deploy(&self, salt: H256, creation_code: Bytes) -> Result<DeployReceipt> {
        let call = self
            .factory
            .deploy_create3(salt.to_fixed_bytes(), creation_code);
        let pending = call.send().await?;
        let receipt = self.confirm("create3 deploy", pending).await?;
        let tx_hash = receipt.transaction_hash;
        let event = receipt
            .logs
            .iter()
            .find_map(|log| parse_log::<LogContractDeployedFilter>(log.clone()).ok())
            .ok_or_else(|| DeployError::MissingEvent {
                step: "create3 deploy".to_string(),
                tx_hash,
            })?;
        Ok(DeployReceipt {
            address: event.deployed,
            tx_hash,
            gas_used: receipt.gas_used.unwrap_or_default(),
            receipt: serde_json::to_value(&receipt).ok(),
        })
    }

    async fn create_deploy(&self, creation_code: Bytes) -> Result<DeployReceipt> {
        let tx = Eip1559TransactionRequest::new().data(creation_code);
        let pending = self.client.send_transaction(tx, None).await?;
        let receipt = self.confirm("create deploy", pending).await?;
        let address = receipt.contract_address.ok_or_else(|| {
            eyre!(
                "create deploy: receipt of {:#x} has no contract address",
                receipt.transaction_hash
            )
        })?;
        Ok(DeployReceipt {
            address,
            tx_hash: receipt.transaction_hash,
            gas_used: receipt.gas_used.unwrap_or_default(),
            receipt: serde_json::to_value(&receipt).ok(),
        })
    }

    async fn deploy_code(&self, code: Bytes) -> Result<PointerReceipt> {
        let call = self.sstore2_deployer()?.deploy_code(code);
        let pending = call.send().await?;
        let receipt = self.confirm("sstore2 deployCode", pending).await?;
        self.pointers("sstore2 deployCode", receipt)
    }

    async fn deploy_code_split(&self, code: Bytes) -> Result<PointerReceipt> {
        let call = self.sstore2_deployer()?.deploy_code_split(code);
        let pending = call.send().await?;
        let receipt = self.confirm("sstore2 deployCodeSplit", pending).await?;
        self.pointers("sstore2 deployCodeSplit", receipt)
    }

    async fn send_transaction(&self, to: Address, data: Bytes) -> Result<SentTransaction> {
        let tx = Eip1559TransactionRequest::new().to(to).data(data);
        let pending = self.client.send_transaction(tx, None).await?;
        let receipt = self.confirm("send transaction", pending).await?;
        Ok(SentTransaction {
            tx_hash: receipt.transaction_hash,
            gas_used: receipt.gas_used.unwrap_or_default(),
        })
    }
}
