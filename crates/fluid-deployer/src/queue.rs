/// This module contains the transaction queue that collects privileged calls
/// during a run. Local networks execute the queue directly; every other
/// network exports it as a batch file for the multisig to review and sign.
use std::{fs, mem, path::PathBuf};

use ethers::types::{Address, Bytes, U256};
use eyre::{Result, WrapErr};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::{
    chain::DeployChain,
    config::Network,
    constants::BATCH_FORMAT_VERSION,
    errors::{ensure_nonzero, DeployError},
};

/// A privileged call waiting to be executed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedTransaction {
    pub target: Address,
    pub calldata: Bytes,
    pub abi: Value,
    /// The contract whose ABI describes the call. This may differ from
    /// `target` when the target delegates to another implementation.
    pub contract_address_for_abi: Address,
    /// The human readable signature of the called method.
    pub method: String,
    pub method_params: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlushReport {
    pub transactions: usize,
    pub total_gas_used: U256,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportReport {
    pub path: PathBuf,
    pub entries: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    Executed(FlushReport),
    Exported(ExportReport),
}

/// The keys every batch entry carries. Method parameters share the entry's
/// namespace so they can't use these names.
const BATCH_ENTRY_KEYS: [&str; 7] = [
    "abi",
    "raw",
    "toAddress",
    "contractAddress",
    "value",
    "chainId",
    "method",
];

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchEntry<'a> {
    abi: &'a Value,
    raw: &'a Bytes,
    to_address: Address,
    contract_address: Address,
    value: u64,
    chain_id: u64,
    method: &'a str,
    #[serde(flatten)]
    method_params: &'a Map<String, Value>,
}

#[derive(Serialize)]
struct Batch<'a> {
    batch: Vec<BatchEntry<'a>>,
    version: &'static str,
}

pub struct TransactionQueue {
    network: Network,
    batches_dir: PathBuf,
    items: Vec<QueuedTransaction>,
}

impl TransactionQueue {
    pub fn new(network: Network, batches_dir: impl Into<PathBuf>) -> Self {
        Self {
            network,
            batches_dir: batches_dir.into(),
            items: Vec::new(),
        }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Appends a transaction to the queue.
    pub fn queue(&mut self, transaction: QueuedTransaction) -> Result<()> {
        ensure_nonzero(transaction.target, "queued transaction target")?;
        if let Some(param) = transaction
            .method_params
            .keys()
            .find(|param| BATCH_ENTRY_KEYS.contains(&param.as_str()))
        {
            return Err(DeployError::ReservedMethodParam {
                method: transaction.method.clone(),
                param: param.clone(),
            }
            .into());
        }
        info!(
            to = ?transaction.target,
            method = %transaction.method,
            position = self.items.len(),
            "queued transaction"
        );
        self.items.push(transaction);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[QueuedTransaction] {
        &self.items
    }

    /// The file a batch named `batch_name` is exported to.
    pub fn batch_path(&self, batch_name: &str) -> PathBuf {
        self.batches_dir
            .join(format!("{}-{}.json", self.network.name, batch_name))
    }

    /// Executes the queue on local networks and exports it everywhere else.
    pub async fn flush<C: DeployChain>(
        &mut self,
        chain: &C,
        batch_name: &str,
    ) -> Result<FlushOutcome> {
        if self.network.is_local() {
            Ok(FlushOutcome::Executed(self.flush_local(chain).await?))
        } else {
            Ok(FlushOutcome::Exported(
                self.flush_export(chain, batch_name).await?,
            ))
        }
    }

    /// Sends every queued transaction in order, waiting for each receipt
    /// before sending the next. The first failure aborts the rest of the
    /// queue and transactions that were already mined stay mined.
    pub async fn flush_local<C: DeployChain>(&mut self, chain: &C) -> Result<FlushReport> {
        if !self.network.is_local() {
            return Err(DeployError::LocalFlushOnLiveNetwork {
                network: self.network.name.clone(),
            }
            .into());
        }

        let items = mem::take(&mut self.items);
        let total = items.len();
        let mut total_gas_used = U256::zero();
        for (i, item) in items.into_iter().enumerate() {
            let sent = chain
                .send_transaction(item.target, item.calldata)
                .await
                .wrap_err_with(|| {
                    format!(
                        "queued transaction {} of {} ({} on {:#x}) failed on {}",
                        i + 1,
                        total,
                        item.method,
                        item.target,
                        self.network.name
                    )
                })?;
            info!(
                method = %item.method,
                to = ?item.target,
                tx_hash = ?sent.tx_hash,
                gas_used = %sent.gas_used,
                "executed queued transaction"
            );
            total_gas_used += sent.gas_used;
        }

        info!(
            network = %self.network.name,
            transactions = total,
            total_gas_used = %total_gas_used,
            "flushed transaction queue"
        );
        Ok(FlushReport {
            transactions: total,
            total_gas_used,
        })
    }

    /// Writes every queued transaction to a batch file for the multisig. The
    /// queue is only cleared once the file is written.
    pub async fn flush_export<C: DeployChain>(
        &mut self,
        chain: &C,
        batch_name: &str,
    ) -> Result<ExportReport> {
        let chain_id = chain.chain_id().await?;
        let batch = Batch {
            batch: self
                .items
                .iter()
                .map(|item| BatchEntry {
                    abi: &item.abi,
                    raw: &item.calldata,
                    to_address: item.target,
                    contract_address: item.contract_address_for_abi,
                    value: 0,
                    chain_id,
                    method: &item.method,
                    method_params: &item.method_params,
                })
                .collect(),
            version: BATCH_FORMAT_VERSION,
        };

        let path = self.batch_path(batch_name);
        fs::create_dir_all(&self.batches_dir)
            .wrap_err_with(|| format!("failed to create {}", self.batches_dir.display()))?;
        fs::write(&path, serde_json::to_string_pretty(&batch)?)
            .wrap_err_with(|| format!("failed to write {}", path.display()))?;

        let entries = mem::take(&mut self.items).len();
        info!(
            network = %self.network.name,
            path = %path.display(),
            entries,
            "exported transaction batch"
        );
        Ok(ExportReport { path, entries })
    }
}
