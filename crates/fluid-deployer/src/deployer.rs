/// This module contains the `Deployer`, which carries everything a run needs
/// to deploy contracts on one network. The deployment flows themselves live
/// in `create3` and `sstore2`.
use ethers::types::Address;
use eyre::Result;
use fluid_addresses::DeploymentRecord;

use crate::{
    address_book::AddressBook,
    chain::DeployChain,
    config::Network,
    create3::Disambiguator,
    queue::{FlushOutcome, TransactionQueue},
    retry::RetryPolicy,
    store::DeploymentStore,
};

/// A record created during this run, kept around so it can be verified once
/// the run is done.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedDeployment {
    pub name: String,
    pub fully_qualified_name: String,
    pub record: DeploymentRecord,
}

pub struct Deployer<C: DeployChain, S: DeploymentStore> {
    pub(crate) chain: C,
    pub(crate) book: AddressBook<S>,
    pub(crate) queue: TransactionQueue,
    pub(crate) global_salt: String,
    pub(crate) create3_factory: Address,
    pub(crate) fee_policy: RetryPolicy,
    pub(crate) created: Vec<CreatedDeployment>,
    pub(crate) disambiguator: Disambiguator,
}

impl<C: DeployChain, S: DeploymentStore> Deployer<C, S> {
    pub fn new(
        chain: C,
        book: AddressBook<S>,
        queue: TransactionQueue,
        global_salt: &str,
        create3_factory: Address,
    ) -> Self {
        Self {
            chain,
            book,
            queue,
            global_salt: global_salt.to_string(),
            create3_factory,
            fee_policy: RetryPolicy::fee(),
            created: Vec::new(),
            disambiguator: Disambiguator::default(),
        }
    }

    /// Overrides the retry policy for plain deployments.
    pub fn with_fee_policy(mut self, policy: RetryPolicy) -> Self {
        self.fee_policy = policy;
        self
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn book(&self) -> &AddressBook<S> {
        &self.book
    }

    pub fn book_mut(&mut self) -> &mut AddressBook<S> {
        &mut self.book
    }

    pub fn queue(&self) -> &TransactionQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut TransactionQueue {
        &mut self.queue
    }

    pub fn network(&self) -> &Network {
        self.book.network()
    }

    pub fn version(&self) -> &str {
        self.book.version()
    }

    pub fn global_salt(&self) -> &str {
        &self.global_salt
    }

    pub fn create3_factory(&self) -> Address {
        self.create3_factory
    }

    /// The records created so far in this run.
    pub fn created(&self) -> &[CreatedDeployment] {
        &self.created
    }

    pub fn take_created(&mut self) -> Vec<CreatedDeployment> {
        std::mem::take(&mut self.created)
    }

    /// Flushes the run's transaction queue.
    pub async fn flush_queue(&mut self, batch_name: &str) -> Result<FlushOutcome> {
        self.queue.flush(&self.chain, batch_name).await
    }
}
