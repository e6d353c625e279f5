use ethers::types::{Address, H256};
use thiserror::Error;

/// Failures that callers may want to tell apart. They travel inside
/// `eyre::Report`, so use `report.downcast_ref::<DeployError>()` to inspect
/// them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeployError {
    #[error("unsupported version {version} requested for {contract}")]
    UnsupportedVersion { version: String, contract: String },

    #[error("{what} must not be the zero address")]
    ZeroAddress { what: String },

    #[error("no deployment named {name} on {network}")]
    NotFound { name: String, network: String },

    #[error(
        "{contract}: {address:#x} on {network} already has code but there is no local \
         dump for it; resolve this deployment by hand"
    )]
    UntrackedDeployment {
        contract: String,
        network: String,
        address: Address,
    },

    #[error("{contract}: factory deployed to {actual:#x} but {expected:#x} was precomputed")]
    AddressMismatch {
        contract: String,
        expected: Address,
        actual: Address,
    },

    #[error("{contract}: gave up after {attempts} conflicting salts on {network}")]
    ReconcileExhausted {
        contract: String,
        network: String,
        attempts: usize,
    },

    #[error("{step}: transaction {tx_hash:#x} did not emit the expected event")]
    MissingEvent { step: String, tx_hash: H256 },

    #[error("{contract}: invalid constructor arguments: {reason}")]
    ConstructorArgs { contract: String, reason: String },

    #[error("bytecode {bytecode_hash:#x} is already stored with a different pointer layout")]
    PointerKindMismatch { bytecode_hash: H256 },

    #[error("{step}: transaction {tx_hash:#x} reverted")]
    TransactionReverted { step: String, tx_hash: H256 },

    #[error("refusing to execute queued transactions directly on live network {network}")]
    LocalFlushOnLiveNetwork { network: String },

    #[error("{method}: parameter {param} clashes with a batch entry field")]
    ReservedMethodParam { method: String, param: String },
}

/// Fails with [`DeployError::ZeroAddress`] if a required address is unset.
pub fn ensure_nonzero(address: Address, what: &str) -> Result<Address, DeployError> {
    if address.is_zero() {
        Err(DeployError::ZeroAddress {
            what: what.to_string(),
        })
    } else {
        Ok(address)
    }
}
