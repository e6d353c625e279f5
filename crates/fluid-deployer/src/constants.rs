use std::time::Duration;

use ethers::{signers::LocalWallet, utils::keccak256};

pub use fluid_addresses::PENDING_TX_HASH;

/// Networks whose queued transactions are executed directly by the deployer.
pub const LOCAL_NETWORKS: &[&str] = &["hardhat", "localhost", "anvil"];

/// The protocol version deployed when none is configured.
pub const DEFAULT_VERSION: &str = "v1_0_0";

/// The version tag of the exported multisig batch format.
pub const BATCH_FORMAT_VERSION: &str = "1.0.0";

/// How many fresh salts a deployment may try after constructor argument
/// conflicts before giving up.
pub const MAX_RECONCILE_ATTEMPTS: usize = 5;

/// Retries for plain deployments that fail with "max fee too low".
pub const FEE_RETRIES: usize = 5;
pub const FEE_RETRY_TIME: Duration = Duration::from_secs(10);

/// Retries for verification while the explorer hasn't indexed the bytecode.
pub const VERIFY_RETRIES: usize = 40;
pub const VERIFY_RETRY_TIME: Duration = Duration::from_secs(3);

/// The default private key of anvil's first account.
pub const ANVIL_PRIVATE_KEY: &str =
    "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

lazy_static! {
    // A deterministic deployer account for tests and dry runs.
    pub static ref DEPLOYER: LocalWallet = LocalWallet::from_bytes(&keccak256("deployer")).unwrap();
}
