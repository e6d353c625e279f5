/// This module loads the run configuration from `FLUID_*` environment
/// variables and describes the network a run targets.
use std::path::PathBuf;

use ethers::types::Address;
use eyre::Result;
use serde::Deserialize;

use crate::{
    constants::{DEFAULT_VERSION, LOCAL_NETWORKS},
    errors::ensure_nonzero,
};

const ENV_PREFIX: &str = "FLUID_";

fn default_deployments_dir() -> PathBuf {
    PathBuf::from("deployments")
}

fn default_batches_dir() -> PathBuf {
    PathBuf::from("txs-batches")
}

fn default_confirmations() -> usize {
    1
}

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

/// Everything a deployment run needs to know about its environment.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    // network configuration
    pub network: String,
    pub ethereum_url: Option<String>,
    pub deployer_private_key: Option<String>,
    #[serde(default = "default_confirmations")]
    pub confirmations: usize,
    // deterministic deployment configuration
    pub global_salt: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub create3_factory: Address,
    pub sstore2_deployer: Option<Address>,
    // output locations
    #[serde(default = "default_deployments_dir")]
    pub deployments_dir: PathBuf,
    #[serde(default = "default_batches_dir")]
    pub batches_dir: PathBuf,
    // block explorer configuration
    pub explorer_url: Option<String>,
    pub explorer_api_url: Option<String>,
    pub explorer_api_key: Option<String>,
}

impl Config {
    /// Loads a `.env` file if there is one and reads the `FLUID_*`
    /// environment variables.
    pub fn from_env() -> Result<Self> {
        // A missing .env file is fine, the variables may already be set.
        dotenvy::dotenv().ok();
        let config = envy::prefixed(ENV_PREFIX).from_env::<Self>()?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a config from explicit key-value pairs (keys still carry the
    /// `FLUID_` prefix).
    pub fn from_pairs<I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::prefixed(ENV_PREFIX).from_iter::<_, Self>(pairs)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations that would only fail once transactions are
    /// already in flight.
    pub fn validate(&self) -> Result<()> {
        ensure_nonzero(self.create3_factory, "FLUID_CREATE3_FACTORY")?;
        if let Some(sstore2_deployer) = self.sstore2_deployer {
            ensure_nonzero(sstore2_deployer, "FLUID_SSTORE2_DEPLOYER")?;
        }
        if self.global_salt.is_empty() {
            eyre::bail!("FLUID_GLOBAL_SALT must not be empty");
        }
        Ok(())
    }

    pub fn network(&self) -> Network {
        Network {
            name: self.network.clone(),
            explorer_url: self.explorer_url.clone(),
            confirmations: self.confirmations,
        }
    }
}

/// The network a run targets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Network {
    pub name: String,
    pub explorer_url: Option<String>,
    pub confirmations: usize,
}

impl Network {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            explorer_url: None,
            confirmations: default_confirmations(),
        }
    }

    pub fn with_explorer(mut self, explorer_url: &str) -> Self {
        self.explorer_url = Some(explorer_url.trim_end_matches('/').to_string());
        self
    }

    /// Local networks execute queued transactions directly. Every other
    /// network exports them for the multisig.
    pub fn is_local(&self) -> bool {
        LOCAL_NETWORKS.contains(&self.name.as_str())
    }

    /// The block explorer page of an address, if the network has an explorer.
    pub fn address_url(&self, address: Address) -> Option<String> {
        self.explorer_url
            .as_ref()
            .map(|url| format!("{}/address/{:#x}", url, address))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::errors::DeployError;

    fn pairs(extra: &[(&str, &str)]) -> Vec<(String, String)> {
        let mut pairs = BTreeMap::from([
            ("FLUID_NETWORK", "mainnet"),
            ("FLUID_GLOBAL_SALT", "fluid"),
            (
                "FLUID_CREATE3_FACTORY",
                "0x6d4fc0d8b4cb35d3d9f3f0b2c5d9abf6c0e0bb95",
            ),
        ]);
        pairs.extend(extra.iter().copied());
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_config_defaults() -> Result<()> {
        let config = Config::from_pairs(pairs(&[]))?;
        assert_eq!(config.deployments_dir, PathBuf::from("deployments"));
        assert_eq!(config.batches_dir, PathBuf::from("txs-batches"));
        assert_eq!(config.confirmations, 1);
        assert_eq!(config.version, DEFAULT_VERSION);
        assert_eq!(config.ethereum_url, None);
        assert_eq!(config.sstore2_deployer, None);
        assert!(!config.network().is_local());
        Ok(())
    }

    #[test]
    fn test_config_rejects_zero_factory() {
        let err = Config::from_pairs(pairs(&[(
            "FLUID_CREATE3_FACTORY",
            "0x0000000000000000000000000000000000000000",
        )]))
        .unwrap_err();
        assert_eq!(
            err.downcast_ref::<DeployError>(),
            Some(&DeployError::ZeroAddress {
                what: "FLUID_CREATE3_FACTORY".to_string()
            })
        );
    }

    #[test]
    fn test_network_explorer_links() {
        let network = Network::new("localhost");
        assert!(network.is_local());
        assert_eq!(network.address_url(Address::zero()), None);

        let network = Network::new("mainnet").with_explorer("https://etherscan.io/");
        assert!(!network.is_local());
        assert_eq!(
            network.address_url(Address::repeat_byte(0x11)),
            Some(
                "https://etherscan.io/address/0x1111111111111111111111111111111111111111"
                    .to_string()
            )
        );
    }
}
