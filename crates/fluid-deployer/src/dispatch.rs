/// This module picks the version specific deployment of a contract.
use std::{collections::BTreeMap, fmt, str::FromStr};

use async_trait::async_trait;
use ethers::types::Address;
use eyre::Result;
use tracing::info;

use crate::{
    chain::DeployChain,
    create3::DeployRequest,
    deployer::Deployer,
    errors::DeployError,
    store::DeploymentStore,
};

/// The protocol versions the tooling knows how to deploy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Version {
    V1_0_0,
    V1_1_0,
    V1_2_0,
    V1_3_0,
}

impl Version {
    pub const ALL: [Version; 4] = [
        Version::V1_0_0,
        Version::V1_1_0,
        Version::V1_2_0,
        Version::V1_3_0,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Version::V1_0_0 => "v1_0_0",
            Version::V1_1_0 => "v1_1_0",
            Version::V1_2_0 => "v1_2_0",
            Version::V1_3_0 => "v1_3_0",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::ALL
            .into_iter()
            .find(|version| version.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// A version specific deployment of one contract. `version` is the version
/// it was dispatched for.
#[async_trait]
pub trait DeployFn<Ctx: Send>: Send + Sync {
    async fn deploy(&self, version: Version, ctx: &mut Ctx) -> Result<Address>;
}

/// The deployments of one contract, by version.
pub struct Dispatcher<Ctx: Send> {
    contract: String,
    handlers: BTreeMap<Version, Box<dyn DeployFn<Ctx>>>,
}

impl<Ctx: Send> Dispatcher<Ctx> {
    pub fn new(contract: &str) -> Self {
        Self {
            contract: contract.to_string(),
            handlers: BTreeMap::new(),
        }
    }

    /// Registers the deployment used for `version`.
    pub fn with(mut self, version: Version, handler: impl DeployFn<Ctx> + 'static) -> Self {
        self.handlers.insert(version, Box::new(handler));
        self
    }

    pub fn contract(&self) -> &str {
        &self.contract
    }

    pub fn versions(&self) -> Vec<Version> {
        self.handlers.keys().copied().collect()
    }

    /// Resolves `version` to a registered deployment. Unknown and
    /// unregistered versions are both rejected, there is no fallback.
    pub fn resolve(&self, version: &str) -> Result<(Version, &dyn DeployFn<Ctx>), DeployError> {
        let unsupported = || DeployError::UnsupportedVersion {
            version: version.to_string(),
            contract: self.contract.clone(),
        };
        let parsed = version.parse::<Version>().map_err(|_| unsupported())?;
        self.handlers
            .get(&parsed)
            .map(|handler| (parsed, handler.as_ref()))
            .ok_or_else(unsupported)
    }

    pub async fn dispatch(&self, version: &str, ctx: &mut Ctx) -> Result<Address> {
        let (version, handler) = self.resolve(version)?;
        info!(contract = %self.contract, %version, "dispatching deployment");
        handler.deploy(version, ctx).await
    }
}

/// Deploys a request through the CREATE3 factory.
pub struct Deterministic(pub DeployRequest);

#[async_trait]
impl<C, S> DeployFn<Deployer<C, S>> for Deterministic
where
    C: DeployChain + 'static,
    S: DeploymentStore + 'static,
{
    async fn deploy(&self, version: Version, deployer: &mut Deployer<C, S>) -> Result<Address> {
        Ok(deployer
            .deploy_deterministic_for(version.as_str(), &self.0)
            .await?
            .address)
    }
}

/// Deploys a request with a plain CREATE transaction.
pub struct Plain(pub DeployRequest);

#[async_trait]
impl<C, S> DeployFn<Deployer<C, S>> for Plain
where
    C: DeployChain + 'static,
    S: DeploymentStore + 'static,
{
    async fn deploy(&self, version: Version, deployer: &mut Deployer<C, S>) -> Result<Address> {
        Ok(deployer.deploy_plain_for(version.as_str(), &self.0).await?.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        create3::{compute_salt, create3_address},
        testing::{mock_deployer, widget_artifact, MOCK_GLOBAL_SALT},
    };

    struct Fixed(Address);

    #[async_trait]
    impl DeployFn<Vec<Address>> for Fixed {
        async fn deploy(&self, _: Version, ctx: &mut Vec<Address>) -> Result<Address> {
            ctx.push(self.0);
            Ok(self.0)
        }
    }

    fn dispatcher() -> Dispatcher<Vec<Address>> {
        Dispatcher::new("Liquidity")
            .with(Version::V1_0_0, Fixed(Address::repeat_byte(0x10)))
            .with(Version::V1_1_0, Fixed(Address::repeat_byte(0x11)))
    }

    #[test]
    fn test_version_tags() {
        for version in Version::ALL {
            assert_eq!(version.as_str().parse::<Version>(), Ok(version));
        }
        assert_eq!("v1_0_0".parse::<Version>(), Ok(Version::V1_0_0));
        assert!("v9_9_9".parse::<Version>().is_err());
        assert!("1.0.0".parse::<Version>().is_err());
    }

    #[tokio::test]
    async fn test_dispatch_picks_the_version() -> Result<()> {
        let dispatcher = dispatcher();
        let mut deployed = Vec::new();
        assert_eq!(
            dispatcher.dispatch("v1_1_0", &mut deployed).await?,
            Address::repeat_byte(0x11)
        );
        assert_eq!(
            dispatcher.dispatch("v1_0_0", &mut deployed).await?,
            Address::repeat_byte(0x10)
        );
        assert_eq!(
            deployed,
            vec![Address::repeat_byte(0x11), Address::repeat_byte(0x10)]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_unsupported_versions_are_rejected() {
        let dispatcher = dispatcher();
        let mut deployed = Vec::new();
        for version in ["v1_2_0", "v9_9_9", ""] {
            let error = dispatcher.dispatch(version, &mut deployed).await.unwrap_err();
            assert_eq!(
                error.downcast_ref::<DeployError>(),
                Some(&DeployError::UnsupportedVersion {
                    version: version.to_string(),
                    contract: "Liquidity".to_string(),
                })
            );
        }
        assert!(deployed.is_empty());
        assert_eq!(dispatcher.versions(), vec![Version::V1_0_0, Version::V1_1_0]);
    }

    #[tokio::test]
    async fn test_dispatch_into_deployer() -> Result<()> {
        let (chain, _, mut deployer) = mock_deployer("localhost", "unused");
        let request = DeployRequest::new(
            "Widget",
            widget_artifact(),
            vec![serde_json::json!("0x1111111111111111111111111111111111111111")],
        );
        let dispatcher = Dispatcher::new("Widget")
            .with(Version::V1_0_0, Plain(request.clone()))
            .with(Version::V1_1_0, Deterministic(request));

        let plain = dispatcher.dispatch("v1_0_0", &mut deployer).await?;
        let deterministic = dispatcher.dispatch("v1_1_0", &mut deployer).await?;
        assert_ne!(plain, deterministic);
        assert_eq!(chain.transactions().len(), 2);
        assert_eq!(deployer.created().len(), 2);
        assert!(dispatcher.dispatch("v1_3_0", &mut deployer).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_dispatched_version_salts_and_records_the_deployment() -> Result<()> {
        let (chain, store, mut deployer) = mock_deployer("localhost", "unused");
        assert_eq!(deployer.version(), "v1_0_0");
        let request = DeployRequest::new(
            "Widget",
            widget_artifact(),
            vec![serde_json::json!("0x1111111111111111111111111111111111111111")],
        );
        let dispatcher = Dispatcher::new("Widget").with(Version::V1_1_0, Deterministic(request.clone()));

        let address = dispatcher.dispatch("v1_1_0", &mut deployer).await?;
        let salt = compute_salt(&request.artifact.bytecode, "v1_1_0", MOCK_GLOBAL_SALT, "");
        assert_eq!(address, create3_address(chain.factory(), salt));

        let record = deployer.book_mut().get("Widget")?;
        assert_eq!(record.salt(), Some(salt));
        assert_eq!(record.created_for_version.as_deref(), Some("v1_1_0"));
        assert_eq!(store.snapshot("v1_1_0", "Widget"), Some(record));
        assert_eq!(store.snapshot("v1_0_0", "Widget"), None);
        Ok(())
    }
}
