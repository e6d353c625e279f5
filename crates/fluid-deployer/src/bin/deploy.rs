/// This script deploys one contract artifact for the configured protocol
/// version. After the deployment it flushes the transaction queue, executing
/// it on local networks and exporting it as a multisig batch everywhere else,
/// and submits every contract it created for source verification.
///
/// Besides the `FLUID_*` run configuration it reads:
///
/// - `FLUID_ARTIFACT`: the path of the Hardhat or Foundry artifact.
/// - `FLUID_CONTRACT_NAME`: the deployment name, defaults to the artifact's
///   contract name.
/// - `FLUID_CONSTRUCTOR_ARGS`: a JSON array of constructor arguments.
/// - `FLUID_BATCH_NAME`: the name of the exported batch.
/// - `FLUID_BUILD_INFO`: the build info file used for verification.
use std::env;

use ethers::{signers::LocalWallet, types::Bytes};
use eyre::Result;
use fluid_deployer::{
    address_book::AddressBook,
    artifact::Artifact,
    chain::{Chain, EthersChain},
    config::Config,
    constants::ANVIL_PRIVATE_KEY,
    create3::DeployRequest,
    deployer::Deployer,
    dispatch::{Deterministic, Dispatcher, Version},
    queue::{FlushOutcome, TransactionQueue},
    retry::RetryPolicy,
    store::FileStore,
    verify::{verify_with_retry, BuildInfo, EtherscanVerifier, VerifyRequest},
};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Set up the logger.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load the run configuration and the contract to deploy.
    let config = Config::from_env()?;
    let artifact = Artifact::load(env::var("FLUID_ARTIFACT")?)?;
    let name = env::var("FLUID_CONTRACT_NAME").unwrap_or_else(|_| artifact.contract_name.clone());
    let args = match env::var("FLUID_CONSTRUCTOR_ARGS") {
        Ok(raw) => serde_json::from_str::<Vec<Value>>(&raw)?,
        Err(_) => Vec::new(),
    };
    let batch_name = env::var("FLUID_BATCH_NAME").unwrap_or_else(|_| format!("deploy-{}", name));
    let network = config.network();

    // Connect to the chain and get a client for the deployer. Without a
    // private key we fall back to anvil's first account, which only works on
    // local networks.
    let chain = Chain::connect(config.ethereum_url.clone()).await?;
    let private_key = match &config.deployer_private_key {
        Some(key) => key.clone(),
        None if network.is_local() || chain.is_anvil() => ANVIL_PRIVATE_KEY.to_string(),
        None => eyre::bail!("FLUID_DEPLOYER_PRIVATE_KEY is required on {}", network.name),
    };
    let client = chain.client(private_key.parse::<LocalWallet>()?).await?;
    let chain = EthersChain::new(
        client,
        config.create3_factory,
        config.sstore2_deployer,
        config.confirmations,
    );

    // Deploy the contract through the version's deployment.
    let store = FileStore::new(&config.deployments_dir, &network.name);
    let mut deployer = Deployer::new(
        chain,
        AddressBook::new(store, network.clone(), &config.version),
        TransactionQueue::new(network.clone(), &config.batches_dir),
        &config.global_salt,
        config.create3_factory,
    );
    let request = DeployRequest::new(&name, artifact, args);
    let dispatcher = Version::ALL
        .into_iter()
        .fold(Dispatcher::new(&name), |dispatcher, version| {
            dispatcher.with(version, Deterministic(request.clone()))
        });
    let address = dispatcher.dispatch(&config.version, &mut deployer).await?;
    info!(contract = %name, network = %network.name, address = ?address, "deployment finished");

    // Hand the queued transactions off.
    if !deployer.queue().is_empty() {
        match deployer.flush_queue(&batch_name).await? {
            FlushOutcome::Executed(report) => info!(
                transactions = report.transactions,
                total_gas_used = %report.total_gas_used,
                "executed queued transactions"
            ),
            FlushOutcome::Exported(report) => info!(
                path = %report.path.display(),
                entries = report.entries,
                "exported queued transactions for the multisig"
            ),
        }
    }

    // Verify everything this run created.
    let created = deployer.take_created();
    if created.is_empty() {
        return Ok(());
    }
    let (Some(api_url), Some(api_key), Ok(build_info)) = (
        config.explorer_api_url.as_deref(),
        config.explorer_api_key.as_deref(),
        env::var("FLUID_BUILD_INFO"),
    ) else {
        warn!("explorer api or build info isn't configured, skipping verification");
        return Ok(());
    };
    let build_info = BuildInfo::load(build_info)?;
    let verifier = EtherscanVerifier::new(api_url, api_key)?;
    for deployment in created {
        let record = &deployment.record;
        let constructor_args: Bytes = record
            .deployed_bytecode
            .get(record.bytecode.len()..)
            .unwrap_or_default()
            .to_vec()
            .into();
        let request = VerifyRequest {
            name: deployment.name.clone(),
            fully_qualified_name: deployment.fully_qualified_name.clone(),
            address: record.address,
            constructor_args,
            libraries: record.libraries.clone(),
            build_info: build_info.clone(),
        };
        verify_with_retry(&verifier, &request, RetryPolicy::verification()).await;
    }

    Ok(())
}
