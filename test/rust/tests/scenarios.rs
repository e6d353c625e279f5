use std::{fs, path::Path, sync::Arc};

use ethers::types::{Address, Bytes};
use eyre::Result;
use fluid_addresses::DeploymentRecord;
use fluid_deployer::{
    address_book::AddressBook,
    artifact::Artifact,
    config::Network,
    constants::DEFAULT_VERSION,
    create3::DeployRequest,
    deployer::Deployer,
    dispatch::{Deterministic, Dispatcher, Version},
    errors::DeployError,
    queue::{FlushOutcome, QueuedTransaction, TransactionQueue},
    store::{DeploymentStore, FileStore},
    testing::{widget_artifact, MockChain, MOCK_GLOBAL_SALT},
};
use serde_json::{json, Map, Value};
use tempfile::tempdir;
use tracing_test::traced_test;

const OWNER_1: &str = "0x1111111111111111111111111111111111111111";
const OWNER_2: &str = "0x2222222222222222222222222222222222222222";

/// A deployer for `network` that persists to `dir` the way a real run does.
fn deployer(
    chain: &Arc<MockChain>,
    network: &str,
    dir: &Path,
) -> Deployer<Arc<MockChain>, FileStore> {
    let network = Network::new(network).with_explorer("https://explorer.example");
    Deployer::new(
        chain.clone(),
        AddressBook::new(
            FileStore::new(dir.join("deployments"), &network.name),
            network.clone(),
            DEFAULT_VERSION,
        ),
        TransactionQueue::new(network, dir.join("txs-batches")),
        MOCK_GLOBAL_SALT,
        chain.factory(),
    )
}

fn widget(owner: &str) -> DeployRequest {
    DeployRequest::new("Widget", widget_artifact(), vec![json!(owner)])
}

fn read_record(path: &Path) -> Result<DeploymentRecord> {
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

fn auth_update(target: Address, auth: Address) -> QueuedTransaction {
    let mut method_params = Map::new();
    method_params.insert("auth_".to_string(), json!(format!("{:#x}", auth)));
    QueuedTransaction {
        target,
        calldata: Bytes::from(auth.as_bytes().to_vec()),
        abi: json!([{
            "type": "function",
            "name": "updateAuth",
            "inputs": [{"name": "auth_", "type": "address"}]
        }]),
        contract_address_for_abi: target,
        method: "updateAuth(address)".to_string(),
        method_params,
    }
}

#[traced_test]
#[tokio::test]
async fn test_widget_deployment_lifecycle() -> Result<()> {
    let dir = tempdir()?;
    let chain = Arc::new(MockChain::new());
    let mut deployer = deployer(&chain, "localhost", dir.path());

    // The first deployment creates the record at X.
    let first = deployer.deploy_deterministic(&widget(OWNER_1)).await?;
    assert!(first.newly_deployed);
    let x = first.address;
    assert!(!chain.code(x).is_empty());

    // Rerunning the identical deployment is a no-op.
    let again = deployer.deploy_deterministic(&widget(OWNER_1)).await?;
    assert!(!again.newly_deployed);
    assert_eq!(again.address, x);
    assert!(logs_contain("already deployed, skipped"));

    // New constructor arguments get a new address and leave X alone.
    let store = FileStore::new(dir.path().join("deployments"), "localhost");
    let dump_x = read_record(&store.dump_path(x))?;
    let second = deployer.deploy_deterministic(&widget(OWNER_2)).await?;
    assert!(second.newly_deployed);
    let y = second.address;
    assert_ne!(y, x);
    assert_eq!(read_record(&store.dump_path(x))?, dump_x);
    assert_eq!(dump_x.args, vec![json!(OWNER_1)]);
    assert_eq!(store.load("Widget")?.map(|r| r.address), Some(y));
    assert_eq!(chain.transactions().len(), 2);

    // Both deployments keep a dump, the manifest only shows the current one.
    assert_eq!(read_record(&store.dump_path(y))?.args, vec![json!(OWNER_2)]);
    let manifest = fs::read_to_string(store.manifest_path())?;
    assert_eq!(manifest.matches("## Widget").count(), 1);
    assert!(manifest.contains(&format!("https://explorer.example/address/{:#x}", y)));
    assert!(!manifest.contains(&format!("[{:#x}]", x)));
    Ok(())
}

#[tokio::test]
async fn test_rerun_reads_previous_runs_from_disk() -> Result<()> {
    let dir = tempdir()?;
    let chain = Arc::new(MockChain::new());

    let first_run = {
        let mut deployer = deployer(&chain, "localhost", dir.path());
        deployer.deploy_deterministic(&widget(OWNER_1)).await?
    };

    // A second run starts with empty caches and only the files on disk.
    let mut deployer = deployer(&chain, "localhost", dir.path());
    let second_run = deployer.deploy_deterministic(&widget(OWNER_1)).await?;
    assert!(!second_run.newly_deployed);
    assert_eq!(second_run.address, first_run.address);
    assert_eq!(second_run.record.args, first_run.record.args);
    assert_eq!(second_run.salt, first_run.salt);
    assert!(deployer.created().is_empty());
    assert_eq!(chain.transactions().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_missing_dump_is_an_untracked_deployment() -> Result<()> {
    let dir = tempdir()?;
    let chain = Arc::new(MockChain::new());
    let first = deployer(&chain, "localhost", dir.path())
        .deploy_deterministic(&widget(OWNER_1))
        .await?;

    // Losing the deployments folder leaves code on chain nobody accounts for.
    fs::remove_dir_all(dir.path().join("deployments"))?;
    let error = deployer(&chain, "localhost", dir.path())
        .deploy_deterministic(&widget(OWNER_1))
        .await
        .unwrap_err();
    assert_eq!(
        error.downcast_ref::<DeployError>(),
        Some(&DeployError::UntrackedDeployment {
            contract: "Widget".to_string(),
            network: "localhost".to_string(),
            address: first.address,
        })
    );
    Ok(())
}

#[tokio::test]
async fn test_export_batch_for_the_multisig() -> Result<()> {
    let dir = tempdir()?;
    let chain = Arc::new(MockChain::new());
    let mut deployer = deployer(&chain, "mainnet", dir.path());
    let liquidity = Address::repeat_byte(0x4c);
    for i in 1..=3u8 {
        deployer
            .queue_mut()
            .queue(auth_update(liquidity, Address::repeat_byte(i)))?;
    }

    let outcome = deployer.flush_queue("test-batch").await?;
    let path = dir.path().join("txs-batches").join("mainnet-test-batch.json");
    match outcome {
        FlushOutcome::Exported(report) => {
            assert_eq!(report.path, path);
            assert_eq!(report.entries, 3);
        }
        other => panic!("expected an export, got {:?}", other),
    }
    assert!(deployer.queue().is_empty());
    assert!(chain.transactions().is_empty());

    let batch: Value = serde_json::from_str(&fs::read_to_string(path)?)?;
    assert_eq!(batch["version"], json!("1.0.0"));
    let entries = batch["batch"].as_array().cloned().unwrap_or_default();
    assert_eq!(entries.len(), 3);
    for (i, entry) in entries.iter().enumerate() {
        let auth = Address::repeat_byte(i as u8 + 1);
        assert_eq!(entry["auth_"], json!(format!("{:#x}", auth)));
        assert_eq!(entry["toAddress"], json!(format!("{:#x}", liquidity)));
        assert_eq!(entry["method"], json!("updateAuth(address)"));
    }
    Ok(())
}

#[tokio::test]
async fn test_local_flush_executes_everything() -> Result<()> {
    let dir = tempdir()?;
    let chain = Arc::new(MockChain::new());
    let mut deployer = deployer(&chain, "hardhat", dir.path());
    let widget = deployer.deploy_deterministic(&widget(OWNER_1)).await?;
    for i in 1..=4u8 {
        deployer
            .queue_mut()
            .queue(auth_update(widget.address, Address::repeat_byte(i)))?;
    }

    match deployer.flush_queue("unused").await? {
        FlushOutcome::Executed(report) => assert_eq!(report.transactions, 4),
        other => panic!("expected a local flush, got {:?}", other),
    }
    assert!(deployer.queue().is_empty());
    // The deployment plus the four queued calls, in order.
    let sent = chain.transactions();
    assert_eq!(sent.len(), 5);
    assert!(sent[1..].iter().all(|tx| tx.to == Some(widget.address)));
    assert!(!dir.path().join("txs-batches").exists());
    Ok(())
}

#[tokio::test]
async fn test_split_code_feeds_a_deployment() -> Result<()> {
    let dir = tempdir()?;
    let chain = Arc::new(MockChain::new());
    let mut deployer = deployer(&chain, "localhost", dir.path());

    // A logic contract too big for one blob is stored across two pointers
    // which are then handed to the contract that reads it back.
    let logic = Bytes::from(vec![0x5b; 40_000]);
    let (pointer, pointer2) = deployer.store_code_split(&logic).await?;
    let artifact = Artifact::new(
        "DexFactory",
        json!([{
            "type": "constructor",
            "inputs": [
                {"name": "creationCodePointer1_", "type": "address"},
                {"name": "creationCodePointer2_", "type": "address"}
            ]
        }]),
        Bytes::from(vec![0x60, 0x80]),
    );
    let request = DeployRequest::new(
        "DexFactory",
        artifact,
        vec![
            json!(format!("{:#x}", pointer)),
            json!(format!("{:#x}", pointer2)),
        ],
    );
    let dispatcher = Dispatcher::new("DexFactory").with(Version::V1_1_0, Deterministic(request));

    // Only the registered version deploys.
    let error = dispatcher.dispatch("v1_0_0", &mut deployer).await.unwrap_err();
    assert!(matches!(
        error.downcast_ref::<DeployError>(),
        Some(DeployError::UnsupportedVersion { .. })
    ));
    let address = dispatcher.dispatch("v1_1_0", &mut deployer).await?;
    assert!(!chain.code(address).is_empty());

    // The deployment belongs to the dispatched version, not the run's default.
    let store = FileStore::new(dir.path().join("deployments"), "localhost");
    let snapshot = read_record(&store.snapshot_path("v1_1_0", "DexFactory"))?;
    assert_eq!(snapshot.address, address);
    assert_eq!(snapshot.created_for_version.as_deref(), Some("v1_1_0"));
    assert!(!store.snapshot_path(DEFAULT_VERSION, "DexFactory").exists());

    // Storing the same logic again is free.
    assert_eq!(deployer.store_code_split(&logic).await?, (pointer, pointer2));
    let registry: Value = serde_json::from_str(&fs::read_to_string(
        dir.path()
            .join("deployments")
            .join("localhost")
            .join("sstore2Pointers.json"),
    )?)?;
    assert_eq!(registry.as_array().map(Vec::len), Some(1));
    assert_eq!(registry[0]["pointer2"], json!(format!("{:#x}", pointer2)));

    let mut read = chain.read_pointer(pointer).to_vec();
    read.extend_from_slice(&chain.read_pointer(pointer2));
    assert_eq!(Bytes::from(read), logic);
    Ok(())
}
