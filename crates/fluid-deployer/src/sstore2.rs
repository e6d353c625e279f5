/// This module stores bytecode through the SSTORE2 deployer. Code is keyed by
/// its hash in the network's pointer registry, so storing the same code twice
/// only sends one transaction.
use ethers::{
    types::{Address, Bytes, H256},
    utils::keccak256,
};
use eyre::Result;
use fluid_addresses::PointerRecord;
use tracing::info;

use crate::{
    chain::{DeployChain, PointerReceipt},
    deployer::Deployer,
    errors::DeployError,
    store::DeploymentStore,
};

impl<C: DeployChain, S: DeploymentStore> Deployer<C, S> {
    fn registered(&mut self, bytecode_hash: H256, split: bool) -> Result<Option<PointerRecord>> {
        match self.book.pointer(bytecode_hash) {
            Some(record) if record.is_split() != split => {
                Err(DeployError::PointerKindMismatch { bytecode_hash }.into())
            }
            Some(record) => {
                info!(
                    bytecode_hash = ?bytecode_hash,
                    pointer = ?record.pointer,
                    "code already stored, skipped"
                );
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn expect_pointers(step: &str, receipt: &PointerReceipt, count: usize) -> Result<()> {
        if receipt.pointers.len() == count {
            Ok(())
        } else {
            Err(DeployError::MissingEvent {
                step: step.to_string(),
                tx_hash: receipt.tx_hash,
            }
            .into())
        }
    }

    /// Stores `bytecode` behind a single SSTORE2 pointer and returns it.
    pub async fn store_code(&mut self, bytecode: &Bytes) -> Result<Address> {
        let bytecode_hash = H256::from(keccak256(bytecode));
        if let Some(record) = self.registered(bytecode_hash, false)? {
            return Ok(record.pointer);
        }

        let receipt = self.chain.deploy_code(bytecode.clone()).await?;
        Self::expect_pointers("sstore2 deployCode", &receipt, 1)?;
        let pointer = receipt.pointers[0];
        self.book.register_pointer(PointerRecord {
            pointer,
            pointer2: None,
            bytecode_hash,
        });
        info!(
            bytecode_hash = ?bytecode_hash,
            pointer = ?pointer,
            size = bytecode.len(),
            "stored code"
        );
        Ok(pointer)
    }

    /// Stores `bytecode` split across two SSTORE2 pointers. Both pointers are
    /// registered together.
    pub async fn store_code_split(&mut self, bytecode: &Bytes) -> Result<(Address, Address)> {
        let bytecode_hash = H256::from(keccak256(bytecode));
        if let Some(record) = self.registered(bytecode_hash, true)? {
            if let Some(pointer2) = record.pointer2 {
                return Ok((record.pointer, pointer2));
            }
        }

        let receipt = self.chain.deploy_code_split(bytecode.clone()).await?;
        Self::expect_pointers("sstore2 deployCodeSplit", &receipt, 2)?;
        let (pointer, pointer2) = (receipt.pointers[0], receipt.pointers[1]);
        self.book.register_pointer(PointerRecord {
            pointer,
            pointer2: Some(pointer2),
            bytecode_hash,
        });
        info!(
            bytecode_hash = ?bytecode_hash,
            pointer = ?pointer,
            pointer2 = ?pointer2,
            size = bytecode.len(),
            "stored split code"
        );
        Ok((pointer, pointer2))
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::testing::mock_deployer;

    fn code(len: usize) -> Bytes {
        (0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>().into()
    }

    #[traced_test]
    #[tokio::test]
    async fn test_store_code_is_deduplicated() -> Result<()> {
        let (chain, store, mut deployer) = mock_deployer("localhost", "unused");
        let bytecode = code(100);

        let first = deployer.store_code(&bytecode).await?;
        let second = deployer.store_code(&bytecode).await?;
        assert_eq!(first, second);
        assert_eq!(chain.transactions().len(), 1);
        assert_eq!(chain.read_pointer(first), bytecode);
        assert!(logs_contain("code already stored, skipped"));

        let registry = store.load_pointers()?;
        assert_eq!(
            registry,
            vec![PointerRecord {
                pointer: first,
                pointer2: None,
                bytecode_hash: H256::from(keccak256(&bytecode)),
            }]
        );

        // Different code gets its own pointer.
        let other = deployer.store_code(&code(101)).await?;
        assert_ne!(other, first);
        assert_eq!(store.load_pointers()?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_store_code_split() -> Result<()> {
        let (chain, store, mut deployer) = mock_deployer("localhost", "unused");
        let bytecode = code(30_000);

        let (pointer, pointer2) = deployer.store_code_split(&bytecode).await?;
        assert_eq!(deployer.store_code_split(&bytecode).await?, (pointer, pointer2));
        assert_eq!(chain.transactions().len(), 1);

        let mut read = chain.read_pointer(pointer).to_vec();
        read.extend_from_slice(&chain.read_pointer(pointer2));
        assert_eq!(Bytes::from(read), bytecode);

        let registry = store.load_pointers()?;
        assert_eq!(registry.len(), 1);
        assert_eq!(registry[0].pointer2, Some(pointer2));

        // The same code can't be looked up as a single pointer.
        let error = deployer.store_code(&bytecode).await.unwrap_err();
        assert!(matches!(
            error.downcast_ref::<DeployError>(),
            Some(DeployError::PointerKindMismatch { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_reverted_store_records_nothing() -> Result<()> {
        let (chain, store, mut deployer) = mock_deployer("localhost", "unused");
        chain.revert_on(1);
        let error = deployer.store_code_split(&code(64)).await.unwrap_err();
        assert!(matches!(
            error.downcast_ref::<DeployError>(),
            Some(DeployError::TransactionReverted { .. })
        ));
        assert!(store.load_pointers()?.is_empty());
        Ok(())
    }
}
