/// This module loads compiled contract artifacts. Both Hardhat artifacts
/// (`"bytecode": "0x.."`) and Foundry artifacts (`"bytecode": {"object": "0x.."}`)
/// are accepted.
use std::path::Path;

use ethers::{abi::Abi, types::Bytes};
use eyre::{eyre, Result};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

fn deserialize_bytecode<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawBytecode {
        Hardhat(Bytes),
        Foundry { object: Bytes },
    }

    Ok(match RawBytecode::deserialize(deserializer)? {
        RawBytecode::Hardhat(bytes) => bytes,
        RawBytecode::Foundry { object } => object,
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArtifact {
    contract_name: Option<String>,
    source_name: Option<String>,
    abi: Value,
    #[serde(deserialize_with = "deserialize_bytecode")]
    bytecode: Bytes,
    #[serde(default, deserialize_with = "deserialize_bytecode")]
    deployed_bytecode: Bytes,
}

/// A compiled contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifact {
    pub contract_name: String,
    pub source_name: Option<String>,
    pub abi: Value,
    pub bytecode: Bytes,
    pub deployed_bytecode: Bytes,
}

impl Artifact {
    pub fn new(contract_name: &str, abi: Value, bytecode: Bytes) -> Self {
        Self {
            contract_name: contract_name.to_string(),
            source_name: None,
            abi,
            bytecode,
            deployed_bytecode: Bytes::new(),
        }
    }

    /// Reads an artifact file. Foundry artifacts don't carry a contract name,
    /// so it falls back to the file stem.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| eyre!("couldn't read artifact {}: {}", path.display(), e))?;
        let fallback = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default();
        Self::from_json(&contents, fallback)
    }

    pub fn from_json(contents: &str, fallback_name: &str) -> Result<Self> {
        let raw: RawArtifact = serde_json::from_str(contents)?;
        Ok(Self {
            contract_name: raw
                .contract_name
                .unwrap_or_else(|| fallback_name.to_string()),
            source_name: raw.source_name,
            abi: raw.abi,
            bytecode: raw.bytecode,
            deployed_bytecode: raw.deployed_bytecode,
        })
    }

    pub fn parsed_abi(&self) -> Result<Abi> {
        serde_json::from_value(self.abi.clone())
            .map_err(|e| eyre!("invalid abi for {}: {}", self.contract_name, e))
    }

    /// The `<source>:<contract>` identifier explorers use to pick the
    /// contract out of a compilation.
    pub fn fully_qualified_name(&self) -> String {
        match &self.source_name {
            Some(source) => format!("{}:{}", source, self.contract_name),
            None => self.contract_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_load_hardhat_artifact() -> Result<()> {
        let artifact = Artifact::from_json(
            r#"{
                "contractName": "Liquidity",
                "sourceName": "contracts/liquidity/proxy.sol",
                "abi": [],
                "bytecode": "0x6080",
                "deployedBytecode": "0x60806040"
            }"#,
            "ignored",
        )?;
        assert_eq!(artifact.contract_name, "Liquidity");
        assert_eq!(artifact.bytecode.to_vec(), vec![0x60, 0x80]);
        assert_eq!(artifact.deployed_bytecode.to_vec(), vec![0x60, 0x80, 0x60, 0x40]);
        assert_eq!(
            artifact.fully_qualified_name(),
            "contracts/liquidity/proxy.sol:Liquidity"
        );
        assert!(artifact.parsed_abi()?.constructor().is_none());
        Ok(())
    }

    #[test]
    fn test_load_foundry_artifact() -> Result<()> {
        let mut file = tempfile::Builder::new()
            .prefix("DexFactory")
            .suffix(".json")
            .tempfile()?;
        write!(
            file,
            r#"{{"abi": [], "bytecode": {{"object": "0xaa"}}, "deployedBytecode": {{"object": "0xbb"}}}}"#
        )?;
        let artifact = Artifact::load(file.path())?;
        assert!(artifact.contract_name.starts_with("DexFactory"));
        assert_eq!(artifact.bytecode.to_vec(), vec![0xaa]);
        assert_eq!(artifact.deployed_bytecode.to_vec(), vec![0xbb]);
        assert_eq!(artifact.source_name, None);
        Ok(())
    }
}
