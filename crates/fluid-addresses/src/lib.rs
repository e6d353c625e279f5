//! The persisted shapes shared by the deployment tooling: deployment records,
//! SSTORE2 pointer records, and the pending transaction hash sentinel.
use std::{collections::BTreeMap, fmt, str::FromStr};

use ethers::types::{Address, Bytes, H256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Written in place of a transaction hash when execution is deferred to an
/// offline multisig. It has to be replaced by hand once the batch executes.
pub const PENDING_TX_HASH: &str = "TODO_SET_AFTER_EXECUTION";

/// The hash of the transaction that created a deployment, or the pending
/// marker for deployments that were queued for governance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransactionHash {
    Pending,
    Mined(H256),
}

impl TransactionHash {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn mined(&self) -> Option<H256> {
        match self {
            Self::Pending => None,
            Self::Mined(hash) => Some(*hash),
        }
    }
}

impl From<H256> for TransactionHash {
    fn from(hash: H256) -> Self {
        Self::Mined(hash)
    }
}

impl fmt::Display for TransactionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str(PENDING_TX_HASH),
            Self::Mined(hash) => write!(f, "{:#x}", hash),
        }
    }
}

impl FromStr for TransactionHash {
    type Err = <H256 as FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == PENDING_TX_HASH {
            Ok(Self::Pending)
        } else {
            Ok(Self::Mined(s.parse()?))
        }
    }
}

impl Serialize for TransactionHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TransactionHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One deployed (or queued) contract on one network.
///
/// In the deterministic deployment path `deployed_bytecode` holds the full
/// creation code (artifact bytecode followed by the encoded constructor
/// arguments) that was handed to the CREATE3 factory, and that is what later
/// runs compare against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub abi: Value,
    pub address: Address,
    pub args: Vec<Value>,
    pub bytecode: Bytes,
    pub deployed_bytecode: Bytes,
    pub transaction_hash: TransactionHash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_data: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub libraries: BTreeMap<String, Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_for_version: Option<String>,
}

impl DeploymentRecord {
    pub fn is_pending(&self) -> bool {
        self.transaction_hash.is_pending()
    }

    /// The salt the record was deployed with, if it came from the CREATE3
    /// path.
    pub fn salt(&self) -> Option<H256> {
        self.linked_data
            .as_ref()?
            .get("salt")?
            .as_str()?
            .parse()
            .ok()
    }
}

/// An entry of the SSTORE2 pointer registry. `pointer2` is only set when the
/// code was split across two pointers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointerRecord {
    pub pointer: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pointer2: Option<Address>,
    pub bytecode_hash: H256,
}

impl PointerRecord {
    pub fn is_split(&self) -> bool {
        self.pointer2.is_some()
    }
}
