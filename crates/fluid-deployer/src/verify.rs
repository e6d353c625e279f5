/// This module submits deployed contracts for source verification. It is best
/// effort: explorers lag behind the chain, so submissions are retried while
/// the explorer hasn't seen the bytecode, and nothing here fails a run.
use std::{collections::BTreeMap, path::Path, time::Duration};

use async_trait::async_trait;
use ethers::types::{Address, Bytes};
use eyre::{eyre, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::retry::RetryPolicy;

/// The compiler input and version a contract was built with, as found in a
/// Hardhat `build-info` file.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    pub solc_long_version: String,
    pub input: Value,
}

impl BuildInfo {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| eyre!("couldn't read build info {}: {}", path.display(), e))?;
        Ok(serde_json::from_str(&contents)?)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VerifyRequest {
    pub name: String,
    pub fully_qualified_name: String,
    pub address: Address,
    pub constructor_args: Bytes,
    pub libraries: BTreeMap<String, Address>,
    pub build_info: BuildInfo,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerifyStatus {
    Submitted,
    AlreadyVerified,
    /// The explorer hasn't indexed the contract's bytecode yet.
    NotYetIndexed,
    Failed(String),
}

#[async_trait]
pub trait Verifier: Send + Sync {
    async fn submit(&self, request: &VerifyRequest) -> Result<VerifyStatus>;
}

#[derive(Debug, Deserialize)]
struct EtherscanResponse {
    status: String,
    #[serde(default)]
    message: String,
    result: String,
}

/// Maps an explorer response onto a `VerifyStatus`.
fn classify(status: &str, message: &str, result: &str) -> VerifyStatus {
    let lowered = result.to_lowercase();
    if status == "1" {
        VerifyStatus::Submitted
    } else if lowered.contains("already verified") {
        VerifyStatus::AlreadyVerified
    } else if lowered.contains("unable to locate contractcode")
        || lowered.contains("does not have bytecode")
        || lowered.contains("no bytecode")
    {
        VerifyStatus::NotYetIndexed
    } else {
        VerifyStatus::Failed(format!("{}: {}", message, result))
    }
}

/// A verifier for Etherscan compatible explorer APIs.
pub struct EtherscanVerifier {
    client: Client,
    api_url: String,
    api_key: String,
}

impl EtherscanVerifier {
    pub fn new(api_url: &str, api_key: &str) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl Verifier for EtherscanVerifier {
    async fn submit(&self, request: &VerifyRequest) -> Result<VerifyStatus> {
        let mut form = vec![
            ("apikey".to_string(), self.api_key.clone()),
            ("module".to_string(), "contract".to_string()),
            ("action".to_string(), "verifysourcecode".to_string()),
            ("contractaddress".to_string(), format!("{:#x}", request.address)),
            ("sourceCode".to_string(), request.build_info.input.to_string()),
            (
                "codeformat".to_string(),
                "solidity-standard-json-input".to_string(),
            ),
            (
                "contractname".to_string(),
                request.fully_qualified_name.clone(),
            ),
            (
                "compilerversion".to_string(),
                format!("v{}", request.build_info.solc_long_version),
            ),
            // Etherscan's spelling.
            (
                "constructorArguements".to_string(),
                hex_without_prefix(&request.constructor_args),
            ),
        ];
        for (i, (library, address)) in request.libraries.iter().enumerate() {
            form.push((format!("libraryname{}", i + 1), library.clone()));
            form.push((format!("libraryaddress{}", i + 1), format!("{:#x}", address)));
        }

        let response = self
            .client
            .post(&self.api_url)
            .form(&form)
            .send()
            .await?
            .error_for_status()?
            .json::<EtherscanResponse>()
            .await?;
        Ok(classify(&response.status, &response.message, &response.result))
    }
}

fn hex_without_prefix(bytes: &Bytes) -> String {
    let encoded = format!("{}", bytes);
    encoded.trim_start_matches("0x").to_string()
}

/// Submits `request` until the explorer accepts it, retrying while the
/// bytecode isn't indexed. Every outcome is logged and none is an error.
pub async fn verify_with_retry<V: Verifier + ?Sized>(
    verifier: &V,
    request: &VerifyRequest,
    policy: RetryPolicy,
) -> VerifyStatus {
    let mut attempt = 1;
    loop {
        let status = match verifier.submit(request).await {
            Ok(status) => status,
            Err(error) => VerifyStatus::Failed(format!("{:#}", error)),
        };
        match &status {
            VerifyStatus::Submitted => {
                info!(contract = %request.name, address = ?request.address, "submitted for verification");
            }
            VerifyStatus::AlreadyVerified => {
                info!(contract = %request.name, address = ?request.address, "already verified");
            }
            VerifyStatus::NotYetIndexed if attempt < policy.attempts => {
                debug!(
                    contract = %request.name,
                    attempt,
                    "explorer has no bytecode yet, retrying in {:?}", policy.interval
                );
                sleep(policy.interval).await;
                attempt += 1;
                continue;
            }
            VerifyStatus::NotYetIndexed => {
                warn!(
                    contract = %request.name,
                    address = ?request.address,
                    attempts = attempt,
                    "explorer never indexed the bytecode, giving up on verification"
                );
            }
            VerifyStatus::Failed(reason) => {
                warn!(contract = %request.name, address = ?request.address, "verification failed: {}", reason);
            }
        }
        return status;
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::Mutex,
    };

    use serde_json::json;
    use tracing_test::traced_test;

    use super::*;

    const FAST: RetryPolicy = RetryPolicy::new(4, Duration::from_millis(1));

    /// Answers with a scripted sequence of statuses.
    struct Scripted {
        answers: Mutex<VecDeque<Result<VerifyStatus>>>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(answers: Vec<Result<VerifyStatus>>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Verifier for Scripted {
        async fn submit(&self, _: &VerifyRequest) -> Result<VerifyStatus> {
            *self.calls.lock().unwrap() += 1;
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(VerifyStatus::NotYetIndexed))
        }
    }

    fn request() -> VerifyRequest {
        VerifyRequest {
            name: "Widget".to_string(),
            fully_qualified_name: "contracts/Widget.sol:Widget".to_string(),
            address: Address::repeat_byte(0x11),
            constructor_args: Bytes::from(vec![0x01, 0x02]),
            libraries: BTreeMap::new(),
            build_info: BuildInfo {
                solc_long_version: "0.8.21+commit.d9974bed".to_string(),
                input: json!({"language": "Solidity"}),
            },
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("1", "OK", "guid"), VerifyStatus::Submitted);
        assert_eq!(
            classify("0", "NOTOK", "Contract source code already verified"),
            VerifyStatus::AlreadyVerified
        );
        assert_eq!(
            classify("0", "NOTOK", "Unable to locate ContractCode at 0x11"),
            VerifyStatus::NotYetIndexed
        );
        assert_eq!(
            classify("0", "NOTOK", "Invalid API Key"),
            VerifyStatus::Failed("NOTOK: Invalid API Key".to_string())
        );
        assert_eq!(hex_without_prefix(&Bytes::from(vec![0xab, 0x01])), "ab01");
    }

    #[tokio::test]
    async fn test_retries_until_indexed() {
        let verifier = Scripted::new(vec![
            Ok(VerifyStatus::NotYetIndexed),
            Ok(VerifyStatus::NotYetIndexed),
            Ok(VerifyStatus::Submitted),
        ]);
        assert_eq!(
            verify_with_retry(&verifier, &request(), FAST).await,
            VerifyStatus::Submitted
        );
        assert_eq!(verifier.calls(), 3);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_gives_up_after_bounded_attempts() {
        let verifier = Scripted::new(Vec::new());
        assert_eq!(
            verify_with_retry(&verifier, &request(), FAST).await,
            VerifyStatus::NotYetIndexed
        );
        assert_eq!(verifier.calls(), FAST.attempts);
        assert!(logs_contain("giving up on verification"));
    }

    #[traced_test]
    #[tokio::test]
    async fn test_failures_are_not_retried() {
        let verifier = Scripted::new(vec![Err(eyre!("connection refused"))]);
        let status = verify_with_retry(&verifier, &request(), FAST).await;
        assert_eq!(status, VerifyStatus::Failed("connection refused".to_string()));
        assert_eq!(verifier.calls(), 1);
        assert!(logs_contain("verification failed"));

        let verifier = Scripted::new(vec![Ok(VerifyStatus::AlreadyVerified)]);
        assert_eq!(
            verify_with_retry(&verifier, &request(), FAST).await,
            VerifyStatus::AlreadyVerified
        );
        assert_eq!(verifier.calls(), 1);
    }
}
