/// Fixed-interval retries for transient provider errors.
use std::{future::Future, time::Duration};

use eyre::Result;
use tokio::time::sleep;
use tracing::warn;

use crate::constants::{FEE_RETRIES, FEE_RETRY_TIME, VERIFY_RETRIES, VERIFY_RETRY_TIME};

/// How many times to try an operation and how long to wait in between.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub interval: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: usize, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    pub const fn fee() -> Self {
        Self::new(FEE_RETRIES, FEE_RETRY_TIME)
    }

    pub const fn verification() -> Self {
        Self::new(VERIFY_RETRIES, VERIFY_RETRY_TIME)
    }
}

/// Providers word this differently, but they all mean the transaction's max
/// fee fell below the block's base fee while it was being built.
pub fn is_fee_too_low(error: &eyre::Report) -> bool {
    let message = format!("{:#}", error).to_lowercase();
    message.contains("max fee per gas less than block base fee")
        || message.contains("max fee too low")
        || message.contains("fee too low")
        || message.contains("transaction underpriced")
}

/// Runs `op` until it succeeds, retrying fee-too-low failures up to
/// `policy.attempts` times in total. Any other error propagates immediately.
pub async fn retry_on_fee_too_low<T, F, Fut>(step: &str, policy: RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if is_fee_too_low(&error) && attempt < policy.attempts => {
                warn!(
                    step,
                    attempt,
                    "max fee too low, retrying in {:?}", policy.interval
                );
                sleep(policy.interval).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
