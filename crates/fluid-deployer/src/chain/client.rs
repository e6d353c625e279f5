use std::{sync::Arc, time::Duration};

use ethers::{
    core::utils::Anvil,
    middleware::{
        gas_escalator::{Frequency, GeometricGasPrice},
        GasEscalatorMiddleware, NonceManagerMiddleware, SignerMiddleware,
    },
    providers::{
        Http, HttpClientError, HttpRateLimitRetryPolicy, Middleware, Provider, RetryClient,
        RetryClientBuilder, RetryPolicy,
    },
    signers::Signer,
    utils::AnvilInstance,
};
use eyre::Result;
use tracing::info;

/// Retries rate limits and timeouts, plus load balanced nodes that haven't
/// seen the block a receipt came from yet.
#[derive(Debug, Default)]
struct LaggingNodeRetryPolicy(HttpRateLimitRetryPolicy);

impl LaggingNodeRetryPolicy {
    fn is_lagging_node(error: &HttpClientError) -> bool {
        error.to_string().contains("header not found")
    }
}

impl RetryPolicy<HttpClientError> for LaggingNodeRetryPolicy {
    fn should_retry(&self, error: &HttpClientError) -> bool {
        self.0.should_retry(error) || Self::is_lagging_node(error)
    }

    fn backoff_hint(&self, error: &HttpClientError) -> Option<Duration> {
        self.0
            .backoff_hint(error)
            .or_else(|| Self::is_lagging_node(error).then_some(Duration::from_millis(500)))
    }
}

/// The deployer's signing client. Gas prices are bumped every block a
/// transaction stays pending and nonces are tracked locally so queued
/// transactions can go out back to back.
pub type ChainClient<S> = NonceManagerMiddleware<
    SignerMiddleware<GasEscalatorMiddleware<Provider<RetryClient<Http>>>, S>,
>;

/// A connection to the network a run targets. Without an RPC URL a local
/// anvil node is spawned and kept alive for as long as the `Chain` lives.
pub struct Chain {
    provider: Provider<Http>,
    client_version: String,
    _maybe_anvil: Option<AnvilInstance>,
}

impl Chain {
    pub async fn connect(maybe_rpc_url: Option<String>) -> Result<Self> {
        let (provider, maybe_anvil) = match maybe_rpc_url {
            Some(rpc_url) => (Provider::<Http>::try_from(rpc_url)?, None),
            None => {
                let anvil = Anvil::new().spawn();
                info!(endpoint = %anvil.endpoint(), "spawned a local anvil node");
                (Provider::<Http>::try_from(anvil.endpoint())?, Some(anvil))
            }
        };
        let client_version = provider.client_version().await?;
        Ok(Self {
            provider,
            client_version,
            _maybe_anvil: maybe_anvil,
        })
    }

    /// A client that signs with `signer`.
    pub async fn client<S: Signer + 'static>(&self, signer: S) -> Result<Arc<ChainClient<S>>> {
        let retrying = RetryClientBuilder::default()
            .rate_limit_retries(10)
            .timeout_retries(3)
            .initial_backoff(Duration::from_millis(500))
            .build(
                self.provider.as_ref().clone(),
                Box::<LaggingNodeRetryPolicy>::default(),
            );
        let provider = Provider::new(retrying).interval(Duration::from_secs(1));
        let escalated = GasEscalatorMiddleware::new(
            provider,
            GeometricGasPrice::new(1.125, 60u64, None::<u64>),
            Frequency::PerBlock,
        );
        let signed = SignerMiddleware::new_with_provider_chain(escalated, signer).await?;
        let address = signed.address();
        Ok(Arc::new(NonceManagerMiddleware::new(signed, address)))
    }

    pub fn is_anvil(&self) -> bool {
        self.client_version.contains("anvil")
    }
}
