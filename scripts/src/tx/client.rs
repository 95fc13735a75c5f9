use std::{future::IntoFuture, time::Duration};

use alloy::{
    hex,
    network::{Ethereum, EthereumWallet, TransactionBuilder},
    primitives::{Address, Bytes, TxHash, B256},
    providers::{
        fillers::{ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller, WalletFiller},
        Identity, Provider, ProviderBuilder, ReqwestProvider,
    },
    rpc::types::eth::TransactionRequest,
    signers::local::PrivateKeySigner,
};
use reqwest::{Client, Url};
use tokio::time::timeout;
use tracing::info;

use crate::errors::ScriptError;

/// Re-export from alloy recommend filter
type RecommendFiller =
    JoinFill<JoinFill<JoinFill<Identity, GasFiller>, NonceFiller>, ChainIdFiller>;

/// An alloy provider that uses a `PrivateKeySigner` to generate signatures
/// & interfaces with the RPC endpoint over HTTP
pub type RpcProvider = FillProvider<
    JoinFill<RecommendFiller, WalletFiller<EthereumWallet>>,
    ReqwestProvider,
    alloy::transports::http::Http<Client>,
    Ethereum,
>;

/// Outcome of a mined contract creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReceipt {
    pub tx_hash: TxHash,
    pub address: Address,
    pub block_number: Option<u64>,
}

/// The slice of the network the deployment needs.
///
/// Every call suspends until the node answered, implementations never keep
/// two requests in flight.
#[allow(async_fn_in_trait)]
pub trait ChainClient {
    /// Address of the signing account
    fn deployer(&self) -> Address;

    /// Current transaction count of the signing account
    async fn transaction_count(&self) -> Result<u64, ScriptError>;

    /// Send a contract creation with the given init code and nonce, then wait until it is mined
    async fn deploy(&self, init_code: Bytes, nonce: u64) -> Result<DeployReceipt, ScriptError>;

    /// Runtime code currently stored at `address`
    async fn code_at(&self, address: Address) -> Result<Bytes, ScriptError>;
}

/// [`ChainClient`] backed by an HTTP JSON-RPC endpoint
#[derive(Clone)]
pub struct RpcChainClient {
    provider: RpcProvider,
    deployer: Address,
}

/// Parse a hex encoded secp256k1 private key, with or without `0x` prefix
pub fn parse_signer(raw_key: &str) -> Result<PrivateKeySigner, ScriptError> {
    let trimmed = raw_key.trim();
    let bytes = hex::decode(trimmed.strip_prefix("0x").unwrap_or(trimmed))
        .map_err(|e| ScriptError::Credential(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(ScriptError::Credential(format!(
            "expected a 32 bytes private key, got {} bytes",
            bytes.len()
        )));
    }

    PrivateKeySigner::from_bytes(&B256::from_slice(&bytes))
        .map_err(|e| ScriptError::Credential(e.to_string()))
}

/// Sets up the signing client on the given RPC endpoint.
///
/// The key is checked before anything touches the network, then the chain id
/// is fetched so an unreachable endpoint fails here and not mid deployment.
/// An endpoint silent for longer than `limit` is a connection error.
pub async fn create_rpc_client(
    priv_key: &str,
    rpc_url: &str,
    limit: Duration,
) -> Result<RpcChainClient, ScriptError> {
    // Create our signer
    let signer = parse_signer(priv_key)?;
    let deployer = signer.address();
    let wallet = EthereumWallet::from(signer);

    // Create our provider with the rpc client + signer
    let provider = ProviderBuilder::new()
        .with_recommended_fillers()
        .wallet(wallet)
        .on_http(parse_rpc_url(rpc_url)?);

    // Fetch chain id
    let chain_id = within(limit, rpc_url, provider.get_chain_id()).await?;

    info!("Build client on chain ID: {} for deployer {}", chain_id, deployer);

    Ok(RpcChainClient { provider, deployer })
}

/// Transaction count of any account, without a signer
pub async fn fetch_transaction_count(
    rpc_url: &str,
    address: Address,
    limit: Duration,
) -> Result<u64, ScriptError> {
    let provider = ProviderBuilder::new().on_http(parse_rpc_url(rpc_url)?);
    within(limit, rpc_url, provider.get_transaction_count(address)).await
}

/// Await an rpc call, an error or no answer within `limit` being a connection error
async fn within<T, E, F>(limit: Duration, rpc_url: &str, call: F) -> Result<T, ScriptError>
where
    E: ToString,
    F: IntoFuture<Output = Result<T, E>>,
{
    match timeout(limit, call).await {
        Ok(res) => res.map_err(|e| ScriptError::Connection(e.to_string())),
        Err(_) => Err(ScriptError::Connection(format!(
            "no answer from {} after {:?}",
            rpc_url, limit
        ))),
    }
}

fn parse_rpc_url(rpc_url: &str) -> Result<Url, ScriptError> {
    rpc_url
        .parse::<Url>()
        .map_err(|e| ScriptError::Connection(format!("invalid rpc url {}: {}", rpc_url, e)))
}

impl ChainClient for RpcChainClient {
    fn deployer(&self) -> Address {
        self.deployer
    }

    async fn transaction_count(&self) -> Result<u64, ScriptError> {
        self.provider
            .get_transaction_count(self.deployer)
            .await
            .map_err(|e| ScriptError::Connection(e.to_string()))
    }

    async fn deploy(&self, init_code: Bytes, nonce: u64) -> Result<DeployReceipt, ScriptError> {
        // Pinning the nonce makes the node reject the creation if the account moved on
        let tx_request = TransactionRequest::default()
            .with_deploy_code(init_code)
            .with_nonce(nonce);

        // Send it
        let pending_tx = self
            .provider
            .send_transaction(tx_request)
            .await
            .map_err(|e| ScriptError::ContractDeployment(e.to_string()))?;
        let tx_hash = *pending_tx.tx_hash();
        info!("Pending deployment transaction... {}", tx_hash);

        // Wait for the transaction to be included.
        let receipt = pending_tx
            .get_receipt()
            .await
            .map_err(|e| ScriptError::ContractDeployment(e.to_string()))?;
        if !receipt.status() {
            return Err(ScriptError::ContractDeployment(format!(
                "creation transaction {} reverted",
                tx_hash
            )));
        }

        let address = receipt.contract_address.ok_or_else(|| {
            ScriptError::ContractDeployment(format!(
                "receipt of {} carries no contract address",
                tx_hash
            ))
        })?;

        Ok(DeployReceipt {
            tx_hash,
            address,
            block_number: receipt.block_number,
        })
    }

    async fn code_at(&self, address: Address) -> Result<Bytes, ScriptError> {
        self.provider
            .get_code_at(address)
            .await
            .map_err(|e| ScriptError::Connection(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;
    use tokio::net::TcpListener;

    use super::*;

    // Well known first hardhat / anvil dev account
    const DEV_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    const LIMIT: Duration = Duration::from_secs(5);

    /// Endpoint accepting connections without ever answering
    async fn silent_endpoint() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let url = format!("http://{}", listener.local_addr().expect("local addr"));
        (listener, url)
    }

    #[test]
    fn unit_parse_signer_accepts_prefixed_and_bare_keys() {
        let expected = address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266");
        assert_eq!(parse_signer(DEV_KEY).expect("bare").address(), expected);
        assert_eq!(
            parse_signer(&format!("0x{DEV_KEY}")).expect("prefixed").address(),
            expected
        );
    }

    #[test]
    fn regression_parse_signer_rejects_malformed_keys() {
        for raw in ["", "0x", "not-hex", "abcd", &format!("{DEV_KEY}00")] {
            let error = parse_signer(raw).expect_err("expected credential error");
            assert!(matches!(error, ScriptError::Credential(_)), "{raw}");
        }
    }

    #[tokio::test]
    async fn regression_bad_key_fails_before_touching_network() {
        // The url is unreachable, a credential error proves we never got there
        let error = create_rpc_client("zz", "http://127.0.0.1:1", LIMIT)
            .await
            .err()
            .expect("expected error");
        assert!(matches!(error, ScriptError::Credential(_)));
    }

    #[tokio::test]
    async fn regression_unreachable_endpoint_is_a_connection_error() {
        let error = create_rpc_client(DEV_KEY, "http://127.0.0.1:1", LIMIT)
            .await
            .err()
            .expect("expected error");
        assert!(matches!(error, ScriptError::Connection(_)));
    }

    #[tokio::test]
    async fn regression_invalid_url_is_a_connection_error() {
        let error = create_rpc_client(DEV_KEY, "not a url", LIMIT)
            .await
            .err()
            .expect("expected error");
        assert!(matches!(error, ScriptError::Connection(_)));
    }

    #[tokio::test]
    async fn regression_silent_endpoint_is_a_connection_error() {
        let (_listener, url) = silent_endpoint().await;
        let error = timeout(
            Duration::from_secs(5),
            create_rpc_client(DEV_KEY, &url, Duration::from_millis(200)),
        )
        .await
        .expect("client creation must not hang")
        .err()
        .expect("expected error");
        assert!(matches!(&error, ScriptError::Connection(msg) if msg.contains("no answer")));
    }

    #[tokio::test]
    async fn regression_silent_endpoint_nonce_lookup_is_a_connection_error() {
        let (_listener, url) = silent_endpoint().await;
        let error = timeout(
            Duration::from_secs(5),
            fetch_transaction_count(
                &url,
                address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266"),
                Duration::from_millis(200),
            ),
        )
        .await
        .expect("nonce lookup must not hang")
        .expect_err("expected error");
        assert!(matches!(error, ScriptError::Connection(_)));
    }
}
