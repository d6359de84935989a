//! Production [`NetworkConnector`] over public RPC endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use url::Url;

use crate::chain::{Chain, Network};
use crate::client::{BridgeError, ChainContext, ChainMap, NetworkConnector};
use crate::evm::{EvmChain, EvmContracts};
use crate::solana::{SolanaChain, SolanaPrograms};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthereumConfig {
    pub rpc_url: Url,
    pub contracts: EvmContracts,
}

impl EthereumConfig {
    /// Config using the canonical contracts for `network`.
    pub const fn new(network: Network, rpc_url: Url) -> Self {
        Self {
            rpc_url,
            contracts: EvmContracts::defaults(network),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolanaConfig {
    pub rpc_url: Url,
    pub programs: SolanaPrograms,
}

impl SolanaConfig {
    /// Config using the canonical programs for `network`.
    pub const fn new(network: Network, rpc_url: Url) -> Self {
        Self {
            rpc_url,
            programs: SolanaPrograms::defaults(network),
        }
    }
}

/// Chains to connect; an absent chain is simply not configured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainsConfig {
    pub ethereum: Option<EthereumConfig>,
    pub solana: Option<SolanaConfig>,
}

pub struct RpcConnector {
    http_client: reqwest::Client,
    chains: ChainsConfig,
}

impl RpcConnector {
    pub const fn new(http_client: reqwest::Client, chains: ChainsConfig) -> Self {
        Self {
            http_client,
            chains,
        }
    }
}

#[async_trait]
impl NetworkConnector for RpcConnector {
    async fn connect(&self, network: Network) -> Result<ChainMap, BridgeError> {
        let mut chains = ChainMap::new();

        if let Some(ethereum) = &self.chains.ethereum {
            let chain =
                EvmChain::connect(network, ethereum.rpc_url.clone(), ethereum.contracts).await?;
            chains.insert(Chain::Ethereum, Arc::new(chain) as Arc<dyn ChainContext>);
        }

        if let Some(solana) = &self.chains.solana {
            let chain = SolanaChain::connect(
                network,
                self.http_client.clone(),
                solana.rpc_url.clone(),
                solana.programs,
            )
            .await?;
            chains.insert(Chain::Solana, Arc::new(chain) as Arc<dyn ChainContext>);
        }

        info!(%network, configured = chains.len(), "Connected configured chains");
        Ok(chains)
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;

    use super::*;

    fn mock_ethereum(server: &MockServer, chain_id_hex: &str) {
        let chain_id_hex = chain_id_hex.to_string();
        server.mock(move |when, then| {
            when.method(POST).path("/eth").body_contains("eth_chainId");
            then.status(200).json_body(serde_json::json!({
                "jsonrpc": "2.0", "id": 0, "result": chain_id_hex
            }));
        });
    }

    fn mock_solana(server: &MockServer) {
        server.mock(|when, then| {
            when.method(POST).path("/sol").body_contains("getVersion");
            then.status(200).json_body(serde_json::json!({
                "jsonrpc": "2.0", "id": 1, "result": { "solana-core": "2.2.12" }
            }));
        });
    }

    fn config(server: &MockServer, network: Network) -> ChainsConfig {
        ChainsConfig {
            ethereum: Some(EthereumConfig::new(
                network,
                Url::parse(&server.url("/eth")).unwrap(),
            )),
            solana: Some(SolanaConfig::new(
                network,
                Url::parse(&server.url("/sol")).unwrap(),
            )),
        }
    }

    #[tokio::test]
    async fn connects_every_configured_chain() {
        let server = MockServer::start();
        mock_ethereum(&server, "0xaa36a7");
        mock_solana(&server);

        let connector = RpcConnector::new(reqwest::Client::new(), config(&server, Network::Testnet));
        let chains = connector.connect(Network::Testnet).await.unwrap();

        assert_eq!(
            chains.keys().copied().collect::<Vec<_>>(),
            vec![Chain::Ethereum, Chain::Solana]
        );
    }

    #[tokio::test]
    async fn skips_unconfigured_chains() {
        let server = MockServer::start();
        mock_solana(&server);

        let mut chains_config = config(&server, Network::Testnet);
        chains_config.ethereum = None;

        let chains = RpcConnector::new(reqwest::Client::new(), chains_config)
            .connect(Network::Testnet)
            .await
            .unwrap();

        assert!(chains.contains_key(&Chain::Solana));
        assert!(!chains.contains_key(&Chain::Ethereum));
    }

    #[tokio::test]
    async fn mainnet_config_against_testnet_rpc_fails() {
        let server = MockServer::start();
        mock_ethereum(&server, "0xaa36a7");
        mock_solana(&server);

        let err = RpcConnector::new(reqwest::Client::new(), config(&server, Network::Mainnet))
            .connect(Network::Mainnet)
            .await
            .unwrap_err();

        assert!(
            matches!(err, BridgeError::NetworkMismatch { expected: 1, actual: 11_155_111, .. }),
            "got {err:?}"
        );
    }
}
