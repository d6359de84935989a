use alloy::primitives::{Address, B256};
use alloy::signers::local::PrivateKeySigner;
use clap::Parser;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use url::Url;

use skinshop_bridge::cctp::default_iris_url;
use skinshop_bridge::evm::EvmContracts;
use skinshop_bridge::solana::SolanaPrograms;
use skinshop_bridge::wormhole::default_wormholescan_url;
use skinshop_bridge::{
    AddressError, AttestationPolicy, BridgeClient, Chain, ChainAddress, ChainsConfig,
    EthereumConfig, EvmSignerAdapter, IrisClient, Network, RpcConnector, SolanaConfig,
    WormholescanClient,
};

#[derive(Parser)]
pub struct Env {
    /// Path to plaintext TOML configuration file
    #[clap(long)]
    pub config: PathBuf,
    /// Hex-encoded secp256k1 key of the paying Ethereum wallet
    #[clap(long, env = "ETHEREUM_PRIVATE_KEY", hide_env_values = true)]
    pub ethereum_private_key: Option<B256>,
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Env")
            .field("config", &self.config)
            .field(
                "ethereum_private_key",
                &self.ethereum_private_key.map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl Env {
    /// Wallet that signs purchases, built from the configured private key.
    pub fn signer(&self) -> Result<EvmSignerAdapter<PrivateKeySigner>, ConfigError> {
        let key = self
            .ethereum_private_key
            .ok_or(ConfigError::MissingPrivateKey)?;
        let signer =
            PrivateKeySigner::from_bytes(&key).map_err(ConfigError::PrivateKeyDerivation)?;
        Ok(EvmSignerAdapter::new(signer, Chain::Ethereum))
    }
}

/// Settings deserialized from the plaintext config TOML.
#[derive(Deserialize)]
struct Config {
    network: Network,
    log_level: Option<LogLevel>,
    attestation_timeout_secs: Option<u64>,
    ethereum: Option<EthereumSection>,
    solana: Option<SolanaSection>,
    api: Option<ApiSection>,
}

/// Contract overrides default to the canonical deployments of the network.
#[derive(Deserialize)]
struct EthereumSection {
    rpc_url: Url,
    token_bridge: Option<Address>,
    core_bridge: Option<Address>,
    usdc: Option<Address>,
    token_messenger: Option<Address>,
    message_transmitter: Option<Address>,
}

#[derive(Deserialize)]
struct SolanaSection {
    rpc_url: Url,
    token_bridge: Option<String>,
    usdc_mint: Option<String>,
}

#[derive(Deserialize, Default)]
struct ApiSection {
    wormholescan: Option<Url>,
    circle: Option<Url>,
}

// ===== Runtime types (assembled from Config) =====

/// Runtime context for the CLI.
#[derive(Debug, Clone)]
pub struct Ctx {
    pub network: Network,
    pub log_level: LogLevel,
    pub attestation: AttestationPolicy,
    pub chains: ChainsConfig,
    pub wormholescan_url: Url,
    pub circle_url: Url,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(log_level: LogLevel) -> Self {
        match log_level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

impl From<&LogLevel> for Level {
    fn from(log_level: &LogLevel) -> Self {
        (*log_level).into()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML")]
    Toml(#[from] toml::de::Error),
    #[error("invalid default endpoint: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid address in config: {0}")]
    Address(#[from] AddressError),
    #[error("attestation_timeout_secs must be greater than zero")]
    ZeroAttestationTimeout,
    #[error("ETHEREUM_PRIVATE_KEY is required to sign purchases")]
    MissingPrivateKey,
    #[error("failed to derive address from ETHEREUM_PRIVATE_KEY")]
    PrivateKeyDerivation(#[source] alloy::signers::k256::ecdsa::Error),
}

impl Ctx {
    pub fn load_file(config: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(config)?;
        Self::from_toml(&config_str)
    }

    pub fn from_toml(config_toml: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(config_toml)?;
        let network = config.network;

        let attestation = match config.attestation_timeout_secs {
            Some(0) => return Err(ConfigError::ZeroAttestationTimeout),
            Some(secs) => AttestationPolicy::default().with_timeout(Duration::from_secs(secs)),
            None => AttestationPolicy::default(),
        };

        let chains = ChainsConfig {
            ethereum: config
                .ethereum
                .map(|section| assemble_ethereum(network, section)),
            solana: config
                .solana
                .map(|section| assemble_solana(network, section))
                .transpose()?,
        };

        let api = config.api.unwrap_or_default();
        let wormholescan_url = match api.wormholescan {
            Some(url) => url,
            None => Url::parse(default_wormholescan_url(network))?,
        };
        let circle_url = match api.circle {
            Some(url) => url,
            None => Url::parse(default_iris_url(network))?,
        };

        Ok(Self {
            network,
            log_level: config.log_level.unwrap_or(LogLevel::Info),
            attestation,
            chains,
            wormholescan_url,
            circle_url,
        })
    }

    /// Bridge client connecting the configured chains on first use.
    pub fn bridge_client(&self, http_client: reqwest::Client) -> BridgeClient {
        let connector = RpcConnector::new(http_client, self.chains.clone());
        BridgeClient::new(self.network, Arc::new(connector))
    }

    pub fn wormholescan(&self, http_client: reqwest::Client) -> WormholescanClient {
        WormholescanClient::new(http_client, self.wormholescan_url.clone())
    }

    pub fn iris(&self, http_client: reqwest::Client) -> IrisClient {
        IrisClient::new(http_client, self.circle_url.clone())
    }
}

fn assemble_ethereum(network: Network, section: EthereumSection) -> EthereumConfig {
    let defaults = EvmContracts::defaults(network);

    EthereumConfig {
        rpc_url: section.rpc_url,
        contracts: EvmContracts {
            token_bridge: section.token_bridge.unwrap_or(defaults.token_bridge),
            core_bridge: section.core_bridge.unwrap_or(defaults.core_bridge),
            usdc: section.usdc.unwrap_or(defaults.usdc),
            token_messenger: section.token_messenger.unwrap_or(defaults.token_messenger),
            message_transmitter: section
                .message_transmitter
                .unwrap_or(defaults.message_transmitter),
        },
    }
}

fn assemble_solana(network: Network, section: SolanaSection) -> Result<SolanaConfig, ConfigError> {
    let defaults = SolanaPrograms::defaults(network);
    let pubkey = |input: Option<String>| -> Result<Option<_>, AddressError> {
        input
            .map(|input| ChainAddress::parse(Chain::Solana, &input)?.as_solana())
            .transpose()
    };

    Ok(SolanaConfig {
        rpc_url: section.rpc_url,
        programs: SolanaPrograms {
            token_bridge: pubkey(section.token_bridge)?.unwrap_or(defaults.token_bridge),
            usdc_mint: pubkey(section.usdc_mint)?.unwrap_or(defaults.usdc_mint),
        },
    })
}

pub fn setup_tracing(log_level: &LogLevel) {
    let level: Level = log_level.into();
    let default_filter = format!("skinshop={level},skinshop_bridge={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}
