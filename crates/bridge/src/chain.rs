//! Networks and chains supported by this deployment.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Bridge network environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Testnet,
    Mainnet,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Testnet => write!(f, "Testnet"),
            Self::Mainnet => write!(f, "Mainnet"),
        }
    }
}

/// Chains this storefront can pay from or into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Chain {
    Ethereum,
    Solana,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown chain: {name}")]
pub struct UnknownChain {
    pub name: String,
}

/// Wormhole chain id for Solana (same on every network).
const WORMHOLE_SOLANA: u16 = 1;
/// Wormhole chain id for Ethereum mainnet.
const WORMHOLE_ETHEREUM: u16 = 2;
/// Wormhole chain id for Sepolia, the testnet Ethereum.
const WORMHOLE_SEPOLIA: u16 = 10002;

/// EIP-155 chain id of Ethereum mainnet.
const ETHEREUM_MAINNET_CHAIN_ID: u64 = 1;
/// EIP-155 chain id of Sepolia.
const SEPOLIA_CHAIN_ID: u64 = 11_155_111;

/// CCTP domain identifier for Ethereum
const ETHEREUM_DOMAIN: u32 = 0;
/// CCTP domain identifier for Solana
const SOLANA_DOMAIN: u32 = 5;

impl Chain {
    pub const ALL: [Self; 2] = [Self::Ethereum, Self::Solana];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Ethereum => "Ethereum",
            Self::Solana => "Solana",
        }
    }

    pub const fn is_evm(self) -> bool {
        matches!(self, Self::Ethereum)
    }

    /// Chain id used by the Wormhole network to tag emitters and VAAs.
    pub const fn wormhole_id(self, network: Network) -> u16 {
        match (self, network) {
            (Self::Solana, _) => WORMHOLE_SOLANA,
            (Self::Ethereum, Network::Mainnet) => WORMHOLE_ETHEREUM,
            (Self::Ethereum, Network::Testnet) => WORMHOLE_SEPOLIA,
        }
    }

    /// Reverse of [`Chain::wormhole_id`].
    pub fn from_wormhole_id(id: u16, network: Network) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|chain| chain.wormhole_id(network) == id)
    }

    /// EIP-155 chain id, for EVM chains only.
    pub const fn evm_chain_id(self, network: Network) -> Option<u64> {
        match (self, network) {
            (Self::Ethereum, Network::Mainnet) => Some(ETHEREUM_MAINNET_CHAIN_ID),
            (Self::Ethereum, Network::Testnet) => Some(SEPOLIA_CHAIN_ID),
            (Self::Solana, _) => None,
        }
    }

    /// Circle CCTP domain for this chain.
    pub const fn cctp_domain(self) -> u32 {
        match self {
            Self::Ethereum => ETHEREUM_DOMAIN,
            Self::Solana => SOLANA_DOMAIN,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Chain {
    type Err = UnknownChain;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|chain| chain.name().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| UnknownChain {
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chain_names_case_insensitively() {
        assert_eq!("Ethereum".parse::<Chain>().unwrap(), Chain::Ethereum);
        assert_eq!("solana".parse::<Chain>().unwrap(), Chain::Solana);
        assert_eq!(" SOLANA ".parse::<Chain>().unwrap(), Chain::Solana);
    }

    #[test]
    fn rejects_unknown_chain_names() {
        let err = "Base".parse::<Chain>().unwrap_err();
        assert_eq!(
            err,
            UnknownChain {
                name: "Base".to_string()
            }
        );
    }

    #[test]
    fn wormhole_ids_round_trip_per_network() {
        for network in [Network::Testnet, Network::Mainnet] {
            for chain in Chain::ALL {
                let id = chain.wormhole_id(network);
                assert_eq!(Chain::from_wormhole_id(id, network), Some(chain));
            }
        }

        assert_eq!(Chain::Ethereum.wormhole_id(Network::Mainnet), 2);
        assert_eq!(Chain::Ethereum.wormhole_id(Network::Testnet), 10002);
        assert_eq!(Chain::from_wormhole_id(4, Network::Mainnet), None);
    }

    #[test]
    fn cctp_domains_match_circle_assignments() {
        assert_eq!(Chain::Ethereum.cctp_domain(), 0);
        assert_eq!(Chain::Solana.cctp_domain(), 5);
    }

    #[test]
    fn only_ethereum_has_an_evm_chain_id() {
        assert_eq!(Chain::Ethereum.evm_chain_id(Network::Testnet), Some(11_155_111));
        assert_eq!(Chain::Solana.evm_chain_id(Network::Mainnet), None);
    }
}
