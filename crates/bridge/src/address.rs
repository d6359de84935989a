//! Chain-scoped account and token identifiers.
//!
//! Every party and asset in a purchase is named by a `(chain, address)`
//! pair. The native address keeps its chain-specific form (20-byte EVM
//! address or 32-byte Solana public key) and converts to the bridge-wide
//! 32-byte [`UniversalAddress`] when it has to cross chains.

use std::fmt;
use std::str::FromStr;

use alloy::primitives::{Address, FixedBytes};
use solana_sdk::pubkey::Pubkey;

use crate::chain::Chain;

#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("invalid {chain} address {input:?}: {reason}")]
    Malformed {
        chain: Chain,
        input: String,
        reason: String,
    },
    #[error("{address} is a {actual} address, expected {expected}")]
    ChainMismatch {
        address: String,
        expected: Chain,
        actual: Chain,
    },
    #[error("universal address {address} is not a valid EVM address: upper 12 bytes are non-zero")]
    NotEvm { address: UniversalAddress },
}

/// 32-byte address encoding shared by every chain on the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniversalAddress(pub FixedBytes<32>);

impl UniversalAddress {
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0.0
    }

    /// Recovers the 20-byte EVM address, failing if the padding is not zero.
    pub fn to_evm(&self) -> Result<Address, AddressError> {
        let (padding, address) = self.0.split_at(12);

        if padding.iter().any(|&byte| byte != 0) {
            return Err(AddressError::NotEvm { address: *self });
        }

        Ok(Address::from_slice(address))
    }

    pub fn to_solana(&self) -> Pubkey {
        Pubkey::new_from_array(self.0.0)
    }
}

impl From<Address> for UniversalAddress {
    fn from(address: Address) -> Self {
        Self(FixedBytes::left_padding_from(address.as_slice()))
    }
}

impl From<Pubkey> for UniversalAddress {
    fn from(pubkey: Pubkey) -> Self {
        Self(FixedBytes::from(pubkey.to_bytes()))
    }
}

impl fmt::Display for UniversalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Native address in the chain's own format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeAddress {
    Evm(Address),
    Solana(Pubkey),
}

impl NativeAddress {
    pub fn parse(chain: Chain, input: &str) -> Result<Self, AddressError> {
        let trimmed = input.trim();
        let malformed = |reason: String| AddressError::Malformed {
            chain,
            input: input.to_string(),
            reason,
        };

        match chain {
            Chain::Ethereum => Address::from_str(trimmed)
                .map(Self::Evm)
                .map_err(|err| malformed(err.to_string())),
            Chain::Solana => Pubkey::from_str(trimmed)
                .map(Self::Solana)
                .map_err(|err| malformed(err.to_string())),
        }
    }

    pub const fn chain(&self) -> Chain {
        match self {
            Self::Evm(_) => Chain::Ethereum,
            Self::Solana(_) => Chain::Solana,
        }
    }

    pub fn to_universal(&self) -> UniversalAddress {
        match self {
            Self::Evm(address) => (*address).into(),
            Self::Solana(pubkey) => (*pubkey).into(),
        }
    }
}

impl fmt::Display for NativeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Evm(address) => write!(f, "{address}"),
            Self::Solana(pubkey) => write!(f, "{pubkey}"),
        }
    }
}

/// An account on a specific chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainAddress {
    chain: Chain,
    address: NativeAddress,
}

impl ChainAddress {
    pub fn parse(chain: Chain, input: &str) -> Result<Self, AddressError> {
        let address = NativeAddress::parse(chain, input)?;
        Ok(Self { chain, address })
    }

    pub fn evm(chain: Chain, address: Address) -> Self {
        debug_assert!(chain.is_evm());
        Self {
            chain,
            address: NativeAddress::Evm(address),
        }
    }

    pub const fn solana(pubkey: Pubkey) -> Self {
        Self {
            chain: Chain::Solana,
            address: NativeAddress::Solana(pubkey),
        }
    }

    pub const fn chain(&self) -> Chain {
        self.chain
    }

    pub const fn address(&self) -> &NativeAddress {
        &self.address
    }

    pub fn universal(&self) -> UniversalAddress {
        self.address.to_universal()
    }

    pub fn as_evm(&self) -> Result<Address, AddressError> {
        match self.address {
            NativeAddress::Evm(address) => Ok(address),
            NativeAddress::Solana(_) => Err(self.mismatch(Chain::Ethereum)),
        }
    }

    pub fn as_solana(&self) -> Result<Pubkey, AddressError> {
        match self.address {
            NativeAddress::Solana(pubkey) => Ok(pubkey),
            NativeAddress::Evm(_) => Err(self.mismatch(Chain::Solana)),
        }
    }

    fn mismatch(&self, expected: Chain) -> AddressError {
        AddressError::ChainMismatch {
            address: self.address.to_string(),
            expected,
            actual: self.chain,
        }
    }
}

impl fmt::Display for ChainAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain, self.address)
    }
}

/// A token on the chain where its contract (or mint) lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenId(ChainAddress);

impl TokenId {
    pub fn parse(chain: Chain, input: &str) -> Result<Self, AddressError> {
        ChainAddress::parse(chain, input).map(Self)
    }

    pub const fn new(address: ChainAddress) -> Self {
        Self(address)
    }

    pub const fn chain(&self) -> Chain {
        self.0.chain()
    }

    pub const fn address(&self) -> &ChainAddress {
        &self.0
    }

    pub fn universal(&self) -> UniversalAddress {
        self.0.universal()
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;
    use proptest::prelude::*;

    use super::*;

    const SOLANA_OWNER: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";

    #[test]
    fn parses_evm_address_with_and_without_prefix() {
        let with_prefix =
            ChainAddress::parse(Chain::Ethereum, "0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238")
                .unwrap();
        let without_prefix =
            ChainAddress::parse(Chain::Ethereum, "1c7d4b196cb0c7b01d743fbc6116a902379c7238")
                .unwrap();

        assert_eq!(with_prefix, without_prefix);
        assert_eq!(
            with_prefix.as_evm().unwrap(),
            address!("0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238")
        );
    }

    #[test]
    fn parses_solana_public_key() {
        let owner = ChainAddress::parse(Chain::Solana, SOLANA_OWNER).unwrap();

        assert_eq!(owner.chain(), Chain::Solana);
        assert_eq!(owner.as_solana().unwrap().to_string(), SOLANA_OWNER);
    }

    #[test]
    fn rejects_malformed_addresses() {
        let short_evm = ChainAddress::parse(Chain::Ethereum, "0x1234").unwrap_err();
        assert!(
            matches!(short_evm, AddressError::Malformed { chain: Chain::Ethereum, .. }),
            "got {short_evm:?}"
        );

        let evm_as_solana =
            ChainAddress::parse(Chain::Solana, "0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238")
                .unwrap_err();
        assert!(
            matches!(evm_as_solana, AddressError::Malformed { chain: Chain::Solana, .. }),
            "got {evm_as_solana:?}"
        );

        let empty = ChainAddress::parse(Chain::Solana, "").unwrap_err();
        assert!(matches!(empty, AddressError::Malformed { .. }));
    }

    #[test]
    fn accessor_for_wrong_chain_reports_mismatch() {
        let owner = ChainAddress::parse(Chain::Solana, SOLANA_OWNER).unwrap();

        let err = owner.as_evm().unwrap_err();
        assert!(matches!(
            err,
            AddressError::ChainMismatch {
                expected: Chain::Ethereum,
                actual: Chain::Solana,
                ..
            }
        ));
    }

    #[test]
    fn non_zero_padding_is_not_an_evm_address() {
        let owner = ChainAddress::parse(Chain::Solana, SOLANA_OWNER).unwrap();

        assert!(matches!(
            owner.universal().to_evm(),
            Err(AddressError::NotEvm { .. })
        ));
    }

    proptest! {
        #[test]
        fn evm_addresses_survive_universal_encoding(bytes in any::<[u8; 20]>()) {
            let address = Address::from(bytes);
            let universal = UniversalAddress::from(address);

            prop_assert!(universal.as_bytes()[..12].iter().all(|&b| b == 0));
            prop_assert_eq!(universal.to_evm().unwrap(), address);
        }

        #[test]
        fn solana_keys_survive_universal_encoding(bytes in any::<[u8; 32]>()) {
            let pubkey = Pubkey::new_from_array(bytes);
            let universal = UniversalAddress::from(pubkey);

            prop_assert_eq!(universal.to_solana(), pubkey);
        }
    }
}
