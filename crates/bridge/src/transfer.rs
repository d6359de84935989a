//! Transfer requests and quotes.

use alloy::primitives::{Bytes, U256};

use crate::address::{ChainAddress, TokenId};
use crate::chain::Chain;

/// The token bridge carries amounts with at most this many decimals.
pub const MAX_BRIDGE_DECIMALS: u8 = 8;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("source and destination are both on {chain}")]
    SameChain { chain: Chain },
    #[error("transfer amount must be greater than zero")]
    ZeroAmount,
    #[error("token {token} does not live on the source chain {source_chain}")]
    TokenNotOnSource { token: String, source_chain: Chain },
    #[error("native gas top-up requires automatic delivery")]
    NativeGasWithoutRelay,
    #[error("amount {amount} rounds to zero once normalized to {MAX_BRIDGE_DECIMALS} decimals")]
    DustOnly { amount: U256 },
}

/// Token bridge transfer of `amount` smallest units of `token`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    token: TokenId,
    amount: U256,
    from: ChainAddress,
    to: ChainAddress,
    automatic: bool,
    payload: Option<Bytes>,
    native_gas: Option<U256>,
}

impl TransferRequest {
    pub fn new(
        token: TokenId,
        amount: U256,
        from: ChainAddress,
        to: ChainAddress,
        automatic: bool,
    ) -> Result<Self, TransferError> {
        check_route(amount, &from, &to)?;

        if token.chain() != from.chain() {
            return Err(TransferError::TokenNotOnSource {
                token: token.to_string(),
                source_chain: from.chain(),
            });
        }

        Ok(Self {
            token,
            amount,
            from,
            to,
            automatic,
            payload: None,
            native_gas: None,
        })
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Bytes) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_native_gas(mut self, native_gas: U256) -> Result<Self, TransferError> {
        if !self.automatic {
            return Err(TransferError::NativeGasWithoutRelay);
        }

        self.native_gas = Some(native_gas);
        Ok(self)
    }

    pub const fn token(&self) -> &TokenId {
        &self.token
    }

    pub const fn amount(&self) -> U256 {
        self.amount
    }

    pub const fn from(&self) -> &ChainAddress {
        &self.from
    }

    pub const fn to(&self) -> &ChainAddress {
        &self.to
    }

    pub const fn automatic(&self) -> bool {
        self.automatic
    }

    pub const fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    pub const fn native_gas(&self) -> Option<U256> {
        self.native_gas
    }
}

/// Circle (CCTP) transfer of native USDC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircleTransferRequest {
    amount: U256,
    from: ChainAddress,
    to: ChainAddress,
    automatic: bool,
    payload: Option<Bytes>,
}

impl CircleTransferRequest {
    pub fn new(
        amount: U256,
        from: ChainAddress,
        to: ChainAddress,
        automatic: bool,
    ) -> Result<Self, TransferError> {
        check_route(amount, &from, &to)?;

        Ok(Self {
            amount,
            from,
            to,
            automatic,
            payload: None,
        })
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Bytes) -> Self {
        self.payload = Some(payload);
        self
    }

    pub const fn amount(&self) -> U256 {
        self.amount
    }

    pub const fn from(&self) -> &ChainAddress {
        &self.from
    }

    pub const fn to(&self) -> &ChainAddress {
        &self.to
    }

    pub const fn automatic(&self) -> bool {
        self.automatic
    }

    pub const fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }
}

fn check_route(amount: U256, from: &ChainAddress, to: &ChainAddress) -> Result<(), TransferError> {
    if from.chain() == to.chain() {
        return Err(TransferError::SameChain { chain: from.chain() });
    }

    if amount.is_zero() {
        return Err(TransferError::ZeroAmount);
    }

    Ok(())
}

/// Expected result of a transfer before it is submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferQuote {
    /// Amount debited on the source chain, in source token units.
    pub source_amount: U256,
    /// Amount that arrives on the destination chain.
    pub destination_amount: U256,
    /// Fee paid to an automatic relayer; zero for manual delivery.
    pub relay_fee: U256,
    /// Upper bound on the CCTP fast-transfer fee, if any.
    pub max_fee: Option<U256>,
}

impl TransferQuote {
    /// Quote for a manual token bridge transfer.
    ///
    /// The bridge truncates amounts to [`MAX_BRIDGE_DECIMALS`]; anything below
    /// that precision stays with the payer.
    pub fn token_bridge(amount: U256, decimals: u8) -> Result<Self, TransferError> {
        let destination_amount = denormalize(normalize(amount, decimals), decimals);

        if destination_amount.is_zero() {
            return Err(TransferError::DustOnly { amount });
        }

        Ok(Self {
            source_amount: destination_amount,
            destination_amount,
            relay_fee: U256::ZERO,
            max_fee: None,
        })
    }

    /// Quote for a CCTP fast transfer where at most `max_fee` is withheld.
    pub fn circle(amount: U256, max_fee: U256) -> Self {
        Self {
            source_amount: amount,
            destination_amount: amount.saturating_sub(max_fee),
            relay_fee: U256::ZERO,
            max_fee: Some(max_fee),
        }
    }
}

/// Scales `amount` from `decimals` down to the bridge's wire precision.
pub fn normalize(amount: U256, decimals: u8) -> U256 {
    if decimals > MAX_BRIDGE_DECIMALS {
        amount / U256::from(10).pow(U256::from(decimals - MAX_BRIDGE_DECIMALS))
    } else {
        amount
    }
}

/// Scales a wire amount back to `decimals`.
pub fn denormalize(amount: U256, decimals: u8) -> U256 {
    if decimals > MAX_BRIDGE_DECIMALS {
        amount * U256::from(10).pow(U256::from(decimals - MAX_BRIDGE_DECIMALS))
    } else {
        amount
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const TOKEN: &str = "0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238";
    const PAYER: &str = "0xA0Cf798816D4b9b9866b5330EEa46a18382f251e";
    const RECIPIENT: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";

    fn endpoints() -> (TokenId, ChainAddress, ChainAddress) {
        (
            TokenId::parse(Chain::Ethereum, TOKEN).unwrap(),
            ChainAddress::parse(Chain::Ethereum, PAYER).unwrap(),
            ChainAddress::parse(Chain::Solana, RECIPIENT).unwrap(),
        )
    }

    #[test]
    fn accepts_cross_chain_positive_transfer() {
        let (token, from, to) = endpoints();

        let request = TransferRequest::new(token, U256::from(500_000), from, to, false).unwrap();

        assert_eq!(request.amount(), U256::from(500_000));
        assert_eq!(request.from().chain(), Chain::Ethereum);
        assert_eq!(request.to().chain(), Chain::Solana);
        assert!(!request.automatic());
        assert!(request.payload().is_none());
        assert!(request.native_gas().is_none());
    }

    #[test]
    fn rejects_same_chain_transfer() {
        let (token, from, _) = endpoints();

        let err = TransferRequest::new(token, U256::from(1), from, from, false).unwrap_err();
        assert_eq!(
            err,
            TransferError::SameChain {
                chain: Chain::Ethereum
            }
        );
    }

    #[test]
    fn rejects_zero_amount() {
        let (token, from, to) = endpoints();

        let err = TransferRequest::new(token, U256::ZERO, from, to, false).unwrap_err();
        assert_eq!(err, TransferError::ZeroAmount);

        let err = CircleTransferRequest::new(U256::ZERO, from, to, false).unwrap_err();
        assert_eq!(err, TransferError::ZeroAmount);
    }

    #[test]
    fn rejects_token_from_destination_chain() {
        let (_, from, to) = endpoints();
        let solana_token = TokenId::parse(Chain::Solana, RECIPIENT).unwrap();

        let err = TransferRequest::new(solana_token, U256::from(1), from, to, false).unwrap_err();
        assert!(matches!(err, TransferError::TokenNotOnSource { .. }));
    }

    #[test]
    fn native_gas_needs_automatic_delivery() {
        let (token, from, to) = endpoints();

        let manual = TransferRequest::new(token, U256::from(1), from, to, false).unwrap();
        assert_eq!(
            manual.with_native_gas(U256::from(10)).unwrap_err(),
            TransferError::NativeGasWithoutRelay
        );

        let automatic = TransferRequest::new(token, U256::from(1), from, to, true)
            .unwrap()
            .with_native_gas(U256::from(10))
            .unwrap();
        assert_eq!(automatic.native_gas(), Some(U256::from(10)));
    }

    #[test]
    fn six_decimal_token_quote_is_lossless() {
        let quote = TransferQuote::token_bridge(U256::from(500_000), 6).unwrap();

        assert_eq!(quote.source_amount, U256::from(500_000));
        assert_eq!(quote.destination_amount, U256::from(500_000));
        assert_eq!(quote.relay_fee, U256::ZERO);
    }

    #[test]
    fn eighteen_decimal_token_quote_drops_dust() {
        let amount = U256::from(1_234_567_891_234_567_891u64);

        let quote = TransferQuote::token_bridge(amount, 18).unwrap();

        assert_eq!(
            quote.destination_amount,
            U256::from(1_234_567_890_000_000_000u64)
        );
    }

    #[test]
    fn dust_only_transfer_is_rejected() {
        let err = TransferQuote::token_bridge(U256::from(999), 18).unwrap_err();
        assert_eq!(
            err,
            TransferError::DustOnly {
                amount: U256::from(999)
            }
        );
    }

    #[test]
    fn circle_quote_withholds_max_fee() {
        let quote = TransferQuote::circle(U256::from(1_000_000), U256::from(100));

        assert_eq!(quote.destination_amount, U256::from(999_900));
        assert_eq!(quote.max_fee, Some(U256::from(100)));
    }

    proptest! {
        #[test]
        fn normalization_never_increases_amount(amount in any::<u128>(), decimals in 0u8..=18) {
            let amount = U256::from(amount);
            let round_trip = denormalize(normalize(amount, decimals), decimals);

            prop_assert!(round_trip <= amount);
            if decimals <= MAX_BRIDGE_DECIMALS {
                prop_assert_eq!(round_trip, amount);
            }
        }
    }
}
