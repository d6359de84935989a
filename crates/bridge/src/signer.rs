//! Signer adapter between a chain-native signer and the bridge.
//!
//! The bridge layers build [`UnsignedTransaction`]s and never touch keys.
//! A [`SignOnlySigner`] turns a batch of them into raw signed
//! transactions; [`EvmSignerAdapter`] provides that capability for any
//! alloy [`TxSigner`] (local private key, hardware wallet, remote MPC
//! signer, ...).

use alloy::consensus::{SignableTransaction, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSigner;
use alloy::primitives::{Bytes, TxHash};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::Signature;
use async_trait::async_trait;
use tracing::debug;

use crate::address::ChainAddress;
use crate::chain::Chain;

#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("transaction {index} ({description}) targets {actual}, signer is for {expected}")]
    WrongChain {
        index: usize,
        description: String,
        expected: Chain,
        actual: Chain,
    },
    #[error("transaction {index} ({description}) is missing fields required for signing")]
    IncompleteTransaction { index: usize, description: String },
    #[error("signer rejected transaction {index} ({description}): {source}")]
    Signing {
        index: usize,
        description: String,
        #[source]
        source: alloy::signers::Error,
    },
}

/// A transaction built by the bridge, waiting for a signature.
#[derive(Debug, Clone)]
pub struct UnsignedTransaction {
    pub chain: Chain,
    /// Short label used in logs, e.g. `"TokenBridge.transferTokens"`.
    pub description: String,
    pub request: TransactionRequest,
}

impl UnsignedTransaction {
    pub fn new(chain: Chain, description: impl Into<String>, request: TransactionRequest) -> Self {
        Self {
            chain,
            description: description.into(),
            request,
        }
    }
}

/// A signed, EIP-2718 encoded transaction ready for broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub chain: Chain,
    pub hash: TxHash,
    pub raw: Bytes,
}

/// Signing capability the bridge depends on.
#[async_trait]
pub trait SignOnlySigner: Send + Sync {
    /// Chain this signer produces signatures for.
    fn chain(&self) -> Chain;

    /// Account that will pay for and sign the transactions.
    fn address(&self) -> ChainAddress;

    /// Signs every transaction in order.
    ///
    /// Either all transactions are signed or an error is returned; a
    /// partially signed batch is never handed back.
    async fn sign(
        &self,
        transactions: Vec<UnsignedTransaction>,
    ) -> Result<Vec<SignedTransaction>, SignerError>;
}

/// Adapts an alloy [`TxSigner`] to [`SignOnlySigner`].
pub struct EvmSignerAdapter<S> {
    signer: S,
    chain: Chain,
}

impl<S> EvmSignerAdapter<S> {
    pub const fn new(signer: S, chain: Chain) -> Self {
        Self { signer, chain }
    }
}

impl<S> std::fmt::Debug for EvmSignerAdapter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmSignerAdapter")
            .field("signer", &"<TxSigner>")
            .field("chain", &self.chain)
            .finish()
    }
}

#[async_trait]
impl<S> SignOnlySigner for EvmSignerAdapter<S>
where
    S: TxSigner<Signature> + Send + Sync,
{
    fn chain(&self) -> Chain {
        self.chain
    }

    fn address(&self) -> ChainAddress {
        ChainAddress::evm(self.chain, self.signer.address())
    }

    async fn sign(
        &self,
        transactions: Vec<UnsignedTransaction>,
    ) -> Result<Vec<SignedTransaction>, SignerError> {
        let mut signed = Vec::with_capacity(transactions.len());

        for (index, unsigned) in transactions.into_iter().enumerate() {
            let UnsignedTransaction {
                chain,
                description,
                request,
            } = unsigned;

            if chain != self.chain {
                return Err(SignerError::WrongChain {
                    index,
                    description,
                    expected: self.chain,
                    actual: chain,
                });
            }

            let Ok(mut tx) = request.build_typed_tx() else {
                return Err(SignerError::IncompleteTransaction { index, description });
            };

            let signature = match self.signer.sign_transaction(&mut tx).await {
                Ok(signature) => signature,
                Err(source) => {
                    return Err(SignerError::Signing {
                        index,
                        description,
                        source,
                    });
                }
            };

            let envelope = TxEnvelope::from(tx.into_signed(signature));
            let hash = *envelope.tx_hash();

            debug!(%hash, %chain, description, "Signed transaction");

            signed.push(SignedTransaction {
                chain,
                hash,
                raw: Bytes::from(envelope.encoded_2718()),
            });
        }

        Ok(signed)
    }
}
