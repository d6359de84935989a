//! Cross-chain transfers from Ethereum to Solana.
//!
//! Two routes are supported:
//!
//! - **Token bridge**: lock on Ethereum, wait for the guardian network to
//!   sign a VAA, redeem the wrapped token on Solana.
//! - **Circle transfer** (CCTP V2): burn native USDC on Ethereum, wait for
//!   Circle's attestation, mint native USDC on Solana.
//!
//! Keys never enter this crate. Chain contexts build unsigned transactions
//! and a [`SignOnlySigner`] signs them. Enable the `mock` feature for test
//! doubles of every external seam.

pub mod address;
pub mod attestation;
pub mod cctp;
pub mod chain;
pub mod client;
pub mod connector;
pub mod evm;
pub mod signer;
pub mod solana;
pub mod transfer;
pub mod wormhole;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use address::{AddressError, ChainAddress, TokenId, UniversalAddress};
pub use attestation::{AttestationError, AttestationPolicy, DEFAULT_ATTESTATION_TIMEOUT};
pub use cctp::{CircleAttestation, CircleAttestationSource, CircleMessage, IrisClient};
pub use chain::{Chain, Network, UnknownChain};
pub use client::{
    BridgeClient, BridgeError, ChainContext, ChainMap, CircleBridge, NetworkConnector, Redeemer,
    TokenBridge,
};
pub use connector::{ChainsConfig, EthereumConfig, RpcConnector, SolanaConfig};
pub use signer::{EvmSignerAdapter, SignOnlySigner, SignedTransaction, SignerError, UnsignedTransaction};
pub use transfer::{CircleTransferRequest, TransferError, TransferQuote, TransferRequest};
pub use wormhole::{AttestationSource, MessageId, Vaa, WormholescanClient};
