//! `skinshop-cli` commands.

use clap::{Parser, Subcommand};
use std::io::Write;
use std::sync::Arc;
use tracing::info;

use skinshop_bridge::evm::EvmContracts;
use skinshop_bridge::{BridgeClient, Chain, ChainAddress, TokenId};

use crate::config::{Ctx, Env};
use crate::purchase::{PurchaseOrchestrator, PurchaseOutcome};
use crate::skins;

#[derive(Debug, Parser)]
#[command(name = "skinshop-cli")]
#[command(about = "Buy rifle skins on Solana with tokens paid from Ethereum")]
#[command(version)]
pub struct CliEnv {
    #[clap(flatten)]
    pub env: Env,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List the skins for sale
    Skins,
    /// Pay for a skin through the token bridge
    Purchase {
        /// Skin id from `skins`
        #[arg(long)]
        skin: u32,
        /// Solana address that receives the payment
        #[arg(long)]
        sol: String,
        /// ERC20 to pay with (defaults to the configured USDC)
        #[arg(long)]
        token: Option<String>,
    },
    /// Pay for a skin in native USDC through a Circle fast transfer
    PurchaseCctp {
        /// Skin id from `skins`
        #[arg(long)]
        skin: u32,
        /// Solana address that receives the payment
        #[arg(long)]
        sol: String,
    },
    /// Show a token balance on any configured chain
    Balance {
        /// Chain name, e.g. ethereum or solana
        #[arg(long)]
        chain: String,
        /// Token address on that chain
        #[arg(long)]
        token: String,
        /// Owner address on that chain
        #[arg(long)]
        owner: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("purchase of skin {skin} failed")]
    PurchaseFailed { skin: u32 },
}

pub async fn run_command(ctx: Ctx, env: &Env, command: Commands) -> anyhow::Result<()> {
    run_command_with_writers(ctx, env, command, &mut std::io::stdout()).await
}

async fn run_command_with_writers<W: Write>(
    ctx: Ctx,
    env: &Env,
    command: Commands,
    stdout: &mut W,
) -> anyhow::Result<()> {
    let http_client = reqwest::Client::new();

    match command {
        Commands::Skins => {
            for skin in skins::catalog() {
                writeln!(stdout, "{skin}")?;
            }
        }
        Commands::Purchase { skin, sol, token } => {
            let skin = skins::find(skin)?;
            let signer = env.signer()?;
            let token = match token {
                Some(token) => TokenId::parse(Chain::Ethereum, &token)?,
                None => default_usdc(&ctx),
            };

            let client = Arc::new(ctx.bridge_client(http_client.clone()));
            let decimals = client
                .get_chain_context(Chain::Ethereum)
                .await?
                .token_bridge()
                .decimals(&token)
                .await?;
            let price = skin.price_in_smallest_unit(decimals)?;
            info!(%skin, %token, %price, "Purchasing skin through the token bridge");

            let payer = signer_address(&signer);
            let outcome = orchestrator(&ctx, client, &http_client)
                .purchase_skin_with_cross_chain_payment(
                    price,
                    &payer,
                    &sol,
                    &signer,
                    &token.address().to_string(),
                )
                .await;
            report(stdout, skin.id, outcome)?;
        }
        Commands::PurchaseCctp { skin, sol } => {
            let skin = skins::find(skin)?;
            let signer = env.signer()?;
            // Native USDC has 6 decimals on every CCTP domain.
            let price = skin.price_in_smallest_unit(6)?;
            info!(%skin, %price, "Purchasing skin through a Circle transfer");

            let client = Arc::new(ctx.bridge_client(http_client.clone()));
            let payer = signer_address(&signer);
            let outcome = orchestrator(&ctx, client, &http_client)
                .purchase_skin_with_cctp(price, &payer, &sol, &signer)
                .await;
            report(stdout, skin.id, outcome)?;
        }
        Commands::Balance {
            chain,
            token,
            owner,
        } => {
            let chain: Chain = chain.parse()?;
            let token = TokenId::parse(chain, &token)?;
            let owner = ChainAddress::parse(chain, &owner)?;

            let client = ctx.bridge_client(http_client);
            let balance = client.token_balance(&token, &owner).await?;
            writeln!(stdout, "{balance}")?;
        }
    }

    Ok(())
}

fn default_usdc(ctx: &Ctx) -> TokenId {
    let usdc = ctx.chains.ethereum.as_ref().map_or_else(
        || EvmContracts::defaults(ctx.network).usdc,
        |ethereum| ethereum.contracts.usdc,
    );
    TokenId::new(ChainAddress::evm(Chain::Ethereum, usdc))
}

fn signer_address(signer: &dyn skinshop_bridge::SignOnlySigner) -> String {
    signer.address().address().to_string()
}

fn orchestrator(
    ctx: &Ctx,
    client: Arc<BridgeClient>,
    http_client: &reqwest::Client,
) -> PurchaseOrchestrator {
    PurchaseOrchestrator::new(
        client,
        Arc::new(ctx.wormholescan(http_client.clone())),
        Arc::new(ctx.iris(http_client.clone())),
        ctx.attestation,
    )
}

fn report<W: Write>(stdout: &mut W, skin: u32, outcome: PurchaseOutcome) -> anyhow::Result<()> {
    match outcome {
        PurchaseOutcome::Settled => writeln!(stdout, "Skin {skin} purchased and settled")?,
        PurchaseOutcome::SettlementIncomplete => writeln!(
            stdout,
            "Skin {skin} purchased; payment attested and awaiting redemption on Solana"
        )?,
        PurchaseOutcome::Failed => return Err(CliError::PurchaseFailed { skin }.into()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use std::path::PathBuf;

    use super::*;
    use crate::skins::SkinError;

    fn env() -> Env {
        Env {
            config: PathBuf::from("skinshop.toml"),
            ethereum_private_key: None,
        }
    }

    fn ctx_with_solana(rpc_url: &str) -> Ctx {
        Ctx::from_toml(&format!(
            r#"
            network = "testnet"
            [solana]
            rpc_url = "{rpc_url}"
            "#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn skins_prints_catalog() {
        let mut stdout = Vec::new();

        run_command_with_writers(ctx_with_solana("http://localhost:8899"), &env(), Commands::Skins, &mut stdout)
            .await
            .unwrap();

        let output = String::from_utf8(stdout).unwrap();
        assert_eq!(output.lines().count(), 8);
        assert!(output.contains("#1 Dragon's Breath (0.50)"));
    }

    #[tokio::test]
    async fn unknown_skin_fails_before_signing() {
        let command = Commands::Purchase {
            skin: 42,
            sol: "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM".to_string(),
            token: None,
        };

        let err = run_command_with_writers(
            ctx_with_solana("http://localhost:8899"),
            &env(),
            command,
            &mut Vec::new(),
        )
        .await
        .unwrap_err();

        assert_eq!(
            err.downcast_ref::<SkinError>(),
            Some(&SkinError::UnknownSkin { id: 42 })
        );
    }

    #[tokio::test]
    async fn purchase_without_private_key_is_rejected() {
        let command = Commands::PurchaseCctp {
            skin: 1,
            sol: "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM".to_string(),
        };

        let err = run_command_with_writers(
            ctx_with_solana("http://localhost:8899"),
            &env(),
            command,
            &mut Vec::new(),
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("ETHEREUM_PRIVATE_KEY"));
    }

    #[tokio::test]
    async fn balance_queries_solana_rpc() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/").body_contains("getVersion");
            then.status(200).json_body(serde_json::json!({
                "jsonrpc": "2.0", "id": 1, "result": { "solana-core": "2.2.12" }
            }));
        });
        server.mock(|when, then| {
            when.method(POST).path("/").body_contains("getTokenAccountBalance");
            then.status(200).json_body(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {
                    "context": { "slot": 1 },
                    "value": { "amount": "500000", "decimals": 6, "uiAmountString": "0.5" }
                }
            }));
        });

        let command = Commands::Balance {
            chain: "solana".to_string(),
            token: "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU".to_string(),
            owner: "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM".to_string(),
        };
        let mut stdout = Vec::new();

        run_command_with_writers(ctx_with_solana(&server.url("/")), &env(), command, &mut stdout)
            .await
            .unwrap();

        assert_eq!(String::from_utf8(stdout).unwrap(), "500000\n");
    }

    #[tokio::test]
    async fn balance_on_unknown_chain_is_rejected() {
        let command = Commands::Balance {
            chain: "cosmos".to_string(),
            token: "x".to_string(),
            owner: "y".to_string(),
        };

        let err = run_command_with_writers(
            ctx_with_solana("http://localhost:8899"),
            &env(),
            command,
            &mut Vec::new(),
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("cosmos"));
    }

    #[test]
    fn failed_outcome_is_an_error() {
        let mut stdout = Vec::new();

        report(&mut stdout, 3, PurchaseOutcome::SettlementIncomplete).unwrap();
        assert!(String::from_utf8(stdout).unwrap().contains("awaiting redemption"));

        let err = report(&mut Vec::new(), 3, PurchaseOutcome::Failed).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::PurchaseFailed { skin: 3 })
        ));
    }

    #[test]
    fn cli_parses_purchase_command() {
        let cli = CliEnv::try_parse_from([
            "skinshop-cli",
            "--config",
            "skinshop.toml",
            "purchase",
            "--skin",
            "2",
            "--sol",
            "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM",
        ])
        .unwrap();

        assert!(matches!(
            cli.command,
            Commands::Purchase { skin: 2, token: None, .. }
        ));
    }
}
