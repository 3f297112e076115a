mod passphrase;
mod render;

use anyhow::Context;
use clap::{Parser, Subcommand};
use custody_operator::auth::{self, KeyFormat, PassphraseProvider};
use custody_operator::{ActionDispatcher, OperatorConfig, OperatorResult};
use custody_operator_types::{Currency, CurrencyAddress, WithdrawalRequest, WithdrawalRequestInfo};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::passphrase::TtyPassphrase;

#[derive(Parser)]
#[command(name = "custody-operator")]
#[command(about = "Operator console for custody withdrawal approvals")]
struct Cli {
    /// Operator private key file (PEM or DER)
    #[arg(long, global = true)]
    key_file: Option<PathBuf>,

    /// Key file encoding
    #[arg(long, global = true)]
    key_format: Option<KeyFormat>,

    /// Operator API base URL, overrides config
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List pending withdrawal requests
    Requests,
    /// File a withdrawal request for a user
    CreateRequest {
        #[arg(long)]
        user: String,
        /// Chain tag, e.g. BTC or ETH
        #[arg(long)]
        currency: String,
        /// Token ticker on that chain, e.g. USDT
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        address: String,
        /// Amount in the currency's smallest unit
        #[arg(long)]
        amount: u64,
    },
    /// Confirm a withdrawal request
    Confirm { id: String },
    /// Reject a withdrawal request
    Reject { id: String },
    /// Show the hot wallet balance
    HotBalance,
    /// Generate an invite for a new user
    Invite { label: String },
    /// List invites generated with this key
    Invites,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "custody_operator=info,operator_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = OperatorConfig::init(cli.base_url.clone())
        .context("Failed to load operator configuration")?;

    let key_path = cli
        .key_file
        .clone()
        .or_else(|| config.key.path.clone())
        .context("No key file given; pass --key-file or set key.path")?;
    let key_format = cli.key_format.unwrap_or(config.key.format);

    let raw = zeroize::Zeroizing::new(
        tokio::fs::read(&key_path)
            .await
            .with_context(|| format!("Failed to read key file {}", key_path.display()))?,
    );

    let dispatcher = ActionDispatcher::new(config.api.clone(), auth::create_key_store())?;
    info!("Using operator API at {}", config.api.base_url);

    let listing = login(&dispatcher, &raw, key_format, &TtyPassphrase).await?;

    match cli.command {
        Commands::Requests => {
            let requests = listing.context("Failed to list withdrawal requests")?;
            print!("{}", render::requests_table(&requests));
        }
        command => {
            if let Err(e) = &listing {
                warn!("Initial request listing failed: {}", e);
            }
            run(&dispatcher, command).await?;
        }
    }

    dispatcher.logout().await;
    Ok(())
}

/// Load the key and take the initial listing.
///
/// A key failure is fatal. A failed listing is handed back so that only the
/// commands that need it fail.
async fn login(
    dispatcher: &ActionDispatcher,
    raw: &[u8],
    format: KeyFormat,
    passphrase: &dyn PassphraseProvider,
) -> anyhow::Result<OperatorResult<Vec<WithdrawalRequest>>> {
    match dispatcher.authenticate(raw, format, passphrase).await {
        Err(e) if !dispatcher.key_store().is_authenticated().await => {
            Err(e).context("Operator authentication failed")
        }
        listing => Ok(listing),
    }
}

async fn run(dispatcher: &ActionDispatcher, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Requests => {
            let requests = dispatcher.list_pending_requests().await?;
            print!("{}", render::requests_table(&requests));
        }
        Commands::CreateRequest {
            user,
            currency,
            token,
            address,
            amount,
        } => {
            let currency = match token {
                Some(ticker) => Currency::Token {
                    chain: currency,
                    ticker,
                },
                None => Currency::Native(currency),
            };
            let request = WithdrawalRequestInfo {
                user,
                address: CurrencyAddress { currency, address },
                amount,
            };
            dispatcher.create_request(&request).await?;
            println!("Created withdrawal request for {}", request.user);
        }
        Commands::Confirm { id } => {
            dispatcher.confirm(id.as_str()).await?;
            println!("Confirmed request {}", id);
        }
        Commands::Reject { id } => {
            dispatcher.reject(id.as_str()).await?;
            println!("Rejected request {}", id);
        }
        Commands::HotBalance => {
            let balance = dispatcher.hot_balance().await?;
            println!("Hot wallet balance: {}", balance.balance);
        }
        Commands::Invite { label } => {
            let invite = dispatcher.generate_invite(label).await?;
            println!("{}\t{}", invite.invite.invite, invite.label);
        }
        Commands::Invites => {
            print!("{}", render::invites_table(&dispatcher.list_my_invites().await?));
        }
    }
    Ok(())
}
