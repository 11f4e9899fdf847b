//! SyncBridge CLI - Command line interface for the sync connector.
//!
//! This tool fetches sync credentials and uploads queued mutations from a
//! JSON queue file to a SyncBridge backend.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use url::Url;

use syncbridge_common::UserId;
use syncbridge_queue::{FileQueue, MutationOp};
use syncbridge_sync::{
    AuthEvent, BackendConnector, ConnectionState, ConnectionSupervisor, DrainOutcome,
    IdentityProvider, LocalEngine, StaticIdentity, SyncConfig, SyncConnector,
};

#[derive(Parser)]
#[command(name = "syncbridge")]
#[command(about = "SyncBridge - Upload local mutations to a sync backend")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (default: <config dir>/syncbridge/config.json).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend base URL, overriding the configuration file.
    #[arg(short, long)]
    backend: Option<Url>,

    /// Signed-in user id.
    #[arg(short, long, requires = "id_token")]
    user: Option<String>,

    /// Identity token presented to the backend.
    #[arg(long, requires = "user")]
    id_token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and print sync credentials.
    Credentials,

    /// Append a single-operation transaction to a queue file.
    Enqueue {
        /// Queue file.
        queue: PathBuf,

        /// Operation kind.
        #[arg(short, long, value_enum, default_value = "put")]
        kind: KindArg,

        /// Target table.
        #[arg(short, long)]
        table: String,

        /// Row id.
        #[arg(short, long)]
        id: String,

        /// Row data as a JSON object.
        #[arg(short, long)]
        data: Option<String>,
    },

    /// Show pending transactions in a queue file.
    Status {
        /// Queue file.
        queue: PathBuf,
    },

    /// Upload a queue file until it is empty or the backend stops accepting.
    Push {
        /// Queue file.
        queue: PathBuf,
    },

    /// Keep uploading a queue file on the configured interval until Ctrl-C.
    Watch {
        /// Queue file.
        queue: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Put,
    Patch,
    Delete,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match &cli.command {
        Commands::Credentials => cmd_credentials(&cli).await,

        Commands::Enqueue {
            queue,
            kind,
            table,
            id,
            data,
        } => cmd_enqueue(queue, *kind, table, id, data.as_deref()).await,

        Commands::Status { queue } => cmd_status(queue).await,

        Commands::Push { queue } => cmd_push(&cli, queue).await,

        Commands::Watch { queue } => cmd_watch(&cli, queue).await,
    }
}

/// Load configuration from `--config`, the default location, or defaults.
fn load_config(cli: &Cli) -> Result<SyncConfig> {
    let default_path = dirs::config_dir().map(|dir| dir.join("syncbridge").join("config.json"));

    let mut config = match (&cli.config, default_path) {
        (Some(path), _) => SyncConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        (None, Some(path)) if path.exists() => SyncConfig::from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        _ => SyncConfig::default(),
    };

    if let Some(backend) = &cli.backend {
        config.backend_url = backend.clone();
    }
    config.validate().context("Invalid configuration")?;

    Ok(config)
}

/// Identity from `--user` and `--id-token`.
fn identity(cli: &Cli) -> Result<Arc<dyn IdentityProvider>> {
    match (&cli.user, &cli.id_token) {
        (Some(user), Some(token)) => {
            let user = UserId::new(user.as_str()).context("Invalid user id")?;
            Ok(Arc::new(StaticIdentity::new(user, token.as_str())))
        }
        _ => Ok(Arc::new(StaticIdentity::signed_out())),
    }
}

fn connector(cli: &Cli, config: &SyncConfig) -> Result<SyncConnector> {
    SyncConnector::new(identity(cli)?, config, Arc::new(AtomicBool::new(true)))
        .context("Failed to create connector")
}

/// Fetch and print credentials.
async fn cmd_credentials(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let connector = connector(cli, &config)?;

    let Some(credentials) = connector.fetch_credentials().await else {
        anyhow::bail!(
            "No credentials available (signed out or rejected by {})",
            connector.credentials().token_url()
        );
    };

    println!("Credentials:");
    println!("  Endpoint: {}", credentials.endpoint);
    println!(
        "  User: {}",
        credentials.user_id.as_deref().unwrap_or("(not reported)")
    );
    match credentials.expires_at {
        Some(expires_at) => println!("  Expires: {}", expires_at.to_rfc3339()),
        None => println!("  Expires: never"),
    }
    println!("  Token: {}", credentials.token);

    Ok(())
}

/// Add a transaction to a queue file.
async fn cmd_enqueue(
    path: &Path,
    kind: KindArg,
    table: &str,
    id: &str,
    data: Option<&str>,
) -> Result<()> {
    let data = match data {
        Some(raw) => serde_json::from_str(raw).context("--data is not valid JSON")?,
        None => serde_json::Value::Null,
    };

    let op = match kind {
        KindArg::Put => MutationOp::put(table, id, data),
        KindArg::Patch => MutationOp::patch(table, id, data),
        KindArg::Delete => MutationOp::delete(table, id),
    };
    // Reject malformed rows before they reach the queue.
    op.merged_data().context("Invalid row data")?;

    let queue = FileQueue::open(path)
        .await
        .context("Failed to open queue")?;
    let tx = queue
        .enqueue(vec![op])
        .await
        .context("Failed to write queue")?;

    println!("Queued {} in {}", tx, path.display());
    Ok(())
}

/// Print queue size.
async fn cmd_status(path: &Path) -> Result<()> {
    let queue = FileQueue::open(path)
        .await
        .context("Failed to open queue")?;

    let pending = queue.len().await;
    if pending == 0 {
        println!("Queue is empty.");
    } else {
        println!("{} pending transactions in {}", pending, path.display());
    }
    Ok(())
}

/// Drain a queue file once.
async fn cmd_push(cli: &Cli, path: &Path) -> Result<()> {
    let config = load_config(cli)?;
    let connector = connector(cli, &config)?;
    let queue = FileQueue::open(path)
        .await
        .context("Failed to open queue")?;

    info!("Pushing {} to {}", path.display(), config.backend_url);

    let mut uploaded = 0;
    loop {
        let outcome = connector
            .pump()
            .upload_pending(&queue)
            .await
            .context("Upload stopped on a local error")?;

        match outcome {
            DrainOutcome::Idle => break,
            DrainOutcome::Completed {
                transaction,
                applied,
                rejected,
            } => {
                uploaded += 1;
                println!("{}: {} applied", transaction, applied);
                for op in rejected {
                    println!(
                        "  rejected {} (code {}): {}",
                        op.op,
                        op.code.as_deref().unwrap_or("none"),
                        op.message
                    );
                }
            }
            DrainOutcome::Abandoned {
                transaction,
                deferrals,
            } => {
                println!("{}: abandoned after {} attempts", transaction, deferrals);
            }
            DrainOutcome::Deferred {
                transaction,
                next_op,
                retry_after,
            } => {
                println!(
                    "{}: backend unavailable at operation {}, retry in {:?}",
                    transaction, next_op, retry_after
                );
                break;
            }
            DrainOutcome::BackingOff { retry_after } => {
                println!("Backing off for {:?}", retry_after);
                break;
            }
            DrainOutcome::Disconnected { .. } => break,
        }
    }

    let remaining = queue.len().await;
    println!(
        "Uploaded {} transactions, {} still pending.",
        uploaded, remaining
    );
    Ok(())
}

/// Run the connection supervisor and local engine until Ctrl-C.
async fn cmd_watch(cli: &Cli, path: &Path) -> Result<()> {
    let config = load_config(cli)?;
    let queue = Arc::new(
        FileQueue::open(path)
            .await
            .context("Failed to open queue")?,
    );
    let engine = Arc::new(LocalEngine::new(queue, config.upload_interval()));

    let supervisor = ConnectionSupervisor::new(engine, identity(cli)?, config);
    let state = supervisor
        .start()
        .await
        .context("Failed to start sync")?;

    if state == ConnectionState::LoggedOut {
        warn!("No user signed in; pass --user and --id-token to upload");
        return Ok(());
    }

    println!("Watching {} (Ctrl-C to stop)", path.display());
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    supervisor
        .handle_event(AuthEvent::SignedOut)
        .await
        .context("Failed to disconnect")?;
    println!("Stopped.");

    Ok(())
}
