//! ikura entry point: load config and database, wire the subsystems, run
//! until the console (or a signal) asks us to stop.

use anyhow::Context as _;
use clap::Parser;
use ikura::{backends, config::Config, console, db, interp, markov, BotContext};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ikura", version)]
#[command(about = "A multi-protocol chat bot with an embedded command language")]
struct Cli {
    /// Path to the JSON config file
    config: std::path::PathBuf,

    /// Path to the database file
    #[arg(long, default_value = "ikura.db")]
    database: std::path::PathBuf,

    /// Create the database if it does not exist
    #[arg(long)]
    create: bool,

    /// Never write the database back to disk
    #[arg(long)]
    readonly: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(%error, path = %cli.config.display(), "invalid config file");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!(%error, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli, config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "fatal");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    let loaded =
        db::load(&cli.database, cli.create, cli.readonly).context("failed to load database")?;

    let db = db::DbHandle::new(loaded.db, cli.database.clone(), cli.readonly);
    let interp = interp::new_interp(loaded.interp);
    let markov_handle = markov::MarkovHandle::new(loaded.markov);
    let (markov_tx, markov_rx) = markov::channel();
    let (shutdown_tx, _) = tokio::sync::watch::channel(false);

    let ctx = BotContext {
        db: db.clone(),
        interp: interp.clone(),
        markov: markov_handle.clone(),
        markov_tx: markov_tx.clone(),
        config: Arc::new(config),
        shutdown: shutdown_tx,
    };

    let mut workers = tokio::task::JoinSet::new();

    workers.spawn(markov::worker(markov_handle.clone(), markov_rx));
    workers.spawn(db::sync_worker(
        db.clone(),
        interp.clone(),
        markov_handle.clone(),
        ctx.shutdown_rx(),
    ));
    workers.spawn(console::run(ctx.clone()));

    if let Some(twitch) = ctx.config.twitch.clone() {
        let ctx = ctx.clone();
        workers.spawn(async move {
            if let Err(error) = backends::twitch::run(ctx, twitch).await {
                tracing::error!(target: "twitch", %error, "driver failed");
            }
        });
    }

    if let Some(discord) = ctx.config.discord.clone() {
        let ctx = ctx.clone();
        workers.spawn(async move {
            if let Err(error) = backends::discord::run(ctx, discord).await {
                tracing::error!(target: "discord", %error, "driver failed");
            }
        });
    }

    if !ctx.config.irc.servers.is_empty() {
        let ctx2 = ctx.clone();
        let irc = ctx.config.irc.clone();
        workers.spawn(backends::irc::run(ctx2, irc));
    }

    // run until the console's `stop` or a ctrl-c
    let mut shutdown = ctx.shutdown_rx();
    tokio::select! {
        _ = shutdown.changed() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down");
            ctx.request_shutdown();
        }
    }

    // stop the markov worker with its sentinel, then drain everyone
    let _ = markov_tx
        .send(markov::MarkovInput {
            text: String::new(),
            emotes: Vec::new(),
        })
        .await;

    let drain = async {
        while workers.join_next().await.is_some() {}
    };
    if tokio::time::timeout(std::time::Duration::from_secs(5), drain)
        .await
        .is_err()
    {
        tracing::warn!("workers did not drain in time");
    }

    db.sync(&interp, &markov_handle)
        .await
        .context("final database sync failed")?;

    tracing::info!("goodbye");
    Ok(())
}
