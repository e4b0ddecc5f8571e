//! `typeform` - CLI for the Typeform Responses API
//!
//! This binary fetches responses, syncs them into the local cache, and
//! inspects the cached copy.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};

use typeform::cli::render;
use typeform::cli::{CacheCommand, Cli, Command, ConfigCommand, ResponsesCommand, SyncCommand};
use typeform::{init_logging, Config, ResponseStore, SyncHandle, SyncOptions, Syncer, Typeform};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let mut config = Config::load_from(cli.config.clone())?;
    if let Some(form) = &cli.form {
        config.api.form_id = Some(form.clone());
    }

    // Execute the command
    match cli.command {
        Command::Responses(cmd) => handle_responses(&config, &cmd).await,
        Command::Sync(cmd) => handle_sync(&config, &cmd).await,
        Command::Cache(cmd) => handle_cache(&config, cmd),
        Command::Config(cmd) => handle_config(&config, cli.config.as_deref(), cmd),
    }
}

async fn handle_responses(config: &Config, cmd: &ResponsesCommand) -> anyhow::Result<()> {
    let client = Typeform::from_config(config)?;
    let mut query = cmd.to_query();

    let responses = if cmd.all {
        client.all_responses_with(&query).await?
    } else {
        if query.requested_page_size().is_none() {
            query = query.page_size(client.page_size());
        }
        client.responses_with(&query).await?.items
    };

    let mut out = std::io::stdout().lock();
    render::write_responses(&mut out, &responses, cmd.format)?;
    out.flush()?;
    Ok(())
}

async fn handle_sync(config: &Config, cmd: &SyncCommand) -> anyhow::Result<()> {
    let client = Typeform::from_config(config)?;
    let database_path = config.database_path();
    let store = ResponseStore::open(&database_path)
        .with_context(|| format!("opening cache at {}", database_path.display()))?;

    if cmd.reset {
        store.clear_cursor(client.form_id())?;
        info!(form_id = client.form_id(), "cursor reset");
    }

    let options = SyncOptions {
        page_size: None,
        max_pages: cmd.max_pages.or_else(|| config.max_pages()),
        keep_recent: config.max_responses(),
    };
    let syncer = Syncer::new(&client, &store).with_options(options);

    if !cmd.watch {
        let report = syncer.run().await?;
        let mut out = std::io::stdout().lock();
        render::write_sync_report(&mut out, &report, cmd.json)?;
        return Ok(());
    }

    let interval = cmd
        .interval
        .map_or_else(|| config.watch_interval(), Duration::from_secs);
    if interval.is_zero() {
        bail!("--interval must be greater than 0");
    }

    let handle = SyncHandle::new();
    let stopper = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        info!("interrupt received, stopping (press Ctrl-C again to exit now)");
        stopper.stop();
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("second interrupt, exiting");
            std::process::exit(130);
        }
    });

    eprintln!(
        "Watching form {} every {}s (Ctrl-C to stop)",
        client.form_id(),
        interval.as_secs()
    );
    let rounds = syncer.watch(interval, &handle).await?;
    eprintln!("Stopped after {rounds} rounds.");
    Ok(())
}

fn handle_cache(config: &Config, cmd: CacheCommand) -> anyhow::Result<()> {
    let form_id = config.form_id()?;
    let database_path = config.database_path();
    let store = ResponseStore::open(&database_path)
        .with_context(|| format!("opening cache at {}", database_path.display()))?;
    let mut out = std::io::stdout().lock();

    match cmd {
        CacheCommand::List { limit, format } => {
            let responses = store.list(form_id, limit)?;
            render::write_responses(&mut out, &responses, format)?;
        }
        CacheCommand::Show { token, format } => {
            let Some(response) = store.get(form_id, &token)? else {
                bail!("no cached response with token {token} for form {form_id}");
            };
            render::write_response(&mut out, &response, format)?;
        }
        CacheCommand::Stats { json } => {
            let stats = store.stats(form_id)?;
            render::write_stats(&mut out, &stats, json)?;
        }
        CacheCommand::Prune { keep } => {
            let removed = store.prune_keep_recent(form_id, keep)?;
            writeln!(out, "Removed {removed} responses, kept at most {keep}.")?;
        }
        CacheCommand::Delete { token } => {
            if store.delete(form_id, &token)? {
                writeln!(out, "Deleted response {token}.")?;
            } else {
                bail!("no cached response with token {token} for form {form_id}");
            }
        }
    }
    Ok(())
}

fn handle_config(
    config: &Config,
    config_path: Option<&Path>,
    cmd: ConfigCommand,
) -> anyhow::Result<()> {
    let mut out = std::io::stdout().lock();

    match cmd {
        ConfigCommand::Show { json } => {
            render::write_config(&mut out, config, json)?;
        }
        ConfigCommand::Path => {
            let path = config_path.map_or_else(Config::default_config_path, Path::to_path_buf);
            writeln!(out, "{}", path.display())?;
        }
        ConfigCommand::Validate { file } => {
            let path = file
                .or_else(|| config_path.map(Path::to_path_buf))
                .unwrap_or_else(Config::default_config_path);
            if !path.exists() {
                bail!("configuration file not found: {}", path.display());
            }
            Config::load_from(Some(path.clone()))
                .with_context(|| format!("invalid configuration in {}", path.display()))?;
            writeln!(out, "Configuration is valid: {}", path.display())?;
        }
    }
    Ok(())
}
