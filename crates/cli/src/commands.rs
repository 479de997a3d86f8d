//! Command execution.

use crate::cli::{CacheCommands, Commands, InstallArgs};
use bincache_install::{
    CACHE_KEY, CommandProvider, InstallOptions, Installer, ProgressEvent, ProviderEvent,
};
use bincache_store::{CacheStore, FsCacheStore, VerifyStats};
use miette::{IntoDiagnostic, WrapErr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub async fn execute(command: Commands, cache_dir: Option<PathBuf>) -> miette::Result<()> {
    let store = open_store(cache_dir)?;
    match command {
        Commands::Install(args) => install(store, args).await,
        Commands::Cache { subcommand } => match subcommand {
            CacheCommands::Verify => verify(&store).await,
            CacheCommands::Clear => clear(&store).await,
        },
    }
}

fn open_store(cache_dir: Option<PathBuf>) -> miette::Result<FsCacheStore> {
    let store = match cache_dir {
        Some(dir) => FsCacheStore::new(dir),
        None => FsCacheStore::open_default()?,
    };
    tracing::debug!(root = %store.root().display(), "Using cache store");
    Ok(store)
}

async fn install(store: FsCacheStore, args: InstallArgs) -> miette::Result<()> {
    let Some((program, program_args)) = args.command.split_first() else {
        return Err(miette::miette!("missing build command"));
    };
    let provider = CommandProvider::new(program.clone(), program_args.to_vec(), args.name)
        .with_default_version(args.tool_version);

    let cwd = std::path::absolute(&args.cwd)
        .into_diagnostic()
        .wrap_err_with(|| format!("Invalid working directory '{}'", args.cwd.display()))?;
    let installer = Installer::new(Arc::new(store), Arc::new(provider), cwd);

    let mut options = InstallOptions::new().with_force_reinstall(args.force);
    if let Some(name) = args.rename {
        options = options.with_rename(move |_| name.clone());
    }
    if let Some(secs) = args.timeout {
        options = options.with_check_timeout(Duration::from_secs(secs));
    }

    let handle = installer.install(Some(options))?;
    let canceller = handle.canceller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling install");
            canceller.cancel();
        }
    });

    let install_path = handle.target().install_path.clone();
    handle.wait_with(render).await?;

    print_line(&format!("installed {}", install_path.display()));
    Ok(())
}

fn render(event: &ProgressEvent) {
    match event {
        ProgressEvent::SearchCache { found: true, path } => {
            info!(path = ?path, "Found cached binary");
        }
        ProgressEvent::SearchCache { found: false, .. } => info!("No usable cached binary"),
        ProgressEvent::RestoreCache => info!("Restoring from cache"),
        ProgressEvent::RestoreCacheComplete => info!("Restored from cache"),
        ProgressEvent::CheckBinary => info!("Checking binary"),
        ProgressEvent::CheckBinaryComplete => info!("Binary works"),
        ProgressEvent::WriteCache { size } => info!(size = ?size, "Writing cache"),
        ProgressEvent::WriteCacheComplete => info!("Cache updated"),
        ProgressEvent::RestoreCacheFail(error)
        | ProgressEvent::CheckBinaryFail(error)
        | ProgressEvent::WriteCacheFail(error) => {
            warn!(event = event.id(), code = error.code(), "{error}");
        }
        ProgressEvent::Provider(ProviderEvent { id, data }) => match data.get("line") {
            Some(line) if id == "build:output" => {
                info!(target: "bincache::build", "{}", line.as_str().unwrap_or_default());
            }
            _ => info!(event = %id, data = %data, "Provider event"),
        },
    }
}

async fn verify(store: &FsCacheStore) -> miette::Result<()> {
    let stats = store.verify().await?;
    print_stats(&stats);
    Ok(())
}

async fn clear(store: &FsCacheStore) -> miette::Result<()> {
    store.remove(CACHE_KEY).await?;
    let stats = store.verify().await?;
    info!(reclaimed = stats.reclaimed, "Cache cleared");
    print_line(&format!("cleared {}", store.root().display()));
    Ok(())
}

fn print_stats(stats: &VerifyStats) {
    print_line(&format!(
        "verified {} entries, reclaimed {} blobs, dropped {} corrupt and {} missing, {} bytes kept",
        stats.verified, stats.reclaimed, stats.bad_content, stats.missing_content, stats.kept_bytes
    ));
}

#[allow(clippy::print_stdout)]
fn print_line(line: &str) {
    println!("{line}");
}
