mod cli;

use crate::cli::{Command, CLI};
use anyhow::Context;
use burrow_shortener::{BatchItem, SeqGenerator, ShortenerService};
use burrow_storage::{shutdown, OwnerToken, Storage};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CLI::parse();
    init_tracing(config.log_json);

    info!(
        storage_backend = %config.storage,
        base_url = %config.base_url,
        workers = config.workers,
        "starting burrow"
    );

    let generator = SeqGenerator::with_prefix(config.generator_prefix.clone())
        .context("invalid generator prefix")?;

    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();
    let storage = Storage::init(cancel.clone(), &tracker, config.storage_config()?)
        .await
        .context("failed to initialize storage")?;

    let service = ShortenerService::new(
        storage.clone(),
        generator,
        config.base_url.clone(),
    )
    .with_cancel(cancel.clone())
    .with_op_timeout(config.op_timeout());

    let outcome = tokio::select! {
        outcome = run(&service, config.command) => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, shutting down");
            Ok(())
        }
    };

    shutdown(&cancel, &tracker).await;
    if let Some(err) = storage.pool_failure() {
        anyhow::bail!("deletion pipeline failed: {err}");
    }
    outcome
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(service: &ShortenerService<SeqGenerator>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Shorten { owner, urls } => {
            let owner = OwnerToken::new(owner);
            if let [url] = urls.as_slice() {
                let shortened = service.shorten(&owner, url).await?;
                let state = if shortened.is_created() {
                    "created"
                } else {
                    "existing"
                };
                println!("{}\t{}", shortened.short_url(), state);
            } else {
                let items = urls
                    .into_iter()
                    .map(|url| BatchItem {
                        correlation_id: url.clone(),
                        original_url: url,
                    })
                    .collect();
                for result in service.shorten_batch(&owner, items).await? {
                    println!("{}\t{}", result.short_url, result.correlation_id);
                }
            }
        }
        Command::Resolve { code } => {
            println!("{}", service.resolve(&code).await?);
        }
        Command::List { owner } => {
            for url in service.list(&OwnerToken::new(owner)).await? {
                println!("{}\t{}", url.short_url, url.original_url);
            }
        }
        Command::Delete { owner, codes } => {
            service.delete(&OwnerToken::new(owner), codes).await?;
            println!("accepted");
        }
        Command::Ping => {
            service.ping().await?;
            println!("ok");
        }
    }
    Ok(())
}
