use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use counsel_agents::gateway::{OpenAiCompletionGateway, PgRecordStore, TavilyFactSearch};
use counsel_agents::{Coordinator, CounselConfig, TurnError};
use counsel_coordination::BusyPolicy;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file (defaults and COUNSEL_* env vars otherwise)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Conversation identifier shared by every turn of this run
    #[arg(long, default_value = "cli")]
    session: String,

    /// Override the busy policy: wait|report
    #[arg(long)]
    busy_policy: Option<BusyPolicy>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => CounselConfig::load(path)?,
        None => {
            let config = CounselConfig::from_env();
            config.validate().map_err(anyhow::Error::msg)?;
            config
        }
    };
    if let Some(policy) = args.busy_policy {
        config.busy_policy = policy;
    }

    let completion = Arc::new(
        OpenAiCompletionGateway::new(config.completion.clone())
            .context("Failed to build completion gateway")?,
    );
    let fact_search = Arc::new(
        TavilyFactSearch::new(config.fact_search.clone())
            .context("Failed to build fact search gateway")?,
    );
    let store = Arc::new(
        PgRecordStore::connect(&config.record_store)
            .await
            .context("Failed to connect to the record store")?,
    );
    let coordinator = Arc::new(Coordinator::new(
        completion,
        store.clone(),
        store,
        fact_search,
        &config,
    ));
    let _janitor = coordinator.spawn_janitor(config.cache.purge_interval());

    info!(
        session = %args.session,
        model = %config.completion.triage_model,
        busy_policy = %config.busy_policy,
        "Counsel assistant ready"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\nQuestion (exit to quit): ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.eq_ignore_ascii_case("exit") {
            break;
        }
        if query.is_empty() {
            continue;
        }

        match coordinator.handle_turn(query, &args.session).await {
            Ok(result) => {
                println!("\n{}", result.cheap_response);
                println!("[status: {}]", result.status);
                if let Some(notice) = result.notice {
                    println!("{notice}");
                }
                if let Some(deep) = &result.deep_response {
                    println!("\n--- In-depth answer ---\n{deep}");
                }
                if let Some(review) = result.review.as_ref().filter(|r| r.needs_fix) {
                    println!("\n[review] {}", review.reason);
                }
            }
            Err(TurnError::InvalidSessionKey(e)) => {
                anyhow::bail!("invalid --session: {e}");
            }
            Err(e) => {
                error!(error = %e, "turn failed");
                println!("\nSorry, the question could not be answered right now.");
            }
        }
    }

    Ok(())
}
