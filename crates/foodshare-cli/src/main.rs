use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use foodshare_ai::{AiDelegate, HttpAiConfig, HttpAiDelegate, KeywordRulesDelegate, NoopAiDelegate};
use foodshare_core::{MatchOutcome, RankedMatch};
use foodshare_matching::{write_match_report, MatchRun, MatchingConfig, MatchingEngine};
use foodshare_storage::HistoryArchive;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod pool;

use pool::MatchPool;

#[derive(Debug, Parser)]
#[command(name = "foodshare-cli")]
#[command(about = "Community food-share matching from the command line")]
struct Cli {
    /// YAML matching config; falls back to FOODSHARE_* environment variables.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory holding urgency.yaml and values.yaml for the keyword delegate.
    #[arg(long, global = true)]
    rules_dir: Option<PathBuf>,
    /// Where recorded outcomes are archived.
    #[arg(long, global = true)]
    archive_dir: Option<PathBuf>,
    /// Root under which reports/<run_id>/ is written.
    #[arg(long, global = true)]
    report_dir: Option<PathBuf>,
    /// Print JSON instead of a text summary.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Rank the pool's offers against its request.
    Match {
        #[arg(long)]
        pool: PathBuf,
    },
    /// List trade loops for the pool's request.
    Loops {
        #[arg(long)]
        pool: PathBuf,
    },
    /// Record the outcome of matching the request with one offer.
    Record {
        #[arg(long)]
        pool: PathBuf,
        #[arg(long)]
        offer: String,
        #[arg(long)]
        success: bool,
        #[arg(long, default_value_t = 0.0)]
        rating: f64,
        #[arg(long, default_value = "")]
        feedback: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let engine = build_engine(&cli)?;
    if cli.archive_dir.is_some() {
        engine
            .restore_from_archive()
            .await
            .context("restoring match history from archive")?;
    }

    match &cli.command {
        Commands::Match { pool } => {
            let pool = MatchPool::load(pool)?;
            let started_at = Utc::now();
            let results = engine.find_matches(&pool.request, &pool.offers).await;
            let run = MatchRun {
                run_id: Uuid::new_v4(),
                started_at,
                finished_at: Utc::now(),
                delegate: engine.delegate_name().to_string(),
                request: pool.request.clone(),
                pool_size: pool.offers.len(),
                results,
            };
            if let Some(root) = &cli.report_dir {
                let dir = write_match_report(root, &run).await?;
                info!(reports = %dir.display(), "match report written");
            }
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&run.results)?);
            } else {
                print_ranked(&run.results);
            }
        }
        Commands::Loops { pool } => {
            let pool = MatchPool::load(pool)?;
            let loops = engine.find_trade_loops(&pool.request, &pool.offers).await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&loops)?);
            } else if loops.is_empty() {
                println!("no trade loops for {}", pool.request.id);
            } else {
                for trade_loop in &loops {
                    let chain = trade_loop
                        .links
                        .iter()
                        .map(|l| l.offer_id.as_str())
                        .collect::<Vec<_>>()
                        .join(" -> ");
                    println!("{} -> {}  ({})", chain, pool.request.id, trade_loop.id);
                }
            }
        }
        Commands::Record {
            pool,
            offer,
            success,
            rating,
            feedback,
        } => {
            let pool = MatchPool::load(pool)?;
            let offer = pool.offer(offer)?;
            let matched = engine.score_pair(offer, &pool.request).await;
            engine
                .record_match_outcome(
                    &matched,
                    MatchOutcome {
                        success: *success,
                        rating: *rating,
                        feedback: feedback.clone(),
                    },
                )
                .await;

            println!(
                "recorded match {} ({} -> {}) success={}",
                matched.id, offer.id, pool.request.id, success
            );
            for user_id in matched.party_ids() {
                println!("trust {user_id}: {:.2}", engine.trust_score(user_id).await);
            }
            if let Some(dir) = &cli.archive_dir {
                let archived = HistoryArchive::new(dir)
                    .load_match(&matched.id)
                    .await
                    .context("reading archived outcomes")?;
                println!("archived outcomes for {}: {}", matched.id, archived.len());
            }
        }
    }

    Ok(())
}

fn build_engine(cli: &Cli) -> Result<MatchingEngine> {
    let config = match &cli.config {
        Some(path) => MatchingConfig::from_yaml_file(path)?,
        None => MatchingConfig::from_env()?,
    };
    let mut engine = MatchingEngine::new(config)
        .context("building matching engine")?
        .with_delegate(build_delegate(cli.rules_dir.as_deref())?);
    if let Some(dir) = &cli.archive_dir {
        engine = engine.with_history_archive(HistoryArchive::new(dir));
    }
    Ok(engine)
}

/// HTTP delegate when `FOODSHARE_AI_ENDPOINT` is set, else keyword rules when
/// a rules directory is given, else no delegate at all.
fn build_delegate(rules_dir: Option<&Path>) -> Result<Arc<dyn AiDelegate>> {
    if let Some(config) = HttpAiConfig::from_env() {
        info!(endpoint = %config.endpoint, "using http ai delegate");
        return Ok(Arc::new(HttpAiDelegate::new(config)?));
    }
    if let Some(dir) = rules_dir {
        info!(rules_dir = %dir.display(), "using keyword rules delegate");
        return Ok(Arc::new(KeywordRulesDelegate::from_rules_dir(dir)?));
    }
    Ok(Arc::new(NoopAiDelegate))
}

fn print_ranked(results: &[RankedMatch]) {
    if results.is_empty() {
        println!("no matches");
        return;
    }
    for (idx, result) in results.iter().enumerate() {
        match result {
            RankedMatch::Direct(m) => println!(
                "{:>2}. {:<24} total {:>5.2}  {:<20} {}; {}",
                idx + 1,
                m.offer.id,
                m.scores.total,
                m.kind.label(),
                m.insights.location,
                m.insights.value
            ),
            RankedMatch::TradeLoop(l) => println!(
                "{:>2}. loop via {}",
                idx + 1,
                l.links
                    .iter()
                    .map(|h| h.offer_id.as_str())
                    .collect::<Vec<_>>()
                    .join(" -> ")
            ),
        }
    }
}
