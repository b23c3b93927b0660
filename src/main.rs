use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use digest_ai::{OpenAiSummarizer, Summarizer};
use digest_core::clock::{Clock, SystemClock};
use digest_core::config::AppConfig;
use digest_core::scheduler::DailyScheduler;
use digest_engine::{
    sink_from_config, windows_from_config, Aggregator, AggregatorOptions, DayStats, DeliverySink,
    DigestJob, ExecutionReport, RunStatus,
};
use digest_store::MessageStore;

#[derive(Parser)]
#[command(
    name = "chat-digest",
    about = "Scheduled daily chat digests, summarized window by window",
    version,
    author
)]
struct Cli {
    /// Path to config file (default: ~/.config/chat-digest/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the model name
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Override the API base URL
    #[arg(long, global = true)]
    api_base: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daily digest scheduler (default)
    Run,

    /// Record a message into the store
    Ingest {
        /// Chat the message belongs to
        #[arg(long)]
        chat: i64,
        /// Participant who sent it
        #[arg(long)]
        from: String,
        /// Message text
        text: String,
    },

    /// Digest one day on demand
    Summarize {
        /// Chat to digest (default: every chat in the store)
        #[arg(long)]
        chat: Option<i64>,
        /// Day to digest, YYYY-MM-DD (default: today)
        #[arg(long)]
        day: Option<String>,
    },

    /// Summarize the newest messages of a chat
    Recent {
        /// Chat to summarize
        #[arg(long)]
        chat: i64,
        /// Maximum messages to include
        #[arg(long)]
        count: Option<usize>,
        /// Trailing hours to cover
        #[arg(long)]
        hours: Option<i64>,
    },

    /// Show message statistics for a chat
    Stats {
        /// Chat to inspect
        #[arg(long)]
        chat: i64,
        /// Day to inspect, YYYY-MM-DD (default: today)
        #[arg(long)]
        day: Option<String>,
    },

    /// List chats with stored messages
    Chats,

    /// Delete partitions older than the retention period
    Prune {
        /// Retention period in days (default: from config)
        #[arg(long)]
        days: Option<u32>,
    },

    /// Probe the summarization endpoint
    Check,

    /// Show or manage configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Initialize default configuration file
    Init,
    /// Print config file path
    Path,
}

struct Pipeline {
    clock: Arc<dyn Clock>,
    store: Arc<MessageStore>,
    summarizer: Arc<OpenAiSummarizer>,
    aggregator: Arc<Aggregator>,
    sink: Arc<dyn DeliverySink>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up tracing.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "chat_digest=info,warn".into()))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Load config.
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };

    // Apply CLI overrides.
    if let Some(model) = &cli.model {
        config.ai.model = model.clone();
    }
    if let Some(api_base) = &cli.api_base {
        config.ai.api_base = api_base.clone();
    }

    let pipeline = build_pipeline(&config)?;

    tracing::info!(
        "store: {}, model: {}, endpoint: {}",
        config.resolved_data_dir().display(),
        config.ai.model,
        config.ai.api_base,
    );

    match cli.command {
        Some(Commands::Ingest { chat, from, text }) => {
            let event = pipeline.store.append(chat, &from, &text)?;
            println!("Recorded message for chat {} at {}", chat, event.occurred_at);
        }
        Some(Commands::Summarize { chat, day }) => {
            let date = parse_day_arg(day.as_deref(), pipeline.clock.as_ref())?;
            match chat {
                Some(chat_id) => {
                    let report = pipeline.aggregator.run_daily(chat_id, date).await;
                    deliver_report(&pipeline, &report).await;
                }
                None => {
                    let chats = pipeline.store.list_chats()?;
                    let run = pipeline.aggregator.run_all(&chats, date).await;
                    println!("{}", run.summary_line());
                    for report in run.reports.values() {
                        if report.status != RunStatus::Empty {
                            deliver_report(&pipeline, report).await;
                        }
                    }
                }
            }
        }
        Some(Commands::Recent { chat, count, hours }) => {
            let count = count.unwrap_or(config.summary.recent_count);
            let hours = hours.unwrap_or(config.summary.recent_hours);
            let report = pipeline.aggregator.run_recent(chat, count, hours).await;
            deliver_report(&pipeline, &report).await;
        }
        Some(Commands::Stats { chat, day }) => {
            let date = parse_day_arg(day.as_deref(), pipeline.clock.as_ref())?;
            let events = pipeline.store.read_day(chat, date);
            let stats = DayStats::compute(date, &events);
            println!("Chat {chat} on {date}:");
            println!(
                "  {} message(s) from {} participant(s)",
                stats.event_count, stats.participant_count
            );
            for (i, (participant, count)) in stats.ranking.iter().enumerate() {
                println!("  {}. {participant}: {count}", i + 1);
            }
            let trailing = pipeline.store.count_since(chat, 24);
            println!("  {trailing} message(s) in the trailing 24 hours");
        }
        Some(Commands::Chats) => {
            let chats = pipeline.store.list_chats()?;
            if chats.is_empty() {
                println!("No chats recorded yet.");
            }
            for chat_id in chats {
                println!("{chat_id}");
            }
        }
        Some(Commands::Prune { days }) => {
            let days = days.unwrap_or(config.storage.retention_days);
            let mut total = 0;
            for chat_id in pipeline.store.list_chats()? {
                total += pipeline.store.prune(chat_id, days)?;
            }
            println!("Removed {total} expired partition(s).");
        }
        Some(Commands::Check) => {
            println!("Probing {} at {} ...", config.ai.model, config.ai.api_base);
            pipeline.summarizer.probe().await?;
            println!("Summarizer is reachable.");
        }
        Some(Commands::Config { action }) => {
            handle_config_command(action, &config)?;
        }
        Some(Commands::Run) | None => {
            run_daemon(&config, &pipeline).await?;
        }
    }

    Ok(())
}

fn build_pipeline(config: &AppConfig) -> Result<Pipeline> {
    let clock: Arc<dyn Clock> =
        Arc::new(SystemClock::with_offset_hours(config.summary.offset_hours));
    let store = Arc::new(MessageStore::new(config.resolved_data_dir(), clock.clone())?);
    let summarizer = Arc::new(OpenAiSummarizer::from_config(&config.ai));
    let aggregator = Arc::new(Aggregator::new(
        store.clone(),
        summarizer.clone(),
        clock.clone(),
        windows_from_config(&config.summary.windows),
        AggregatorOptions::from_config(&config.summary),
    ));
    let sink = sink_from_config(&config.delivery);
    Ok(Pipeline {
        clock,
        store,
        summarizer,
        aggregator,
        sink,
    })
}

async fn run_daemon(config: &AppConfig, pipeline: &Pipeline) -> Result<()> {
    if !config.summary.daily_enabled {
        anyhow::bail!("daily digests are disabled: set [summary] daily_enabled = true");
    }

    let job = Arc::new(DigestJob::new(
        pipeline.store.clone(),
        pipeline.aggregator.clone(),
        pipeline.sink.clone(),
        pipeline.clock.clone(),
        config.storage.retention_days,
    ));
    let scheduler = DailyScheduler::new(pipeline.clock.clone(), config.summary.target_time());
    tracing::info!(
        "next digest in {}s, press Ctrl-C to stop",
        scheduler.seconds_until_target()
    );
    let mut handle = scheduler.start(job);

    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => None,
        res = handle.wait() => Some(res),
    };
    match outcome {
        // The loop exited by itself, which only happens on repeated failures.
        Some(res) => res?,
        None => {
            tracing::info!("shutting down");
            handle.stop(Duration::from_secs(10)).await?;
        }
    }
    Ok(())
}

async fn deliver_report(pipeline: &Pipeline, report: &ExecutionReport) {
    if let Err(e) = pipeline.sink.deliver(report.chat_id, &report.report_text).await {
        tracing::warn!("delivery failed for chat {}: {}", report.chat_id, e);
    }
}

fn parse_day_arg(day: Option<&str>, clock: &dyn Clock) -> Result<NaiveDate> {
    match day {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|e| anyhow::anyhow!("invalid day {raw:?}: {e}")),
        None => Ok(clock.now().date_naive()),
    }
}

fn handle_config_command(action: Option<ConfigAction>, config: &AppConfig) -> Result<()> {
    match action {
        Some(ConfigAction::Show) | None => {
            let toml_str = toml::to_string_pretty(config)?;
            println!("{}", toml_str);
        }
        Some(ConfigAction::Init) => {
            let path = AppConfig::default_path();
            if path.exists() {
                println!("Config already exists at: {}", path.display());
            } else {
                config.save()?;
                println!("Created default config at: {}", path.display());
            }
        }
        Some(ConfigAction::Path) => {
            println!("{}", AppConfig::default_path().display());
        }
    }
    Ok(())
}
