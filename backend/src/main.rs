//! Brainarr CLI - run the recommendation pipeline from the command line
//!
//! # Commands
//!
//! ```bash
//! brainarr run --settings s.json --library lib.json --responses replies.json
//! brainarr key --settings s.json --library lib.json   # Cache key and operation id
//! brainarr review                                     # List the review queue
//! brainarr review --approve "Artist|Album"            # Release queued entries
//! brainarr history                                    # Show emitted history
//! ```
//!
//! Provider replies are replayed from a JSON file: an array whose elements
//! are either recommendation arrays or raw model text.

use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use brainarr::breaker::BreakerRegistry;
use brainarr::store::{parse_approval_key, DEFAULT_STATE_DIR};
use brainarr::{
    CacheKeyBuilder, DuplicationPrevention, HistoryStore, JsonHistoryStore, JsonReviewQueue,
    ProviderInvoker, RecommendationCoordinator, RecommendationPipeline, RecommendationSettings,
    ReplayProvider, ReviewQueue, RunLog, StaticLibrary,
};

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "brainarr")]
#[command(about = "Orchestrate AI music recommendations into import-list items", long_about = None)]
struct Cli {
    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline against replayed provider replies
    Run {
        /// Settings JSON file
        #[arg(short, long, env = "BRAINARR_SETTINGS")]
        settings: PathBuf,

        /// Library snapshot JSON file (profile, artists, albums)
        #[arg(short, long)]
        library: PathBuf,

        /// Provider replies to replay, in call order
        #[arg(short, long)]
        responses: PathBuf,

        /// Directory holding history and review queue
        #[arg(long, env = "BRAINARR_STATE_DIR", default_value = DEFAULT_STATE_DIR)]
        state_dir: PathBuf,

        /// Approval keys (`Artist|Album`) for this run
        #[arg(short, long)]
        approve: Vec<String>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the cache key and operation id for a request
    Key {
        #[arg(short, long, env = "BRAINARR_SETTINGS")]
        settings: PathBuf,

        #[arg(short, long)]
        library: PathBuf,
    },

    /// List or release review queue entries
    Review {
        #[arg(long, env = "BRAINARR_STATE_DIR", default_value = DEFAULT_STATE_DIR)]
        state_dir: PathBuf,

        /// Approval keys to release
        #[arg(short, long)]
        approve: Vec<String>,
    },

    /// Show previously emitted recommendations
    History {
        #[arg(long, env = "BRAINARR_STATE_DIR", default_value = DEFAULT_STATE_DIR)]
        state_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Run {
            settings,
            library,
            responses,
            state_dir,
            approve,
            output,
        } => {
            cmd_run(
                &settings,
                &library,
                &responses,
                &state_dir,
                approve,
                output.as_deref(),
            )
            .await
        }

        Commands::Key { settings, library } => cmd_key(&settings, &library),

        Commands::Review { state_dir, approve } => cmd_review(&state_dir, &approve).await,

        Commands::History { state_dir } => cmd_history(&state_dir).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_library(path: &Path) -> Result<StaticLibrary, Box<dyn std::error::Error>> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

async fn cmd_run(
    settings_path: &Path,
    library_path: &Path,
    responses_path: &Path,
    state_dir: &Path,
    approve: Vec<String>,
    output: Option<&Path>,
) -> CliResult {
    let mut settings = RecommendationSettings::from_json_file(settings_path)?;
    settings.review_approve_keys.extend(approve);
    let library = load_library(library_path)?;
    let profile = library.profile.clone();

    let history = Arc::new(JsonHistoryStore::open(state_dir).await?);
    let queue = Arc::new(JsonReviewQueue::open(state_dir).await?);
    let provider = Arc::new(ReplayProvider::from_file(responses_path).await?);

    let log = RunLog::new();
    let invoker = ProviderInvoker::new(Arc::new(BreakerRegistry::default()));
    let dedup = Arc::new(DuplicationPrevention::new(history));
    let pipeline = RecommendationPipeline::builder(dedup.clone())
        .library(Arc::new(library))
        .invoker(invoker.clone())
        .log(log.clone())
        .build();
    let coordinator = RecommendationCoordinator::builder(Arc::new(pipeline), dedup)
        .review_queue(queue)
        .provider(provider)
        .invoker(invoker)
        .log(log)
        .build();

    let items = coordinator
        .get_recommendations(&settings, &profile, &CancellationToken::new())
        .await?;
    eprintln!("{} recommendations", items.len());

    let json = serde_json::to_string_pretty(&items)?;
    write_output(&json, output)
}

fn cmd_key(settings_path: &Path, library_path: &Path) -> CliResult {
    let settings = RecommendationSettings::from_json_file(settings_path)?;
    let library = load_library(library_path)?;

    println!("cache key:    {}", CacheKeyBuilder::build_key(&settings, &library.profile));
    println!("operation id: {}", CacheKeyBuilder::operation_id(&settings, &library.profile));
    Ok(())
}

async fn cmd_review(state_dir: &Path, approve: &[String]) -> CliResult {
    let queue = JsonReviewQueue::open(state_dir).await?;

    if !approve.is_empty() {
        let keys: Vec<String> = approve.iter().filter_map(|k| parse_approval_key(k)).collect();
        if keys.len() < approve.len() {
            eprintln!("Ignored {} malformed key(s)", approve.len() - keys.len());
        }
        let released = queue.release(&keys).await?;
        eprintln!("Released {} entries", released.len());
        for entry in released {
            println!("  {}", entry.approval_key());
        }
        return Ok(());
    }

    let pending = queue.pending().await?;
    if pending.is_empty() {
        eprintln!("Review queue is empty.");
        return Ok(());
    }

    eprintln!("Pending review ({}):\n", pending.len());
    for entry in pending {
        println!("  {}", entry.approval_key());
        println!("     Confidence: {:.2}", entry.recommendation.confidence);
        println!("     Reason: {}", entry.reason);
        println!("     Queued: {}", entry.queued_at);
    }
    Ok(())
}

async fn cmd_history(state_dir: &Path) -> CliResult {
    let history = JsonHistoryStore::open(state_dir).await?;
    let records = history.records().await?;

    eprintln!("History ({} entries):\n", records.len());
    for record in records {
        println!("  {} - {} ({})", record.artist, record.album, record.recorded_at);
    }
    Ok(())
}

fn write_output(content: &str, path: Option<&Path>) -> CliResult {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("Output written to: {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
