//! newsvoice-rs: news summarization and voice synthesis service.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use newsvoice::api::{self, AppState};
use newsvoice::config::Config;
use newsvoice::feed::{FeedSource, JsonFileFeed};
use newsvoice::pipeline::cache::AudioCache;
use newsvoice::pipeline::engines::registry_from_config;
use newsvoice::pipeline::history::{BatchHistory, BatchRecord};
use newsvoice::pipeline::summarizer::SummarizationAdapter;
use newsvoice::pipeline::synthesis::SynthesisAdapter;
use newsvoice::pipeline::voices::VoiceCatalog;
use newsvoice::pipeline::ArticlePipeline;

#[derive(Parser, Debug)]
#[command(name = "newsvoice-rs", about = "Summarize news and read it aloud")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API
    Serve,
    /// Process a JSON file of articles and print the results
    Process {
        /// JSON array of articles
        #[arg(short, long)]
        articles: PathBuf,
        /// Voice preset id
        #[arg(long, default_value = "news_anchor_pro")]
        voice: String,
    },
    /// List voice presets
    Voices,
    /// Evict expired audio from the cache
    Sweep,
    /// Print the batch report for a day
    Report {
        /// YYYY-MM-DD, defaults to today
        #[arg(short, long, default_value = "today")]
        date: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Keep HTTP client internals quiet unless asked
    let filter = if args.verbose {
        EnvFilter::new("debug,hyper=info,reqwest=info")
    } else {
        EnvFilter::new("info,hyper=warn,reqwest=warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(args.config.as_deref());
    let history = Arc::new(BatchHistory::new(config.history.dir.clone()));

    match args.command {
        Command::Serve => {
            let pipeline = build_pipeline(&config).await?;
            spawn_cache_sweeper(pipeline.clone(), &config);
            let state = AppState {
                pipeline,
                history: config.history.enabled.then_some(history),
            };
            let addr = format!("{}:{}", config.api.host, config.api.port);
            api::serve(state, &addr).await?;
        }
        Command::Process { articles, voice } => {
            let pipeline = build_pipeline(&config).await?;
            let feed = JsonFileFeed::new(&articles);
            let raw = feed.fetch().await?;

            let t_start = Instant::now();
            let results = pipeline.process_batch(raw, &voice).await?;
            let latency_ms = t_start.elapsed().as_millis() as i64;
            if config.history.enabled {
                history.save(&BatchRecord::from_results(&voice, &results, latency_ms));
            }
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Command::Voices => {
            let catalog = VoiceCatalog::new(&config.voices);
            for voice in catalog.profiles() {
                println!(
                    "{:<20} {:<22} {} [{}]",
                    voice.id,
                    voice.display_name,
                    voice.description,
                    voice.engine_chain().join(" -> ")
                );
            }
        }
        Command::Sweep => {
            let cache = AudioCache::open(&config.cache.dir).await?;
            let removed = cache.evict_expired(config.cache.max_age()).await?;
            println!("Removed {removed} expired audio files from {}", cache.root().display());
        }
        Command::Report { date } => {
            println!("{}", history.generate_report(&date));
        }
    }

    Ok(())
}

async fn build_pipeline(config: &Config) -> Result<ArticlePipeline, Box<dyn std::error::Error>> {
    let catalog = VoiceCatalog::new(&config.voices);
    let summarizer = SummarizationAdapter::from_config(&config.summarization)?;

    let registry = registry_from_config(&config.synthesis);
    let synthesizer = SynthesisAdapter::new(registry, config.synthesis.max_concurrent);
    info!(
        "Speech engines: {:?} ({} concurrent)",
        synthesizer.engine_ids(),
        synthesizer.max_concurrent()
    );
    for voice in catalog.profiles() {
        for engine in voice.engine_chain() {
            if !synthesizer.has_engine(engine) {
                warn!("Voice {} uses unregistered engine {engine}", voice.id);
            }
        }
    }

    let cache = AudioCache::open(&config.cache.dir).await?;
    Ok(ArticlePipeline::new(
        catalog,
        summarizer,
        synthesizer,
        cache,
        config.pipeline.clone(),
    ))
}

/// Periodically evict expired audio while the server runs.
fn spawn_cache_sweeper(pipeline: ArticlePipeline, config: &Config) {
    let max_age = config.cache.max_age();
    let every = Duration::from_secs(config.cache.sweep_interval_secs.max(60));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            if let Err(e) = pipeline.cache().evict_expired(max_age).await {
                warn!("Cache sweep failed: {e}");
            }
        }
    });
}
