//! Tracker list CLI
//!
//! CLI tool for inspecting rule documents, classifying requests and managing
//! the local rule cache and blocking policy.

mod bench;
mod rules;

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use log::info;
use serde::Deserialize;

use tl_core::{BlockingMode, EngineEvent, TrackerEngine};
use tl_loader::{FileStore, HttpRuleSource, ListLoader, LoaderConfig, RefreshOutcome};

#[derive(Parser)]
#[command(name = "tl-cli")]
#[command(about = "Tracker list classification tools")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cache directory (overrides the config file)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show rule document statistics
    Info {
        /// Rule document (defaults to the cached copy)
        #[arg(short, long)]
        input: Option<String>,
    },

    /// Print every table of a rule document
    Dump {
        #[arg(short, long)]
        input: Option<String>,
    },

    /// Classify request URLs against a page
    Classify {
        #[arg(short, long)]
        input: Option<String>,

        /// URL of the page issuing the requests
        #[arg(short, long)]
        page: String,

        /// Request URLs
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Replay a JSONL request trace and report trackers per page
    Scan {
        #[arg(short, long)]
        input: Option<String>,

        /// Trace file, one {"url", "page"} object per line
        #[arg(short, long)]
        trace: String,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Benchmark classification
    Bench {
        #[arg(short, long)]
        input: Option<String>,

        /// Number of generated random requests
        #[arg(long, default_value_t = 1000)]
        requests: usize,

        /// Iterations over the realistic mix
        #[arg(long, default_value_t = 10_000)]
        iterations: usize,

        #[arg(long, default_value_t = bench::DEFAULT_SEED)]
        seed: u32,
    },

    /// Fetch the rule list if the remote version is newer
    Refresh {
        /// Keep refreshing on the configured interval until interrupted
        #[arg(long)]
        watch: bool,
    },

    /// Show or change the blocking policy
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },
}

#[derive(Subcommand)]
enum PolicyAction {
    /// Print the current mode
    Show,
    /// Block every tracker
    BlockAll,
    /// Block nothing
    UnblockAll,
    /// Block only the given companies
    Block {
        /// Company (app) ids
        #[arg(long = "app", required = true)]
        apps: Vec<u32>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = load_config(&cli).and_then(|config| match cli.command {
        Commands::Info { input } => cmd_info(&config, input.as_deref(), cli.verbose > 0),
        Commands::Dump { input } => cmd_dump(&config, input.as_deref()),
        Commands::Classify { input, page, urls } => cmd_classify(&config, input.as_deref(), &page, &urls),
        Commands::Scan { input, trace, json } => cmd_scan(&config, input.as_deref(), &trace, json),
        Commands::Bench {
            input,
            requests,
            iterations,
            seed,
        } => cmd_bench(
            &config,
            input.as_deref(),
            bench::BenchOptions {
                requests,
                iterations,
                seed,
            },
        ),
        Commands::Refresh { watch } => cmd_refresh(&config, watch),
        Commands::Policy { action } => cmd_policy(&config, action),
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<LoaderConfig, String> {
    let mut config = match &cli.config {
        Some(path) => LoaderConfig::from_file(path).map_err(|e| e.to_string())?,
        None => LoaderConfig::default(),
    };
    if let Some(dir) = &cli.cache_dir {
        config.cache_dir = dir.clone();
    }
    Ok(config)
}

fn engine(config: &LoaderConfig) -> TrackerEngine {
    let store = Arc::new(FileStore::new(&config.cache_dir));
    TrackerEngine::new(config.engine.clone(), store)
}

// =============================================================================
// Rule Inspection
// =============================================================================

fn cmd_info(config: &LoaderConfig, input: Option<&str>, verbose: bool) -> Result<(), String> {
    let rules = rules::load_rules(input, &config.cache_dir)?;
    rules::print_summary(&rules, verbose);
    Ok(())
}

fn cmd_dump(config: &LoaderConfig, input: Option<&str>) -> Result<(), String> {
    let rules = rules::load_rules(input, &config.cache_dir)?;
    print!("{}", rules.db);
    Ok(())
}

fn cmd_classify(config: &LoaderConfig, input: Option<&str>, page: &str, urls: &[String]) -> Result<(), String> {
    let rules = rules::load_rules(input, &config.cache_dir)?;
    let engine = engine(config);
    engine.install(rules.db);
    let db = engine.database();

    for url in urls {
        match engine.find(url, page) {
            Some(m) => {
                let (company, blocked) = match db.company_for_bug(m.bug_id) {
                    Some(c) => (c.name.as_str(), engine.should_block(c.app_id)),
                    None => ("<unknown company>", false),
                };
                println!(
                    "{}\n  bug {} via {} -> {}{}",
                    url,
                    m.bug_id,
                    m.source,
                    company,
                    if blocked { " [blocked]" } else { "" }
                );
            }
            None => println!("{}\n  no match", url),
        }
    }

    Ok(())
}

// =============================================================================
// Trace Scan
// =============================================================================

#[derive(Deserialize)]
struct TraceRequest {
    url: String,
    #[serde(alias = "initiator")]
    page: String,
}

fn cmd_scan(config: &LoaderConfig, input: Option<&str>, trace: &str, json: bool) -> Result<(), String> {
    let rules = rules::load_rules(input, &config.cache_dir)?;
    let engine = engine(config);
    engine.install(rules.db);

    let discovered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&discovered);
    engine.subscribe(move |event| {
        if let EngineEvent::TrackerDiscovered { .. } = event {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    });

    let text = fs::read_to_string(trace).map_err(|e| format!("Failed to read trace '{}': {}", trace, e))?;
    let mut pages: Vec<String> = Vec::new();
    let mut requests = 0usize;
    let mut malformed = 0usize;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let request: TraceRequest = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(_) => {
                malformed += 1;
                continue;
            }
        };
        requests += 1;

        if let Some(tracker) = engine.observe(&request.url, &request.page, Utc::now()) {
            engine.mark_completed(&request.page, tracker.bug_id, Utc::now());
        }
        if !pages.contains(&request.page) {
            pages.push(request.page);
        }
    }

    if json {
        let report: BTreeMap<&str, _> = pages
            .iter()
            .map(|page| (page.as_str(), engine.trackers_for_page(page)))
            .collect();
        let out = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
        println!("{}", out);
        return Ok(());
    }

    println!("Scanned {} requests on {} pages ({} malformed lines)", requests, pages.len(), malformed);
    println!(
        "Discovered {} tracker(s), blocking mode {:?}",
        discovered.load(Ordering::Relaxed),
        engine.blocking_mode()
    );
    for page in &pages {
        println!();
        println!("{} ({} companies)", page, engine.tracker_count_for_page(page));
        for company in engine.trackers_for_page(page) {
            println!(
                "  {:<32} {:<20} {}",
                company.name,
                company.category,
                if company.is_blocked { "blocked" } else { "allowed" }
            );
        }
    }

    Ok(())
}

fn cmd_bench(config: &LoaderConfig, input: Option<&str>, opts: bench::BenchOptions) -> Result<(), String> {
    let rules = rules::load_rules(input, &config.cache_dir)?;
    println!(
        "Loaded {} (v{}, {:.1}ms)",
        rules.origin,
        rules.db.version(),
        rules.parse_ms
    );
    let matcher = rules.db.matcher(&config.engine.vendor_domain_suffix);
    bench::run(&matcher, &opts)
}

// =============================================================================
// Refresh and Policy
// =============================================================================

fn cmd_refresh(config: &LoaderConfig, watch: bool) -> Result<(), String> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start runtime: {}", e))?;

    let source = HttpRuleSource::new(config).map_err(|e| e.to_string())?;
    let store = Arc::new(FileStore::new(&config.cache_dir));
    let loader = Arc::new(ListLoader::new(Arc::new(source), store, config.fetch_timeout()));
    let engine = Arc::new(engine(config));

    if watch {
        return runtime.block_on(watch_refresh(loader, engine, config.refresh_interval()));
    }

    match runtime.block_on(loader.refresh(&engine)) {
        RefreshOutcome::Downloaded { version } => println!("Downloaded rule list version {}", version),
        RefreshOutcome::DownloadedNotPersisted { version } => {
            return Err(format!(
                "Downloaded rule list version {} but could not save it to {}",
                version,
                config.cache_dir.display()
            ))
        }
        RefreshOutcome::Cached { version } => println!("Using cached rule list version {}", version),
        RefreshOutcome::AlreadyCurrent { version } => println!("Rule list version {} is current", version),
        RefreshOutcome::Empty => return Err("No rule list available (offline and nothing cached)".to_string()),
    }

    let db = engine.database();
    let stats = db.stats();
    println!(
        "  {} apps, {} bugs, {} host, {} host+path, {} path, {} regex",
        stats.apps,
        stats.bugs,
        stats.host_patterns,
        stats.host_path_patterns,
        stats.path_patterns,
        stats.regex_patterns
    );
    Ok(())
}

async fn watch_refresh(loader: Arc<ListLoader>, engine: Arc<TrackerEngine>, interval: Duration) -> Result<(), String> {
    engine.subscribe(|event| {
        if let EngineEvent::RulesLoaded { generation, version, .. } = event {
            println!("Installed generation {} (version {})", generation, version);
        }
    });

    info!("Refreshing every {:?}", interval);
    let task = loader.run_periodic(engine, interval);
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to wait for Ctrl-C: {}", e))?;
    task.abort();
    Ok(())
}

fn cmd_policy(config: &LoaderConfig, action: PolicyAction) -> Result<(), String> {
    let engine = engine(config);

    let result = match action {
        PolicyAction::Show => {
            print_mode(&engine.blocking_mode());
            return Ok(());
        }
        PolicyAction::BlockAll => engine.block_all(),
        PolicyAction::UnblockAll => engine.unblock_all(),
        PolicyAction::Block { apps } => engine.block_selected(apps),
    };

    result.map_err(|e| e.to_string())?;
    print_mode(&engine.blocking_mode());
    Ok(())
}

fn print_mode(mode: &BlockingMode) {
    match mode {
        BlockingMode::None => println!("Blocking: none"),
        BlockingMode::All => println!("Blocking: all"),
        BlockingMode::Selected(apps) => {
            let ids: Vec<String> = apps.iter().map(|id| id.to_string()).collect();
            println!("Blocking: selected ({})", ids.join(", "));
        }
    }
}
