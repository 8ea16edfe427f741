//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use sitecorpus_artifacts::{ExportFormat, ExportTarget};
use sitecorpus_content::ChunkPolicy;
use sitecorpus_core::{
    CrawlReport, ExportRequest, ProgressReporter, crawl_target, export_corpus, process_pages,
    recrawl_target, update_target_url,
};
use sitecorpus_crawler::{AntiDetectionManager, CrawlOrchestrator};
use sitecorpus_discovery::{DiscoveryOptions, validate_url};
use sitecorpus_shared::{
    AppConfig, CrawlConfig, CrawlTarget, RunState, SkipReason, StrategyPreference, TargetId,
    TargetRegistryEntry, init_config, load_config, save_config,
};

use crate::store::PageStore;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// SiteCorpus: crawl a business website into machine-consumable corpora.
#[derive(Parser)]
#[command(
    name = "sitecorpus",
    version,
    about = "Crawl business websites and export their content as training and retrieval corpora.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Manage registered target websites.
    Targets {
        #[command(subcommand)]
        action: TargetsAction,
    },

    /// Crawl a registered target and store its pages.
    Crawl {
        /// Target id or name.
        #[arg(long)]
        target: String,

        /// Page budget for this run.
        #[arg(long, allow_negative_numbers = true)]
        max_pages: Option<i64>,

        /// Strategy: auto, premium, browser or static.
        #[arg(long)]
        strategy: Option<StrategyPreference>,
    },

    /// Discard stored pages and crawl again, reporting what changed.
    Recrawl {
        /// Target id or name.
        #[arg(long)]
        target: String,
    },

    /// Validate and probe a new root URL, then update the target.
    UpdateUrl {
        /// Target id or name.
        #[arg(long)]
        target: String,

        /// New root URL.
        url: String,
    },

    /// Export a target's processed content.
    Export {
        /// Target id or name.
        #[arg(long)]
        target: String,

        /// jsonl, chat-pairs, knowledge-base, retrieval-chunks, config-bundle, csv or text.
        #[arg(long)]
        format: ExportFormat,

        /// Output file (stdout when omitted).
        #[arg(long)]
        out: Option<PathBuf>,

        /// Chunking policy: token or section (defaults to config).
        #[arg(long)]
        policy: Option<String>,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Target registry subcommands.
#[derive(Subcommand)]
pub(crate) enum TargetsAction {
    /// Register a website.
    Add {
        /// Root URL of the website.
        url: String,

        /// Business name (defaults to the URL host).
        #[arg(short, long)]
        name: Option<String>,

        /// Page budget override.
        #[arg(long)]
        max_pages: Option<u32>,

        /// Strategy override.
        #[arg(long)]
        strategy: Option<StrategyPreference>,
    },
    /// List registered websites.
    List,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "sitecorpus=info",
        1 => "sitecorpus=debug",
        _ => "sitecorpus=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Targets { action } => match action {
            TargetsAction::Add {
                url,
                name,
                max_pages,
                strategy,
            } => cmd_targets_add(&url, name, max_pages, strategy),
            TargetsAction::List => cmd_targets_list(),
        },
        Command::Crawl {
            target,
            max_pages,
            strategy,
        } => cmd_crawl(&target, max_pages, strategy).await,
        Command::Recrawl { target } => cmd_recrawl(&target).await,
        Command::UpdateUrl { target, url } => cmd_update_url(&target, &url).await,
        Command::Export {
            target,
            format,
            out,
            policy,
        } => cmd_export(&target, format, out, policy.as_deref()),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn find_entry<'a>(config: &'a AppConfig, key: &str) -> Result<&'a TargetRegistryEntry> {
    config
        .find_target(key)
        .ok_or_else(|| eyre!("no target registered as '{key}' (see `sitecorpus targets list`)"))
}

/// Resolve the crawl target: CLI flags, then registry overrides, then defaults.
fn crawl_target_for(
    config: &AppConfig,
    entry: &TargetRegistryEntry,
    max_pages: Option<i64>,
    strategy: Option<StrategyPreference>,
) -> Result<CrawlTarget> {
    let root = validate_url(&entry.url)?;
    let max_pages = max_pages
        .or(entry.max_pages.map(i64::from))
        .unwrap_or(i64::from(config.defaults.max_pages));
    let strategy = strategy
        .or(entry.strategy)
        .unwrap_or(config.defaults.strategy);

    Ok(CrawlTarget::new(entry.id, root, max_pages, strategy)?)
}

fn orchestrator_for(config: &AppConfig) -> CrawlOrchestrator {
    CrawlOrchestrator::new(
        CrawlConfig::from(config),
        AntiDetectionManager::from_config(&config.anti_detection),
    )
}

/// Cancel cooperatively on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, letting in-flight fetches finish");
            signal.cancel();
        }
    });
    token
}

fn print_crawl_report(report: &CrawlReport) {
    let summary = &report.outcome.summary;
    println!();
    match summary.state {
        RunState::Cancelled => println!("  Crawl cancelled (partial results kept)."),
        _ => println!("  Crawl completed."),
    }
    println!("  Root:       {}", summary.root_url);
    println!("  Fetched:    {}", summary.succeeded);
    println!("  Failed:     {}", summary.failed);
    println!("  Skipped:    {}", summary.skipped);
    for usage in &summary.strategies_used {
        println!("  Via {:<17} {}", format!("{}:", usage.strategy), usage.pages);
    }
    println!("  Accepted:   {}", report.processing.accepted().count());
    for (page, reason) in report.processing.rejected() {
        println!("  Rejected:   {} ({reason})", page.url);
    }
    println!("  Time:       {:.1}s", report.elapsed.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn cmd_targets_add(
    url: &str,
    name: Option<String>,
    max_pages: Option<u32>,
    strategy: Option<StrategyPreference>,
) -> Result<()> {
    let mut config = load_config()?;
    let root = validate_url(url)?;

    let name = name.unwrap_or_else(|| root.host_str().unwrap_or("unknown").to_string());
    if config.find_target(&name).is_some() {
        return Err(eyre!("a target named '{name}' is already registered"));
    }
    if max_pages == Some(0) {
        return Err(eyre!("--max-pages must be at least 1"));
    }

    let entry = TargetRegistryEntry {
        id: TargetId::new(),
        name,
        url: root.to_string(),
        max_pages,
        strategy,
    };
    info!(id = %entry.id, name = %entry.name, url = %entry.url, "registering target");
    println!("Registered {} ({}) as {}", entry.name, entry.url, entry.id);

    config.targets.push(entry);
    save_config(&config)?;
    Ok(())
}

fn cmd_targets_list() -> Result<()> {
    let config = load_config()?;
    if config.targets.is_empty() {
        println!("No targets registered. Add one with `sitecorpus targets add <url>`.");
        return Ok(());
    }

    let store = PageStore::new(&config.defaults.output_dir);
    for entry in &config.targets {
        let pages = store.load_pages(entry.id)?;
        let fetched = pages.iter().filter(|p| p.success).count();
        println!("{}  {:<24} {}  ({fetched} pages)", entry.id, entry.name, entry.url);
    }
    Ok(())
}

async fn cmd_crawl(
    key: &str,
    max_pages: Option<i64>,
    strategy: Option<StrategyPreference>,
) -> Result<()> {
    let config = load_config()?;
    let entry = find_entry(&config, key)?;
    let target = crawl_target_for(&config, entry, max_pages, strategy)?;

    let store = PageStore::new(&config.defaults.output_dir);
    let _lock = store.lock(target.target_id)?;

    info!(
        target = %entry.name,
        url = %target.root_url,
        max_pages = target.max_pages,
        strategy = %target.strategy,
        "starting crawl"
    );

    let orchestrator = orchestrator_for(&config);
    let progress = Arc::new(CliProgress::new());
    let report = crawl_target(
        &orchestrator,
        &config,
        &target,
        cancel_on_ctrl_c(),
        progress,
    )
    .await?;

    let path = store.replace(target.target_id, &report.outcome.pages, &report.outcome.summary)?;

    print_crawl_report(&report);
    println!("  Pages saved to {}", path.display());
    Ok(())
}

async fn cmd_recrawl(key: &str) -> Result<()> {
    let config = load_config()?;
    let entry = find_entry(&config, key)?;
    let target = crawl_target_for(&config, entry, None, None)?;

    let store = PageStore::new(&config.defaults.output_dir);
    let _lock = store.lock(target.target_id)?;
    let previous = store.load_pages(target.target_id)?;

    let orchestrator = orchestrator_for(&config);
    let progress = Arc::new(CliProgress::new());
    let recrawl = recrawl_target(
        &orchestrator,
        &config,
        &target,
        &previous,
        cancel_on_ctrl_c(),
        progress,
    )
    .await?;

    let outcome = &recrawl.report.outcome;
    store.replace(target.target_id, &outcome.pages, &outcome.summary)?;

    print_crawl_report(&recrawl.report);
    println!(
        "  Re-crawled: found {} pages (previously {})",
        recrawl.current_count, recrawl.previous_count
    );
    println!("  Added:      {}", recrawl.diff.added.len());
    println!("  Changed:    {}", recrawl.diff.changed.len());
    println!("  Unchanged:  {}", recrawl.diff.unchanged.len());
    println!("  Removed:    {}", recrawl.diff.removed.len());
    println!();
    Ok(())
}

async fn cmd_update_url(key: &str, url: &str) -> Result<()> {
    let mut config = load_config()?;
    let update = update_target_url(&mut config, key, url, &DiscoveryOptions::default()).await?;
    save_config(&config)?;

    println!("Updated {}:", update.entry.name);
    println!("  Old URL: {}", update.old_url);
    println!("  New URL: {}", update.new_url);
    println!("Run `sitecorpus recrawl --target {}` to refresh its pages.", update.entry.id);
    Ok(())
}

fn cmd_export(
    key: &str,
    format: ExportFormat,
    out: Option<PathBuf>,
    policy: Option<&str>,
) -> Result<()> {
    let config = load_config()?;
    let entry = find_entry(&config, key)?;
    let root_url = Url::parse(&entry.url).map_err(|e| eyre!("stored URL '{}': {e}", entry.url))?;

    let policy = match policy {
        Some(name) => ChunkPolicy::named(name, &config.chunking)?,
        None => ChunkPolicy::from_config(&config.chunking)?,
    };

    let store = PageStore::new(&config.defaults.output_dir);
    let pages = store.load_pages(entry.id)?;
    let processing = process_pages(&config.processing, &pages);
    debug!(
        stored = pages.len(),
        accepted = processing.accepted().count(),
        "pages processed for export"
    );

    let request = ExportRequest {
        target: ExportTarget {
            id: entry.id,
            name: entry.name.clone(),
            root_url,
            assistant: config.assistant.clone(),
        },
        format,
        policy,
        output: out.clone(),
    };
    let summary = export_corpus(&request, processing.into_accepted())?;

    eprintln!(
        "Exported {} {format} records{}",
        summary.records,
        out.map(|p| format!(" to {}", p.display())).unwrap_or_default()
    );
    if !summary.skipped.is_empty() {
        eprintln!("Skipped {} records:", summary.skipped.len());
        for err in &summary.skipped {
            eprintln!("  {err}");
        }
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .expect("valid template")
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn page_fetched(&self, url: &Url, success: bool, current: usize, budget: usize) {
        let mark = if success { "" } else { " (failed)" };
        self.spinner
            .set_message(format!("Fetching [{current}/{budget}] {url}{mark}"));
    }

    fn page_skipped(&self, url: &Url, reason: SkipReason) {
        debug!(%url, ?reason, "skipped");
    }

    fn done(&self, _report: &CrawlReport) {
        self.spinner.finish_and_clear();
    }
}
