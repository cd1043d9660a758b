//! Command-line interface for vscan.
//!
//! Parses arguments into a frozen `ScanConfig`, wires the concrete cache,
//! resolver, and progress implementations into the engine, and maps every
//! failure to the documented exit codes: 0 clean, 1 findings, 2 the scan
//! itself could not complete.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};
use vscan_cache::{CacheStore, VerdictCache};
use vscan_config::{ScanConfig, ScanConfigBuilder, ScanFilters};
use vscan_engine::{EXIT_SCAN_FAILED, ProgressPort, ScanEngine, ScanOutcome, SilentProgress};
use vscan_resolver::clock::{Clock, SystemClock};
use vscan_resolver::{
    AnalyzerClient, AnalyzerClientOptions, RemoteResolver, RetryPolicy, VerdictResolver,
};
use vscan_utils::cancel::CancelFlag;
use vscan_utils::types::RiskLevel;

use crate::report::LogProgress;

/// vscan - security audit for locally installed VS Code extensions
#[derive(Parser)]
#[command(name = "vscan")]
#[command(about = "Audit installed VS Code extensions against a remote security analyzer")]
#[command(long_about = r#"
vscan discovers the extensions installed in your editor, asks a remote
security-analysis service for a verdict on each one, and reports the
results. Verdicts are cached locally in an authenticated store so repeat
scans stay fast and offline-friendly.

EXAMPLES:
  # Scan everything installed
  vscan scan

  # Scan with more workers and a fresh cache
  vscan scan --workers 5 --refresh-cache

  # Only one publisher, report medium risk and up
  vscan scan --publisher ms-python --min-risk medium

  # Cache maintenance
  vscan cache stats
  vscan cache clear

EXIT CODES:
  0  scan completed, no findings
  1  scan completed, vulnerabilities or high-risk extensions found
  2  the scan itself could not complete
"#)]
#[command(version)]
pub struct Cli {
    /// Verbose output (debug-level logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress progress output; only warnings and the final result
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Discover and scan installed extensions
    Scan(ScanArgs),

    /// Inspect or reset the local verdict cache
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(Args, Default)]
pub struct ScanArgs {
    /// Extensions directory (default: ~/.vscode/extensions)
    #[arg(long, value_name = "DIR")]
    pub extensions_dir: Option<String>,

    /// Cache directory (default: platform cache dir + /vscan)
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<String>,

    /// Analyzer base URL (https only)
    #[arg(long, value_name = "URL")]
    pub api_url: Option<String>,

    /// Parallel workers, 1-5
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Minimum seconds between requests per worker, 0.1-30
    #[arg(long, value_name = "SECONDS")]
    pub request_delay: Option<f64>,

    /// Retries per request after the first attempt, 0-10
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,

    /// Base backoff delay in seconds, 0.1-60
    #[arg(long, value_name = "SECONDS")]
    pub retry_base_delay: Option<f64>,

    /// Cache entry lifetime in days, 1-365
    #[arg(long, value_name = "DAYS")]
    pub cache_max_age: Option<u32>,

    /// Skip cache lookups entirely
    #[arg(long)]
    pub no_cache: bool,

    /// Ignore cached verdicts but refresh them with fresh results
    #[arg(long)]
    pub refresh_cache: bool,

    /// Keep dependency lists, risk factors, and raw analyzer payloads
    #[arg(long)]
    pub detailed: bool,

    /// Ceiling on analyzer response size in bytes
    #[arg(long, value_name = "BYTES")]
    pub max_response_bytes: Option<u64>,

    /// Per-request timeout in seconds
    #[arg(long, value_name = "SECONDS")]
    pub request_timeout: Option<u64>,

    /// Only scan these extension ids (publisher.name), comma-separated
    #[arg(long, value_name = "IDS", value_delimiter = ',')]
    pub include: Vec<String>,

    /// Never scan these extension ids, comma-separated
    #[arg(long, value_name = "IDS", value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Only scan extensions from this publisher
    #[arg(long, value_name = "PUBLISHER")]
    pub publisher: Option<String>,

    /// Only report verdicts at or above this risk level
    #[arg(long, value_name = "LEVEL")]
    pub min_risk: Option<RiskLevel>,

    /// Risk level at which findings fail the scan (default: high)
    #[arg(long, value_name = "LEVEL")]
    pub risk_threshold: Option<RiskLevel>,
}

#[derive(Subcommand)]
pub enum CacheCommand {
    /// Entry count, average age, and staleness of the verdict cache
    Stats {
        #[arg(long, value_name = "DIR")]
        cache_dir: Option<String>,
    },

    /// Remove every cached verdict
    Clear {
        #[arg(long, value_name = "DIR")]
        cache_dir: Option<String>,
    },
}

/// Parse arguments, run the requested command, and return the process
/// exit code. Never panics on user input; never exits from library code.
pub fn run() -> i32 {
    let cli = Cli::parse();

    // A second init (e.g. under tests) is harmless.
    let _ = vscan_utils::logging::init_tracing(cli.verbose, cli.quiet);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            return EXIT_SCAN_FAILED;
        }
    };

    match cli.command {
        Command::Scan(args) => {
            let config = match build_config(args) {
                Ok(config) => config,
                Err(e) => {
                    error!(error = %e, "invalid configuration");
                    return EXIT_SCAN_FAILED;
                }
            };
            match runtime.block_on(try_scan(config, cli.quiet)) {
                Ok(outcome) => {
                    print_summary(&outcome);
                    outcome.exit_code
                }
                Err(e) => {
                    error!(error = %format!("{e:#}"), "scan failed");
                    EXIT_SCAN_FAILED
                }
            }
        }
        Command::Cache { command } => match runtime.block_on(run_cache(command)) {
            Ok(()) => 0,
            Err(e) => {
                error!(error = %format!("{e:#}"), "cache operation failed");
                EXIT_SCAN_FAILED
            }
        },
    }
}

fn build_config(args: ScanArgs) -> Result<ScanConfig, vscan_config::ConfigError> {
    let mut builder = ScanConfigBuilder::new()
        .use_cache(!args.no_cache)
        .refresh_cache(args.refresh_cache)
        .detailed(args.detailed)
        .filters(ScanFilters {
            include_ids: args.include,
            exclude_ids: args.exclude,
            publisher: args.publisher,
            min_risk_level: args.min_risk,
        });

    if let Some(dir) = args.extensions_dir {
        builder = builder.extensions_dir(dir);
    }
    if let Some(dir) = args.cache_dir {
        builder = builder.cache_dir(dir);
    }
    if let Some(url) = args.api_url {
        builder = builder.api_base_url(url);
    }
    if let Some(n) = args.workers {
        builder = builder.workers(n);
    }
    if let Some(secs) = args.request_delay {
        builder = builder.request_delay_seconds(secs);
    }
    if let Some(n) = args.max_retries {
        builder = builder.max_retries(n);
    }
    if let Some(secs) = args.retry_base_delay {
        builder = builder.retry_base_delay_seconds(secs);
    }
    if let Some(days) = args.cache_max_age {
        builder = builder.cache_max_age_days(days);
    }
    if let Some(bytes) = args.max_response_bytes {
        builder = builder.max_response_bytes(bytes);
    }
    if let Some(secs) = args.request_timeout {
        builder = builder.per_request_timeout_seconds(secs);
    }
    if let Some(level) = args.risk_threshold {
        builder = builder.risk_exit_threshold(level);
    }

    builder.freeze()
}

/// Assemble the pipeline and run one scan.
async fn try_scan(config: ScanConfig, quiet: bool) -> anyhow::Result<ScanOutcome> {
    let cancel = CancelFlag::new();
    spawn_interrupt_handler(cancel.clone());

    let extensions = vscan_discovery::discover(config.extensions_dir())
        .context("extension discovery failed")?;

    let cache = CacheStore::open(config.cache_dir(), chrono::Utc::now())
        .context("could not open the verdict cache")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let policy = RetryPolicy::new(config.max_retries(), config.retry_base_delay());
    let mut resolvers: Vec<Arc<dyn VerdictResolver>> = Vec::with_capacity(config.workers());
    for _ in 0..config.workers() {
        let client = AnalyzerClient::new(AnalyzerClientOptions {
            base_url: config.api_base_url().to_string(),
            request_timeout: config.per_request_timeout(),
            max_response_bytes: config.max_response_bytes(),
            min_request_interval: config.request_delay(),
        })
        .context("could not construct analyzer client")?;
        resolvers.push(Arc::new(RemoteResolver::new(
            client,
            Arc::clone(&clock),
            policy,
            config.poll_interval(),
            config.analysis_timeout(),
            config.detailed(),
        )));
    }

    let progress: Arc<dyn ProgressPort> = if quiet {
        Arc::new(SilentProgress)
    } else {
        Arc::new(LogProgress)
    };

    let engine = ScanEngine::new(
        config,
        Box::new(cache) as Box<dyn VerdictCache>,
        resolvers,
        progress,
        clock,
        cancel.clone(),
    )
    .context("engine construction failed")?;

    Ok(engine.run(extensions).await)
}

/// First interrupt cancels cooperatively; a second one aborts.
fn spawn_interrupt_handler(cancel: CancelFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; flushing completed results");
            cancel.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        }
    });
}

fn print_summary(outcome: &ScanOutcome) {
    let stats = &outcome.stats;
    let duration = match (stats.started_at, stats.ended_at) {
        (Some(start), Some(end)) => format!("{:.1}s", (end - start).as_seconds_f64()),
        _ => "?".to_string(),
    };
    println!(
        "scanned {} extension(s) in {duration}: {} ok, {} failed, {} unknown to analyzer ({} from cache, {} retried requests){}",
        stats.from_cache + stats.fresh_scans,
        stats.succeeded,
        stats.failed,
        stats.not_found,
        stats.from_cache,
        stats.retried_requests,
        if outcome.cancelled { " [cancelled]" } else { "" },
    );
    for verdict in &outcome.verdicts {
        if verdict.is_success()
            && (verdict.vuln_counts.total > 0 || verdict.risk_level >= RiskLevel::High)
        {
            println!(
                "  {} {}: risk {} ({} vulnerabilities)",
                verdict.extension_id,
                verdict.version,
                verdict.risk_level,
                verdict.vuln_counts.total,
            );
        }
    }
}

async fn run_cache(command: CacheCommand) -> anyhow::Result<()> {
    match command {
        CacheCommand::Stats { cache_dir } => {
            let mut store = open_store(cache_dir)?;
            let stats = store
                .stats(chrono::Utc::now(), Duration::from_secs(30 * 86_400))
                .context("could not read cache statistics")?;
            println!(
                "{} entr{} ({} stale), average age {}",
                stats.entries,
                if stats.entries == 1 { "y" } else { "ies" },
                stats.stale_entries,
                stats
                    .avg_age_secs
                    .map(|s| format!("{s}s"))
                    .unwrap_or_else(|| "n/a".to_string()),
            );
        }
        CacheCommand::Clear { cache_dir } => {
            let mut store = open_store(cache_dir)?;
            let removed = store.clear().context("could not clear the cache")?;
            println!("removed {removed} cached verdict(s)");
        }
    }
    Ok(())
}

fn open_store(cache_dir: Option<String>) -> anyhow::Result<CacheStore> {
    let mut builder = ScanConfigBuilder::new();
    if let Some(dir) = cache_dir {
        builder = builder.cache_dir(dir);
    }
    let config = builder.freeze().context("invalid cache directory")?;
    CacheStore::open(config.cache_dir(), chrono::Utc::now())
        .context("could not open the verdict cache")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn scan_args_map_into_config() {
        let cli = Cli::try_parse_from([
            "vscan",
            "scan",
            "--workers",
            "2",
            "--no-cache",
            "--publisher",
            "acme",
            "--min-risk",
            "medium",
            "--cache-dir",
            "/tmp/vscan-cli-test-cache",
        ])
        .unwrap();
        let Command::Scan(args) = cli.command else {
            panic!("expected scan command");
        };
        let config = build_config(args).unwrap();
        assert_eq!(config.workers(), 2);
        assert!(!config.use_cache());
        assert_eq!(config.filters().publisher.as_deref(), Some("acme"));
        assert_eq!(config.filters().min_risk_level, Some(RiskLevel::Medium));
    }

    #[test]
    fn out_of_range_workers_is_a_config_error() {
        let cli = Cli::try_parse_from(["vscan", "scan", "--workers", "9"]).unwrap();
        let Command::Scan(args) = cli.command else {
            panic!("expected scan command");
        };
        assert!(build_config(args).is_err());
    }

    #[test]
    fn include_lists_split_on_commas() {
        let cli = Cli::try_parse_from(["vscan", "scan", "--include", "a.one,b.two"]).unwrap();
        let Command::Scan(args) = cli.command else {
            panic!("expected scan command");
        };
        assert_eq!(args.include, vec!["a.one".to_string(), "b.two".to_string()]);
    }

    #[test]
    fn bad_risk_level_is_a_parse_error() {
        assert!(Cli::try_parse_from(["vscan", "scan", "--min-risk", "severe"]).is_err());
    }
}
