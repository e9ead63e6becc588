mod cache;
mod config;
mod crawl;
mod db;
mod error;
mod fetcher;
mod model;
mod parser;
mod periods;
mod reconcile;
mod store;
mod sync;
mod validate;

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::cache::ToolCache;
use crate::config::Settings;
use crate::crawl::{CrawlOptions, CrawlSession};
use crate::fetcher::HttpFetcher;
use crate::model::Tool;
use crate::parser::normalize::normalize_url;
use crate::reconcile::{Decision, Reconciler};
use crate::store::{RecordStore, RestStore};
use crate::sync::{SyncExecutor, SyncReport};

const STORE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(
    name = "taaft_sync",
    about = "Crawl theresanaiforthat.com listings and sync them into Supabase"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone, Copy)]
struct CrawlArgs {
    /// Max periods to crawl (default: all)
    #[arg(short = 'n', long)]
    max_periods: Option<usize>,
    /// First period to crawl, 1-indexed, newest first
    #[arg(short, long, default_value = "1")]
    start_period: usize,
    /// Unattended run: no progress bars
    #[arg(long)]
    headless: bool,
}

#[derive(clap::Args, Clone, Copy)]
struct SyncArgs {
    /// Rows per upsert batch (default from config)
    #[arg(short, long)]
    batch_size: Option<usize>,
    /// Reconcile and report without writing to the store
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl period listings into the local cache
    Crawl {
        #[command(flatten)]
        crawl: CrawlArgs,
    },
    /// Reconcile the whole cache against the store and upsert
    Sync {
        #[command(flatten)]
        sync: SyncArgs,
    },
    /// Crawl, then reconcile and upsert only the new tools
    Run {
        #[command(flatten)]
        crawl: CrawlArgs,
        #[command(flatten)]
        sync: SyncArgs,
    },
    /// Strip query strings, fragments and trailing slashes from stored URLs
    CleanUrls {
        #[arg(long)]
        dry_run: bool,
    },
    /// Data-quality scan of the cache
    Check {
        /// Slug whose logo is the known placeholder image
        #[arg(short, long)]
        reference: Option<String>,
        /// Skip the link liveness pass
        #[arg(long)]
        skip_links: bool,
        /// Unattended run: no progress bars
        #[arg(long)]
        headless: bool,
    },
    /// Remove tools from the cache, the ledger and the store
    Cleanup {
        /// JSON list of slugs (default: the bad-ids file when no --name is given)
        #[arg(long)]
        ids: Option<PathBuf>,
        /// Case-insensitive name substring; repeatable
        #[arg(long)]
        name: Vec<String>,
    },
    /// Show ledger and cache statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load()?;
    let cache = ToolCache::new(&settings.paths.cache);

    let result = match cli.command {
        Commands::Crawl { crawl } => {
            let conn = ledger(&settings)?;
            let (_, fresh) = crawl_periods(&settings, &conn, &cache, crawl).await?;
            println!("{} new tools written to {:?}", fresh.len(), cache.path());
            Ok(())
        }
        Commands::Sync { sync } => {
            settings.store_credentials()?;
            let conn = ledger(&settings)?;
            let tools = cache.load_required()?;
            if tools.is_empty() {
                println!("Cache is empty. Run 'crawl' first.");
                return Ok(());
            }
            println!("Reconciling {} cached tools...", tools.len());
            let report = sync_tools(&settings, &conn, tools.clone(), &tools, sync, true).await?;
            print_sync(&report);
            Ok(())
        }
        Commands::Run { crawl, sync } => {
            settings.store_credentials()?;
            let conn = ledger(&settings)?;

            let t_crawl = Instant::now();
            let (existing, fresh) = crawl_periods(&settings, &conn, &cache, crawl).await?;
            println!(
                "Crawled {} new tools in {}",
                fresh.len(),
                format_duration(t_crawl.elapsed())
            );
            if fresh.is_empty() {
                println!("Nothing new to sync.");
                return Ok(());
            }

            let report =
                sync_tools(&settings, &conn, fresh, &existing, sync, !crawl.headless).await?;
            print_sync(&report);
            Ok(())
        }
        Commands::CleanUrls { dry_run } => clean_urls(&settings, dry_run).await,
        Commands::Check {
            reference,
            skip_links,
            headless,
        } => {
            let tools = cache.load_required()?;
            let checker = validate::Checker::new(&settings.checks)?.show_progress(!headless);
            let report = checker.run(&tools, reference.as_deref(), skip_links).await?;
            print_check(&report, &tools);

            let bad = report.bad_ids();
            if !bad.is_empty() {
                validate::write_bad_ids(&settings.paths.bad_ids, &bad)?;
                println!("Saved {} bad ids to {:?}", bad.len(), settings.paths.bad_ids);
            }
            Ok(())
        }
        Commands::Cleanup { ids, name } => cleanup(&settings, &cache, ids, &name).await,
        Commands::Stats => {
            let conn = ledger(&settings)?;
            let s = db::get_stats(&conn)?;
            println!("Cached tools:     {}", cache.load()?.len());
            println!("Identities:       {}", s.identities);
            println!("Sync runs:        {}", s.runs);
            println!("Failed batches:   {}", s.failed_batches);
            println!("Periods crawled:  {}", s.periods_crawled);
            println!("Periods skipped:  {}", s.periods_skipped);
            println!("Last sync:        {}", s.last_run.as_deref().unwrap_or("never"));
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn ledger(settings: &Settings) -> anyhow::Result<Connection> {
    let conn = db::connect(&settings.paths.ledger)?;
    db::init_schema(&conn)?;
    Ok(conn)
}

fn open_store(settings: &Settings) -> anyhow::Result<RestStore> {
    let creds = settings.store_credentials()?;
    Ok(RestStore::new(&creds, STORE_TIMEOUT)?)
}

/// Returns the tools cached before this run and the ones it added.
async fn crawl_periods(
    settings: &Settings,
    conn: &Connection,
    cache: &ToolCache,
    args: CrawlArgs,
) -> anyhow::Result<(Vec<Tool>, Vec<Tool>)> {
    let existing = cache.load()?;
    let today = chrono::Local::now().date_naive();
    let periods = periods::select(
        periods::all_periods(&settings.site.base_url, today),
        args.start_period,
        args.max_periods,
    );
    if periods.is_empty() {
        println!("No periods selected.");
        return Ok((existing, Vec::new()));
    }

    let fetcher = match settings.spider_key() {
        Some(key) => HttpFetcher::spider(key)?,
        None => HttpFetcher::direct(Duration::from_millis(settings.crawl.step_timeout_ms))?,
    };
    let mut opts = CrawlOptions::from_settings(&settings.site, &settings.crawl);
    opts.show_progress = !args.headless;

    println!(
        "Crawling {} periods ({} tools already cached)...",
        periods.len(),
        existing.len()
    );
    let mut session = CrawlSession::new(fetcher, opts, existing.clone());
    let reports = session.run(&periods, cache).await?;
    db::record_periods(conn, &reports)?;

    let stats = session.stats();
    println!(
        "Periods: {} ok, {} skipped | {} cards seen, {} new, {} rejected",
        stats.periods_done, stats.periods_skipped, stats.extracted, stats.new_tools, stats.rejected
    );
    Ok((existing, session.fresh().to_vec()))
}

async fn sync_tools(
    settings: &Settings,
    conn: &Connection,
    fresh: Vec<Tool>,
    previous: &[Tool],
    args: SyncArgs,
    show_progress: bool,
) -> anyhow::Result<SyncReport> {
    let store = open_store(settings)?;
    let table = &settings.store.table;

    let remote = store::remote_rows(&store, table)
        .await
        .context("Could not read store snapshot")?;
    info!("Store snapshot: {} rows", remote.len());

    let identities = db::load_identities(conn)?;
    if identities.is_empty() {
        info!("Ledger is empty; identities will come from the URL match");
    } else {
        info!("Ledger: {} known identities", identities.len());
    }
    let mut reconciler = Reconciler::new(&remote, identities);
    let decisions = reconciler.reconcile(fresh, previous);
    for d in &decisions {
        if let Decision::Skip { slug, reason } = d {
            warn!("Skipping {}: {}", slug, reason);
        }
    }
    let counts = reconcile::count(&decisions);
    println!(
        "Decisions: {} insert, {} update, {} skip",
        counts.inserts, counts.updates, counts.skips
    );

    let run_id = db::start_run(conn, "sync", args.dry_run)?;
    let report = SyncExecutor::new(&store, table, args.batch_size.unwrap_or(settings.store.batch_size))
        .dry_run(args.dry_run)
        .show_progress(show_progress)
        .apply(&decisions)
        .await;

    if !report.dry_run {
        db::save_identities(conn, &report.committed)?;
    }
    db::finish_run(conn, run_id, &report)?;
    Ok(report)
}

async fn clean_urls(settings: &Settings, dry_run: bool) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let table = &settings.store.table;
    let rows = store::remote_rows(&store, table).await?;

    let mut changed: Vec<Value> = Vec::new();
    for remote in rows {
        let Some(url) = remote.url else { continue };
        let clean = normalize_url(&url);
        if clean != url {
            println!("  {} -> {}", url, clean);
            changed.push(json!({ "id": remote.id, "url": clean }));
        }
    }
    println!("{} URLs need cleaning.", changed.len());
    if dry_run || changed.is_empty() {
        return Ok(());
    }

    let mut updated = 0;
    for (i, batch) in changed.chunks(settings.store.batch_size.max(1)).enumerate() {
        match store.upsert(table, batch).await {
            Ok(n) => updated += n,
            Err(e) => warn!("Batch {} failed: {}", i + 1, e),
        }
    }
    println!("Updated {} of {} URLs.", updated, changed.len());
    Ok(())
}

async fn cleanup(
    settings: &Settings,
    cache: &ToolCache,
    ids: Option<PathBuf>,
    names: &[String],
) -> anyhow::Result<()> {
    let mut slugs: HashSet<String> = HashSet::new();
    let ids = ids.or_else(|| names.is_empty().then(|| settings.paths.bad_ids.clone()));
    if let Some(path) = ids {
        slugs.extend(validate::read_bad_ids(&path)?);
    }
    if !names.is_empty() {
        slugs.extend(cache::slugs_matching_names(&cache.load_required()?, names));
    }
    if slugs.is_empty() {
        println!("No tools selected for removal.");
        return Ok(());
    }

    let store = open_store(settings)?;
    let conn = ledger(settings)?;

    let removed = cache.remove(&slugs)?;
    println!("Removed {} tools from {:?}:", removed.len(), cache.path());
    for t in &removed {
        println!("  - {} ({})", truncate(&t.name, 40), t.id);
    }
    let removed_slugs: Vec<String> = removed.iter().map(|t| t.id.clone()).collect();
    let unbound = db::remove_identities(&conn, &removed_slugs)?;

    let urls: Vec<String> = removed.iter().map(|t| t.url.clone()).collect();
    let report = SyncExecutor::new(&store, &settings.store.table, settings.store.batch_size)
        .delete_by_urls(&urls)
        .await?;
    println!(
        "Store: {} deleted, {} not found, {} failed | {} ledger identities dropped",
        report.deleted, report.not_found, report.failed, unbound
    );
    Ok(())
}

fn print_sync(report: &SyncReport) {
    let mode = if report.dry_run { " (dry run)" } else { "" };
    println!(
        "Sync{}: {} inserted, {} updated, {} skipped in {} batches",
        mode, report.inserted, report.updated, report.skipped, report.batches
    );
    for f in &report.failures {
        println!("  batch {} ({} rows) failed: {}", f.index, f.size, f.error);
    }
}

fn print_check(report: &validate::CheckReport, tools: &[Tool]) {
    let name_of = |slug: &str| {
        tools
            .iter()
            .find(|t| t.id == slug)
            .map(|t| truncate(&t.name, 40))
            .unwrap_or_default()
    };

    println!("Checked {} tools", report.checked);
    println!("Short descriptions: {}", report.short_descriptions.len());
    println!("Invalid logos:      {}", report.invalid_logos.len());
    println!("Dead links:         {}", report.dead_links.len());
    for slug in report.dead_links.iter().take(10) {
        println!("  - {} ({})", name_of(slug.as_str()), slug);
    }

    if !report.top_signatures.is_empty() {
        println!("\n--- Logo signatures ---");
        for (sig, n) in &report.top_signatures {
            println!(
                "  {:>5}  etag={} len={}",
                n,
                sig.etag.as_deref().unwrap_or("-"),
                sig.length.map(|l| l.to_string()).unwrap_or_else(|| "-".into())
            );
        }
    }
    if !report.templated_logos.is_empty() {
        println!("\nTemplated logos:    {}", report.templated_logos.len());
        for slug in report.templated_logos.iter().take(10) {
            println!("  - {} ({})", name_of(slug.as_str()), slug);
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_flags() {
        let cli = Cli::try_parse_from([
            "taaft_sync",
            "run",
            "--max-periods",
            "2",
            "--headless",
            "--batch-size",
            "50",
            "--dry-run",
        ])
        .unwrap();
        let Commands::Run { crawl, sync } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(crawl.max_periods, Some(2));
        assert_eq!(crawl.start_period, 1);
        assert!(crawl.headless);
        assert_eq!(sync.batch_size, Some(50));
        assert!(sync.dry_run);
    }

    #[test]
    fn cleanup_names_repeat() {
        let cli =
            Cli::try_parse_from(["taaft_sync", "cleanup", "--name", "Everlyn", "--name", "Imagen"])
                .unwrap();
        let Commands::Cleanup { ids, name } = cli.command else {
            panic!("expected cleanup");
        };
        assert!(ids.is_none());
        assert_eq!(name, vec!["Everlyn", "Imagen"]);
    }

    #[test]
    fn check_flags() {
        let cli = Cli::try_parse_from(["taaft_sync", "check", "-r", "some-slug", "--headless"])
            .unwrap();
        let Commands::Check {
            reference,
            skip_links,
            headless,
        } = cli.command
        else {
            panic!("expected check");
        };
        assert_eq!(reference.as_deref(), Some("some-slug"));
        assert!(!skip_links);
        assert!(headless);
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
