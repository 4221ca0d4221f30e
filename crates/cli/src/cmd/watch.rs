//! `settle watch`: run the full pipeline over a directory until Ctrl-C

use crate::config::{self, AppConfig};
use crate::extractor::HashExtractor;
use crate::util;
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use pipeline::{EventSink, RawChangeEvent, RawEventKind, Scheduler, StopReport};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Interval;
use tracing::{debug, info, warn};
use watcher::{FsWatcher, IgnoreRules, PeriodicReconciler};

/// Command-line overrides for the loaded configuration
#[derive(Debug, Default)]
pub struct WatchArgs {
    pub root: PathBuf,
    pub config: Option<PathBuf>,
    pub workers: Option<usize>,
    pub delay: Option<f64>,
    pub max_delay: Option<f64>,
    pub initial_scan: bool,
    pub json: bool,
}

impl WatchArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(workers) = self.workers {
            config.scheduler.worker_threads = workers;
        }
        if let Some(delay) = self.delay {
            config.scheduler.delay_seconds = delay;
        }
        if let Some(max_delay) = self.max_delay {
            config.scheduler.max_delay_seconds = max_delay;
        }
    }
}

/// Forwards watcher events, reloading ignore rules when `.gitignore` changes
struct WatchSink {
    scheduler: Arc<Scheduler>,
    rules: Arc<IgnoreRules>,
    gitignore: PathBuf,
}

impl EventSink for WatchSink {
    fn ingest(&self, event: RawChangeEvent) {
        if event.path == self.gitignore {
            match self.rules.reload() {
                Ok(()) => info!("Reloaded .gitignore"),
                Err(e) => warn!(error = %e, "Failed to reload .gitignore"),
            }
        }
        self.scheduler.ingest(event);
    }
}

pub async fn run(args: WatchArgs) -> Result<()> {
    let root = args
        .root
        .canonicalize()
        .with_context(|| format!("Cannot watch {}", args.root.display()))?;

    let mut app_config = config::load(args.config.as_deref())?;
    args.apply(&mut app_config);
    app_config
        .scheduler
        .validate()
        .context("Invalid scheduler configuration")?;

    let rules = Arc::new(
        IgnoreRules::load(&root, app_config.ignore.clone()).context("Failed to load ignore rules")?,
    );
    let extractor = Arc::new(HashExtractor::new());
    let scheduler = Arc::new(Scheduler::with_filter(
        app_config.scheduler.clone(),
        extractor.clone(),
        rules.clone(),
    ));
    scheduler.start()?;

    if args.initial_scan {
        initial_scan(&scheduler, &root, &rules).await?;
    }

    let sink = Arc::new(WatchSink {
        scheduler: Arc::clone(&scheduler),
        rules: Arc::clone(&rules),
        gitignore: root.join(".gitignore"),
    });
    let fs_watcher = FsWatcher::watch(&root, sink)?;

    let mut reconcile_rx = start_reconciler(&root, &app_config, &rules);
    let mut status_timer = (app_config.watch.status_interval_secs > 0)
        .then(|| tokio::time::interval(Duration::from_secs(app_config.watch.status_interval_secs)));

    println!(
        "{} Watching {} {}",
        "●".green(),
        root.display().to_string().cyan(),
        format!(
            "({} workers, {}s delay, {} ignore sources)",
            app_config.scheduler.worker_threads,
            app_config.scheduler.delay_seconds,
            rules.active_sources()
        )
        .dimmed()
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                res.context("Failed to listen for Ctrl-C")?;
                info!("Interrupt received, stopping");
                break;
            }
            Some(paths) = next_batch(&mut reconcile_rx) => {
                debug!(count = paths.len(), "Feeding reconciled paths");
                for path in paths {
                    scheduler.ingest(RawChangeEvent::new(path, RawEventKind::Modified));
                }
            }
            _ = next_tick(&mut status_timer) => {
                log_status(&scheduler);
            }
        }
    }

    // No new events while the pipeline drains
    drop(fs_watcher);

    let stopping = Arc::clone(&scheduler);
    let report = tokio::task::spawn_blocking(move || stopping.stop())
        .await
        .context("Scheduler stop task panicked")?;

    print_summary(&scheduler, &extractor, &report, args.json)
}

/// Forget stale state and queue every file under `root`
async fn initial_scan(scheduler: &Arc<Scheduler>, root: &Path, rules: &Arc<IgnoreRules>) -> Result<()> {
    let cleared = scheduler.clear();
    let scan_root = root.to_path_buf();
    let filter = Arc::clone(rules);

    let files = tokio::task::spawn_blocking(move || watcher::full_scan(&scan_root, filter.as_ref()))
        .await
        .context("Initial scan task panicked")??;

    info!(
        files = files.len(),
        discarded = cleared.pending + cleared.queued,
        "Initial scan complete"
    );
    for path in files {
        scheduler.ingest(RawChangeEvent::new(path, RawEventKind::Created));
    }
    Ok(())
}

fn start_reconciler(
    root: &Path,
    config: &AppConfig,
    rules: &Arc<IgnoreRules>,
) -> Option<mpsc::Receiver<Vec<PathBuf>>> {
    if config.watch.reconcile_interval_secs == 0 {
        return None;
    }

    let (tx, rx) = mpsc::channel(16);
    let reconciler = PeriodicReconciler::new(
        root.to_path_buf(),
        Duration::from_secs(config.watch.reconcile_interval_secs),
        rules.clone(),
        tx,
    );
    tokio::spawn(async move {
        if let Err(e) = reconciler.run().await {
            warn!(error = %e, "Periodic reconciliation stopped");
        }
    });
    Some(rx)
}

async fn next_batch(rx: &mut Option<mpsc::Receiver<Vec<PathBuf>>>) -> Option<Vec<PathBuf>> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn log_status(scheduler: &Scheduler) {
    let status = scheduler.get_status();
    info!(
        pending = status.pending_count,
        queued = status.queue_size,
        active = status.active_workers,
        processed = status.processed_count,
        failed = status.failed_count,
        skipped = status.skipped_count,
        "Pipeline status"
    );
}

fn print_summary(
    scheduler: &Scheduler,
    extractor: &HashExtractor,
    report: &StopReport,
    json: bool,
) -> Result<()> {
    let status = scheduler.get_status();

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let stats = scheduler.stats();

    println!();
    println!("{}", "Session Summary".bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Uptime:        {}", util::format_duration(stats.uptime));
    println!("Processed:     {}", status.processed_count.to_string().green());
    println!("Skipped:       {}", status.skipped_count);
    if status.failed_count > 0 {
        println!("Failed:        {}", status.failed_count.to_string().red());
    } else {
        println!("Failed:        0");
    }
    println!("Throughput:    {:.2}/s", stats.throughput);
    println!(
        "Indexed:       {} files ({})",
        extractor.len(),
        util::format_size(extractor.total_bytes())
    );

    if status.pending_count + status.queue_size > 0 {
        println!(
            "{}",
            format!(
                "Left unprocessed: {} pending, {} queued",
                status.pending_count, status.queue_size
            )
            .yellow()
        );
    }

    if !report.abandoned.is_empty() {
        println!(
            "{}",
            format!("{} worker(s) did not stop in time", report.abandoned.len()).yellow()
        );
        for path in report.abandoned.iter().flatten() {
            println!("    - {}", path.display());
        }
    }

    if !status.recent_failures.is_empty() {
        println!();
        println!("Recent failures:");
        for failure in status.recent_failures.iter().take(5) {
            println!(
                "  {} {} {}",
                "✗".red(),
                failure.path.display(),
                format!("({}, {})", failure.error, util::format_relative_time(failure.at_unix_ms)).dimmed()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_replace_file_values() {
        let mut config = AppConfig::default();
        let args = WatchArgs {
            workers: Some(2),
            delay: Some(0.5),
            ..Default::default()
        };

        args.apply(&mut config);

        assert_eq!(config.scheduler.worker_threads, 2);
        assert_eq!(config.scheduler.delay_seconds, 0.5);
        assert_eq!(
            config.scheduler.max_delay_seconds,
            pipeline::SchedulerConfig::default().max_delay_seconds
        );
    }
}
