//! FinOps Hunter - Scheduled Scan Binary
//!
//! Runs the resource-cost scan on a fixed interval (or once, for CronJob
//! mode) and fans findings out to the configured webhook channels.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use finops_hunter::config::HunterConfig;
use finops_hunter::dispatch::{build_channels, NotificationDispatcher};
use finops_hunter::history::{FileHistory, RunHistory};
use finops_hunter::inventory::RestInventory;
use finops_hunter::orchestrator::ScanOrchestrator;
use finops_hunter::rules::RuleEngine;

/// FinOps Hunter - scans the account for orphaned billable resources
#[derive(Parser, Debug)]
#[command(name = "hunter", version, about)]
struct Args {
    /// Path to a JSON config file; environment variables are used if absent
    #[arg(long, env = "HUNTER_CONFIG")]
    config: Option<PathBuf>,

    /// Scan interval in seconds (reference deployment: every 12 hours)
    #[arg(long, default_value = "43200", env = "SCAN_INTERVAL")]
    interval: u64,

    /// Run once and exit (for CronJob mode)
    #[arg(long, default_value = "false")]
    once: bool,

    /// Dry run - evaluate and log, but don't notify or record
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Path to the run history store
    #[arg(long, default_value = "hunter-history.jsonl", env = "HUNTER_HISTORY_FILE")]
    history_file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => HunterConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => HunterConfig::from_env(),
    };

    // Invalid config halts here, before any run starts
    config
        .validate()
        .context("Invalid hunter configuration")?;

    info!(
        region = %config.region,
        resource_types = config.resource_types.len(),
        channels = config.channels.len(),
        interval = args.interval,
        "Starting FinOps Hunter"
    );

    let timeout = Duration::from_secs(config.inventory.timeout_secs);
    let inventory = Arc::new(RestInventory::new(
        config.inventory.base_url.clone(),
        config.inventory.api_token.clone(),
        config.region.clone(),
        timeout,
    )?);

    let channels = build_channels(&config.channels, timeout)?;
    let dispatcher = NotificationDispatcher::new(channels, &config.delivery);

    let history = FileHistory::new(&args.history_file);
    // Records older than the dedup window are never consulted again
    if let Err(e) = history.prune(chrono::Utc::now() - config.cool_down()).await {
        error!(error = %e, "Failed to prune run history");
    }
    let history: Arc<dyn RunHistory> = Arc::new(history);

    let orchestrator = ScanOrchestrator::new(
        config,
        inventory,
        RuleEngine::with_default_rules(),
        dispatcher,
        history,
        args.dry_run,
    )?;

    if args.once {
        let summaries = orchestrator.trigger().await;
        for summary in &summaries {
            println!("{}", serde_json::to_string_pretty(summary)?);
        }
        return Ok(());
    }

    scan_loop(
        &orchestrator,
        Duration::from_secs(args.interval),
        async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        },
    )
    .await;

    Ok(())
}

/// Scheduled scan loop.
///
/// The shutdown future is created once and re-polled across iterations, so
/// a signal arriving while a run is in flight is observed as soon as the
/// run finishes instead of being lost by a freshly registered listener.
async fn scan_loop(
    orchestrator: &ScanOrchestrator,
    period: Duration,
    shutdown: impl std::future::Future<Output = ()>,
) {
    let mut ticker = interval(period);
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // In-flight work completes before shutdown is observed
                orchestrator.trigger().await;
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received, exiting");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use finops_hunter::config::{DeliveryConfig, InventoryConfig};
    use finops_hunter::error::InventoryError;
    use finops_hunter::history::InMemoryHistory;
    use finops_hunter::inventory::ResourceInventory;
    use finops_hunter::types::{ResourceDescriptor, ResourceType};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    struct SlowInventory {
        calls: Arc<AtomicU32>,
        delay: Duration,
    }

    #[async_trait]
    impl ResourceInventory for SlowInventory {
        async fn list(
            &self,
            _resource_type: ResourceType,
        ) -> Result<Vec<ResourceDescriptor>, InventoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(vec![])
        }
    }

    fn test_config() -> HunterConfig {
        HunterConfig {
            region: "us-east-1".to_string(),
            resource_types: ResourceType::all(),
            free_tier_volume_gb: 30,
            idle_after_hours: 168,
            cool_down_hours: 24,
            inventory: InventoryConfig {
                base_url: "https://inventory.example.com".to_string(),
                api_token: None,
                timeout_secs: 5,
                max_retries: 0,
            },
            channels: vec![],
            delivery: DeliveryConfig {
                max_attempts: 1,
                backoff_base_ms: 1,
            },
        }
    }

    #[tokio::test]
    async fn test_shutdown_during_run_exits_after_run_completes() {
        let calls = Arc::new(AtomicU32::new(0));
        let run_duration = Duration::from_millis(80);
        let orchestrator = ScanOrchestrator::new(
            test_config(),
            Arc::new(SlowInventory {
                calls: Arc::clone(&calls),
                delay: run_duration,
            }),
            RuleEngine::with_default_rules(),
            NotificationDispatcher::new(
                vec![],
                &DeliveryConfig {
                    max_attempts: 1,
                    backoff_base_ms: 1,
                },
            ),
            Arc::new(InMemoryHistory::new()),
            false,
        )
        .unwrap();

        let started = Instant::now();
        // Shutdown fires while the first run is still scanning; the loop
        // must still terminate once that run completes
        scan_loop(&orchestrator, Duration::from_secs(3600), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
        })
        .await;

        assert!(started.elapsed() >= run_duration);
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }
}
