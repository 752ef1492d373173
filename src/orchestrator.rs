//! Scan orchestration.
//!
//! Sequences Inventory -> RuleEngine -> Aggregator -> Dispatcher on each
//! trigger and appends the run record at run end (single-writer). Runs never
//! overlap: a trigger arriving mid-run is deferred (queue depth 1) and
//! further triggers are dropped with a logged skip. Component failures are
//! contained so the run still delivers whatever it accumulated.

use crate::aggregator::FindingAggregator;
use crate::config::HunterConfig;
use crate::dispatch::NotificationDispatcher;
use crate::error::ConfigError;
use crate::history::RunHistory;
use crate::inventory::{list_with_retry, ResourceInventory};
use crate::rules::RuleEngine;
use crate::types::{DedupKey, DeliveryStatus, RunRecord, RunSummary};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

const INVENTORY_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Phase of the current run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Idle = 0,
    Scanning = 1,
    Aggregating = 2,
    Dispatching = 3,
}

pub struct ScanOrchestrator {
    config: HunterConfig,
    inventory: Arc<dyn ResourceInventory>,
    engine: RuleEngine,
    dispatcher: NotificationDispatcher,
    history: Arc<dyn RunHistory>,
    dry_run: bool,
    state: AtomicU8,
    /// Held for the duration of a run; triggers contend on it
    busy: Mutex<()>,
    /// Single-slot deferred trigger
    pending: AtomicBool,
}

impl ScanOrchestrator {
    /// Build an orchestrator. Configuration is validated here; an invalid
    /// config prevents any run from ever starting.
    pub fn new(
        config: HunterConfig,
        inventory: Arc<dyn ResourceInventory>,
        engine: RuleEngine,
        dispatcher: NotificationDispatcher,
        history: Arc<dyn RunHistory>,
        dry_run: bool,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            inventory,
            engine,
            dispatcher,
            history,
            dry_run,
            state: AtomicU8::new(RunState::Idle as u8),
            busy: Mutex::new(()),
            pending: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> RunState {
        match self.state.load(Ordering::SeqCst) {
            1 => RunState::Scanning,
            2 => RunState::Aggregating,
            3 => RunState::Dispatching,
            _ => RunState::Idle,
        }
    }

    fn set_state(&self, state: RunState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Handle one scheduled trigger. If a run is in flight the trigger is
    /// deferred (at most one); beyond that it is dropped with a logged skip.
    /// Returns the summaries of every run this trigger executed.
    pub async fn trigger(&self) -> Vec<RunSummary> {
        let guard = match self.busy.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                if self.pending.swap(true, Ordering::SeqCst) {
                    warn!("Scan already queued, dropping trigger");
                } else {
                    info!("Scan in progress, trigger deferred");
                }
                return Vec::new();
            }
        };

        let mut summaries = vec![self.run_at(Utc::now()).await];
        while self.pending.swap(false, Ordering::SeqCst) {
            info!("Running deferred scan");
            summaries.push(self.run_at(Utc::now()).await);
        }
        drop(guard);
        summaries
    }

    /// Execute one full scan run with `now` as the run timestamp.
    ///
    /// Callers other than tests should go through [`trigger`], which
    /// enforces the no-overlap discipline.
    pub async fn run_at(&self, now: DateTime<Utc>) -> RunSummary {
        let run_id = Uuid::new_v4();
        info!(run_id = %run_id, dry_run = self.dry_run, "Starting scan run");

        let mut inventory_errors = Vec::new();
        let mut history_errors = Vec::new();

        // Scanning: per-type fetches run concurrently, no shared state,
        // merged by concatenation
        self.set_state(RunState::Scanning);
        let fetches = self.config.resource_types.iter().map(|&resource_type| {
            let inventory = Arc::clone(&self.inventory);
            let max_retries = self.config.inventory.max_retries;
            async move {
                let result = list_with_retry(
                    inventory.as_ref(),
                    resource_type,
                    max_retries,
                    INVENTORY_RETRY_BACKOFF,
                )
                .await;
                (resource_type, result)
            }
        });

        let mut descriptors = Vec::new();
        for (resource_type, result) in futures::future::join_all(fetches).await {
            match result {
                Ok(mut listed) => descriptors.append(&mut listed),
                Err(e) => {
                    // Fatal for this type only; the scan continues
                    warn!(resource_type = %resource_type, error = %e, "Skipping resource type");
                    inventory_errors.push(e.to_string());
                }
            }
        }

        let quota = self.config.quota();
        let findings = self.engine.evaluate(&descriptors, &quota, now);

        // Aggregating: suppress keys notified within the cool-down window.
        // A history read failure degrades to an empty prior-key set; a
        // repeat notification beats a lost one.
        self.set_state(RunState::Aggregating);
        let cutoff = now - self.config.cool_down();
        let prior_keys = match self.history.notified_keys_since(cutoff).await {
            Ok(keys) => keys,
            Err(e) => {
                error!(error = %e, "History lookup failed, dedup disabled for this run");
                history_errors.push(e.to_string());
                HashSet::new()
            }
        };

        let channel_targets = self.dispatcher.channel_names();
        let aggregated =
            FindingAggregator::aggregate(&findings, &prior_keys, &channel_targets, now);

        // Dispatching: best-effort, per-channel isolation
        self.set_state(RunState::Dispatching);
        let mut deliveries = Vec::new();
        let mut dispatched = false;
        if let Some(payload) = &aggregated.payload {
            if self.dry_run {
                info!(
                    findings = payload.findings.len(),
                    severity = %payload.severity,
                    "DRY RUN - would dispatch payload"
                );
            } else {
                deliveries = self.dispatcher.dispatch(payload).await;
                dispatched = true;
            }
        }

        let completed_at = Utc::now();

        // Record the run; dry runs leave no trace so real runs are not
        // suppressed by them
        if !self.dry_run {
            // A finding counts as notified only if some channel took it;
            // an all-channels-failed run must not start its cool-down
            let delivered_any = deliveries
                .iter()
                .any(|d| d.status == DeliveryStatus::Delivered);
            let notified: Vec<DedupKey> = if delivered_any {
                aggregated.included.iter().map(|f| f.dedup_key()).collect()
            } else {
                Vec::new()
            };
            let record = RunRecord {
                run_id,
                started_at: now,
                completed_at,
                findings: findings.clone(),
                notified,
            };
            if let Err(e) = self.history.append(&record).await {
                error!(error = %e, "Failed to append run record");
                history_errors.push(e.to_string());
            }
        }

        self.set_state(RunState::Idle);

        let summary = RunSummary {
            run_id,
            started_at: now,
            completed_at,
            descriptors_scanned: descriptors.len(),
            findings_total: findings.len(),
            findings_included: aggregated.included.len(),
            findings_suppressed: aggregated.suppressed,
            inventory_errors,
            history_errors,
            deliveries,
            dispatched,
        };

        info!(
            run_id = %run_id,
            scanned = summary.descriptors_scanned,
            findings = summary.findings_total,
            included = summary.findings_included,
            suppressed = summary.findings_suppressed,
            dispatched = summary.dispatched,
            errors = summary.inventory_errors.len() + summary.history_errors.len(),
            "Scan run complete"
        );
        summary
    }
}
