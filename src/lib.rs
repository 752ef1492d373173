//! FinOps Resource Hunter
//!
//! Periodic scanner for underutilized and orphaned billable cloud resources.
//! Each run lists account inventory, evaluates a ruleset, deduplicates
//! findings against a cool-down window, and fans the result out to
//! notification channels.

pub mod aggregator;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod inventory;
pub mod orchestrator;
pub mod rules;
pub mod types;

pub use aggregator::FindingAggregator;
pub use config::HunterConfig;
pub use dispatch::{build_channels, NotificationChannel, NotificationDispatcher};
pub use history::{FileHistory, InMemoryHistory, RunHistory};
pub use inventory::{ResourceInventory, RestInventory};
pub use orchestrator::{RunState, ScanOrchestrator};
pub use rules::RuleEngine;
pub use types::{Finding, ResourceDescriptor, RunSummary, Severity};
