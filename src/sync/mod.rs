//! Synchronization of the country table with the upstream API.
//!
//! A pass fetches every upstream record, normalizes it, diffs the result
//! against stored names in memory and persists both halves in one transaction.

mod source;

pub use source::*;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::db::Repository;
use crate::errors::AppError;
use crate::models::CountryData;

/// Outcome of one synchronization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    /// Upstream entries that could not be normalized
    pub skipped: usize,
    /// Why the pass stopped before touching the store
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl SyncReport {
    fn aborted(reason: impl Into<String>) -> Self {
        Self {
            aborted: Some(reason.into()),
            ..Default::default()
        }
    }
}

/// Records split by whether their name is already stored.
#[derive(Debug, Default)]
pub struct SyncPlan {
    pub to_create: Vec<CountryData>,
    pub to_update: Vec<CountryData>,
    /// Incoming entries that repeated a name seen earlier in the same batch
    pub collapsed: usize,
}

/// Partition incoming records against the names already stored.
///
/// A repeated name replaces the earlier entry and counts as an update.
pub fn reconcile(existing: &HashSet<String>, incoming: Vec<CountryData>) -> SyncPlan {
    enum Slot {
        Create(usize),
        Update(usize),
    }

    let mut plan = SyncPlan::default();
    let mut seen: HashMap<String, Slot> = HashMap::new();

    for country in incoming {
        match seen.get(&country.name) {
            Some(Slot::Create(i)) => {
                plan.to_create[*i] = country;
                plan.collapsed += 1;
            }
            Some(Slot::Update(i)) => {
                plan.to_update[*i] = country;
                plan.collapsed += 1;
            }
            None if existing.contains(&country.name) => {
                seen.insert(country.name.clone(), Slot::Update(plan.to_update.len()));
                plan.to_update.push(country);
            }
            None => {
                seen.insert(country.name.clone(), Slot::Create(plan.to_create.len()));
                plan.to_create.push(country);
            }
        }
    }

    plan
}

/// Runs synchronization passes, one at a time.
pub struct Synchronizer {
    repo: Arc<Repository>,
    source: CountrySource,
    running: Mutex<()>,
}

impl Synchronizer {
    pub fn new(repo: Arc<Repository>, source: CountrySource) -> Self {
        Self {
            repo,
            source,
            running: Mutex::new(()),
        }
    }

    /// Fetch, normalize, reconcile and persist.
    ///
    /// Fetch problems yield an aborted report with zero counts and no store
    /// changes. Persistence problems roll the whole pass back and are returned.
    pub async fn synchronize(&self) -> Result<SyncReport, AppError> {
        let _guard = self.running.lock().await;

        let (raw, error) = self.source.fetch_external_records().await;
        if let Some(message) = error {
            tracing::error!("Sync aborted, failed to fetch countries: {}", message);
            return Ok(SyncReport::aborted(message));
        }
        if raw.is_empty() {
            tracing::warn!("Sync aborted, no countries fetched from {}", self.source.url());
            return Ok(SyncReport::aborted("No data fetched from the country API."));
        }

        let total = raw.len();
        let normalized: Vec<CountryData> = raw.iter().filter_map(normalize).collect();
        let skipped = total - normalized.len();
        if skipped > 0 {
            tracing::warn!("Skipped {} malformed country records", skipped);
        }
        if normalized.is_empty() {
            tracing::warn!("Sync aborted, nothing usable among {} records", total);
            return Ok(SyncReport {
                skipped,
                ..SyncReport::aborted("No usable country records to process.")
            });
        }

        let existing = self.repo.country_names().await?;
        let plan = reconcile(&existing, normalized);
        tracing::info!(
            "Populating {} countries ({} new, {} existing)",
            plan.to_create.len() + plan.to_update.len(),
            plan.to_create.len(),
            plan.to_update.len()
        );

        self.repo
            .apply_sync_batch(&plan.to_create, &plan.to_update)
            .await
            .map_err(|e| {
                tracing::error!("Sync rolled back: {}", e);
                e
            })?;

        let report = SyncReport {
            created: plan.to_create.len(),
            updated: plan.to_update.len() + plan.collapsed,
            skipped,
            aborted: None,
        };
        tracing::info!(
            "Sync complete. Created: {}, Updated: {}, Skipped: {}",
            report.created,
            report.updated,
            report.skipped
        );
        Ok(report)
    }
}

/// Boot-time population.
///
/// With `strict`, an unreachable source or a failed write stops the boot;
/// otherwise the failure is logged and the server starts with what it has.
pub async fn run_startup_sync(sync: &Synchronizer, strict: bool) -> Result<SyncReport, AppError> {
    tracing::info!("Running startup sync");
    match sync.synchronize().await {
        Ok(report) => {
            if let Some(reason) = report.aborted.as_deref().filter(|_| strict) {
                return Err(AppError::Upstream(format!(
                    "Startup sync could not populate the database: {}",
                    reason
                )));
            }
            Ok(report)
        }
        Err(e) if strict => Err(e),
        Err(e) => {
            tracing::error!("Startup sync failed, continuing: {}", e);
            Ok(SyncReport::aborted(e.message()))
        }
    }
}

/// Spawn the periodic refresh job.
///
/// The first pass runs one full `period` after spawning. Failures are logged
/// and the next tick proceeds normally.
pub fn spawn_refresh_job(
    sync: Arc<Synchronizer>,
    repo: Arc<Repository>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = sync.synchronize().await {
                tracing::error!("Scheduled sync failed: {}", e);
            }
            match repo.purge_expired_tokens().await {
                Ok(0) => {}
                Ok(n) => tracing::debug!("Purged {} expired blacklist entries", n),
                Err(e) => tracing::warn!("Failed to purge token blacklist: {}", e),
            }
        }
    })
}
