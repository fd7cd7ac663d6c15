//! Batch runs over many entities, retry sweeps and the status read model.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::db::{self, LedgerEntry, RecordsStore};
use crate::model::{BatchReport, EntityKind, EntitySnapshot, Selector, SyncOutcome, SyncStatus};
use crate::sync::Orchestrator;

const RECENT_FAILURE_LIMIT: i64 = 10;
const RECENT_FAILURE_WINDOW_DAYS: i64 = 7;

type Key = (EntityKind, i64);

/// One async mutex per `(kind, id)` so concurrent workers never attempt the
/// same entity at once.
#[derive(Debug, Default, Clone)]
struct KeyLocks {
    inner: Arc<Mutex<HashMap<Key, Arc<Mutex<()>>>>>,
}

impl KeyLocks {
    async fn acquire(&self, key: Key) -> KeyGuard {
        let lock = {
            let mut map = self.inner.lock().await;
            // Entries left behind by guards dropped without `release`.
            map.retain(|_, m| Arc::strong_count(m) > 1);
            map.entry(key).or_default().clone()
        };
        KeyGuard {
            guard: Some(lock.lock_owned().await),
            key,
            locks: self.clone(),
        }
    }

    async fn release(&self, key: Key, guard: OwnedMutexGuard<()>) {
        let mut map = self.inner.lock().await;
        drop(guard);
        // Only the map still holds the mutex: nobody is waiting on this key.
        if map.get(&key).is_some_and(|m| Arc::strong_count(m) == 1) {
            map.remove(&key);
        }
    }
}

struct KeyGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: Key,
    locks: KeyLocks,
}

impl KeyGuard {
    async fn release(mut self) {
        if let Some(guard) = self.guard.take() {
            self.locks.release(self.key, guard).await;
        }
    }
}

/// Per-kind completion figures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KindStatus {
    pub kind: EntityKind,
    pub total: i64,
    pub synced: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatusReport {
    pub kinds: Vec<KindStatus>,
    pub total_failed: i64,
    pub last_sync: Option<DateTime<Utc>>,
    pub recent_failures: Vec<LedgerEntry>,
}

/// `synced / total * 100` rounded to two decimals; zero when `total` is zero.
pub fn percentage(synced: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    let raw = synced as f64 / total as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}

pub struct Coordinator {
    orchestrator: Orchestrator,
    store: Arc<dyn RecordsStore>,
    concurrency: usize,
    locks: KeyLocks,
}

impl Coordinator {
    pub fn new(
        orchestrator: Orchestrator,
        store: Arc<dyn RecordsStore>,
        concurrency: usize,
    ) -> Self {
        Self {
            orchestrator,
            store,
            concurrency: concurrency.max(1),
            locks: KeyLocks::default(),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Resolve `selector` for `kind` and synchronize every match.
    ///
    /// Only a failing selection query is an error; per-entity failures are
    /// counted in the report.
    #[instrument(skip(self))]
    pub async fn sync_all(&self, kind: EntityKind, selector: Selector) -> Result<BatchReport> {
        let snapshots = self.store.list_snapshots(kind, &selector).await?;
        info!(count = snapshots.len(), "entities selected");
        Ok(self.run(snapshots).await)
    }

    /// Every eligible entity of every kind, one kind after another.
    pub async fn sync_every_kind(&self) -> Result<BatchReport> {
        let mut report = BatchReport::new();
        for kind in EntityKind::ALL {
            report.merge(self.sync_all(kind, Selector::AllEligible).await?);
        }
        info!(run_id = %report.run_id, "{}", report.summary());
        Ok(report)
    }

    /// Re-attempt failed ledger rows with fewer than `max_attempts` attempts.
    ///
    /// Rows whose local record no longer resolves are skipped and not
    /// counted as processed.
    #[instrument(skip(self))]
    pub async fn retry_failed(
        &self,
        kind: Option<EntityKind>,
        max_attempts: i64,
    ) -> Result<BatchReport> {
        let pool = self.orchestrator.pool();
        let entries = db::failed_eligible_for_retry(pool, kind, max_attempts).await?;
        let mut snapshots = Vec::with_capacity(entries.len());
        for entry in entries {
            match self.store.get_snapshot(entry.kind, entry.entity_id).await {
                Ok(Some(snapshot)) => snapshots.push(snapshot),
                Ok(None) => debug!(
                    kind = %entry.kind,
                    entity_id = entry.entity_id,
                    "record gone; skipping retry"
                ),
                Err(err) => warn!(
                    ?err,
                    kind = %entry.kind,
                    entity_id = entry.entity_id,
                    "lookup failed; skipping retry"
                ),
            }
        }
        info!(count = snapshots.len(), "entities eligible for retry");
        Ok(self.run(snapshots).await)
    }

    async fn run(&self, snapshots: Vec<EntitySnapshot>) -> BatchReport {
        let mut report = BatchReport::new();
        self.run_into(&mut report, snapshots).await;
        report
    }

    #[instrument(skip_all, fields(run_id = %report.run_id, concurrency = self.concurrency))]
    async fn run_into(&self, report: &mut BatchReport, snapshots: Vec<EntitySnapshot>) {
        if self.concurrency == 1 {
            for snapshot in &snapshots {
                let outcome = self.orchestrator.sync_one(snapshot).await;
                report.record(snapshot, &outcome);
            }
        } else {
            let results: Vec<(EntitySnapshot, SyncOutcome)> = stream::iter(snapshots)
                .map(|snapshot| async move {
                    let guard = self.locks.acquire((snapshot.kind(), snapshot.id())).await;
                    let outcome = self.orchestrator.sync_one(&snapshot).await;
                    guard.release().await;
                    (snapshot, outcome)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;
            for (snapshot, outcome) in &results {
                report.record(snapshot, outcome);
            }
        }
        info!(
            processed = report.total_processed,
            succeeded = report.total_succeeded,
            failed = report.total_failed,
            "{}",
            report.summary()
        );
    }

    /// Aggregate view over the ledger and the local record counts.
    #[instrument(skip(self))]
    pub async fn get_sync_status(&self) -> Result<SyncStatusReport> {
        let pool = self.orchestrator.pool();
        let mut kinds = Vec::with_capacity(EntityKind::ALL.len());
        for kind in EntityKind::ALL {
            let total = self.store.count_total(kind).await?;
            let synced = db::count_by_status(pool, kind, SyncStatus::SyncSucceeded).await?;
            kinds.push(KindStatus {
                kind,
                total,
                synced,
                percentage: percentage(synced, total),
            });
        }
        Ok(SyncStatusReport {
            kinds,
            total_failed: db::count_all_by_status(pool, SyncStatus::SyncFailed).await?,
            last_sync: db::most_recent_sync_timestamp(pool).await?,
            recent_failures: db::recent_failures(
                pool,
                Duration::days(RECENT_FAILURE_WINDOW_DAYS),
                RECENT_FAILURE_LIMIT,
            )
            .await?,
        })
    }
}
