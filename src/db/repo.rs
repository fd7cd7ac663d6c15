use super::model::{LedgerEntry, LedgerFilter, LedgerUpdate};
use crate::model::{EntityKind, SyncStatus};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use sqlx::SqlitePool;
use tracing::instrument;

pub type Pool = SqlitePool;

const LEDGER_COLUMNS: &str = "id, entity_kind, entity_id, external_id, sync_status, last_synced_at, \
     last_payload_sent, last_response, last_error_message, attempt_count";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    // The file must be created on first connect.
    let mut rebuilt = format!("sqlite://{}", expanded_path);
    match query_part {
        Some(q) if q.contains("mode=") => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
            rebuilt.push_str("&mode=rwc");
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn parse_json_column(row: &SqliteRow, column: &str) -> Result<Option<Value>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|text| {
        serde_json::from_str(&text).with_context(|| format!("invalid JSON in ledger {}", column))
    })
    .transpose()
}

fn row_to_entry(row: &SqliteRow) -> Result<LedgerEntry> {
    let kind_str: String = row.get("entity_kind");
    let status_str: String = row.get("sync_status");
    let id: i64 = row.get("id");
    Ok(LedgerEntry {
        id,
        kind: EntityKind::parse_kind(&kind_str)
            .ok_or_else(|| anyhow!("ledger row {} has unknown kind {}", id, kind_str))?,
        entity_id: row.get("entity_id"),
        external_id: row
            .try_get::<Option<String>, _>("external_id")?
            .filter(|s| !s.trim().is_empty()),
        status: SyncStatus::parse_status(&status_str)
            .ok_or_else(|| anyhow!("ledger row {} has unknown status {}", id, status_str))?,
        last_synced_at: row.try_get("last_synced_at")?,
        last_payload_sent: parse_json_column(row, "last_payload_sent")?,
        last_response: parse_json_column(row, "last_response")?,
        last_error_message: row.try_get("last_error_message")?,
        attempt_count: row.get("attempt_count"),
    })
}

#[instrument(skip_all)]
pub async fn find_ledger_entry(
    pool: &Pool,
    kind: EntityKind,
    entity_id: i64,
) -> Result<Option<LedgerEntry>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM integration_ledger WHERE entity_kind = ? AND entity_id = ?",
        LEDGER_COLUMNS
    ))
    .bind(kind.as_str())
    .bind(entity_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_entry).transpose()
}

/// Record one sync attempt for `(kind, entity_id)`.
///
/// Inserts the row on first attempt, otherwise merges `update` into it. The
/// attempt counter grows by exactly one per call and a stored external id is
/// never replaced by an absent one. The whole read-modify-write is a single
/// statement, so racing attempts for the same key cannot lose updates.
#[instrument(skip_all, fields(kind = %kind, entity_id = entity_id))]
pub async fn upsert_ledger_entry(
    pool: &Pool,
    kind: EntityKind,
    entity_id: i64,
    update: &LedgerUpdate,
) -> Result<LedgerEntry> {
    let payload = update
        .payload
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let response = update
        .response
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let row = sqlx::query(&format!(
        "INSERT INTO integration_ledger \
            (entity_kind, entity_id, external_id, sync_status, last_synced_at, \
             last_payload_sent, last_response, last_error_message, attempt_count) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1) \
         ON CONFLICT (entity_kind, entity_id) DO UPDATE SET \
            external_id = COALESCE(excluded.external_id, integration_ledger.external_id), \
            sync_status = excluded.sync_status, \
            last_synced_at = excluded.last_synced_at, \
            last_payload_sent = COALESCE(excluded.last_payload_sent, integration_ledger.last_payload_sent), \
            last_response = COALESCE(excluded.last_response, integration_ledger.last_response), \
            last_error_message = CASE WHEN excluded.sync_status = 'sync_succeeded' THEN NULL \
                ELSE COALESCE(excluded.last_error_message, integration_ledger.last_error_message) END, \
            attempt_count = integration_ledger.attempt_count + 1, \
            updated_at = CURRENT_TIMESTAMP \
         RETURNING {}",
        LEDGER_COLUMNS
    ))
    .bind(kind.as_str())
    .bind(entity_id)
    .bind(update.external_id.as_deref().filter(|s| !s.trim().is_empty()))
    .bind(update.status.as_str())
    .bind(update.synced_at)
    .bind(payload)
    .bind(response)
    .bind(update.error_message.as_deref())
    .fetch_one(pool)
    .await
    .context("failed to upsert integration ledger entry")?;
    row_to_entry(&row)
}

#[instrument(skip_all)]
pub async fn count_by_status(pool: &Pool, kind: EntityKind, status: SyncStatus) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM integration_ledger WHERE entity_kind = ? AND sync_status = ?",
    )
    .bind(kind.as_str())
    .bind(status.as_str())
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Count across every kind.
#[instrument(skip_all)]
pub async fn count_all_by_status(pool: &Pool, status: SyncStatus) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM integration_ledger WHERE sync_status = ?")
            .bind(status.as_str())
            .fetch_one(pool)
            .await?;
    Ok(count)
}

#[instrument(skip_all)]
pub async fn most_recent_sync_timestamp(pool: &Pool) -> Result<Option<DateTime<Utc>>> {
    let latest = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
        "SELECT last_synced_at FROM integration_ledger \
         WHERE last_synced_at IS NOT NULL ORDER BY last_synced_at DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?
    .flatten();
    Ok(latest)
}

/// Failed entries synced within `within` of now, newest first.
#[instrument(skip_all)]
pub async fn recent_failures(pool: &Pool, within: Duration, limit: i64) -> Result<Vec<LedgerEntry>> {
    let cutoff = Utc::now() - within;
    let rows = sqlx::query(&format!(
        "SELECT {} FROM integration_ledger \
         WHERE sync_status = ? AND last_synced_at IS NOT NULL AND last_synced_at >= ? \
         ORDER BY last_synced_at DESC LIMIT ?",
        LEDGER_COLUMNS
    ))
    .bind(SyncStatus::SyncFailed.as_str())
    .bind(cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_entry).collect()
}

/// Failed entries that have been attempted fewer than `max_attempts` times.
#[instrument(skip_all)]
pub async fn failed_eligible_for_retry(
    pool: &Pool,
    kind: Option<EntityKind>,
    max_attempts: i64,
) -> Result<Vec<LedgerEntry>> {
    let kind_str = kind.map(|k| k.as_str());
    let rows = sqlx::query(&format!(
        "SELECT {} FROM integration_ledger \
         WHERE sync_status = ? AND attempt_count < ? AND (? IS NULL OR entity_kind = ?) \
         ORDER BY id ASC",
        LEDGER_COLUMNS
    ))
    .bind(SyncStatus::SyncFailed.as_str())
    .bind(max_attempts)
    .bind(kind_str)
    .bind(kind_str)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_entry).collect()
}

/// Page through ledger rows, most recently synced first.
#[instrument(skip_all)]
pub async fn list_ledger_entries(
    pool: &Pool,
    filter: &LedgerFilter,
    limit: i64,
    offset: i64,
) -> Result<Vec<LedgerEntry>> {
    let kind_str = filter.kind.map(|k| k.as_str());
    let status_str = filter.status.map(|s| s.as_str());
    let rows = sqlx::query(&format!(
        "SELECT {} FROM integration_ledger \
         WHERE (? IS NULL OR entity_kind = ?) AND (? IS NULL OR sync_status = ?) \
         ORDER BY last_synced_at IS NULL, last_synced_at DESC, id DESC LIMIT ? OFFSET ?",
        LEDGER_COLUMNS
    ))
    .bind(kind_str)
    .bind(kind_str)
    .bind(status_str)
    .bind(status_str)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_entry).collect()
}

/// Manually classify an existing row. Does not count as an attempt.
///
/// Returns `false` when no row exists for the key.
#[instrument(skip_all, fields(kind = %kind, entity_id = entity_id))]
pub async fn mark_ledger_status(
    pool: &Pool,
    kind: EntityKind,
    entity_id: i64,
    status: SyncStatus,
) -> Result<bool> {
    if matches!(status, SyncStatus::SyncSucceeded | SyncStatus::SyncFailed) {
        return Err(anyhow!("status {} is only set by sync attempts", status));
    }
    let res = sqlx::query(
        "UPDATE integration_ledger SET sync_status = ?, updated_at = CURRENT_TIMESTAMP \
         WHERE entity_kind = ? AND entity_id = ?",
    )
    .bind(status.as_str())
    .bind(kind.as_str())
    .bind(entity_id)
    .execute(pool)
    .await
    .context("failed to mark integration ledger entry")?;
    Ok(res.rows_affected() > 0)
}
