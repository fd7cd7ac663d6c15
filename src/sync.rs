//! Per-entity synchronization: mapper, registry client and ledger tied
//! together behind one total operation.

use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::db::{self, LedgerUpdate, Pool, RecordsStore};
use crate::mapper;
use crate::model::{EntityKind, EntitySnapshot, SyncOutcome};
use crate::registry::{RegistryClient, SendMethod};

pub const NON_FINAL_GRADE_MESSAGE: &str = "only final grades may be synchronized";

#[derive(Clone)]
pub struct Orchestrator {
    pool: Pool,
    client: Arc<dyn RegistryClient>,
}

impl Orchestrator {
    pub fn new(pool: Pool, client: Arc<dyn RegistryClient>) -> Self {
        Self { pool, client }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Synchronize one snapshot and record the attempt in the ledger.
    ///
    /// Never fails: registry rejections, transport errors and internal
    /// errors all come back as an unsuccessful [`SyncOutcome`]. Draft grades
    /// are refused before any I/O and leave no ledger trace.
    #[instrument(skip_all, fields(kind = %snapshot.kind(), entity_id = snapshot.id()))]
    pub async fn sync_one(&self, snapshot: &EntitySnapshot) -> SyncOutcome {
        if let EntitySnapshot::Grade(grade) = snapshot {
            if !grade.is_final() {
                return SyncOutcome::failure(NON_FINAL_GRADE_MESSAGE);
            }
        }

        match self.attempt(snapshot).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(
                    ?err,
                    kind = %snapshot.kind(),
                    entity_id = snapshot.id(),
                    "unexpected error while synchronizing"
                );
                SyncOutcome::failure(format!("unexpected error: {:#}", err))
            }
        }
    }

    async fn attempt(&self, snapshot: &EntitySnapshot) -> Result<SyncOutcome> {
        let kind = snapshot.kind();
        let entity_id = snapshot.id();

        // Any prior attempt routes to an update, even a failed one.
        let method = match db::find_ledger_entry(&self.pool, kind, entity_id).await? {
            Some(_) => SendMethod::Update,
            None => SendMethod::Create,
        };
        let payload = mapper::build_payload(snapshot)?;
        let result = self.client.send(kind.endpoint(), &payload, method).await;

        if result.success {
            let update = LedgerUpdate::succeeded(
                Utc::now(),
                result.external_id(),
                Value::Object(payload),
                result.body.clone().unwrap_or(Value::Null),
            );
            let entry = db::upsert_ledger_entry(&self.pool, kind, entity_id, &update).await?;
            info!(
                status = result.status_code,
                external_id = entry.external_id.as_deref().unwrap_or(""),
                attempts = entry.attempt_count,
                "entity synchronized"
            );
            Ok(SyncOutcome::success(entry.external_id))
        } else {
            let update = LedgerUpdate::failed(Utc::now(), result.error_text.clone());
            let entry = db::upsert_ledger_entry(&self.pool, kind, entity_id, &update).await?;
            warn!(
                status = result.status_code,
                attempts = entry.attempt_count,
                error = %result.error_text,
                "synchronization failed"
            );
            Ok(SyncOutcome::failure(format!(
                "synchronization failed: {}",
                result.error_text
            )))
        }
    }

    /// Resolve `(kind, id)` through the records store and synchronize it.
    ///
    /// `Ok(None)` means the id does not resolve to a local record. Errors are
    /// limited to the lookup itself.
    #[instrument(skip(self, store))]
    pub async fn sync_entity(
        &self,
        store: &dyn RecordsStore,
        kind: EntityKind,
        id: i64,
    ) -> Result<Option<SyncOutcome>> {
        match store.get_snapshot(kind, id).await? {
            Some(snapshot) => Ok(Some(self.sync_one(&snapshot).await)),
            None => Ok(None),
        }
    }
}
