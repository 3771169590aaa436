//! Capped execution record log.

use tracing::warn;

use crate::execution::ExecutionRecord;
use crate::store::{keys, SharedBackend, StoreResult};

/// Most recent records kept for operator triage.
const MAX_RECORDS: isize = 1000;

/// Execution record log: a capped Redis list of recent evaluations.
#[derive(Clone)]
pub struct ExecutionStore {
    backend: SharedBackend,
}

impl ExecutionStore {
    /// Create the store.
    pub fn new(backend: SharedBackend) -> Self {
        Self { backend }
    }

    /// Record an execution; best-effort, failures only log.
    pub async fn record(&self, record: &ExecutionRecord) {
        if let Err(e) = self.try_record(record).await {
            warn!(rule_id = %record.rule_id, error = %e, "failed to persist execution record");
        }
    }

    async fn try_record(&self, record: &ExecutionRecord) -> StoreResult<()> {
        let raw = serde_json::to_string(record)?;
        self.backend.lpush(keys::EXECUTIONS, &raw).await?;
        self.backend.ltrim(keys::EXECUTIONS, 0, MAX_RECORDS - 1).await?;
        Ok(())
    }

    /// Most recent records, newest first.
    pub async fn recent(&self, limit: usize) -> StoreResult<Vec<ExecutionRecord>> {
        let raws = self
            .backend
            .lrange(keys::EXECUTIONS, 0, limit as isize - 1)
            .await?;
        let mut records = Vec::with_capacity(raws.len());
        for raw in &raws {
            records.push(serde_json::from_str(raw)?);
        }
        Ok(records)
    }
}
