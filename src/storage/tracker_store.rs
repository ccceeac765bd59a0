//! Durable tracker store interface (§6) consumed by the Lifecycle Tracker's flusher.

use crate::core::tracker::RequestRecord;
use crate::utils::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

/// A filter for `query`. Empty filter returns every record.
#[derive(Debug, Clone, Default)]
pub struct TrackerQuery {
    pub endpoint_name: Option<String>,
    pub limit: Option<usize>,
}

/// `write_batch(records)` with at-least-once semantics; `query(filter)` for UI reads
/// (§6). The proxy never deletes from this store; it is a one-way stream of finalized
/// records.
#[async_trait]
pub trait DurableTrackerStore: Send + Sync {
    async fn write_batch(&self, records: &[RequestRecord]) -> Result<()>;
    async fn query(&self, filter: TrackerQuery) -> Result<Vec<RequestRecord>>;
}

/// Appends newline-delimited JSON to a single file. At-least-once: a crash between the
/// write and an fsync can duplicate the last batch on the next write, which callers of
/// `query` must tolerate (matching most append-only durable logs).
pub struct NdjsonTrackerStore {
    path: PathBuf,
}

impl NdjsonTrackerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DurableTrackerStore for NdjsonTrackerStore {
    async fn write_batch(&self, records: &[RequestRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        for record in records {
            let line = serde_json::to_string(record)?;
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn query(&self, filter: TrackerQuery) -> Result<Vec<RequestRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records: Vec<RequestRecord> = content
            .lines()
            .filter(|l| !l.is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .filter(|r: &RequestRecord| {
                filter
                    .endpoint_name
                    .as_ref()
                    .map(|n| r.endpoint_name.as_deref() == Some(n.as_str()))
                    .unwrap_or(true)
            })
            .collect();
        if let Some(limit) = filter.limit {
            let start = records.len().saturating_sub(limit);
            records = records.split_off(start);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tracker::RequestStatus;

    #[tokio::test]
    async fn write_then_query_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = NdjsonTrackerStore::new(dir.path().join("records.ndjson"));

        let mut record = RequestRecord::new(1, 0);
        record.status = RequestStatus::Completed;
        record.endpoint_name = Some("a".to_string());

        store.write_batch(&[record.clone()]).await.unwrap();
        let results = store.query(TrackerQuery::default()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, 1);
    }

    #[tokio::test]
    async fn query_filters_by_endpoint_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = NdjsonTrackerStore::new(dir.path().join("records.ndjson"));

        let mut r1 = RequestRecord::new(1, 0);
        r1.endpoint_name = Some("a".to_string());
        let mut r2 = RequestRecord::new(2, 0);
        r2.endpoint_name = Some("b".to_string());

        store.write_batch(&[r1, r2]).await.unwrap();
        let filter = TrackerQuery {
            endpoint_name: Some("b".to_string()),
            limit: None,
        };
        let results = store.query(filter).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, 2);
    }
}
