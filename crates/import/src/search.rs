//! Search-index client and the post-commit sync buffer.
//!
//! The index is a derived, rebuildable cache. Documents are pushed only
//! after the relational transaction that produced them has committed, and
//! an index failure never undoes that transaction.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use statreg_core::error::IndexError;
use statreg_core::search::SearchDocument;
use statreg_core::store::SearchIndex;
use tokio::sync::{Mutex, Semaphore};

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// Elasticsearch-compatible `_bulk` client for a single index.
pub struct HttpSearchIndex {
    client: reqwest::Client,
    base_url: String,
    index: String,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    errors: bool,
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

fn transport(e: reqwest::Error) -> IndexError {
    IndexError::Unreachable(e.to_string())
}

impl HttpSearchIndex {
    /// * `base_url` - e.g. `http://localhost:9200`.
    pub fn new(base_url: &str, index: &str, timeout: Duration) -> Result<Self, IndexError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(transport)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            index: index.to_string(),
        })
    }

    fn index_url(&self) -> String {
        format!("{}/{}", self.base_url, self.index)
    }

    async fn bulk(&self, body: String) -> Result<(), IndexError> {
        let response = self
            .client
            .post(format!("{}/_bulk", self.index_url()))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(IndexError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: BulkResponse = response.json().await.map_err(transport)?;
        if parsed.errors {
            return Err(IndexError::ItemFailures(count_item_failures(&parsed.items)));
        }
        Ok(())
    }
}

/// Items of a bulk response whose action result carries an `error`.
fn count_item_failures(items: &[serde_json::Value]) -> usize {
    items
        .iter()
        .filter(|item| {
            item.as_object()
                .is_some_and(|actions| actions.values().any(|r| r.get("error").is_some()))
        })
        .count()
}

/// NDJSON body indexing `docs` under their ids.
pub fn upsert_body(docs: &[SearchDocument]) -> Result<String, IndexError> {
    let mut body = String::new();
    for doc in docs {
        let source = serde_json::to_string(doc)
            .map_err(|e| IndexError::Rejected { status: 0, body: e.to_string() })?;
        body.push_str(&serde_json::json!({ "index": { "_id": doc.id } }).to_string());
        body.push('\n');
        body.push_str(&source);
        body.push('\n');
    }
    Ok(body)
}

pub fn delete_body(ids: &[String]) -> String {
    ids.iter()
        .map(|id| format!("{}\n", serde_json::json!({ "delete": { "_id": id } })))
        .collect()
}

#[async_trait]
impl SearchIndex for HttpSearchIndex {
    async fn ping(&self) -> Result<(), IndexError> {
        let response = self
            .client
            .head(self.index_url())
            .send()
            .await
            .map_err(transport)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(IndexError::Rejected {
                status: response.status().as_u16(),
                body: String::new(),
            })
        }
    }

    async fn upsert(&self, docs: &[SearchDocument]) -> Result<(), IndexError> {
        if docs.is_empty() {
            return Ok(());
        }
        self.bulk(upsert_body(docs)?).await
    }

    async fn delete(&self, ids: &[String]) -> Result<(), IndexError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.bulk(delete_body(ids)).await
    }
}

// ---------------------------------------------------------------------------
// Sync buffer
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PendingDocs {
    upserts: HashMap<String, SearchDocument>,
    deletes: HashSet<String>,
    /// Documents refused since the last successful sync.
    dropped: usize,
}

impl PendingDocs {
    fn len(&self) -> usize {
        self.upserts.len() + self.deletes.len()
    }

    /// Add one document unless that would push a new id past `limit`.
    fn upsert(&mut self, doc: SearchDocument, limit: usize) {
        self.deletes.remove(&doc.id);
        if !self.upserts.contains_key(&doc.id) && self.len() >= limit {
            self.dropped += 1;
            return;
        }
        self.upserts.insert(doc.id.clone(), doc);
    }

    fn delete(&mut self, id: String, limit: usize) {
        self.upserts.remove(&id);
        if !self.deletes.contains(&id) && self.len() >= limit {
            self.dropped += 1;
            return;
        }
        self.deletes.insert(id);
    }
}

/// Committed-but-not-yet-indexed documents.
///
/// A failed flush keeps the documents so the next flush retries them. At
/// most `limit` documents are held; past that, new ones are dropped with a
/// warning and the index needs a rebuild to catch up.
pub struct IndexSync {
    index: Arc<dyn SearchIndex>,
    pending: Mutex<PendingDocs>,
    limit: usize,
    gate: Semaphore,
}

impl IndexSync {
    pub fn new(index: Arc<dyn SearchIndex>, limit: usize) -> Self {
        Self {
            index,
            pending: Mutex::new(PendingDocs::default()),
            limit: limit.max(1),
            gate: Semaphore::new(1),
        }
    }

    /// Queue documents. A later document replaces an earlier one with the
    /// same id; a delete cancels a queued upsert.
    pub async fn push(&self, docs: Vec<SearchDocument>, deletes: Vec<String>) {
        let mut pending = self.pending.lock().await;
        let dropped_before = pending.dropped;
        for doc in docs {
            pending.upsert(doc, self.limit);
        }
        for id in deletes {
            pending.delete(id, self.limit);
        }
        if dropped_before == 0 && pending.dropped > 0 {
            tracing::warn!(
                limit = self.limit,
                "Search index sync backlog full, dropping documents until the index recovers",
            );
        }
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Documents refused because the backlog was full.
    pub async fn dropped(&self) -> usize {
        self.pending.lock().await.dropped
    }

    /// Send everything queued. Returns the number of documents sent.
    pub async fn flush(&self) -> Result<usize, IndexError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| IndexError::Unreachable("index sync closed".into()))?;

        let batch = {
            let mut pending = self.pending.lock().await;
            PendingDocs {
                upserts: std::mem::take(&mut pending.upserts),
                deletes: std::mem::take(&mut pending.deletes),
                dropped: pending.dropped,
            }
        };
        let sent = batch.len();
        if sent == 0 {
            return Ok(0);
        }

        let upserts: Vec<SearchDocument> = batch.upserts.values().cloned().collect();
        let deletes: Vec<String> = batch.deletes.iter().cloned().collect();
        let result = match self.index.upsert(&upserts).await {
            Ok(()) => self.index.delete(&deletes).await,
            Err(e) => Err(e),
        };

        let mut pending = self.pending.lock().await;
        if let Err(e) = result {
            // Documents pushed meanwhile are newer and win over retried copies.
            let newer = std::mem::replace(&mut *pending, batch);
            for doc in newer.upserts.into_values() {
                pending.upsert(doc, self.limit);
            }
            for id in newer.deletes {
                pending.delete(id, self.limit);
            }
            pending.dropped = pending.dropped.max(newer.dropped);
            return Err(e);
        }

        if pending.dropped > 0 {
            tracing::warn!(
                dropped = pending.dropped,
                "Search index recovered; dropped documents need a reindex",
            );
            pending.dropped = 0;
        }
        drop(pending);
        tracing::debug!(documents = sent, "Search index synced");
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySearchIndex;
    use chrono::Utc;
    use statreg_core::unit::{StatUnit, UnitType};

    fn doc(reg_id: i64) -> SearchDocument {
        let mut unit = StatUnit::new(UnitType::LegalUnit, Utc::now());
        unit.reg_id = reg_id;
        unit.name = Some(format!("Unit {reg_id}"));
        SearchDocument::from_unit(&unit)
    }

    #[test]
    fn bulk_bodies_are_ndjson() {
        let body = upsert_body(&[doc(7)]).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"index":{"_id":"legal_unit-7"}}"#);
        assert!(lines[1].contains(r#""name":"Unit 7""#));
        assert_eq!(delete_body(&["a".into()]), "{\"delete\":{\"_id\":\"a\"}}\n");
    }

    #[test]
    fn item_failures_are_counted() {
        let items = vec![
            serde_json::json!({ "index": { "_id": "a", "status": 201 } }),
            serde_json::json!({ "index": { "_id": "b", "error": { "type": "mapper_parsing_exception" } } }),
        ];
        assert_eq!(count_item_failures(&items), 1);
    }

    #[tokio::test]
    async fn failed_sync_keeps_documents() {
        let index = Arc::new(MemorySearchIndex::default());
        let sync = IndexSync::new(index.clone(), 100);
        sync.push(vec![doc(1), doc(2)], Vec::new()).await;

        index.set_reachable(false);
        assert!(sync.flush().await.is_err());
        assert_eq!(sync.pending_len().await, 2);

        index.set_reachable(true);
        assert_eq!(sync.flush().await.unwrap(), 2);
        assert_eq!(sync.pending_len().await, 0);
        assert_eq!(index.len(), 2);
    }

    #[tokio::test]
    async fn delete_cancels_queued_upsert() {
        let sync = IndexSync::new(Arc::new(MemorySearchIndex::default()), 100);
        sync.push(vec![doc(1)], vec!["legal_unit-1".into()]).await;
        assert_eq!(sync.pending_len().await, 1);
    }

    #[tokio::test]
    async fn backlog_is_capped_while_index_is_down() {
        let index = Arc::new(MemorySearchIndex::default());
        let sync = IndexSync::new(index.clone(), 3);
        index.set_reachable(false);

        sync.push((1..=5).map(doc).collect(), Vec::new()).await;
        assert_eq!(sync.pending_len().await, 3);
        assert_eq!(sync.dropped().await, 2);

        // Replacing a held document never counts against the cap.
        sync.push(vec![doc(2)], Vec::new()).await;
        assert!(sync.flush().await.is_err());
        assert_eq!(sync.pending_len().await, 3);
        assert_eq!(sync.dropped().await, 2);

        index.set_reachable(true);
        assert_eq!(sync.flush().await.unwrap(), 3);
        assert_eq!(sync.dropped().await, 0);
        assert!(index.get("legal_unit-1").is_some());
        assert!(index.get("legal_unit-5").is_none());
    }

    #[tokio::test]
    async fn repeated_pushes_keep_one_copy_per_id() {
        let sync = IndexSync::new(Arc::new(MemorySearchIndex::default()), 100);
        for _ in 0..50 {
            sync.push(vec![doc(1), doc(2)], Vec::new()).await;
        }
        assert_eq!(sync.pending_len().await, 2);
        assert_eq!(sync.dropped().await, 0);
    }
}
