//! Batched, append-only writer for upload-log entries.

use std::sync::Arc;

use statreg_core::error::StoreError;
use statreg_core::store::UploadLogSink;
use statreg_core::upload_log::UploadLogEntry;
use tokio::sync::{Mutex, Semaphore};

/// Bounded buffer of upload-log entries.
///
/// `push` appends and, once `capacity` entries are waiting, writes them
/// out. Append-then-maybe-flush is serialized so a flush triggered by one
/// caller cannot interleave with another caller's append.
pub struct LogBuffer {
    sink: Arc<dyn UploadLogSink>,
    entries: Mutex<Vec<UploadLogEntry>>,
    capacity: usize,
    gate: Semaphore,
}

impl LogBuffer {
    pub fn new(sink: Arc<dyn UploadLogSink>, capacity: usize) -> Self {
        Self {
            sink,
            entries: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            gate: Semaphore::new(1),
        }
    }

    pub async fn push(&self, entry: UploadLogEntry) -> Result<(), StoreError> {
        let _permit = self.acquire().await?;
        let full = {
            let mut entries = self.entries.lock().await;
            entries.push(entry);
            entries.len() >= self.capacity
        };
        if full {
            self.write_out().await?;
        }
        Ok(())
    }

    pub async fn push_all(&self, entries: Vec<UploadLogEntry>) -> Result<(), StoreError> {
        for entry in entries {
            self.push(entry).await?;
        }
        Ok(())
    }

    /// Write every waiting entry.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let _permit = self.acquire().await?;
        self.write_out().await
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    async fn acquire(&self) -> Result<tokio::sync::SemaphorePermit<'_>, StoreError> {
        self.gate
            .acquire()
            .await
            .map_err(|_| StoreError::Unavailable("upload log buffer closed".into()))
    }

    /// Caller holds the gate. Entries stay buffered if the sink fails.
    async fn write_out(&self) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        if entries.is_empty() {
            return Ok(());
        }
        self.sink.append(&entries).await?;
        tracing::debug!(entries = entries.len(), "Upload log flushed");
        entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use chrono::Utc;

    #[tokio::test]
    async fn flushes_at_capacity() {
        let store = Arc::new(MemoryStore::default());
        let buffer = LogBuffer::new(store.clone(), 2);

        buffer.push(UploadLogEntry::new(1, Utc::now())).await.unwrap();
        assert_eq!(store.upload_log().len(), 0);
        buffer.push(UploadLogEntry::new(1, Utc::now())).await.unwrap();
        assert_eq!(store.upload_log().len(), 2);
        assert_eq!(buffer.len().await, 0);
    }

    #[tokio::test]
    async fn explicit_flush_writes_remainder() {
        let store = Arc::new(MemoryStore::default());
        let buffer = LogBuffer::new(store.clone(), 10);
        buffer.push(UploadLogEntry::new(1, Utc::now())).await.unwrap();
        buffer.flush().await.unwrap();
        assert_eq!(store.upload_log().len(), 1);
    }
}
