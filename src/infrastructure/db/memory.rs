//! In-process dataset storage.
//!
//! Mirrors the Postgres backend's guarantees: upload sessions stage their
//! writes and publish them atomically on commit, and a per-name async lock
//! serializes uploads and deletes that target the same table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

use super::{DatasetStore, RowSender, UploadSession};
use crate::domain::error::{IngestError, Result};
use crate::domain::{DatasetRecord, RegistryEntry, Row, SchemaDefinition, TableName};

#[derive(Debug)]
struct MemoryTable {
    schema: &'static SchemaDefinition,
    rows: Vec<DatasetRecord>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, MemoryTable>,
    /// Entry plus a write sequence that breaks `uploaded_at` ties.
    registry: HashMap<String, (u64, RegistryEntry)>,
    sequence: u64,
}

/// Rows copied out of the shared state per read lock while exporting.
const STREAM_CHUNK_ROWS: usize = 256;

type NameLocks = Arc<SyncMutex<HashMap<String, Arc<Mutex<()>>>>>;

/// Holds the per-name lock. On release the map entry is removed once no
/// other caller holds or waits for it.
struct NameGuard {
    name: String,
    locks: NameLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for NameGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.name)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.name);
        }
    }
}

#[derive(Default)]
pub struct MemoryDatasetStore {
    state: Arc<RwLock<MemoryState>>,
    locks: NameLocks,
}

impl MemoryDatasetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all physical tables, sorted.
    pub async fn table_names(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut names: Vec<String> = state.tables.keys().cloned().collect();
        names.sort();
        names
    }

    async fn lock_name(&self, table: &TableName) -> NameGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(table.as_str().to_string()).or_default())
        };
        let guard = lock.lock_owned().await;
        debug!(table = %table, "acquired table name lock");
        NameGuard {
            name: table.as_str().to_string(),
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl DatasetStore for MemoryDatasetStore {
    async fn begin_upload(&self, table: &TableName) -> Result<Box<dyn UploadSession>> {
        let guard = self.lock_name(table).await;
        Ok(Box::new(MemoryUploadSession {
            state: Arc::clone(&self.state),
            _guard: guard,
            staged: None,
            registry: None,
        }))
    }

    async fn list_entries(&self) -> Result<Vec<RegistryEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<&(u64, RegistryEntry)> = state.registry.values().collect();
        entries.sort_by(|(seq_a, a), (seq_b, b)| {
            b.uploaded_at
                .cmp(&a.uploaded_at)
                .then_with(|| seq_b.cmp(seq_a))
        });
        Ok(entries.into_iter().map(|(_, entry)| entry.clone()).collect())
    }

    async fn find_entry(&self, table: &TableName) -> Result<Option<RegistryEntry>> {
        let state = self.state.read().await;
        Ok(state
            .registry
            .get(table.as_str())
            .map(|(_, entry)| entry.clone()))
    }

    async fn drop_dataset(&self, table: &TableName) -> Result<()> {
        let _guard = self.lock_name(table).await;
        let mut state = self.state.write().await;
        if state.registry.remove(table.as_str()).is_none() {
            return Err(IngestError::NotFound(format!("dataset {}", table)));
        }
        state.tables.remove(table.as_str());
        info!(table = %table, "dropped dataset");
        Ok(())
    }

    async fn find_rows(
        &self,
        table: &TableName,
        schema: &'static SchemaDefinition,
        column: &'static str,
        value: &str,
    ) -> Result<Vec<DatasetRecord>> {
        let state = self.state.read().await;
        let stored = state
            .tables
            .get(table.as_str())
            .ok_or_else(|| IngestError::NotFound(format!("table {}", table)))?;

        let position = |name: &str| {
            stored
                .schema
                .columns
                .iter()
                .position(|c| *c == name)
                .ok_or_else(|| {
                    IngestError::Database(format!("column {} does not exist in {}", name, table))
                })
        };
        let filter_idx = position(column)?;
        let sort_idx = position(schema.sort_key)?;

        let mut matches: Vec<DatasetRecord> = stored
            .rows
            .iter()
            .filter(|record| record.values[filter_idx] == value)
            .cloned()
            .collect();
        matches.sort_by(|a, b| {
            a.values[sort_idx]
                .cmp(&b.values[sort_idx])
                .then(a.id.cmp(&b.id))
        });
        Ok(matches)
    }

    async fn stream_rows(
        &self,
        table: &TableName,
        _schema: &'static SchemaDefinition,
        sink: RowSender,
    ) -> Result<()> {
        let mut offset = 0;
        loop {
            let chunk: Vec<Row> = {
                let state = self.state.read().await;
                match state.tables.get(table.as_str()) {
                    Some(stored) => stored
                        .rows
                        .iter()
                        .skip(offset)
                        .take(STREAM_CHUNK_ROWS)
                        .map(|record| record.values.clone())
                        .collect(),
                    None if offset == 0 => {
                        return Err(IngestError::NotFound(format!("table {}", table)))
                    }
                    None => {
                        debug!(table = %table, "table dropped during export");
                        Vec::new()
                    }
                }
            };
            if chunk.is_empty() {
                return Ok(());
            }
            offset += chunk.len();

            for row in chunk {
                if sink.send(Ok(row)).await.is_err() {
                    debug!(table = %table, "export consumer went away");
                    return Ok(());
                }
            }
        }
    }
}

struct StagedTable {
    name: String,
    schema: &'static SchemaDefinition,
    replace: bool,
    rows: Vec<Row>,
}

struct MemoryUploadSession {
    state: Arc<RwLock<MemoryState>>,
    _guard: NameGuard,
    staged: Option<StagedTable>,
    registry: Option<(String, String, u64)>,
}

#[async_trait]
impl UploadSession for MemoryUploadSession {
    async fn create_table(
        &mut self,
        table: &TableName,
        schema: &'static SchemaDefinition,
        replace: bool,
    ) -> Result<()> {
        if !replace && self.state.read().await.tables.contains_key(table.as_str()) {
            return Err(IngestError::TableExists(table.to_string()));
        }
        self.staged = Some(StagedTable {
            name: table.as_str().to_string(),
            schema,
            replace,
            rows: Vec::new(),
        });
        Ok(())
    }

    async fn copy_batch(
        &mut self,
        table: &TableName,
        schema: &'static SchemaDefinition,
        rows: &[Row],
    ) -> Result<u64> {
        let bulk_error = |message: String| IngestError::BulkLoad {
            table: table.to_string(),
            message,
        };
        let staged = match self.staged.as_mut() {
            Some(staged) if staged.name == table.as_str() => staged,
            _ => return Err(bulk_error("table was not created in this session".to_string())),
        };

        // Same checks the COPY wire format enforces.
        for row in rows {
            if row.len() != schema.columns.len() {
                return Err(bulk_error(format!(
                    "expected {} columns, got {}",
                    schema.columns.len(),
                    row.len()
                )));
            }
            if row.iter().any(|field| field.contains('\0')) {
                return Err(bulk_error("invalid byte sequence 0x00 in field".to_string()));
            }
        }

        staged.rows.extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn upsert_registry(
        &mut self,
        table: &TableName,
        dataset_type: &str,
        row_count: u64,
    ) -> Result<()> {
        self.registry = Some((table.as_str().to_string(), dataset_type.to_string(), row_count));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryUploadSession {
            state,
            _guard,
            staged,
            registry,
        } = *self;
        let mut state = state.write().await;

        if let Some(staged) = staged {
            if !staged.replace && state.tables.contains_key(&staged.name) {
                return Err(IngestError::TableExists(staged.name));
            }
            let rows = staged
                .rows
                .into_iter()
                .zip(1i64..)
                .map(|(values, id)| DatasetRecord { id, values })
                .collect();
            state.tables.insert(
                staged.name,
                MemoryTable {
                    schema: staged.schema,
                    rows,
                },
            );
        }

        if let Some((table_name, dataset_type, row_count)) = registry {
            let row_count = i64::try_from(row_count).map_err(|_| {
                IngestError::Database(format!("row count {} out of range", row_count))
            })?;
            state.sequence += 1;
            let sequence = state.sequence;
            state.registry.insert(
                table_name.clone(),
                (
                    sequence,
                    RegistryEntry {
                        table_name,
                        dataset_type,
                        row_count,
                        uploaded_at: Utc::now(),
                    },
                ),
            );
        }

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        if let Some(staged) = &self.staged {
            warn!(table = %staged.name, rows = staged.rows.len(), "discarding staged upload");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::schema::{SCHOOL, TEACHER};
    use std::time::Duration;

    fn teacher_row(code: &str, name: &str) -> Row {
        vec![
            "S1".to_string(),
            "Central".to_string(),
            name.to_string(),
            code.to_string(),
            "PRT".to_string(),
        ]
    }

    async fn load(store: &MemoryDatasetStore, table: &TableName, rows: &[Row]) {
        let mut session = store.begin_upload(table).await.unwrap();
        session.create_table(table, &TEACHER, false).await.unwrap();
        session.copy_batch(table, &TEACHER, rows).await.unwrap();
        session
            .upsert_registry(table, TEACHER.name, rows.len() as u64)
            .await
            .unwrap();
        session.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_nothing_visible_before_commit() {
        let store = MemoryDatasetStore::new();
        let table = TableName::parse("teacher_a").unwrap();

        let mut session = store.begin_upload(&table).await.unwrap();
        session.create_table(&table, &TEACHER, false).await.unwrap();
        session
            .copy_batch(&table, &TEACHER, &[teacher_row("E1", "Asha")])
            .await
            .unwrap();
        session.upsert_registry(&table, "teacher", 1).await.unwrap();

        assert!(store.table_names().await.is_empty());
        assert!(store.find_entry(&table).await.unwrap().is_none());

        session.rollback().await.unwrap();
        assert!(store.table_names().await.is_empty());
        assert!(store.list_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_session_discards_work_and_releases_lock() {
        let store = MemoryDatasetStore::new();
        let table = TableName::parse("teacher_a").unwrap();
        {
            let mut session = store.begin_upload(&table).await.unwrap();
            session.create_table(&table, &TEACHER, false).await.unwrap();
        }
        assert!(store.table_names().await.is_empty());
        let next = tokio::time::timeout(Duration::from_secs(1), store.begin_upload(&table)).await;
        assert!(next.is_ok());
    }

    #[tokio::test]
    async fn test_same_name_uploads_are_serialized() {
        let store = Arc::new(MemoryDatasetStore::new());
        let table = TableName::parse("teacher_a").unwrap();

        let first = store.begin_upload(&table).await.unwrap();
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), store.begin_upload(&table)).await;
        assert!(blocked.is_err(), "second session must wait for the first");

        let other = TableName::parse("teacher_b").unwrap();
        let independent =
            tokio::time::timeout(Duration::from_millis(50), store.begin_upload(&other)).await;
        assert!(independent.is_ok(), "other names are not blocked");

        first.rollback().await.unwrap();
        let unblocked =
            tokio::time::timeout(Duration::from_secs(1), store.begin_upload(&table)).await;
        assert!(unblocked.is_ok());
    }

    #[tokio::test]
    async fn test_existing_table_requires_replace() {
        let store = MemoryDatasetStore::new();
        let table = TableName::parse("teacher_a").unwrap();
        load(&store, &table, &[teacher_row("E1", "Asha")]).await;

        let mut session = store.begin_upload(&table).await.unwrap();
        let err = session.create_table(&table, &TEACHER, false).await.unwrap_err();
        assert!(matches!(err, IngestError::TableExists(_)));
        session.create_table(&table, &TEACHER, true).await.unwrap();
        session.upsert_registry(&table, "teacher", 0).await.unwrap();
        session.commit().await.unwrap();

        let entry = store.find_entry(&table).await.unwrap().unwrap();
        assert_eq!(entry.row_count, 0);
        assert_eq!(store.list_entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_nul_bytes_are_rejected_like_copy() {
        let store = MemoryDatasetStore::new();
        let table = TableName::parse("teacher_a").unwrap();
        let mut session = store.begin_upload(&table).await.unwrap();
        session.create_table(&table, &TEACHER, false).await.unwrap();
        let err = session
            .copy_batch(&table, &TEACHER, &[teacher_row("E\0", "Asha")])
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::BulkLoad { .. }));
    }

    #[tokio::test]
    async fn test_find_rows_orders_by_sort_key() {
        let store = MemoryDatasetStore::new();
        let table = TableName::parse("teacher_a").unwrap();
        load(
            &store,
            &table,
            &[
                teacher_row("E1", "Zoya"),
                teacher_row("E2", "Asha"),
                teacher_row("E1", "Mina"),
            ],
        )
        .await;

        let hits = store
            .find_rows(&table, &TEACHER, "employee_code", "E1")
            .await
            .unwrap();
        let names: Vec<&str> = hits.iter().map(|r| r.values[2].as_str()).collect();
        assert_eq!(names, vec!["Mina", "Zoya"]);

        let none = store
            .find_rows(&table, &TEACHER, "employee_code", "E9")
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_drop_dataset_removes_table_and_entry() {
        let store = MemoryDatasetStore::new();
        let table = TableName::parse("teacher_a").unwrap();
        load(&store, &table, &[teacher_row("E1", "Asha")]).await;

        store.drop_dataset(&table).await.unwrap();
        assert!(store.table_names().await.is_empty());
        assert!(store.find_entry(&table).await.unwrap().is_none());

        let err = store.drop_dataset(&table).await.unwrap_err();
        assert!(matches!(err, IngestError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_entries_newest_first() {
        let store = MemoryDatasetStore::new();
        for name in ["teacher_a", "teacher_b", "teacher_c"] {
            let table = TableName::parse(name).unwrap();
            load(&store, &table, &[]).await;
        }
        let names: Vec<String> = store
            .list_entries()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.table_name)
            .collect();
        assert_eq!(names, vec!["teacher_c", "teacher_b", "teacher_a"]);
    }

    #[tokio::test]
    async fn test_name_locks_are_released_after_use() {
        let store = MemoryDatasetStore::new();
        let table = TableName::parse("teacher_a").unwrap();
        load(&store, &table, &[teacher_row("E1", "Asha")]).await;
        assert_eq!(store.tracked_locks(), 0);

        let failed = TableName::parse("teacher_failed").unwrap();
        let session = store.begin_upload(&failed).await.unwrap();
        assert_eq!(store.tracked_locks(), 1);
        session.rollback().await.unwrap();
        assert_eq!(store.tracked_locks(), 0);

        store.drop_dataset(&table).await.unwrap();
        assert_eq!(store.tracked_locks(), 0);
    }

    #[tokio::test]
    async fn test_waiting_session_keeps_lock_entry() {
        let store = Arc::new(MemoryDatasetStore::new());
        let table = TableName::parse("teacher_a").unwrap();

        let first = store.begin_upload(&table).await.unwrap();
        let waiter = {
            let store = Arc::clone(&store);
            let table = table.clone();
            tokio::spawn(async move {
                let session = store.begin_upload(&table).await.unwrap();
                session.rollback().await.unwrap();
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        first.rollback().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.tracked_locks(), 0);
    }

    #[tokio::test]
    async fn test_stream_rows_spans_several_chunks() {
        let store = MemoryDatasetStore::new();
        let table = TableName::parse("teacher_a").unwrap();
        let total = STREAM_CHUNK_ROWS * 2 + 7;
        let rows: Vec<Row> = (0..total)
            .map(|i| teacher_row(&format!("E{i}"), "Asha"))
            .collect();
        load(&store, &table, &rows).await;

        let (tx, mut rx): (RowSender, _) = tokio::sync::mpsc::channel(8);
        let reader = tokio::spawn(async move {
            let mut codes = Vec::new();
            while let Some(row) = rx.recv().await {
                codes.push(row.unwrap()[3].clone());
            }
            codes
        });
        store.stream_rows(&table, &TEACHER, tx).await.unwrap();

        let codes = reader.await.unwrap();
        assert_eq!(codes.len(), total);
        assert_eq!(codes[0], "E0");
        assert_eq!(codes[total - 1], format!("E{}", total - 1));
    }

    #[tokio::test]
    async fn test_stream_rows_stops_when_receiver_dropped() {
        let store = MemoryDatasetStore::new();
        let table = TableName::parse("school_a").unwrap();
        let mut session = store.begin_upload(&table).await.unwrap();
        session.create_table(&table, &SCHOOL, false).await.unwrap();
        let rows: Vec<Row> = (0..10)
            .map(|i| {
                vec![
                    format!("S{i}"),
                    "n".to_string(),
                    "b".to_string(),
                    "d".to_string(),
                    "1".to_string(),
                    "8".to_string(),
                ]
            })
            .collect();
        session.copy_batch(&table, &SCHOOL, &rows).await.unwrap();
        session.upsert_registry(&table, "school", 10).await.unwrap();
        session.commit().await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::channel(1);
        let reader = tokio::spawn(async move {
            let first = rx.recv().await;
            drop(rx);
            first
        });
        store.stream_rows(&table, &SCHOOL, tx).await.unwrap();
        let first = reader.await.unwrap().unwrap().unwrap();
        assert_eq!(first[0], "S0");
    }
}
