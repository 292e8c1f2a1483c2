use arrow_array::RecordBatchIterator;
use lancedb::query::ExecutableQuery;
use lancedb::Connection;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

use exemplar_core::config::StoreSettings;
use exemplar_core::{ChunkRecord, Error, QueryFilter, Result, SearchHit, StoreStats};

use crate::schema::{
    build_chunk_schema, chunks_to_record_batch, record_batch_to_chunks, StoredChunk,
};
use crate::search::rank;
use crate::store_err;
use crate::table::{
    delete_meta, ensure_table, get_meta, open_db, set_meta, CLEAR_IN_PROGRESS, META_CLEAR_STATE,
    META_DIMENSION,
};

/// Immutable view of the store contents. Readers hold an `Arc` to one of
/// these, so a concurrent insert or clear never shows up half applied.
#[derive(Debug, Clone, Default)]
struct Snapshot {
    /// Sorted by `seq`.
    chunks: Vec<StoredChunk>,
    by_id: HashMap<String, usize>,
    dimension: Option<usize>,
    next_seq: i64,
}

impl Snapshot {
    fn load(mut chunks: Vec<StoredChunk>, stored_dimension: Option<usize>) -> Result<Self> {
        chunks.sort_by_key(|c| c.seq);
        let mut snapshot = Snapshot::default();
        for chunk in chunks {
            let dim = chunk.record.embedding.len();
            let expected = *snapshot.dimension.get_or_insert(dim);
            if dim == 0 || dim != expected {
                return Err(Error::StoreUnavailable(format!(
                    "chunk '{}' has a {}-dimensional vector, store holds {}-dimensional vectors",
                    chunk.record.id, dim, expected
                )));
            }
            snapshot.upsert(chunk);
        }
        if let (Some(inferred), Some(stored)) = (snapshot.dimension, stored_dimension) {
            if inferred != stored {
                return Err(Error::StoreUnavailable(format!(
                    "stored vectors are {}-dimensional but the store records dimension {}",
                    inferred, stored
                )));
            }
        }
        Ok(snapshot)
    }

    fn upsert(&mut self, chunk: StoredChunk) {
        self.next_seq = self.next_seq.max(chunk.seq + 1);
        match self.by_id.get(&chunk.record.id) {
            Some(&pos) => self.chunks[pos].record = chunk.record,
            None => {
                self.by_id.insert(chunk.record.id.clone(), self.chunks.len());
                self.chunks.push(chunk);
            }
        }
    }

    fn seq_of(&self, id: &str) -> Option<i64> {
        self.by_id.get(id).map(|&pos| self.chunks[pos].seq)
    }

    fn stats(&self) -> StoreStats {
        let mut categories = BTreeMap::new();
        let mut distinct_tags = BTreeSet::new();
        for chunk in &self.chunks {
            *categories.entry(chunk.record.category).or_insert(0) += 1;
            distinct_tags.extend(chunk.record.tags.iter().map(str::to_string));
        }
        StoreStats {
            count: self.chunks.len(),
            categories,
            distinct_tags,
            dimension: self.dimension,
        }
    }
}

pub struct VectorStore {
    conn: Connection,
    table: String,
    meta_table: String,
    snapshot: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
    /// Set while a clear is known to be incomplete; cleared by a successful clear.
    poisoned: AtomicBool,
}

impl VectorStore {
    pub async fn open(settings: &StoreSettings) -> Result<Self> {
        let uri = settings.resolved_uri();
        Self::open_at(&uri.to_string_lossy(), &settings.table, &settings.meta_table).await
    }

    pub async fn open_at(uri: &str, table: &str, meta_table: &str) -> Result<Self> {
        let conn = open_db(uri).await?;
        ensure_table(&conn, table, build_chunk_schema()).await?;

        let clear_state = get_meta(&conn, meta_table, META_CLEAR_STATE).await?;
        let clear_pending = clear_state.as_deref() == Some(CLEAR_IN_PROGRESS);
        let snapshot = if clear_pending {
            tracing::warn!(
                uri,
                table,
                "previous clear did not complete; store refuses access until cleared"
            );
            Snapshot::default()
        } else {
            let stored_dimension = match get_meta(&conn, meta_table, META_DIMENSION).await? {
                Some(raw) => Some(raw.parse::<usize>().map_err(|_| {
                    Error::StoreUnavailable(format!("invalid stored dimension '{}'", raw))
                })?),
                None => None,
            };
            Snapshot::load(load_chunks(&conn, table).await?, stored_dimension)?
        };

        tracing::info!(
            uri,
            table,
            count = snapshot.chunks.len(),
            dimension = ?snapshot.dimension,
            "opened vector store"
        );
        Ok(Self {
            conn,
            table: table.to_string(),
            meta_table: meta_table.to_string(),
            snapshot: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
            poisoned: AtomicBool::new(clear_pending),
        })
    }

    fn current(&self) -> Arc<Snapshot> {
        self.snapshot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn publish(&self, next: Snapshot) {
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(next);
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.poisoned.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable(
                "a previous clear did not complete; clear the store again".into(),
            ));
        }
        Ok(())
    }

    /// Adopted embedding dimension, `None` while the store is empty.
    pub fn dimension(&self) -> Option<usize> {
        self.current().dimension
    }

    pub fn len(&self) -> usize {
        self.current().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persists `records` as one atomic upsert keyed by id.
    ///
    /// Within one call the last record for an id wins. A record replacing an
    /// existing id keeps that id's original insertion position. The first
    /// insert into an empty store adopts its vector length as the dimension
    /// and records it before any row is written; if that fails nothing is
    /// written.
    pub async fn insert(&self, records: Vec<ChunkRecord>) -> Result<usize> {
        let _guard = self.writer.lock().await;
        self.ensure_usable()?;
        if records.is_empty() {
            return Ok(0);
        }
        let current = self.current();
        let dimension = current.dimension.unwrap_or(records[0].embedding.len());
        for r in &records {
            if r.text.trim().is_empty() {
                return Err(Error::InvalidInput(format!("chunk '{}' has empty text", r.id)));
            }
            if r.embedding.is_empty() {
                return Err(Error::InvalidInput(format!("chunk '{}' has an empty embedding", r.id)));
            }
            if r.embedding.len() != dimension {
                return Err(Error::DimensionMismatch {
                    expected: dimension,
                    actual: r.embedding.len(),
                });
            }
            if r.embedding.iter().any(|x| !x.is_finite()) {
                return Err(Error::NonFiniteEmbedding(r.id.clone()));
            }
        }

        let mut staged: Vec<StoredChunk> = Vec::with_capacity(records.len());
        let mut staged_pos: HashMap<String, usize> = HashMap::new();
        let mut next_seq = current.next_seq;
        for record in records {
            if let Some(&pos) = staged_pos.get(&record.id) {
                staged[pos].record = record;
                continue;
            }
            let seq = match current.seq_of(&record.id) {
                Some(seq) => seq,
                None => {
                    next_seq += 1;
                    next_seq - 1
                }
            };
            staged_pos.insert(record.id.clone(), staged.len());
            staged.push(StoredChunk { seq, record });
        }

        if current.dimension.is_none() {
            set_meta(&self.conn, &self.meta_table, META_DIMENSION, &dimension.to_string()).await?;
        }
        let batch = chunks_to_record_batch(&staged)?;
        let reader = Box::new(RecordBatchIterator::new(
            vec![Ok(batch)].into_iter(),
            build_chunk_schema(),
        ));
        let t = self.conn.open_table(&self.table).execute().await.map_err(store_err)?;
        let mut mi = t.merge_insert(&["id"]);
        mi.when_matched_update_all(None).when_not_matched_insert_all();
        mi.execute(reader).await.map_err(store_err)?;

        let written = staged.len();
        let mut next = (*current).clone();
        next.dimension = Some(dimension);
        for chunk in staged {
            next.upsert(chunk);
        }
        let total = next.chunks.len();
        self.publish(next);
        tracing::info!(written, total, dimension, "inserted chunks");
        Ok(written)
    }

    /// At most `k` records matching `filter`, best cosine score first.
    pub async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &QueryFilter,
    ) -> Result<Vec<SearchHit>> {
        self.ensure_usable()?;
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(Error::NonFiniteEmbedding("query".into()));
        }
        let snapshot = self.current();
        let Some(dimension) = snapshot.dimension else {
            return Ok(Vec::new());
        };
        if vector.len() != dimension {
            return Err(Error::DimensionMismatch { expected: dimension, actual: vector.len() });
        }
        if k == 0 {
            return Ok(Vec::new());
        }
        let hits = rank(snapshot.chunks.iter(), vector, k, filter);
        tracing::debug!(k, hits = hits.len(), ?filter, "vector query");
        Ok(hits)
    }

    /// Removes every record and forgets the dimension. Returns the number of
    /// rows removed.
    pub async fn clear(&self) -> Result<usize> {
        let _guard = self.writer.lock().await;
        match self.clear_tables().await {
            Ok(removed) => {
                self.publish(Snapshot::default());
                self.poisoned.store(false, Ordering::SeqCst);
                tracing::info!(removed, "cleared vector store");
                Ok(removed)
            }
            Err(e) => {
                self.poisoned.store(true, Ordering::SeqCst);
                tracing::error!(error = %e, "clear failed; store refuses access until cleared");
                Err(Error::StoreUnavailable(format!("clear failed: {}", e)))
            }
        }
    }

    async fn clear_tables(&self) -> Result<usize> {
        set_meta(&self.conn, &self.meta_table, META_CLEAR_STATE, CLEAR_IN_PROGRESS).await?;
        ensure_table(&self.conn, &self.table, build_chunk_schema()).await?;
        let t = self.conn.open_table(&self.table).execute().await.map_err(store_err)?;
        let removed = t.count_rows(None).await.map_err(store_err)?;
        t.delete("id IS NOT NULL").await.map_err(store_err)?;
        delete_meta(&self.conn, &self.meta_table, META_DIMENSION).await?;
        delete_meta(&self.conn, &self.meta_table, META_CLEAR_STATE).await?;
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.ensure_usable()?;
        Ok(self.current().stats())
    }

    /// Waits for any in-flight write, then releases the connection.
    pub async fn close(self) {
        let _guard = self.writer.lock().await;
        tracing::debug!(table = %self.table, "closed vector store");
    }
}

async fn load_chunks(conn: &Connection, table: &str) -> Result<Vec<StoredChunk>> {
    let t = conn.open_table(table).execute().await.map_err(store_err)?;
    let mut stream = t.query().execute().await.map_err(store_err)?;
    let mut out = Vec::new();
    while let Some(batch) = futures::TryStreamExt::try_next(&mut stream).await.map_err(store_err)? {
        out.extend(record_batch_to_chunks(&batch)?);
    }
    Ok(out)
}
