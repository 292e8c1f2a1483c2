//! Arrow schemas for the chunk and meta tables, and row <-> record codecs.

use arrow_array::cast::AsArray;
use arrow_array::types::Float32Type;
use arrow_array::{Array, Int32Array, Int64Array, ListArray, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use std::sync::Arc;

use exemplar_core::{Category, ChunkRecord, Error, Result, Tags};

use crate::store_err;

pub fn build_chunk_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("source_id", DataType::Utf8, false),
        Field::new("sequence_index", DataType::Int32, false),
        Field::new("category", DataType::Utf8, false),
        // JSON array of tag strings
        Field::new("tags", DataType::Utf8, false),
        Field::new("content", DataType::Utf8, false),
        // insertion order, used to break score ties
        Field::new("seq", DataType::Int64, false),
        Field::new(
            "vector",
            DataType::List(Arc::new(Field::new("item", DataType::Float32, true))),
            true,
        ),
    ]))
}

pub fn build_meta_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("value", DataType::Utf8, false),
        Field::new("updated_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
    ]))
}

/// A record as persisted, paired with its insertion sequence number.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub seq: i64,
    pub record: ChunkRecord,
}

pub fn chunks_to_record_batch(chunks: &[StoredChunk]) -> Result<RecordBatch> {
    let mut ids = Vec::with_capacity(chunks.len());
    let mut source_ids = Vec::with_capacity(chunks.len());
    let mut sequence_indices = Vec::with_capacity(chunks.len());
    let mut categories = Vec::with_capacity(chunks.len());
    let mut tags = Vec::with_capacity(chunks.len());
    let mut contents = Vec::with_capacity(chunks.len());
    let mut seqs = Vec::with_capacity(chunks.len());
    let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(chunks.len());
    for c in chunks {
        let r = &c.record;
        ids.push(r.id.clone());
        source_ids.push(r.source_id.clone());
        sequence_indices.push(i32::try_from(r.sequence_index).map_err(|_| {
            Error::InvalidInput(format!("sequence index {} out of range", r.sequence_index))
        })?);
        categories.push(r.category.as_str().to_string());
        tags.push(serde_json::to_string(&r.tags).map_err(store_err)?);
        contents.push(r.text.clone());
        seqs.push(c.seq);
        vectors.push(Some(r.embedding.iter().map(|&x| Some(x)).collect()));
    }
    RecordBatch::try_new(
        build_chunk_schema(),
        vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(StringArray::from(source_ids)),
            Arc::new(Int32Array::from(sequence_indices)),
            Arc::new(StringArray::from(categories)),
            Arc::new(StringArray::from(tags)),
            Arc::new(StringArray::from(contents)),
            Arc::new(Int64Array::from(seqs)),
            Arc::new(ListArray::from_iter_primitive::<Float32Type, _, _>(vectors)),
        ],
    )
    .map_err(store_err)
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| {
            Error::StoreUnavailable(format!("chunk table column '{}' missing or mistyped", name))
        })
}

pub fn record_batch_to_chunks(batch: &RecordBatch) -> Result<Vec<StoredChunk>> {
    let ids = column::<StringArray>(batch, "id")?;
    let source_ids = column::<StringArray>(batch, "source_id")?;
    let sequence_indices = column::<Int32Array>(batch, "sequence_index")?;
    let categories = column::<StringArray>(batch, "category")?;
    let tags = column::<StringArray>(batch, "tags")?;
    let contents = column::<StringArray>(batch, "content")?;
    let seqs = column::<Int64Array>(batch, "seq")?;
    let vectors = column::<ListArray>(batch, "vector")?;

    let mut out = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let embedding = if vectors.is_null(i) {
            Vec::new()
        } else {
            vectors.value(i).as_primitive::<Float32Type>().values().to_vec()
        };
        let tags: Tags = serde_json::from_str(tags.value(i)).map_err(store_err)?;
        out.push(StoredChunk {
            seq: seqs.value(i),
            record: ChunkRecord {
                id: ids.value(i).to_string(),
                source_id: source_ids.value(i).to_string(),
                sequence_index: usize::try_from(sequence_indices.value(i)).unwrap_or_default(),
                text: contents.value(i).to_string(),
                category: Category::normalize(categories.value(i)),
                tags,
                embedding,
            },
        });
    }
    Ok(out)
}
