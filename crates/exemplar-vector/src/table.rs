//! LanceDB connection and housekeeping helpers.
//!
//! Provides database open, an ensure-table helper, and a small key/value
//! meta table holding the adopted embedding dimension and the clear marker.

use arrow_array::{RecordBatch, RecordBatchIterator, StringArray, TimestampMillisecondArray};
use chrono::Utc;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection};
use std::sync::Arc;

use exemplar_core::{Error, Result};

use crate::schema::build_meta_schema;
use crate::store_err;

pub const META_DIMENSION: &str = "dimension";
pub const META_CLEAR_STATE: &str = "clear_state";
pub const CLEAR_IN_PROGRESS: &str = "in_progress";

pub async fn open_db(uri: &str) -> Result<Connection> {
    connect(uri).execute().await.map_err(store_err)
}

pub async fn ensure_table(
    conn: &Connection,
    name: &str,
    schema: Arc<arrow_schema::Schema>,
) -> Result<()> {
    let names = conn.table_names().execute().await.map_err(store_err)?;
    if names.iter().any(|n| n == name) {
        return Ok(());
    }
    // create empty table with 0 rows
    let iter = RecordBatchIterator::new(vec![].into_iter(), schema.clone());
    conn.create_table(name, Box::new(iter)).execute().await.map_err(store_err)?;
    tracing::debug!(table = name, "created table");
    Ok(())
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub async fn set_meta(conn: &Connection, table: &str, key: &str, value: &str) -> Result<()> {
    ensure_table(conn, table, build_meta_schema()).await?;
    let t = conn.open_table(table).execute().await.map_err(store_err)?;
    let rb = RecordBatch::try_new(
        build_meta_schema(),
        vec![
            Arc::new(StringArray::from(vec![key.to_string()])),
            Arc::new(StringArray::from(vec![value.to_string()])),
            Arc::new(TimestampMillisecondArray::from(vec![Utc::now().timestamp_millis()])),
        ],
    )
    .map_err(store_err)?;
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(rb)].into_iter(), build_meta_schema()));
    // key is unique
    let mut mi = t.merge_insert(&["key"]);
    mi.when_matched_update_all(None).when_not_matched_insert_all();
    mi.execute(reader).await.map_err(store_err)?;
    Ok(())
}

pub async fn get_meta(conn: &Connection, table: &str, key: &str) -> Result<Option<String>> {
    let names = conn.table_names().execute().await.map_err(store_err)?;
    if !names.iter().any(|n| n == table) {
        return Ok(None);
    }
    let t = conn.open_table(table).execute().await.map_err(store_err)?;
    let mut stream = t
        .query()
        .only_if(&format!("key = {}", quote(key)))
        .execute()
        .await
        .map_err(store_err)?;
    while let Some(batch) = futures::TryStreamExt::try_next(&mut stream).await.map_err(store_err)? {
        if batch.num_rows() == 0 {
            continue;
        }
        let val = batch
            .column_by_name("value")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| Error::StoreUnavailable("meta.value column missing".into()))?;
        return Ok(Some(val.value(0).to_string()));
    }
    Ok(None)
}

pub async fn delete_meta(conn: &Connection, table: &str, key: &str) -> Result<()> {
    let names = conn.table_names().execute().await.map_err(store_err)?;
    if !names.iter().any(|n| n == table) {
        return Ok(());
    }
    let t = conn.open_table(table).execute().await.map_err(store_err)?;
    t.delete(&format!("key = {}", quote(key))).await.map_err(store_err)?;
    Ok(())
}
