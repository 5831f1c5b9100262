// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Metadata store backed by SQLite. Each document is one JSON object keyed by
// collection and document id; writes merge into the stored object.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use belegwerk_core::error::{BelegError, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};

use crate::provider::MetadataStore;

const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS documents (
        collection TEXT NOT NULL,
        doc_id TEXT NOT NULL,
        body TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (collection, doc_id)
    )
"#;

/// All methods lock one connection; async callers go through
/// `spawn_blocking`.
#[derive(Clone)]
pub struct SqliteMetadataStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMetadataStore {
    /// Open (or create) the database at `path` in WAL mode.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(|e| BelegError::Database(format!("open: {e}")))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| BelegError::Database(format!("WAL pragma: {e}")))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| BelegError::Database(format!("create table: {e}")))?;
        info!("metadata database opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| BelegError::Database(format!("open in-memory: {e}")))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| BelegError::Database(format!("create table: {e}")))?;
        debug!("in-memory metadata database opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Stored document, `None` if absent.
    pub fn get(&self, collection: &str, document_id: &str) -> Result<Option<Map<String, Value>>> {
        let conn = self.lock()?;
        read_document(&conn, collection, document_id)
    }

    /// Document ids in `collection`, sorted.
    pub fn list(&self, collection: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT doc_id FROM documents WHERE collection = ?1 ORDER BY doc_id")
            .map_err(|e| BelegError::Database(format!("prepare list: {e}")))?;
        let rows = stmt
            .query_map(params![collection], |row| row.get::<_, String>(0))
            .map_err(|e| BelegError::Database(format!("list: {e}")))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| BelegError::Database(format!("list row: {e}")))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| BelegError::Database("connection mutex poisoned".into()))
    }

    fn merge_blocking(conn: &Connection, collection: &str, document_id: &str, fields: Map<String, Value>) -> Result<()> {
        let mut doc = read_document(conn, collection, document_id)?.unwrap_or_default();
        belegwerk_core::merge_fields(&mut doc, fields);
        let body = serde_json::to_string(&Value::Object(doc))?;
        conn.execute(
            "INSERT INTO documents (collection, doc_id, body, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(collection, doc_id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
            params![collection, document_id, body, chrono::Utc::now().to_rfc3339()],
        )
        .map_err(|e| BelegError::Database(format!("upsert document: {e}")))?;
        Ok(())
    }
}

fn read_document(conn: &Connection, collection: &str, document_id: &str) -> Result<Option<Map<String, Value>>> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM documents WHERE collection = ?1 AND doc_id = ?2",
            params![collection, document_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| BelegError::Database(format!("get document: {e}")))?;
    match body {
        None => Ok(None),
        Some(text) => match serde_json::from_str::<Value>(&text)? {
            Value::Object(map) => Ok(Some(map)),
            other => Err(BelegError::Database(format!(
                "document {collection}/{document_id} is not an object: {other}"
            ))),
        },
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    #[instrument(skip(self, fields))]
    async fn merge_set(&self, collection: &str, document_id: &str, fields: Map<String, Value>) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let collection = collection.to_string();
        let document_id = document_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| BelegError::Database("connection mutex poisoned".into()))?;
            Self::merge_blocking(&conn, &collection, &document_id, fields)
        })
        .await
        .map_err(|e| BelegError::Database(format!("merge task: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn merge_keeps_untouched_fields() {
        let store = SqliteMetadataStore::open_in_memory().unwrap();
        store
            .merge_set("users/u/receipts", "r1", fields(json!({"a": 1, "nested": {"x": 1}})))
            .await
            .unwrap();
        store
            .merge_set("users/u/receipts", "r1", fields(json!({"b": 2, "nested": {"y": 2}})))
            .await
            .unwrap();
        let doc = store.get("users/u/receipts", "r1").unwrap().unwrap();
        assert_eq!(Value::Object(doc), json!({"a": 1, "b": 2, "nested": {"x": 1, "y": 2}}));
        assert_eq!(store.list("users/u/receipts").unwrap(), vec!["r1".to_string()]);
    }

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.db");
        {
            let store = SqliteMetadataStore::open(&path).unwrap();
            store.merge_set("c", "d", fields(json!({"k": "v"}))).await.unwrap();
        }
        let reopened = SqliteMetadataStore::open(&path).unwrap();
        assert_eq!(
            reopened.get("c", "d").unwrap().map(Value::Object),
            Some(json!({"k": "v"}))
        );
        assert_eq!(reopened.get("c", "missing").unwrap(), None);
    }
}
