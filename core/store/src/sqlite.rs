//! SQLite-backed store.
//!
//! Persists the current manifest and resource bodies in a single database
//! file. A commit is one transaction, so a crash mid-commit rolls back to
//! the previous sync's state.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

use bundlesync_common::{Error, ResourcePath, Result, StoreStage};
use bundlesync_manifest::{FetchedResource, Manifest, ResourceDescriptor};

use crate::store::{ManifestStore, ResourceStore};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS manifest (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        body BLOB NOT NULL
    );

    CREATE TABLE IF NOT EXISTS resources (
        path TEXT PRIMARY KEY,
        content_hash TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        content BLOB NOT NULL
    );
"#;

/// SQLite store.
///
/// The connection sits behind a mutex and every query runs on the blocking
/// thread pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Create or open a store database.
    ///
    /// # Errors
    /// - Database creation or schema migration failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path).map_err(|e| Error::store(StoreStage::Load, e))?;
        let store = Self::init(conn)?;
        info!("Opened store at {}", db_path.display());
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::store(StoreStage::Load, e))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| Error::store(StoreStage::Load, e))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, stage: StoreStage, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut conn)
        })
        .await
        .map_err(|e| Error::store(stage, e))?
    }
}

fn load_blocking(conn: &mut Connection) -> Result<Option<Manifest>> {
    let sql = |e: rusqlite::Error| Error::store(StoreStage::Load, e);

    let body: Option<Vec<u8>> = conn
        .query_row("SELECT body FROM manifest WHERE id = 1", [], |row| row.get(0))
        .optional()
        .map_err(sql)?;
    let Some(body) = body else {
        return Ok(None);
    };

    let manifest = Manifest::from_bytes(&body).map_err(|e| Error::store(StoreStage::Load, e))?;

    let mut stmt = conn
        .prepare_cached("SELECT 1 FROM resources WHERE path = ?1 AND content_hash = ?2")
        .map_err(sql)?;
    for descriptor in &manifest.resources {
        let present = stmt
            .exists(params![descriptor.path.as_str(), descriptor.content_hash])
            .map_err(sql)?;
        if !present {
            return Err(Error::store(
                StoreStage::Load,
                format!("manifest references missing resource {}", descriptor.path),
            ));
        }
    }

    Ok(Some(manifest))
}

fn commit_blocking(
    conn: &mut Connection,
    resources: &[FetchedResource],
    body: &[u8],
) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached(
            r#"
            INSERT OR REPLACE INTO resources (path, content_hash, timestamp, content)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )?;
        for resource in resources {
            debug!("Upserting resource: {}", resource.path());
            stmt.execute(params![
                resource.descriptor.path.as_str(),
                resource.descriptor.content_hash,
                resource.descriptor.timestamp,
                resource.content,
            ])?;
        }
    }
    tx.execute(
        "INSERT OR REPLACE INTO manifest (id, body) VALUES (1, ?1)",
        params![body],
    )?;
    tx.commit()
}

fn row_to_resource(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String, Vec<u8>)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_resource(
    (path, content_hash, timestamp, content): (String, String, String, Vec<u8>),
) -> Result<FetchedResource> {
    let path = ResourcePath::parse(path).map_err(|e| Error::store(StoreStage::Load, e))?;
    Ok(FetchedResource::new(
        ResourceDescriptor::new(path, content_hash, timestamp),
        content,
    ))
}

#[async_trait]
impl ManifestStore for SqliteStore {
    async fn load_current(&self) -> Result<Option<Manifest>> {
        self.with_conn(StoreStage::Load, load_blocking).await
    }
}

#[async_trait]
impl ResourceStore for SqliteStore {
    async fn commit(&self, resources: Vec<FetchedResource>, manifest: &Manifest) -> Result<()> {
        let body = manifest
            .to_bytes()
            .map_err(|e| Error::store(StoreStage::Commit, e))?;
        let count = resources.len();

        self.with_conn(StoreStage::Commit, move |conn| {
            commit_blocking(conn, &resources, &body).map_err(|e| Error::store(StoreStage::Commit, e))
        })
        .await?;

        debug!("Committed manifest with {} upserted resources", count);
        Ok(())
    }

    async fn resource(&self, path: &ResourcePath) -> Result<Option<FetchedResource>> {
        let path = path.as_str().to_string();
        self.with_conn(StoreStage::Load, move |conn| {
            let row = conn
                .query_row(
                    "SELECT path, content_hash, timestamp, content FROM resources WHERE path = ?1",
                    [path],
                    row_to_resource,
                )
                .optional()
                .map_err(|e| Error::store(StoreStage::Load, e))?;
            row.map(into_resource).transpose()
        })
        .await
    }

    async fn resources(&self) -> Result<Vec<FetchedResource>> {
        self.with_conn(StoreStage::Load, |conn| {
            let sql = |e: rusqlite::Error| Error::store(StoreStage::Load, e);
            let mut stmt = conn
                .prepare("SELECT path, content_hash, timestamp, content FROM resources ORDER BY path")
                .map_err(sql)?;
            let rows = stmt
                .query_map([], row_to_resource)
                .map_err(sql)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(sql)?;
            rows.into_iter().map(into_resource).collect()
        })
        .await
    }
}
