use crate::db::DbError;
use crate::schema::model::SchemaSnapshot;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default freshness window for a persisted snapshot.
pub const DEFAULT_TTL_SECS: u64 = 300;
/// Longest freshness window accepted from configuration (one year).
pub const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Error)]
#[error("schema introspection failed: {0}")]
pub struct IntrospectionError(pub String);

impl From<DbError> for IntrospectionError {
    fn from(err: DbError) -> Self {
        IntrospectionError(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot store format error: {0}")]
    Format(#[from] serde_json::Error),
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Source of truth for database structure.
#[async_trait]
pub trait Introspector: Send + Sync {
    async fn introspect(&self) -> Result<SchemaSnapshot, IntrospectionError>;
}

/// A persisted snapshot and the time it was last written.
#[derive(Debug, Clone)]
pub struct StoredSnapshot {
    pub snapshot: SchemaSnapshot,
    pub written_at: DateTime<Utc>,
}

/// Persistence for the cached snapshot.
///
/// `save` must replace the artifact atomically: concurrent writers are
/// last-writer-wins, readers never observe a partial write.
pub trait SnapshotStore: Send + Sync {
    fn load(&self) -> Result<Option<StoredSnapshot>, StoreError>;

    /// `at` is the caller's clock reading. Stores that track their own
    /// modification time may ignore it.
    fn save(&self, snapshot: &SchemaSnapshot, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Stores the snapshot as pretty JSON; freshness comes from the file's mtime.
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self) -> Result<Option<StoredSnapshot>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let modified = std::fs::metadata(&self.path)?.modified()?;
        let raw = std::fs::read(&self.path)?;
        let snapshot: SchemaSnapshot = serde_json::from_slice(&raw)?;

        Ok(Some(StoredSnapshot {
            snapshot,
            written_at: DateTime::<Utc>::from(modified),
        }))
    }

    fn save(&self, snapshot: &SchemaSnapshot, _at: DateTime<Utc>) -> Result<(), StoreError> {
        let dir = self.parent_dir();
        std::fs::create_dir_all(dir)?;

        // Write beside the target, then rename over it
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, snapshot)?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;

        debug!("Persisted schema snapshot to {}", self.path.display());
        Ok(())
    }
}

/// TTL-bounded cache of the schema snapshot.
///
/// Freshness is measured from the last write; hits do not reset the clock.
/// An expired entry is never served, even if introspection then fails.
pub struct SchemaCache {
    introspector: Arc<dyn Introspector>,
    store: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SchemaCache {
    pub fn new(
        introspector: Arc<dyn Introspector>,
        store: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
        ttl_secs: u64,
    ) -> Self {
        Self {
            introspector,
            store,
            clock,
            ttl: ttl_from_secs(ttl_secs),
        }
    }

    async fn load_stored(&self) -> Option<StoredSnapshot> {
        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || store.load()).await {
            Ok(Ok(stored)) => stored,
            Ok(Err(e)) => {
                warn!("Ignoring unreadable schema snapshot: {}", e);
                None
            }
            Err(e) => {
                warn!("Schema snapshot load task failed: {}", e);
                None
            }
        }
    }

    async fn persist(&self, snapshot: SchemaSnapshot) {
        let store = self.store.clone();
        let at = self.clock.now();
        match tokio::task::spawn_blocking(move || store.save(&snapshot, at)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to persist schema snapshot: {}", e),
            Err(e) => warn!("Schema snapshot save task failed: {}", e),
        }
    }

    pub async fn get_schema_snapshot(&self) -> Result<SchemaSnapshot, IntrospectionError> {
        let now = self.clock.now();

        match self.load_stored().await {
            Some(stored) => {
                let age = now - stored.written_at;
                if age < self.ttl {
                    debug!("Serving cached schema snapshot (age {}s)", age.num_seconds());
                    return Ok(stored.snapshot);
                }
                debug!("Cached schema snapshot expired (age {}s)", age.num_seconds());
            }
            None => debug!("No cached schema snapshot"),
        }

        info!("Refreshing schema snapshot");
        let snapshot = self.introspector.introspect().await?;
        info!(
            "Introspected schema '{}' with {} tables",
            snapshot.schema_name,
            snapshot.tables.len()
        );
        for fk in snapshot.dangling_foreign_keys() {
            warn!(
                "Foreign key {}.{} references missing table {}",
                fk.table, fk.column, fk.ref_table
            );
        }

        self.persist(snapshot.clone()).await;
        Ok(snapshot)
    }
}

/// Saturates instead of overflowing for windows chrono cannot represent.
fn ttl_from_secs(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}
