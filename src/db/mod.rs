use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task;
use crate::error::{Result, KgraphError};

pub mod migrate;

/// Idle connections kept around for reuse between requests
const MAX_IDLE_CONNECTIONS: usize = 8;

const CONNECTION_PRAGMAS: &str = "PRAGMA busy_timeout = 5000; \
     PRAGMA journal_mode = WAL; \
     PRAGMA synchronous = NORMAL; \
     PRAGMA foreign_keys = ON; \
     PRAGMA temp_store = MEMORY; \
     PRAGMA cache_size = -65536; \
     PRAGMA wal_autocheckpoint = 1000;";

/// Database handle.
///
/// Connections are opened lazily on first use and parked in a small idle
/// pool afterwards, so repeated requests reuse the same sessions. Cloning
/// is cheap and shares the pool.
#[derive(Clone)]
pub struct Db {
    path: PathBuf,
    idle: Arc<Mutex<Vec<Connection>>>,
}

impl Db {
    /// Create a new database handle. Nothing is opened until first use.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            path: db_path.as_ref().to_path_buf(),
            idle: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a new database connection with the standard pragmas.
    ///
    /// Any failure here means the backend is unreachable and is reported
    /// as `StorageUnavailable`.
    pub fn open_connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path).map_err(|e| {
            KgraphError::StorageUnavailable(format!("{}: {}", self.path.display(), e))
        })?;

        conn.execute_batch(CONNECTION_PRAGMAS).map_err(|e| {
            KgraphError::StorageUnavailable(format!("{}: {}", self.path.display(), e))
        })?;

        Ok(conn)
    }

    fn checkout(&self) -> Result<Connection> {
        let pooled = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        match pooled {
            Some(conn) => Ok(conn),
            None => self.open_connection(),
        }
    }

    fn checkin(&self, conn: Connection) {
        // A connection left inside a transaction is not safe to hand out again
        if !conn.is_autocommit() {
            return;
        }
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < MAX_IDLE_CONNECTIONS {
            idle.push(conn);
        }
    }

    /// Execute a closure with a database connection in a blocking task
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        task::spawn_blocking(move || {
            let mut conn = db.checkout()?;
            let result = f(&mut conn);
            match &result {
                Err(e) if e.is_unavailable() => {}
                _ => db.checkin(conn),
            }
            result
        })
        .await
        .map_err(|e| KgraphError::Task(e.to_string()))?
    }

    /// Reachability check used by health checks
    pub async fn ping(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(|e| KgraphError::StorageUnavailable(e.to_string()))?;
            Ok(())
        })
        .await
    }
}
