use crate::error::StoreError;
use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared handle to the SQLite store. Cloning shares the same connection;
/// writers serialise on the mutex and async callers hop onto the blocking
/// pool first.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(db_path: &str) -> Result<Self, StoreError> {
        let db_path = db_path.strip_prefix("sqlite:").unwrap_or(db_path);
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        create_tables(&conn)?;
        Ok(Database {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.lock()?;
        f(&conn)
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Run `f` against the connection on tokio's blocking pool.
    pub async fn run_blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.with_conn(f)).await?
    }
}

fn create_tables(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS transfer_event (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            address TEXT NOT NULL,
            transaction_from TEXT NOT NULL,
            sender TEXT NOT NULL,
            recipient TEXT NOT NULL,
            amount TEXT NOT NULL,
            block_timestamp INTEGER NOT NULL,
            tx_hash TEXT NOT NULL,
            chain TEXT NOT NULL,
            provider TEXT NOT NULL,
            decimals INTEGER NOT NULL,
            facilitator_id TEXT NOT NULL,
            log_index INTEGER NOT NULL
        )",
        [],
    )?;

    // Identity of an on-chain transfer; INSERT OR IGNORE relies on it so
    // re-fetched windows never double count.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS ux_transfer_event_identity
         ON transfer_event(chain, tx_hash, log_index, transaction_from)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transfer_event_watermark
         ON transfer_event(chain, transaction_from, provider, block_timestamp DESC)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transfer_event_facilitator
         ON transfer_event(facilitator_id, chain)",
        [],
    )?;

    Ok(())
}
