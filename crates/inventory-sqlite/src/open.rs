use crate::schema::MIG_0001_INIT;
use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::info;

pub struct Db {
    pub conn: Connection,
}

impl Db {
    pub fn open_or_create(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("open inventory database {}", path.display()))?;
        apply_pragmas(&conn)?;
        migrate(&conn)?;
        Ok(Db { conn })
    }

    /// Fresh schema in memory, for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        conn.pragma_update(None, "foreign_keys", &"ON")?;
        migrate(&conn)?;
        Ok(Db { conn })
    }
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", &"WAL")?;
    conn.pragma_update(None, "synchronous", &"NORMAL")?;
    conn.pragma_update(None, "foreign_keys", &"ON")?;
    conn.busy_timeout(std::time::Duration::from_secs(10))?;
    Ok(())
}

fn migrate(conn: &Connection) -> Result<()> {
    // naive: if hosts table doesn't exist, apply 0001
    let exists: i64 = conn.query_row(
        "SELECT COUNT(1) FROM sqlite_master WHERE type='table' AND name='hosts'",
        [],
        |r| r.get(0),
    )?;
    if exists == 0 {
        conn.execute_batch(MIG_0001_INIT).context("apply initial schema")?;
        info!("created inventory schema");
    }
    Ok(())
}
