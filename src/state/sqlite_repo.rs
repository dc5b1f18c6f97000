//! SQLite cursor repository: one `run_state` table, replaced per save in a transaction.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, params};

use crate::core::errors::{Result, ShrError};
use crate::state::store::CursorRepository;

pub struct SqliteCursorRepository {
    conn: Connection,
    path: PathBuf,
}

impl SqliteCursorRepository {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ShrError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;
             PRAGMA busy_timeout = 5000;
             CREATE TABLE IF NOT EXISTS run_state (
                 key TEXT PRIMARY KEY NOT NULL,
                 value TEXT NOT NULL
             );",
        )?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }
}

impl CursorRepository for SqliteCursorRepository {
    fn load(&self) -> Result<BTreeMap<String, String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT key, value FROM run_state")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<BTreeMap<_, _>, _>>()?;
        Ok(rows)
    }

    fn save(&mut self, entries: &BTreeMap<String, String>) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM run_state", [])?;
        {
            let mut insert =
                tx.prepare_cached("INSERT INTO run_state (key, value) VALUES (?1, ?2)")?;
            for (key, value) in entries {
                insert.execute(params![key, value])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn delete(&mut self) -> Result<()> {
        self.conn.execute("DELETE FROM run_state", [])?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }
}
