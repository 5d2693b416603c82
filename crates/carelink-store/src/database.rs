// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through tokio-rusqlite's single background
//! thread; the session store's atomic read-modify-write relies on that
//! serialization. Do NOT create additional Connection instances for writes.

use carelink_core::CarelinkError;
use tracing::debug;

/// Handle to the single SQLite connection.
#[derive(Clone)]
pub struct Database {
    conn: tokio_rusqlite::Connection,
}

impl Database {
    /// Opens (or creates) the database at `path`, applies PRAGMAs, and runs
    /// pending migrations.
    pub async fn open(path: &str) -> Result<Self, CarelinkError> {
        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(sql_err)?;
        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
            )
            .map_err(sql_err)?;
            crate::migrations::run_migrations(conn).map_err(|e| CarelinkError::Storage {
                source: Box::new(e),
            })?;
            Ok(())
        })
        .await
        .map_err(map_call_err)?;
        debug!(path, "sqlite database opened");
        Ok(Self { conn })
    }

    /// The underlying tokio-rusqlite connection.
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Checkpoints the WAL, flushing pending writes before shutdown.
    pub async fn close(&self) -> Result<(), CarelinkError> {
        self.conn
            .call(|conn| {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!("WAL checkpoint complete");
        Ok(())
    }
}

/// Maps a connection-thread error from a plain-SQL closure.
pub fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> CarelinkError {
    CarelinkError::Storage {
        source: Box::new(e),
    }
}

/// Maps a connection-thread error from a domain-typed closure.
///
/// `Error::Error` carries the closure's own error out unchanged; the
/// transport variants become storage errors.
pub fn map_call_err(e: tokio_rusqlite::Error<CarelinkError>) -> CarelinkError {
    match e {
        tokio_rusqlite::Error::Error(domain) => domain,
        other => CarelinkError::Storage {
            source: Box::new(other),
        },
    }
}

/// Wraps a bare rusqlite error inside a domain-typed closure.
pub fn sql_err(e: rusqlite::Error) -> CarelinkError {
    CarelinkError::Storage {
        source: Box::new(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_runs_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Database::open(path.to_str().unwrap()).await.unwrap();

        // All three tables exist after migration.
        let count: i64 = db
            .connection()
            .call(|conn| {
                let n = conn.query_row(
                    "SELECT count(*) FROM sqlite_master
                     WHERE type = 'table' AND name IN ('sessions', 'patients', 'hospitals')",
                    [],
                    |row| row.get(0),
                )?;
                Ok::<_, rusqlite::Error>(n)
            })
            .await
            .unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn domain_errors_pass_through_unmapped() {
        let e = tokio_rusqlite::Error::Error(CarelinkError::NotFound {
            session_id: "s-9".into(),
        });
        match map_call_err(e) {
            CarelinkError::NotFound { session_id } => assert_eq!(session_id, "s-9"),
            other => panic!("expected NotFound, got {other}"),
        }
    }
}
