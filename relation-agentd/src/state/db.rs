use std::path::Path;
use anyhow::{Context, Result};
use rusqlite::{Connection, params, OptionalExtension};
use shared::types::{ProcessStatus, ReadinessState, ServiceStatus};
use chrono::Utc;

/// Durable per-service readiness, so one-time side effects are not repeated
/// across agent restarts.
pub struct StateDb {
    conn: Connection,
}

impl StateDb {
    /// Open or create the SQLite database with WAL mode enabled
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL mode")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS services (
                name        TEXT PRIMARY KEY,
                readiness   TEXT NOT NULL,
                process     TEXT NOT NULL,
                fingerprint TEXT,
                ports       TEXT NOT NULL,
                published   INTEGER NOT NULL DEFAULT 0,
                updated_at  TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create database schema")?;

        Ok(Self { conn })
    }

    /// Status of one service, or `None` if it has never been evaluated
    pub fn get(&self, name: &str) -> Result<Option<ServiceStatus>> {
        let result = self
            .conn
            .query_row(
                "SELECT name, readiness, process, fingerprint, ports, published, updated_at
                 FROM services WHERE name = ?1",
                params![name],
                Self::row_to_status,
            )
            .optional()
            .context("Failed to query service state")?;

        Ok(result)
    }

    /// Status of one service, defaulting to pending
    pub fn get_or_pending(&self, name: &str) -> Result<ServiceStatus> {
        Ok(self.get(name)?.unwrap_or_else(|| ServiceStatus::pending(name)))
    }

    pub fn get_all(&self) -> Result<Vec<ServiceStatus>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name, readiness, process, fingerprint, ports, published, updated_at
                 FROM services ORDER BY name"
            )
            .context("Failed to prepare query")?;

        let services = stmt
            .query_map([], Self::row_to_status)
            .context("Failed to query services")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect services")?;

        Ok(services)
    }

    /// Insert or replace a service's status, stamping `updated_at`
    pub fn put(&self, status: &ServiceStatus) -> Result<()> {
        let ports_json = serde_json::to_string(&status.ports)
            .context("Failed to serialize ports")?;

        self.conn.execute(
            r#"
            INSERT INTO services (name, readiness, process, fingerprint, ports, published, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(name) DO UPDATE SET
                readiness = excluded.readiness,
                process = excluded.process,
                fingerprint = excluded.fingerprint,
                ports = excluded.ports,
                published = excluded.published,
                updated_at = excluded.updated_at
            "#,
            params![
                &status.name,
                status.readiness.as_str(),
                status.process.as_str(),
                &status.fingerprint,
                &ports_json,
                status.published as i32,
                Utc::now().to_rfc3339(),
            ],
        )
        .with_context(|| format!("Failed to store state for {}", status.name))?;

        Ok(())
    }

    fn row_to_status(row: &rusqlite::Row) -> Result<ServiceStatus, rusqlite::Error> {
        let readiness_str: String = row.get(1)?;
        let process_str: String = row.get(2)?;
        let ports_json: String = row.get(4)?;
        let published_int: i32 = row.get(5)?;
        let updated_at_str: String = row.get(6)?;

        let readiness = ReadinessState::parse(&readiness_str)
            .ok_or_else(|| invalid_text(1, format!("unknown readiness state: {}", readiness_str)))?;
        let process = ProcessStatus::parse(&process_str)
            .ok_or_else(|| invalid_text(2, format!("unknown process status: {}", process_str)))?;

        let ports = serde_json::from_str(&ports_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                Box::new(e),
            ))?;

        let updated_at = chrono::DateTime::parse_from_rfc3339(&updated_at_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(
                6,
                rusqlite::types::Type::Text,
                Box::new(e),
            ))?
            .with_timezone(&Utc);

        Ok(ServiceStatus {
            name: row.get(0)?,
            readiness,
            process,
            fingerprint: row.get(3)?,
            ports,
            published: published_int != 0,
            updated_at,
        })
    }
}

fn invalid_text(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        message.into(),
    )
}
