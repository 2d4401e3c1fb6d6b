use super::{HistoryStore, StoreError};
use crate::shared::Timestamp;
use crate::status::update::{StepUpdate, TaskState};
use rusqlite::{params, Connection, Transaction};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type RawRow = (String, String, String, f64, Option<String>, Option<String>);

/// SQLite-backed durable store. Each call opens its own connection so the
/// store can be shared freely between threads.
#[derive(Debug, Clone)]
pub struct SqliteHistoryStore {
    db_path: PathBuf,
}

impl SqliteHistoryStore {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::CreateParent {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let connection = Connection::open(&self.db_path).map_err(|source| StoreError::Open {
            path: self.db_path.display().to_string(),
            source,
        })?;
        connection
            .busy_timeout(BUSY_TIMEOUT)
            .map_err(|source| StoreError::Sql { source })?;
        Ok(connection)
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        self.connect()?
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS step_updates (
                    instance_id TEXT NOT NULL,
                    position INTEGER NOT NULL,
                    task TEXT NOT NULL,
                    timestamp TEXT NOT NULL,
                    timestamp_ms INTEGER NOT NULL,
                    state TEXT NOT NULL,
                    progress REAL NOT NULL,
                    details TEXT,
                    error TEXT,
                    PRIMARY KEY (instance_id, position)
                );

                CREATE INDEX IF NOT EXISTS idx_step_updates_instance_time
                    ON step_updates(instance_id, timestamp_ms);
                ",
            )
            .map_err(|source| StoreError::Sql { source })
    }

    /// Every instance id with at least one stored update.
    pub fn instance_ids(&self) -> Result<Vec<String>, StoreError> {
        let connection = self.connect()?;
        let mut statement = connection
            .prepare("SELECT DISTINCT instance_id FROM step_updates ORDER BY instance_id")
            .map_err(|source| StoreError::Sql { source })?;
        let rows = statement
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|source| StoreError::Sql { source })?;
        let ids = rows
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| StoreError::Sql { source })?;
        Ok(ids)
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn find_all(&self, instance_id: &str) -> Result<Vec<StepUpdate>, StoreError> {
        let connection = self.connect()?;
        let mut statement = connection
            .prepare(
                "
                SELECT task, timestamp, state, progress, details, error
                FROM step_updates
                WHERE instance_id = ?1
                ORDER BY position ASC
                ",
            )
            .map_err(|source| StoreError::Sql { source })?;
        let rows = statement
            .query_map(params![instance_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })
            .map_err(|source| StoreError::Sql { source })?;

        let mut updates = Vec::new();
        for row in rows {
            let raw = row.map_err(|source| StoreError::Sql { source })?;
            updates.push(update_from_row(instance_id, raw)?);
        }
        Ok(updates)
    }

    fn delete_all(&self, instance_id: &str) -> Result<usize, StoreError> {
        self.connect()?
            .execute(
                "DELETE FROM step_updates WHERE instance_id = ?1",
                params![instance_id],
            )
            .map_err(|source| StoreError::Sql { source })
    }

    fn insert_batch(&self, instance_id: &str, updates: &[StepUpdate]) -> Result<(), StoreError> {
        let mut connection = self.connect()?;
        let tx = connection
            .transaction()
            .map_err(|source| StoreError::Sql { source })?;
        insert_rows(&tx, instance_id, updates)?;
        tx.commit().map_err(|source| StoreError::Sql { source })
    }

    fn replace_all(&self, instance_id: &str, updates: &[StepUpdate]) -> Result<(), StoreError> {
        let mut connection = self.connect()?;
        let tx = connection
            .transaction()
            .map_err(|source| StoreError::Sql { source })?;
        tx.execute(
            "DELETE FROM step_updates WHERE instance_id = ?1",
            params![instance_id],
        )
        .map_err(|source| StoreError::Sql { source })?;
        insert_rows(&tx, instance_id, updates)?;
        tx.commit().map_err(|source| StoreError::Sql { source })
    }
}

fn insert_rows(
    tx: &Transaction<'_>,
    instance_id: &str,
    updates: &[StepUpdate],
) -> Result<(), StoreError> {
    let base: i64 = tx
        .query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM step_updates WHERE instance_id = ?1",
            params![instance_id],
            |row| row.get(0),
        )
        .map_err(|source| StoreError::Sql { source })?;

    let mut statement = tx
        .prepare(
            "
            INSERT INTO step_updates (
                instance_id, position, task, timestamp, timestamp_ms,
                state, progress, details, error
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ",
        )
        .map_err(|source| StoreError::Sql { source })?;

    for (offset, update) in updates.iter().enumerate() {
        let details = update
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| StoreError::InvalidRow {
                instance_id: instance_id.to_string(),
                reason: format!("details are not encodable: {err}"),
            })?;
        statement
            .execute(params![
                instance_id,
                base + offset as i64,
                update.task_name,
                update.timestamp.to_iso(),
                update.timestamp.as_millis(),
                update.state.as_str(),
                update.progress,
                details,
                update.error,
            ])
            .map_err(|source| StoreError::Sql { source })?;
    }
    Ok(())
}

fn update_from_row(instance_id: &str, raw: RawRow) -> Result<StepUpdate, StoreError> {
    let (task_name, timestamp, state, progress, details, error) = raw;
    let invalid = |reason: String| StoreError::InvalidRow {
        instance_id: instance_id.to_string(),
        reason,
    };

    let timestamp = Timestamp::parse(&timestamp).map_err(invalid)?;
    let state = state
        .parse::<TaskState>()
        .map_err(|err| invalid(err.to_string()))?;
    let details = details
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|err| invalid(format!("details are not valid json: {err}")))?;

    Ok(StepUpdate {
        timestamp,
        task_name,
        state,
        progress,
        details,
        error,
    })
}
