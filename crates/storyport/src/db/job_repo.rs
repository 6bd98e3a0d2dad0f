//! Job repository: reads and status-guarded writes for `import_jobs`.

use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: i64,
    pub owner_id: i64,
    pub status: String,
    pub total_documents: i64,
    pub processed_documents: i64,
    pub successful_imports: i64,
    pub failed_imports: i64,
    pub error_message: Option<String>,
    /// JSON array of per-document messages.
    pub errors: String,
    pub uploaded_filename: String,
    pub file_size: i64,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            status: row.get("status")?,
            total_documents: row.get("total_documents")?,
            processed_documents: row.get("processed_documents")?,
            successful_imports: row.get("successful_imports")?,
            failed_imports: row.get("failed_imports")?,
            error_message: row.get("error_message")?,
            errors: row.get("errors")?,
            uploaded_filename: row.get("uploaded_filename")?,
            file_size: row.get("file_size")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

/// Fields for a new job. The row id is assigned by SQLite.
#[derive(Debug, Clone)]
pub struct NewJobRow {
    pub owner_id: i64,
    pub total_documents: i64,
    pub uploaded_filename: String,
    pub file_size: i64,
    pub created_at: String,
}

/// Outcome of [`insert_if_no_active`].
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(JobRow),
    /// The owner already has this pending or running job.
    OwnerBusy(i64),
}

/// Counter snapshot written alongside a status change or checkpoint.
#[derive(Debug, Clone, Copy)]
pub struct CounterUpdate<'a> {
    pub processed_documents: i64,
    pub successful_imports: i64,
    pub failed_imports: i64,
    pub errors_json: &'a str,
}

/// A write that only applies while the row is in one of `expected` statuses.
#[derive(Debug, Clone, Copy)]
pub struct GuardedUpdate<'a> {
    pub expected: &'a [&'a str],
    pub owner_id: Option<i64>,
    pub status: Option<&'a str>,
    pub updated_at: &'a str,
    pub started_at: Option<&'a str>,
    pub completed_at: Option<&'a str>,
    pub error_message: Option<&'a str>,
    pub counters: Option<CounterUpdate<'a>>,
}

impl<'a> GuardedUpdate<'a> {
    pub fn new(expected: &'a [&'a str], updated_at: &'a str) -> Self {
        Self {
            expected,
            owner_id: None,
            status: None,
            updated_at,
            started_at: None,
            completed_at: None,
            error_message: None,
            counters: None,
        }
    }
}

const SELECT_ACTIVE_FOR_OWNER: &str =
    "SELECT * FROM import_jobs WHERE owner_id = ?1 AND status IN ('pending', 'running') LIMIT 1";

/// Inserts a pending job unless the owner already has an active one.
///
/// The check and the insert share one lock on the connection. The partial
/// unique index catches writers outside this process.
pub fn insert_if_no_active(db: &Database, job: &NewJobRow) -> Result<InsertOutcome, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;

        let active = tx
            .query_row(SELECT_ACTIVE_FOR_OWNER, params![job.owner_id], JobRow::from_row)
            .optional()?;
        if let Some(active) = active {
            return Ok(InsertOutcome::OwnerBusy(active.id));
        }

        tx.execute(
            "INSERT INTO import_jobs (owner_id, status, total_documents, uploaded_filename,
             file_size, created_at, updated_at)
             VALUES (?1, 'pending', ?2, ?3, ?4, ?5, ?5)",
            params![
                job.owner_id,
                job.total_documents,
                job.uploaded_filename,
                job.file_size,
                job.created_at,
            ],
        )?;
        let id = tx.last_insert_rowid();
        let row = select_by_id(&tx, id)?.ok_or_else(|| DatabaseError::CorruptRow {
            table: "import_jobs",
            reason: format!("row {} vanished after insert", id),
        })?;

        tx.commit()?;
        Ok(InsertOutcome::Inserted(row))
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| select_by_id(conn, id))
}

fn select_by_id(conn: &Connection, id: i64) -> Result<Option<JobRow>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM import_jobs WHERE id = ?1",
            params![id],
            JobRow::from_row,
        )
        .optional()?)
}

/// The owner's pending or running job, if any.
pub fn find_active_by_owner(db: &Database, owner_id: i64) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(SELECT_ACTIVE_FOR_OWNER, params![owner_id], JobRow::from_row)
            .optional()?)
    })
}

/// All of an owner's jobs, newest first.
pub fn find_all_by_owner(db: &Database, owner_id: i64) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM import_jobs WHERE owner_id = ?1 ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt
            .query_map(params![owner_id], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Every pending or running job, oldest first.
pub fn find_all_active(db: &Database) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM import_jobs WHERE status IN ('pending', 'running') ORDER BY created_at, id",
        )?;
        let rows = stmt
            .query_map([], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Applies `update` to job `id` if its status is still one of
/// `update.expected`. Returns whether a row changed.
pub fn update_guarded(db: &Database, id: i64, update: &GuardedUpdate<'_>) -> Result<bool, DatabaseError> {
    if update.expected.is_empty() {
        return Ok(false);
    }

    let mut assignments = vec!["updated_at = ?1".to_string()];
    let mut values: Vec<Box<dyn ToSql>> = vec![Box::new(update.updated_at.to_string())];

    let mut push = |column: &str, value: Box<dyn ToSql>| {
        values.push(value);
        assignments.push(format!("{} = ?{}", column, values.len()));
    };

    if let Some(status) = update.status {
        push("status", Box::new(status.to_string()));
    }
    if let Some(started_at) = update.started_at {
        push("started_at", Box::new(started_at.to_string()));
    }
    if let Some(completed_at) = update.completed_at {
        push("completed_at", Box::new(completed_at.to_string()));
    }
    if let Some(error_message) = update.error_message {
        push("error_message", Box::new(error_message.to_string()));
    }
    if let Some(counters) = update.counters {
        push("processed_documents", Box::new(counters.processed_documents));
        push("successful_imports", Box::new(counters.successful_imports));
        push("failed_imports", Box::new(counters.failed_imports));
        push("errors", Box::new(counters.errors_json.to_string()));
    }

    values.push(Box::new(id));
    let mut conditions = vec![format!("id = ?{}", values.len())];

    let mut placeholders = Vec::with_capacity(update.expected.len());
    for status in update.expected {
        values.push(Box::new(status.to_string()));
        placeholders.push(format!("?{}", values.len()));
    }
    conditions.push(format!("status IN ({})", placeholders.join(", ")));

    if let Some(owner_id) = update.owner_id {
        values.push(Box::new(owner_id));
        conditions.push(format!("owner_id = ?{}", values.len()));
    }

    let sql = format!(
        "UPDATE import_jobs SET {} WHERE {}",
        assignments.join(", "),
        conditions.join(" AND ")
    );

    db.with_conn(|conn| {
        let params_ref: Vec<&dyn ToSql> = values.iter().map(|p| p.as_ref()).collect();
        let changed = conn.execute(&sql, params_ref.as_slice())?;
        Ok(changed == 1)
    })
}
