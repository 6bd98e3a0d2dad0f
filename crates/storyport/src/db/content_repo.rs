//! Content repository: CRUD for `content_records`.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw content row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentRow {
    pub id: i64,
    pub owner_id: i64,
    pub title: String,
    pub slug: String,
    pub body: String,
    pub excerpt: String,
    pub read_time_minutes: i64,
    pub status: String,
    pub import_job_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

impl ContentRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            title: row.get("title")?,
            slug: row.get("slug")?,
            body: row.get("body")?,
            excerpt: row.get("excerpt")?,
            read_time_minutes: row.get("read_time_minutes")?,
            status: row.get("status")?,
            import_job_id: row.get("import_job_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts a content row and returns its id. `row.id` is ignored.
pub fn insert(db: &Database, row: &ContentRow) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO content_records (owner_id, title, slug, body, excerpt,
             read_time_minutes, status, import_job_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                row.owner_id,
                row.title,
                row.slug,
                row.body,
                row.excerpt,
                row.read_time_minutes,
                row.status,
                row.import_job_id,
                row.created_at,
                row.updated_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

pub fn find_by_id(db: &Database, id: i64) -> Result<Option<ContentRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM content_records WHERE id = ?1",
                params![id],
                ContentRow::from_row,
            )
            .optional()?)
    })
}

pub fn exists_by_title_and_owner(
    db: &Database,
    title: &str,
    owner_id: i64,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM content_records WHERE owner_id = ?1 AND title = ?2)",
            params![owner_id, title],
            |r| r.get(0),
        )?;
        Ok(exists)
    })
}

/// All records for an owner, oldest first.
pub fn find_all_by_owner(db: &Database, owner_id: i64) -> Result<Vec<ContentRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn
            .prepare("SELECT * FROM content_records WHERE owner_id = ?1 ORDER BY created_at, id")?;
        let rows = stmt
            .query_map(params![owner_id], ContentRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn count_by_import_job(db: &Database, job_id: i64) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM content_records WHERE import_job_id = ?1",
            params![job_id],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
