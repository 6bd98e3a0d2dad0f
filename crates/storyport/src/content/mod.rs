//! Content records produced by an import, and the store they go into.

pub mod title;

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::db::content_repo::{self, ContentRow};
use crate::db::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::job::{JobId, OwnerId};

pub use title::TitleResolver;

pub const DRAFT_STATUS: &str = "draft";

pub const EXCERPT_MAX_CHARS: usize = 200;
const EXCERPT_ELLIPSIS: &str = "...";
/// A word boundary before this many characters is too early to cut at.
const EXCERPT_MIN_CUT: usize = 150;
const WORDS_PER_MINUTE: usize = 200;

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static SLUG_STRIP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\p{Alphabetic}\p{Nd}\s-]").unwrap());
static SLUG_DASH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s-]+").unwrap());

/// A record about to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewContentRecord {
    pub owner_id: OwnerId,
    pub title: String,
    pub slug: String,
    pub body: String,
    pub excerpt: String,
    pub read_time_minutes: u32,
    pub import_job_id: Option<JobId>,
    pub created_at: DateTime<Utc>,
}

impl NewContentRecord {
    /// A draft with slug, excerpt and read time derived from the inputs.
    pub fn draft(
        owner_id: OwnerId,
        title: String,
        body: String,
        import_job_id: Option<JobId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            owner_id,
            slug: slugify(&title),
            excerpt: excerpt(&body),
            read_time_minutes: read_time_minutes(&body),
            title,
            body,
            import_job_id,
            created_at,
        }
    }
}

/// A persisted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRecord {
    pub id: i64,
    pub owner_id: OwnerId,
    pub title: String,
    pub slug: String,
    pub body: String,
    pub excerpt: String,
    pub read_time_minutes: u32,
    pub status: String,
    pub import_job_id: Option<JobId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ContentRow> for ContentRecord {
    type Error = DatabaseError;

    fn try_from(row: ContentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            owner_id: row.owner_id,
            title: row.title,
            slug: row.slug,
            body: row.body,
            excerpt: row.excerpt,
            read_time_minutes: u32::try_from(row.read_time_minutes).unwrap_or(u32::MAX),
            status: row.status,
            import_job_id: row.import_job_id,
            created_at: parse_timestamp("content_records", &row.created_at)?,
            updated_at: parse_timestamp("content_records", &row.updated_at)?,
        })
    }
}

/// Where imported records are written.
pub trait ContentStore: Send + Sync {
    fn create(&self, record: &NewContentRecord) -> Result<i64, DatabaseError>;
    fn exists_by_title_and_owner(&self, title: &str, owner_id: OwnerId) -> Result<bool, DatabaseError>;
}

/// `ContentStore` over the `content_records` table.
#[derive(Clone)]
pub struct SqliteContentStore {
    db: Database,
}

impl SqliteContentStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn find_by_id(&self, id: i64) -> Result<Option<ContentRecord>, DatabaseError> {
        content_repo::find_by_id(&self.db, id)?
            .map(ContentRecord::try_from)
            .transpose()
    }

    pub fn list_for_owner(&self, owner_id: OwnerId) -> Result<Vec<ContentRecord>, DatabaseError> {
        content_repo::find_all_by_owner(&self.db, owner_id)?
            .into_iter()
            .map(ContentRecord::try_from)
            .collect()
    }
}

impl ContentStore for SqliteContentStore {
    fn create(&self, record: &NewContentRecord) -> Result<i64, DatabaseError> {
        let now = format_timestamp(&record.created_at);
        let row = ContentRow {
            id: 0,
            owner_id: record.owner_id,
            title: record.title.clone(),
            slug: record.slug.clone(),
            body: record.body.clone(),
            excerpt: record.excerpt.clone(),
            read_time_minutes: i64::from(record.read_time_minutes),
            status: DRAFT_STATUS.to_string(),
            import_job_id: record.import_job_id,
            created_at: now.clone(),
            updated_at: now,
        };
        content_repo::insert(&self.db, &row)
    }

    fn exists_by_title_and_owner(&self, title: &str, owner_id: OwnerId) -> Result<bool, DatabaseError> {
        content_repo::exists_by_title_and_owner(&self.db, title, owner_id)
    }
}

/// Collapses runs of whitespace to single spaces and trims.
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RE.replace_all(text.trim(), " ").into_owned()
}

/// Short preview of a body: at most 200 characters, ellipsis included.
///
/// Cuts at the last space when that keeps more than 150 characters,
/// otherwise mid-word.
pub fn excerpt(body: &str) -> String {
    let flat = collapse_whitespace(body);
    if flat.is_empty() {
        return "No content available".to_string();
    }
    if flat.chars().count() <= EXCERPT_MAX_CHARS {
        return flat;
    }

    let budget = EXCERPT_MAX_CHARS - EXCERPT_ELLIPSIS.len();
    let head: String = flat.chars().take(budget).collect();

    let cut = match head.rfind(' ') {
        Some(pos) if head[..pos].chars().count() > EXCERPT_MIN_CUT => &head[..pos],
        _ => head.as_str(),
    };

    format!("{}{}", cut.trim_end(), EXCERPT_ELLIPSIS)
}

/// URL-friendly form of a title.
pub fn slugify(title: &str) -> String {
    let lowered = title.to_lowercase();
    let stripped = SLUG_STRIP_RE.replace_all(&lowered, "");
    let dashed = SLUG_DASH_RE.replace_all(stripped.trim(), "-");
    let slug = dashed.trim_matches('-');
    if slug.is_empty() {
        "story".to_string()
    } else {
        slug.to_string()
    }
}

/// Minutes to read at 200 words per minute, never less than one.
pub fn read_time_minutes(body: &str) -> u32 {
    let words = body.split_whitespace().count();
    let minutes = words.div_ceil(WORDS_PER_MINUTE).max(1);
    u32::try_from(minutes).unwrap_or(u32::MAX)
}
