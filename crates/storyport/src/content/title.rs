//! Display titles for imported documents.

use chrono::{DateTime, Utc};

use crate::content::{collapse_whitespace, ContentStore};
use crate::db::DatabaseError;
use crate::job::OwnerId;

pub const DEFAULT_TITLE: &str = "Untitled Story";
pub const MAX_TITLE_CHARS: usize = 100;
const TRUNCATION_MARKER: &str = "...";

/// Derives titles from archive entry names and keeps them unique per owner.
#[derive(Debug, Clone, Copy, Default)]
pub struct TitleResolver;

impl TitleResolver {
    pub fn new() -> Self {
        Self
    }

    /// `"stories/my_first-story.docx"` becomes `"my first story"`.
    pub fn derive_title(&self, filename: &str) -> String {
        let leaf = filename.rsplit(['/', '\\']).next().unwrap_or(filename);

        let stem = match leaf.rfind('.') {
            Some(dot) if dot > 0 => &leaf[..dot],
            _ => leaf,
        };

        let spaced = stem.replace(['_', '-'], " ");
        let title = collapse_whitespace(&spaced);

        if title.is_empty() {
            return DEFAULT_TITLE.to_string();
        }

        if title.chars().count() > MAX_TITLE_CHARS {
            let keep = MAX_TITLE_CHARS - TRUNCATION_MARKER.len();
            let head: String = title.chars().take(keep).collect();
            return format!("{}{}", head.trim_end(), TRUNCATION_MARKER);
        }

        title
    }

    /// Derived title, suffixed with the import minute when the owner already
    /// has a record by that name. Only one lookup is made; a clash on the
    /// suffixed title is left for the store's uniqueness constraint.
    pub fn resolve(
        &self,
        store: &dyn ContentStore,
        owner_id: OwnerId,
        filename: &str,
        now: DateTime<Utc>,
    ) -> Result<String, DatabaseError> {
        let title = self.derive_title(filename);

        if store.exists_by_title_and_owner(&title, owner_id)? {
            return Ok(format!("{} (Imported {})", title, now.format("%Y-%m-%d %H:%M")));
        }

        Ok(title)
    }
}
