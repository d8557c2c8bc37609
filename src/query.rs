//! Filtering and ordering of document listings.
//!
//! The same filter and sort definitions drive the SQL issued by the store and
//! the in-memory helpers used when a caller already holds a listing.

use crate::error::{Error, Result};
use crate::models::{Collection, DocumentMeta};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite};
use std::cmp::Ordering;
use std::str::FromStr;

/// Which documents a listing covers, by collection membership
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "id")]
pub enum CollectionFilter {
    #[default]
    All,
    Uncategorized,
    Collection(String),
}

impl CollectionFilter {
    pub fn matches(&self, doc: &DocumentMeta) -> bool {
        match self {
            CollectionFilter::All => true,
            CollectionFilter::Uncategorized => doc.collection_id.is_none(),
            CollectionFilter::Collection(id) => doc.collection_id.as_deref() == Some(id.as_str()),
        }
    }
}

/// Listing order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Most recently added first
    #[default]
    Added,
    /// Oldest first
    Oldest,
    /// Most recently opened first; never-opened documents last
    Recent,
    /// By name, case folded
    Name,
    /// Furthest read (position / total) first
    Progress,
}

impl std::fmt::Display for SortOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SortOrder::Added => write!(f, "added"),
            SortOrder::Oldest => write!(f, "oldest"),
            SortOrder::Recent => write!(f, "recent"),
            SortOrder::Name => write!(f, "name"),
            SortOrder::Progress => write!(f, "progress"),
        }
    }
}

impl FromStr for SortOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "added" | "newest" => Ok(SortOrder::Added),
            "oldest" => Ok(SortOrder::Oldest),
            "recent" => Ok(SortOrder::Recent),
            "name" => Ok(SortOrder::Name),
            "progress" => Ok(SortOrder::Progress),
            _ => Err(Error::Validation(format!("Unknown sort order: {}", s))),
        }
    }
}

impl SortOrder {
    /// `ORDER BY` body. Every order ends on a unique key so results are stable.
    pub fn sql(&self) -> &'static str {
        match self {
            SortOrder::Added => "added_at DESC, id DESC",
            SortOrder::Oldest => "added_at ASC, id ASC",
            SortOrder::Recent => "last_opened_at DESC, added_at DESC, id DESC",
            SortOrder::Name => "name_folded ASC, added_at DESC, id DESC",
            SortOrder::Progress => {
                "CASE WHEN total_units > 0 THEN CAST(current_position AS REAL) / total_units ELSE 0 END DESC, added_at DESC, id DESC"
            }
        }
    }

    /// In-memory equivalent of [`SortOrder::sql`]
    pub fn compare(&self, a: &DocumentMeta, b: &DocumentMeta) -> Ordering {
        let newest = || b.added_at.cmp(&a.added_at).then_with(|| b.id.cmp(&a.id));
        match self {
            SortOrder::Added => newest(),
            SortOrder::Oldest => a.added_at.cmp(&b.added_at).then_with(|| a.id.cmp(&b.id)),
            // Option orders None first, so reversing puts never-opened last.
            SortOrder::Recent => b.last_opened_at.cmp(&a.last_opened_at).then_with(newest),
            SortOrder::Name => fold_name(&a.name)
                .cmp(&fold_name(&b.name))
                .then_with(newest),
            SortOrder::Progress => progress_ratio(b)
                .partial_cmp(&progress_ratio(a))
                .unwrap_or(Ordering::Equal)
                .then_with(newest),
        }
    }
}

/// A metadata listing request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentQuery {
    pub collection: CollectionFilter,
    /// Case-insensitive substring of the name
    pub search: Option<String>,
    pub sort: SortOrder,
    /// Only documents that have been opened at least once
    pub opened_only: bool,
    pub limit: Option<usize>,
}

impl DocumentQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_collection(mut self, filter: CollectionFilter) -> Self {
        self.collection = filter;
        self
    }

    pub fn search(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.search = if text.trim().is_empty() {
            None
        } else {
            Some(text.trim().to_string())
        };
        self
    }

    pub fn sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    pub fn opened_only(mut self) -> Self {
        self.opened_only = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, doc: &DocumentMeta) -> bool {
        if !self.collection.matches(doc) {
            return false;
        }
        if self.opened_only && doc.last_opened_at.is_none() {
            return false;
        }
        match &self.search {
            Some(text) => fold_name(&doc.name).contains(&fold_name(text)),
            None => true,
        }
    }

    /// Filter, sort and truncate an in-memory listing
    pub fn apply(&self, docs: &[DocumentMeta]) -> Vec<DocumentMeta> {
        let mut out: Vec<DocumentMeta> = docs.iter().filter(|d| self.matches(d)).cloned().collect();
        out.sort_by(|a, b| self.sort.compare(a, b));
        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }

    /// Append `WHERE`, `ORDER BY` and `LIMIT` clauses to a metadata select
    pub fn push_sql(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        let mut sep = " WHERE ";
        match &self.collection {
            CollectionFilter::All => {}
            CollectionFilter::Uncategorized => {
                qb.push(sep).push("collection_id IS NULL");
                sep = " AND ";
            }
            CollectionFilter::Collection(id) => {
                qb.push(sep).push("collection_id = ").push_bind(id.clone());
                sep = " AND ";
            }
        }
        if self.opened_only {
            qb.push(sep).push("last_opened_at IS NOT NULL");
            sep = " AND ";
        }
        if let Some(text) = &self.search {
            qb.push(sep)
                .push("name_folded LIKE ")
                .push_bind(format!("%{}%", escape_like(&fold_name(text))))
                .push(" ESCAPE '\\'");
        }
        qb.push(" ORDER BY ").push(self.sort.sql());
        if let Some(limit) = self.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }
    }
}

/// Case-folded form of a document name, stored as `documents.name_folded`.
///
/// SQLite's `NOCASE` and `LIKE` only fold ASCII, so search and name ordering
/// compare this column instead. Byte order of the folded UTF-8 matches
/// `str` ordering.
pub fn fold_name(name: &str) -> String {
    name.to_lowercase()
}

fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn progress_ratio(doc: &DocumentMeta) -> f64 {
    if doc.total_units == 0 {
        0.0
    } else {
        doc.current_position as f64 / doc.total_units as f64
    }
}

/// Reading progress as a whole percentage; 0 until the total is known
pub fn progress_percent(doc: &DocumentMeta) -> u8 {
    (progress_ratio(doc) * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Resolve a document's collection for display.
///
/// A `collection_id` naming a collection that no longer exists (an interrupted
/// delete) resolves to `None`, the same as uncategorized.
pub fn effective_collection<'a>(
    doc: &DocumentMeta,
    collections: &'a [Collection],
) -> Option<&'a Collection> {
    let id = doc.collection_id.as_deref()?;
    collections.iter().find(|c| c.id == id)
}

/// Clamp a requested position to `[1, total]`, or to `>= 1` while the total is unknown
pub fn clamp_position(position: u32, total_units: u32) -> u32 {
    let position = position.max(1);
    if total_units > 0 {
        position.min(total_units)
    } else {
        position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: &str, name: &str, collection: Option<&str>, added_at: i64) -> DocumentMeta {
        DocumentMeta {
            id: id.to_string(),
            name: name.to_string(),
            collection_id: collection.map(str::to_string),
            added_at,
            last_opened_at: None,
            current_position: 1,
            total_units: 0,
            size_bytes: 10,
        }
    }

    fn sample() -> Vec<DocumentMeta> {
        vec![
            meta("a", "Zebra notes", Some("c1"), 100),
            meta("b", "alpha paper", Some("c2"), 300),
            meta("c", "Beta manual", None, 200),
            meta("d", "gamma", Some("c1"), 400),
            meta("e", "delta", None, 50),
        ]
    }

    fn ids(docs: &[DocumentMeta]) -> Vec<&str> {
        docs.iter().map(|d| d.id.as_str()).collect()
    }

    #[test]
    fn test_collection_filter_exact() {
        let docs = sample();
        let c1 = DocumentQuery::new()
            .in_collection(CollectionFilter::Collection("c1".into()))
            .sort(SortOrder::Oldest)
            .apply(&docs);
        assert_eq!(ids(&c1), vec!["a", "d"]);

        let none = DocumentQuery::new()
            .in_collection(CollectionFilter::Uncategorized)
            .sort(SortOrder::Oldest)
            .apply(&docs);
        assert_eq!(ids(&none), vec!["e", "c"]);

        let all = DocumentQuery::new().apply(&docs);
        assert_eq!(all.len(), docs.len());
    }

    #[test]
    fn test_default_order_newest_first() {
        let docs = DocumentQuery::new().apply(&sample());
        assert_eq!(ids(&docs), vec!["d", "b", "c", "a", "e"]);
    }

    #[test]
    fn test_name_sort_is_case_insensitive() {
        let docs = DocumentQuery::new().sort(SortOrder::Name).apply(&sample());
        assert_eq!(ids(&docs), vec!["b", "c", "e", "d", "a"]);
    }

    #[test]
    fn test_recent_puts_unopened_last() {
        let mut docs = sample();
        docs[0].last_opened_at = Some(1_000);
        docs[2].last_opened_at = Some(2_000);
        let sorted = DocumentQuery::new().sort(SortOrder::Recent).apply(&docs);
        assert_eq!(&ids(&sorted)[..2], &["c", "a"]);

        let opened = DocumentQuery::new().opened_only().apply(&docs);
        assert_eq!(opened.len(), 2);
    }

    #[test]
    fn test_search_and_limit() {
        let docs = DocumentQuery::new().search("  A ").limit(2).apply(&sample());
        assert_eq!(ids(&docs), vec!["d", "b"]);
    }

    #[test]
    fn test_sort_order_parse() {
        assert_eq!("Recent".parse::<SortOrder>().unwrap(), SortOrder::Recent);
        assert_eq!("newest".parse::<SortOrder>().unwrap(), SortOrder::Added);
        assert!("random".parse::<SortOrder>().is_err());
    }

    #[test]
    fn test_progress_percent() {
        let mut doc = meta("a", "a", None, 0);
        assert_eq!(progress_percent(&doc), 0);
        doc.total_units = 8;
        doc.current_position = 2;
        assert_eq!(progress_percent(&doc), 25);
        doc.current_position = 20;
        assert_eq!(progress_percent(&doc), 100);
    }

    #[test]
    fn test_dangling_collection_reads_as_uncategorized() {
        let collections = vec![Collection {
            id: "c1".into(),
            name: "Papers".into(),
            created_at: 0,
        }];
        let docs = sample();
        assert_eq!(
            effective_collection(&docs[0], &collections).map(|c| c.name.as_str()),
            Some("Papers")
        );
        assert!(effective_collection(&docs[1], &collections).is_none());
        assert!(effective_collection(&docs[2], &collections).is_none());
    }

    #[test]
    fn test_clamp_position() {
        assert_eq!(clamp_position(0, 0), 1);
        assert_eq!(clamp_position(40, 0), 40);
        assert_eq!(clamp_position(40, 12), 12);
        assert_eq!(clamp_position(5, 12), 5);
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }
}
