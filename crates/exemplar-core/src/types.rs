//! Domain types shared by the extractor, store and learner.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

pub type ChunkId = String;

/// Closed set of exemplar categories. Unknown labels normalize to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    SoftwareSpecification,
    ProjectProposal,
    PlanningDocument,
    TechnicalDocument,
    MeetingNotes,
    #[default]
    Other,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::SoftwareSpecification,
        Category::ProjectProposal,
        Category::PlanningDocument,
        Category::TechnicalDocument,
        Category::MeetingNotes,
        Category::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::SoftwareSpecification => "software_specification",
            Category::ProjectProposal => "project_proposal",
            Category::PlanningDocument => "planning_document",
            Category::TechnicalDocument => "technical_document",
            Category::MeetingNotes => "meeting_notes",
            Category::Other => "other",
        }
    }

    /// Case-insensitive; `-` and spaces are read as `_`.
    pub fn normalize(raw: &str) -> Self {
        let key: String = raw
            .trim()
            .chars()
            .map(|c| if c == '-' || c == ' ' { '_' } else { c.to_ascii_lowercase() })
            .collect();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == key)
            .unwrap_or(Category::Other)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Category::normalize(s))
    }
}

impl From<String> for Category {
    fn from(raw: String) -> Self {
        Category::normalize(&raw)
    }
}

impl From<Category> for String {
    fn from(c: Category) -> Self {
        c.as_str().to_string()
    }
}

/// Order-irrelevant set of free-form tags. Used for filtering only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tags(BTreeSet<String>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a comma separated list such as `"auth, backend ,auth"`.
    pub fn parse(raw: &str) -> Self {
        raw.split(',').collect()
    }

    /// Inserts a trimmed tag; blank tags are ignored.
    pub fn insert(&mut self, tag: impl AsRef<str>) -> bool {
        let tag = tag.as_ref().trim();
        if tag.is_empty() {
            return false;
        }
        self.0.insert(tag.to_string())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag.trim())
    }

    /// True when the two sets share at least one tag.
    pub fn intersects(&self, other: &Tags) -> bool {
        !self.0.is_disjoint(&other.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for Tags {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut tags = Tags::new();
        for tag in iter {
            tags.insert(tag);
        }
        tags
    }
}

impl fmt::Display for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.iter().collect();
        f.write_str(&joined.join(", "))
    }
}

/// A chunk of a source document together with its embedding.
///
/// - `id`: `"{source_id}:{sequence_index}"`, stable across re-ingestion
/// - `source_id`: upload filename or a generated content label
/// - `sequence_index`: position of the chunk within its source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: ChunkId,
    pub source_id: String,
    pub sequence_index: usize,
    pub text: String,
    pub category: Category,
    pub tags: Tags,
    pub embedding: Vec<f32>,
}

impl ChunkRecord {
    pub fn new(
        source_id: &str,
        sequence_index: usize,
        text: String,
        category: Category,
        tags: Tags,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            id: Self::chunk_id(source_id, sequence_index),
            source_id: source_id.to_string(),
            sequence_index,
            text,
            category,
            tags,
            embedding,
        }
    }

    pub fn chunk_id(source_id: &str, sequence_index: usize) -> ChunkId {
        format!("{}:{}", source_id, sequence_index)
    }
}

/// A ranked query result. `score` is cosine similarity; higher is better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub record: ChunkRecord,
    pub score: f32,
}

/// Metadata filters for a similarity query. All provided filters must match.
///
/// The tag filter matches records sharing at least one tag with it; an empty
/// tag set is treated as "no tag filter".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    pub category: Option<Category>,
    pub tags: Option<Tags>,
}

impl QueryFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn matches(&self, record: &ChunkRecord) -> bool {
        if let Some(category) = self.category {
            if record.category != category {
                return false;
            }
        }
        match &self.tags {
            Some(tags) if !tags.is_empty() => record.tags.intersects(tags),
            _ => true,
        }
    }
}

/// Read-only summary of the store contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub count: usize,
    pub categories: BTreeMap<Category, usize>,
    pub distinct_tags: BTreeSet<String>,
    pub dimension: Option<usize>,
}
