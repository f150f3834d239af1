use crate::error::Result;
use serde::Serialize;

/// Raw DOI record as returned by the DataCite REST API
pub type RawRecord = serde_json::Value;

/// Organization the harvester is matching against: a set of name patterns
/// (`*` acts as a glob-style wildcard) and a ROR identifier in either the
/// full URL form or the bare suffix form.
#[derive(Debug, Clone, Default)]
pub struct MatchContext {
    pub name_patterns: Vec<String>,
    pub ror: String,
}

impl MatchContext {
    pub fn new(name_patterns: Vec<String>, ror: impl Into<String>) -> Self {
        Self {
            name_patterns,
            ror: ror.into(),
        }
    }

    /// No query can be constructed for an empty context; query and count
    /// operations short-circuit to zero results.
    pub fn is_empty(&self) -> bool {
        self.name_patterns.is_empty() && self.ror.is_empty()
    }
}

/// Normalized research output shape shared across source registries.
/// Built once per raw record and not mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct ResearchOutputRecord {
    pub doi: String,
    pub datacite_client_id: String,
    pub resource_type: Option<String>,
    pub publisher: Option<String>,
    pub publication_year: Option<i64>,
    pub title: String,
    pub title_word_count: usize,
    pub in_datacite: bool,
    pub citation_count: Option<i64>,
    pub reference_count: Option<i64>,
    pub view_count: Option<i64>,
    pub download_count: Option<i64>,
    pub is_publisher: bool,
    pub referenced_by_doi: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub is_latest_version: bool,
    pub is_concept_doi: bool,
    pub have_creator_affiliation: bool,
    pub have_contributor_affiliation: bool,
}

/// Transport collaborator: performs one GET and returns the parsed JSON body.
/// Timeouts and retries live behind this boundary, not in the harvester.
#[async_trait::async_trait]
pub trait JsonFetcher: Send + Sync {
    async fn fetch_json(&self, url: &str) -> Result<serde_json::Value>;
}
