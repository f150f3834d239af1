use crate::constants::{DATACITE_DOIS_URL, DEFAULT_PAGE_SIZE};
use crate::error::{HarvestError, Result};
use crate::matching::{match_patterns, ror_suffix, word_count};
use crate::types::{JsonFetcher, MatchContext, RawRecord, ResearchOutputRecord};
use serde_json::Value;
use tracing::{debug, info, instrument};

/// Indexed fields searched for organization name patterns
const NAME_FIELDS: [&str; 3] = [
    "creators.affiliation.name",
    "contributors.affiliation.name",
    "publisher.name",
];

/// Indexed fields that can carry the organization's ROR identifier
const ROR_FIELDS: [&str; 6] = [
    "publisher.publisherIdentifier",
    "creators.affiliation.affiliationIdentifier",
    "contributors.affiliation.affiliationIdentifier",
    "creators.nameIdentifiers.nameIdentifier",
    "contributors.nameIdentifiers.nameIdentifier",
    "fundingReferences.funderIdentifier",
];

/// Relation types pointing at records that reference this one
const REFERENCED_BY_RELATIONS: [&str; 3] = ["IsReferencedBy", "IsSupplementTo", "IsSourceOf"];

/// DataCite REST API source: builds the organization query, walks the cursor
/// pagination and maps raw DOI records into the normalized output shape.
pub struct DataCiteApi {
    page_size: usize,
    context: MatchContext,
    fetcher: Box<dyn JsonFetcher>,
}

impl DataCiteApi {
    pub fn new(context: MatchContext, fetcher: Box<dyn JsonFetcher>) -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            context,
            fetcher,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Builds the query string for the configured organization. Returns an
    /// empty string for an empty context; callers must treat that as "no
    /// valid query, zero results".
    pub fn query_string(&self) -> String {
        if self.context.is_empty() {
            return String::new();
        }

        let mut parts: Vec<String> = Vec::new();

        if !self.context.name_patterns.is_empty() {
            // Unescaped whitespace is a token boundary in the DataCite query
            // syntax, so spaces inside wildcard patterns must be escaped.
            let wildcard = self
                .context
                .name_patterns
                .iter()
                .filter(|n| n.contains('*'))
                .map(|n| n.replace(' ', "\\ "))
                .collect::<Vec<_>>()
                .join(" OR ");
            let exact = self
                .context
                .name_patterns
                .iter()
                .filter(|n| !n.contains('*'))
                .map(|n| format!("\"{n}\""))
                .collect::<Vec<_>>()
                .join(" OR ");

            let conditions = if !wildcard.is_empty() && !exact.is_empty() {
                format!("{wildcard} OR {exact}")
            } else if !wildcard.is_empty() {
                wildcard
            } else {
                exact
            };

            parts.extend(NAME_FIELDS.iter().map(|field| format!("{field}:({conditions})")));
        }

        if !self.context.ror.is_empty() {
            parts.extend(
                ROR_FIELDS
                    .iter()
                    .map(|field| format!("{field}:\"{}\"", self.context.ror)),
            );
            // Some sources store the identifier without the https://ror.org/
            // prefix, so both forms are queried for every field.
            let suffix = ror_suffix(&self.context.ror);
            parts.extend(ROR_FIELDS.iter().map(|field| format!("{field}:\"{suffix}\"")));
        }

        parts.join(" OR ")
    }

    fn request_url(&self, page_size: usize) -> Result<String> {
        let url = reqwest::Url::parse_with_params(
            DATACITE_DOIS_URL,
            &[
                ("page[size]", page_size.to_string()),
                ("page[cursor]", "1".to_string()),
                ("affiliation", "true".to_string()),
                ("publisher", "true".to_string()),
                ("detail", "true".to_string()),
                ("disable-facets", "false".to_string()),
                ("query", self.query_string()),
            ],
        )
        .map_err(|e| HarvestError::Api {
            message: format!("Failed to build request URL: {e}"),
        })?;
        Ok(url.to_string())
    }

    async fn fetch_page(&self, url: &str) -> Result<Value> {
        self.fetcher
            .fetch_json(url)
            .await
            .map_err(|e| HarvestError::Query {
                source: Box::new(e),
            })
    }

    /// Fetches every matching raw record, following the server-provided
    /// `links.next` URL until no further page is offered.
    #[instrument(skip(self))]
    pub async fn all(&self) -> Result<Vec<RawRecord>> {
        if self.query_string().is_empty() {
            debug!("No name patterns or ROR identifier configured, skipping fetch");
            return Ok(Vec::new());
        }

        let mut result: Vec<RawRecord> = Vec::new();
        let mut url = self.request_url(self.page_size)?;
        loop {
            let response = self.fetch_page(&url).await?;
            if let Some(data) = response.get("data").and_then(Value::as_array) {
                result.extend(data.iter().cloned());
            }
            let total = response
                .pointer("/meta/total")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            info!("Retrieved DataCite {} of {}", result.len(), total);

            match response.pointer("/links/next").and_then(Value::as_str) {
                Some(next) => url = next.to_string(),
                None => break,
            }
        }
        Ok(result)
    }

    /// Total number of matching DOIs, from a single zero-page-size request.
    pub async fn count(&self) -> Result<u64> {
        if self.query_string().is_empty() {
            return Ok(0);
        }

        let url = self.request_url(0)?;
        let response = self.fetch_page(&url).await?;
        response
            .pointer("/meta/total")
            .and_then(Value::as_u64)
            .ok_or_else(|| HarvestError::MissingField("meta.total".into()))
    }

    /// Maps one raw DataCite record to the normalized output shape. Sparse
    /// optional metadata defaults silently; only the DOI, the client
    /// relationship and the first title are required.
    pub fn normalize(&self, item: &RawRecord) -> Result<ResearchOutputRecord> {
        let attributes = item.get("attributes").unwrap_or(&Value::Null);

        let doi = attributes
            .get("doi")
            .and_then(Value::as_str)
            .ok_or_else(|| HarvestError::MissingField("doi".into()))?
            .to_string();
        let datacite_client_id = item
            .pointer("/relationships/client/data/id")
            .and_then(Value::as_str)
            .ok_or_else(|| HarvestError::MissingField("relationships.client.data.id".into()))?
            .to_string();
        let title = attributes
            .pointer("/titles/0/title")
            .and_then(Value::as_str)
            .ok_or_else(|| HarvestError::MissingField("titles[0].title".into()))?
            .to_string();

        let types = attributes.get("types").unwrap_or(&Value::Null);
        let resource_type = ["resourceTypeGeneral", "citeproc", "bibtex"]
            .iter()
            .find_map(|key| {
                types
                    .get(key)
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            });

        let publisher_attr = attributes.get("publisher").unwrap_or(&Value::Null);
        let publisher = publisher_attr
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string);

        // Exact identifier compare at this site; only the agent matcher
        // performs prefix-normalized matching.
        let is_publisher = (!self.context.ror.is_empty()
            && publisher_attr.get("publisherIdentifier").and_then(Value::as_str)
                == Some(self.context.ror.as_str()))
            || match_patterns(publisher.as_deref(), &self.context.name_patterns);

        let related = attributes
            .get("relatedIdentifiers")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let referencing_dois: Vec<Value> = related
            .iter()
            .filter(|r| {
                r.get("relationType")
                    .and_then(Value::as_str)
                    .map(|t| REFERENCED_BY_RELATIONS.contains(&t))
                    .unwrap_or(false)
                    && r.get("relatedIdentifierType").and_then(Value::as_str) == Some("DOI")
            })
            .map(|r| r.get("relatedIdentifier").cloned().unwrap_or(Value::Null))
            .collect();
        let referenced_by_doi = if referencing_dois.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&referencing_dois)?)
        };

        let created_at = timestamp(attributes, "created");
        // ISO-8601 timestamps sort correctly as plain strings and "" sorts
        // lowest, so the max is taken lexicographically on purpose.
        let updated_at = [
            timestamp(attributes, "updated"),
            timestamp(attributes, "created"),
            timestamp(attributes, "registered"),
        ]
        .into_iter()
        .max()
        .unwrap_or_default();

        let is_latest_version = !related.iter().any(|r| {
            matches!(
                r.get("relationType").and_then(Value::as_str),
                Some("IsPreviousVersionOf") | Some("HasVersion")
            )
        });

        let version_count = count_field(attributes, "versionCount");
        let version_of_count = count_field(attributes, "versionOfCount");
        let is_concept_doi = version_count > 0 && version_of_count == 0;

        let have_creator_affiliation =
            self.agent_list_matches(attributes.get("creators").and_then(Value::as_array));
        let have_contributor_affiliation =
            self.agent_list_matches(attributes.get("contributors").and_then(Value::as_array));

        Ok(ResearchOutputRecord {
            doi,
            datacite_client_id,
            resource_type,
            publisher,
            publication_year: attributes.get("publicationYear").and_then(Value::as_i64),
            title_word_count: word_count(&title),
            title,
            in_datacite: true,
            citation_count: attributes.get("citationCount").and_then(Value::as_i64),
            reference_count: attributes.get("referenceCount").and_then(Value::as_i64),
            view_count: attributes.get("viewCount").and_then(Value::as_i64),
            download_count: attributes.get("downloadCount").and_then(Value::as_i64),
            is_publisher,
            referenced_by_doi,
            created_at,
            updated_at,
            is_latest_version,
            is_concept_doi,
            have_creator_affiliation,
            have_contributor_affiliation,
        })
    }

    /// True when any agent in the list is tied to the organization: a name
    /// identifier equal to the full or bare-suffix ROR form, a name matching
    /// one of the configured patterns, or a matching affiliation entry.
    fn agent_list_matches(&self, agents: Option<&Vec<Value>>) -> bool {
        let Some(agents) = agents else {
            return false;
        };
        let ror = self.context.ror.as_str();
        let suffix = ror_suffix(ror);

        for agent in agents {
            let name_identifiers = agent
                .get("nameIdentifiers")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            if !ror.is_empty()
                && name_identifiers.iter().any(|id| {
                    let value = id.get("nameIdentifier").and_then(Value::as_str);
                    value == Some(ror) || value == Some(suffix)
                })
            {
                return true;
            }

            if match_patterns(
                agent.get("name").and_then(Value::as_str),
                &self.context.name_patterns,
            ) {
                return true;
            }

            let affiliations = agent
                .get("affiliation")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            for affiliation in affiliations {
                if (!ror.is_empty()
                    && affiliation
                        .get("affiliationIdentifier")
                        .and_then(Value::as_str)
                        == Some(ror))
                    || match_patterns(
                        affiliation.get("name").and_then(Value::as_str),
                        &self.context.name_patterns,
                    )
                {
                    return true;
                }
            }
        }
        false
    }
}

fn timestamp(attributes: &Value, key: &str) -> String {
    attributes
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

/// Version counters arrive as numbers, numeric strings, null, or not at all;
/// everything unusable coerces to 0.
fn count_field(attributes: &Value, key: &str) -> i64 {
    match attributes.get(key) {
        Some(v) => v
            .as_i64()
            .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
            .unwrap_or(0),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarvestError;
    use serde_json::json;

    struct NullFetcher;

    #[async_trait::async_trait]
    impl JsonFetcher for NullFetcher {
        async fn fetch_json(&self, _url: &str) -> crate::error::Result<Value> {
            unreachable!("unit tests must not issue requests")
        }
    }

    fn api(name_patterns: Vec<&str>, ror: &str) -> DataCiteApi {
        let context = MatchContext::new(
            name_patterns.into_iter().map(String::from).collect(),
            ror,
        );
        DataCiteApi::new(context, Box::new(NullFetcher))
    }

    fn minimal_record() -> Value {
        json!({
            "attributes": {
                "doi": "10.1234/abcd",
                "titles": [{"title": "A short dataset title"}]
            },
            "relationships": {
                "client": {"data": {"id": "example.client"}}
            }
        })
    }

    #[test]
    fn empty_context_yields_empty_query() {
        assert_eq!(api(vec![], "").query_string(), "");
    }

    #[test]
    fn name_patterns_split_into_wildcard_and_exact_groups() {
        let query = api(vec!["Foo Bar", "Org*"], "").query_string();

        // Wildcard group first with escaped spaces, exact group quoted
        assert!(query.contains("creators.affiliation.name:(Org* OR \"Foo Bar\")"));
        assert!(query.contains("contributors.affiliation.name:(Org* OR \"Foo Bar\")"));
        assert!(query.contains("publisher.name:(Org* OR \"Foo Bar\")"));
        // One OR inside each of the three field clauses plus two joining them
        assert_eq!(query.matches(" OR ").count(), 5);
    }

    #[test]
    fn wildcard_patterns_escape_embedded_spaces() {
        let query = api(vec!["Example Univ*"], "").query_string();
        assert!(query.contains("publisher.name:(Example\\ Univ*)"));
    }

    #[test]
    fn ror_query_covers_full_and_suffix_forms() {
        let query = api(vec![], "https://ror.org/05wx9n238").query_string();

        for field in ROR_FIELDS {
            assert!(query.contains(&format!("{field}:\"https://ror.org/05wx9n238\"")));
            assert!(query.contains(&format!("{field}:\"05wx9n238\"")));
        }
    }

    #[test]
    fn name_clauses_precede_ror_clauses() {
        let query = api(vec!["Example Org"], "https://ror.org/05wx9n238").query_string();
        let name_pos = query.find("creators.affiliation.name").unwrap();
        let ror_pos = query.find("publisher.publisherIdentifier").unwrap();
        assert!(name_pos < ror_pos);
    }

    #[test]
    fn bare_suffix_ror_queries_the_same_value_twice() {
        let query = api(vec![], "05wx9n238").query_string();
        assert!(query.contains("publisher.publisherIdentifier:\"05wx9n238\""));
        assert!(!query.contains("https://ror.org/"));
    }

    #[test]
    fn request_url_encodes_paging_and_query() {
        let api = api(vec!["Example Org"], "").with_page_size(100);
        let url = api.request_url(100).unwrap();
        assert!(url.starts_with("https://api.datacite.org/dois?"));
        assert!(url.contains("page%5Bsize%5D=100"));
        assert!(url.contains("page%5Bcursor%5D=1"));
        assert!(url.contains("affiliation=true"));
        assert!(url.contains("disable-facets=false"));
        assert!(url.contains("query="));
    }

    #[test]
    fn normalize_minimal_record_defaults_optionals() {
        let record = api(vec![], "").normalize(&minimal_record()).unwrap();

        assert_eq!(record.doi, "10.1234/abcd");
        assert_eq!(record.datacite_client_id, "example.client");
        assert_eq!(record.title, "A short dataset title");
        assert_eq!(record.title_word_count, 4);
        assert!(record.in_datacite);
        assert_eq!(record.resource_type, None);
        assert_eq!(record.publisher, None);
        assert_eq!(record.publication_year, None);
        assert_eq!(record.citation_count, None);
        assert!(!record.is_publisher);
        assert_eq!(record.referenced_by_doi, None);
        assert_eq!(record.created_at, "");
        assert_eq!(record.updated_at, "");
        assert!(record.is_latest_version);
        assert!(!record.is_concept_doi);
        assert!(!record.have_creator_affiliation);
        assert!(!record.have_contributor_affiliation);
    }

    #[test]
    fn normalize_requires_doi_client_and_title() {
        let api = api(vec![], "");

        let no_doi = json!({
            "attributes": {"titles": [{"title": "t"}]},
            "relationships": {"client": {"data": {"id": "c"}}}
        });
        assert!(matches!(
            api.normalize(&no_doi),
            Err(HarvestError::MissingField(f)) if f == "doi"
        ));

        let no_client = json!({
            "attributes": {"doi": "10.1/x", "titles": [{"title": "t"}]}
        });
        assert!(matches!(
            api.normalize(&no_client),
            Err(HarvestError::MissingField(_))
        ));

        let no_title = json!({
            "attributes": {"doi": "10.1/x", "titles": []},
            "relationships": {"client": {"data": {"id": "c"}}}
        });
        assert!(matches!(
            api.normalize(&no_title),
            Err(HarvestError::MissingField(_))
        ));
    }

    #[test]
    fn resource_type_falls_back_through_alternate_type_fields() {
        let api = api(vec![], "");

        let mut record = minimal_record();
        record["attributes"]["types"] = json!({"resourceTypeGeneral": "Dataset"});
        assert_eq!(
            api.normalize(&record).unwrap().resource_type,
            Some("Dataset".to_string())
        );

        record["attributes"]["types"] = json!({"resourceTypeGeneral": "", "citeproc": "dataset"});
        assert_eq!(
            api.normalize(&record).unwrap().resource_type,
            Some("dataset".to_string())
        );

        record["attributes"]["types"] = json!({"citeproc": "", "bibtex": "misc"});
        assert_eq!(
            api.normalize(&record).unwrap().resource_type,
            Some("misc".to_string())
        );
    }

    #[test]
    fn is_publisher_matches_identifier_or_name_pattern() {
        let mut record = minimal_record();
        record["attributes"]["publisher"] = json!({
            "name": "Example University",
            "publisherIdentifier": "https://ror.org/05wx9n238"
        });

        assert!(api(vec![], "https://ror.org/05wx9n238")
            .normalize(&record)
            .unwrap()
            .is_publisher);
        assert!(api(vec!["Example Univ*"], "")
            .normalize(&record)
            .unwrap()
            .is_publisher);
        // Bare suffix does not match at the publisher site; no prefix
        // normalization happens there.
        assert!(!api(vec![], "05wx9n238").normalize(&record).unwrap().is_publisher);
        assert!(!api(vec!["Other Org"], "").normalize(&record).unwrap().is_publisher);
    }

    #[test]
    fn referenced_by_doi_keeps_only_doi_typed_reference_relations() {
        let mut record = minimal_record();
        record["attributes"]["relatedIdentifiers"] = json!([
            {"relationType": "IsReferencedBy", "relatedIdentifierType": "DOI", "relatedIdentifier": "10.1/ref"},
            {"relationType": "IsSupplementTo", "relatedIdentifierType": "DOI", "relatedIdentifier": "10.1/sup"},
            {"relationType": "IsSourceOf", "relatedIdentifierType": "URL", "relatedIdentifier": "https://example.org"},
            {"relationType": "Cites", "relatedIdentifierType": "DOI", "relatedIdentifier": "10.1/cited"}
        ]);

        let normalized = api(vec![], "").normalize(&record).unwrap();
        assert_eq!(
            normalized.referenced_by_doi,
            Some(r#"["10.1/ref","10.1/sup"]"#.to_string())
        );
    }

    #[test]
    fn updated_at_is_lexicographic_max_of_timestamps() {
        let mut record = minimal_record();
        record["attributes"]["created"] = json!("2020-01-01");
        record["attributes"]["registered"] = json!("2019-01-01");

        let normalized = api(vec![], "").normalize(&record).unwrap();
        assert_eq!(normalized.created_at, "2020-01-01");
        assert_eq!(normalized.updated_at, "2020-01-01");

        record["attributes"]["updated"] = json!("2021-06-15T12:00:00Z");
        let normalized = api(vec![], "").normalize(&record).unwrap();
        assert_eq!(normalized.updated_at, "2021-06-15T12:00:00Z");
    }

    #[test]
    fn version_relations_clear_is_latest_version() {
        let mut record = minimal_record();
        record["attributes"]["relatedIdentifiers"] = json!([
            {"relationType": "HasVersion", "relatedIdentifierType": "DOI", "relatedIdentifier": "10.1/v2"},
            {"relationType": "Cites", "relatedIdentifierType": "DOI", "relatedIdentifier": "10.1/other"}
        ]);
        assert!(!api(vec![], "").normalize(&record).unwrap().is_latest_version);

        record["attributes"]["relatedIdentifiers"] = json!([
            {"relationType": "IsPreviousVersionOf", "relatedIdentifierType": "DOI", "relatedIdentifier": "10.1/v2"}
        ]);
        assert!(!api(vec![], "").normalize(&record).unwrap().is_latest_version);
    }

    #[test]
    fn concept_doi_needs_versions_but_no_parent() {
        let api = api(vec![], "");
        let mut record = minimal_record();

        record["attributes"]["versionCount"] = json!(3);
        record["attributes"]["versionOfCount"] = json!(0);
        assert!(api.normalize(&record).unwrap().is_concept_doi);

        record["attributes"]["versionCount"] = json!(0);
        assert!(!api.normalize(&record).unwrap().is_concept_doi);

        record["attributes"]["versionCount"] = json!(2);
        record["attributes"]["versionOfCount"] = json!(1);
        assert!(!api.normalize(&record).unwrap().is_concept_doi);
    }

    #[test]
    fn version_counts_coerce_null_and_junk_to_zero() {
        let api = api(vec![], "");
        let mut record = minimal_record();

        record["attributes"]["versionCount"] = json!(null);
        record["attributes"]["versionOfCount"] = json!("not a number");
        assert!(!api.normalize(&record).unwrap().is_concept_doi);

        record["attributes"]["versionCount"] = json!("3");
        record["attributes"]["versionOfCount"] = json!(null);
        assert!(api.normalize(&record).unwrap().is_concept_doi);
    }

    #[test]
    fn creator_name_identifier_matches_full_ror() {
        let mut record = minimal_record();
        record["attributes"]["creators"] = json!([
            {"name": "Doe, Jane", "nameIdentifiers": [{"nameIdentifier": "https://ror.org/05wx9n238"}]}
        ]);

        let normalized = api(vec![], "https://ror.org/05wx9n238")
            .normalize(&record)
            .unwrap();
        assert!(normalized.have_creator_affiliation);
        assert!(!normalized.have_contributor_affiliation);
    }

    #[test]
    fn affiliation_identifier_in_bare_suffix_form_matches_full_url_context() {
        let mut record = minimal_record();
        record["attributes"]["creators"] = json!([
            {"name": "Doe, Jane", "nameIdentifiers": [{"nameIdentifier": "05wx9n238"}]}
        ]);

        assert!(api(vec![], "https://ror.org/05wx9n238")
            .normalize(&record)
            .unwrap()
            .have_creator_affiliation);
    }

    #[test]
    fn contributor_affiliation_matches_by_name_pattern() {
        let mut record = minimal_record();
        record["attributes"]["contributors"] = json!([
            {"name": "Smith, Sam", "affiliation": [{"name": "University of Example"}]}
        ]);

        let normalized = api(vec!["University*"], "").normalize(&record).unwrap();
        assert!(normalized.have_contributor_affiliation);
        assert!(!normalized.have_creator_affiliation);
    }

    #[test]
    fn empty_ror_never_matches_empty_identifier_entries() {
        let mut record = minimal_record();
        record["attributes"]["creators"] = json!([
            {"name": "Doe, Jane", "nameIdentifiers": [{"nameIdentifier": ""}]}
        ]);
        record["attributes"]["publisher"] = json!({"name": "Somewhere", "publisherIdentifier": ""});

        let normalized = api(vec![], "").normalize(&record).unwrap();
        assert!(!normalized.have_creator_affiliation);
        assert!(!normalized.is_publisher);
    }
}
