// src/services/github.rs

//! GitHub GraphQL search transport.
//!
//! Walks repositories by creation date: every window becomes a
//! `created:<from>..<to>` qualifier, inclusive on both ends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, Result};
use crate::models::{Entity, GithubConfig, Page, Window};
use crate::source::{EmbeddedError, RangeQuery, SearchTransport, TransportReply};
use crate::utils::http::{create_async_client, truncate_body};

const SEARCH_QUERY: &str = r#"
query SearchRepos($queryStr: String!, $first: Int!, $after: String) {
    search(query: $queryStr, type: REPOSITORY, first: $first, after: $after) {
        repositoryCount
        pageInfo {
            hasNextPage
            endCursor
        }
        nodes {
            ... on Repository {
                id
                nameWithOwner
                stargazerCount
                createdAt
                updatedAt
            }
        }
    }
}
"#;

const MAX_ERROR_BODY_CHARS: usize = 300;

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    data: Option<SearchData>,
    #[serde(default)]
    errors: Option<Vec<GraphqlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    search: SearchConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchConnection {
    repository_count: u64,
    page_info: PageInfo,
    #[serde(default)]
    nodes: Vec<Option<RepositoryNode>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryNode {
    id: Option<String>,
    name_with_owner: Option<String>,
    #[serde(default)]
    stargazer_count: i64,
    created_at: Option<String>,
    updated_at: Option<String>,
}

impl RepositoryNode {
    /// Non-repository search hits come back as empty objects.
    fn into_entity(self) -> Option<Entity> {
        let id = self.id?;
        let mut entity = Entity::new(
            id,
            self.name_with_owner.unwrap_or_default(),
            self.stargazer_count,
        );
        if let Some(created_at) = self.created_at {
            entity = entity.with_metadata("createdAt", created_at);
        }
        if let Some(updated_at) = self.updated_at {
            entity = entity.with_metadata("updatedAt", updated_at);
        }
        Some(entity)
    }
}

/// Search transport for the GitHub GraphQL API.
pub struct GithubSearchClient {
    client: Client,
    endpoint: String,
    token: String,
    search_qualifiers: String,
    sort: String,
}

impl GithubSearchClient {
    /// Create a client from configuration. A token is required.
    pub fn new(config: &GithubConfig) -> Result<Self> {
        let token = config
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                AppError::config(
                    "Missing GITHUB_TOKEN environment variable. It is required to query the GraphQL API.",
                )
            })?;

        Ok(Self {
            client: create_async_client(config)?,
            endpoint: config.endpoint.clone(),
            token,
            search_qualifiers: config.search_qualifiers.clone(),
            sort: config.sort.clone(),
        })
    }

    /// Search string for a window.
    pub fn search_string(&self, window: &Window) -> String {
        let created = format!(
            "created:{}..{}",
            window.start.format("%Y-%m-%d"),
            window.last_day().format("%Y-%m-%d")
        );
        let sort = format!("sort:{}", self.sort);
        let parts: [&str; 3] = [self.search_qualifiers.trim(), &created, &sort];
        parts
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl SearchTransport for GithubSearchClient {
    async fn execute(&self, query: &RangeQuery) -> Result<TransportReply> {
        let body = json!({
            "query": SEARCH_QUERY,
            "variables": {
                "queryStr": self.search_string(&query.window),
                "first": query.page_size,
                "after": query.cursor,
            }
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if let Some(reply) = rate_limit_reply(status.as_u16(), response.headers(), Utc::now()) {
            return Ok(reply);
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if status.as_u16() == 403 && mentions_rate_limit(&text) {
                return Ok(TransportReply::RateLimited { reset_at: None });
            }
            return Ok(TransportReply::Failed {
                status: status.as_u16(),
                message: format!(
                    "{} - {}",
                    status.canonical_reason().unwrap_or("error"),
                    truncate_body(&text, MAX_ERROR_BODY_CHARS)
                ),
            });
        }

        let text = response.text().await?;
        parse_search_response(&text)
    }
}

/// Detect a rate-limit reply and extract when the budget resets.
///
/// 429 is always a rate limit. 403 is one when it carries a rate-limit
/// header (secondary limits keep `x-ratelimit-remaining` above zero but
/// still advertise a reset), since GitHub also uses 403 for permission errors.
fn rate_limit_reply(status: u16, headers: &HeaderMap, now: DateTime<Utc>) -> Option<TransportReply> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
    };

    let retry_after = header("retry-after").and_then(|v| v.parse::<i64>().ok());
    let reset = header("x-ratelimit-reset").and_then(|v| v.parse::<i64>().ok());
    let exhausted = header("x-ratelimit-remaining") == Some("0");

    let limited = match status {
        429 => true,
        403 => exhausted || retry_after.is_some() || reset.is_some(),
        _ => false,
    };
    if !limited {
        return None;
    }

    let reset_at = retry_after
        .map(|secs| now + chrono::Duration::seconds(secs))
        .or_else(|| reset.and_then(|epoch| DateTime::from_timestamp(epoch, 0)));

    Some(TransportReply::RateLimited { reset_at })
}

/// Secondary rate limits may arrive as a bare 403 with an explanatory body.
fn mentions_rate_limit(body: &str) -> bool {
    body.to_lowercase().contains("rate limit")
}

/// Classify a 2xx response body.
fn parse_search_response(body: &str) -> Result<TransportReply> {
    let response: GraphqlResponse = serde_json::from_str(body)?;

    if let Some(errors) = response.errors.filter(|e| !e.is_empty()) {
        return Ok(TransportReply::Embedded(
            errors
                .into_iter()
                .map(|e| EmbeddedError::new(e.kind.as_deref(), e.message))
                .collect(),
        ));
    }

    let search = response
        .data
        .ok_or_else(|| AppError::transient("response carried neither data nor errors"))?
        .search;

    let next_cursor = if search.page_info.has_next_page {
        search.page_info.end_cursor
    } else {
        None
    };

    Ok(TransportReply::Page(Page {
        entities: search
            .nodes
            .into_iter()
            .flatten()
            .filter_map(RepositoryNode::into_entity)
            .collect(),
        next_cursor,
        range_total_count: search.repository_count,
    }))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use reqwest::header::HeaderValue;

    use super::*;

    fn client() -> GithubSearchClient {
        let config = GithubConfig {
            token: Some("ghp_test".into()),
            ..GithubConfig::default()
        };
        GithubSearchClient::new(&config).unwrap()
    }

    #[test]
    fn new_requires_token() {
        let result = GithubSearchClient::new(&GithubConfig::default());
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn search_string_uses_inclusive_day_span() {
        let window = Window::clipped(
            NaiveDate::from_ymd_opt(2015, 1, 1).unwrap(),
            31,
            NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
        );
        assert_eq!(
            client().search_string(&window),
            "stars:>0 created:2015-01-01..2015-01-31 sort:stars-desc"
        );
    }

    #[test]
    fn parses_page_and_skips_non_repository_nodes() {
        let body = r#"{
            "data": {
                "search": {
                    "repositoryCount": 1874,
                    "pageInfo": { "hasNextPage": true, "endCursor": "Y3Vyc29yOjEwMA==" },
                    "nodes": [
                        {
                            "id": "MDEwOlJlcG9zaXRvcnkx",
                            "nameWithOwner": "octo/hello",
                            "stargazerCount": 4200,
                            "createdAt": "2015-01-03T10:00:00Z",
                            "updatedAt": "2026-09-01T00:00:00Z"
                        },
                        {},
                        null
                    ]
                }
            }
        }"#;

        let TransportReply::Page(page) = parse_search_response(body).unwrap() else {
            panic!("expected a page");
        };
        assert_eq!(page.entities.len(), 1);
        assert_eq!(page.entities[0].display_name, "octo/hello");
        assert_eq!(page.entities[0].rank_score, 4200);
        assert_eq!(page.next_cursor.as_deref(), Some("Y3Vyc29yOjEwMA=="));
        assert_eq!(page.range_total_count, 1874);
    }

    #[test]
    fn last_page_has_no_cursor() {
        let body = r#"{"data":{"search":{"repositoryCount":3,
            "pageInfo":{"hasNextPage":false,"endCursor":"Y3Vyc29yOjM="},"nodes":[]}}}"#;

        let TransportReply::Page(page) = parse_search_response(body).unwrap() else {
            panic!("expected a page");
        };
        assert!(page.next_cursor.is_none());
        assert!(page.entities.is_empty());
    }

    #[test]
    fn embedded_errors_are_reported() {
        let body = r#"{"data":null,"errors":[
            {"type":"RATE_LIMITED","message":"API rate limit exceeded"}]}"#;

        let reply = parse_search_response(body).unwrap();
        assert_eq!(
            reply,
            TransportReply::Embedded(vec![EmbeddedError::new(
                Some("RATE_LIMITED"),
                "API rate limit exceeded"
            )])
        );
    }

    #[test]
    fn rate_limit_from_reset_header() {
        let now = Utc::now();
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1893456000"));

        let reply = rate_limit_reply(403, &headers, now);
        assert_eq!(
            reply,
            Some(TransportReply::RateLimited {
                reset_at: DateTime::from_timestamp(1_893_456_000, 0)
            })
        );
    }

    #[test]
    fn rate_limit_from_retry_after() {
        let now = Utc::now();
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("60"));

        let reply = rate_limit_reply(403, &headers, now);
        assert_eq!(
            reply,
            Some(TransportReply::RateLimited {
                reset_at: Some(now + chrono::Duration::seconds(60))
            })
        );
    }

    #[test]
    fn plain_forbidden_is_not_rate_limited() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("4999"));
        assert_eq!(rate_limit_reply(403, &headers, Utc::now()), None);
        assert_eq!(rate_limit_reply(502, &headers, Utc::now()), None);
    }

    #[test]
    fn secondary_rate_limit_with_remaining_budget() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("4990"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1893456000"));

        let reply = rate_limit_reply(403, &headers, Utc::now());
        assert_eq!(
            reply,
            Some(TransportReply::RateLimited {
                reset_at: DateTime::from_timestamp(1_893_456_000, 0)
            })
        );
    }

    #[test]
    fn rate_limit_wording_in_body() {
        assert!(mentions_rate_limit(
            r#"{"message":"You have exceeded a secondary rate limit. Please wait."}"#
        ));
        assert!(!mentions_rate_limit(
            r#"{"message":"Resource not accessible by integration"}"#
        ));
    }

    #[test]
    fn too_many_requests_without_hint() {
        let reply = rate_limit_reply(429, &HeaderMap::new(), Utc::now());
        assert_eq!(reply, Some(TransportReply::RateLimited { reset_at: None }));
    }
}
