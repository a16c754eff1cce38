//! Reply decoding and failure classification.
//!
//! Kept free of any transport concern so every branch is unit-testable
//! against JSON fixtures.

use crate::client::{RateLimitInfo, RepositoryInfo};
use crate::error::GithubError;
use crate::query::{PREDICATES, alias_for};
use gitpulse_core::{ActivityCounts, RepoRef};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use time::format_description::well_known::Rfc3339;
use time::{Date, OffsetDateTime};

/// Top-level GraphQL reply envelope.
#[derive(Debug, Deserialize)]
pub(crate) struct GraphQlResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

/// One entry of the upstream `errors` array.
#[derive(Debug, Deserialize)]
pub(crate) struct GraphQlError {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
}

/// Map a non-empty upstream error list to a typed failure.
///
/// `RATE_LIMITED` wins over everything else; `NOT_FOUND` identifies a
/// missing repository; any other combination is a protocol failure carrying
/// the concatenated messages.
pub(crate) fn classify_errors(repo: &RepoRef, errors: &[GraphQlError]) -> GithubError {
    if errors
        .iter()
        .any(|e| e.error_type.as_deref() == Some("RATE_LIMITED"))
    {
        return GithubError::RateLimited { reset_at: None };
    }
    if errors
        .iter()
        .any(|e| e.error_type.as_deref() == Some("NOT_FOUND"))
    {
        return GithubError::NotFound {
            owner: repo.owner().to_string(),
            name: repo.name().to_string(),
        };
    }
    let messages: Vec<&str> = errors.iter().map(|e| e.message.as_str()).collect();
    GithubError::Protocol(messages.join("; "))
}

/// Decode the per-date count tuples out of an aliased reply.
///
/// A date enters the result only when all five of its aliases decoded;
/// partially answered dates count as unanswered rather than being padded
/// with zeros. Aliases for dates that were never requested are ignored.
pub(crate) fn decode_counts(data: &Value, dates: &[Date]) -> BTreeMap<Date, ActivityCounts> {
    let mut decoded = BTreeMap::new();
    for &date in dates {
        let mut components = [0u64; 5];
        let mut complete = true;
        for (slot, predicate) in PREDICATES.iter().enumerate() {
            match data
                .get(alias_for(*predicate, date))
                .and_then(|entry| entry.get("issueCount"))
                .and_then(Value::as_u64)
            {
                Some(count) => components[slot] = count,
                None => {
                    complete = false;
                    break;
                }
            }
        }
        if complete {
            decoded.insert(
                date,
                ActivityCounts {
                    issues_created: components[0],
                    issues_closed: components[1],
                    prs_created: components[2],
                    prs_closed: components[3],
                    prs_merged: components[4],
                },
            );
        }
    }
    decoded
}

/// Decode the rate-limit selection, if the reply carried one.
pub(crate) fn decode_rate_limit(data: &Value) -> Option<RateLimitInfo> {
    let node = data.get("rateLimit")?;
    let remaining = node.get("remaining")?.as_u64()?;
    let reset_at = node
        .get("resetAt")
        .and_then(Value::as_str)
        .and_then(|raw| OffsetDateTime::parse(raw, &Rfc3339).ok());
    Some(RateLimitInfo { remaining, reset_at })
}

/// Decode the repository metadata reply.
pub(crate) fn decode_repository_info(
    repo: &RepoRef,
    data: &Value,
) -> Result<RepositoryInfo, GithubError> {
    let node = match data.get("repository") {
        Some(node) if !node.is_null() => node,
        // GitHub pairs a null repository with a NOT_FOUND error entry; a
        // bare null without one still means the repository is absent.
        _ => {
            return Err(GithubError::NotFound {
                owner: repo.owner().to_string(),
                name: repo.name().to_string(),
            });
        }
    };

    let created_raw = node
        .get("createdAt")
        .and_then(Value::as_str)
        .ok_or_else(|| GithubError::Protocol("repository reply is missing createdAt".into()))?;
    let created_at = OffsetDateTime::parse(created_raw, &Rfc3339)
        .map_err(|e| GithubError::Protocol(format!("invalid createdAt '{created_raw}': {e}")))?
        .date();

    let total_issues = node
        .get("issues")
        .and_then(|issues| issues.get("totalCount"))
        .and_then(Value::as_u64)
        .ok_or_else(|| GithubError::Protocol("repository reply is missing issues total".into()))?;
    let total_prs = node
        .get("pullRequests")
        .and_then(|prs| prs.get("totalCount"))
        .and_then(Value::as_u64)
        .ok_or_else(|| {
            GithubError::Protocol("repository reply is missing pull request total".into())
        })?;

    Ok(RepositoryInfo {
        created_at,
        total_issues,
        total_prs,
    })
}
