//! GraphQL document construction.
//!
//! One composite document carries every probe of a batch as uniquely
//! aliased `search` sub-queries, so a single upstream round trip answers up
//! to `max_batch` dates for all five predicates.

use gitpulse_core::RepoRef;
use time::Date;

/// The five count predicates measured per probe date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Predicate {
    IssuesCreated,
    IssuesClosed,
    PrsCreated,
    PrsClosed,
    PrsMerged,
}

pub(crate) const PREDICATES: [Predicate; 5] = [
    Predicate::IssuesCreated,
    Predicate::IssuesClosed,
    Predicate::PrsCreated,
    Predicate::PrsClosed,
    Predicate::PrsMerged,
];

impl Predicate {
    /// Alias prefix; combined with the date this makes every sub-query
    /// decodable without positional knowledge.
    pub(crate) fn alias_prefix(self) -> &'static str {
        match self {
            Self::IssuesCreated => "ic",
            Self::IssuesClosed => "icl",
            Self::PrsCreated => "pc",
            Self::PrsClosed => "pcl",
            Self::PrsMerged => "pm",
        }
    }

    /// Search filter counting items whose relevant timestamp is strictly
    /// before `date` (the `<` bound is exclusive).
    fn search_filter(self, repo: &RepoRef, date: Date) -> String {
        let repo_term = format!(
            "repo:{}/{}",
            escape_string(repo.owner()),
            escape_string(repo.name())
        );
        let day = iso_date(date);
        match self {
            Self::IssuesCreated => format!("{repo_term} is:issue created:<{day}"),
            Self::IssuesClosed => format!("{repo_term} is:issue is:closed closed:<{day}"),
            Self::PrsCreated => format!("{repo_term} is:pr created:<{day}"),
            Self::PrsClosed => format!("{repo_term} is:pr is:closed closed:<{day}"),
            Self::PrsMerged => format!("{repo_term} is:pr is:merged merged:<{day}"),
        }
    }
}

/// Format a date as `YYYY-MM-DD`.
pub(crate) fn iso_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// Alias for one predicate at one date, e.g. `ic_2024_01_15`.
pub(crate) fn alias_for(predicate: Predicate, date: Date) -> String {
    format!(
        "{}_{}",
        predicate.alias_prefix(),
        iso_date(date).replace('-', "_")
    )
}

/// Escape a value for interpolation into a GraphQL string literal.
/// Backslashes and double quotes are escaped; everything else passes through.
pub(crate) fn escape_string(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            other => escaped.push(other),
        }
    }
    escaped
}

const RATE_LIMIT_SELECTION: &str = "rateLimit { remaining resetAt }";

/// Document probing every predicate at every date in one call.
pub(crate) fn counts_document(repo: &RepoRef, dates: &[Date]) -> String {
    let mut document = String::from("query {\n");
    document.push_str("  ");
    document.push_str(RATE_LIMIT_SELECTION);
    document.push('\n');
    for &date in dates {
        for predicate in PREDICATES {
            document.push_str(&format!(
                "  {alias}: search(query: \"{filter}\", type: ISSUE, first: 1) {{ issueCount }}\n",
                alias = alias_for(predicate, date),
                filter = predicate.search_filter(repo, date),
            ));
        }
    }
    document.push('}');
    document
}

/// Document fetching repository metadata and totals.
pub(crate) fn repository_info_document(repo: &RepoRef) -> String {
    format!(
        "query {{\n  {RATE_LIMIT_SELECTION}\n  repository(owner: \"{owner}\", name: \"{name}\") {{\n    createdAt\n    issues {{ totalCount }}\n    pullRequests {{ totalCount }}\n  }}\n}}",
        owner = escape_string(repo.owner()),
        name = escape_string(repo.name()),
    )
}

/// Document reading only the current rate-limit window.
pub(crate) fn rate_limit_document() -> String {
    format!("query {{ {RATE_LIMIT_SELECTION} }}")
}
