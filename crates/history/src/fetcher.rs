//! Adaptive resolution discovery.
//!
//! Reconstructs a dense per-day timeline from the minimum number of
//! "counts at date" probes: segments whose endpoint counts differ by more
//! than the configured threshold (or that span too many days) are halved
//! until every remaining segment is flat enough or short enough.

use gitpulse_core::config::ResolutionConfig;
use gitpulse_core::{ActivityCounts, RepoRef, day_span, midpoint};
use gitpulse_github::{GithubResult, UpstreamClient};
use std::collections::{BTreeMap, BTreeSet};
use time::Date;
use tracing::debug;

/// One active interval of the subdivision, with its endpoint counts.
struct Segment {
    start: Date,
    start_counts: ActivityCounts,
    end: Date,
    end_counts: ActivityCounts,
}

impl Segment {
    fn span_days(&self) -> i64 {
        day_span(self.start, self.end)
    }

    fn max_delta(&self) -> u64 {
        self.start_counts.max_component_delta(&self.end_counts)
    }

    fn should_subdivide(&self, config: &ResolutionConfig) -> bool {
        if self.span_days() <= config.min_interval_days {
            return false;
        }
        self.max_delta() > config.threshold || self.span_days() > config.max_interval_days
    }
}

/// Discover `counts(d)` for enough days in `[start, end]` that every
/// terminal segment is within tolerance, issuing as few upstream probes as
/// the subdivision permits.
///
/// `RateLimited` and `Transport` bubble unchanged; nothing is persisted
/// here, so a failed call discards only in-memory progress. A reply missing
/// one of the endpoints short-circuits with whatever was obtained.
pub async fn discover_range(
    client: &dyn UpstreamClient,
    repo: &RepoRef,
    config: &ResolutionConfig,
    start: Date,
    end: Date,
) -> GithubResult<BTreeMap<Date, ActivityCounts>> {
    let (start, end) = if start <= end { (start, end) } else { (end, start) };

    let mut known: BTreeMap<Date, ActivityCounts> = BTreeMap::new();

    let endpoints: Vec<Date> = if start == end {
        vec![start]
    } else {
        vec![start, end]
    };
    probe_chunks(client, repo, &endpoints, &mut known).await?;

    let (start_counts, end_counts) = match (known.get(&start).copied(), known.get(&end).copied()) {
        (Some(s), Some(e)) => (s, e),
        _ => {
            debug!(repo = %repo, "endpoint probe incomplete, returning partial result");
            return Ok(known);
        }
    };
    if start == end {
        return Ok(known);
    }

    let mut segments = vec![Segment {
        start,
        start_counts,
        end,
        end_counts,
    }];
    let mut rounds = 0u32;

    loop {
        // A midpoint that floors onto the segment start cannot make
        // progress; such segments are terminal even above the threshold.
        let to_split: Vec<Segment> = segments
            .into_iter()
            .filter(|s| s.should_subdivide(config) && midpoint(s.start, s.end) != s.start)
            .collect();
        if to_split.is_empty() {
            break;
        }
        rounds += 1;

        // Midpoints deduplicated across segments; already-known dates are
        // never probed again.
        let wanted: BTreeSet<Date> = to_split
            .iter()
            .map(|s| midpoint(s.start, s.end))
            .filter(|mid| !known.contains_key(mid))
            .collect();
        let wanted: Vec<Date> = wanted.into_iter().collect();
        probe_chunks(client, repo, &wanted, &mut known).await?;

        let mut next = Vec::with_capacity(to_split.len() * 2);
        for segment in to_split {
            let mid = midpoint(segment.start, segment.end);
            match known.get(&mid).copied() {
                Some(mid_counts) => {
                    next.push(Segment {
                        start: segment.start,
                        start_counts: segment.start_counts,
                        end: mid,
                        end_counts: mid_counts,
                    });
                    next.push(Segment {
                        start: mid,
                        start_counts: mid_counts,
                        end: segment.end,
                        end_counts: segment.end_counts,
                    });
                }
                None => {
                    // Upstream declined to answer this midpoint; the reply
                    // is authoritative, so retire the segment as-is.
                    debug!(repo = %repo, mid = %mid, "midpoint unanswered, retiring segment");
                }
            }
        }
        segments = next;
    }

    debug!(
        repo = %repo,
        points = known.len(),
        rounds,
        "discovery converged"
    );
    Ok(known)
}

/// Probe the given dates in `max_batch()`-sized chunks, merging replies for
/// requested dates into `known`. Replies for dates that were never asked
/// for are ignored.
async fn probe_chunks(
    client: &dyn UpstreamClient,
    repo: &RepoRef,
    dates: &[Date],
    known: &mut BTreeMap<Date, ActivityCounts>,
) -> GithubResult<()> {
    let max_batch = client.max_batch().max(1);
    for chunk in dates.chunks(max_batch) {
        let reply = client.counts_at(repo, chunk).await?;
        for date in chunk {
            if let Some(counts) = reply.get(date) {
                known.insert(*date, *counts);
            }
        }
    }
    Ok(())
}
