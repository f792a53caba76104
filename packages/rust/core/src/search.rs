//! Rank configured websites against a free-text query.
//!
//! Each enabled site gets a cheap score from its description and URL. Only
//! sites with a positive score are fetched; a fetched page that mentions the
//! query earns a bonus. Sites that fail to fetch are dropped.

use std::cmp::Ordering;

use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use webmark_shared::{Result, SearchHit, WebmarkError, Website};

use crate::context::FetchContext;
use crate::pipeline::{ProgressReporter, fetch_website};

/// Description contains the query.
pub const DESCRIPTION_WEIGHT: f64 = 0.3;
/// Second term over the same description test.
pub const TITLE_WEIGHT: f64 = 0.2;
/// URL contains the query.
pub const URL_WEIGHT: f64 = 0.1;
/// Fetched Markdown contains the query.
pub const CONTENT_WEIGHT: f64 = 0.4;

/// Score from configuration data alone. `query` must be lowercase.
pub fn pre_score(site: &Website, query: &str) -> f64 {
    let described = site
        .description
        .as_deref()
        .is_some_and(|d| d.to_lowercase().contains(query));

    let mut score = 0.0;
    if described {
        score += DESCRIPTION_WEIGHT;
        // Kept apart from the description term: both test the description.
        score += TITLE_WEIGHT;
    }
    if site.url.to_lowercase().contains(query) {
        score += URL_WEIGHT;
    }
    score
}

/// Search the enabled websites of the context's configuration.
///
/// Results are sorted by descending score; equal scores keep configuration
/// order.
#[instrument(skip_all, fields(query = %query))]
pub async fn search(
    ctx: &FetchContext,
    query: &str,
    progress: &dyn ProgressReporter,
) -> Result<Vec<SearchHit>> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return Err(WebmarkError::validation("search query is empty"));
    }

    let config = ctx.config();
    let candidates: Vec<(&Website, f64)> = config
        .enabled_websites()
        .map(|site| (site, pre_score(site, &query)))
        .filter(|(site, score)| {
            debug!(site = %site.name, score, "pre-score");
            *score > 0.0
        })
        .collect();

    let scored = join_all(
        candidates
            .into_iter()
            .map(|(site, score)| score_site(ctx, site, score, &query, progress)),
    )
    .await;

    let mut hits: Vec<SearchHit> = scored
        .into_iter()
        .flatten()
        .filter(|hit| hit.score > 0.0)
        .collect();
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    info!(hits = hits.len(), "search complete");
    Ok(hits)
}

async fn score_site(
    ctx: &FetchContext,
    site: &Website,
    pre_score: f64,
    query: &str,
    progress: &dyn ProgressReporter,
) -> Option<SearchHit> {
    progress.started(&site.url);
    let outcome = fetch_website(ctx, site).await;
    progress.finished(&site.url, outcome.is_ok());

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(site = %site.name, error = %e, "site excluded from search results");
            return None;
        }
    };

    let mut score = pre_score;
    if outcome.markdown().to_lowercase().contains(query) {
        score += CONTENT_WEIGHT;
    }

    Some(SearchHit {
        name: site.name.clone(),
        url: site.url.clone(),
        score,
        title: outcome.title().map(str::to_string),
        summary: Some(outcome.summary().to_string()).filter(|s| !s.is_empty()),
    })
}
