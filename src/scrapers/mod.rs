//! News source scrapers.
//!
//! Each scraper searches one site for a company within a date range and turns
//! the results into [`NewsArticle`]s. Two shapes exist:
//!
//! 1. **Bulk**: the search API already returns title/body/date, so articles are
//!    built straight from the search response
//! 2. **Link list**: the search page only yields URLs, which are de-duplicated
//!    and then fetched one by one
//!
//! # Supported Sources
//!
//! | Source | Module | Method | Page size | Pacing |
//! |--------|--------|--------|-----------|--------|
//! | Forbes.ru | [`forbes`] | JSON search API (bulk) | 8 | 1s |
//! | Vedomosti | [`vedomosti`] | JSON search API (bulk) | 20 | 1s |
//! | Kommersant | [`kommersant`] | HTML search + article pages | 1 page | 0.5s |
//!
//! # Common Patterns
//!
//! - Pages are requested strictly in order; a page with no new results ends
//!   the search
//! - All network access goes through [`Fetcher`] and its retry policy
//! - Text fields pass through [`clean_text`]
//! - Articles dated outside the requested range are dropped

use crate::error::ScrapeError;
use crate::http::{Fetcher, HttpRequest};
use crate::models::{CompanyDateRange, NewsArticle};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

pub mod forbes;
pub mod kommersant;
pub mod vedomosti;

/// A site-specific scraper.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Fixed source name, stamped on every article as `parser`.
    fn name(&self) -> &'static str;

    /// Collect the articles about `request.company` within its date range.
    ///
    /// Missing or unparseable articles are skipped. An `Err` means the source
    /// itself failed (non-retryable status, malformed search response).
    async fn run(&self, request: &CompanyDateRange) -> Result<Vec<NewsArticle>, ScrapeError>;
}

impl std::fmt::Debug for dyn SourceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Replace non-breaking spaces with regular spaces; absent text becomes empty.
pub fn clean_text(text: Option<&str>) -> String {
    text.map(|t| t.replace('\u{a0}', " ")).unwrap_or_default()
}

/// Drop articles whose known date lies outside the requested range.
pub(crate) fn within_range(request: &CompanyDateRange, article: &NewsArticle) -> bool {
    article.date.is_none_or(|d| request.contains(d))
}

/// Offset-paginated search loop shared by the bulk sources.
///
/// `build` turns an offset into the search request, `parse` turns a response
/// body into articles. Stops on the first page without unseen URLs or when the
/// retry policy gives up on a page.
pub(crate) async fn paginate_bulk<B, P>(
    fetcher: &Fetcher,
    request: &CompanyDateRange,
    source: &'static str,
    page_size: usize,
    page_delay: Duration,
    build: B,
    parse: P,
) -> Result<Vec<NewsArticle>, ScrapeError>
where
    B: Fn(usize) -> HttpRequest + Sync,
    P: Fn(&str, &str) -> Result<Vec<NewsArticle>, ScrapeError> + Sync,
{
    let mut articles = Vec::new();
    let mut seen = HashSet::new();
    let mut offset = 0usize;

    loop {
        let search = build(offset);
        let Some(resp) = fetcher.fetch(&search).await? else {
            warn!(source, company = %request.company, offset, "No response for search page; stopping");
            break;
        };

        let mut fresh = 0usize;
        for article in parse(&resp.body, &search.url)? {
            if !seen.insert(article.url.clone()) {
                continue;
            }
            fresh += 1;
            if within_range(request, &article) {
                articles.push(article);
            } else {
                debug!(source, url = %article.url, date = ?article.date, "Article outside requested range");
            }
        }

        debug!(source, company = %request.company, offset, fresh, "Fetched search page");
        if fresh == 0 {
            break;
        }
        offset += page_size;
        sleep(page_delay).await;
    }

    info!(source, company = %request.company, count = articles.len(), "Collected articles");
    Ok(articles)
}

/// Delays used between consecutive search requests.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub bulk: Duration,
    pub link_list: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            bulk: Duration::from_secs(1),
            link_list: Duration::from_millis(500),
        }
    }
}

impl Pacing {
    #[cfg(test)]
    pub fn none() -> Self {
        Self {
            bulk: Duration::ZERO,
            link_list: Duration::ZERO,
        }
    }
}

/// The fixed set of sources every work item is scraped from.
pub fn registry(fetcher: &Fetcher, pacing: Pacing) -> Vec<Arc<dyn SourceAdapter>> {
    vec![
        Arc::new(forbes::Forbes::new(fetcher.clone()).with_page_delay(pacing.bulk)),
        Arc::new(vedomosti::Vedomosti::new(fetcher.clone()).with_page_delay(pacing.bulk)),
        Arc::new(kommersant::Kommersant::new(fetcher.clone()).with_page_delay(pacing.link_list)),
    ]
}
