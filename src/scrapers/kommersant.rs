//! Kommersant scraper.
//!
//! Kommersant has no JSON API, so this is the link-list flavour:
//!
//! 1. **Searching**: `/search/results` answers with a tiny page whose first
//!    link points at the real result listing. That listing is fetched and every
//!    `/doc/<id>?query=<company>` link is collected. Pages are walked until one
//!    yields no new links.
//! 2. **Fetching**: each unique article URL is downloaded and the headline,
//!    body paragraphs and publish time are extracted. A URL that fails is
//!    logged and skipped.
//!
//! All HTML handling happens in synchronous helpers; parsed documents are never
//! held across an `.await`.

use super::{SourceAdapter, clean_text, within_range};
use crate::error::ScrapeError;
use crate::http::{Fetcher, HttpRequest};
use crate::models::{CompanyDateRange, NewsArticle, parse_date_prefix};
use async_trait::async_trait;
use chrono::Utc;
use itertools::Itertools;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use url::Url;

pub const NAME: &str = "Kommersant";
const BASE_URL: &str = "https://www.kommersant.ru";
const SEARCH_URL: &str = "https://www.kommersant.ru/search/results";

static LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());
static HEADLINE: Lazy<Selector> = Lazy::new(|| Selector::parse("h1.doc_header__name").unwrap());
static BODY_PARAGRAPHS: Lazy<Selector> = Lazy::new(|| Selector::parse("div.doc__body p").unwrap());
static PUBLISH_TIME: Lazy<Selector> =
    Lazy::new(|| Selector::parse("time.doc_header__publish_time").unwrap());

#[derive(Debug, Clone)]
pub struct Kommersant {
    fetcher: Fetcher,
    page_delay: Duration,
}

impl Kommersant {
    pub fn new(fetcher: Fetcher) -> Self {
        Self {
            fetcher,
            page_delay: Duration::from_millis(500),
        }
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    /// Walk the search result pages and return every candidate article URL,
    /// de-duplicated, in discovery order.
    #[instrument(level = "info", skip_all, fields(company = %request.company))]
    async fn search_news(&self, request: &CompanyDateRange) -> Result<Vec<String>, ScrapeError> {
        let mut candidates = Vec::new();
        let mut seen = HashSet::new();
        let mut page = 1usize;

        loop {
            let search = search_request(request, page);
            let Some(resp) = self.fetcher.fetch(&search).await? else {
                warn!(page, "No response for search page; stopping");
                break;
            };
            let Some(listing_url) = listing_link(&resp.body) else {
                if page == 1 {
                    return Err(ScrapeError::Structure {
                        url: search.url.clone(),
                        reason: "search response has no result link".to_string(),
                    });
                }
                debug!(page, "Search response has no result link; stopping");
                break;
            };
            let Some(listing) = self.fetcher.fetch(&HttpRequest::get(&listing_url)).await? else {
                warn!(page, url = %listing_url, "No response for result listing; stopping");
                break;
            };

            let links = article_links(&listing.body, &request.company);
            let fresh = links.iter().filter(|l| seen.insert((*l).clone())).count();
            candidates.extend(links);
            debug!(page, fresh, "Fetched search page");

            if fresh == 0 {
                break;
            }
            page += 1;
            sleep(self.page_delay).await;
        }

        let unique: Vec<String> = candidates.into_iter().unique().collect();
        info!(count = unique.len(), "Indexed Kommersant article URLs");
        Ok(unique)
    }

    /// Fetch and parse one article page. `None` means skip this URL.
    #[instrument(level = "debug", skip(self))]
    async fn fetch_article(&self, url: &str) -> Option<NewsArticle> {
        match self.fetcher.fetch(&HttpRequest::get(url)).await {
            Ok(Some(resp)) => {
                let article = parse_article(&resp.body, url);
                if article.is_none() {
                    warn!(%url, "Kommersant page has no headline or body; skipping");
                }
                article
            }
            Ok(None) => {
                warn!(%url, "Kommersant article unavailable after retries; skipping");
                None
            }
            Err(e) => {
                warn!(%url, error = %e, "Kommersant article fetch failed; skipping");
                None
            }
        }
    }
}

fn search_request(request: &CompanyDateRange, page: usize) -> HttpRequest {
    HttpRequest::get(SEARCH_URL)
        .param("search_query", &request.company)
        .param("sort_type", 0)
        .param("search_full", 1)
        .param("time_range", 2)
        .param("dateStart", request.start_date.format("%Y-%m-%d"))
        .param("dateEnd", request.end_date.format("%Y-%m-%d"))
        .param("stamp", Utc::now().timestamp_millis())
        .param("page", page)
}

fn absolute(href: &str) -> Option<String> {
    Url::parse(BASE_URL)
        .ok()?
        .join(href)
        .ok()
        .map(|u| u.to_string())
}

/// First link of the search response: the real result listing.
fn listing_link(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    document
        .select(&LINK)
        .filter_map(|a| a.value().attr("href"))
        .find(|href| !href.trim().is_empty())
        .and_then(absolute)
}

/// Whether `href` is an article link produced by a search for `company`.
fn is_article_link(href: &str, company: &str) -> bool {
    if !href.contains("doc") {
        return false;
    }
    let form_decoded = href.replace('+', " ");
    let decoded = urlencoding::decode(&form_decoded)
        .map(|d| d.into_owned())
        .unwrap_or(form_decoded);
    let needle = format!("query={}", company).to_lowercase();
    href.to_lowercase().contains(&needle) || decoded.to_lowercase().contains(&needle)
}

/// Article URLs on a result listing, absolute, in page order.
fn article_links(html: &str, company: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    document
        .select(&LINK)
        .filter_map(|a| a.value().attr("href"))
        .filter(|href| is_article_link(href, company))
        .filter_map(absolute)
        .collect()
}

/// Extract headline, body and date from an article page.
fn parse_article(html: &str, url: &str) -> Option<NewsArticle> {
    let document = Html::parse_document(html);

    let title = document
        .select(&HEADLINE)
        .next()
        .map(|h| h.text().collect::<String>().trim().to_string())
        .unwrap_or_default();

    let body = document
        .select(&BODY_PARAGRAPHS)
        .map(|p| p.text().collect::<String>())
        .collect::<Vec<_>>()
        .join(" ");

    if title.is_empty() && body.trim().is_empty() {
        return None;
    }

    let date = document
        .select(&PUBLISH_TIME)
        .next()
        .and_then(|t| t.value().attr("datetime"))
        .and_then(parse_date_prefix);

    Some(NewsArticle {
        url: url.to_string(),
        title: clean_text(Some(&title)),
        body: clean_text(Some(&body)),
        date,
        parser: NAME.to_string(),
    })
}

#[async_trait]
impl SourceAdapter for Kommersant {
    fn name(&self) -> &'static str {
        NAME
    }

    #[instrument(level = "info", skip_all, fields(source = NAME, company = %request.company))]
    async fn run(&self, request: &CompanyDateRange) -> Result<Vec<NewsArticle>, ScrapeError> {
        let urls = self.search_news(request).await?;

        let mut articles = Vec::new();
        for url in urls {
            let Some(article) = self.fetch_article(&url).await else {
                continue;
            };
            if within_range(request, &article) {
                articles.push(article);
            } else {
                debug!(%url, date = ?article.date, "Article outside requested range");
            }
        }

        info!(count = articles.len(), "Fetched Kommersant article contents");
        Ok(articles)
    }
}
