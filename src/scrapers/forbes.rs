//! Forbes.ru scraper.
//!
//! Forbes exposes a JSON search API that returns full article bodies, so no
//! article pages are fetched. Results are paged with `list[offset]` /
//! `list[limit]` and filtered server-side by unix timestamps.
//!
//! # Response Shape
//!
//! ```json
//! {"results": [{"url_alias": "biznes/123-slug", "title": "...", "body": "...", "time": 1706781600}]}
//! ```

use super::{SourceAdapter, clean_text, paginate_bulk};
use crate::error::ScrapeError;
use crate::http::{Fetcher, HttpRequest};
use crate::models::{CompanyDateRange, NewsArticle};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

pub const NAME: &str = "Forbes";
const BASE_URL: &str = "https://www.forbes.ru/";
const SEARCH_URL: &str = "https://www.forbes.ru/api/pub/search";
const PAGE_SIZE: usize = 8;

/// Publication times are Moscow time (UTC+3, no DST).
fn moscow() -> FixedOffset {
    FixedOffset::east_opt(3 * 3600).expect("UTC+3 is within the valid offset range")
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    url_alias: Option<String>,
    title: Option<String>,
    body: Option<String>,
    time: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct Forbes {
    fetcher: Fetcher,
    page_delay: Duration,
}

impl Forbes {
    pub fn new(fetcher: Fetcher) -> Self {
        Self {
            fetcher,
            page_delay: Duration::from_secs(1),
        }
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }
}

fn unix_at(date: NaiveDate, time: NaiveTime) -> i64 {
    moscow()
        .from_local_datetime(&date.and_time(time))
        .single()
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|| date.and_time(time).and_utc().timestamp())
}

fn search_request(request: &CompanyDateRange, offset: usize) -> HttpRequest {
    let day_end = NaiveTime::from_hms_opt(23, 59, 59).expect("23:59:59 is a valid time of day");
    HttpRequest::get(SEARCH_URL)
        .param("list[offset]", offset)
        .param("list[limit]", PAGE_SIZE)
        .param("search[term]", &request.company)
        .param("search[type]", "news")
        .param("search[sort]", "date_asc")
        .param("search[start]", unix_at(request.start_date, NaiveTime::MIN))
        .param("search[end]", unix_at(request.end_date, day_end))
}

fn date_from_timestamp(ts: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(ts, 0).map(|dt| dt.with_timezone(&moscow()).date_naive())
}

/// Turn one search response into articles. Items without a URL are skipped.
fn parse_search_response(body: &str, url: &str) -> Result<Vec<NewsArticle>, ScrapeError> {
    let resp: SearchResponse = serde_json::from_str(body).map_err(|source| ScrapeError::Decode {
        url: url.to_string(),
        source,
    })?;

    let articles = resp
        .results
        .into_iter()
        .filter_map(|item| {
            let Some(alias) = item.url_alias.filter(|a| !a.is_empty()) else {
                debug!("Forbes result without url_alias; skipping");
                return None;
            };
            Some(NewsArticle {
                url: format!("{}{}", BASE_URL, alias.trim_start_matches('/')),
                title: clean_text(item.title.as_deref()),
                body: clean_text(item.body.as_deref()),
                date: item.time.and_then(date_from_timestamp),
                parser: NAME.to_string(),
            })
        })
        .collect();
    Ok(articles)
}

#[async_trait]
impl SourceAdapter for Forbes {
    fn name(&self) -> &'static str {
        NAME
    }

    #[instrument(level = "info", skip_all, fields(source = NAME, company = %request.company))]
    async fn run(&self, request: &CompanyDateRange) -> Result<Vec<NewsArticle>, ScrapeError> {
        paginate_bulk(
            &self.fetcher,
            request,
            NAME,
            PAGE_SIZE,
            self.page_delay,
            |offset| search_request(request, offset),
            parse_search_response,
        )
        .await
    }
}
