//! Vedomosti scraper.
//!
//! Uses the public `api.vedomosti.ru` document search, which returns the title,
//! publication timestamp and body blocks of every hit. Results are paged with
//! `from` / `limit`.

use super::{SourceAdapter, clean_text, paginate_bulk};
use crate::error::ScrapeError;
use crate::http::{Fetcher, HttpRequest};
use crate::models::{CompanyDateRange, NewsArticle, parse_date_prefix};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

pub const NAME: &str = "Vedomosti";
const SEARCH_URL: &str = "https://api.vedomosti.ru/v2/documents/search";
const PAGE_SIZE: usize = 20;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    found: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    source: Option<Document>,
}

#[derive(Debug, Deserialize)]
struct Document {
    url: Option<String>,
    title: Option<String>,
    #[serde(default)]
    boxes: Value,
    published_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Vedomosti {
    fetcher: Fetcher,
    page_delay: Duration,
}

impl Vedomosti {
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

fn search_request(request: &CompanyDateRange, offset: usize) -> HttpRequest {
    HttpRequest::get(SEARCH_URL)
        .param("query", &request.company)
        .param("sort", "date")
        .param("material_types", "news")
        .param("date_from", request.start_date.format("%Y-%m-%d"))
        .param("date_to", request.end_date.format("%Y-%m-%d"))
        .param("limit", PAGE_SIZE)
        .param("from", offset)
}

/// Flatten the `boxes` field into plain text.
///
/// It is either a string or a list of content blocks, each a string or an
/// object carrying a `text` field. Anything else contributes nothing.
fn boxes_text(boxes: &Value) -> String {
    match boxes {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|block| match block {
                Value::String(s) => Some(s.as_str()),
                Value::Object(map) => map.get("text").and_then(Value::as_str),
                _ => None,
            })
            .filter(|t| !t.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        _ => String::new(),
    }
}

fn parse_search_response(body: &str, url: &str) -> Result<Vec<NewsArticle>, ScrapeError> {
    let resp: SearchResponse = serde_json::from_str(body).map_err(|source| ScrapeError::Decode {
        url: url.to_string(),
        source,
    })?;

    let articles = resp
        .found
        .into_iter()
        .filter_map(|hit| {
            let doc = hit.source?;
            let Some(link) = doc.url.filter(|u| !u.is_empty()) else {
                debug!("Vedomosti hit without url; skipping");
                return None;
            };
            let text = boxes_text(&doc.boxes);
            Some(NewsArticle {
                url: link,
                title: clean_text(doc.title.as_deref()),
                body: clean_text(Some(&text)),
                date: doc.published_at.as_deref().and_then(parse_date_prefix),
                parser: NAME.to_string(),
            })
        })
        .collect();
    Ok(articles)
}

#[async_trait]
impl SourceAdapter for Vedomosti {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::stub::RoutedTransport;
    use crate::http::{HttpResponse, RetryPolicy};
    use chrono::NaiveDate;
    use serde_json::json;
    use std::sync::Arc;

    fn whoosh_q1() -> CompanyDateRange {
        CompanyDateRange::new(
            "Whoosh",
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
        )
    }

    fn hit(url: &str, published_at: &str) -> Value {
        json!({"source": {
            "url": url,
            "title": "Whoosh\u{a0}news",
            "boxes": [{"type": "paragraph", "text": "First\u{a0}part."}, {"type": "image"}, "Second part."],
            "published_at": published_at
        }})
    }

    #[test]
    fn test_boxes_text_variants() {
        assert_eq!(boxes_text(&json!("plain")), "plain");
        assert_eq!(
            boxes_text(&json!([{"text": "a"}, "b", {"src": "img.png"}, 3])),
            "a b"
        );
        assert_eq!(boxes_text(&Value::Null), "");
    }

    #[test]
    fn test_parse_search_response() {
        let body = json!({"found": [
            hit("https://www.vedomosti.ru/a/1", "2024-02-10T09:00:00.000+03:00"),
            {"source": {"title": "no url"}},
            {"score": 1.0}
        ]})
        .to_string();

        let articles = parse_search_response(&body, SEARCH_URL).unwrap();

        assert_eq!(articles.len(), 1);
        let a = &articles[0];
        assert_eq!(a.url, "https://www.vedomosti.ru/a/1");
        assert_eq!(a.title, "Whoosh news");
        assert_eq!(a.body, "First part. Second part.");
        assert_eq!(a.date, NaiveDate::from_ymd_opt(2024, 2, 10));
        assert_eq!(a.parser, "Vedomosti");
    }

    #[test]
    fn test_search_request_params() {
        let req = search_request(&whoosh_q1(), 40);
        assert_eq!(req.param_value("query"), Some("Whoosh"));
        assert_eq!(req.param_value("date_from"), Some("2024-01-01"));
        assert_eq!(req.param_value("date_to"), Some("2024-03-31"));
        assert_eq!(req.param_value("limit"), Some("20"));
        assert_eq!(req.param_value("from"), Some("40"));
    }

    #[tokio::test]
    async fn test_run_stops_on_page_without_new_urls() {
        // The API keeps returning the same page; the repeat must end the search.
        let transport = Arc::new(RoutedTransport::new(|_| {
            Ok(HttpResponse::ok(
                json!({"found": [
                    hit("https://www.vedomosti.ru/a/1", "2024-02-10T09:00:00+03:00"),
                    hit("https://www.vedomosti.ru/a/2", "2024-05-10T09:00:00+03:00")
                ]})
                .to_string(),
            ))
        }));
        let scraper = Vedomosti::new(Fetcher::new(transport.clone(), RetryPolicy::immediate(5)))
            .with_page_delay(Duration::ZERO);

        let articles = scraper.run(&whoosh_q1()).await.unwrap();

        assert_eq!(transport.seen().len(), 2);
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].url, "https://www.vedomosti.ru/a/1");
        assert!(articles.iter().all(|a| a.parser == scraper.name()));
    }

    #[tokio::test]
    async fn test_run_fails_on_malformed_json() {
        let transport = Arc::new(RoutedTransport::new(|_| Ok(HttpResponse::ok("<html>blocked</html>"))));
        let scraper = Vedomosti::new(Fetcher::new(transport, RetryPolicy::immediate(5)))
            .with_page_delay(Duration::ZERO);

        let err = scraper.run(&whoosh_q1()).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Decode { .. }));
    }
}
