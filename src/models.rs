//! Data models shared by the scrapers, the writers and the merger.
//!
//! - [`CompanyDateRange`]: one work item (company + inclusive date range)
//! - [`NewsArticle`]: one scraped article, tagged with the source that produced it
//!
//! Dates are kept as [`NaiveDate`] in memory. Each scraper converts whatever its
//! source hands out (unix timestamps, ISO strings, `datetime` attributes) at its
//! own parse boundary, and the writer formats them back to `YYYY-MM-DD`.

use chrono::NaiveDate;
use std::fmt;

/// A company to search for and the inclusive range of publication dates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompanyDateRange {
    pub company: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl CompanyDateRange {
    pub fn new(company: impl Into<String>, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            company: company.into(),
            start_date,
            end_date,
        }
    }

    /// Whether `date` falls inside `[start_date, end_date]`.
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date
    }
}

impl fmt::Display for CompanyDateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{} .. {}]", self.company, self.start_date, self.end_date)
    }
}

/// A single article as produced by a source scraper.
///
/// `parser` always equals the `name()` of the scraper that built it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsArticle {
    pub url: String,
    pub title: String,
    pub body: String,
    /// Publication date, `None` when the source did not expose a parseable one.
    pub date: Option<NaiveDate>,
    pub parser: String,
}

impl NewsArticle {
    /// `pubdate` column value: `YYYY-MM-DD`, or empty when unknown.
    pub fn pubdate(&self) -> String {
        self.date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default()
    }
}

/// Parse the leading `YYYY-MM-DD` of an ISO-ish timestamp such as
/// `2024-02-01T10:15:00+03:00`.
pub fn parse_date_prefix(raw: &str) -> Option<NaiveDate> {
    let head = raw.trim().get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}
