//! Request catalog loading.
//!
//! The catalog is a headerless, comma-separated file with one row per
//! company/year:
//!
//! ```text
//! company,year_suffix,has_rating,source
//! Whoosh,24,TRUE,Новости
//! ```
//!
//! Only rows with a truthy rating flag and the news category label become work
//! items. A two-digit year suffix is read as `20xx`; each work item spans the
//! whole calendar year.

use crate::error::CatalogError;
use crate::models::CompanyDateRange;
use chrono::NaiveDate;
use csv::StringRecord;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

/// Category labels that mark a row as a news request.
pub const NEWS_LABELS: &[&str] = &["Новости", "News"];

fn parse_year(raw: &str) -> Option<i32> {
    let raw = raw.trim();
    let year: i32 = raw.parse().ok()?;
    match raw.len() {
        1 | 2 => Some(2000 + year),
        4 => Some(year),
        _ => None,
    }
}

/// Turn one catalog row into a work item, if it qualifies.
pub fn parse_row(record: &StringRecord) -> Option<CompanyDateRange> {
    if record.len() != 4 {
        warn!(fields = record.len(), row = ?record, "Catalog row does not have 4 columns; skipping");
        return None;
    }
    let company = record[0].trim();
    let has_rating = record[2].trim().eq_ignore_ascii_case("TRUE");
    let is_news = NEWS_LABELS.contains(&record[3].trim());
    if company.is_empty() || !has_rating || !is_news {
        return None;
    }

    let Some(year) = parse_year(&record[1]) else {
        warn!(%company, year = &record[1], "Unparseable year in catalog row; skipping");
        return None;
    };
    let start_date = NaiveDate::from_ymd_opt(year, 1, 1)?;
    let end_date = NaiveDate::from_ymd_opt(year, 12, 31)?;
    Some(CompanyDateRange::new(company, start_date, end_date))
}

/// Parse catalog contents already in memory.
pub fn parse_catalog(contents: &str) -> Result<Vec<CompanyDateRange>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(contents.as_bytes());

    let mut requests = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(request) = parse_row(&record) {
            debug!(%request, "Catalog request");
            requests.push(request);
        }
    }
    Ok(requests)
}

/// Load all news requests from the catalog file at `path`.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn read_news_requests(path: &Path) -> Result<Vec<CompanyDateRange>, CatalogError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let requests = parse_catalog(&contents).map_err(|source| CatalogError::Csv {
        path: path.to_path_buf(),
        source,
    })?;
    info!(count = requests.len(), "Loaded news requests");
    Ok(requests)
}
