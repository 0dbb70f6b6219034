//! Per-task partial result files.
//!
//! Every (company, source) task that found articles gets its own file, so
//! concurrent tasks never contend for a path. All files of one run live in a
//! `parse_run_<timestamp>` directory that is created by whichever task writes
//! first.

use super::{HEADER, tsv_writer};
use crate::error::WriteError;
use crate::models::{CompanyDateRange, NewsArticle};
use chrono::Local;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;
use tokio::sync::OnceCell;
use tracing::{error, info, instrument, warn};

/// Contents written in place of a partial file that could not be encoded or
/// written. The merger reads it as a header-only file.
pub const ERROR_PLACEHOLDER: &str = "Error during parsing";

/// Writes partial result files into one lazily created run directory.
#[derive(Debug)]
pub struct PartialWriter {
    output_root: PathBuf,
    run_dir: OnceCell<PathBuf>,
    /// File names already handed out in this run.
    claimed: Mutex<HashSet<String>>,
}

impl PartialWriter {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            run_dir: OnceCell::new(),
            claimed: Mutex::new(HashSet::new()),
        }
    }

    /// The run directory, created on first use. Concurrent callers wait for the
    /// first one and then all see the same path.
    pub async fn run_dir(&self) -> Result<&Path, WriteError> {
        let dir = self
            .run_dir
            .get_or_try_init(|| async {
                let stamp = Local::now().format("%Y%m%d_%H%M%S");
                let dir = self.output_root.join(format!("parse_run_{stamp}"));
                fs::create_dir_all(&dir)
                    .await
                    .map_err(|source| WriteError::RunDir {
                        path: dir.clone(),
                        source,
                    })?;
                info!(path = %dir.display(), "Created run directory");
                Ok::<_, WriteError>(dir)
            })
            .await?;
        Ok(dir.as_path())
    }

    /// Reserve `name`, or `name` with a `_2`, `_3`, ... suffix before the
    /// extension when an earlier task already took it.
    fn claim(&self, name: &str) -> String {
        let mut claimed = self.claimed.lock().unwrap_or_else(|e| e.into_inner());
        if claimed.insert(name.to_string()) {
            return name.to_string();
        }
        let (stem, ext) = name.rsplit_once('.').unwrap_or((name, "csv"));
        let mut n = 2;
        loop {
            let candidate = format!("{stem}_{n}.{ext}");
            if claimed.insert(candidate.clone()) {
                warn!(%name, %candidate, "Partial file name already used in this run");
                return candidate;
            }
            n += 1;
        }
    }

    /// The run directory if some writer already created it.
    #[cfg(test)]
    pub fn existing_run_dir(&self) -> Option<&Path> {
        self.run_dir.get().map(PathBuf::as_path)
    }

    /// Write `articles` for one task and return the file path.
    ///
    /// If encoding or writing fails, a placeholder is written to the same path
    /// so the task's slot is not lost.
    ///
    /// # Arguments
    ///
    /// * `request` - The work item the articles were collected for
    /// * `source` - Source name, part of the file name
    /// * `articles` - Rows to write, in order
    ///
    /// # Returns
    ///
    /// The path of the file in the run directory. Names are unique per run,
    /// so a second task mapping to the same name gets a `_2` suffix.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let writer = PartialWriter::new("data");
    /// let path = writer.write(&request, "Forbes", &articles).await?;
    /// // data/parse_run_20240301_101500/Acme_Forbes_2023-01-01_2023-12-31.csv
    /// ```
    #[instrument(level = "info", skip_all, fields(company = %request.company, source = %source))]
    pub async fn write(
        &self,
        request: &CompanyDateRange,
        source: &str,
        articles: &[NewsArticle],
    ) -> Result<PathBuf, WriteError> {
        let path = self.run_dir().await?.join(self.claim(&file_name(request, source)));

        let outcome = match encode(articles, &request.company) {
            Ok(bytes) => fs::write(&path, bytes).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match outcome {
            Ok(()) => {
                info!(path = %path.display(), rows = articles.len(), "Wrote partial results");
            }
            Err(reason) => {
                error!(path = %path.display(), %reason, "Failed to save results; writing placeholder");
                fs::write(&path, ERROR_PLACEHOLDER)
                    .await
                    .map_err(|source| WriteError::Io {
                        path: path.clone(),
                        source,
                    })?;
            }
        }
        Ok(path)
    }
}

/// `<company>_<source>_<start>_<end>.csv` with `:`, spaces and path separators
/// replaced by `_`.
pub fn file_name(request: &CompanyDateRange, source: &str) -> String {
    format!(
        "{}_{}_{}_{}.csv",
        request.company,
        source,
        request.start_date.format("%Y-%m-%d"),
        request.end_date.format("%Y-%m-%d")
    )
    .chars()
    .map(|c| match c {
        ':' | ' ' | '/' | '\\' => '_',
        other => other,
    })
    .collect()
}

/// Collapse line breaks so a field never spans rows.
fn single_line(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

fn encode(articles: &[NewsArticle], company: &str) -> Result<Vec<u8>, csv::Error> {
    let mut writer = tsv_writer(Vec::new());
    writer.write_record(HEADER)?;
    for article in articles {
        let pubdate = article.pubdate();
        let body = single_line(&article.body);
        let title = single_line(&article.title);
        writer.write_record([
            article.url.as_str(),
            pubdate.as_str(),
            body.as_str(),
            title.as_str(),
            article.parser.as_str(),
            company,
        ])?;
    }
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}
