//! Parallel run coordinator.
//!
//! Fans every (work item × source) pair out onto a bounded pool of tokio
//! tasks, writes a partial file for each task that found articles, and keeps a
//! running progress count. A task that errors or panics is logged and counted;
//! it never affects the others.
//!
//! ```text
//! requests × sources ──► buffer_unordered(max_workers) ──► tokio::spawn(task)
//!                                                             │
//!                         RunReport ◄── progress + paths ◄────┘
//! ```

use crate::error::TaskError;
use crate::models::CompanyDateRange;
use crate::outputs::partial::PartialWriter;
use crate::scrapers::SourceAdapter;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Default number of tasks in flight.
pub const DEFAULT_MAX_WORKERS: usize = 3;

/// Summary of one coordinator run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Partial files written, in completion order.
    pub paths: Vec<PathBuf>,
    /// Tasks scheduled: requests × sources.
    pub total: usize,
    /// Tasks finished, successfully or not.
    pub completed: usize,
    pub failed: usize,
    pub articles: usize,
    /// Status line of the most recently finished task.
    pub last_status: String,
}

enum TaskOutcome {
    Written { path: PathBuf, count: usize },
    Empty,
}

#[derive(Debug)]
pub struct Coordinator {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    writer: Arc<PartialWriter>,
    max_workers: usize,
    progress: ProgressBar,
}

/// Progress bar for an interactive run.
pub fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("Parsing articles {bar:40.cyan/blue} {pos}/{len} [{elapsed_precise}] {msg}")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}

async fn run_task(
    adapter: Arc<dyn SourceAdapter>,
    request: CompanyDateRange,
    writer: Arc<PartialWriter>,
) -> Result<TaskOutcome, TaskError> {
    let articles = adapter.run(&request).await?;
    if articles.is_empty() {
        return Ok(TaskOutcome::Empty);
    }
    let path = writer.write(&request, adapter.name(), &articles).await?;
    Ok(TaskOutcome::Written {
        path,
        count: articles.len(),
    })
}

impl Coordinator {
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>, writer: Arc<PartialWriter>) -> Self {
        Self {
            adapters,
            writer,
            max_workers: DEFAULT_MAX_WORKERS,
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Run every source for every request and return the partial files written.
    ///
    /// # Arguments
    ///
    /// * `requests` - Work items; each is paired with every adapter
    ///
    /// # Returns
    ///
    /// A [`RunReport`] with one path per task that wrote a file. Failed and
    /// panicked tasks are counted but never abort the run.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let report = Coordinator::new(adapters, writer)
    ///     .with_max_workers(3)
    ///     .run(&requests)
    ///     .await;
    /// println!("{} of {} tasks wrote files", report.paths.len(), report.total);
    /// ```
    #[instrument(level = "info", skip_all, fields(requests = requests.len(), sources = self.adapters.len()))]
    pub async fn run(&self, requests: &[CompanyDateRange]) -> RunReport {
        let jobs: Vec<(CompanyDateRange, Arc<dyn SourceAdapter>)> = requests
            .iter()
            .flat_map(|request| {
                self.adapters
                    .iter()
                    .map(move |adapter| (request.clone(), Arc::clone(adapter)))
            })
            .collect();

        let mut report = RunReport {
            total: jobs.len(),
            ..RunReport::default()
        };
        info!(total = report.total, max_workers = self.max_workers, "Starting parsing tasks");
        self.progress.set_length(report.total as u64);

        let mut finished = stream::iter(jobs)
            .map(|(request, adapter)| {
                let writer = Arc::clone(&self.writer);
                async move {
                    let source = adapter.name();
                    let company = request.company.clone();
                    let joined = tokio::spawn(run_task(adapter, request, writer)).await;
                    let outcome = joined.unwrap_or_else(|e| Err(TaskError::Panicked(e.to_string())));
                    (company, source, outcome)
                }
            })
            .buffer_unordered(self.max_workers);

        while let Some((company, source, outcome)) = finished.next().await {
            report.completed += 1;
            let status = match outcome {
                Ok(TaskOutcome::Written { path, count }) => {
                    report.articles += count;
                    report.paths.push(path);
                    format!("{company} ({source}): {count} articles")
                }
                Ok(TaskOutcome::Empty) => format!("{company} ({source}): 0 articles"),
                Err(e) => {
                    report.failed += 1;
                    error!(%company, source, error = %e, "Task failed");
                    format!("Error processing {company} with {source}: {e}")
                }
            };

            self.progress.inc(1);
            self.progress.set_message(status.clone());
            info!(completed = report.completed, total = report.total, %status, "Task finished");
            report.last_status = status;
        }

        self.progress.finish_and_clear();
        info!(
            files = report.paths.len(),
            articles = report.articles,
            failed = report.failed,
            "Completed parsing"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScrapeError;
    use crate::models::NewsArticle;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixedAdapter {
        name: &'static str,
        per_request: usize,
    }

    #[async_trait]
    impl SourceAdapter for FixedAdapter {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn run(&self, request: &CompanyDateRange) -> Result<Vec<NewsArticle>, ScrapeError> {
            Ok((0..self.per_request)
                .map(|i| NewsArticle {
                    url: format!("https://example.com/{}/{i}", request.company),
                    title: format!("Story {i}"),
                    body: "body".to_string(),
                    date: Some(request.start_date),
                    parser: self.name.to_string(),
                })
                .collect())
        }
    }

    struct FailingAdapter;

    #[async_trait]
    impl SourceAdapter for FailingAdapter {
        fn name(&self) -> &'static str {
            "Failing"
        }

        async fn run(&self, request: &CompanyDateRange) -> Result<Vec<NewsArticle>, ScrapeError> {
            Err(ScrapeError::Structure {
                url: format!("https://example.com/search?q={}", request.company),
                reason: "no results container".to_string(),
            })
        }
    }

    struct PanickingAdapter;

    #[async_trait]
    impl SourceAdapter for PanickingAdapter {
        fn name(&self) -> &'static str {
            "Panicking"
        }

        async fn run(&self, _request: &CompanyDateRange) -> Result<Vec<NewsArticle>, ScrapeError> {
            panic!("selector blew up");
        }
    }

    struct SlowAdapter {
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SourceAdapter for SlowAdapter {
        fn name(&self) -> &'static str {
            "Slow"
        }

        async fn run(&self, _request: &CompanyDateRange) -> Result<Vec<NewsArticle>, ScrapeError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    fn requests(companies: &[&str]) -> Vec<CompanyDateRange> {
        companies
            .iter()
            .map(|c| {
                CompanyDateRange::new(
                    *c,
                    NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
                    NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_failing_tasks_do_not_affect_others() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = Arc::new(PartialWriter::new(tmp.path()));
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
            Arc::new(FixedAdapter { name: "Forbes", per_request: 2 }),
            Arc::new(FailingAdapter),
            Arc::new(PanickingAdapter),
        ];

        let report = Coordinator::new(adapters, writer)
            .with_max_workers(3)
            .run(&requests(&["Acme", "Beta"]))
            .await;

        assert_eq!(report.total, 6);
        assert_eq!(report.completed, 6);
        assert_eq!(report.failed, 4);
        assert_eq!(report.articles, 4);
        assert_eq!(report.paths.len(), 2);
        assert!(report.paths.iter().all(|p| p.exists()));
    }

    #[tokio::test]
    async fn test_single_failure_among_n_tasks() {
        let tmp = tempfile::tempdir().unwrap();
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
            Arc::new(FixedAdapter { name: "Forbes", per_request: 1 }),
            Arc::new(FixedAdapter { name: "Vedomosti", per_request: 3 }),
            Arc::new(FailingAdapter),
        ];

        let report = Coordinator::new(adapters, Arc::new(PartialWriter::new(tmp.path())))
            .run(&requests(&["Acme"]))
            .await;

        assert_eq!(report.completed, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.paths.len(), 2);
        assert_eq!(report.articles, 4);
    }

    #[tokio::test]
    async fn test_empty_results_write_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = Arc::new(PartialWriter::new(tmp.path()));
        let adapters: Vec<Arc<dyn SourceAdapter>> =
            vec![Arc::new(FixedAdapter { name: "Kommersant", per_request: 0 })];

        let report = Coordinator::new(adapters, Arc::clone(&writer))
            .run(&requests(&["Acme"]))
            .await;

        assert_eq!(report.completed, 1);
        assert!(report.paths.is_empty());
        assert_eq!(report.last_status, "Acme (Kommersant): 0 articles");
        assert!(writer.existing_run_dir().is_none());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let tmp = tempfile::tempdir().unwrap();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(SlowAdapter {
            in_flight: Arc::clone(&in_flight),
            peak: Arc::clone(&peak),
        })];

        let report = Coordinator::new(adapters, Arc::new(PartialWriter::new(tmp.path())))
            .with_max_workers(2)
            .run(&requests(&["A", "B", "C", "D", "E", "F"]))
            .await;

        assert_eq!(report.completed, 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_companies_with_same_file_name_keep_their_rows() {
        use crate::outputs::merge::{MIN_FILE_BYTES, merge_results};

        let tmp = tempfile::tempdir().unwrap();
        let adapters: Vec<Arc<dyn SourceAdapter>> =
            vec![Arc::new(FixedAdapter { name: "Forbes", per_request: 1 })];

        let report = Coordinator::new(adapters, Arc::new(PartialWriter::new(tmp.path())))
            .run(&requests(&["Acme Corp", "Acme_Corp", "Acme Corp"]))
            .await;

        let mut unique = report.paths.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 3);

        let merged_path = tmp.path().join("merged.csv");
        let merged = merge_results(&report.paths, &merged_path, MIN_FILE_BYTES)
            .await
            .unwrap();
        assert_eq!(merged.rows, 3);
        let merged = std::fs::read_to_string(&merged_path).unwrap();
        assert_eq!(merged.matches("https://example.com/Acme Corp/0").count(), 2);
        assert_eq!(merged.matches("https://example.com/Acme_Corp/0").count(), 1);
    }

    #[tokio::test]
    async fn test_partial_files_are_tagged_with_source_and_company() {
        let tmp = tempfile::tempdir().unwrap();
        let adapters: Vec<Arc<dyn SourceAdapter>> =
            vec![Arc::new(FixedAdapter { name: "Vedomosti", per_request: 1 })];

        let report = Coordinator::new(adapters, Arc::new(PartialWriter::new(tmp.path())))
            .run(&requests(&["Acme"]))
            .await;

        let path = &report.paths[0];
        assert!(path.ends_with("Acme_Vedomosti_2023-01-01_2023-12-31.csv"));
        let contents = std::fs::read_to_string(path).unwrap();
        assert!(contents.contains("\"Vedomosti\"\t\"Acme\""));
        assert_eq!(report.last_status, "Acme (Vedomosti): 1 articles");
    }
}
