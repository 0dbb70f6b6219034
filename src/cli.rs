//! Command-line interface definitions for the ESG news scraper.
//!
//! All arguments can be provided via command-line flags; the paths that are
//! usually fixed per deployment also accept environment variables.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Scrape ESG news for rated companies, merge results, score articles.
///
/// # Examples
///
/// ```sh
/// # Scrape every rated company in the catalog with 3 parallel tasks
/// esg_news scrape --catalog request.csv
///
/// # Re-merge partial files from an earlier run
/// esg_news merge data/parse_run_20240301_101500/*_Forbes_*.csv -o merged.csv
///
/// # Score one article against environmental criteria
/// esg_news score --criteria criteria.json --input input.txt
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scrape all sources for every rated company in the catalog
    Scrape(ScrapeArgs),
    /// Merge existing partial result files
    Merge(MergeArgs),
    /// Score an article with an LLM judge
    Score(ScoreArgs),
}

#[derive(Args, Debug)]
pub struct ScrapeArgs {
    /// Request catalog (company, year, has_rating, source)
    #[arg(short, long, env = "ESG_CATALOG", default_value = "request.csv")]
    pub catalog: PathBuf,

    /// Root directory for run output (overrides the config file)
    #[arg(short, long, env = "ESG_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Number of tasks in flight (overrides the config file)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Optional path to scraper.yaml
    #[arg(long, env = "ESG_SCRAPER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Hide the progress bar
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Partial result files, merged in the given order
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Merged output path
    #[arg(short, long)]
    pub output: PathBuf,

    /// Skip inputs smaller than this many bytes
    #[arg(long, default_value_t = crate::outputs::merge::MIN_FILE_BYTES)]
    pub min_file_bytes: u64,
}

#[derive(Args, Debug)]
pub struct ScoreArgs {
    /// Scoring criteria JSON
    #[arg(long, default_value = "criteria.json")]
    pub criteria: PathBuf,

    /// Article text
    #[arg(short, long, default_value = "input.txt")]
    pub input: PathBuf,

    /// Where the report is saved
    #[arg(short, long, default_value = "output.txt")]
    pub output: PathBuf,

    /// Optional path to llm.yaml
    #[arg(long, env = "ESG_LLM_CONFIG")]
    pub llm_config: Option<PathBuf>,

    /// LLM API key, used when the config file has none
    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Print the raw judge reply
    #[arg(long)]
    pub debug: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scrape_parsing() {
        let cli = Cli::parse_from([
            "esg_news",
            "scrape",
            "--catalog",
            "companies.csv",
            "-w",
            "5",
            "--quiet",
        ]);

        let Command::Scrape(args) = cli.command else {
            panic!("expected scrape");
        };
        assert_eq!(args.catalog, PathBuf::from("companies.csv"));
        assert_eq!(args.workers, Some(5));
        assert!(args.quiet);
    }

    #[test]
    fn test_merge_requires_files() {
        assert!(Cli::try_parse_from(["esg_news", "merge", "-o", "out.csv"]).is_err());

        let cli = Cli::parse_from(["esg_news", "merge", "a.csv", "b.csv", "-o", "out.csv"]);
        let Command::Merge(args) = cli.command else {
            panic!("expected merge");
        };
        assert_eq!(args.files.len(), 2);
        assert_eq!(args.min_file_bytes, 10);
    }

    #[test]
    fn test_score_defaults() {
        let cli = Cli::parse_from(["esg_news", "score", "--debug"]);
        let Command::Score(args) = cli.command else {
            panic!("expected score");
        };
        assert_eq!(args.criteria, PathBuf::from("criteria.json"));
        assert_eq!(args.input, PathBuf::from("input.txt"));
        assert_eq!(args.output, PathBuf::from("output.txt"));
        assert!(args.debug);
    }
}
