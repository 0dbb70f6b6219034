//! Tabular output: per-task partial files and the merged dataset.
//!
//! # Submodules
//!
//! - [`partial`]: writes one TSV per (company, source) task into the run directory
//! - [`merge`]: concatenates partial files into `merged_results.csv`
//!
//! # Output Structure
//!
//! ```text
//! output_dir/
//! └── parse_run_20240301_101500/
//!     ├── Whoosh_Forbes_2024-01-01_2024-12-31.csv
//!     ├── Whoosh_Kommersant_2024-01-01_2024-12-31.csv
//!     └── merged_results.csv
//! ```
//!
//! # Format
//!
//! Both file kinds share one format: TAB-delimited, every field wrapped in
//! double quotes, header `link pubdate article_body title parser keyword`.
//! The `.csv` extension is kept for compatibility with existing consumers.

pub mod merge;
pub mod partial;

/// Column names, in file order.
pub const HEADER: [&str; 6] = ["link", "pubdate", "article_body", "title", "parser", "keyword"];

/// Rows written before the `keyword` column existed.
pub const LEGACY_WIDTH: usize = 5;

fn tsv_writer<W: std::io::Write>(inner: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .delimiter(b'\t')
        .quote(b'"')
        .quote_style(csv::QuoteStyle::Always)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(inner)
}

fn tsv_reader<R: std::io::Read>(inner: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .quote(b'"')
        .has_headers(false)
        .flexible(true)
        .from_reader(inner)
}
