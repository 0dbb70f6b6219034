//! Merge partial result files into one dataset.
//!
//! The merger is deliberately forgiving: a partial file may be missing,
//! truncated, a write-failure placeholder, or from an older run that predates
//! the `keyword` column. Bad files and rows are logged and skipped; only a
//! failure to write the merged output itself is an error.

use super::{HEADER, LEGACY_WIDTH, tsv_reader, tsv_writer};
use crate::error::MergeError;
use csv::StringRecord;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

/// Files smaller than this cannot hold a header and are skipped.
pub const MIN_FILE_BYTES: u64 = 10;

/// Name of the merged file inside the run directory.
pub const MERGED_FILE_NAME: &str = "merged_results.csv";

/// Outcome of a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub output: PathBuf,
    /// Data rows written, header excluded.
    pub rows: usize,
    /// Input paths considered.
    pub files_processed: usize,
    /// Inputs skipped entirely (missing, too small, unreadable header).
    pub files_skipped: usize,
    /// Rows kept per merged input, in input order.
    pub per_file: Vec<(PathBuf, usize)>,
}

/// Bring a row to the current 6-column schema, or reject it.
fn normalize_row(mut record: StringRecord) -> Option<StringRecord> {
    match record.len() {
        n if n == HEADER.len() => Some(record),
        LEGACY_WIDTH => {
            record.push_field("");
            Some(record)
        }
        _ => None,
    }
}

/// Read one partial file. `None` means the whole file is skipped.
async fn read_partial(path: &Path, min_file_bytes: u64) -> Option<Vec<StringRecord>> {
    let size = match fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot stat partial file; skipping");
            return None;
        }
    };
    if size < min_file_bytes {
        warn!(path = %path.display(), size, "Skipping likely invalid file");
        return None;
    }
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot read partial file; skipping");
            return None;
        }
    };

    let mut reader = tsv_reader(bytes.as_slice());
    let mut records = reader.records();
    match records.next() {
        Some(Ok(_header)) => {}
        Some(Err(e)) => {
            warn!(path = %path.display(), error = %e, "Error reading header; skipping file");
            return None;
        }
        None => {
            warn!(path = %path.display(), "Partial file has no header; skipping");
            return None;
        }
    }

    let mut rows = Vec::new();
    for (index, record) in records.enumerate() {
        let line = index + 2;
        match record {
            Ok(record) => {
                let width = record.len();
                match normalize_row(record) {
                    Some(row) => rows.push(row),
                    None => warn!(path = %path.display(), line, width, "Skipping row with wrong column count"),
                }
            }
            Err(e) => warn!(path = %path.display(), line, error = %e, "Skipping unreadable row"),
        }
    }
    Some(rows)
}

/// Merge `inputs` into `output` with a single header.
///
/// # Arguments
///
/// * `inputs` - Partial files, concatenated in order
/// * `output` - Destination, overwritten if it exists
/// * `min_file_bytes` - Files smaller than this are skipped
///
/// # Returns
///
/// A [`MergeReport`] with per-file row counts and the number of skipped files.
///
/// # Examples
///
/// ```ignore
/// let report = merge_results(&report.paths, &run_dir.join(MERGED_FILE_NAME), 10).await?;
/// info!(rows = report.rows, "Merged");
/// ```
#[instrument(level = "info", skip_all, fields(inputs = inputs.len(), output = %output.display()))]
pub async fn merge_results(
    inputs: &[PathBuf],
    output: &Path,
    min_file_bytes: u64,
) -> Result<MergeReport, MergeError> {
    let mut writer = tsv_writer(Vec::new());
    writer.write_record(HEADER)?;

    let mut report = MergeReport {
        output: output.to_path_buf(),
        files_processed: inputs.len(),
        ..MergeReport::default()
    };

    for path in inputs {
        let Some(rows) = read_partial(path, min_file_bytes).await else {
            report.files_skipped += 1;
            continue;
        };
        for row in &rows {
            writer.write_record(row)?;
        }
        debug!(path = %path.display(), rows = rows.len(), "Merged partial file");
        report.rows += rows.len();
        report.per_file.push((path.clone(), rows.len()));
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| MergeError::Csv(csv::Error::from(e.into_error())))?;
    fs::write(output, bytes).await.map_err(|source| MergeError::Io {
        path: output.to_path_buf(),
        source,
    })?;

    info!(
        rows = report.rows,
        files = report.files_processed,
        skipped = report.files_skipped,
        path = %output.display(),
        "Merged partial results"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outputs::partial::ERROR_PLACEHOLDER;

    const HEADER_LINE: &str =
        "\"link\"\t\"pubdate\"\t\"article_body\"\t\"title\"\t\"parser\"\t\"keyword\"\n";

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn read_rows(path: &Path) -> Vec<Vec<String>> {
        let bytes = std::fs::read(path).unwrap();
        tsv_reader(bytes.as_slice())
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[tokio::test]
    async fn test_mixed_widths_keep_five_and_six_field_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let contents = format!(
            "{HEADER_LINE}\
             \"u1\"\t\"2023-01-01\"\t\"body\"\t\"title\"\n\
             \"u2\"\t\"2023-01-02\"\t\"body\"\t\"title\"\t\"Forbes\"\n\
             \"u3\"\t\"2023-01-03\"\t\"body\"\t\"title\"\t\"Forbes\"\t\"Acme\"\n"
        );
        let input = write(tmp.path(), "mixed.csv", &contents);
        let output = tmp.path().join(MERGED_FILE_NAME);

        let report = merge_results(&[input.clone()], &output, MIN_FILE_BYTES)
            .await
            .unwrap();

        assert_eq!(report.rows, 2);
        assert_eq!(report.per_file, vec![(input, 2)]);
        let rows = read_rows(&output);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], HEADER.map(String::from).to_vec());
        assert_eq!(rows[1], vec!["u2", "2023-01-02", "body", "title", "Forbes", ""]);
        assert_eq!(rows[2], vec!["u3", "2023-01-03", "body", "title", "Forbes", "Acme"]);
    }

    #[tokio::test]
    async fn test_bad_files_are_skipped_and_counts_reconcile() {
        let tmp = tempfile::tempdir().unwrap();
        let good = write(
            tmp.path(),
            "good.csv",
            &format!("{HEADER_LINE}\"u1\"\t\"d\"\t\"b\"\t\"t\"\t\"Vedomosti\"\t\"Acme\"\n"),
        );
        let tiny = write(tmp.path(), "tiny.csv", "\"a\"");
        let placeholder = write(tmp.path(), "failed.csv", ERROR_PLACEHOLDER);
        let missing = tmp.path().join("missing.csv");
        let header_only = write(tmp.path(), "empty.csv", HEADER_LINE);
        let output = tmp.path().join(MERGED_FILE_NAME);

        let inputs = vec![good, tiny, placeholder, missing, header_only];
        let report = merge_results(&inputs, &output, MIN_FILE_BYTES).await.unwrap();

        assert_eq!(report.files_processed, 5);
        assert_eq!(report.files_skipped, 2);
        assert_eq!(report.rows, 1);
        assert_eq!(
            report.per_file.iter().map(|(_, n)| n).sum::<usize>(),
            report.rows
        );
        let rows = read_rows(&output);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.iter().filter(|r| r[0] == "link").count(), 1);
    }

    #[tokio::test]
    async fn test_merge_is_repeatable() {
        let tmp = tempfile::tempdir().unwrap();
        let a = write(
            tmp.path(),
            "a.csv",
            &format!("{HEADER_LINE}\"u1\"\t\"d\"\t\"b \"\"quoted\"\"\"\t\"t\"\t\"Forbes\"\t\"Acme\"\n"),
        );
        let b = write(
            tmp.path(),
            "b.csv",
            &format!("{HEADER_LINE}\"u2\"\t\"d\"\t\"tab\there\"\t\"t\"\t\"Kommersant\"\t\"Beta\"\n"),
        );
        let first = tmp.path().join("first.csv");
        let second = tmp.path().join("second.csv");

        merge_results(&[a.clone(), b.clone()], &first, MIN_FILE_BYTES).await.unwrap();
        merge_results(&[a, b], &second, MIN_FILE_BYTES).await.unwrap();

        assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&second).unwrap());
        let rows = read_rows(&first);
        assert_eq!(rows[1][2], "b \"quoted\"");
        assert_eq!(rows[2][2], "tab\there");
    }

    #[tokio::test]
    async fn test_no_inputs_still_writes_header() {
        let tmp = tempfile::tempdir().unwrap();
        let output = tmp.path().join(MERGED_FILE_NAME);

        let report = merge_results(&[], &output, MIN_FILE_BYTES).await.unwrap();

        assert_eq!(report.rows, 0);
        assert_eq!(std::fs::read_to_string(&output).unwrap(), HEADER_LINE);
    }
}
