//! Spreadsheet upload handling: token check, validating dry run, then background import.

use std::fs;
use std::sync::{Arc, LazyLock};

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::Serialize;
use tracing::{error, info};

use crate::dump::write_bytes_atomic;
use crate::error::BrokerError;
use crate::ingest::SubmissionWriter;
use crate::uploader::{SpreadsheetSubmitter, resolve_sheet_dir};
use crate::worker::{Job, JobHandler, JobQueue};

pub const VALIDATION_FAILURE: &str = "There was a problem validating your spreadsheet";
pub const UPLOAD_FAILURE: &str = "We experienced a problem while uploading your spreadsheet";
pub const SAVE_FAILURE: &str = "We experienced a problem when saving your spreadsheet";
pub const UPLOAD_SUCCESS: &str = "Your spreadsheet was uploaded and processed successfully";

/// Structured failure returned to the uploading client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    #[serde(skip)]
    pub code: u16,
    pub message: String,
    pub details: String,
}

impl Failure {
    pub fn new(code: u16, message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: details.into(),
        }
    }

    pub fn from_error(err: &BrokerError) -> Self {
        match err {
            BrokerError::MissingToken => Self::new(401, err.to_string(), ""),
            err if err.is_validation() => Self::new(400, VALIDATION_FAILURE, err.to_string()),
            err => Self::new(500, UPLOAD_FAILURE, err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadDetails {
    pub submission_url: String,
    pub submission_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadSuccess {
    pub message: String,
    pub details: UploadDetails,
}

pub struct UploadHandler<W: SubmissionWriter> {
    writer: Arc<W>,
    queue: JobQueue,
    spool_dir: Utf8PathBuf,
    list_keys: Vec<String>,
}

impl<W: SubmissionWriter + 'static> UploadHandler<W> {
    /// Starts the background importer that writes submitted spreadsheets through `writer`.
    pub fn start(writer: Arc<W>, spool_dir: Utf8PathBuf, list_keys: Vec<String>) -> Self {
        let queue = JobQueue::start(SpreadsheetImporter {
            writer: Arc::clone(&writer),
            list_keys: list_keys.clone(),
        });
        Self {
            writer,
            queue,
            spool_dir,
            list_keys,
        }
    }

    pub fn upload(
        &self,
        token: Option<&str>,
        sheet_dir: &Utf8Path,
    ) -> Result<UploadSuccess, Failure> {
        info!(%sheet_dir, "uploading spreadsheet");
        let token = token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| Failure::from_error(&BrokerError::MissingToken))?;

        let path = self.save(sheet_dir).map_err(|err| {
            error!(%err, "saving spreadsheet failed");
            Failure::new(500, SAVE_FAILURE, err.to_string())
        })?;

        info!("attempting dry run to validate spreadsheet");
        resolve_sheet_dir(&path, &self.list_keys).map_err(|err| {
            error!(%err, "spreadsheet failed validation");
            Failure::new(400, VALIDATION_FAILURE, err.to_string())
        })?;

        let submission_url = self
            .writer
            .create_submission(token)
            .map_err(|err| Failure::from_error(&err))?;
        self.queue
            .enqueue(Job::ImportSpreadsheet {
                path,
                submission_url: submission_url.clone(),
            })
            .map_err(|err| Failure::from_error(&err))?;
        info!(%submission_url, "spreadsheet import queued");

        let submission_id = submission_url
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        Ok(UploadSuccess {
            message: UPLOAD_SUCCESS.to_string(),
            details: UploadDetails {
                submission_url,
                submission_id,
            },
        })
    }

    /// Waits for queued imports to finish.
    pub fn shutdown(self) {
        self.queue.shutdown();
    }

    /// Copies the upload's sheets into a directory of its own under the spool.
    fn save(&self, sheet_dir: &Utf8Path) -> Result<Utf8PathBuf, BrokerError> {
        let name = secure_filename(sheet_dir.file_name().unwrap_or_default());
        let unique = uuid::Uuid::new_v4().simple().to_string();
        let target = if name.is_empty() {
            self.spool_dir.join(unique)
        } else {
            self.spool_dir.join(format!("{name}_{unique}"))
        };
        fs::create_dir_all(target.as_std_path())
            .map_err(|err| BrokerError::Filesystem(format!("create {target}: {err}")))?;

        let entries = fs::read_dir(sheet_dir.as_std_path())
            .map_err(|err| BrokerError::Filesystem(format!("read {sheet_dir}: {err}")))?;
        for entry in entries {
            let entry = entry.map_err(|err| BrokerError::Filesystem(err.to_string()))?;
            let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !file_name.ends_with(".tsv") {
                continue;
            }
            let content = fs::read(entry.path())
                .map_err(|err| BrokerError::Filesystem(err.to_string()))?;
            write_bytes_atomic(&target.join(file_name), &content)?;
        }
        info!(path = %target, "saved spreadsheet");
        Ok(target)
    }
}

struct SpreadsheetImporter<W: SubmissionWriter> {
    writer: Arc<W>,
    list_keys: Vec<String>,
}

impl<W: SubmissionWriter + 'static> JobHandler for SpreadsheetImporter<W> {
    fn handle(&mut self, job: Job) -> Result<(), BrokerError> {
        match job {
            Job::ImportSpreadsheet {
                path,
                submission_url,
            } => {
                let graph = resolve_sheet_dir(&path, &self.list_keys)?;
                SpreadsheetSubmitter::new(self.writer.as_ref()).submit_to(&submission_url, &graph)?;
                Ok(())
            }
            other => Err(BrokerError::Validation(format!(
                "spreadsheet importer cannot run {}",
                other.label()
            ))),
        }
    }
}

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_.-]").unwrap());

/// Reduces an uploaded name to ASCII letters, digits, `_`, `.` and `-`.
pub fn secure_filename(name: &str) -> String {
    let joined = name
        .replace(['/', '\\'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_");
    UNSAFE_CHARS
        .replace_all(&joined, "")
        .trim_matches(|c| c == '.' || c == '_')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_filename_strips_paths_and_symbols() {
        assert_eq!(secure_filename("My cool sheet.xlsx"), "My_cool_sheet.xlsx");
        assert_eq!(secure_filename("../../etc/passwd"), "etc_passwd");
        assert_eq!(secure_filename("résumé?.tsv"), "rsum.tsv");
        assert_eq!(secure_filename("???"), "");
    }

    #[test]
    fn failure_codes_follow_error_kind() {
        assert_eq!(Failure::from_error(&BrokerError::MissingToken).code, 401);
        let invalid = Failure::from_error(&BrokerError::referential("a1", "d9"));
        assert_eq!(invalid.code, 400);
        assert_eq!(invalid.message, VALIDATION_FAILURE);
        assert!(invalid.details.contains("d9"));
        let upstream = Failure::from_error(&BrokerError::IngestHttp("refused".to_string()));
        assert_eq!(upstream.code, 500);
        assert_eq!(upstream.message, UPLOAD_FAILURE);
    }
}
