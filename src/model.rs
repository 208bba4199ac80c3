//! Core data model for the import pipeline: work items, message records,
//! per-message outcomes, and the run summary.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One unit of discoverable work: a single mbox file destined for one
/// label of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Full mailbox identity the messages import into (e.g. `alice@example.com`).
    pub account: String,

    /// Nested label hierarchy, outermost first. Segments never carry the
    /// `.mbox` suffix and are never empty.
    pub label_path: Vec<String>,

    /// Absolute path of the mbox file to read.
    pub source: PathBuf,
}

impl WorkItem {
    /// Label path joined with `/`, the platform's nesting separator.
    pub fn label(&self) -> String {
        self.label_path.join("/")
    }
}

/// One raw message streamed out of a [`WorkItem`]'s source file.
///
/// Constructed on demand by the mailbox reader, consumed exactly once by
/// the importer, never persisted.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    /// 0-based position within the owning item's source file.
    pub ordinal: u64,

    /// 0-based position within the full concatenation of all items'
    /// messages in catalog order. This is the value operators pass back
    /// via `--from-message`.
    pub global_index: u64,

    /// The message as stored in the mbox file, including its own headers
    /// and the leading `From ` separator line.
    pub raw: Vec<u8>,

    /// Why the payload cannot be treated as an internet message, if it
    /// cannot. A malformed record is reported, never uploaded.
    pub malformed: Option<String>,
}

impl MessageRecord {
    pub fn is_well_formed(&self) -> bool {
        self.malformed.is_none()
    }
}

/// Final status of one import attempt sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportStatus {
    /// The remote accepted the message.
    Imported,
    /// Below the resume index; no remote call was made.
    SkippedResume,
    /// Transient failures exhausted the retry budget.
    FailedRetryable,
    /// Permanent rejection, parse failure, or item/account-level failure.
    FailedFatal,
}

/// Result of attempting to import one message (or, for item-level
/// failures, one whole work item).
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub status: ImportStatus,
    /// Number of remote calls made.
    pub attempts: u32,
    /// Payload bytes the remote accepted (zero unless imported).
    pub bytes: u64,
    /// Diagnostic text for logging.
    pub detail: String,
}

impl ImportOutcome {
    pub fn imported(attempts: u32, bytes: u64) -> Self {
        Self {
            status: ImportStatus::Imported,
            attempts,
            bytes,
            detail: format!("imported ({bytes} bytes)"),
        }
    }

    pub fn skipped() -> Self {
        Self {
            status: ImportStatus::SkippedResume,
            attempts: 0,
            bytes: 0,
            detail: "below resume index".to_string(),
        }
    }

    pub fn retryable(attempts: u32, detail: impl Into<String>) -> Self {
        Self {
            status: ImportStatus::FailedRetryable,
            attempts,
            bytes: 0,
            detail: detail.into(),
        }
    }

    pub fn fatal(attempts: u32, detail: impl Into<String>) -> Self {
        Self {
            status: ImportStatus::FailedFatal,
            attempts,
            bytes: 0,
            detail: detail.into(),
        }
    }
}

/// Aggregate accounting for one run, owned by the pipeline driver and
/// returned to the caller when the run ends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    /// Messages accepted by the remote.
    pub imported: u64,
    /// Messages skipped because they sit below the resume index.
    pub skipped_resume: u64,
    /// Messages that exhausted the retry budget.
    pub failed_retryable: u64,
    /// Messages (or whole items) that failed permanently.
    pub failed_fatal: u64,
    /// Work items that failed as a unit (unreadable file, unauthorized
    /// account). Their unread messages are not counted above.
    pub failed_items: u64,
    /// Highest global index that was successfully imported, if any. A
    /// re-run should resume from this value plus one.
    pub highest_imported_index: Option<u64>,
    /// Total payload bytes accepted by the remote.
    pub bytes_uploaded: u64,
}

impl RunSummary {
    /// Fold one per-message outcome into the counters.
    pub fn record(&mut self, global_index: u64, outcome: &ImportOutcome) {
        match outcome.status {
            ImportStatus::Imported => {
                self.imported += 1;
                self.bytes_uploaded += outcome.bytes;
                self.highest_imported_index = Some(
                    self.highest_imported_index
                        .map_or(global_index, |h| h.max(global_index)),
                );
            }
            ImportStatus::SkippedResume => self.skipped_resume += 1,
            ImportStatus::FailedRetryable => self.failed_retryable += 1,
            ImportStatus::FailedFatal => self.failed_fatal += 1,
        }
    }

    /// Record a work item that failed as a unit before streaming.
    pub fn record_failed_item(&mut self) {
        self.failed_items += 1;
        self.failed_fatal += 1;
    }

    /// Total number of outcomes recorded.
    pub fn total(&self) -> u64 {
        self.imported + self.skipped_resume + self.failed_retryable + self.failed_fatal
    }

    /// True when nothing failed; governs the process exit code.
    pub fn is_clean(&self) -> bool {
        self.failed_retryable == 0 && self.failed_fatal == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_join() {
        let item = WorkItem {
            account: "alice@example.com".into(),
            label_path: vec!["Archive".into(), "2020".into()],
            source: PathBuf::from("/tmp/2020.mbox"),
        };
        assert_eq!(item.label(), "Archive/2020");
    }

    #[test]
    fn test_summary_tracks_highest_imported() {
        let mut summary = RunSummary::default();
        summary.record(4, &ImportOutcome::imported(1, 100));
        summary.record(2, &ImportOutcome::imported(1, 100));
        summary.record(7, &ImportOutcome::fatal(1, "permanent rejection"));
        assert_eq!(summary.highest_imported_index, Some(4));
        assert_eq!(summary.imported, 2);
        assert_eq!(summary.failed_fatal, 1);
        assert!(!summary.is_clean());
    }

    #[test]
    fn test_summary_clean_with_skips() {
        let mut summary = RunSummary::default();
        summary.record(0, &ImportOutcome::skipped());
        summary.record(1, &ImportOutcome::imported(1, 10));
        assert!(summary.is_clean());
        assert_eq!(summary.total(), 2);
    }
}
