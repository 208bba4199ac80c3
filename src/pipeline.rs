//! The pipeline driver: composes catalog traversal, mailbox streaming,
//! cursor-gated dispatch, and the importer into one sequential run.
//!
//! The run is a state machine `NotStarted → Traversing(item) →
//! Streaming(item, record) → Done | Aborted`, realized as the loop below:
//! the outer loop traverses work items in catalog order, the inner loop
//! streams records and assigns each a strictly increasing global index.
//! Strict sequential order is what keeps "resume from index N"
//! unambiguous across accounts and files.
//!
//! Failure isolation, smallest unit first: a bad message fails that
//! message, an unreadable file fails that item, a rejected authorization
//! fails that account's items — only a catalog failure or every account
//! failing authorization aborts the run.

use tracing::{info, warn};

use crate::config::PerformanceConfig;
use crate::error::{ImportError, Result};
use crate::importer::{ClientFactory, Importer, MailboxClient};
use crate::model::{ImportStatus, MessageRecord, RunSummary, WorkItem};
use crate::parser::mbox::MboxFile;

/// Progress notifications for the caller's display layer.
#[derive(Debug)]
pub enum ProgressEvent<'a> {
    /// Starting to stream one work item.
    ItemStarted {
        position: usize,
        total: usize,
        item: &'a WorkItem,
        file_size: u64,
    },
    /// One message reached a final status.
    Message {
        item: &'a WorkItem,
        global_index: u64,
        status: ImportStatus,
    },
    /// One work item failed as a unit (no or partial streaming).
    ItemFailed { item: &'a WorkItem, detail: String },
}

pub type ProgressFn<'a> = &'a dyn Fn(ProgressEvent<'_>);

/// Drives one import run. Owns the summary for the duration of the run
/// and returns it; no state survives the call.
pub struct PipelineDriver<'a> {
    factory: &'a dyn ClientFactory,
    importer: Importer,
    performance: PerformanceConfig,
}

impl<'a> PipelineDriver<'a> {
    pub fn new(
        factory: &'a dyn ClientFactory,
        importer: Importer,
        performance: PerformanceConfig,
    ) -> Self {
        Self {
            factory,
            importer,
            performance,
        }
    }

    /// Process the whole catalog in order.
    ///
    /// Returns the run summary on `Done`. Returns `Err` only for abort
    /// conditions: the catalog itself failing is handled by the caller
    /// (it never gets here), and every account failing authorization is
    /// detected at the end of traversal.
    pub fn run(&self, catalog: &[WorkItem], progress: Option<ProgressFn<'_>>) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut next_index: u64 = 0;

        // Client for the account currently being traversed; `None` inside
        // the option means authorization failed and the account's
        // remaining items fail without streaming.
        let mut current: Option<(String, Option<Box<dyn MailboxClient>>)> = None;
        let mut accounts_seen: usize = 0;
        let mut accounts_failed: usize = 0;

        for (position, item) in catalog.iter().enumerate() {
            if current.as_ref().map(|(a, _)| a.as_str()) != Some(item.account.as_str()) {
                accounts_seen += 1;
                let client = match self.factory.for_account(&item.account) {
                    Ok(client) => Some(client),
                    Err(e) => {
                        accounts_failed += 1;
                        warn!(account = %item.account, reason = %e, "Account authorization failed");
                        None
                    }
                };
                current = Some((item.account.clone(), client));
            }

            let client = match current.as_mut().and_then(|(_, c)| c.as_mut()) {
                Some(client) => client,
                None => {
                    let detail = "account not authorized".to_string();
                    self.fail_item(&mut summary, item, &detail, progress);
                    continue;
                }
            };

            let mbox = match MboxFile::open(&item.source) {
                Ok(mbox) => mbox.with_limits(
                    self.performance.read_buffer_size,
                    self.performance.max_message_size,
                ),
                Err(e) => {
                    self.fail_item(&mut summary, item, &e.to_string(), progress);
                    continue;
                }
            };

            if let Some(cb) = progress {
                cb(ProgressEvent::ItemStarted {
                    position,
                    total: catalog.len(),
                    item,
                    file_size: mbox.file_size(),
                });
            }
            info!(
                account = %item.account,
                label = %item.label(),
                source = %item.source.display(),
                "Processing work item"
            );

            let records = match mbox.messages() {
                Ok(records) => records,
                Err(e) => {
                    self.fail_item(&mut summary, item, &e.to_string(), progress);
                    continue;
                }
            };

            for result in records {
                let raw = match result {
                    Ok(raw) => raw,
                    Err(e) => {
                        // Mid-file read failure: the rest of the file is
                        // unreachable, so the item fails as a whole.
                        self.fail_item(&mut summary, item, &e.to_string(), progress);
                        break;
                    }
                };

                let mut record = MessageRecord {
                    ordinal: raw.ordinal,
                    global_index: next_index,
                    raw: raw.bytes,
                    malformed: raw.malformed,
                };
                next_index += 1;

                let outcome = self.importer.import(client.as_mut(), item, &mut record);
                summary.record(record.global_index, &outcome);
                if let Some(cb) = progress {
                    cb(ProgressEvent::Message {
                        item,
                        global_index: record.global_index,
                        status: outcome.status,
                    });
                }
            }
        }

        if accounts_seen > 0 && accounts_failed == accounts_seen {
            return Err(ImportError::AllAccountsFailed {
                count: accounts_failed,
            });
        }

        info!(
            imported = summary.imported,
            skipped_resume = summary.skipped_resume,
            failed_retryable = summary.failed_retryable,
            failed_fatal = summary.failed_fatal,
            failed_items = summary.failed_items,
            highest_imported_index = summary.highest_imported_index,
            bytes_uploaded = summary.bytes_uploaded,
            "Run complete"
        );
        Ok(summary)
    }

    fn fail_item(
        &self,
        summary: &mut RunSummary,
        item: &WorkItem,
        detail: &str,
        progress: Option<ProgressFn<'_>>,
    ) {
        warn!(
            account = %item.account,
            label = %item.label(),
            source = %item.source.display(),
            detail,
            "Work item failed as a unit"
        );
        summary.record_failed_item();
        if let Some(cb) = progress {
            cb(ProgressEvent::ItemFailed {
                item,
                detail: detail.to_string(),
            });
        }
    }
}
