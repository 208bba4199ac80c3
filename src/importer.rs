//! Per-message import: cursor gating, sanitizing, the remote call, and
//! the retry loop around it.
//!
//! The remote service is reached only through the [`MailboxClient`] and
//! [`ClientFactory`] traits; the Gmail implementation lives in
//! [`crate::gmail`] and tests substitute scripted fakes. Every attempt is
//! logged with enough identity (account, label, ordinal, global index)
//! to reconstruct from the log alone which message failed — the log is
//! the only durable record of progress across a run.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::ImportConfig;
use crate::cursor::Cursor;
use crate::model::{ImportOutcome, MessageRecord, WorkItem};
use crate::parser::sanitize;
use crate::retry::{Backoff, RetryPolicy};

/// Classified failure of one remote call.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Worth retrying: quota/rate-limit pushback, server-side temporary
    /// errors, network timeouts.
    #[error("transient remote error: {0}")]
    Transient(String),

    /// Will never succeed on retry: malformed message, permission
    /// denied, account not found. Retrying wastes quota and delays
    /// surfacing the real problem.
    #[error("permanent remote error: {0}")]
    Permanent(String),
}

/// Authorization failure for one account. Fatal for that account only.
#[derive(Debug, thiserror::Error)]
#[error("{reason}")]
pub struct AuthError {
    pub reason: String,
}

/// An authorized connection to one account's mailbox.
pub trait MailboxClient {
    /// Insert one raw RFC 822 message filed under `label_path`, creating
    /// the label hierarchy if absent. Returns the payload size accepted.
    fn insert(&mut self, label_path: &[String], raw: &[u8]) -> Result<u64, RemoteError>;
}

/// Produces authorized per-account clients from one credential.
pub trait ClientFactory {
    fn for_account(&self, account: &str) -> Result<Box<dyn MailboxClient>, AuthError>;
}

/// Injectable sleep so tests run the retry loop without wall-clock waits.
pub type SleepFn = Box<dyn Fn(Duration)>;

/// Imports single messages, applying the resume cursor and retry policy.
pub struct Importer {
    cursor: Cursor,
    policy: RetryPolicy,
    options: ImportConfig,
    sleep: SleepFn,
}

impl Importer {
    pub fn new(cursor: Cursor, policy: RetryPolicy, options: ImportConfig) -> Self {
        Self::with_sleep(cursor, policy, options, Box::new(std::thread::sleep))
    }

    /// Like [`Importer::new`] with a custom sleep function.
    pub fn with_sleep(
        cursor: Cursor,
        policy: RetryPolicy,
        options: ImportConfig,
        sleep: SleepFn,
    ) -> Self {
        Self {
            cursor,
            policy,
            options,
            sleep,
        }
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// Attempt to import one message, consuming its payload.
    pub fn import(
        &self,
        client: &mut dyn MailboxClient,
        item: &WorkItem,
        record: &mut MessageRecord,
    ) -> ImportOutcome {
        let account = item.account.as_str();
        let full_label = item.label();
        let label = full_label.as_str();
        let (ordinal, index) = (record.ordinal, record.global_index);

        if !self.cursor.should_process(index) {
            debug!(account, label, ordinal, index, "Skipping (below resume index)");
            return ImportOutcome::skipped();
        }

        if let Some(reason) = record.malformed.clone() {
            warn!(
                account,
                label,
                ordinal,
                index,
                reason = %reason,
                "Malformed message, not submitting"
            );
            return ImportOutcome::fatal(0, format!("parse error: {reason}"));
        }

        if self.options.fix_msgid && sanitize::fix_message_id(&mut record.raw) {
            debug!(account, label, ordinal, index, "Repaired Message-ID brackets");
        }
        if self.options.replace_quoted_printable && sanitize::replace_quoted_printable(&mut record.raw)
        {
            debug!(account, label, ordinal, index, "Rewrote quoted-printable Content-Type");
        }

        let mut backoff = Backoff::new(self.policy);
        loop {
            match client.insert(&item.label_path, &record.raw) {
                Ok(bytes) => {
                    info!(
                        account,
                        label,
                        ordinal,
                        index,
                        attempts = backoff.attempts(),
                        bytes,
                        "Imported"
                    );
                    return ImportOutcome::imported(backoff.attempts(), bytes);
                }
                Err(RemoteError::Permanent(reason)) => {
                    warn!(
                        account,
                        label,
                        ordinal,
                        index,
                        attempts = backoff.attempts(),
                        reason = %reason,
                        "Permanent failure, not retrying"
                    );
                    return ImportOutcome::fatal(backoff.attempts(), reason);
                }
                Err(RemoteError::Transient(reason)) => match backoff.next_delay() {
                    Some(delay) => {
                        warn!(
                            account,
                            label,
                            ordinal,
                            index,
                            attempt = backoff.attempts(),
                            delay_ms = delay.as_millis() as u64,
                            reason = %reason,
                            "Transient failure, backing off"
                        );
                        (self.sleep)(delay);
                    }
                    None => {
                        warn!(
                            account,
                            label,
                            ordinal,
                            index,
                            attempts = backoff.attempts(),
                            reason = %reason,
                            "Retry budget exhausted"
                        );
                        return ImportOutcome::retryable(backoff.attempts(), reason);
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ImportStatus;
    use std::path::PathBuf;

    /// Scripted client: pops one result per call.
    struct ScriptedClient {
        script: Vec<Result<u64, RemoteError>>,
        calls: u32,
    }

    impl ScriptedClient {
        fn new(script: Vec<Result<u64, RemoteError>>) -> Self {
            Self { script, calls: 0 }
        }
    }

    impl MailboxClient for ScriptedClient {
        fn insert(&mut self, _label_path: &[String], _raw: &[u8]) -> Result<u64, RemoteError> {
            self.calls += 1;
            if self.script.is_empty() {
                Ok(0)
            } else {
                self.script.remove(0)
            }
        }
    }

    fn item() -> WorkItem {
        WorkItem {
            account: "alice@example.com".into(),
            label_path: vec!["Inbox".into()],
            source: PathBuf::from("/tmp/Inbox.mbox"),
        }
    }

    fn record(global_index: u64) -> MessageRecord {
        MessageRecord {
            ordinal: 0,
            global_index,
            raw: b"From a@x Thu Jan 01 00:00:00 2024\nSubject: s\n\nbody\n".to_vec(),
            malformed: None,
        }
    }

    fn importer(max_attempts: u32) -> Importer {
        let policy = RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            max_elapsed: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.0,
        };
        Importer::with_sleep(
            Cursor::default(),
            policy,
            ImportConfig::default(),
            Box::new(|_| {}),
        )
    }

    fn transient() -> RemoteError {
        RemoteError::Transient("rate limit".into())
    }

    #[test]
    fn test_success_first_try() {
        let mut client = ScriptedClient::new(vec![Ok(42)]);
        let outcome = importer(3).import(&mut client, &item(), &mut record(0));
        assert_eq!(outcome.status, ImportStatus::Imported);
        assert_eq!(outcome.attempts, 1);
    }

    #[test]
    fn test_transient_twice_then_success() {
        let mut client = ScriptedClient::new(vec![Err(transient()), Err(transient()), Ok(42)]);
        let outcome = importer(5).import(&mut client, &item(), &mut record(0));
        assert_eq!(outcome.status, ImportStatus::Imported);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(client.calls, 3);
    }

    #[test]
    fn test_transient_until_exhaustion() {
        let mut client = ScriptedClient::new(vec![
            Err(transient()),
            Err(transient()),
            Err(transient()),
            Err(transient()),
        ]);
        let outcome = importer(3).import(&mut client, &item(), &mut record(0));
        assert_eq!(outcome.status, ImportStatus::FailedRetryable);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(client.calls, 3);
    }

    #[test]
    fn test_permanent_fails_immediately() {
        let mut client = ScriptedClient::new(vec![Err(RemoteError::Permanent("bad".into()))]);
        let outcome = importer(5).import(&mut client, &item(), &mut record(0));
        assert_eq!(outcome.status, ImportStatus::FailedFatal);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(client.calls, 1);
    }

    #[test]
    fn test_below_cursor_makes_no_remote_call() {
        let policy = RetryPolicy::no_retries();
        let imp = Importer::with_sleep(
            Cursor::new(10),
            policy,
            ImportConfig::default(),
            Box::new(|_| {}),
        );
        let mut client = ScriptedClient::new(vec![]);
        let outcome = imp.import(&mut client, &item(), &mut record(9));
        assert_eq!(outcome.status, ImportStatus::SkippedResume);
        assert_eq!(outcome.attempts, 0);
        assert_eq!(client.calls, 0);
    }

    #[test]
    fn test_malformed_makes_no_remote_call() {
        let mut client = ScriptedClient::new(vec![]);
        let mut rec = record(0);
        rec.malformed = Some("no header fields".into());
        let outcome = importer(3).import(&mut client, &item(), &mut rec);
        assert_eq!(outcome.status, ImportStatus::FailedFatal);
        assert_eq!(outcome.attempts, 0);
        assert_eq!(client.calls, 0);
        assert!(outcome.detail.contains("parse error"));
    }

    #[test]
    fn test_sanitize_applied_before_upload() {
        struct CapturingClient {
            seen: Vec<u8>,
        }
        impl MailboxClient for CapturingClient {
            fn insert(&mut self, _l: &[String], raw: &[u8]) -> Result<u64, RemoteError> {
                self.seen = raw.to_vec();
                Ok(raw.len() as u64)
            }
        }
        let mut client = CapturingClient { seen: Vec::new() };
        let mut rec = record(0);
        rec.raw =
            b"From a@x Thu Jan 01 00:00:00 2024\nMessage-ID: bare@id\nSubject: s\n\nbody\n".to_vec();
        let outcome = importer(3).import(&mut client, &item(), &mut rec);
        assert_eq!(outcome.status, ImportStatus::Imported);
        let text = String::from_utf8(client.seen).unwrap();
        assert!(text.contains("Message-ID: <bare@id>"));
    }
}
