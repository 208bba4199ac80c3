//! Streaming mbox splitter.
//!
//! Reads an mbox file line-by-line with a large buffer and yields one raw
//! record per message. Never loads the whole file into memory. Tolerant of
//! malformed input: garbage before the first separator, header-less
//! payloads, and oversized messages come out as flagged records instead of
//! aborting the file, so one corrupt message cannot block the rest of a
//! large export.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{ImportError, Result};

/// Size of the internal read buffer (1 MB for fast sequential reads).
const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Default maximum message size in bytes (256 MB).
const MAX_MESSAGE_SIZE: usize = 256 * 1024 * 1024;

/// One raw message split out of an mbox file.
///
/// `bytes` includes the leading `From ` separator line when one was
/// present. `malformed` explains why the payload cannot be uploaded,
/// when it cannot.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub ordinal: u64,
    pub bytes: Vec<u8>,
    pub malformed: Option<String>,
}

/// Handle on a single mbox file.
///
/// Verifies that the file exists and is readable, but does NOT validate
/// that it is actually an mbox; splitting is where problems surface.
pub struct MboxFile {
    path: PathBuf,
    file_size: u64,
    read_buffer_size: usize,
    max_message_size: usize,
}

impl MboxFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&path).map_err(|e| ImportError::io(&path, e))?;
        Ok(Self {
            path,
            file_size: metadata.len(),
            read_buffer_size: READ_BUFFER_SIZE,
            max_message_size: MAX_MESSAGE_SIZE,
        })
    }

    /// Override the buffer sizes (from `[performance]` config).
    pub fn with_limits(mut self, read_buffer_size: usize, max_message_size: usize) -> Self {
        self.read_buffer_size = read_buffer_size.max(4096);
        self.max_message_size = max_message_size;
        self
    }

    /// Total size of the underlying file in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Path to the mbox file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Begin streaming messages in file order, ordinals from 0.
    pub fn messages(&self) -> Result<MessageIter> {
        let file = File::open(&self.path).map_err(|e| ImportError::io(&self.path, e))?;
        Ok(MessageIter {
            path: self.path.clone(),
            reader: BufReader::with_capacity(self.read_buffer_size, file),
            line_buf: Vec::with_capacity(4096),
            message_buf: Vec::with_capacity(64 * 1024),
            max_message_size: self.max_message_size,
            truncated: false,
            prev_line_was_empty: true,
            first_line: true,
            ordinal: 0,
            done: false,
        })
    }

    /// Count the messages in the file without keeping any of them.
    pub fn count(&self) -> Result<u64> {
        let mut n = 0u64;
        for record in self.messages()? {
            record?;
            n += 1;
        }
        Ok(n)
    }
}

/// Lazy iterator over the messages of one mbox file.
///
/// Yields `Err` once on an I/O failure and then stops; the caller treats
/// that as the whole remainder of the file being unreadable.
pub struct MessageIter {
    path: PathBuf,
    reader: BufReader<File>,
    line_buf: Vec<u8>,
    message_buf: Vec<u8>,
    max_message_size: usize,
    truncated: bool,
    prev_line_was_empty: bool,
    first_line: bool,
    ordinal: u64,
    done: bool,
}

impl MessageIter {
    /// Read one line (through `\n` or EOF) into the reusable line buffer.
    /// Returns false at EOF.
    fn read_line(&mut self) -> Result<bool> {
        self.line_buf.clear();
        loop {
            let buf = self
                .reader
                .fill_buf()
                .map_err(|e| ImportError::io(&self.path, e))?;
            if buf.is_empty() {
                return Ok(!self.line_buf.is_empty());
            }
            match memchr_newline(buf) {
                Some(pos) => {
                    self.line_buf.extend_from_slice(&buf[..=pos]);
                    self.reader.consume(pos + 1);
                    return Ok(true);
                }
                None => {
                    let len = buf.len();
                    self.line_buf.extend_from_slice(buf);
                    self.reader.consume(len);
                }
            }
        }
    }

    fn push_line(&mut self) {
        if self.message_buf.len() + self.line_buf.len() <= self.max_message_size {
            self.message_buf.extend_from_slice(&self.line_buf);
        } else if !self.truncated {
            warn!(
                path = %self.path.display(),
                ordinal = self.ordinal,
                max_size = self.max_message_size,
                "Message exceeds maximum size, truncating body"
            );
            self.truncated = true;
        }
    }

    /// Package the accumulated buffer as the next record.
    fn finish_message(&mut self) -> RawMessage {
        let bytes = std::mem::take(&mut self.message_buf);
        let malformed = if self.truncated {
            Some("message exceeds maximum size".to_string())
        } else {
            classify(&bytes)
        };
        self.truncated = false;
        let record = RawMessage {
            ordinal: self.ordinal,
            bytes,
            malformed,
        };
        self.ordinal += 1;
        record
    }
}

impl Iterator for MessageIter {
    type Item = Result<RawMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.read_line() {
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
                Ok(false) => {
                    // EOF: flush whatever is pending.
                    self.done = true;
                    if is_blank_payload(&self.message_buf) {
                        return None;
                    }
                    return Some(Ok(self.finish_message()));
                }
                Ok(true) => {}
            }

            let is_separator = is_mbox_separator(&self.line_buf);
            let starts_message = is_separator && (self.first_line || self.prev_line_was_empty);

            if is_separator && !starts_message {
                // RFC 4155 wants a blank line before each separator;
                // real exports frequently omit it. Split anyway.
                warn!(
                    path = %self.path.display(),
                    ordinal = self.ordinal,
                    "Found 'From ' separator without preceding blank line"
                );
            }

            self.prev_line_was_empty = is_blank_line(&self.line_buf);
            self.first_line = false;

            if is_separator {
                // Blank lines before the first separator are padding,
                // not a lost message.
                let pending = if is_blank_payload(&self.message_buf) {
                    self.message_buf.clear();
                    None
                } else {
                    Some(self.finish_message())
                };
                self.message_buf.extend_from_slice(&self.line_buf);
                if let Some(record) = pending {
                    return Some(Ok(record));
                }
            } else {
                self.push_line();
            }
        }
    }
}

/// Decide whether a complete payload can be treated as an internet message.
///
/// Anything that did not start at a `From ` separator (leading garbage,
/// trailing fragments) or that carries no header field line at all is
/// flagged; the importer reports it without spending remote quota.
fn classify(bytes: &[u8]) -> Option<String> {
    if !is_mbox_separator(bytes) {
        return Some("data outside any message separator".to_string());
    }
    let mut lines = bytes.split(|&b| b == b'\n');
    lines.next(); // the From separator itself
    for line in lines {
        if is_blank_line(line) {
            break;
        }
        if is_header_field(line) {
            return None;
        }
    }
    Some("no header fields before message body".to_string())
}

/// `name:` with a non-empty printable-ASCII field name, per RFC 5322.
/// Folded continuation lines start with whitespace and don't count.
fn is_header_field(line: &[u8]) -> bool {
    if line.first().is_some_and(|&b| b == b' ' || b == b'\t') {
        return false;
    }
    match line.iter().position(|&b| b == b':') {
        Some(0) | None => false,
        Some(pos) => line[..pos].iter().all(|&b| (33..=126).contains(&b)),
    }
}

/// Fast newline search (equivalent to memchr for `\n`).
#[inline]
fn memchr_newline(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}

/// Check whether a line is an mbox separator (`From ` at the start).
fn is_mbox_separator(line: &[u8]) -> bool {
    // Skip BOM if present at very start
    let line = if line.starts_with(&[0xEF, 0xBB, 0xBF]) {
        &line[3..]
    } else {
        line
    };
    line.starts_with(b"From ")
}

/// Check whether a line is blank (empty or only whitespace / CR / LF).
fn is_blank_line(line: &[u8]) -> bool {
    line.iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b' ' || b == b'\t')
}

/// Whitespace-only accumulations are padding, not messages.
fn is_blank_payload(buf: &[u8]) -> bool {
    is_blank_line(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn mbox_with(content: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content).unwrap();
        f.flush().unwrap();
        f
    }

    fn collect(content: &[u8]) -> Vec<RawMessage> {
        let f = mbox_with(content);
        MboxFile::open(f.path())
            .unwrap()
            .messages()
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
    }

    const TWO_MESSAGES: &[u8] = b"From alice@example.com Thu Jan 01 00:00:00 2024\n\
Subject: one\n\
\n\
body one\n\
\n\
From bob@example.com Thu Jan 01 00:00:01 2024\n\
Subject: two\n\
\n\
body two\n";

    #[test]
    fn test_splits_messages_with_ordinals() {
        let records = collect(TWO_MESSAGES);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].ordinal, 0);
        assert_eq!(records[1].ordinal, 1);
        assert!(records[0].malformed.is_none());
        assert!(records[0].bytes.starts_with(b"From alice"));
        assert!(records[1].bytes.ends_with(b"body two\n"));
    }

    #[test]
    fn test_escaped_from_is_body() {
        let content = b"From a@x Thu Jan 01 00:00:00 2024\n\
Subject: s\n\
\n\
>From the body, not a separator\n";
        let records = collect(content);
        assert_eq!(records.len(), 1);
        assert!(records[0].bytes.ends_with(b"not a separator\n"));
    }

    #[test]
    fn test_from_inside_body_without_blank_line_splits_with_warning() {
        // Unescaped separator mid-message: split, matching what the
        // platform's own takeout tooling produces.
        let content = b"From a@x Thu Jan 01 00:00:00 2024\n\
Subject: s\n\
\n\
text\n\
From b@x Thu Jan 01 00:00:01 2024\n\
Subject: t\n\
\n\
more\n";
        let records = collect(content);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_leading_garbage_is_malformed_record() {
        let content = b"this file does not start with a separator\n\
\n\
From a@x Thu Jan 01 00:00:00 2024\n\
Subject: ok\n\
\n\
body\n";
        let records = collect(content);
        assert_eq!(records.len(), 2);
        assert!(records[0].malformed.is_some());
        assert!(records[1].malformed.is_none());
    }

    #[test]
    fn test_headerless_message_is_malformed() {
        let content = b"From a@x Thu Jan 01 00:00:00 2024\n\
\n\
just a body, no headers\n";
        let records = collect(content);
        assert_eq!(records.len(), 1);
        assert!(records[0].malformed.is_some());
    }

    #[test]
    fn test_empty_file_yields_nothing() {
        let records = collect(b"");
        assert!(records.is_empty());
    }

    #[test]
    fn test_leading_blank_lines_are_padding() {
        let content = b"\n\nFrom a@x Thu Jan 01 00:00:00 2024\nSubject: s\n\nbody\n";
        let records = collect(content);
        assert_eq!(records.len(), 1);
        assert!(records[0].malformed.is_none());
    }

    #[test]
    fn test_no_trailing_newline() {
        let content = b"From a@x Thu Jan 01 00:00:00 2024\nSubject: s\n\nbody without newline";
        let records = collect(content);
        assert_eq!(records.len(), 1);
        assert!(records[0].bytes.ends_with(b"body without newline"));
    }

    #[test]
    fn test_count_matches_iteration() {
        let f = mbox_with(TWO_MESSAGES);
        let mbox = MboxFile::open(f.path()).unwrap();
        assert_eq!(mbox.count().unwrap(), 2);
    }

    #[test]
    fn test_is_mbox_separator() {
        assert!(is_mbox_separator(
            b"From user@example.com Thu Jan 01 00:00:00 2024\n"
        ));
        assert!(!is_mbox_separator(b"from user@example.com\n")); // lowercase
        assert!(!is_mbox_separator(b">From user@example.com\n")); // escaped
        assert!(!is_mbox_separator(b"Subject: From here\n"));
    }

    #[test]
    fn test_is_mbox_separator_with_bom() {
        let mut line = vec![0xEF, 0xBB, 0xBF];
        line.extend_from_slice(b"From user@example.com Thu Jan 01 00:00:00 2024\n");
        assert!(is_mbox_separator(&line));
    }

    #[test]
    fn test_is_header_field() {
        assert!(is_header_field(b"Subject: hello"));
        assert!(is_header_field(b"X-Custom-1: v"));
        assert!(!is_header_field(b" folded continuation"));
        assert!(!is_header_field(b": empty name"));
        assert!(!is_header_field(b"no colon here"));
    }
}
