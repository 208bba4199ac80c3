//! Pre-upload header repairs.
//!
//! Two fixes for defects common in real-world mbox exports, both of which
//! make the remote reject otherwise fine messages:
//!
//! - `Message-ID` values missing their angle brackets
//! - the bogus `text/quoted-printable` media type in `Content-Type`
//!
//! Both operate byte-level on the header block only and leave the body
//! untouched.

/// Ensure the `Message-ID` value is wrapped in angle brackets.
///
/// Returns true when the payload was modified. Messages without a
/// `Message-ID` header are left alone; the remote generates one.
pub fn fix_message_id(raw: &mut Vec<u8>) -> bool {
    let Some((start, end)) = field_value_span(raw, b"message-id") else {
        return false;
    };
    // Narrow to the value itself, keeping the surrounding whitespace and
    // line breaks in place.
    let (rel_start, rel_end) = trim_offsets(&raw[start..end]);
    if rel_start == rel_end {
        return false;
    }
    let (vstart, vend) = (start + rel_start, start + rel_end);
    let value = &raw[vstart..vend];

    let needs_open = value.first() != Some(&b'<');
    let needs_close = value.last() != Some(&b'>');
    if !needs_open && !needs_close {
        return false;
    }

    let mut fixed = Vec::with_capacity(value.len() + 2);
    if needs_open {
        fixed.push(b'<');
    }
    fixed.extend_from_slice(value);
    if needs_close {
        fixed.push(b'>');
    }
    splice_value(raw, vstart, vend, &fixed);
    true
}

/// Rewrite `text/quoted-printable` to `text/plain` in the `Content-Type`
/// header. Returns true when the payload was modified.
pub fn replace_quoted_printable(raw: &mut Vec<u8>) -> bool {
    const BOGUS: &[u8] = b"text/quoted-printable";
    const PLAIN: &[u8] = b"text/plain";

    let Some((start, end)) = field_value_span(raw, b"content-type") else {
        return false;
    };
    let Some(rel) = find_ignore_case(&raw[start..end], BOGUS) else {
        return false;
    };
    splice_value(raw, start + rel, start + rel + BOGUS.len(), PLAIN);
    true
}

/// Locate the value of the first header field named `name` (lowercase),
/// folded continuation lines included. The span excludes the field name
/// and colon but includes surrounding whitespace and line breaks of the
/// value. Only the header block (up to the first blank line) is searched.
fn field_value_span(raw: &[u8], name: &[u8]) -> Option<(usize, usize)> {
    let mut pos = 0;
    let mut found: Option<usize> = None;

    while pos < raw.len() {
        let line_end = raw[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(raw.len(), |p| pos + p + 1);
        let line = &raw[pos..line_end];

        if line.iter().all(|&b| matches!(b, b'\r' | b'\n' | b' ' | b'\t')) {
            // End of header block.
            return found.map(|s| (s, pos));
        }
        if let Some(value_start) = found {
            // Value continues through folded lines.
            if line.first().is_some_and(|&b| b == b' ' || b == b'\t') {
                pos = line_end;
                continue;
            }
            return Some((value_start, pos));
        }
        if let Some(colon) = line.iter().position(|&b| b == b':') {
            if colon == name.len()
                && line[..colon].eq_ignore_ascii_case(name)
                && !line.first().is_some_and(|&b| b == b' ' || b == b'\t')
            {
                found = Some(pos + colon + 1);
            }
        }
        pos = line_end;
    }
    found.map(|s| (s, raw.len()))
}

/// Replace `raw[start..end]` with `replacement`.
fn splice_value(raw: &mut Vec<u8>, start: usize, end: usize, replacement: &[u8]) {
    let tail = raw.split_off(end);
    raw.truncate(start);
    raw.extend_from_slice(replacement);
    raw.extend_from_slice(&tail);
}

/// Offsets of the non-whitespace core of `value` (empty when all blank).
fn trim_offsets(value: &[u8]) -> (usize, usize) {
    let start = value
        .iter()
        .position(|&b| !matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
        .unwrap_or(value.len());
    let end = value
        .iter()
        .rposition(|&b| !matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
        .map_or(start, |p| p + 1);
    (start, end)
}

/// Case-insensitive substring search.
fn find_ignore_case(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .find(|&i| haystack[i..i + needle.len()].eq_ignore_ascii_case(needle))
}
