//! Work discovery: walks the import root and produces the ordered
//! catalog of (account, label path, mbox file) work items.
//!
//! The enumeration order is a contract, not an accident: items sort by
//! account, then label path (segment by segment), then file name, so an
//! unchanged directory tree always yields the same global message
//! indexing. Resumption via `--from-message` depends on this.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{ImportError, Result};
use crate::model::WorkItem;

/// Suffix recognized on mbox files and Apple-Mail-style export directories.
const MBOX_SUFFIX: &str = ".mbox";

/// Enumerate all work items under `root`.
///
/// Layout rules, applied per immediate child of the root (each child
/// directory is one account):
///
/// - `root/<account>/<Label>.mbox` — file, single-segment label
/// - `root/<account>/<A>/<B>/<Label>.mbox` — nested label `A/B/Label`
/// - `root/<account>/<Label>.mbox/mbox` — Apple Mail per-folder export:
///   the directory name (suffix stripped) is the label and the inner
///   `mbox` file is the source. Takes precedence over descending into
///   the directory.
///
/// Non-directory children of the root and unrecognized files are ignored.
/// An unreadable directory is fatal: a partial catalog would silently
/// renumber every later message.
pub fn scan(root: &Path) -> Result<Vec<WorkItem>> {
    if !root.is_dir() {
        return Err(ImportError::InvalidRoot(root.to_path_buf()));
    }
    let root = root
        .canonicalize()
        .map_err(|e| ImportError::io(root, e))?;

    let mut items = Vec::new();
    for entry in list_dir(&root)? {
        if !entry.is_dir() {
            debug!(path = %entry.display(), "Ignoring non-directory at root");
            continue;
        }
        let account = file_name_string(&entry);
        let mut segments: Vec<String> = Vec::new();
        walk_account(&account, &entry, &mut segments, &mut items)?;
    }

    items.sort_by(|a, b| {
        (&a.account, &a.label_path, a.source.file_name())
            .cmp(&(&b.account, &b.label_path, b.source.file_name()))
    });

    debug!(count = items.len(), root = %root.display(), "Catalog complete");
    Ok(items)
}

/// Recursive descent below one account directory.
fn walk_account(
    account: &str,
    dir: &Path,
    segments: &mut Vec<String>,
    items: &mut Vec<WorkItem>,
) -> Result<()> {
    for entry in list_dir(dir)? {
        let name = file_name_string(&entry);

        if entry.is_dir() {
            // Apple Mail convention: `<Folder>.mbox/` holding a file
            // literally named `mbox` is a leaf, not a container.
            let inner = entry.join("mbox");
            if name.ends_with(MBOX_SUFFIX) && inner.is_file() {
                match label_segment(&name) {
                    Some(label) => items.push(WorkItem {
                        account: account.to_string(),
                        label_path: with_segment(segments, label),
                        source: inner,
                    }),
                    None => warn!(path = %entry.display(), "Ignoring directory with empty label"),
                }
                continue;
            }
            let segment = match label_segment(&name) {
                Some(s) => s,
                None => {
                    warn!(path = %entry.display(), "Ignoring directory with empty label");
                    continue;
                }
            };
            segments.push(segment);
            walk_account(account, &entry, segments, items)?;
            segments.pop();
        } else if name.ends_with(MBOX_SUFFIX) {
            match label_segment(&name) {
                Some(label) => items.push(WorkItem {
                    account: account.to_string(),
                    label_path: with_segment(segments, label),
                    source: entry,
                }),
                None => warn!(path = %entry.display(), "Ignoring file with empty label"),
            }
        } else {
            debug!(path = %entry.display(), "Ignoring unrecognized file");
        }
    }
    Ok(())
}

/// Read a directory, sorted by name. Any error here aborts the run.
fn list_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let rd = std::fs::read_dir(dir).map_err(|e| ImportError::Catalog {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut entries = Vec::new();
    for entry in rd {
        let entry = entry.map_err(|e| ImportError::Catalog {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })?;
        entries.push(entry.path());
    }
    entries.sort();
    Ok(entries)
}

/// Strip the `.mbox` suffix (if any) and reject empty results.
fn label_segment(name: &str) -> Option<String> {
    let stem = name.strip_suffix(MBOX_SUFFIX).unwrap_or(name);
    if stem.is_empty() {
        None
    } else {
        Some(stem.to_string())
    }
}

fn with_segment(segments: &[String], last: String) -> Vec<String> {
    let mut path = segments.to_vec();
    path.push(last);
    path
}

fn file_name_string(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"From x\n\ndata\n").unwrap();
    }

    #[test]
    fn test_simple_layout() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("alice@example.com/Inbox.mbox"));
        touch(&tmp.path().join("bob@example.com/Archive/2020.mbox"));

        let items = scan(tmp.path()).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].account, "alice@example.com");
        assert_eq!(items[0].label_path, vec!["Inbox".to_string()]);
        assert_eq!(items[1].account, "bob@example.com");
        assert_eq!(
            items[1].label_path,
            vec!["Archive".to_string(), "2020".to_string()]
        );
    }

    #[test]
    fn test_apple_mail_convention() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("carol@example.com/Projects.mbox/mbox"));

        let items = scan(tmp.path()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].label_path, vec!["Projects".to_string()]);
        assert!(items[0].source.ends_with("Projects.mbox/mbox"));
    }

    #[test]
    fn test_apple_dir_without_inner_mbox_is_container() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("dan@example.com/Old.mbox/2019.mbox"));

        let items = scan(tmp.path()).unwrap();
        assert_eq!(items.len(), 1);
        // Directory segment loses the suffix too
        assert_eq!(
            items[0].label_path,
            vec!["Old".to_string(), "2019".to_string()]
        );
    }

    #[test]
    fn test_ignores_unrecognized_entries() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("erin@example.com/Inbox.mbox"));
        fs::write(tmp.path().join("erin@example.com/notes.txt"), b"x").unwrap();
        fs::write(tmp.path().join("stray-file-at-root"), b"x").unwrap();

        let items = scan(tmp.path()).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_deterministic_order() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("zed@example.com/A.mbox"));
        touch(&tmp.path().join("amy@example.com/Z.mbox"));
        touch(&tmp.path().join("amy@example.com/B/Deep.mbox"));
        touch(&tmp.path().join("amy@example.com/A.mbox"));

        let first = scan(tmp.path()).unwrap();
        let second = scan(tmp.path()).unwrap();
        assert_eq!(first, second);

        let order: Vec<(String, String)> = first
            .iter()
            .map(|i| (i.account.clone(), i.label()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("amy@example.com".to_string(), "A".to_string()),
                ("amy@example.com".to_string(), "B/Deep".to_string()),
                ("amy@example.com".to_string(), "Z".to_string()),
                ("zed@example.com".to_string(), "A".to_string()),
            ]
        );
    }

    #[test]
    fn test_missing_root_is_invalid() {
        let err = scan(Path::new("/nonexistent/definitely/missing")).unwrap_err();
        assert!(matches!(err, ImportError::InvalidRoot(_)));
    }
}
