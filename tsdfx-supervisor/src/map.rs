// SPDX-License-Identifier: AGPL-3.0-only

//! The map file: one `NAME: SRCPATH => DSTPATH` entry per line, and the
//! sorted-merge reload algorithm that reconciles a freshly parsed file
//! against the entries currently in effect. Per spec.md §4.6.

use std::{fmt, fs, path::PathBuf};

/// Maximum byte length of a map entry's name.
pub const NAME_MAX: usize = 64;

/// One parsed `NAME: SRCPATH => DSTPATH` line.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Entry
{
    pub name: String,
    pub src: PathBuf,
    pub dst: PathBuf,
}

/// A failure parsing one line of the map file.
#[derive(Debug, thiserror::Error)]
pub enum ParseError
{
    #[error("line {line}: name exceeds {NAME_MAX} bytes")]
    NameTooLong{line: usize},

    #[error("line {line}: malformed entry (expected NAME: SRCPATH => DSTPATH)")]
    Malformed{line: usize},

    #[error("line {line}: duplicate name {name:?}")]
    Duplicate{line: usize, name: String},

    #[error("{path}: not a directory")]
    NotADirectory{path: PathBuf},

    #[error("{path}: {source}")]
    Io{path: PathBuf, #[source] source: std::io::Error},
}

impl fmt::Display for Entry
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "{}: {} => {}", self.name, self.src.display(), self.dst.display())
    }
}

/// Parse a map file's contents into entries, sorted by name. Both paths
/// are resolved with `realpath` and must be existing directories.
pub fn parse(contents: &str) -> Result<Vec<Entry>, ParseError>
{
    let mut entries: Vec<Entry> = Vec::new();

    for (idx, raw_line) in contents.lines().enumerate() {
        let line = idx + 1;
        let text = strip_comment(raw_line).trim();
        if text.is_empty() {
            continue;
        }

        let (name, rest) = text.split_once(':').ok_or(ParseError::Malformed{line})?;
        let name = name.trim();
        if name.is_empty() || name.len() > NAME_MAX {
            return Err(ParseError::NameTooLong{line});
        }

        let rest = rest.trim();
        let (src_raw, dst_raw) = rest.split_once("=>").ok_or(ParseError::Malformed{line})?;
        let src_raw = unquote(src_raw.trim());
        let dst_raw = unquote(dst_raw.trim());
        if src_raw.is_empty() || dst_raw.is_empty() {
            return Err(ParseError::Malformed{line});
        }

        let src = resolve_dir(&src_raw)?;
        let dst = resolve_dir(&dst_raw)?;

        if entries.iter().any(|e| e.name == name) {
            return Err(ParseError::Duplicate{line, name: name.to_owned()});
        }
        entries.push(Entry{name: name.to_owned(), src, dst});
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

fn strip_comment(line: &str) -> &str
{
    match line.find('#') {
        Some(idx) => &line[.. idx],
        None => line,
    }
}

/// Strip a single layer of shell-style quoting (`'...'` or `"..."`).
fn unquote(s: &str) -> String
{
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'\'' && last == b'\'') || (first == b'"' && last == b'"') {
            return s[1 .. s.len() - 1].to_owned();
        }
    }
    s.to_owned()
}

fn resolve_dir(path: &str) -> Result<PathBuf, ParseError>
{
    let resolved = fs::canonicalize(path).map_err(|source| ParseError::Io{path: PathBuf::from(path), source})?;
    if !resolved.is_dir() {
        return Err(ParseError::NotADirectory{path: resolved});
    }
    Ok(resolved)
}

/// The outcome of merging a freshly parsed map against the entries
/// currently in effect: which names to keep-and-rush, which to destroy,
/// and which to create.
pub struct Merge
{
    /// Present in both; the old entry is kept and its scan task rushed.
    pub keep: Vec<Entry>,
    /// Present only in the old map; destroy these.
    pub destroy: Vec<Entry>,
    /// Present only in the new map; create these.
    pub create: Vec<Entry>,
}

/// Merge-walk two name-sorted entry lists, per §4.6 "Reload".
pub fn merge(old: &[Entry], new: &[Entry]) -> Merge
{
    let mut keep = Vec::new();
    let mut destroy = Vec::new();
    let mut create = Vec::new();

    let (mut i, mut j) = (0, 0);
    while i < old.len() || j < new.len() {
        match (old.get(i), new.get(j)) {
            (Some(o), Some(n)) if o.name == n.name => {
                keep.push(o.clone());
                i += 1;
                j += 1;
            },
            (Some(o), Some(n)) if o.name < n.name => {
                destroy.push(o.clone());
                i += 1;
            },
            (Some(_), Some(n)) => {
                create.push(n.clone());
                j += 1;
            },
            (Some(o), None) => {
                destroy.push(o.clone());
                i += 1;
            },
            (None, Some(n)) => {
                create.push(n.clone());
                j += 1;
            },
            (None, None) => unreachable!(),
        }
    }

    Merge{keep, destroy, create}
}

#[cfg(test)]
mod tests
{
    use super::*;
    use std::fs as stdfs;

    fn dir(tmp: &tempfile::TempDir, name: &str) -> PathBuf
    {
        let p = tmp.path().join(name);
        stdfs::create_dir(&p).unwrap();
        p
    }

    #[test]
    fn parses_a_well_formed_entry()
    {
        let tmp = tempfile::tempdir().unwrap();
        let src = dir(&tmp, "src");
        let dst = dir(&tmp, "dst");
        let text = format!("drop1: {} => {}\n", src.display(), dst.display());

        let entries = parse(&text).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "drop1");
    }

    #[test]
    fn ignores_comments_and_blank_lines()
    {
        let tmp = tempfile::tempdir().unwrap();
        let src = dir(&tmp, "src");
        let dst = dir(&tmp, "dst");
        let text = format!("# comment\n\n  \ndrop1: {} => {}\n", src.display(), dst.display());
        assert_eq!(parse(&text).unwrap().len(), 1);
    }

    #[test]
    fn rejects_name_over_64_bytes()
    {
        let tmp = tempfile::tempdir().unwrap();
        let src = dir(&tmp, "src");
        let dst = dir(&tmp, "dst");
        let long_name = "x".repeat(65);
        let text = format!("{long_name}: {} => {}\n", src.display(), dst.display());
        assert!(matches!(parse(&text), Err(ParseError::NameTooLong{..})));
    }

    #[test]
    fn merge_classifies_equal_only_old_only_new()
    {
        let tmp = tempfile::tempdir().unwrap();
        let a_src = dir(&tmp, "a_src");
        let a_dst = dir(&tmp, "a_dst");
        let b_src = dir(&tmp, "b_src");
        let b_dst = dir(&tmp, "b_dst");
        let c_src = dir(&tmp, "c_src");
        let c_dst = dir(&tmp, "c_dst");

        let a = Entry{name: "a".into(), src: a_src, dst: a_dst};
        let b = Entry{name: "b".into(), src: b_src, dst: b_dst};
        let c = Entry{name: "c".into(), src: c_src, dst: c_dst};

        let old = vec![a.clone(), b.clone()];
        let new = vec![a.clone(), c.clone()];

        let m = merge(&old, &new);
        assert_eq!(m.keep, vec![a]);
        assert_eq!(m.destroy, vec![b]);
        assert_eq!(m.create, vec![c]);
    }
}
