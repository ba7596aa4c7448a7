// SPDX-License-Identifier: AGPL-3.0-only

//! The POSIX portable filename classifier and the scan-line validator.
//!
//! Both are named as out-of-scope "external collaborators" in the governing
//! spec, but a concrete Rust implementation still needs their behavior
//! pinned down, so they live in their own small crate rather than inline in
//! the scanner or the supervisor.

use regex::bytes::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// The classifier is stricter than the stream validator: it governs
/// whether a single filename component is safe to emit at all, matching
/// `tsdfx_scan_process_directory`'s per-entry checks.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilenameError
{
    /// `.` or `..`.
    #[error("reflexive entry")]
    Reflexive,

    /// Name begins with `.`.
    #[error("hidden entry")]
    Hidden,

    /// Name contains a byte outside the portable filename set plus space.
    #[error("non-portable byte in name")]
    NonPortable,

    /// Name contains a newline, which the line-oriented wire format cannot
    /// carry; rejected on the producer side per the design notes even
    /// though the consumer-side validator can never observe one.
    #[error("name contains a newline")]
    Newline,
}

/// Classify a single directory entry name.
///
/// The portable filename character set is `[A-Za-z0-9._-]`; this project
/// also tolerates space, matching the glossary.
pub fn classify_entry_name(name: &str) -> Result<(), FilenameError>
{
    if name == "." || name == ".." {
        return Err(FilenameError::Reflexive);
    }
    if name.contains('\n') {
        return Err(FilenameError::Newline);
    }
    if name.starts_with('.') {
        return Err(FilenameError::Hidden);
    }
    if !name.bytes().all(is_portable_byte) {
        return Err(FilenameError::NonPortable);
    }
    Ok(())
}

/// Whether a single byte is in the portable filename set or is a space.
pub fn is_portable_byte(b: u8) -> bool
{
    b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-' | b' ')
}

fn scan_line_regex() -> &'static Regex
{
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(/[0-9A-Za-z_-]([ 0-9A-Za-z._-]*[0-9A-Za-z._-])?)+/?$")
            .expect("scan line regex is a compile-time constant")
    })
}

/// Validate one line emitted by the scanner worker on its stdout.
///
/// A valid line has a leading `/`, one or more segments matching
/// `[A-Za-z0-9_-]([ A-Za-z0-9._-]*[A-Za-z0-9._-])?`, and an optional
/// trailing `/` marking a directory.
pub fn validate_scan_line(line: &[u8]) -> bool
{
    scan_line_regex().is_match(line)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn accepts_plain_relative_file()
    {
        assert!(validate_scan_line(b"/foo/bar.txt"));
    }

    #[test]
    fn accepts_trailing_slash_for_directories()
    {
        assert!(validate_scan_line(b"/foo/bar/"));
    }

    #[test]
    fn accepts_spaces_within_a_segment()
    {
        assert!(validate_scan_line(b"/foo/My Documents/bar"));
    }

    #[test]
    fn rejects_tab_byte()
    {
        assert!(!validate_scan_line(b"/bad\tname"));
    }

    #[test]
    fn rejects_missing_leading_slash()
    {
        assert!(!validate_scan_line(b"foo/bar"));
    }

    #[test]
    fn rejects_empty_line()
    {
        assert!(!validate_scan_line(b""));
    }

    #[test]
    fn classifier_rejects_dot_and_dotdot()
    {
        assert_eq!(classify_entry_name("."), Err(FilenameError::Reflexive));
        assert_eq!(classify_entry_name(".."), Err(FilenameError::Reflexive));
    }

    #[test]
    fn classifier_rejects_hidden_entries()
    {
        assert_eq!(classify_entry_name(".hidden"), Err(FilenameError::Hidden));
    }

    #[test]
    fn classifier_accepts_portable_name_with_space()
    {
        assert_eq!(classify_entry_name("My File 1.txt"), Ok(()));
    }

    #[test]
    fn classifier_rejects_newline()
    {
        assert_eq!(classify_entry_name("bad\nname"), Err(FilenameError::Newline));
    }
}
