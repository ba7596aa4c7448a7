// SPDX-License-Identifier: AGPL-3.0-only

//! Domain-tagged SHA-1 task names and the incremental digest used by the
//! copier to verify a reconcile end to end.
//!
//! Task names are derived from `sha1(domain || segment || NUL || segment...)`
//! so that a scan task for `/a` and a copy task from `/a` to `/a` never
//! collide even though their inputs overlap textually: every segment is
//! NUL-terminated before hashing, the way the original C implementation
//! null-terminates each `strlcat`'d piece before calling `SHA1_Update`.

use sha1::{Digest, Sha1};
use std::fmt::{self, Write as _};

/// Length of a task name: two hex digits per byte of a 20-byte SHA-1 digest.
pub const NAME_LEN: usize = 40;

/// A task name: the lowercase hex encoding of a domain-tagged SHA-1 digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskName([u8; 20]);

impl TaskName
{
    /// Name a scan task for the given absolute source directory.
    pub fn scan(path: &str) -> Self
    {
        Self::tagged("scan", &[path])
    }

    /// Name a copy task for the given absolute source/destination pair.
    pub fn copy(src: &str, dst: &str) -> Self
    {
        Self::tagged("copy", &[src, dst])
    }

    /// Hash a domain tag followed by NUL-terminated segments.
    fn tagged(domain: &str, segments: &[&str]) -> Self
    {
        let mut hasher = Sha1::new();
        hasher.update(domain.as_bytes());
        for segment in segments {
            hasher.update(segment.as_bytes());
            hasher.update([0u8]);
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// The bucket index (0..256) this name hashes into for a task set.
    pub fn bucket(&self) -> usize
    {
        self.0[0] as usize
    }
}

impl fmt::Display for TaskName
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for TaskName
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "TaskName({self})")
    }
}

/// Incremental digest over bytes actually read from a source file.
///
/// Per the design notes: no zero-padding of short reads is ever fed in here.
/// Callers must only `update` with the slice of the buffer that was
/// actually filled by `read`.
pub struct RollingDigest(Sha1);

impl RollingDigest
{
    /// Start a new digest.
    pub fn new() -> Self
    {
        Self(Sha1::new())
    }

    /// Fold in exactly the bytes read; never pad.
    pub fn update(&mut self, bytes: &[u8])
    {
        self.0.update(bytes);
    }

    /// Finish and format as lowercase hex, matching the log line format.
    pub fn finish_hex(self) -> String
    {
        let digest = self.0.finalize();
        let mut out = String::with_capacity(40);
        for byte in digest {
            let _ = write!(out, "{byte:02x}");
        }
        out
    }
}

impl Default for RollingDigest
{
    fn default() -> Self
    {
        Self::new()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn scan_and_copy_names_differ_for_overlapping_inputs()
    {
        let scan = TaskName::scan("/a");
        let copy = TaskName::copy("/a", "/a");
        assert_ne!(scan.to_string(), copy.to_string());
    }

    #[test]
    fn name_is_forty_hex_chars()
    {
        let name = TaskName::scan("/srv/drop/foo");
        assert_eq!(name.to_string().len(), NAME_LEN);
        assert!(name.to_string().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn digest_of_known_string_matches_reference_vector()
    {
        let mut digest = RollingDigest::new();
        digest.update(b"hello");
        assert_eq!(digest.finish_hex(), "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
    }

    #[test]
    fn same_inputs_are_deterministic()
    {
        assert_eq!(
            TaskName::copy("/a", "/b").to_string(),
            TaskName::copy("/a", "/b").to_string(),
        );
    }
}
