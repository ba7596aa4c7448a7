// SPDX-License-Identifier: AGPL-3.0-only

//! Per-map recent-error log: `DSTPATH/tsdfx-error.log`, retaining the
//! last 5 minutes of messages. Per spec.md §4.6 "Per-map recent-log".
//!
//! The original design rewrites the whole file from scratch on every
//! `log()` call and is explicitly non-atomic (spec.md §9); this version
//! keeps the same "rewrite everything, dropping expired entries" shape
//! but writes to a sibling temp file and renames it into place, so a
//! crash mid-write can never leave a half-written log behind.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// How long an entry survives before being dropped on the next rewrite.
pub const RETENTION: Duration = Duration::from_secs(5 * 60);

struct Record
{
    at: SystemTime,
    message: String,
}

/// A map's recent-error log.
pub struct RecentLog
{
    path: PathBuf,
    records: Vec<Record>,
}

impl RecentLog
{
    /// Open (append-create) `dstpath/tsdfx-error.log`.
    pub fn open(dstpath: &Path) -> std::io::Result<Self>
    {
        let path = dstpath.join("tsdfx-error.log");
        if !path.exists() {
            fs::File::create(&path)?;
        }
        Ok(Self{path, records: Vec::new()})
    }

    /// Append `message`, then rewrite the file with every non-expired
    /// entry, oldest first.
    pub fn log(&mut self, message: impl Into<String>) -> std::io::Result<()>
    {
        let now = SystemTime::now();
        self.records.push(Record{at: now, message: message.into()});
        self.records.retain(|r| now.duration_since(r.at).unwrap_or_default() < RETENTION);
        self.rewrite()
    }

    fn rewrite(&self) -> std::io::Result<()>
    {
        let tmp_path = self.path.with_extension("log.tmp");
        let mut tmp = fs::File::create(&tmp_path)?;
        for record in &self.records {
            let secs = record.at.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
            writeln!(tmp, "{secs} {}", record.message)?;
        }
        tmp.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn log_appends_and_persists()
    {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RecentLog::open(dir.path()).unwrap();
        log.log("first error").unwrap();
        log.log("second error").unwrap();

        let contents = fs::read_to_string(dir.path().join("tsdfx-error.log")).unwrap();
        assert!(contents.contains("first error"));
        assert!(contents.contains("second error"));
    }

    #[test]
    fn expired_entries_are_dropped_on_rewrite()
    {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RecentLog::open(dir.path()).unwrap();
        log.records.push(Record{
            at: SystemTime::now() - RETENTION - Duration::from_secs(1),
            message: "stale".into(),
        });
        log.log("fresh").unwrap();

        let contents = fs::read_to_string(dir.path().join("tsdfx-error.log")).unwrap();
        assert!(!contents.contains("stale"));
        assert!(contents.contains("fresh"));
    }
}
