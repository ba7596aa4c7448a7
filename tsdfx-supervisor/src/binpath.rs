// SPDX-License-Identifier: AGPL-3.0-only

//! Locating the scanner/copier worker executables, per spec.md §4.3 and
//! the `TSDFX_SCANNER`/`TSDFX_COPIER` environment fallbacks (§6
//! "Environment").

use std::{
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

const SCANNER_CANDIDATES: [&str; 3] = [
    "/usr/libexec/tsdfx-scanner",
    "/usr/local/libexec/tsdfx-scanner",
    "/opt/tsd/libexec/tsdfx-scanner",
];

const COPIER_CANDIDATES: [&str; 3] = [
    "/usr/libexec/tsdfx-copier",
    "/usr/local/libexec/tsdfx-copier",
    "/opt/tsd/libexec/tsdfx-copier",
];

/// Locate the scanner binary: `-S` override, then `$TSDFX_SCANNER`, then
/// the standard libexec search path, first readable+executable match.
pub fn locate_scanner(cli_override: Option<&Path>) -> Option<PathBuf>
{
    locate(cli_override, "TSDFX_SCANNER", &SCANNER_CANDIDATES)
}

/// Locate the copier binary: `-C` override, then `$TSDFX_COPIER`, then the
/// standard libexec search path, first readable+executable match.
pub fn locate_copier(cli_override: Option<&Path>) -> Option<PathBuf>
{
    locate(cli_override, "TSDFX_COPIER", &COPIER_CANDIDATES)
}

fn locate(cli_override: Option<&Path>, env_var: &str, candidates: &[&str]) -> Option<PathBuf>
{
    let mut tried = Vec::new();
    if let Some(path) = cli_override {
        tried.push(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(env_var) {
        tried.push(PathBuf::from(path));
    }
    tried.extend(candidates.iter().map(PathBuf::from));

    tried.into_iter().find(|path| is_executable(path))
}

fn is_executable(path: &Path) -> bool
{
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use std::fs;

    #[test]
    fn cli_override_wins_when_executable()
    {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("scanner");
        fs::write(&bin, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&bin, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(locate_scanner(Some(&bin)), Some(bin));
    }

    #[test]
    fn non_executable_candidate_is_skipped()
    {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("scanner");
        fs::write(&bin, b"not a binary").unwrap();

        assert_eq!(locate_scanner(Some(&bin)), None);
    }
}
