// SPDX-License-Identifier: AGPL-3.0-only

//! The reconcile loop: copies a source file or directory onto a
//! destination, resumably, per spec.md §4.4.

use {
    std::{
        fs::{self, File, OpenOptions},
        io::{Read, Seek, SeekFrom, Write},
        os::unix::fs::{MetadataExt, OpenOptionsExt},
        path::Path,
        sync::atomic::{AtomicBool, Ordering},
        time::{Duration, SystemTime, UNIX_EPOCH},
    },
    tsdfx_hash::RollingDigest,
    tsdfx_logline::Logger,
};

/// Reconcile block size: 1 MiB.
pub const BLOCKSIZE: u64 = 1024 * 1024;

/// Growing-file quiescence window before a block is trusted not to be
/// mid-write.
pub const MIN_AGE: Duration = Duration::from_secs(6);

/// `copier` CLI knobs that change reconcile behavior.
pub struct Options
{
    /// `-f`: force a full reconcile even when stats already match.
    pub force: bool,
    /// `-n`: dry run — compute but don't write.
    pub dry_run: bool,
    /// `-m`: refuse to copy a source larger than this.
    pub max_size: Option<u64>,
}

/// Outcome of a successful (possibly interrupted) reconcile.
pub struct Outcome
{
    /// Bytes read from the source.
    pub bytes: u64,
    /// Hex SHA-1 of the bytes read from the source.
    pub digest: String,
    /// Whether the loop broke early rather than running to completion.
    pub interrupted: bool,
}

/// A hard failure, per spec.md §7 "Error handling design".
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError
{
    #[error("source and destination disagree on file vs. directory")]
    TypeMismatch,

    #[error("source changed identity mid-copy")]
    Stale,

    #[error("insufficient free space on destination")]
    InsufficientSpace,

    #[error("digest mismatch after copy: source {source} != dest {dest}")]
    DigestMismatch{source: String, dest: String},

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Reconcile `src` into `dst`. `src_is_dir`/`dst_is_dir` come from
/// whether the caller's path argument ended in `/`, per the "either
/// endpoint is treated as a directory iff its name ends with `/`" rule.
pub fn reconcile(
    src: &Path,
    dst: &Path,
    src_is_dir: bool,
    opts: &Options,
    stop_requested: &AtomicBool,
    logger: &Logger,
) -> Result<Outcome, ReconcileError>
{
    if src_is_dir {
        return reconcile_dir(src, dst, opts);
    }
    reconcile_file(src, dst, opts, stop_requested, logger)
}

fn reconcile_dir(src: &Path, dst: &Path, opts: &Options) -> Result<Outcome, ReconcileError>
{
    let src_meta = fs::symlink_metadata(src)?;
    if !src_meta.is_dir() {
        return Err(ReconcileError::TypeMismatch);
    }
    match fs::symlink_metadata(dst) {
        Ok(m) if !m.is_dir() => return Err(ReconcileError::TypeMismatch),
        Ok(_) => (),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if !opts.dry_run {
                fs::create_dir(dst)?;
            }
        },
        Err(e) => return Err(e.into()),
    }
    if !opts.dry_run {
        fs::set_permissions(dst, fs::Permissions::from_mode(src_meta.mode() & 0o7777))?;
        set_times(dst, src_meta.atime(), src_meta.mtime())?;
    }
    Ok(Outcome{bytes: 0, digest: String::new(), interrupted: false})
}

fn reconcile_file(
    src_path: &Path,
    dst_path: &Path,
    opts: &Options,
    stop_requested: &AtomicBool,
    logger: &Logger,
) -> Result<Outcome, ReconcileError>
{
    let mut src = File::open(src_path)?;
    let src_meta = src.metadata()?;
    if !src_meta.is_file() {
        return Err(ReconcileError::TypeMismatch);
    }
    let (src_dev, src_ino) = (src_meta.dev(), src_meta.ino());

    if let Some(max) = opts.max_size {
        if src_meta.size() > max {
            return Err(ReconcileError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("source exceeds MAXSIZE ({max} bytes)"),
            )));
        }
    }

    let dst_existed = dst_path.exists();
    let mut dst = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .mode(0o600)
        .open(dst_path)?;
    let dst_meta = dst.metadata()?;
    if dst_existed && dst_meta.is_dir() {
        return Err(ReconcileError::TypeMismatch);
    }

    let umask_bits = 0o022;
    let short_circuit = !opts.force
        && dst_existed
        && (src_meta.mode() & !umask_bits) == (dst_meta.mode() & 0o7777)
        && src_meta.size() == dst_meta.size()
        && src_meta.mtime() == dst_meta.mtime();
    if short_circuit {
        let digest = digest_of(&mut src)?;
        return Ok(Outcome{bytes: src_meta.size(), digest, interrupted: false});
    }

    if src_meta.size() > dst_meta.size() {
        check_free_space(&dst, src_meta.size() - dst_meta.size(), dst_path)?;
    }

    let mut offset: u64 = 0;
    let mut src_digest = RollingDigest::new();
    let mut interrupted = false;

    loop {
        let src_meta_now = src.metadata()?;
        if src_meta_now.dev() != src_dev || src_meta_now.ino() != src_ino {
            return Err(ReconcileError::Stale);
        }
        if src_meta_now.mode() != src_meta.mode()
            || src_meta_now.mtime() != src_meta.mtime()
            || src_meta_now.size() != src_meta.size()
        {
            logger.log("WARNING", "reconcile_file", format_args!(
                "{}: source drifted (mode/mtime/size) during copy", src_path.display()
            ));
        }

        let remaining = src_meta_now.size().saturating_sub(offset);
        if remaining < 2 * BLOCKSIZE && age_of(src_meta_now.mtime()) < MIN_AGE {
            std::thread::sleep(Duration::from_secs(1));
            continue;
        }
        if hole_too_close(&mut src, offset) {
            std::thread::sleep(Duration::from_secs(1));
            continue;
        }

        let to_read = remaining.min(BLOCKSIZE) as usize;
        if to_read == 0 {
            break;
        }
        let mut buf = vec![0u8; to_read];
        src.seek(SeekFrom::Start(offset))?;
        let n = read_full(&mut src, &mut buf)?;
        if n == 0 {
            break;
        }
        buf.truncate(n);
        src_digest.update(&buf);

        if !opts.dry_run {
            let mut existing = vec![0u8; n];
            dst.seek(SeekFrom::Start(offset))?;
            let dn = dst.read(&mut existing).unwrap_or(0);
            existing.truncate(dn);
            if existing != buf {
                dst.seek(SeekFrom::Start(offset))?;
                dst.write_all(&buf)?;
            }
        }

        offset += n as u64;

        if let Some(max) = opts.max_size {
            if offset > max {
                interrupted = true;
                break;
            }
        }
        if stop_requested.load(Ordering::SeqCst) {
            interrupted = true;
            break;
        }
    }

    if !opts.dry_run {
        dst.set_len(offset)?;
        let mode = (src_meta.mode() & 0o7777 | 0o600) & !umask_bits;
        fs::set_permissions(dst_path, fs::Permissions::from_mode(mode))?;
        set_times(dst_path, src_meta.atime(), src_meta.mtime())?;
    }

    let source_digest = src_digest.finish_hex();
    if !interrupted && !opts.dry_run {
        let mut verify = File::open(dst_path)?;
        let dest_digest = digest_of(&mut verify)?;
        if dest_digest != source_digest {
            return Err(ReconcileError::DigestMismatch{source: source_digest, dest: dest_digest});
        }
    }

    Ok(Outcome{bytes: offset, digest: source_digest, interrupted})
}

fn digest_of(file: &mut File) -> std::io::Result<String>
{
    file.seek(SeekFrom::Start(0))?;
    let mut digest = RollingDigest::new();
    let mut buf = [0u8; 65536];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        digest.update(&buf[.. n]);
    }
    Ok(digest.finish_hex())
}

fn read_full(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize>
{
    let mut total = 0;
    while total < buf.len() {
        let n = file.read(&mut buf[total ..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

fn check_free_space(dst: &File, needed: u64, dst_path: &Path) -> Result<(), ReconcileError>
{
    let vfs = tsdfx_os::fstatvfs(dst)?;
    let available = vfs.f_bavail as u64 * vfs.f_bsize as u64;
    if available < needed {
        let dst_meta = dst.metadata()?;
        if dst_meta.size() == 0 {
            let _ = fs::remove_file(dst_path);
        }
        return Err(ReconcileError::InsufficientSpace);
    }
    Ok(())
}

fn age_of(mtime: i64) -> Duration
{
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64;
    Duration::from_secs(now.saturating_sub(mtime).max(0) as u64)
}

/// On platforms with `SEEK_HOLE`, true if the next hole starts within the
/// next block and the source isn't at EOF there yet — i.e. the tail we'd
/// read is sparse and might still be filled in by a writer.
fn hole_too_close(src: &mut File, offset: u64) -> bool
{
    let len = match src.metadata() {
        Ok(m) => m.size(),
        Err(_) => return false,
    };
    let Ok(hole) = tsdfx_os::lseek(src, offset as libc::off_t, tsdfx_os::SEEK_HOLE) else {
        return false;
    };
    let hole = hole as u64;
    hole < offset + BLOCKSIZE && hole < len
}

fn set_times(path: &Path, atime: i64, mtime: i64) -> std::io::Result<()>
{
    tsdfx_os::utimes(path, atime as libc::time_t, mtime as libc::time_t)
}

#[cfg(test)]
mod tests
{
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn opts() -> Options
    {
        Options{force: false, dry_run: false, max_size: None}
    }

    #[test]
    fn copies_a_small_file()
    {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::write(&src, b"hello").unwrap();

        let stop = AtomicBool::new(false);
        let logger = Logger::open(tsdfx_logline::LogSpec::Stderr);
        let outcome = reconcile(&src, &dst, false, &opts(), &stop, &logger).unwrap();

        assert_eq!(fs::read(&dst).unwrap(), b"hello");
        assert_eq!(outcome.bytes, 5);
        assert_eq!(outcome.digest, "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
    }

    #[test]
    fn second_run_is_idempotent_once_times_match()
    {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::write(&src, b"hello").unwrap();

        let stop = AtomicBool::new(false);
        let logger = Logger::open(tsdfx_logline::LogSpec::Stderr);
        reconcile(&src, &dst, false, &opts(), &stop, &logger).unwrap();
        let meta_before = fs::metadata(&dst).unwrap();

        reconcile(&src, &dst, false, &opts(), &stop, &logger).unwrap();
        let meta_after = fs::metadata(&dst).unwrap();

        assert_eq!(meta_before.mtime(), meta_after.mtime());
        assert_eq!(fs::read(&dst).unwrap(), b"hello");
    }

    #[test]
    fn mismatched_types_are_a_hard_error()
    {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir(&src).unwrap();
        fs::write(&dst, b"x").unwrap();

        let stop = AtomicBool::new(false);
        let logger = Logger::open(tsdfx_logline::LogSpec::Stderr);
        let result = reconcile(&src, &dst, true, &opts(), &stop, &logger);
        assert!(matches!(result, Err(ReconcileError::TypeMismatch)));
    }
}
