// SPDX-License-Identifier: AGPL-3.0-only

//! `tsdfx-scanner`: walks a directory tree and prints one relative path
//! per line to stdout, per spec.md §4.2.

mod walk;

use {
    clap::Parser,
    std::path::{Path, PathBuf},
    tsdfx_logline::{LogSpec, Logger},
    walk::{walk, Emission, SkipReason, WalkError},
};

/// Walk PATH depth-first, printing one entry per line to stdout.
#[derive(Parser)]
#[command(name = "tsdfx-scanner")]
struct Args
{
    /// Verbose: also log directories entered, not just errors.
    #[arg(short = 'v')]
    verbose: bool,

    /// Where to send user-error log lines.
    #[arg(short = 'l', value_name = "LOGSPEC", default_value = ":stderr")]
    logspec: LogSpec,

    /// Abort once this many entries have been emitted.
    #[arg(short = 'm', value_name = "MAXFILES")]
    max_files: Option<u64>,

    /// Directory to walk.
    path: PathBuf,
}

fn main()
{
    let args = Args::parse();
    let logger = Logger::open(args.logspec.clone());
    let root = normalize(&args.path);

    let mut stdout = std::io::BufWriter::new(std::io::stdout().lock());
    use std::io::Write;

    let result = walk(
        &root,
        args.max_files,
        |emission| {
            match emission {
                Emission::File(relpath) => {
                    let _ = writeln!(stdout, "{relpath}");
                },
                Emission::Directory(relpath) => {
                    if args.verbose {
                        logger.log("INFO", "main", format_args!("entering {relpath}"));
                    }
                    let _ = writeln!(stdout, "{relpath}/");
                },
            }
            let _ = stdout.flush();
        },
        |path, reason| {
            if matches!(reason, SkipReason::Hidden) && !args.verbose {
                return;
            }
            logger.error("main", format_args!("{}: {reason}", path.display()));
        },
    );

    match result {
        Ok(()) => std::process::exit(0),
        Err(WalkError::TooManyEntries(max)) => {
            logger.error("main", format_args!("aborting: exceeded MAXFILES ({max})"));
            std::process::exit(1);
        },
        Err(e @ WalkError::Io{..}) => {
            logger.error("main", format_args!("{e}"));
            std::process::exit(1);
        },
    }
}

/// Strip a single leading `./` or `//`, per spec.md §4.2 "Path
/// normalization".
fn normalize(path: &Path) -> PathBuf
{
    let s = path.to_string_lossy();
    let stripped = s.strip_prefix("./").or_else(|| s.strip_prefix("//")).unwrap_or(&s);
    PathBuf::from(stripped.to_string())
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn normalize_strips_single_leading_dot_slash()
    {
        assert_eq!(normalize(Path::new("./foo/bar")), PathBuf::from("foo/bar"));
    }

    #[test]
    fn normalize_strips_single_leading_double_slash()
    {
        assert_eq!(normalize(Path::new("//foo")), PathBuf::from("foo"));
    }

    #[test]
    fn normalize_leaves_other_paths_alone()
    {
        assert_eq!(normalize(Path::new("/foo/bar")), PathBuf::from("/foo/bar"));
    }
}
