// SPDX-License-Identifier: AGPL-3.0-only

//! `tsdfx-copier`: reconciles SRC into DST, per spec.md §4.4.

mod reconcile;

use {
    clap::Parser,
    reconcile::{reconcile, Options, ReconcileError},
    std::{
        path::PathBuf,
        sync::atomic::{AtomicBool, Ordering},
    },
    tsdfx_logline::{LogSpec, Logger},
};

static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);
static STOP_SIGNAL: AtomicBool = AtomicBool::new(false);

/// Reconcile SRC into DST.
#[derive(Parser)]
#[command(name = "tsdfx-copier")]
struct Args
{
    /// Force a full reconcile even when stats already match.
    #[arg(short = 'f')]
    force: bool,

    /// Dry run: compute but don't write.
    #[arg(short = 'n')]
    dry_run: bool,

    /// Verbose.
    #[arg(short = 'v')]
    verbose: bool,

    /// Where to send log lines.
    #[arg(short = 'l', value_name = "LOGSPEC", default_value = ":stderr")]
    logspec: LogSpec,

    /// Refuse to copy a source larger than this many bytes.
    #[arg(short = 'm', value_name = "MAXSIZE")]
    max_size: Option<u64>,

    /// Source path; trailing `/` marks it as a directory.
    src: String,

    /// Destination path; trailing `/` marks it as a directory.
    dst: String,
}

extern "C" fn handle_stop_signal(sig: libc::c_int)
{
    STOP_REQUESTED.store(true, Ordering::SeqCst);
    STOP_SIGNAL.store(sig != 0, Ordering::SeqCst);
    LAST_SIGNAL.store(sig, Ordering::SeqCst);
}

static LAST_SIGNAL: std::sync::atomic::AtomicI32 = std::sync::atomic::AtomicI32::new(0);

fn install_signal_handlers()
{
    unsafe {
        libc::signal(libc::SIGINT, handle_stop_signal as usize);
        libc::signal(libc::SIGTERM, handle_stop_signal as usize);
    }
}

fn main()
{
    let args = Args::parse();
    let logger = Logger::open(args.logspec.clone());

    unsafe {
        libc::umask(0o007);
    }
    install_signal_handlers();

    let src_is_dir = args.src.ends_with('/');
    let dst_is_dir = args.dst.ends_with('/');
    if src_is_dir != dst_is_dir {
        logger.error("main", format_args!("source and destination disagree on trailing slash"));
        std::process::exit(1);
    }

    let src = PathBuf::from(args.src.trim_end_matches('/'));
    let dst = PathBuf::from(args.dst.trim_end_matches('/'));

    let opts = Options{force: args.force, dry_run: args.dry_run, max_size: args.max_size};
    let start = std::time::Instant::now();

    match reconcile(&src, &dst, src_is_dir, &opts, &STOP_REQUESTED, &logger) {
        Ok(outcome) if outcome.interrupted => {
            logger.log("WARNING", "main", format_args!(
                "interrupted after {} bytes, digest so far {} ({:?})",
                outcome.bytes, outcome.digest, start.elapsed(),
            ));
            if STOP_SIGNAL.load(Ordering::SeqCst) {
                reraise(LAST_SIGNAL.load(Ordering::SeqCst));
            }
            std::process::exit(0);
        },
        Ok(outcome) => {
            logger.log("INFO", "main", format_args!(
                "{} -> {}: {} bytes, digest {} ({:?})",
                src.display(), dst.display(), outcome.bytes, outcome.digest, start.elapsed(),
            ));
            std::process::exit(0);
        },
        Err(e @ ReconcileError::DigestMismatch{..}) => {
            logger.error("main", format_args!("{e}"));
            std::process::exit(1);
        },
        Err(e) => {
            logger.error("main", format_args!("{e}"));
            std::process::exit(1);
        },
    }
}

fn reraise(sig: libc::c_int)
{
    unsafe {
        libc::signal(sig, libc::SIG_DFL);
        libc::raise(sig);
    }
}
