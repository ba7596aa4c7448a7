// SPDX-License-Identifier: AGPL-3.0-only

//! `tsdfx`: the privileged supervisor. Per spec.md §6 "Supervisor CLI".

use {
    clap::Parser,
    std::{collections::HashMap, path::PathBuf, process::ExitCode},
    tsdfx_logline::LogSpec,
    tsdfx_supervisor::{binpath, copy, map, pidfile::PidFile, recentlog::RecentLog, run, scan},
};

/// One supervisor-wide cap on concurrently running scan tasks. Unlike the
/// copy dispatcher's two size-partitioned queues, spec.md gives the scan
/// subsystem no analogous budget; this keeps a pathologically large map
/// file from forking hundreds of scanners at once.
const MAX_CONCURRENT_SCANS: usize = 64;

#[derive(Parser)]
#[command(name = "tsdfx", version)]
struct Args
{
    /// One-shot: run each active entry once, then exit.
    #[arg(short = '1')]
    one_shot: bool,

    /// Dry run: pass `-n` through to every copier child.
    #[arg(short = 'n')]
    dry_run: bool,

    /// Verbose: lower the log level from INFO to DEBUG.
    #[arg(short = 'v')]
    verbose: bool,

    /// Where to send log lines.
    #[arg(short = 'l', value_name = "LOG", default_value = ":stderr")]
    logspec: LogSpec,

    /// Override the copier binary path.
    #[arg(short = 'C', value_name = "COPIER")]
    copier: Option<PathBuf>,

    /// Override the scanner binary path.
    #[arg(short = 'S', value_name = "SCANNER")]
    scanner: Option<PathBuf>,

    /// Override the pid file path.
    #[arg(short = 'p', value_name = "PIDFILE", default_value = tsdfx_supervisor::pidfile::DEFAULT_PATH)]
    pidfile: PathBuf,

    /// The map file.
    #[arg(short = 'm', value_name = "MAPFILE")]
    mapfile: PathBuf,
}

fn main() -> ExitCode
{
    let args = Args::parse();

    let Some(scanner_path) = binpath::locate_scanner(args.scanner.as_deref()) else {
        eprintln!("tsdfx: cannot locate tsdfx-scanner (pass -S or set $TSDFX_SCANNER)");
        return ExitCode::from(1);
    };
    let Some(copier_path) = binpath::locate_copier(args.copier.as_deref()) else {
        eprintln!("tsdfx: cannot locate tsdfx-copier (pass -C or set $TSDFX_COPIER)");
        return ExitCode::from(1);
    };

    let _pidfile = match PidFile::acquire(&args.pidfile) {
        Ok(pidfile) => pidfile,
        Err(e) => {
            eprintln!("tsdfx: {e}");
            return ExitCode::from(1);
        },
    };

    tsdfx_supervisor::logging::init(&args.logspec, args.verbose);

    let contents = match std::fs::read_to_string(&args.mapfile) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(path = %args.mapfile.display(), error = %e, "cannot read map file");
            return ExitCode::from(1);
        },
    };
    let mut entries = match map::parse(&contents) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!(error = %e, "cannot parse map file");
            return ExitCode::from(1);
        },
    };

    run::install_signal_handlers();

    let ctx = run::Context{
        mapfile: args.mapfile.clone(),
        one_shot: args.one_shot,
    };
    let copy_opts = copy::Options{dry_run: args.dry_run, verbose: args.verbose, max_size: None};

    let mut scan_subsystem = scan::Subsystem::new(scanner_path, MAX_CONCURRENT_SCANS);
    let mut copy_dispatcher = copy::Dispatcher::new(copier_path, copy_opts);
    let mut recentlogs: HashMap<String, RecentLog> = HashMap::new();

    match run::main_loop(&ctx, &mut entries, &mut scan_subsystem, &mut copy_dispatcher, &mut recentlogs) {
        run::Outcome::Drained => ExitCode::from(0),
        run::Outcome::Signalled(sig) => {
            tracing::info!(signal = sig, "caught termination signal, exiting");
            if sig == libc::SIGTERM {
                ExitCode::from(0)
            } else {
                ExitCode::from((128 + sig) as u8)
            }
        },
    }
}
