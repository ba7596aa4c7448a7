// SPDX-License-Identifier: AGPL-3.0-only

//! The main loop: reload-on-HUP, scan/copy scheduling, and the
//! kill-signal bookkeeping that gives the process its exit code. Per
//! spec.md §4.7 "Main loop".

use {
    crate::{
        copy::Dispatcher,
        map::{self, Entry},
        recentlog::RecentLog,
        scan::Subsystem,
    },
    std::{
        cell::RefCell,
        collections::HashMap,
        path::PathBuf,
        sync::atomic::{AtomicBool, AtomicI32, Ordering},
        time::{Duration, Instant},
    },
};

/// Interval between main loop iterations.
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

static RELOAD_REQUESTED: AtomicBool = AtomicBool::new(false);
static KILL_REQUESTED: AtomicBool = AtomicBool::new(false);
static CAUGHT_SIGNAL: AtomicI32 = AtomicI32::new(0);

extern "C" fn handle_reload(_sig: libc::c_int)
{
    RELOAD_REQUESTED.store(true, Ordering::SeqCst);
}

extern "C" fn handle_kill(sig: libc::c_int)
{
    KILL_REQUESTED.store(true, Ordering::SeqCst);
    CAUGHT_SIGNAL.store(sig, Ordering::SeqCst);
}

extern "C" fn ignore(_sig: libc::c_int)
{
}

/// Install HUP (reload), INT/QUIT/PIPE/TERM (kill), and ALRM/USR1/USR2
/// (ignore) handlers. Must be called exactly once, before the main loop
/// starts.
pub fn install_signal_handlers()
{
    unsafe {
        libc::signal(libc::SIGHUP, handle_reload as usize);
        for sig in [libc::SIGINT, libc::SIGQUIT, libc::SIGPIPE, libc::SIGTERM] {
            libc::signal(sig, handle_kill as usize);
        }
        for sig in [libc::SIGALRM, libc::SIGUSR1, libc::SIGUSR2] {
            libc::signal(sig, ignore as usize);
        }
    }
}

/// What the main loop returned control for.
pub enum Outcome
{
    /// One-shot mode: both subsystems went idle.
    Drained,
    /// A kill signal was caught; carries the signal number so the caller
    /// can exit reflecting it (the 128+signum convention, per spec.md
    /// §4.7 and the original's `main()`).
    Signalled(libc::c_int),
}

/// Everything the loop needs that isn't rebuilt on every reload.
pub struct Context
{
    pub mapfile: PathBuf,
    pub one_shot: bool,
}

/// Run the main loop until one-shot drain or a kill signal.
///
/// `entries` is the currently active map; it is replaced in place on a
/// successful reload. `recentlogs` holds one [`RecentLog`] per active
/// entry's destination, keyed by entry name.
pub fn main_loop(
    ctx: &Context,
    entries: &mut Vec<Entry>,
    scan: &mut Subsystem,
    copy: &mut Dispatcher,
    recentlogs: &mut HashMap<String, RecentLog>,
) -> Outcome
{
    for entry in entries.iter() {
        let _ = scan.create(entry);
        recentlogs.entry(entry.name.clone())
            .or_insert_with(|| RecentLog::open(&entry.dst).expect("recent-log dst is writable"));
    }

    loop {
        if RELOAD_REQUESTED.swap(false, Ordering::SeqCst) {
            reload(ctx, entries, scan, recentlogs);
        }

        let by_name: HashMap<&str, &Entry> = entries.iter().map(|e| (e.name.as_str(), e)).collect();
        let recentlogs_cell = RefCell::new(&mut *recentlogs);

        scan.tick(
            Instant::now(),
            |entry_name, relpath| {
                if let Some(entry) = by_name.get(entry_name) {
                    let mut recentlogs = recentlogs_cell.borrow_mut();
                    if let Some(recentlog) = recentlogs.get_mut(entry_name) {
                        match copy.copy_wrap(&entry.src, &entry.dst, relpath, recentlog) {
                            Ok(()) => (),
                            Err(e) => { let _ = recentlog.log(format!("{relpath}: {e}")); },
                        }
                    }
                }
            },
            |entry_name, message| {
                let mut recentlogs = recentlogs_cell.borrow_mut();
                if let Some(recentlog) = recentlogs.get_mut(entry_name) {
                    let _ = recentlog.log(message.to_owned());
                }
                tracing::warn!(entry = entry_name, "{message}");
            },
        );

        copy.copy_sched();

        if ctx.one_shot && scan.nrunning() == 0 && copy.nrunning() == 0 {
            return Outcome::Drained;
        }

        if KILL_REQUESTED.load(Ordering::SeqCst) {
            return Outcome::Signalled(CAUGHT_SIGNAL.load(Ordering::SeqCst));
        }

        std::thread::sleep(TICK_INTERVAL);

        if KILL_REQUESTED.load(Ordering::SeqCst) {
            return Outcome::Signalled(CAUGHT_SIGNAL.load(Ordering::SeqCst));
        }
    }
}

/// Reload the map file, reconciling active entries against the new one.
/// On parse failure, warn and keep serving the old map (per spec.md
/// §4.6: a broken map file must not tear down already-running work).
fn reload(
    ctx: &Context,
    entries: &mut Vec<Entry>,
    scan: &mut Subsystem,
    recentlogs: &mut HashMap<String, RecentLog>,
)
{
    let contents = match std::fs::read_to_string(&ctx.mapfile) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(path = %ctx.mapfile.display(), error = %e, "cannot read map file, keeping prior map");
            return;
        },
    };

    let new_entries = match map::parse(&contents) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(error = %e, "map file reload failed, keeping prior map");
            return;
        },
    };

    let merge = map::merge(entries.as_slice(), &new_entries);

    for entry in &merge.destroy {
        scan.destroy(entry);
        recentlogs.remove(&entry.name);
    }
    for entry in &merge.keep {
        scan.rush(entry);
    }
    for entry in &merge.create {
        if let Err(e) = scan.create(entry) {
            tracing::warn!(entry = %entry.name, error = %e, "cannot create scan task for new map entry");
            continue;
        }
        recentlogs.entry(entry.name.clone())
            .or_insert_with(|| RecentLog::open(&entry.dst).expect("recent-log dst is writable"));
    }

    *entries = new_entries;
}
