//! The supervisor process (spec §4.I "Supervisor").
//!
//! Binds the listening socket with `SO_REUSEPORT`, forks N workers that
//! each re-bind the same address (so the kernel load-balances `accept()`
//! across them independently), pins each to a core, and reaps/restarts
//! crashed workers until the consecutive-failure budget is blown. Signals
//! are the only inter-process control channel: the supervisor forwards
//! INT/TERM/HUP to the worker group and itself, CHLD drives reap/restart,
//! PIPE is ignored.

use std::net::SocketAddr;
use std::os::fd::{AsRawFd, FromRawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{info, warn};

use crate::access_log::{AccessLog, FileAccessLog, NullAccessLog};
use crate::config::Config;
use crate::error::Error;
use crate::server::worker::{Worker, WorkerSignals};
use crate::Engine;

/// Consecutive worker-restart failures that make the supervisor give up
/// (spec §4.I: "a run of >= 5 consecutive restart failures").
const RESTART_FAILURE_BUDGET: u32 = 5;

/// One restart attempt within a half second counts as consecutive
/// failure rather than a legitimate long-lived worker crashing; anything
/// further apart resets the counter, matching the spirit of spec §4.I's
/// "worker crashes are restarted" without treating a worker that ran for
/// hours as a budget-consuming failure.
const FAILURE_WINDOW: Duration = Duration::from_millis(500);

struct Slot {
    pid: libc::pid_t,
    last_fork_at: Instant,
    consecutive_failures: u32,
}

/// Binds, forks, and supervises `config.worker_processes` workers until a
/// shutdown signal is handled, or the restart budget is exceeded.
///
/// `config_path` is retained (rather than just the already-loaded
/// `config`) so a `SIGHUP` reload can re-read the file from disk instead
/// of just re-applying the values captured at startup (SPEC_FULL.md §C
/// "Reload detail"); `force_dev` re-applies the CLI's `-d`/`--dev`
/// override on top of whatever the reloaded file says, since that flag
/// has no on-disk representation to survive the re-read.
pub fn run(config: Config, config_path: std::path::PathBuf, force_dev: bool) -> Result<(), Error> {
    let addr: SocketAddr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = bind_reuseport(addr).map_err(|source| Error::Bind { addr: addr.to_string(), source })?;

    info!(
        addr = %addr,
        workers = config.worker_processes,
        root = %config.root.display(),
        "edgecached starting"
    );

    let num_cpus = available_parallelism();
    let shutdown = Arc::new(AtomicBool::new(false));
    let reload = Arc::new(AtomicBool::new(false));
    install_signal_handlers(&shutdown, &reload)?;

    let mut slots: Vec<Slot> = Vec::with_capacity(config.worker_processes);
    for index in 0..config.worker_processes {
        let pid = fork_worker(index, num_cpus, &listener, &config, &config_path, force_dev)?;
        slots.push(Slot { pid, last_fork_at: Instant::now(), consecutive_failures: 0 });
    }

    supervise(&mut slots, &listener, &config, &config_path, force_dev, num_cpus, &shutdown, &reload)
}

/// The reap/restart/signal-propagation loop. Runs in the parent process
/// only; each `Slot`'s `pid` is a forked worker's (spec §4.I "Watches for
/// worker exit via child-process reap").
#[allow(clippy::too_many_arguments)]
fn supervise(
    slots: &mut [Slot],
    listener: &Socket,
    config: &Config,
    config_path: &std::path::Path,
    force_dev: bool,
    num_cpus: usize,
    shutdown: &Arc<AtomicBool>,
    reload: &Arc<AtomicBool>,
) -> Result<(), Error> {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return drain_and_exit(slots);
        }
        if reload.swap(false, Ordering::Relaxed) {
            warn!("SIGHUP received: port/worker_processes changes require a restart; other settings apply to new connections only");
            forward_signal(slots, libc::SIGHUP);
        }

        let mut status: libc::c_int = 0;
        // WNOHANG so a quiet period returns immediately rather than
        // blocking the signal-forwarding checks above.
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
        if pid <= 0 {
            std::thread::sleep(Duration::from_millis(200));
            continue;
        }

        let Some(index) = slots.iter().position(|s| s.pid == pid) else { continue };
        if shutdown.load(Ordering::Relaxed) {
            continue;
        }

        let now = Instant::now();
        let slot = &mut slots[index];
        if now.duration_since(slot.last_fork_at) < FAILURE_WINDOW {
            slot.consecutive_failures += 1;
        } else {
            slot.consecutive_failures = 0;
        }

        if slot.consecutive_failures >= RESTART_FAILURE_BUDGET {
            return Err(Error::RestartBudgetExceeded { index });
        }

        warn!(worker = index, pid, "worker exited, restarting");
        let new_pid = fork_worker(index, num_cpus, listener, config, config_path, force_dev)?;
        slots[index] = Slot { pid: new_pid, last_fork_at: now, consecutive_failures: slot.consecutive_failures };
    }
}

/// SIGTERM every worker, wait up to 5s for them to drain on their own
/// (spec C "Graceful drain detail"), then SIGKILL stragglers.
fn drain_and_exit(slots: &[Slot]) -> Result<(), Error> {
    info!("shutdown signal received, draining workers");
    forward_signal(slots, libc::SIGTERM);

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut remaining: Vec<libc::pid_t> = slots.iter().map(|s| s.pid).collect();
    while Instant::now() < deadline && !remaining.is_empty() {
        remaining.retain(|&pid| {
            let mut status: libc::c_int = 0;
            let r = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
            r == 0
        });
        if !remaining.is_empty() {
            std::thread::sleep(Duration::from_millis(100));
        }
    }
    for pid in remaining {
        unsafe {
            libc::kill(pid, libc::SIGKILL);
            libc::waitpid(pid, std::ptr::null_mut(), 0);
        }
    }
    info!("all workers exited, supervisor shutting down");
    Ok(())
}

fn forward_signal(slots: &[Slot], signal: libc::c_int) {
    for slot in slots {
        unsafe {
            libc::kill(slot.pid, signal);
        }
    }
}

/// Binds once in the supervisor with `SO_REUSEPORT` set and a backlog at
/// the kernel ceiling (spec §4.I: "Applies listen backlog equal to the
/// kernel ceiling"). Workers are forked after this call and inherit the
/// same listening descriptor (spec §2 control flow: "binds and listens,
/// then forks N workers ... on the same listening descriptor"), so every
/// worker ends up `accept()`-ing from the one shared kernel accept queue.
fn bind_reuseport(addr: SocketAddr) -> std::io::Result<Socket> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(listen_backlog())?;
    Ok(socket)
}

fn listen_backlog() -> i32 {
    std::fs::read_to_string("/proc/sys/net/core/somaxconn")
        .ok()
        .and_then(|s| s.trim().parse::<i32>().ok())
        .unwrap_or(1024)
}

/// Forks worker `index`, pinning it to core `index % num_cpus` (spec §4.I
/// "Pins each worker to one core", SPEC_FULL.md §C). The child never
/// returns from this function: it runs the worker loop and calls
/// `std::process::exit`.
fn fork_worker(
    index: usize,
    num_cpus: usize,
    listener: &Socket,
    config: &Config,
    config_path: &std::path::Path,
    force_dev: bool,
) -> Result<libc::pid_t, Error> {
    // Flushed before forking so buffered log lines aren't duplicated into
    // both the parent's and the child's copy of stdout.
    use std::io::Write as _;
    let _ = std::io::stdout().flush();

    let pid = unsafe { libc::fork() };
    match pid {
        -1 => Err(Error::Fork { index, source: std::io::Error::last_os_error() }),
        0 => {
            if let Err(e) = pin_to_core(index % num_cpus.max(1)) {
                warn!(worker = index, error = %e, "failed to set CPU affinity, continuing unpinned");
            }
            run_worker(index, listener, config, config_path, force_dev);
            std::process::exit(0);
        }
        child => {
            info!(worker = index, pid = child, core = index % num_cpus.max(1), "worker started");
            Ok(child)
        }
    }
}

fn pin_to_core(core: usize) -> std::io::Result<()> {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        let rc = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

fn available_parallelism() -> usize {
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if n > 0 {
        n as usize
    } else {
        1
    }
}

/// The body of a forked worker process: builds its own `mio` listener
/// from the shared fd, its own engine/cache/rate-limiter, and runs the
/// connection loop until told to drain.
fn run_worker(index: usize, listener: &Socket, config: &Config, config_path: &std::path::Path, force_dev: bool) {
    // `fork()` duplicated the listening fd into this process's own
    // descriptor table; wrapping it here takes ownership of this
    // process's copy only; the parent's `Socket` in its own address
    // space is unaffected when this process exits.
    let std_listener = unsafe { std::net::TcpListener::from_raw_fd(listener.as_raw_fd()) };
    let mio_listener = mio::net::TcpListener::from_std(std_listener);

    let cache = crate::cache::Cache::new(config.cache_size, Duration::from_secs(config.cache_timeout));
    let engine = Arc::new(Engine::new(config.root.clone(), cache, config.keep_alive_timeout));

    let access_log: Arc<dyn AccessLog> = match FileAccessLog::open(&config.log) {
        Ok(log) => Arc::new(log),
        Err(e) => {
            warn!(worker = index, error = %e, path = %config.log.display(), "failed to open access log, discarding records");
            Arc::new(NullAccessLog)
        }
    };

    let signals = Arc::new(WorkerSignals::default());
    install_worker_signal_handlers(&signals);

    let mut worker = match Worker::new(
        mio_listener,
        engine,
        access_log,
        config.development_mode,
        config.keep_alive_timeout,
        config.max_connections,
        crate::limits::BUFFER_POOL_CAPACITY,
        signals,
        config_path.to_path_buf(),
        force_dev,
    ) {
        Ok(w) => w,
        Err(e) => {
            warn!(worker = index, error = %e, "worker failed to initialize poll, exiting");
            return;
        }
    };

    if let Err(e) = worker.run() {
        warn!(worker = index, error = %e, "worker loop exited with error");
    }
}

fn install_signal_handlers(shutdown: &Arc<AtomicBool>, reload: &Arc<AtomicBool>) -> Result<(), Error> {
    use signal_hook::consts::{SIGHUP, SIGINT, SIGPIPE, SIGTERM};
    use signal_hook::flag;

    flag::register(SIGINT, shutdown.clone())
        .map_err(|source| Error::Signal { signal: "SIGINT", source })?;
    flag::register(SIGTERM, shutdown.clone())
        .map_err(|source| Error::Signal { signal: "SIGTERM", source })?;
    flag::register(SIGHUP, reload.clone())
        .map_err(|source| Error::Signal { signal: "SIGHUP", source })?;
    unsafe {
        libc::signal(SIGPIPE, libc::SIG_IGN);
    }
    Ok(())
}

/// Each worker independently handles INT/TERM as "stop accepting, drain,
/// exit" (spec C) rather than relying on the parent to kill it outright,
/// so a worker signaled directly (not just via the supervisor) still
/// drains gracefully.
fn install_worker_signal_handlers(signals: &Arc<WorkerSignals>) {
    use signal_hook::consts::{SIGHUP, SIGINT, SIGPIPE, SIGTERM};
    use signal_hook::flag;

    let _ = flag::register(SIGINT, Arc::clone(&signals.shutdown));
    let _ = flag::register(SIGTERM, Arc::clone(&signals.shutdown));
    let _ = flag::register(SIGHUP, Arc::clone(&signals.reload));
    unsafe {
        libc::signal(SIGPIPE, libc::SIG_IGN);
    }
}
