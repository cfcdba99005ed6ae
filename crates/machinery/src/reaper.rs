//! Process wide child reaper.
//!
//! When the process runs as PID 1 (or a subreaper) orphaned descendants are
//! reparented to it, and somebody has to collect them. [`Reaper::run`]
//! installs a `SIGCHLD` handler that harvests every exited child with
//! `waitpid(-1, WNOHANG)` and broadcasts the result to subscribers.
//!
//! Subscribers that can't keep up lose notifications instead of stalling
//! the reaper.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use lazy_static::lazy_static;
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A child collected by the reaper.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reaped {
    /// Process id of the child.
    pub pid: i32,
    /// How the child ended.
    pub status: WaitStatus,
}

/// Errors starting the reaper.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Only one reaper may exist per process.
    #[error("reaper is already running")]
    AlreadyRunning,
    /// The signal handler could not be installed.
    #[error("failed to install SIGCHLD handler: {0}")]
    Signal(#[from] std::io::Error),
}

struct Running {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

lazy_static! {
    static ref RUNNING: Mutex<Option<Running>> = Mutex::new(None);
    static ref LISTENERS: Mutex<HashMap<u64, mpsc::Sender<Reaped>>> = Mutex::new(HashMap::new());
}

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Handle to the running reaper. Dropping it stops the reaper without
/// waiting; [`Reaper::shutdown`] waits.
#[derive(Debug)]
pub struct Reaper {
    _private: (),
}

impl Reaper {
    /// Starts the reaper on the current tokio runtime.
    pub fn run() -> Result<Reaper, Error> {
        let mut running = lock(&RUNNING);
        if running.is_some() {
            return Err(Error::AlreadyRunning);
        }

        let mut signals = signal(SignalKind::child())?;
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let task = tokio::spawn(async move {
            // Children may have exited before the handler was installed.
            reap_all();
            loop {
                tokio::select! {
                    _ = stop.cancelled() => return,
                    received = signals.recv() => {
                        if received.is_none() {
                            return;
                        }
                        reap_all();
                    }
                }
            }
        });

        *running = Some(Running {
            cancel,
            task: Some(task),
        });
        debug!("reaper started");
        Ok(Reaper { _private: () })
    }

    /// Stops the reaper and waits for its loop to exit.
    pub async fn shutdown(self) {
        let task = {
            let mut running = lock(&RUNNING);
            running.as_mut().and_then(|r| {
                r.cancel.cancel();
                r.task.take()
            })
        };
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "reaper task failed");
            }
        }
        // `self` is dropped here and clears the slot.
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        if let Some(running) = lock(&RUNNING).take() {
            running.cancel.cancel();
            debug!("reaper stopped");
        }
    }
}

/// True while a [`Reaper`] exists.
pub fn is_running() -> bool {
    lock(&RUNNING).is_some()
}

/// A registration for reap notifications. Dropping it unregisters.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Reaped>,
}

impl Subscription {
    /// Next reaped child, `None` once unregistered.
    pub async fn recv(&mut self) -> Option<Reaped> {
        self.rx.recv().await
    }

    /// Waits for the child `pid`, skipping everybody else's.
    pub async fn wait_for(&mut self, pid: i32) -> Option<WaitStatus> {
        while let Some(reaped) = self.rx.recv().await {
            if reaped.pid == pid {
                return Some(reaped.status);
            }
        }
        None
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        lock(&LISTENERS).remove(&self.id);
    }
}

/// Registers for notifications with room for `capacity` pending ones.
///
/// Returns `None` when the reaper isn't running, in which case callers
/// wait for their children directly.
pub fn notify(capacity: usize) -> Option<Subscription> {
    if !is_running() {
        return None;
    }
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    lock(&LISTENERS).insert(id, tx);
    Some(Subscription { id, rx })
}

fn reap_all() {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => return,
            Ok(status) => {
                if let Some(pid) = status.pid() {
                    broadcast(Reaped {
                        pid: pid.as_raw(),
                        status,
                    });
                }
            }
            Err(Errno::EINTR) => continue,
            Err(e) => {
                warn!(error = %e, "waitpid failed");
                return;
            }
        }
    }
}

fn broadcast(reaped: Reaped) {
    let listeners: Vec<mpsc::Sender<Reaped>> = lock(&LISTENERS).values().cloned().collect();
    debug!(pid = reaped.pid, listeners = listeners.len(), "reaped child");
    for tx in listeners {
        if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(reaped) {
            warn!(pid = reaped.pid, "reaper listener is full, dropping notification");
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use std::collections::HashSet;

    lazy_static! {
        /// Serializes tests that start the process wide reaper.
        pub(crate) static ref SERIAL: tokio::sync::Mutex<()> = tokio::sync::Mutex::new(());
    }

    #[tokio::test]
    async fn notify_without_reaper() {
        let _guard = SERIAL.lock().await;
        assert!(notify(1).is_none());
    }

    #[tokio::test]
    async fn only_one_reaper() {
        let _guard = SERIAL.lock().await;
        let reaper = Reaper::run().unwrap();
        assert!(matches!(Reaper::run(), Err(Error::AlreadyRunning)));
        reaper.shutdown().await;
        assert!(!is_running());

        // Shutting down released the slot.
        Reaper::run().unwrap().shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn every_subscriber_sees_every_child() {
        let _guard = SERIAL.lock().await;
        let reaper = Reaper::run().unwrap();
        let mut first = notify(16).unwrap();
        let mut second = notify(16).unwrap();

        let mut pids = HashSet::new();
        for _ in 0..3 {
            let child = std::process::Command::new("true").spawn().unwrap();
            pids.insert(child.id() as i32);
        }

        for subscription in [&mut first, &mut second] {
            let mut seen = HashSet::new();
            while seen.len() < pids.len() {
                let reaped = tokio::time::timeout(std::time::Duration::from_secs(10), subscription.recv())
                    .await
                    .unwrap()
                    .unwrap();
                if !pids.contains(&reaped.pid) {
                    continue;
                }
                assert!(matches!(reaped.status, WaitStatus::Exited(_, 0)));
                assert!(seen.insert(reaped.pid), "pid {} seen twice", reaped.pid);
            }
            assert_eq!(pids, seen);
        }

        drop(first);
        drop(second);
        assert!(lock(&LISTENERS).is_empty());
        reaper.shutdown().await;
    }
}
