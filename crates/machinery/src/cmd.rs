//! Runs external programs with bounded output capture.
//!
//! Stdout and stderr are kept in [`RingBuffer`]s of [`MAX_CAPTURE`] bytes, so
//! a chatty program costs a fixed amount of memory and errors carry the tail
//! of its stderr. When the [`reaper`](crate::reaper) is running the exit
//! status comes from it, otherwise the child is waited for directly.

use std::collections::VecDeque;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use resource_state::backoff::{BackoffStrategy, JitterBackoffStrategy};
use resource_state::Context;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::reaper::{self, Subscription};

/// Bytes of stdout and stderr kept per command.
pub const MAX_CAPTURE: usize = 4096;

/// Errors running a command.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The program could not be started.
    #[error("failed to start {name}: {source}")]
    Spawn {
        /// Program name.
        name: String,
        /// Why the spawn failed.
        #[source]
        source: std::io::Error,
    },
    /// Reading output or waiting for the child failed.
    #[error("io error running command: {0}")]
    Io(#[from] std::io::Error),
    /// The program ended with a non-zero status or by a signal.
    #[error("{name}: {status}: {stderr}")]
    External {
        /// Program name.
        name: String,
        /// Exit code or terminating signal.
        status: Exit,
        /// Tail of the captured stderr.
        stderr: String,
    },
    /// The program ran longer than allowed and was killed.
    #[error("{name}: timed out after {timeout:?}")]
    Timeout {
        /// Program name.
        name: String,
        /// The limit that was exceeded.
        timeout: Duration,
    },
    /// The reaper stopped before reporting the child.
    #[error("{0}: reaper stopped before the command exited")]
    ReaperGone(String),
    /// The context was cancelled while retrying.
    #[error("cancelled")]
    Cancelled,
}

/// How a command ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exit {
    /// Exited with this status code.
    Code(i32),
    /// Killed by this signal number.
    Signal(i32),
}

impl Exit {
    /// True for exit code 0.
    pub fn success(&self) -> bool {
        *self == Exit::Code(0)
    }
}

impl std::fmt::Display for Exit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Exit::Code(code) => write!(f, "exit status {}", code),
            Exit::Signal(signal) => match Signal::try_from(*signal) {
                Ok(signal) => write!(f, "signal: {}", signal.as_str()),
                Err(_) => write!(f, "signal: {}", signal),
            },
        }
    }
}

impl From<ExitStatus> for Exit {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => Exit::Code(code),
            (None, Some(signal)) => Exit::Signal(signal),
            (None, None) => Exit::Code(-1),
        }
    }
}

impl From<WaitStatus> for Exit {
    fn from(status: WaitStatus) -> Self {
        match status {
            WaitStatus::Exited(_, code) => Exit::Code(code),
            WaitStatus::Signaled(_, signal, _) => Exit::Signal(signal as i32),
            _ => Exit::Code(-1),
        }
    }
}

/// Keeps the last `capacity` bytes written to it.
#[derive(Clone, Debug)]
pub struct RingBuffer {
    data: VecDeque<u8>,
    capacity: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        RingBuffer {
            data: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `bytes`, dropping the oldest ones past capacity.
    pub fn write(&mut self, bytes: &[u8]) {
        let bytes = if bytes.len() > self.capacity {
            &bytes[bytes.len() - self.capacity..]
        } else {
            bytes
        };
        let overflow = (self.data.len() + bytes.len()).saturating_sub(self.capacity);
        self.data.drain(..overflow);
        self.data.extend(bytes);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Contents as text, invalid UTF-8 replaced.
    pub fn to_string_lossy(&self) -> String {
        let (a, b) = self.data.as_slices();
        let mut bytes = Vec::with_capacity(a.len() + b.len());
        bytes.extend_from_slice(a);
        bytes.extend_from_slice(b);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Process settings for [`run`].
#[derive(Clone, Debug, Default)]
pub struct Options {
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Working directory.
    pub dir: Option<PathBuf>,
    /// Written to stdin, which is closed afterwards.
    pub stdin: Option<Vec<u8>>,
    /// The child is killed once this elapses.
    pub timeout: Option<Duration>,
}

fn capture<R>(pipe: Option<R>) -> JoinHandle<RingBuffer>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut ring = RingBuffer::new(MAX_CAPTURE);
        if let Some(mut pipe) = pipe {
            let mut chunk = [0u8; 1024];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => ring.write(&chunk[..n]),
                    Err(e) => {
                        debug!(error = %e, "output pipe read failed");
                        break;
                    }
                }
            }
        }
        ring
    })
}

async fn wait(name: &str, child: &mut Child, subscription: Option<&mut Subscription>, pid: i32) -> Result<Exit, Error> {
    match subscription {
        Some(subscription) => subscription
            .wait_for(pid)
            .await
            .map(Exit::from)
            .ok_or_else(|| Error::ReaperGone(name.to_string())),
        None => Ok(Exit::from(child.wait().await?)),
    }
}

/// Runs `name` with `args` and returns its stdout.
///
/// Stderr is only surfaced in the error of a failed run.
pub async fn run(name: &str, args: &[&str], options: &Options) -> Result<String, Error> {
    let mut command = Command::new(name);
    command
        .args(args)
        .stdin(if options.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in &options.env {
        command.env(key, value);
    }
    if let Some(dir) = &options.dir {
        command.current_dir(dir);
    }

    // Subscribe before spawning so the exit can't be missed.
    let mut subscription = reaper::notify(8);
    let mut child = command.spawn().map_err(|source| Error::Spawn {
        name: name.to_string(),
        source,
    })?;
    let pid = child.id().map(|id| id as i32).unwrap_or_default();
    debug!(command = name, pid, "started");

    if let (Some(data), Some(mut pipe)) = (options.stdin.clone(), child.stdin.take()) {
        tokio::spawn(async move {
            if let Err(e) = pipe.write_all(&data).await {
                debug!(error = %e, "stdin write failed");
            }
        });
    }
    let stdout = capture(child.stdout.take());
    let stderr = capture(child.stderr.take());

    let exit = match options.timeout {
        None => wait(name, &mut child, subscription.as_mut(), pid).await?,
        Some(timeout) => {
            match tokio::time::timeout(timeout, wait(name, &mut child, subscription.as_mut(), pid)).await {
                Ok(exit) => exit?,
                Err(_) => {
                    warn!(command = name, pid, ?timeout, "killing command after timeout");
                    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGKILL) {
                        debug!(error = %e, pid, "kill failed");
                    }
                    if let Err(e) = wait(name, &mut child, subscription.as_mut(), pid).await {
                        warn!(command = name, pid, error = %e, "failed to collect killed command");
                    }
                    return Err(Error::Timeout {
                        name: name.to_string(),
                        timeout,
                    });
                }
            }
        }
    };

    let stdout = stdout.await.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    let stderr = stderr.await.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    if !exit.success() {
        return Err(Error::External {
            name: name.to_string(),
            status: exit,
            stderr: stderr.to_string_lossy(),
        });
    }
    if !stderr.is_empty() {
        debug!(command = name, stderr = %stderr.to_string_lossy(), "command wrote to stderr");
    }
    Ok(stdout.to_string_lossy())
}

/// Retry schedule for [`run_with_retry`].
#[derive(Clone, Copy, Debug)]
pub struct Retry {
    /// Give up once this much time has passed.
    pub total: Duration,
    /// Fixed wait between attempts.
    pub interval: Duration,
    /// Random extra delay added to each interval.
    pub jitter: Duration,
}

impl Default for Retry {
    fn default() -> Self {
        Retry {
            total: Duration::from_secs(8 * 60),
            interval: Duration::from_secs(3),
            jitter: Duration::from_secs(1),
        }
    }
}

impl Retry {
    /// The wait between attempts: `interval` plus up to `jitter`.
    pub fn backoff(&self) -> JitterBackoffStrategy {
        JitterBackoffStrategy::new(self.interval, self.jitter)
    }
}

/// [`run`] until it succeeds, `retry.total` elapses or `ctx` is cancelled.
/// The last error is returned when time runs out.
pub async fn run_with_retry(
    ctx: &Context,
    retry: Retry,
    name: &str,
    args: &[&str],
    options: &Options,
) -> Result<String, Error> {
    let deadline = tokio::time::Instant::now() + retry.total;
    let mut backoff = retry.backoff();
    let mut attempt = 1u32;
    loop {
        let err = match run(name, args, options).await {
            Ok(stdout) => return Ok(stdout),
            Err(e) => e,
        };

        let delay = backoff.next_duration();
        if tokio::time::Instant::now() + delay > deadline {
            return Err(err);
        }
        info!(command = name, attempt, error = %err, "command failed, retrying in {:?}", delay);
        attempt += 1;

        tokio::select! {
            _ = ctx.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
