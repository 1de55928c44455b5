//! Per-identity user server supervision.
//!
//! Each [`UserServer`] owns one background task that launches the identity's
//! file server, learns its address from the first stdout line, and relaunches
//! it after a fixed backoff whenever it exits. Closing cancels the task,
//! which kills the running process.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::launcher::{LaunchedServer, Launcher, OutputStream, ServerProcess};
use crate::share::Share;

/// Lifecycle of a user server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerStatus {
    /// Launching, or waiting for the address line.
    #[default]
    Starting,
    /// Address announced, process alive.
    Running,
    /// Process exited or failed to start; relaunch pending.
    Crashed,
    /// Closed for good.
    Closed,
}

/// Observable state of a user server.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerState {
    pub status: ServerStatus,
    /// Announced address of the live process.
    pub addr: Option<String>,
    /// Number of launch attempts so far.
    pub launches: u64,
}

/// Supervised file server running as one local identity.
pub struct UserServer {
    identity: String,
    shares: Vec<Arc<Share>>,
    state: Arc<watch::Sender<ServerState>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for UserServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserServer")
            .field("identity", &self.identity)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl UserServer {
    /// Start supervising a server for `identity`.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(
        identity: impl Into<String>,
        shares: Vec<Arc<Share>>,
        launcher: Arc<dyn Launcher>,
        backoff: Duration,
    ) -> Self {
        let identity = identity.into();
        let state = Arc::new(watch::Sender::new(ServerState::default()));
        let cancel = CancellationToken::new();

        let supervisor = Supervisor {
            identity: identity.clone(),
            shares: shares.clone(),
            launcher,
            backoff,
            state: state.clone(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(supervisor.run());

        Self {
            identity,
            shares,
            state,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn shares(&self) -> &[Arc<Share>] {
        &self.shares
    }

    /// Address of the running process, if one has announced.
    pub fn addr(&self) -> Option<String> {
        self.state.borrow().addr.clone()
    }

    pub fn status(&self) -> ServerStatus {
        self.state.borrow().status
    }

    pub fn launches(&self) -> u64 {
        self.state.borrow().launches
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Stop supervising and kill the process. Idempotent.
    pub async fn close(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(identity = %self.identity, error = %e, "user server task failed");
            }
            info!(identity = %self.identity, "user server closed");
        }
        self.state.send_modify(|s| {
            s.status = ServerStatus::Closed;
            s.addr = None;
        });
    }
}

impl Drop for UserServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Group shares by the identity that serves them.
pub fn group_by_identity<'a>(
    shares: impl IntoIterator<Item = &'a Arc<Share>>,
) -> BTreeMap<String, Vec<Arc<Share>>> {
    let mut groups: BTreeMap<String, Vec<Arc<Share>>> = BTreeMap::new();
    for share in shares {
        groups
            .entry(share.run_as.clone())
            .or_default()
            .push(share.clone());
    }
    groups
}

/// How one process lifetime ended.
enum Exit {
    Exited(Option<i32>),
    Cancelled,
}

struct Supervisor {
    identity: String,
    shares: Vec<Arc<Share>>,
    launcher: Arc<dyn Launcher>,
    backoff: Duration,
    state: Arc<watch::Sender<ServerState>>,
    cancel: CancellationToken,
}

impl Supervisor {
    async fn run(self) {
        while !self.cancel.is_cancelled() {
            self.state.send_modify(|s| {
                s.status = ServerStatus::Starting;
                s.launches += 1;
            });

            match self.run_once().await {
                Ok(Exit::Cancelled) => break,
                Ok(Exit::Exited(code)) => {
                    warn!(identity = %self.identity, ?code, "user server exited");
                }
                Err(e) => {
                    warn!(identity = %self.identity, error = %e, "user server failed");
                }
            }

            self.state.send_modify(|s| {
                s.status = ServerStatus::Crashed;
                s.addr = None;
            });

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.backoff) => {}
            }
            debug!(identity = %self.identity, "relaunching user server");
        }

        self.state.send_modify(|s| s.addr = None);
    }

    async fn run_once(&self) -> io::Result<Exit> {
        let launched = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(Exit::Cancelled),
            launched = self.launcher.launch(&self.identity, &self.shares) => launched?,
        };
        let LaunchedServer {
            stdout,
            stderr,
            mut process,
        } = launched;

        tokio::spawn(drain(
            self.identity.clone(),
            "stderr",
            BufReader::new(stderr).lines(),
            self.cancel.clone(),
        ));

        let mut stdout = BufReader::new(stdout).lines();
        let first = tokio::select! {
            _ = self.cancel.cancelled() => None,
            line = stdout.next_line() => Some(line),
        };
        let addr = match first {
            None => {
                self.kill(&mut process).await;
                return Ok(Exit::Cancelled);
            }
            Some(Ok(Some(line))) if !line.trim().is_empty() => line.trim().to_string(),
            Some(Ok(_)) => {
                self.kill(&mut process).await;
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "user server did not announce an address",
                ));
            }
            Some(Err(e)) => {
                self.kill(&mut process).await;
                return Err(e);
            }
        };

        info!(identity = %self.identity, addr = %addr, "user server running");
        self.state.send_modify(|s| {
            s.status = ServerStatus::Running;
            s.addr = Some(addr);
        });

        tokio::spawn(drain(
            self.identity.clone(),
            "stdout",
            stdout,
            self.cancel.clone(),
        ));

        let waited = tokio::select! {
            _ = self.cancel.cancelled() => None,
            status = process.wait() => Some(status),
        };
        match waited {
            None => {
                self.kill(&mut process).await;
                Ok(Exit::Cancelled)
            }
            Some(status) => Ok(Exit::Exited(status?)),
        }
    }

    async fn kill(&self, process: &mut Box<dyn ServerProcess>) {
        if let Err(e) = process.kill().await {
            debug!(identity = %self.identity, error = %e, "kill failed");
        }
    }
}

/// Forward a server's output to the log until EOF or close.
async fn drain(
    identity: String,
    stream: &'static str,
    mut lines: Lines<BufReader<OutputStream>>,
    cancel: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => info!(identity = %identity, stream, "{line}"),
            Ok(None) => break,
            Err(e) => {
                debug!(identity = %identity, stream, error = %e, "output read failed");
                break;
            }
        }
    }
}
