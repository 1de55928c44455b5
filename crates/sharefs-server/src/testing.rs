//! Test doubles for the supervisor.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;

use crate::launcher::{LaunchedServer, Launcher, ServerProcess};
use crate::share::Share;

struct Launch {
    identity: String,
    shares: Vec<String>,
    exit: Option<oneshot::Sender<Option<i32>>>,
}

/// Launcher whose processes live until crashed or killed.
///
/// Every launch announces `127.0.0.1:<port>` with ports counting up from
/// 9000, unless announcing is switched off.
pub struct FakeLauncher {
    next_port: AtomicU16,
    announce: AtomicBool,
    fail: AtomicBool,
    launches: Mutex<Vec<Launch>>,
    kills: Arc<Mutex<Vec<String>>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self {
            next_port: AtomicU16::new(9000),
            announce: AtomicBool::new(true),
            fail: AtomicBool::new(false),
            launches: Mutex::new(Vec::new()),
            kills: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set_announce(&self, announce: bool) {
        self.announce.store(announce, Ordering::SeqCst);
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Make the newest live process for `identity` exit with status 1.
    pub fn crash(&self, identity: &str) -> bool {
        let mut launches = self.launches.lock();
        let live = launches
            .iter_mut()
            .rev()
            .filter(|l| l.identity == identity)
            .find_map(|l| l.exit.take());
        match live {
            Some(exit) => exit.send(Some(1)).is_ok(),
            None => false,
        }
    }

    pub fn launch_count(&self, identity: &str) -> usize {
        self.launches
            .lock()
            .iter()
            .filter(|l| l.identity == identity)
            .count()
    }

    /// Share names passed to the newest launch for `identity`.
    pub fn shares_of(&self, identity: &str) -> Vec<String> {
        self.launches
            .lock()
            .iter()
            .rev()
            .find(|l| l.identity == identity)
            .map(|l| l.shares.clone())
            .unwrap_or_default()
    }

    pub fn kill_count(&self, identity: &str) -> usize {
        self.kills.lock().iter().filter(|i| *i == identity).count()
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(&self, identity: &str, shares: &[Arc<Share>]) -> io::Result<LaunchedServer> {
        if self.fail.load(Ordering::SeqCst) {
            self.launches.lock().push(Launch {
                identity: identity.to_string(),
                shares: Vec::new(),
                exit: None,
            });
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such program"));
        }

        let (mut stdout_tx, stdout_rx) = tokio::io::duplex(256);
        let (mut stderr_tx, stderr_rx) = tokio::io::duplex(256);
        if self.announce.load(Ordering::SeqCst) {
            let port = self.next_port.fetch_add(1, Ordering::SeqCst);
            stdout_tx
                .write_all(format!("127.0.0.1:{port}\nserving\n").as_bytes())
                .await?;
        }
        stderr_tx.write_all(b"starting\n").await?;

        let (exit_tx, exit_rx) = oneshot::channel();
        self.launches.lock().push(Launch {
            identity: identity.to_string(),
            shares: shares.iter().map(|s| s.name.clone()).collect(),
            exit: Some(exit_tx),
        });

        Ok(LaunchedServer {
            stdout: Box::new(stdout_rx),
            stderr: Box::new(stderr_rx),
            process: Box::new(FakeProcess {
                identity: identity.to_string(),
                exit: exit_rx,
                kills: self.kills.clone(),
            }),
        })
    }
}

struct FakeProcess {
    identity: String,
    exit: oneshot::Receiver<Option<i32>>,
    kills: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ServerProcess for FakeProcess {
    async fn wait(&mut self) -> io::Result<Option<i32>> {
        Ok((&mut self.exit).await.unwrap_or(None))
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.kills.lock().push(self.identity.clone());
        Ok(())
    }
}
