//! Launching user servers.
//!
//! A user server is a subprocess running as a share's owning identity. It is
//! started as `<program> serve-remote-fs <name> <path> [<name> <path> ...]`,
//! prints the address it listens on as the first line of stdout, and keeps
//! serving until killed.
//!
//! The [`Launcher`] seam keeps process creation out of the supervisor so the
//! supervision state machine can be driven by fakes.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::info;

use sharefs_vfs::{Child as FsChild, CompositeFileSystem, LocalFileSystem};

use crate::constants::SERVE_REMOTE_FS_COMMAND;
use crate::share::Share;

/// Output stream of a launched server.
pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// A running user server process.
#[async_trait]
pub trait ServerProcess: Send {
    /// Wait for exit. Returns the exit code when there is one.
    async fn wait(&mut self) -> io::Result<Option<i32>>;

    /// Forcibly terminate and reap the process.
    async fn kill(&mut self) -> io::Result<()>;

    /// OS process id, if any.
    fn id(&self) -> Option<u32> {
        None
    }
}

/// Handles to a freshly started user server.
pub struct LaunchedServer {
    pub stdout: OutputStream,
    pub stderr: OutputStream,
    pub process: Box<dyn ServerProcess>,
}

impl std::fmt::Debug for LaunchedServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchedServer")
            .field("pid", &self.process.id())
            .finish()
    }
}

/// Starts user servers.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Start a server for `identity` serving `shares`.
    async fn launch(&self, identity: &str, shares: &[Arc<Share>]) -> io::Result<LaunchedServer>;
}

/// [`ServerProcess`] over a tokio child process.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
}

impl ChildProcess {
    pub fn new(child: Child) -> Self {
        Self { child }
    }
}

#[async_trait]
impl ServerProcess for ChildProcess {
    async fn wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self.child.wait().await?.code())
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.child.kill().await
    }

    fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

/// Launches user servers through `sudo -u <identity>`.
#[derive(Debug, Clone)]
pub struct SudoLauncher {
    program: String,
    executable: PathBuf,
}

impl SudoLauncher {
    /// Launch `executable` through `program` (normally `sudo`).
    pub fn new(program: impl Into<String>, executable: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            executable: executable.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Arguments passed to the escalation program.
    pub fn command_args(&self, identity: &str, shares: &[Arc<Share>]) -> Vec<String> {
        let mut args = vec![
            "-u".to_string(),
            identity.to_string(),
            self.executable.to_string_lossy().into_owned(),
        ];
        args.extend(ServeArgs::from_shares(shares).to_args());
        args
    }
}

#[async_trait]
impl Launcher for SudoLauncher {
    async fn launch(&self, identity: &str, shares: &[Arc<Share>]) -> io::Result<LaunchedServer> {
        let args = self.command_args(identity, shares);
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("user server stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("user server stderr not captured"))?;

        info!(identity, pid = ?child.id(), program = %self.program, "launched user server");
        Ok(LaunchedServer {
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            process: Box::new(ChildProcess::new(child)),
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServeArgsError {
    #[error("expected `{SERVE_REMOTE_FS_COMMAND}` as the first argument")]
    MissingCommand,

    #[error("share names and paths must come in pairs")]
    UnpairedArgument,

    #[error("empty share name")]
    EmptyName,

    #[error("share path for {0} must be absolute")]
    RelativePath(String),
}

/// The user server's command line: `serve-remote-fs` and name/path pairs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServeArgs {
    pub shares: Vec<(String, PathBuf)>,
}

impl ServeArgs {
    pub fn from_shares(shares: &[Arc<Share>]) -> Self {
        Self {
            shares: shares
                .iter()
                .map(|s| (s.name.clone(), s.path.clone()))
                .collect(),
        }
    }

    /// Parse arguments as received by the user server (program name
    /// excluded).
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self, ServeArgsError> {
        let Some((command, rest)) = args.split_first() else {
            return Err(ServeArgsError::MissingCommand);
        };
        if command.as_ref() != SERVE_REMOTE_FS_COMMAND {
            return Err(ServeArgsError::MissingCommand);
        }
        if rest.len() % 2 != 0 {
            return Err(ServeArgsError::UnpairedArgument);
        }

        let mut shares = Vec::with_capacity(rest.len() / 2);
        for pair in rest.chunks_exact(2) {
            let name = pair[0].as_ref();
            if name.is_empty() {
                return Err(ServeArgsError::EmptyName);
            }
            let path = PathBuf::from(pair[1].as_ref());
            if !path.is_absolute() {
                return Err(ServeArgsError::RelativePath(name.to_string()));
            }
            shares.push((name.to_string(), path));
        }
        Ok(Self { shares })
    }

    /// Render back to arguments, command first.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(1 + self.shares.len() * 2);
        args.push(SERVE_REMOTE_FS_COMMAND.to_string());
        for (name, path) in &self.shares {
            args.push(name.clone());
            args.push(path.to_string_lossy().into_owned());
        }
        args
    }

    /// The tree a user server exposes: one local directory per share.
    pub fn filesystem(&self) -> CompositeFileSystem {
        CompositeFileSystem::with_children(
            self.shares
                .iter()
                .map(|(name, path)| {
                    FsChild::new(name.clone(), Arc::new(LocalFileSystem::new(path)))
                })
                .collect(),
        )
    }
}

/// Write the listen address as the first line of output.
pub async fn announce_address<W>(out: &mut W, addr: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    out.write_all(addr.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await
}
