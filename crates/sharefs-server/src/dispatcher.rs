//! Request dispatch.
//!
//! Every request gets a fresh [`CompositeFileSystem`] containing one
//! [`RemoteFileSystem`] per share the caller may read, each pointed at the
//! file server that serves that share. The composite is handed to the
//! [`ProtocolServer`] together with the shared [`LockTable`].
//!
//! With per-identity isolation on (`share_as`), shares are grouped by their
//! `run_as` identity and each group gets its own supervised [`UserServer`].
//! With it off, every share is reached through one shared file server
//! address.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use parking_lot::RwLock;
use percent_encoding::percent_decode_str;
use thiserror::Error;
use tracing::{debug, warn};

use sharefs_vfs::{
    Child, CompositeFileSystem, FileSystem, RemoteClient, RemoteFileSystem, RemoteFsOptions,
    VfsError, VfsResult, path,
};

use crate::constants::{DEFAULT_OP_TIMEOUT, DEFAULT_RESTART_BACKOFF, DEFAULT_STAT_CACHE_TTL};
use crate::launcher::Launcher;
use crate::locks::LockTable;
use crate::share::{Permission, Permissions, Share};
use crate::user_server::{UserServer, group_by_identity};

/// Dispatcher tuning.
#[derive(Debug, Clone, Copy)]
pub struct DispatcherOptions {
    /// Serve each share through a file server running as its `run_as`
    /// identity.
    pub share_as: bool,
    /// Options for every per-share adapter.
    pub remote: RemoteFsOptions,
    /// Pause before relaunching a user server.
    pub restart_backoff: Duration,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            share_as: true,
            remote: RemoteFsOptions {
                op_timeout: DEFAULT_OP_TIMEOUT,
                stat_cache_ttl: DEFAULT_STAT_CACHE_TTL,
            },
            restart_backoff: DEFAULT_RESTART_BACKOFF,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid file server address: {0:?}")]
pub struct AddrParseError(pub String);

/// Where a file server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAddr {
    Tcp(SocketAddr),
    /// Unix domain socket path.
    Local(PathBuf),
}

impl ServerAddr {
    /// Parse `host:port` or an absolute socket path.
    pub fn parse(addr: &str) -> Result<Self, AddrParseError> {
        let addr = addr.trim();
        if addr.starts_with('/') {
            return Ok(Self::Local(PathBuf::from(addr)));
        }
        addr.parse::<SocketAddr>()
            .map(Self::Tcp)
            .map_err(|_| AddrParseError(addr.to_string()))
    }
}

impl FromStr for ServerAddr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "{addr}"),
            Self::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Opens remote clients to file servers.
pub trait Connector: Send + Sync {
    /// Client for `share` on the file server at `addr`.
    fn connect(&self, share: &Share, addr: &ServerAddr) -> VfsResult<Arc<dyn RemoteClient>>;
}

/// The file-access protocol handler.
#[async_trait]
pub trait ProtocolServer: Send + Sync {
    async fn serve(
        &self,
        fs: Arc<dyn FileSystem>,
        locks: &LockTable,
        request: Request<Bytes>,
    ) -> Response<Bytes>;
}

/// Methods that can modify a share.
pub fn is_write_method(method: &Method) -> bool {
    matches!(
        method.as_str(),
        "PUT" | "POST" | "COPY" | "LOCK" | "UNLOCK" | "MKCOL" | "MOVE" | "PROPPATCH" | "DELETE"
    )
}

/// HTTP status a protocol server should answer a filesystem error with.
pub fn status_for_error(err: &VfsError) -> StatusCode {
    match err {
        VfsError::NotFound(_) => StatusCode::NOT_FOUND,
        VfsError::PermissionDenied(_) | VfsError::ReadOnly | VfsError::PathEscapesRoot(_) => {
            StatusCode::FORBIDDEN
        }
        VfsError::AlreadyExists(_) => StatusCode::METHOD_NOT_ALLOWED,
        VfsError::IsADirectory(_) | VfsError::NotADirectory(_) => StatusCode::CONFLICT,
        VfsError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
        VfsError::TimedOut(_) => StatusCode::GATEWAY_TIMEOUT,
        VfsError::Remote(_) => StatusCode::BAD_GATEWAY,
        VfsError::InvalidPath(_) => StatusCode::BAD_REQUEST,
        VfsError::Io(_) | VfsError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn status_response(status: StatusCode) -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = status;
    response
}

/// Share a request path lands in once the protocol layer has decoded it:
/// segments percent-decoded and dot segments resolved.
///
/// Segments that are not UTF-8, or that decode to contain `/`, are rejected.
fn share_of(request_path: &str) -> Result<Option<String>, StatusCode> {
    let mut resolved: Vec<Cow<'_, str>> = Vec::new();
    for segment in path::split(request_path) {
        let decoded = percent_decode_str(segment)
            .decode_utf8()
            .map_err(|_| StatusCode::BAD_REQUEST)?;
        if decoded.contains(path::SEPARATOR) {
            return Err(StatusCode::BAD_REQUEST);
        }
        match decoded.as_ref() {
            "" | "." => {}
            ".." => {
                resolved.pop();
            }
            _ => resolved.push(decoded),
        }
    }
    Ok(resolved.into_iter().next().map(Cow::into_owned))
}

/// Paths a write-class request modifies: the request target, plus the
/// `Destination` of a copy or move.
fn write_targets(request: &Request<Bytes>) -> Result<Vec<String>, StatusCode> {
    let mut targets = vec![request.uri().path().to_string()];
    if matches!(request.method().as_str(), "COPY" | "MOVE") {
        if let Some(value) = request.headers().get("destination") {
            let destination = value
                .to_str()
                .ok()
                .and_then(|v| v.parse::<http::Uri>().ok())
                .ok_or(StatusCode::BAD_REQUEST)?;
            targets.push(destination.path().to_string());
        }
    }
    Ok(targets)
}

/// Gate for write-class requests: every share written to must be
/// read-write for the caller. Shares the caller cannot see answer 404.
fn check_write(
    permissions: &dyn Permissions,
    request: &Request<Bytes>,
) -> Result<(), StatusCode> {
    for target in write_targets(request)? {
        let Some(share) = share_of(&target)? else {
            continue;
        };
        match permissions.for_share(&share) {
            Permission::None => return Err(StatusCode::NOT_FOUND),
            Permission::ReadOnly => return Err(StatusCode::FORBIDDEN),
            Permission::ReadWrite => {}
        }
    }
    Ok(())
}

#[derive(Default)]
struct DispatchState {
    shares: Arc<BTreeMap<String, Arc<Share>>>,
    servers: Arc<HashMap<String, Arc<UserServer>>>,
    file_server_addr: Option<ServerAddr>,
}

/// Routes requests to the file servers behind each share.
pub struct RequestDispatcher {
    options: DispatcherOptions,
    launcher: Arc<dyn Launcher>,
    connector: Arc<dyn Connector>,
    protocol: Arc<dyn ProtocolServer>,
    locks: LockTable,
    state: RwLock<DispatchState>,
}

impl RequestDispatcher {
    pub fn new(
        options: DispatcherOptions,
        launcher: Arc<dyn Launcher>,
        connector: Arc<dyn Connector>,
        protocol: Arc<dyn ProtocolServer>,
    ) -> Self {
        Self {
            options,
            launcher,
            connector,
            protocol,
            locks: LockTable::new(),
            state: RwLock::new(DispatchState::default()),
        }
    }

    pub fn options(&self) -> &DispatcherOptions {
        &self.options
    }

    /// Locks shared by every request.
    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    /// Names of the published shares.
    pub fn share_names(&self) -> Vec<String> {
        self.state.read().shares.keys().cloned().collect()
    }

    /// Supervised server for `identity`, when isolation is on.
    pub fn user_server(&self, identity: &str) -> Option<Arc<UserServer>> {
        self.state.read().servers.get(identity).cloned()
    }

    /// Address used for every share when isolation is off.
    pub fn set_file_server_addr(&self, addr: Option<ServerAddr>) {
        self.state.write().file_server_addr = addr;
    }

    /// Replace the published shares.
    ///
    /// With isolation on, a fresh user server is started per identity and
    /// the previous ones are closed once the new set is in place.
    pub async fn set_shares(&self, shares: Vec<Share>) {
        let shares: BTreeMap<String, Arc<Share>> = shares
            .into_iter()
            .map(|s| (s.name.clone(), Arc::new(s)))
            .collect();

        if !self.options.share_as {
            self.state.write().shares = Arc::new(shares);
            return;
        }

        let servers: HashMap<String, Arc<UserServer>> = group_by_identity(shares.values())
            .into_iter()
            .map(|(identity, group)| {
                let server = UserServer::start(
                    identity.clone(),
                    group,
                    self.launcher.clone(),
                    self.options.restart_backoff,
                );
                (identity, Arc::new(server))
            })
            .collect();
        debug!(shares = shares.len(), servers = servers.len(), "publishing shares");

        let retired = {
            let mut state = self.state.write();
            state.shares = Arc::new(shares);
            std::mem::replace(&mut state.servers, Arc::new(servers))
        };
        futures::future::join_all(retired.values().map(|s| s.close())).await;
    }

    /// Stop every user server.
    pub async fn close(&self) {
        let retired = std::mem::take(&mut self.state.write().servers);
        futures::future::join_all(retired.values().map(|s| s.close())).await;
    }

    /// Serve one request for a caller with `permissions`.
    pub async fn handle(
        &self,
        permissions: &dyn Permissions,
        request: Request<Bytes>,
    ) -> Response<Bytes> {
        if is_write_method(request.method()) {
            if let Err(status) = check_write(permissions, &request) {
                return status_response(status);
            }
        }

        let fs = Arc::new(self.build_filesystem(permissions));
        let response = self.protocol.serve(fs.clone(), &self.locks, request).await;
        if let Err(e) = fs.close().await {
            debug!(error = %e, "closing request filesystem failed");
        }
        response
    }

    /// The tree a caller sees: every readable share with a known address.
    fn build_filesystem(&self, permissions: &dyn Permissions) -> CompositeFileSystem {
        let (shares, servers, shared_addr) = {
            let state = self.state.read();
            (
                state.shares.clone(),
                state.servers.clone(),
                state.file_server_addr.clone(),
            )
        };

        let mut children = Vec::new();
        for share in shares.values() {
            if !permissions.for_share(&share.name).can_read() {
                continue;
            }
            let Some(addr) = self.resolve_addr(share, &servers, shared_addr.as_ref()) else {
                warn!(share = %share.name, "no file server address; omitting share");
                continue;
            };
            match self.connector.connect(share, &addr) {
                Ok(client) => {
                    let fs = RemoteFileSystem::new(client, self.options.remote);
                    children.push(Child::new(share.name.clone(), Arc::new(fs)));
                }
                Err(e) => {
                    warn!(
                        share = %share.name,
                        addr = %addr,
                        error = %e,
                        "connect failed; omitting share"
                    );
                }
            }
        }
        CompositeFileSystem::with_children(children)
    }

    fn resolve_addr(
        &self,
        share: &Share,
        servers: &HashMap<String, Arc<UserServer>>,
        shared_addr: Option<&ServerAddr>,
    ) -> Option<ServerAddr> {
        if !self.options.share_as {
            return shared_addr.cloned();
        }
        let announced = servers.get(&share.run_as)?.addr()?;
        match ServerAddr::parse(&announced) {
            Ok(addr) => Some(addr),
            Err(e) => {
                warn!(share = %share.name, error = %e, "user server announced a bad address");
                None
            }
        }
    }
}
