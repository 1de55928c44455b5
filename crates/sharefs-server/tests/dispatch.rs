//! End-to-end dispatch tests: permissions, per-request trees, and
//! per-identity isolation, with in-memory file servers.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use parking_lot::Mutex;
use percent_encoding::percent_decode_str;
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;

use sharefs_server::{
    Connector, DispatcherOptions, LaunchedServer, Launcher, LockDepth, LockTable, Permission,
    ProtocolServer, RequestDispatcher, ServerAddr, ServerProcess, ServerStatus, Share,
    SharePermissions, status_for_error,
};
use sharefs_vfs::testing::MemoryRemote;
use sharefs_vfs::{FileSystem, RemoteClient, RemoteFsOptions, VfsResult};

/// Just enough of a file-access protocol to drive the tree. Like a real
/// WebDAV handler it routes on the percent-decoded path.
struct MiniProtocol;

fn status(code: StatusCode) -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = code;
    response
}

#[async_trait]
impl ProtocolServer for MiniProtocol {
    async fn serve(
        &self,
        fs: Arc<dyn FileSystem>,
        locks: &LockTable,
        request: Request<Bytes>,
    ) -> Response<Bytes> {
        let path = percent_decode_str(request.uri().path())
            .decode_utf8_lossy()
            .into_owned();
        let result: VfsResult<Bytes> = match request.method().as_str() {
            "GET" => match fs.stat(&path).await {
                Ok(attr) if attr.is_dir() => fs.read_dir(&path).await.map(|entries| {
                    let names: Vec<String> = entries.into_iter().map(|e| e.name).collect();
                    Bytes::from(names.join("\n"))
                }),
                Ok(_) => fs.read_all(&path).await.map(Bytes::from),
                Err(e) => Err(e),
            },
            "PUT" => fs.write_all(&path, request.body()).await.map(|_| Bytes::new()),
            "DELETE" => fs.remove_all(&path).await.map(|_| Bytes::new()),
            "MKCOL" => fs.mkdir(&path, 0o755).await.map(|_| Bytes::new()),
            "LOCK" => {
                return match locks.lock(&path, "tester", LockDepth::Zero, None) {
                    Ok(info) => Response::new(Bytes::from(info.token)),
                    Err(_) => status(StatusCode::LOCKED),
                };
            }
            _ => return status(StatusCode::METHOD_NOT_ALLOWED),
        };
        match result {
            Ok(body) => Response::new(body),
            Err(e) => status(status_for_error(&e)),
        }
    }
}

/// One in-memory remote per (file server address, share).
#[derive(Default)]
struct MemoryConnector {
    remotes: Mutex<HashMap<(String, String), Arc<MemoryRemote>>>,
}

impl MemoryConnector {
    fn remote(&self, addr: &str, share: &str) -> Arc<MemoryRemote> {
        self.remotes
            .lock()
            .entry((addr.to_string(), share.to_string()))
            .or_insert_with(|| Arc::new(MemoryRemote::new()))
            .clone()
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, share: &Share, addr: &ServerAddr) -> VfsResult<Arc<dyn RemoteClient>> {
        Ok(self.remote(&addr.to_string(), &share.name))
    }
}

/// Launcher whose servers announce `127.0.0.1:<port>` and run until
/// crashed or killed.
struct PortLauncher {
    next_port: AtomicU16,
    crashes: Mutex<HashMap<String, oneshot::Sender<Option<i32>>>>,
}

impl PortLauncher {
    fn new() -> Self {
        Self {
            next_port: AtomicU16::new(7000),
            crashes: Mutex::new(HashMap::new()),
        }
    }

    fn crash(&self, identity: &str) {
        if let Some(tx) = self.crashes.lock().remove(identity) {
            let _ = tx.send(Some(1));
        }
    }
}

struct PortProcess {
    exit: oneshot::Receiver<Option<i32>>,
}

#[async_trait]
impl ServerProcess for PortProcess {
    async fn wait(&mut self) -> io::Result<Option<i32>> {
        Ok((&mut self.exit).await.unwrap_or(None))
    }

    async fn kill(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Launcher for PortLauncher {
    async fn launch(&self, identity: &str, _shares: &[Arc<Share>]) -> io::Result<LaunchedServer> {
        let port = self.next_port.fetch_add(1, Ordering::SeqCst);
        let (mut stdout_tx, stdout_rx) = tokio::io::duplex(64);
        stdout_tx
            .write_all(format!("127.0.0.1:{port}\n").as_bytes())
            .await?;
        let (exit_tx, exit_rx) = oneshot::channel();
        self.crashes.lock().insert(identity.to_string(), exit_tx);
        Ok(LaunchedServer {
            stdout: Box::new(stdout_rx),
            stderr: Box::new(tokio::io::empty()),
            process: Box::new(PortProcess { exit: exit_rx }),
        })
    }
}

const SHARED_ADDR: &str = "127.0.0.1:6000";

fn options(share_as: bool) -> DispatcherOptions {
    DispatcherOptions {
        share_as,
        remote: RemoteFsOptions {
            op_timeout: Duration::from_secs(2),
            stat_cache_ttl: Duration::ZERO,
        },
        restart_backoff: Duration::from_secs(3600),
    }
}

fn get(path: &str) -> Request<Bytes> {
    Request::get(path).body(Bytes::new()).unwrap()
}

fn put(path: &str, body: &'static str) -> Request<Bytes> {
    Request::put(path).body(Bytes::from(body)).unwrap()
}

fn shares() -> Vec<Share> {
    vec![
        Share::new("docs", "/srv/docs", "alice"),
        Share::new("media", "/srv/media", "bob"),
        Share::new("secret", "/srv/secret", "alice"),
    ]
}

/// Dispatcher without isolation, every share behind `SHARED_ADDR`.
async fn shared_dispatcher() -> (RequestDispatcher, Arc<MemoryConnector>) {
    let connector = Arc::new(MemoryConnector::default());
    let dispatcher = RequestDispatcher::new(
        options(false),
        Arc::new(PortLauncher::new()),
        connector.clone(),
        Arc::new(MiniProtocol),
    );
    dispatcher.set_shares(shares()).await;
    dispatcher.set_file_server_addr(Some(ServerAddr::parse(SHARED_ADDR).unwrap()));
    connector
        .remote(SHARED_ADDR, "docs")
        .fs()
        .insert_file("/readme.txt", "hello");
    (dispatcher, connector)
}

fn caller() -> SharePermissions {
    SharePermissions::new()
        .grant("docs", Permission::ReadOnly)
        .grant("media", Permission::ReadWrite)
}

#[tokio::test]
async fn test_read_through_readable_share() {
    let (dispatcher, _) = shared_dispatcher().await;

    let response = dispatcher.handle(&caller(), get("/docs/readme.txt")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body().as_ref(), b"hello");
}

#[tokio::test]
async fn test_root_lists_only_permitted_shares() {
    let (dispatcher, _) = shared_dispatcher().await;

    let response = dispatcher.handle(&caller(), get("/")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body().as_ref(), b"docs\nmedia");
}

#[tokio::test]
async fn test_unpermitted_share_looks_missing() {
    let (dispatcher, connector) = shared_dispatcher().await;
    connector
        .remote(SHARED_ADDR, "secret")
        .fs()
        .insert_file("/plans.txt", "x");

    let read = dispatcher.handle(&caller(), get("/secret/plans.txt")).await;
    assert_eq!(read.status(), StatusCode::NOT_FOUND);

    let write = dispatcher.handle(&caller(), put("/secret/plans.txt", "y")).await;
    assert_eq!(write.status(), StatusCode::NOT_FOUND);

    let missing = dispatcher.handle(&caller(), get("/nope/a.txt")).await;
    assert_eq!(missing.status(), read.status());
    assert_eq!(connector.remote(SHARED_ADDR, "secret").total_calls(), 0);
}

#[tokio::test]
async fn test_read_only_share_rejects_writes() {
    let (dispatcher, connector) = shared_dispatcher().await;

    for request in [
        put("/docs/readme.txt", "changed"),
        Request::delete("/docs/readme.txt").body(Bytes::new()).unwrap(),
        Request::builder()
            .method("MKCOL")
            .uri("/docs/new")
            .body(Bytes::new())
            .unwrap(),
        Request::builder()
            .method("LOCK")
            .uri("/docs/readme.txt")
            .body(Bytes::new())
            .unwrap(),
    ] {
        let method = request.method().clone();
        let response = dispatcher.handle(&caller(), request).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "{method}");
    }
    assert_eq!(
        connector.remote(SHARED_ADDR, "docs").fs().contents("/readme.txt"),
        Some(b"hello".to_vec())
    );
    assert!(dispatcher.locks().is_empty());
}

#[tokio::test]
async fn test_copy_into_read_only_share_is_forbidden() {
    let (dispatcher, _) = shared_dispatcher().await;
    let request = Request::builder()
        .method("COPY")
        .uri("/media/a.txt")
        .header("Destination", "http://peer/docs/a.txt")
        .body(Bytes::new())
        .unwrap();

    let response = dispatcher.handle(&caller(), request).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_write_to_read_write_share() {
    let (dispatcher, connector) = shared_dispatcher().await;

    let response = dispatcher.handle(&caller(), put("/media/song.txt", "la")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        connector.remote(SHARED_ADDR, "media").fs().contents("/song.txt"),
        Some(b"la".to_vec())
    );

    let lock = Request::builder()
        .method("LOCK")
        .uri("/media/song.txt")
        .body(Bytes::new())
        .unwrap();
    let response = dispatcher.handle(&caller(), lock).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(dispatcher.locks().len(), 1);
}

#[tokio::test]
async fn test_shares_omitted_without_address() {
    let (dispatcher, _) = shared_dispatcher().await;
    dispatcher.set_file_server_addr(None);

    let response = dispatcher.handle(&caller(), get("/docs/readme.txt")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = dispatcher.handle(&caller(), get("/")).await;
    assert_eq!(response.body().as_ref(), b"");
}

#[tokio::test]
async fn test_encoded_share_names_are_gated_like_plain_ones() {
    let (dispatcher, connector) = shared_dispatcher().await;
    let caller = SharePermissions::all(Permission::ReadWrite).grant("docs", Permission::ReadOnly);

    for path in [
        "/docs/readme.txt",
        "/%64ocs/readme.txt",
        "/media/../docs/readme.txt",
    ] {
        let response = dispatcher.handle(&caller, put(path, "changed")).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "{path}");
    }

    let response = dispatcher
        .handle(&caller, put("/docs%2Freadme.txt", "changed"))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let copy = Request::builder()
        .method("COPY")
        .uri("/media/a.txt")
        .header("Destination", "http://peer/%64ocs/a.txt")
        .body(Bytes::new())
        .unwrap();
    let response = dispatcher.handle(&caller, copy).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    assert_eq!(
        connector.remote(SHARED_ADDR, "docs").fs().contents("/readme.txt"),
        Some(b"hello".to_vec())
    );
}

#[tokio::test]
async fn test_writer_reaches_share_whose_name_needs_encoding() {
    let connector = Arc::new(MemoryConnector::default());
    let dispatcher = RequestDispatcher::new(
        options(false),
        Arc::new(PortLauncher::new()),
        connector.clone(),
        Arc::new(MiniProtocol),
    );
    dispatcher
        .set_shares(vec![Share::new("my docs", "/srv/my docs", "alice")])
        .await;
    dispatcher.set_file_server_addr(Some(ServerAddr::parse(SHARED_ADDR).unwrap()));
    let caller = SharePermissions::new().grant("my docs", Permission::ReadWrite);

    let response = dispatcher.handle(&caller, put("/my%20docs/a.txt", "hi")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        connector.remote(SHARED_ADDR, "my docs").fs().contents("/a.txt"),
        Some(b"hi".to_vec())
    );
}

async fn wait_running(dispatcher: &RequestDispatcher, identity: &str) -> String {
    let server = dispatcher.user_server(identity).unwrap();
    server
        .subscribe()
        .wait_for(|s| s.status == ServerStatus::Running)
        .await
        .unwrap();
    server.addr().unwrap()
}

#[tokio::test]
async fn test_isolation_routes_each_identity_to_its_server() {
    let connector = Arc::new(MemoryConnector::default());
    let launcher = Arc::new(PortLauncher::new());
    let dispatcher = RequestDispatcher::new(
        options(true),
        launcher.clone(),
        connector.clone(),
        Arc::new(MiniProtocol),
    );
    dispatcher.set_shares(shares()).await;

    let alice = wait_running(&dispatcher, "alice").await;
    let bob = wait_running(&dispatcher, "bob").await;
    assert_ne!(alice, bob);
    assert_eq!(
        dispatcher.user_server("alice").unwrap().shares().len(),
        2
    );

    connector.remote(&alice, "docs").fs().insert_file("/a.txt", "from alice");
    connector.remote(&bob, "media").fs().insert_file("/b.txt", "from bob");

    let everyone = SharePermissions::all(Permission::ReadWrite);
    let response = dispatcher.handle(&everyone, get("/docs/a.txt")).await;
    assert_eq!(response.body().as_ref(), b"from alice");
    let response = dispatcher.handle(&everyone, get("/media/b.txt")).await;
    assert_eq!(response.body().as_ref(), b"from bob");

    // A dead server takes only its own shares offline.
    launcher.crash("alice");
    dispatcher
        .user_server("alice")
        .unwrap()
        .subscribe()
        .wait_for(|s| s.status == ServerStatus::Crashed)
        .await
        .unwrap();
    let response = dispatcher.handle(&everyone, get("/docs/a.txt")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = dispatcher.handle(&everyone, get("/media/b.txt")).await;
    assert_eq!(response.status(), StatusCode::OK);

    dispatcher.close().await;
}

#[tokio::test]
async fn test_set_shares_replaces_servers() {
    let launcher = Arc::new(PortLauncher::new());
    let dispatcher = RequestDispatcher::new(
        options(true),
        launcher,
        Arc::new(MemoryConnector::default()),
        Arc::new(MiniProtocol),
    );
    dispatcher.set_shares(shares()).await;
    let old = dispatcher.user_server("bob").unwrap();
    wait_running(&dispatcher, "bob").await;

    dispatcher
        .set_shares(vec![Share::new("docs", "/srv/docs", "alice")])
        .await;
    assert_eq!(old.status(), ServerStatus::Closed);
    assert!(dispatcher.user_server("bob").is_none());
    assert_eq!(dispatcher.share_names(), vec!["docs"]);

    dispatcher.close().await;
    assert!(dispatcher.user_server("alice").is_none());
}
