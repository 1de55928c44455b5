use super::*;
use crate::testing::MemoryRemote;
use http::StatusCode;
use std::error::Error as _;
use std::io::SeekFrom;

const TTL: Duration = Duration::from_secs(60);

fn adapter(ttl: Duration) -> (RemoteFileSystem, Arc<MemoryRemote>) {
    let remote = Arc::new(MemoryRemote::new());
    let fs = RemoteFileSystem::new(
        remote.clone(),
        RemoteFsOptions {
            op_timeout: DEFAULT_OP_TIMEOUT,
            stat_cache_ttl: ttl,
        },
    );
    (fs, remote)
}

fn server_error() -> RemoteError {
    RemoteError::status(StatusCode::INTERNAL_SERVER_ERROR, "disk on fire")
}

#[test]
fn test_translate_error() {
    let err = translate_error("/a", RemoteError::not_found("/a"));
    assert!(matches!(err, VfsError::NotFound(ref p) if p == "/a"));

    let err = translate_error("/a", server_error());
    assert!(matches!(err, VfsError::Remote(ref m) if m == "disk on fire"));
    assert_eq!(err.to_string(), "unexpected remote error: disk on fire");
    assert!(err.source().is_none());

    let err = translate_error("/a", RemoteError::transport("connection refused"));
    assert!(matches!(err, VfsError::Remote(_)));
}

#[tokio::test]
async fn test_stat_is_cached_until_mutation() {
    let (fs, remote) = adapter(TTL);
    remote.fs().insert_file("/a.txt", "abc");

    assert_eq!(fs.stat("/a.txt").await.unwrap().size, 3);
    assert_eq!(fs.stat("/a.txt").await.unwrap().size, 3);
    assert_eq!(remote.calls("stat"), 1);

    fs.mkdir("/dir", 0o755).await.unwrap();
    fs.stat("/a.txt").await.unwrap();
    assert_eq!(remote.calls("stat"), 2);

    fs.rename("/a.txt", "/b.txt").await.unwrap();
    assert!(fs.stat("/a.txt").await.unwrap_err().is_not_found());
    assert_eq!(remote.calls("stat"), 3);

    fs.remove_all("/b.txt").await.unwrap();
    assert!(fs.stat("/b.txt").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_failed_stat_is_not_cached() {
    let (fs, remote) = adapter(TTL);
    assert!(fs.stat("/late.txt").await.unwrap_err().is_not_found());

    remote.fs().insert_file("/late.txt", "x");
    assert_eq!(fs.stat("/late.txt").await.unwrap().size, 1);
    assert_eq!(remote.calls("stat"), 2);
}

#[tokio::test]
async fn test_cache_disabled_always_fetches() {
    let (fs, remote) = adapter(Duration::ZERO);
    remote.fs().insert_file("/a.txt", "abc");
    assert!(fs.cache().is_none());

    fs.stat("/a.txt").await.unwrap();
    fs.stat("/a.txt").await.unwrap();
    assert_eq!(remote.calls("stat"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cache_entry_expires_after_ttl() {
    let ttl = Duration::from_secs(1);
    let (fs, remote) = adapter(ttl);
    remote.fs().insert_file("/a.txt", "abc");

    fs.stat("/a.txt").await.unwrap();
    tokio::time::advance(Duration::from_millis(999)).await;
    fs.stat("/a.txt").await.unwrap();
    assert_eq!(remote.calls("stat"), 1);

    tokio::time::advance(Duration::from_millis(1)).await;
    fs.stat("/a.txt").await.unwrap();
    assert_eq!(remote.calls("stat"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_slow_remote_times_out() {
    let (fs, remote) = adapter(Duration::ZERO);
    remote.set_delay(Duration::from_secs(5));

    let err = fs.stat("/a.txt").await.unwrap_err();
    assert!(matches!(err, VfsError::TimedOut(_)));

    let err = fs.mkdir("/d", 0o755).await.unwrap_err();
    assert!(matches!(err, VfsError::TimedOut(_)));
}

#[tokio::test]
async fn test_write_handle_streams_upload() {
    let (fs, remote) = adapter(TTL);

    let mut file = fs
        .open_file("/up.txt", OpenFlags::create_truncate(), 0o644)
        .await
        .unwrap();

    let mut buf = [0u8; 8];
    assert!(matches!(file.read(&mut buf).await, Err(VfsError::Unsupported(_))));
    assert!(matches!(
        file.seek(SeekFrom::Start(0)).await,
        Err(VfsError::Unsupported(_))
    ));
    assert!(matches!(file.readdir().await, Err(VfsError::NotADirectory(_))));

    // Nothing uploaded yet, so stat falls back to a synthetic record.
    let attr = file.stat().await.unwrap();
    assert_eq!(attr.name, "up.txt");
    assert_eq!(attr.size, 0);

    assert_eq!(file.write(b"hello ").await.unwrap(), 6);
    assert_eq!(file.write(b"world").await.unwrap(), 5);
    file.close().await.unwrap();

    assert_eq!(remote.fs().contents("/up.txt").unwrap(), b"hello world");
    assert_eq!(remote.calls("write_stream"), 1);
    assert_eq!(fs.stat("/up.txt").await.unwrap().size, 11);
}

#[tokio::test]
async fn test_write_close_reports_upload_failure() {
    let (fs, remote) = adapter(TTL);
    remote.fail("write_stream", server_error());

    let mut file = fs
        .open_file("/up.txt", OpenFlags::create_truncate(), 0o644)
        .await
        .unwrap();
    file.write(b"payload").await.unwrap();

    let err = file.close().await.unwrap_err();
    assert!(matches!(err, VfsError::Remote(ref m) if m == "disk on fire"));

    // The failure sticks to the handle.
    assert!(matches!(file.close().await, Err(VfsError::Remote(_))));
    assert!(matches!(file.write(b"more").await, Err(VfsError::Remote(_))));
    assert!(remote.fs().contents("/up.txt").is_none());
}

#[tokio::test]
async fn test_write_whole_file_surfaces_upload_failure() {
    let (fs, remote) = adapter(Duration::ZERO);
    remote.fail("write_stream", RemoteError::status(StatusCode::INSUFFICIENT_STORAGE, "full"));

    let err = fs.write_all("/big.bin", &[7u8; 4096]).await.unwrap_err();
    assert!(matches!(err, VfsError::Remote(_)));
}

#[tokio::test]
async fn test_open_write_rejections() {
    let (fs, remote) = adapter(TTL);
    remote.fs().insert_file("/dir/a.txt", "a");

    assert!(matches!(
        fs.open_file("/dir/a.txt", OpenFlags::append(), 0o644).await,
        Err(VfsError::Unsupported(ref m)) if m == "append"
    ));
    assert_eq!(remote.total_calls(), 0);

    assert!(matches!(
        fs.open_file("/dir", OpenFlags::create_truncate(), 0o644).await,
        Err(VfsError::IsADirectory(_))
    ));
}

#[tokio::test]
async fn test_open_write_invalidates_cache() {
    let (fs, remote) = adapter(TTL);
    remote.fs().insert_file("/a.txt", "abc");
    fs.stat("/a.txt").await.unwrap();

    let mut file = fs
        .open_file("/a.txt", OpenFlags::create_truncate(), 0o644)
        .await
        .unwrap();
    file.write(b"longer content").await.unwrap();
    file.close().await.unwrap();

    assert_eq!(fs.stat("/a.txt").await.unwrap().size, 14);
}

#[tokio::test]
async fn test_read_handle() {
    let (fs, remote) = adapter(TTL);
    remote.fs().insert_file("/a.txt", "hello");

    let mut file = fs.open_file("/a.txt", OpenFlags::read(), 0).await.unwrap();
    let mut buf = [0u8; 3];
    assert_eq!(file.read(&mut buf).await.unwrap(), 3);
    assert_eq!(&buf, b"hel");
    assert_eq!(file.seek(SeekFrom::Current(0)).await.unwrap(), 3);
    assert!(matches!(
        file.seek(SeekFrom::Start(0)).await,
        Err(VfsError::Unsupported(_))
    ));
    assert!(matches!(
        file.write(b"x").await,
        Err(VfsError::PermissionDenied(_))
    ));
    assert_eq!(file.stat().await.unwrap().size, 5);
    file.close().await.unwrap();

    assert_eq!(fs.read_all("/a.txt").await.unwrap(), b"hello");
    assert!(fs.read_all("/missing").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_directory_listing_is_cached() {
    let (fs, remote) = adapter(TTL);
    remote.fs().insert_file("/docs/b.txt", "b");
    remote.fs().insert_file("/docs/a.txt", "a");

    let names: Vec<_> = fs
        .read_dir("/docs")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["a.txt", "b.txt"]);

    fs.read_dir("/docs/").await.unwrap();
    assert_eq!(remote.calls("read_dir"), 1);

    // Child attributes came in with the listing.
    fs.stat("/docs/a.txt").await.unwrap();
    assert_eq!(remote.calls("stat"), 1);

    fs.remove_all("/docs/a.txt").await.unwrap();
    assert_eq!(fs.read_dir("/docs").await.unwrap().len(), 1);
    assert_eq!(remote.calls("read_dir"), 2);
}

#[tokio::test]
async fn test_failed_listing_yields_empty_directory() {
    let (fs, remote) = adapter(TTL);
    remote.fs().insert_file("/docs/a.txt", "a");
    remote.fail("read_dir", server_error());

    assert!(fs.read_dir("/docs").await.unwrap().is_empty());

    // The failure was not cached.
    remote.clear_failure("read_dir");
    assert_eq!(fs.read_dir("/docs").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_close_stops_cache() {
    let (fs, _remote) = adapter(TTL);
    fs.close().await.unwrap();
    // Stopping twice is harmless.
    fs.close().await.unwrap();
}
