//! FTP transfers against an in-process libunftp server
//!
//! These run the real `FtpConnector`: `SIZE`, `REST` + `RETR`, the digest
//! read and a second `RETR` on the same control connection.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::tempdir;
use trident_dl::{Config, Downloader, Source, Status};
use unftp_sbe_fs::ServerExt;

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 17 % 253) as u8).collect()
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Serve `root` over FTP and wait until the control port accepts
async fn start_server(root: &Path) -> u16 {
    let port = free_port();
    let server = libunftp::Server::with_fs(root.to_path_buf())
        .build()
        .unwrap();
    tokio::spawn(async move {
        let _ = server.listen(format!("127.0.0.1:{port}")).await;
    });

    for _ in 0..200 {
        if tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return port;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("FTP server on port {port} never came up");
}

struct Fixture {
    _remote: tempfile::TempDir,
    local: tempfile::TempDir,
    url: String,
    data: Vec<u8>,
}

impl Fixture {
    async fn new(len: usize) -> Self {
        let remote = tempdir().unwrap();
        let data = payload(len);
        std::fs::create_dir_all(remote.path().join("pub")).unwrap();
        std::fs::write(remote.path().join("pub").join("archive.bin"), &data).unwrap();
        let port = start_server(remote.path()).await;

        Self {
            _remote: remote,
            local: tempdir().unwrap(),
            url: format!("ftp://127.0.0.1:{port}/pub/archive.bin"),
            data,
        }
    }

    fn target(&self) -> PathBuf {
        Source::parse(&self.url).unwrap().local_path(self.local.path())
    }

    fn seed_local(&self, contents: &[u8]) {
        let target = self.target();
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(target, contents).unwrap();
    }

    async fn download(&self) -> trident_dl::Snapshot {
        let downloader = Downloader::with_config(Config::default().with_base_dir(self.local.path()));
        let download = downloader.submit(&self.url).unwrap();
        download.settle().await;
        download.snapshot()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ftp_fresh_download() {
    let fixture = Fixture::new(150_000).await;

    let snapshot = fixture.download().await;

    assert_eq!(snapshot.status, Status::Complete, "{:?}", snapshot.last_error);
    assert_eq!(snapshot.size, Some(150_000));
    assert_eq!(std::fs::read(fixture.target()).unwrap(), fixture.data);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ftp_resume_appends_after_local_prefix() {
    let fixture = Fixture::new(200_000).await;
    fixture.seed_local(&fixture.data[..70_000]);

    let snapshot = fixture.download().await;

    assert_eq!(snapshot.status, Status::Complete, "{:?}", snapshot.last_error);
    assert_eq!(snapshot.transferred, 200_000);
    assert_eq!(std::fs::read(fixture.target()).unwrap(), fixture.data);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ftp_rest_offset_is_honoured() {
    let fixture = Fixture::new(50_000).await;
    // a prefix the server never sent; only a REST transfer leaves it in place
    fixture.seed_local(&[0xEE; 20_000]);

    let snapshot = fixture.download().await;

    assert_eq!(snapshot.status, Status::Complete, "{:?}", snapshot.last_error);
    let on_disk = std::fs::read(fixture.target()).unwrap();
    assert_eq!(on_disk.len(), 50_000);
    assert!(on_disk[..20_000].iter().all(|&b| b == 0xEE));
    assert_eq!(&on_disk[20_000..], &fixture.data[20_000..]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ftp_identical_local_file_is_not_rewritten() {
    let fixture = Fixture::new(80_000).await;
    fixture.seed_local(&fixture.data);
    let modified = std::fs::metadata(fixture.target()).unwrap().modified().unwrap();

    let snapshot = fixture.download().await;

    assert_eq!(snapshot.status, Status::Complete, "{:?}", snapshot.last_error);
    assert_eq!(snapshot.transferred, 80_000);
    assert_eq!(std::fs::read(fixture.target()).unwrap(), fixture.data);
    assert_eq!(
        std::fs::metadata(fixture.target()).unwrap().modified().unwrap(),
        modified
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ftp_same_length_mismatch_retrieves_again() {
    let fixture = Fixture::new(60_000).await;
    fixture.seed_local(&vec![0x11; 60_000]);

    let snapshot = fixture.download().await;

    // digest RETR, then a full RETR over the same control connection
    assert_eq!(snapshot.status, Status::Complete, "{:?}", snapshot.last_error);
    assert_eq!(std::fs::read(fixture.target()).unwrap(), fixture.data);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ftp_missing_file_is_error() {
    let fixture = Fixture::new(10).await;
    let url = fixture.url.replace("archive.bin", "absent.bin");
    let downloader = Downloader::with_config(Config::default().with_base_dir(fixture.local.path()));

    let download = downloader.submit(&url).unwrap();
    download.settle().await;

    assert_eq!(download.status(), Status::Error);
    assert!(!download.local_path().exists());
}
