//! Duplicate-content detection
//!
//! Compares a SHA-256 digest of the full remote object with one of the local
//! file. This costs a full read of both before every resume of an existing
//! file, which is why `Config::verify_existing` can switch it off.

use std::path::Path;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::core::connector::Session;
use crate::core::error::Result;
use crate::core::stream::DownloadStream;
use crate::core::worker::{deadline, read_with_deadline};

const DIGEST_BUFFER_SIZE: usize = 64 * 1024;

/// Hex-encoded content hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDigest(String);

impl ContentDigest {
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

/// Outcome of comparing remote and local content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Local file already holds the remote content
    Duplicate,
    Differs,
    /// A pause or cancel was observed while digesting
    Interrupted,
}

/// Digest a local file
pub async fn digest_file(path: &Path) -> Result<ContentDigest> {
    let mut file = tokio::fs::File::open(path).await?;
    Ok(digest_reader(&mut file).await?)
}

/// Digest any async reader in one pass
pub async fn digest_reader<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<ContentDigest> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; DIGEST_BUFFER_SIZE];
    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(ContentDigest(hex::encode(hasher.finalize())))
}

/// Digest a remote stream, giving up as soon as `keep_going` turns false
async fn digest_remote(
    stream: &mut DownloadStream,
    timeout: Option<Duration>,
    keep_going: impl Fn() -> bool,
) -> Result<Option<ContentDigest>> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; DIGEST_BUFFER_SIZE];
    loop {
        if !keep_going() {
            return Ok(None);
        }
        let read = read_with_deadline(stream, &mut buffer, timeout).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(Some(ContentDigest(hex::encode(hasher.finalize()))))
}

/// Compare the remote object at `path` with the file at `local_path`
pub async fn check(
    session: &mut dyn Session,
    path: &str,
    local_path: &Path,
    timeout: Option<Duration>,
    keep_going: impl Fn() -> bool + Send,
) -> Result<Verdict> {
    let mut stream = deadline(timeout, "stream open", session.open_stream(path, 0)).await?;
    let remote = digest_remote(&mut stream, timeout, keep_going).await?;
    drop(stream);

    let Some(remote) = remote else {
        return Ok(Verdict::Interrupted);
    };

    let local = digest_file(local_path).await?;
    log::info!(
        "Remote digest: {}, local digest: {}",
        remote.as_hex(),
        local.as_hex()
    );

    if !remote.as_hex().is_empty() && remote == local {
        Ok(Verdict::Duplicate)
    } else {
        Ok(Verdict::Differs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Error;
    use std::io::Cursor;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_and_stream_digests_agree() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let data = b"the quick brown fox".repeat(10_000);
        std::fs::write(&path, &data).unwrap();

        let from_file = digest_file(&path).await.unwrap();
        let from_stream = digest_reader(&mut Cursor::new(data)).await.unwrap();
        assert_eq!(from_file, from_stream);
        assert_eq!(from_file.as_hex().len(), 64);
    }

    #[tokio::test]
    async fn test_known_digest() {
        let digest = digest_reader(&mut Cursor::new(b"abc".to_vec())).await.unwrap();
        assert_eq!(
            digest.as_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_remote_digest_stops_when_interrupted() {
        let mut stream = DownloadStream::from_reader(Cursor::new(vec![1u8; 1024]));
        let digest = digest_remote(&mut stream, None, || false).await.unwrap();
        assert_eq!(digest, None);
    }

    #[tokio::test]
    async fn test_missing_local_file_is_local_io() {
        let dir = tempdir().unwrap();
        let err = digest_file(&dir.path().join("absent")).await.unwrap_err();
        assert!(matches!(err, Error::LocalIo(_)));
    }
}
