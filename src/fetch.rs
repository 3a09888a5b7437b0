//! Checksum-verified download and archive extraction
//!
//! Downloads stream into a temporary file while a SHA-256 digest accumulates;
//! the file is promoted to its destination only after the digest matches.
//! `file://` URIs are read from local disk, which also keeps tests offline.

use crate::error::{ShimError, ShimResult};
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, info};

/// Download `uri` to `dest`, verifying its SHA-256 digest before promotion
pub fn download(uri: &str, sha256: &str, dest: &Path) -> ShimResult<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ShimError::io(format!("creating {}", parent.display()), e))?;
    }

    info!("Downloading {}", uri);
    let mut source = open_uri(uri)?;

    let temp_path = dest.with_extension("download");
    let mut output = File::create(&temp_path)
        .map_err(|e| ShimError::io(format!("creating {}", temp_path.display()), e))?;

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = source.read(&mut buf).map_err(|e| ShimError::DownloadTransport {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        output
            .write_all(&buf[..n])
            .map_err(|e| ShimError::io(format!("writing {}", temp_path.display()), e))?;
    }
    drop(output);

    let actual = hex::encode(hasher.finalize());
    if !actual.eq_ignore_ascii_case(sha256) {
        let _ = fs::remove_file(&temp_path);
        return Err(ShimError::ChecksumMismatch {
            expected: sha256.to_string(),
            actual,
        });
    }

    fs::rename(&temp_path, dest)
        .map_err(|e| ShimError::io(format!("promoting {}", dest.display()), e))?;
    debug!("Verified {} ({})", dest.display(), actual);
    Ok(())
}

/// Open a readable stream for a `file://` or `http(s)://` URI
fn open_uri(uri: &str) -> ShimResult<Box<dyn Read>> {
    if let Some(path) = uri.strip_prefix("file://") {
        let file =
            File::open(path).map_err(|e| ShimError::io(format!("opening {}", path), e))?;
        return Ok(Box::new(file));
    }

    if !uri.starts_with("http://") && !uri.starts_with("https://") {
        return Err(ShimError::UnsupportedUri(uri.to_string()));
    }

    let mut request = ureq::get(uri);
    // Authenticated buildpack releases (GitHub rate limits otherwise)
    if let Ok(token) = std::env::var("GITHUB_TOKEN") {
        if !token.is_empty() {
            request = request.header("Authorization", &format!("token {token}"));
        }
    }

    match request.call() {
        Ok(response) => {
            let status = response.status();
            if !status.is_success() {
                return Err(ShimError::DownloadFailed {
                    uri: uri.to_string(),
                    status: status.as_u16(),
                });
            }
            Ok(Box::new(response.into_body().into_reader()))
        }
        Err(ureq::Error::StatusCode(code)) => Err(ShimError::DownloadFailed {
            uri: uri.to_string(),
            status: code,
        }),
        Err(e) => Err(ShimError::DownloadTransport {
            uri: uri.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Unpack a gzipped tarball into `dest`
pub fn extract_tgz(archive: &Path, dest: &Path) -> ShimResult<()> {
    fs::create_dir_all(dest)
        .map_err(|e| ShimError::io(format!("creating {}", dest.display()), e))?;

    let file = File::open(archive)
        .map_err(|e| ShimError::io(format!("opening {}", archive.display()), e))?;
    let mut tarball = tar::Archive::new(GzDecoder::new(file));
    tarball.set_preserve_permissions(true);
    tarball
        .unpack(dest)
        .map_err(|e| ShimError::io(format!("unpacking {}", archive.display()), e))
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn file_uri(path: &Path) -> String {
        format!("file://{}", path.display())
    }

    #[test]
    fn download_verifies_and_promotes() {
        let temp = TempDir::new().unwrap();
        let artifact = temp.path().join("artifact.bin");
        fs::write(&artifact, b"some artifact contents").unwrap();
        let digest = hex::encode(Sha256::digest(b"some artifact contents"));

        let dest = temp.path().join("downloads/artifact.bin");
        download(&file_uri(&artifact), &digest, &dest).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"some artifact contents");
    }

    #[test]
    fn checksum_mismatch_leaves_no_file() {
        let temp = TempDir::new().unwrap();
        let artifact = temp.path().join("artifact.bin");
        fs::write(&artifact, b"some artifact contents").unwrap();

        let dest = temp.path().join("artifact-copy.bin");
        let err = download(&file_uri(&artifact), "deadbeef", &dest).unwrap_err();

        assert!(err.to_string().contains("dependency sha256 mismatch"));
        assert!(!dest.exists());
        assert!(!dest.with_extension("download").exists());
    }

    #[test]
    fn rejects_unknown_scheme() {
        let temp = TempDir::new().unwrap();
        let err = download("ftp://example.com/a.tgz", "aa", &temp.path().join("x")).unwrap_err();
        assert!(matches!(err, ShimError::UnsupportedUri(_)));
    }

    #[test]
    fn tgz_round_trip() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("bin")).unwrap();
        fs::write(src.join("buildpack.toml"), "[buildpack]\nid = \"a\"").unwrap();
        fs::write(src.join("bin/build"), "#!/bin/bash").unwrap();

        let archive = temp.path().join("bundle.tgz");
        testutil::pack_tgz(&src, &archive);

        let out = temp.path().join("out");
        extract_tgz(&archive, &out).unwrap();

        assert!(out.join("buildpack.toml").exists());
        assert!(out.join("bin/build").exists());
    }
}
