use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

const DIGEST_PREFIX: &str = "sha256:";

/// `sha256:<hex>` of `bytes`
pub fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{}{}", DIGEST_PREFIX, hex::encode(hasher.finalize()))
}

/// Where a blob with `digest` lives under `root`. Returns `None` for digests
/// that are not `sha256:<64 hex chars>`.
pub fn blob_path(root: &Path, digest: &str) -> Option<PathBuf> {
    let hex = digest.strip_prefix(DIGEST_PREFIX)?;
    if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(root.join("sha256").join(&hex[0..2]).join(&hex[2..4]).join(hex))
}

/// Store `bytes` under their digest and return the digest. Existing blobs are
/// left untouched; a new blob is written to a temporary file first and synced
/// before being renamed into place.
pub fn write_blob(root: &Path, bytes: &[u8]) -> io::Result<String> {
    let digest = digest(bytes);
    let path = blob_path(root, &digest)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed digest"))?;
    if path.exists() {
        return Ok(digest);
    }
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "blob path has no parent"))?;
    fs::create_dir_all(dir)?;

    let mut staged = tempfile::NamedTempFile::new_in(dir)?;
    io::Write::write_all(&mut staged, bytes)?;
    staged.as_file().sync_all()?;
    staged.persist(&path).map_err(|e| e.error)?;
    Ok(digest)
}

/// Re-hash the blob on disk and check it still matches `digest`.
pub fn verify_blob(root: &Path, digest: &str) -> io::Result<bool> {
    let path = blob_path(root, digest)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed digest"))?;
    let bytes = fs::read(&path)?;
    File::open(&path)?.sync_all()?;
    Ok(self::digest(&bytes) == digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_blob_is_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_blob(dir.path(), b"price,last_review\n").unwrap();
        let second = write_blob(dir.path(), b"price,last_review\n").unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("sha256:"));

        let path = blob_path(dir.path(), &first).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"price,last_review\n");
        assert!(verify_blob(dir.path(), &first).unwrap());
    }

    #[test]
    fn test_verify_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let d = write_blob(dir.path(), b"original").unwrap();
        fs::write(blob_path(dir.path(), &d).unwrap(), b"tampered").unwrap();
        assert!(!verify_blob(dir.path(), &d).unwrap());
    }

    #[test]
    fn test_blob_path_rejects_malformed_digests() {
        let root = Path::new("/store");
        assert!(blob_path(root, "md5:abcd").is_none());
        assert!(blob_path(root, "sha256:../../etc/passwd").is_none());
    }
}
