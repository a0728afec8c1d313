//! Checksum utilities for file verification

use crate::error::{Result, Wis2Error};
use crate::types::IntegrityMethod;
use sha2::{Digest, Sha256, Sha512};
use std::io::Read;
use std::path::Path;

enum Hasher {
    Md5(md5::Context),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    fn new(method: IntegrityMethod) -> Self {
        match method {
            IntegrityMethod::Md5 => Hasher::Md5(md5::Context::new()),
            IntegrityMethod::Sha256 => Hasher::Sha256(Sha256::new()),
            IntegrityMethod::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(ctx) => ctx.consume(data),
            Hasher::Sha256(hasher) => hasher.update(data),
            Hasher::Sha512(hasher) => hasher.update(data),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            Hasher::Md5(ctx) => ctx.compute().0.to_vec(),
            Hasher::Sha256(hasher) => hasher.finalize().to_vec(),
            Hasher::Sha512(hasher) => hasher.finalize().to_vec(),
        }
    }
}

/// Compute the raw digest of bytes
pub fn compute_digest(data: &[u8], method: IntegrityMethod) -> Vec<u8> {
    let mut hasher = Hasher::new(method);
    hasher.update(data);
    hasher.finalize()
}

/// Compute the raw digest of any readable source
pub fn compute_checksum<R: Read>(reader: &mut R, method: IntegrityMethod) -> Result<Vec<u8>> {
    let mut hasher = Hasher::new(method);
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize())
}

/// Compute the raw digest of a file
pub fn compute_file_checksum(path: impl AsRef<Path>, method: IntegrityMethod) -> Result<Vec<u8>> {
    let mut file = std::fs::File::open(path)?;
    compute_checksum(&mut file, method)
}

/// Verify a file against an expected raw digest.
///
/// Both sides are hex-encoded and compared case-insensitively.
pub fn verify_file_checksum(
    path: impl AsRef<Path>,
    method: IntegrityMethod,
    expected: &[u8],
) -> Result<()> {
    let actual = hex::encode(compute_file_checksum(path, method)?);
    let expected = hex::encode(expected);
    if actual.eq_ignore_ascii_case(&expected) {
        Ok(())
    } else {
        Err(Wis2Error::ChecksumMismatch {
            method: method.to_string(),
            expected,
            actual,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    #[test]
    fn test_compute_checksum_md5() {
        let mut cursor = Cursor::new(b"hello world");
        let digest = compute_checksum(&mut cursor, IntegrityMethod::Md5).unwrap();
        assert_eq!(hex::encode(digest), "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn test_compute_checksum_sha256() {
        let mut cursor = Cursor::new(b"hello world");
        let digest = compute_checksum(&mut cursor, IntegrityMethod::Sha256).unwrap();
        assert_eq!(
            hex::encode(digest),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_compute_checksum_sha512() {
        let mut cursor = Cursor::new(b"hello world");
        let digest = compute_checksum(&mut cursor, IntegrityMethod::Sha512).unwrap();
        assert_eq!(
            hex::encode(digest),
            "309ecc489c12d6eb4cc40f50c902f2b4d0ed77ee511a7c7a9bcd3ca86d4cd86f989dd35bc5ff499670da34255b45b0cfd830e81f605dcf7dc5542e93ae9cd76f"
        );
    }

    #[test]
    fn test_digest_lengths_match_method() {
        for method in [IntegrityMethod::Md5, IntegrityMethod::Sha256, IntegrityMethod::Sha512] {
            assert_eq!(compute_digest(b"x", method).len(), method.digest_len());
        }
    }

    #[test]
    fn test_verify_file_checksum() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"hello world").unwrap();
        temp_file.flush().unwrap();

        let expected = compute_digest(b"hello world", IntegrityMethod::Sha256);
        assert!(verify_file_checksum(temp_file.path(), IntegrityMethod::Sha256, &expected).is_ok());

        let wrong = vec![0u8; 32];
        let result = verify_file_checksum(temp_file.path(), IntegrityMethod::Sha256, &wrong);
        assert!(matches!(result.unwrap_err(), Wis2Error::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_compute_checksum_spans_buffers() {
        let data = vec![7u8; 8192 * 3 + 17];
        let mut cursor = Cursor::new(&data);
        let streamed = compute_checksum(&mut cursor, IntegrityMethod::Md5).unwrap();
        assert_eq!(streamed, compute_digest(&data, IntegrityMethod::Md5));
    }
}
