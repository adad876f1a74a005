//! Content digests.
//!
//! A digest identifies a blob as `<algorithm>:<lowercase hex>`. Only
//! sha256 is produced; parsing rejects anything else so a corrupted
//! store name surfaces early.

use std::fmt;
use std::io::{Read, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use skiff_core::error::{Result, SkiffError};

/// The only digest algorithm in use.
pub const ALGORITHM_SHA256: &str = "sha256";

/// A content digest: algorithm plus lowercase hex.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: String,
    hex: String,
}

impl Digest {
    /// Parse `algorithm:hex`, validating the sha256 format.
    pub fn parse(s: &str) -> Result<Self> {
        let (algorithm, hex) = s
            .split_once(':')
            .ok_or_else(|| SkiffError::InvalidInput(format!("malformed digest {s:?}")))?;
        if algorithm != ALGORITHM_SHA256 {
            return Err(SkiffError::InvalidInput(format!(
                "unsupported digest algorithm {algorithm:?}"
            )));
        }
        if hex.len() != 64 || !hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(SkiffError::InvalidInput(format!(
                "malformed sha256 digest {s:?}"
            )));
        }
        Ok(Self {
            algorithm: algorithm.to_string(),
            hex: hex.to_string(),
        })
    }

    /// Digest a byte slice.
    pub fn sha256_of(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self {
            algorithm: ALGORITHM_SHA256.to_string(),
            hex: hex::encode(hasher.finalize()),
        }
    }

    /// Digest an entire reader, returning the digest and byte count.
    pub fn sha256_of_reader(mut reader: impl Read) -> Result<(Self, u64)> {
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            total += n as u64;
        }
        Ok((
            Self {
                algorithm: ALGORITHM_SHA256.to_string(),
                hex: hex::encode(hasher.finalize()),
            },
            total,
        ))
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Relative store path `<algorithm>/<hex>`.
    pub fn store_path(&self) -> PathBuf {
        PathBuf::from(&self.algorithm).join(&self.hex)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl TryFrom<String> for Digest {
    type Error = SkiffError;

    fn try_from(s: String) -> Result<Self> {
        Digest::parse(&s)
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> Self {
        d.to_string()
    }
}

/// A writer that hashes everything passing through it.
pub struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
    count: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            count: 0,
        }
    }

    /// Finish hashing, returning the digest, byte count and inner writer.
    pub fn finish(self) -> (Digest, u64, W) {
        (
            Digest {
                algorithm: ALGORITHM_SHA256.to_string(),
                hex: hex::encode(self.hasher.finalize()),
            },
            self.count,
            self.inner,
        )
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_sha256_of_bytes() {
        let d = Digest::sha256_of(b"hello");
        assert_eq!(d.hex(), HELLO_SHA256);
        assert_eq!(d.to_string(), format!("sha256:{HELLO_SHA256}"));
    }

    #[test]
    fn test_sha256_of_reader() {
        let (d, n) = Digest::sha256_of_reader(&b"hello"[..]).unwrap();
        assert_eq!(d.hex(), HELLO_SHA256);
        assert_eq!(n, 5);
    }

    #[test]
    fn test_parse_round_trip() {
        let d = Digest::sha256_of(b"x");
        let parsed = Digest::parse(&d.to_string()).unwrap();
        assert_eq!(parsed, d);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Digest::parse("sha256").is_err());
        assert!(Digest::parse("md5:abcd").is_err());
        assert!(Digest::parse("sha256:zz").is_err());
        assert!(Digest::parse(&format!("sha256:{}", "A".repeat(64))).is_err());
    }

    #[test]
    fn test_store_path() {
        let d = Digest::sha256_of(b"hello");
        assert_eq!(
            d.store_path(),
            PathBuf::from("sha256").join(HELLO_SHA256)
        );
    }

    #[test]
    fn test_hashing_writer_matches_direct() {
        let mut w = HashingWriter::new(Vec::new());
        w.write_all(b"he").unwrap();
        w.write_all(b"llo").unwrap();
        let (d, n, buf) = w.finish();
        assert_eq!(d.hex(), HELLO_SHA256);
        assert_eq!(n, 5);
        assert_eq!(buf, b"hello");
    }

    #[test]
    fn test_serde_as_string() {
        let d = Digest::sha256_of(b"hello");
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, format!("\"sha256:{HELLO_SHA256}\""));
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
