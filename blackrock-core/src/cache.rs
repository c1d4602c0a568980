//! Persisted memoization of expensive decode calls.
//!
//! Every entry is one bincode blob under the cache directory. Its key mixes
//! the identity of the source file with the call name and the normalized
//! argument list into a single blake3 digest. Entries are written to a
//! temporary file and renamed into place, so a reader never observes a
//! partial entry. A corrupt or unreadable entry is treated as a miss and
//! rewritten.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::Result;

/// Bound applied to hashed text arguments.
const TEXT_ARG_MODULUS: u64 = 100_000_000;

/// Hex digits of the key digest used in entry file names.
const KEY_HEX_LEN: usize = 32;

/// What a cache entry is derived from.
///
/// Two files that share a base name but differ in size or header bytes get
/// different identities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceIdentity {
    pub basename: String,
    pub len: u64,
    pub header_digest: [u8; 32],
}

impl SourceIdentity {
    /// Identifies `contents` loaded from `path`, hashing the first `header_len` bytes.
    pub fn new(path: &Path, contents: &[u8], header_len: usize) -> Self {
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let header = &contents[..header_len.min(contents.len())];
        Self {
            basename,
            len: contents.len() as u64,
            header_digest: *blake3::hash(header).as_bytes(),
        }
    }
}

/// One argument of a cached call.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheArg {
    Int(i64),
    Float(f64),
    Text(String),
}

impl CacheArg {
    /// Feeds the normalized form of the argument into `hasher`.
    ///
    /// Text is reduced to a bounded integer first; numbers are used as is.
    fn hash_into(&self, hasher: &mut blake3::Hasher) {
        match self {
            CacheArg::Int(v) => {
                hasher.update(&[0]);
                hasher.update(&v.to_le_bytes());
            }
            CacheArg::Float(v) => {
                hasher.update(&[1]);
                hasher.update(&v.to_bits().to_le_bytes());
            }
            CacheArg::Text(s) => {
                hasher.update(&[2]);
                hasher.update(&bounded_text_hash(s).to_le_bytes());
            }
        }
    }
}

fn bounded_text_hash(s: &str) -> u64 {
    let digest = blake3::hash(s.as_bytes());
    let mut word = [0u8; 8];
    word.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(word) % TEXT_ARG_MODULUS
}

impl From<u16> for CacheArg {
    fn from(v: u16) -> Self {
        CacheArg::Int(v as i64)
    }
}

impl From<f64> for CacheArg {
    fn from(v: f64) -> Self {
        CacheArg::Float(v)
    }
}

impl From<&str> for CacheArg {
    fn from(v: &str) -> Self {
        CacheArg::Text(v.to_string())
    }
}

/// A directory of persisted decode results.
#[derive(Debug, Clone)]
pub struct ResultCache {
    dir: PathBuf,
}

impl ResultCache {
    /// Uses `dir`, which is created on the first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the entry for this call is stored.
    pub fn entry_path(&self, source: &SourceIdentity, call: &str, args: &[CacheArg]) -> PathBuf {
        let mut hasher = blake3::Hasher::new();
        hasher.update(source.basename.as_bytes());
        hasher.update(&[0]);
        hasher.update(&source.len.to_le_bytes());
        hasher.update(&source.header_digest);
        hasher.update(call.as_bytes());
        hasher.update(&[0]);
        for arg in args {
            arg.hash_into(&mut hasher);
        }
        let hex = hasher.finalize().to_hex();
        self.dir
            .join(format!("{}-{}.bin", call, &hex.as_str()[..KEY_HEX_LEN]))
    }

    /// Returns the stored result for this call, or runs `compute` and stores its result.
    ///
    /// Errors from `compute` are returned and never stored. Failing to read
    /// or write an entry only costs a recomputation.
    pub fn get_or_compute<T, F>(
        &self,
        source: &SourceIdentity,
        call: &str,
        args: &[CacheArg],
        compute: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        let path = self.entry_path(source, call, args);
        match fs::read(&path) {
            Ok(bytes) => match bincode::deserialize::<T>(&bytes) {
                Ok(value) => {
                    debug!(path = %path.display(), "cache hit");
                    return Ok(value);
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "corrupt cache entry, recomputing")
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "cache miss");
            }
            Err(err) => warn!(path = %path.display(), error = %err, "unreadable cache entry"),
        }

        let value = compute()?;
        if let Err(err) = self.store(&path, &value) {
            warn!(path = %path.display(), error = %err, "failed to write cache entry");
        }
        Ok(value)
    }

    fn store<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let tmp = NamedTempFile::new_in(&self.dir)?;
        let mut writer = BufWriter::new(tmp);
        bincode::serialize_into(&mut writer, value)?;
        writer.flush()?;
        let tmp = writer.into_inner().map_err(|e| e.into_error())?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}
