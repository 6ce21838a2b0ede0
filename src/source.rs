use crate::error::{ReloadError, Result};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Programmable stage a shader source feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

/// SHA-256 fingerprint of raw file content.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; 32]);

impl Digest {
    pub fn of(bytes: &[u8]) -> Self {
        let mut out = [0u8; 32];
        out.copy_from_slice(&Sha256::digest(bytes));
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Eight bytes is plenty to tell digests apart in logs.
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// A shader source file as last read from disk.
#[derive(Debug, Clone)]
pub struct ShaderFile {
    pub stage: ShaderStage,
    pub name: String,
    pub path: PathBuf,
    pub source: String,
    pub digest: Digest,
}

impl ShaderFile {
    pub(crate) fn from_bytes(stage: ShaderStage, path: &Path, bytes: Vec<u8>) -> Result<Self> {
        if bytes.is_empty() {
            return Err(ReloadError::EmptyContent {
                path: path.to_path_buf(),
            });
        }
        let digest = Digest::of(&bytes);
        let source = String::from_utf8(bytes).map_err(|_| ReloadError::InvalidEncoding {
            path: path.to_path_buf(),
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            stage,
            name,
            path: path.to_path_buf(),
            source,
            digest,
        })
    }
}

/// Source of raw file bytes.
///
/// The filesystem is the only production implementation; tests substitute
/// readers that simulate an editor still flushing a file.
pub trait SourceReader: Send + Sync {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// Reads straight from the filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsReader;

impl SourceReader for FsReader {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}

/// How hard to try before declaring a file unstable.
///
/// The worst-case stall on the render thread is `attempts * delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StableReadPolicy {
    pub delay: Duration,
    pub attempts: u32,
}

impl Default for StableReadPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(crate::DEFAULT_STABLE_DELAY_MS),
            attempts: crate::DEFAULT_STABLE_ATTEMPTS,
        }
    }
}

/// Loads shader text and fingerprints it.
#[derive(Clone)]
pub struct SourceRegistry {
    reader: Arc<dyn SourceReader>,
    policy: StableReadPolicy,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new(Arc::new(FsReader), StableReadPolicy::default())
    }
}

impl SourceRegistry {
    pub fn new(reader: Arc<dyn SourceReader>, policy: StableReadPolicy) -> Self {
        Self { reader, policy }
    }

    pub fn policy(&self) -> StableReadPolicy {
        self.policy
    }

    /// Reads `path` once and fingerprints it.
    ///
    /// # Errors
    ///
    /// `NotFound` if the file is absent, `EmptyContent` if it is zero-length.
    pub fn load(&self, path: &Path, stage: ShaderStage) -> Result<ShaderFile> {
        let bytes = self.read(path)?;
        ShaderFile::from_bytes(stage, path, bytes)
    }

    /// Like [`load`](Self::load) but only accepts content that survived
    /// [`reread_stable`](Self::reread_stable).
    pub fn load_stable(&self, path: &Path, stage: ShaderStage) -> Result<ShaderFile> {
        let bytes = self.reread_stable(path)?;
        ShaderFile::from_bytes(stage, path, bytes)
    }

    /// Reads `path` twice, `policy.delay` apart, and returns the content once
    /// both reads agree.
    ///
    /// # Errors
    ///
    /// `Unstable` when no pair of reads matched within `policy.attempts`.
    pub fn reread_stable(&self, path: &Path) -> Result<Vec<u8>> {
        let attempts = self.policy.attempts.max(1);
        for attempt in 1..=attempts {
            let first = self.read(path)?;
            std::thread::sleep(self.policy.delay);
            let second = self.read(path)?;
            if first == second {
                return Ok(second);
            }
            tracing::trace!(path = %path.display(), attempt, "source still changing");
        }

        Err(ReloadError::Unstable {
            path: path.to_path_buf(),
            attempts,
        })
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.reader.read(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ReloadError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ReloadError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })
    }
}
