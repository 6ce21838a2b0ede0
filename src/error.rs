use crate::source::ShaderStage;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading, compiling, reflecting or building a program.
///
/// At startup every variant is fatal. During a reload the coordinator catches
/// them, logs them and keeps the previous pipeline bound.
#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("shader source not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("shader source is empty: {}", path.display())]
    EmptyContent { path: PathBuf },

    /// Two consecutive reads never matched within the retry budget.
    #[error("{} did not settle after {attempts} reads", path.display())]
    Unstable { path: PathBuf, attempts: u32 },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not valid UTF-8", path.display())]
    InvalidEncoding { path: PathBuf },

    #[error("pipeline descriptor not found: {}", path.display())]
    ConfigNotFound { path: PathBuf },

    #[error("failed to parse pipeline descriptor {}: {message}", path.display())]
    ConfigParse { path: PathBuf, message: String },

    /// Carries the compiler's full diagnostic, locations included.
    #[error("failed to compile {stage} shader:\n{diagnostic}")]
    Compile {
        stage: ShaderStage,
        diagnostic: String,
    },

    #[error("compiling {} produced no SPIR-V words", path.display())]
    EmptyOutput { path: PathBuf },

    #[error("malformed SPIR-V binary: {0}")]
    MalformedBinary(String),

    #[error("unsupported vertex input format at location {location}: {reason}")]
    UnsupportedFormat { location: u32, reason: String },

    #[error("unsupported shader interface: {0}")]
    ReflectionUnsupported(String),

    #[error("pipeline creation failed: {0}")]
    PipelineCreateFailed(String),
}

pub type Result<T, E = ReloadError> = std::result::Result<T, E>;

impl ReloadError {
    /// Read failures that may clear up without the file changing.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unstable { .. } | Self::Io { .. })
    }
}
