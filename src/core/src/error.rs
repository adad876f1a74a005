use thiserror::Error;

/// Skiff error kinds.
///
/// Errors carry a human-readable message that is extended with a short
/// context prefix at each layer (`"build image: commit layer: ..."`).
#[derive(Error, Debug)]
pub enum SkiffError {
    /// A blob, image, tag or bundle was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A tag or bundle id collided on creation.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A try-lock failed because another holder is active.
    #[error("locked: {0}")]
    Locked(String),

    /// Store contents disagree with their own metadata (digest mismatch,
    /// dangling blob reference, non-canonical fs-spec).
    #[error("corrupt: {0}")]
    Corrupt(String),

    /// A privileged operation was attempted rootless.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A tar entry resolved outside the rootfs.
    #[error("path escape: {0}")]
    PathEscape(String),

    /// Malformed Dockerfile, unknown instruction, bad user spec.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The external runtime reported non-zero or crashed.
    #[error("runtime: {0}")]
    RuntimeError(String),

    /// Build cache lookup missed. Temporary: the engine falls through
    /// to building instead of failing.
    #[error("cache miss: {0}")]
    CacheMiss(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl SkiffError {
    /// Prepend a context prefix, preserving the error kind.
    pub fn context(self, prefix: &str) -> Self {
        use SkiffError::*;
        match self {
            NotFound(m) => NotFound(format!("{prefix}: {m}")),
            AlreadyExists(m) => AlreadyExists(format!("{prefix}: {m}")),
            Locked(m) => Locked(format!("{prefix}: {m}")),
            Corrupt(m) => Corrupt(format!("{prefix}: {m}")),
            PermissionDenied(m) => PermissionDenied(format!("{prefix}: {m}")),
            PathEscape(m) => PathEscape(format!("{prefix}: {m}")),
            InvalidInput(m) => InvalidInput(format!("{prefix}: {m}")),
            RuntimeError(m) => RuntimeError(format!("{prefix}: {m}")),
            CacheMiss(m) => CacheMiss(format!("{prefix}: {m}")),
            Io(e) => Other(format!("{prefix}: {e}")),
            Serialization(m) => Serialization(format!("{prefix}: {m}")),
            Other(m) => Other(format!("{prefix}: {m}")),
        }
    }

    /// True for the temporary cache-miss variant.
    pub fn is_cache_miss(&self) -> bool {
        matches!(self, SkiffError::CacheMiss(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SkiffError::NotFound(_))
    }
}

impl From<serde_json::Error> for SkiffError {
    fn from(err: serde_json::Error) -> Self {
        SkiffError::Serialization(err.to_string())
    }
}

/// Result type alias for skiff operations.
pub type Result<T> = std::result::Result<T, SkiffError>;

/// Wrap an error value with a context prefix.
pub trait Context<T> {
    fn context(self, prefix: &str) -> Result<T>;
}

impl<T> Context<T> for Result<T> {
    fn context(self, prefix: &str) -> Result<T> {
        self.map_err(|e| e.context(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_preserves_kind() {
        let err = SkiffError::NotFound("image foo".to_string()).context("build image");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "not found: build image: image foo");
    }

    #[test]
    fn test_context_chains() {
        let err: Result<()> = Err(SkiffError::Corrupt("bad digest".to_string()));
        let err = err.context("pack tarball").context("commit layer").unwrap_err();
        assert_eq!(
            err.to_string(),
            "corrupt: commit layer: pack tarball: bad digest"
        );
    }

    #[test]
    fn test_cache_miss_is_temporary() {
        assert!(SkiffError::CacheMiss("x".to_string()).is_cache_miss());
        assert!(!SkiffError::NotFound("x".to_string()).is_cache_miss());
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::other("boom");
        let err: SkiffError = io.into();
        assert!(matches!(err, SkiffError::Io(_)));
    }
}
