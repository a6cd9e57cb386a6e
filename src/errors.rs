use thiserror::Error;

/// Errors surfaced at the crate boundary.
///
/// Everything else (I/O failures, archive corruption) propagates as plain
/// [`anyhow::Error`] with path context attached at the failure site.
#[derive(Debug, Error)]
pub enum PackErr {
    #[error("invalid runtime env: {0}")]
    BadDescriptor(String),

    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),

    #[error(
        "package of {0} bytes exceeds the maximum size of 512MiB; \
         you can exclude large files using the `excludes` option of the runtime env"
    )]
    PayloadTooLarge(usize),

    #[error("failed to fetch {0} from the package store")]
    FetchFailed(String),

    #[error("unknown package URI scheme `{0}`")]
    UnknownScheme(String),

    #[error("package cache root is not configured")]
    CacheNotConfigured,
}
