use thiserror::Error;

#[derive(Error, Debug)]
pub enum DedupError {
    #[error("fingerprint has {found} bits but the index holds {expected}-bit fingerprints")]
    BitLengthMismatch { expected: usize, found: usize },
    #[error("malformed fingerprint: {0}")]
    MalformedFingerprint(String),
    #[error("invalid dedup config: {0}")]
    InvalidConfig(String),
    #[error("failed to load config {0}")]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type Result<T, E = DedupError> = std::result::Result<T, E>;
