use thiserror::Error;

pub type HavenResult<T> = Result<T, HavenError>;

/// Workspace-wide error taxonomy.
///
/// Auth failures deliberately carry no detail: a failed master-key unwrap is
/// always `InvalidPassword`, regardless of the underlying cause.
#[derive(Debug, Error)]
pub enum HavenError {
    // input
    #[error("password must be at least 6 characters")]
    PasswordTooShort,

    #[error("password must not exceed 1000 characters")]
    PasswordTooLong,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // auth
    #[error("invalid pin")]
    InvalidPin,

    #[error("too many invalid attempts")]
    TooManyAttempts,

    #[error("invalid password")]
    InvalidPassword,

    #[error("invalid session")]
    InvalidSession,

    #[error("invalid transmission")]
    InvalidTransmission,

    // transfer
    #[error("transfer not found")]
    TransferNotFound,

    #[error("transfer already completed")]
    TransferComplete,

    #[error("pending transfer already exists for session: {0}")]
    DuplicateSession(String),

    #[error("transfer rejected by recipient")]
    Rejected,

    #[error("request timeout - no response from recipient")]
    Timeout,

    // storage
    #[error("vault file not found")]
    VaultMissing,

    #[error("corrupted vault header")]
    VaultCorrupted,

    #[error("unsupported vault version")]
    UnsupportedVersion,

    #[error("vault header too large")]
    HeaderTooLarge,

    #[error("vault I/O error: {0}")]
    VaultIo(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(String),

    #[error("decryption failed: invalid key or corrupted data")]
    CryptoFailure,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("tls error: {0}")]
    Tls(String),

    // lifecycle
    #[error("{0} not initialized")]
    NotInitialized(&'static str),

    #[error("server is already running")]
    AlreadyRunning,
}
