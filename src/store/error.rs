use ulid::Ulid;

#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// A transaction precondition failed: the roll changed since it was read.
    Conflict(Ulid),
    /// The same roll appears twice in one transaction.
    DuplicateWrite(Ulid),
    InvalidQuantity(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl StoreError {
    /// Whether re-reading and trying again can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "not found: {id}"),
            StoreError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            StoreError::Conflict(id) => {
                write!(f, "roll {id} was modified concurrently; re-read and retry")
            }
            StoreError::DuplicateWrite(id) => {
                write!(f, "roll {id} written twice in one transaction")
            }
            StoreError::InvalidQuantity(msg) => write!(f, "invalid quantity: {msg}"),
            StoreError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            StoreError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}
