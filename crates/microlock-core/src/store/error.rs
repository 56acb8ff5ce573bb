//! Store error types and conflict classification

/// Numeric error codes reported by the store, etcd v2 numbering.
pub mod error_code {
    pub const KEY_NOT_FOUND: u32 = 100;
    pub const COMPARE_FAILED: u32 = 101;
    pub const NOT_FILE: u32 = 102;
    pub const NODE_EXIST: u32 = 105;
    pub const VALUE_REQUIRED: u32 = 200;
    pub const PREV_VALUE_REQUIRED: u32 = 201;
    pub const TTL_NAN: u32 = 202;
    pub const REFRESH_VALUE: u32 = 212;
    pub const REFRESH_TTL_REQUIRED: u32 = 213;
    pub const EVENT_INDEX_CLEARED: u32 = 401;
}

/// The three conflict classes the lock protocol understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conflict {
    KeyExists,
    KeyNotFound,
    CompareFailed,
}

impl Conflict {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            error_code::NODE_EXIST => Some(Conflict::KeyExists),
            error_code::KEY_NOT_FOUND => Some(Conflict::KeyNotFound),
            error_code::COMPARE_FAILED => Some(Conflict::CompareFailed),
            _ => None,
        }
    }
}

/// Error type for coordination store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store rejected request: code={code}, message={message}, cause={cause}")]
    Rejected {
        code: u32,
        message: String,
        cause: String,
        index: u64,
    },

    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("unexpected store response: {0}")]
    Protocol(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    pub fn rejected(code: u32, message: &str, cause: &str, index: u64) -> Self {
        StoreError::Rejected {
            code,
            message: message.to_string(),
            cause: cause.to_string(),
            index,
        }
    }

    /// Numeric store code, when the store answered with one.
    pub fn code(&self) -> Option<u32> {
        match self {
            StoreError::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Conflict class of this error; `None` for every non-conflict failure.
    pub fn conflict(&self) -> Option<Conflict> {
        self.code().and_then(Conflict::from_code)
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_classification() {
        let err = StoreError::rejected(105, "Key already exists", "/foo", 3);
        assert_eq!(err.conflict(), Some(Conflict::KeyExists));

        let err = StoreError::rejected(100, "Key not found", "/foo", 3);
        assert_eq!(err.conflict(), Some(Conflict::KeyNotFound));

        let err = StoreError::rejected(101, "Compare failed", "[a != b]", 3);
        assert_eq!(err.conflict(), Some(Conflict::CompareFailed));
    }

    #[test]
    fn test_other_codes_are_unclassified() {
        let err = StoreError::rejected(error_code::TTL_NAN, "The given TTL is not a number", "", 0);
        assert_eq!(err.code(), Some(202));
        assert_eq!(err.conflict(), None);

        let err = StoreError::Protocol("empty body".to_string());
        assert_eq!(err.code(), None);
        assert_eq!(err.conflict(), None);
    }

    #[test]
    fn test_error_display() {
        let err = StoreError::rejected(101, "Compare failed", "[a != b]", 12);
        assert_eq!(
            err.to_string(),
            "store rejected request: code=101, message=Compare failed, cause=[a != b]"
        );
    }
}
