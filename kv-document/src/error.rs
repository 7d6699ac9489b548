/// Failures reported by a storage backend. Passed through to callers unwrapped
/// inside [`Error::Backend`].
#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("TiKV error: {0}")]
    TikvError(#[from] tikv_client::Error),
    #[error("Prost error: {0}")]
    DeserializationError(#[from] prost::DecodeError),
    #[error("Requested resource not found: {0}")]
    ResourceNotFound(String),
    #[error("Resource in use: {0}")]
    ResourceInUse(String),
    #[error("The conditional request failed")]
    ConditionalCheckFailed,
    #[error("Transaction cancelled, reasons: {0:?}")]
    TransactionCanceled(Vec<Option<String>>),
    #[error("Throughput exceeded: {0}")]
    Throttled(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

impl BackendError {
    pub fn is_resource_not_found(&self) -> bool {
        matches!(self, BackendError::ResourceNotFound(_))
    }

    pub fn is_conditional_check_failed(&self) -> bool {
        matches!(self, BackendError::ConditionalCheckFailed)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("Missing hash key value for {0}")]
    MissingHashKey(String),
    #[error("Missing range key value for {0}")]
    MissingRangeKey(String),
    #[error("Attempted to write record {0} which already exists")]
    RecordNotUnique(String),
    #[error("Attempted to change a stale object: {0}")]
    StaleObjectError(String),
    #[error("Unknown attribute {attribute} for model {model}")]
    UnknownAttribute { model: String, attribute: String },
    #[error("Unknown operator {0}")]
    UnknownOperator(String),
    #[error("Document not valid: {0:?}")]
    DocumentNotValid(Vec<String>),
    #[error("Failed to save the record: {0}")]
    RecordNotSaved(String),
    #[error("Failed to destroy the record: {0}")]
    RecordNotDestroyed(String),
    #[error("Couldn't find {model} with key {key}")]
    RecordNotFound { model: String, key: String },
    #[error("Unsupported key type {kind} for attribute {attribute}")]
    UnsupportedKeyType { attribute: String, kind: String },
    #[error("Unknown index {index} for model {model}")]
    UnknownIndex { model: String, index: String },
    #[error("Index {index} cannot serve this query: {reason}")]
    IndexIncompatible { index: String, reason: String },
    #[error("Conditions on {0} cannot be combined into a single range key condition")]
    MultipleRangeConditions(String),
    #[error("Unknown model {0}")]
    UnknownModel(String),
    #[error("Unknown type {0}")]
    UnknownType(String),
    #[error("Unknown backoff strategy {0}")]
    UnknownBackoff(String),
    #[error("Cannot cast {value} to {expected} for attribute {attribute}")]
    TypeMismatch {
        attribute: String,
        expected: String,
        value: String,
    },
    #[error("Invalid record state: {0}")]
    InvalidState(String),
    #[error("Transaction has already been committed")]
    TransactionCommitted,
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn mismatch(
        attribute: &str,
        expected: impl std::fmt::Display,
        value: impl std::fmt::Debug,
    ) -> Self {
        Error::TypeMismatch {
            attribute: attribute.to_string(),
            expected: expected.to_string(),
            value: format!("{:?}", value),
        }
    }

    /// True when the backend rejected a write because its condition did not hold.
    pub fn is_conditional_check_failed(&self) -> bool {
        matches!(self, Error::Backend(e) if e.is_conditional_check_failed())
    }
}
