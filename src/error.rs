use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("manifest error: {0}")]
    Manifest(#[from] toml::de::Error),

    /// Adapter registration was invalid, or an entity type was used
    /// without being registered.
    #[error("registration error: {0}")]
    Registration(String),

    /// The caller required a capability the configured backend lacks.
    #[error("backend '{backend}' does not support {capability}")]
    BackendCapability {
        backend: &'static str,
        capability: &'static str,
    },

    #[error("schema error: {0}")]
    Schema(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("expected exactly one search result, found {count}")]
    NotUnique { count: usize },

    /// A nested update context was dropped without finishing, so the
    /// pending index writes of the whole unit of work were discarded.
    #[error("update context was abandoned; pending index writes discarded")]
    ContextAbandoned,

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

impl Error {
    pub(crate) fn registration(message: impl Into<String>) -> Self {
        Self::Registration(message.into())
    }

    pub(crate) fn not_registered(engine: &str, entity_type: &str) -> Self {
        Self::Registration(format!(
            "entity type '{entity_type}' is not registered with search engine '{engine}'"
        ))
    }

    pub fn is_registration(&self) -> bool {
        matches!(self, Self::Registration(_))
    }
}
