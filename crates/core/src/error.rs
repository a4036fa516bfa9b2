use crate::validation::ValidationErrors;

#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),
    #[error("a user with this ID or email already exists")]
    UserExists,

    #[error("failed to create storage directory: {0}")]
    StorageDirCreation(std::io::Error),
    #[error("failed to read storage key {key}: {source}")]
    StorageRead {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write storage key {key}: {source}")]
    StorageWrite {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("storage lock poisoned")]
    StoragePoisoned,
    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("failed to serialize {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to deserialize {key}: {source}")]
    Deserialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("attachment error: {0}")]
    Attachment(#[from] medportal_files::FilesError),
}

pub type PortalResult<T> = std::result::Result<T, PortalError>;
