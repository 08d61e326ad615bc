//! `AssetError` is `Clone`: one failed load is handed to every waiter.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssetError {
    /// The key is not present in the catalog. Raised before any I/O.
    #[error("Unknown asset type '{0}'")]
    UnknownAssetType(String),

    /// A spawn request named a key that is neither an asset type nor an assembly.
    #[error("Invalid asset type '{0}'")]
    InvalidAssetType(String),

    #[error("Failed to load asset '{key}': {message}")]
    Load { key: String, message: String },

    #[error("Invalid catalog entry '{key}': {reason}")]
    InvalidCatalog { key: String, reason: String },

    /// Building an instance failed after the model was available.
    #[error("Spawn of '{key}' failed: {reason}")]
    Spawn { key: String, reason: String },

    #[error("Physics error: {0}")]
    Physics(String),
}

impl AssetError {
    pub(crate) fn spawn(key: &str, reason: impl Into<String>) -> Self {
        AssetError::Spawn { key: key.to_string(), reason: reason.into() }
    }

    pub(crate) fn invalid_catalog(key: &str, reason: impl Into<String>) -> Self {
        AssetError::InvalidCatalog { key: key.to_string(), reason: reason.into() }
    }
}

pub type Result<T> = std::result::Result<T, AssetError>;
