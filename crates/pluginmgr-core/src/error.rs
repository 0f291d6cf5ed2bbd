//! # Plugin Manager Errors
//!
//! Errors raised by the fallible building blocks of the manager: reading and
//! parsing metadata, opening and closing plugin libraries, and manipulating
//! configuration trees. Manager operations themselves report through
//! [`LoadState`](crate::LoadState); these errors end up in the diagnostics
//! that accompany a non-success state.
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PluginManagerError {
    #[error("{} was not found", path.display())]
    MetadataNotFound { path: PathBuf },

    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse metadata of {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: Box<ErrorSource>,
    },

    #[error("cannot open {}: {message}", path.display())]
    LibraryOpen { path: PathBuf, message: String },

    #[error("cannot close {}: {message}", path.display())]
    LibraryClose { path: PathBuf, message: String },

    #[error("cannot convert configuration value for '{key}': {source}")]
    Value {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ErrorSource {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[cfg(feature = "toml-config")]
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
    #[cfg(feature = "yaml-config")]
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error("{0}")]
    Structure(String),
}

pub type Result<T> = std::result::Result<T, PluginManagerError>;
