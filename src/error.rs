use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("remote query failed: {0}")]
    RemoteQuery(String),
    #[error("no archived months in {}", .0.display())]
    NoArchive(PathBuf),
    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl ArchiveError {
    pub fn no_credentials() -> Self {
        Self::Configuration("no credentials supplied".to_string())
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn remote(err: impl std::fmt::Display) -> Self {
        Self::RemoteQuery(err.to_string())
    }
}
