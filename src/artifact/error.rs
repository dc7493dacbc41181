// artifact/error.rs
//
// Errors raised by the artifact store

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while creating or reading a local artifact
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Artifact {name} already exists at {path}")]
    AlreadyExists { name: String, path: PathBuf },

    #[error("Artifact {name} not found at {path}")]
    NotFound { name: String, path: PathBuf },

    #[error("Archive {path} already exists; refusing to overwrite")]
    ArchiveExists { path: PathBuf },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed artifact metadata at {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl ArtifactError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ArtifactError::Io {
            path: path.into(),
            source,
        }
    }
}
