use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum YamlFileError {
    #[error("Failed to read file: {path}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Deserialization error in file: {path}")]
    InvalidFile {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

pub async fn read_yaml_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, YamlFileError> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| YamlFileError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
    serde_yaml::from_str(&content).map_err(|source| YamlFileError::InvalidFile {
        path: path.to_path_buf(),
        source,
    })
}
