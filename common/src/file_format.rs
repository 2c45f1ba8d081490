use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

#[derive(Debug, thiserror::Error)]
pub enum FileFormatError {
    #[error("Failed to get file extension for '{0}'")]
    MissingFileExtension(PathBuf),
    #[error("Unsupported file extension for file '{0}'")]
    UnsupportedFileExtension(PathBuf),
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("YAML serialization failed: {0}")]
    Yaml(#[from] serde_yml::Error),
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

pub type FileFormatResult<T> = Result<T, FileFormatError>;

/// Text formats supported for configuration files.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SerdeFormat {
    Yaml,
    Json,
}

impl SerdeFormat {
    pub fn from_path(path: &Path) -> FileFormatResult<Self> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| FileFormatError::MissingFileExtension(path.to_path_buf()))?;

        if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") {
            Ok(Self::Yaml)
        } else if ext.eq_ignore_ascii_case("json") {
            Ok(Self::Json)
        } else {
            Err(FileFormatError::UnsupportedFileExtension(
                path.to_path_buf(),
            ))
        }
    }

    pub fn serialize<T: Serialize>(self, value: &T) -> FileFormatResult<String> {
        Ok(match self {
            Self::Yaml => serde_yml::to_string(value)?,
            Self::Json => serde_json::to_string_pretty(value)?,
        })
    }

    pub fn deserialize<T: DeserializeOwned>(self, text: &str) -> FileFormatResult<T> {
        Ok(match self {
            Self::Yaml => serde_yml::from_str(text)?,
            Self::Json => serde_json::from_str(text)?,
        })
    }
}

/// Read and deserialize a value, picking the format from the file extension.
pub fn read_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> FileFormatResult<T> {
    let path = path.as_ref();
    let format = SerdeFormat::from_path(path)?;
    let text = std::fs::read_to_string(path).map_err(|source| FileFormatError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    format.deserialize(&text)
}

/// Serialize and write a value, picking the format from the file extension.
pub fn write_file<T: Serialize>(path: impl AsRef<Path>, value: &T) -> FileFormatResult<()> {
    let path = path.as_ref();
    let text = SerdeFormat::from_path(path)?.serialize(value)?;
    std::fs::write(path, text).map_err(|source| FileFormatError::Write {
        path: path.to_path_buf(),
        source,
    })
}
