//! Serialization format selection by file extension.

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

#[derive(Debug, thiserror::Error)]
pub enum FileExtensionError {
    #[error("Failed to get file extension for {0}")]
    MissingFileExtension(String),
    #[error("Unsupported file extension for file: {0}")]
    UnsupportedFileExtension(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SerdeFormatError {
    #[error("YAML serialization failed")]
    Yaml(#[from] serde_yml::Error),
    #[error("JSON serialization failed")]
    Json(#[from] serde_json::Error),
}

pub type SerdeFormatResult<T> = Result<T, SerdeFormatError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileFormat {
    Yaml,
    Json,
}

impl FileFormat {
    pub fn from_path(path: &Path) -> Result<Self, FileExtensionError> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| FileExtensionError::MissingFileExtension(path.display().to_string()))?;

        if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") {
            Ok(Self::Yaml)
        } else if ext.eq_ignore_ascii_case("json") {
            Ok(Self::Json)
        } else {
            Err(FileExtensionError::UnsupportedFileExtension(
                path.display().to_string(),
            ))
        }
    }

    pub fn serialize<T: Serialize>(self, value: &T) -> SerdeFormatResult<String> {
        let text = match self {
            FileFormat::Yaml => serde_yml::to_string(value)?,
            FileFormat::Json => serde_json::to_string_pretty(value)?,
        };
        // Keep files stable across platforms.
        Ok(text.replace("\r\n", "\n"))
    }

    pub fn deserialize<T: DeserializeOwned + 'static>(self, text: &str) -> SerdeFormatResult<T> {
        match self {
            FileFormat::Yaml => Ok(serde_yml::from_str(text)?),
            FileFormat::Json => Ok(serde_json::from_str(text)?),
        }
    }
}

/// Reads and deserializes `path`, picking the format from its extension.
pub fn load_file<T: DeserializeOwned + 'static>(path: &Path) -> anyhow::Result<T> {
    let format = FileFormat::from_path(path)?;
    let text = std::fs::read_to_string(path)?;
    Ok(format.deserialize(&text)?)
}

/// Serializes `value` into `path`, picking the format from its extension.
pub fn save_file<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let format = FileFormat::from_path(path)?;
    let text = format.serialize(value)?;
    std::fs::write(path, text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        values: Vec<f64>,
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(
            FileFormat::from_path(Path::new("a/b.yaml")).unwrap(),
            FileFormat::Yaml
        );
        assert_eq!(
            FileFormat::from_path(Path::new("b.YML")).unwrap(),
            FileFormat::Yaml
        );
        assert_eq!(
            FileFormat::from_path(Path::new("b.json")).unwrap(),
            FileFormat::Json
        );
        assert!(matches!(
            FileFormat::from_path(Path::new("b.toml")),
            Err(FileExtensionError::UnsupportedFileExtension(_))
        ));
        assert!(matches!(
            FileFormat::from_path(Path::new("noext")),
            Err(FileExtensionError::MissingFileExtension(_))
        ));
    }

    #[test]
    fn save_and_load_both_formats() {
        let dir = tempfile::tempdir().unwrap();
        let sample = Sample {
            name: "beads".to_string(),
            values: vec![1.0, 2.5],
        };

        for file_name in ["sample.yaml", "sample.json"] {
            let path = dir.path().join(file_name);
            save_file(&path, &sample).unwrap();
            let loaded: Sample = load_file(&path).unwrap();
            assert_eq!(loaded, sample);
        }
    }
}
