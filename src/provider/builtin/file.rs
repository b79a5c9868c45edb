//! `file:index:File`: a file on the local filesystem.
//!
//! Inputs are `path` (required) and `content`. Changing `path` recreates the
//! file; changing `content` rewrites it in place. Outputs are `path` and the
//! hex `sha256` of the content.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{CreateResponse, DiffChanges, Provider, ReadResponse};
use crate::resource::{PropertyMap, PropertyValue, Urn, diff_keys};

/// Provider for local files.
#[derive(Debug, Clone, Default)]
pub struct FileProvider;

impl FileProvider {
    /// Creates the provider.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn path(inputs: &PropertyMap) -> ProviderResult<&str> {
        inputs
            .get("path")
            .and_then(PropertyValue::as_str)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ProviderError::terminal("missing required input 'path'"))
    }

    fn content(inputs: &PropertyMap) -> &str {
        inputs
            .get("content")
            .and_then(PropertyValue::as_str)
            .unwrap_or_default()
    }

    fn outputs(path: &str, content: &[u8]) -> PropertyMap {
        let mut outputs = PropertyMap::new();
        outputs.insert("path".into(), path.into());
        outputs.insert("sha256".into(), hex::encode(Sha256::digest(content)).into());
        outputs
    }

    async fn write(path: &str, content: &str) -> ProviderResult<()> {
        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ProviderError::from_io("failed to create directory", &e))?;
        }
        fs::write(path, content)
            .await
            .map_err(|e| ProviderError::from_io("failed to write file", &e))
    }
}

#[async_trait]
impl Provider for FileProvider {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn diff(
        &self,
        _urn: &Urn,
        _id: &str,
        old: &PropertyMap,
        new: &PropertyMap,
    ) -> ProviderResult<DiffChanges> {
        let keys = diff_keys(old, new);
        if keys.is_empty() {
            Ok(DiffChanges::None)
        } else if keys.iter().any(|k| k == "path") {
            Ok(DiffChanges::Replace {
                keys: vec!["path".into()],
            })
        } else {
            Ok(DiffChanges::Update { keys })
        }
    }

    async fn create(&self, _urn: &Urn, inputs: &PropertyMap) -> ProviderResult<CreateResponse> {
        let path = Self::path(inputs)?;
        let content = Self::content(inputs);
        Self::write(path, content).await?;

        Ok(CreateResponse {
            id: path.to_string(),
            outputs: Self::outputs(path, content.as_bytes()),
        })
    }

    async fn read(&self, _urn: &Urn, id: &str, _inputs: &PropertyMap) -> ProviderResult<ReadResponse> {
        let content = fs::read(id).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => ProviderError::NotFound { id: id.to_string() },
            _ => ProviderError::from_io("failed to read file", &e),
        })?;

        Ok(ReadResponse {
            id: id.to_string(),
            outputs: Self::outputs(id, &content),
        })
    }

    async fn update(
        &self,
        _urn: &Urn,
        id: &str,
        _old: &PropertyMap,
        new: &PropertyMap,
    ) -> ProviderResult<PropertyMap> {
        let content = Self::content(new);
        Self::write(id, content).await?;
        Ok(Self::outputs(id, content.as_bytes()))
    }

    async fn delete(&self, _urn: &Urn, id: &str, _inputs: &PropertyMap) -> ProviderResult<()> {
        fs::remove_file(id).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => ProviderError::NotFound { id: id.to_string() },
            _ => ProviderError::from_io("failed to remove file", &e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn urn() -> Urn {
        Urn::new("dev", "test", None, "file:index:File", "readme")
    }

    fn inputs(path: &Path, content: &str) -> PropertyMap {
        let mut map = PropertyMap::new();
        map.insert("path".into(), path.to_string_lossy().to_string().into());
        map.insert("content".into(), content.into());
        map
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/readme.txt");
        let provider = FileProvider::new();

        let created = provider.create(&urn(), &inputs(&path, "v1")).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "v1");
        let first_hash = created.outputs["sha256"].clone();

        let outputs = provider
            .update(&urn(), &created.id, &inputs(&path, "v1"), &inputs(&path, "v2"))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "v2");
        assert_ne!(outputs["sha256"], first_hash);

        let read = provider.read(&urn(), &created.id, &PropertyMap::new()).await.unwrap();
        assert_eq!(read.outputs["sha256"], outputs["sha256"]);

        provider.delete(&urn(), &created.id, &PropertyMap::new()).await.unwrap();
        assert!(!path.exists());

        let err = provider
            .delete(&urn(), &created.id, &PropertyMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_diff() {
        let provider = FileProvider::new();
        let a = inputs(Path::new("/tmp/a"), "x");

        let moved = inputs(Path::new("/tmp/b"), "y");
        let diff = provider.diff(&urn(), "/tmp/a", &a, &moved).await.unwrap();
        assert_eq!(diff, DiffChanges::Replace { keys: vec!["path".into()] });

        let edited = inputs(Path::new("/tmp/a"), "y");
        let diff = provider.diff(&urn(), "/tmp/a", &a, &edited).await.unwrap();
        assert_eq!(diff, DiffChanges::Update { keys: vec!["content".into()] });
    }

    #[tokio::test]
    async fn test_missing_path_is_terminal() {
        let err = FileProvider::new()
            .create(&urn(), &PropertyMap::new())
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }
}
