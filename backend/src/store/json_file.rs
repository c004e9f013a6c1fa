//! JSON file persistence shared by the file-backed stores.
//!
//! Files live in a state directory (default `.brainarr/`), are pretty-printed
//! and replaced atomically: the new content is written to a sibling temp file
//! and renamed over the old one.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::error::StoreResult;

/// Directory where state is stored (relative to current dir)
pub const DEFAULT_STATE_DIR: &str = ".brainarr";

/// Read `path`, or `T::default()` when it does not exist yet.
pub async fn load_or_default<T>(path: &Path) -> StoreResult<T>
where
    T: DeserializeOwned + Default,
{
    match tokio::fs::read_to_string(path).await {
        Ok(content) if content.trim().is_empty() => Ok(T::default()),
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

/// Write `value` to `path`, creating the parent directory if needed.
pub async fn save_atomic<T>(path: &Path, value: &T) -> StoreResult<()>
where
    T: Serialize + ?Sized,
{
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let content = serde_json::to_string_pretty(value)?;
    let tmp = temp_path(path);
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_file_loads_default() {
        let dir = tempdir().unwrap();
        let value: Vec<String> = load_or_default(&dir.path().join("nope.json")).await.unwrap();
        assert!(value.is_empty());
    }

    #[tokio::test]
    async fn test_save_creates_directory_and_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        save_atomic(&path, &vec!["a".to_string()]).await.unwrap();

        let loaded: Vec<String> = load_or_default(&path).await.unwrap();
        assert_eq!(loaded, vec!["a".to_string()]);
        assert!(!temp_path(&path).exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();
        let result: StoreResult<Vec<String>> = load_or_default(&path).await;
        assert!(result.is_err());
    }
}
