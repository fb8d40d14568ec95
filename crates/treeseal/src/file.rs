//! Whole-file helpers: pick the store from the extension, run the engine,
//! write back atomically.

use std::path::Path;

use tokio_util::sync::CancellationToken;
use treeseal_core::{TreePath, TreesealError, TreesealResult, Value};
use treeseal_keys::KeySource;

use crate::engine::{DecryptOptions, Encrypted, Engine, Rewrapped};
use crate::metadata::METADATA_KEY;
use crate::store::store_for_path;

/// Atomically replace a file's contents.
///
/// Writes to a temp file in the same directory, then renames, so readers
/// never observe a partially written document. An existing file's
/// permissions carry over to the replacement.
pub async fn atomic_replace(path: &Path, new_content: &str) -> TreesealResult<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let tmp_path = parent.join(format!(
        ".{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy()
    ));

    tokio::fs::write(&tmp_path, new_content.as_bytes()).await?;
    let installed = match copy_permissions(path, &tmp_path).await {
        Ok(()) => tokio::fs::rename(&tmp_path, path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = installed {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e.into());
    }

    tracing::debug!(path = %path.display(), "file replaced");
    Ok(())
}

async fn copy_permissions(from: &Path, to: &Path) -> std::io::Result<()> {
    match tokio::fs::metadata(from).await {
        Ok(meta) => tokio::fs::set_permissions(to, meta.permissions()).await,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Encrypt a plaintext document in place.
pub async fn encrypt_file(
    engine: &Engine,
    path: &Path,
    key_sources: &[KeySource],
    cancel: &CancellationToken,
) -> TreesealResult<Encrypted> {
    let store = store_for_path(path)?;
    let text = tokio::fs::read_to_string(path).await?;
    let tree = store.parse_document(&text)?;
    if tree.contains_key(METADATA_KEY) {
        return Err(TreesealError::AlreadyEncrypted);
    }

    let encrypted = engine.encrypt(&tree, key_sources, cancel).await?;
    let output = store.dump_with_metadata(&encrypted.tree, &encrypted.metadata)?;
    atomic_replace(path, &output).await?;

    tracing::info!(path = %path.display(), "file encrypted");
    Ok(encrypted)
}

/// Decrypt a document and return its plaintext rendering. The file itself
/// is left untouched.
pub async fn decrypt_file(
    engine: &Engine,
    path: &Path,
    options: DecryptOptions,
    cancel: &CancellationToken,
) -> TreesealResult<String> {
    let store = store_for_path(path)?;
    let text = tokio::fs::read_to_string(path).await?;
    let metadata = store.load_metadata(&text)?;
    let tree = store.load(&text)?;

    let plaintext = engine.decrypt(&tree, &metadata, options, cancel).await?;
    store.dump(&plaintext)
}

/// Decrypt a document and return the value at `value_path`.
pub async fn extract_value(
    engine: &Engine,
    path: &Path,
    value_path: &TreePath,
    cancel: &CancellationToken,
) -> TreesealResult<Value> {
    let store = store_for_path(path)?;
    let text = tokio::fs::read_to_string(path).await?;
    let metadata = store.load_metadata(&text)?;
    let tree = store.load(&text)?;

    let plaintext = engine
        .decrypt(&tree, &metadata, DecryptOptions::default(), cancel)
        .await?;
    plaintext
        .get_path(value_path)
        .cloned()
        .ok_or_else(|| TreesealError::Parse(format!("no value at {value_path}")))
}

/// Re-encrypt a document in place under a fresh data key.
pub async fn rotate_file(
    engine: &Engine,
    path: &Path,
    cancel: &CancellationToken,
) -> TreesealResult<Encrypted> {
    let store = store_for_path(path)?;
    let text = tokio::fs::read_to_string(path).await?;
    let metadata = store.load_metadata(&text)?;
    let tree = store.load(&text)?;

    let rotated = engine.rotate(&tree, &metadata, cancel).await?;
    let output = store.dump_with_metadata(&rotated.tree, &rotated.metadata)?;
    atomic_replace(path, &output).await?;

    tracing::info!(path = %path.display(), "file data key rotated");
    Ok(rotated)
}

/// Replace a document's master keys in place, keeping its data key.
pub async fn update_file_keys(
    engine: &Engine,
    path: &Path,
    key_sources: &[KeySource],
    cancel: &CancellationToken,
) -> TreesealResult<Rewrapped> {
    let store = store_for_path(path)?;
    let text = tokio::fs::read_to_string(path).await?;
    let metadata = store.load_metadata(&text)?;
    let tree = store.load(&text)?;

    let rewrapped = engine
        .update_keys(&tree, &metadata, key_sources, cancel)
        .await?;
    let output = store.dump_with_metadata(&tree, &rewrapped.metadata)?;
    atomic_replace(path, &output).await?;

    tracing::info!(path = %path.display(), "file master keys updated");
    Ok(rewrapped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_atomic_replace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.yaml");
        tokio::fs::write(&path, "old: value\n").await.unwrap();

        atomic_replace(&path, "new: value\n").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new: value\n");
        assert!(!dir.path().join(".secrets.yaml.tmp").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_atomic_replace_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.yaml");
        tokio::fs::write(&path, "old: value\n").await.unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();

        atomic_replace(&path, "new: value\n").await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new: value\n");
    }

    #[tokio::test]
    async fn test_atomic_replace_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.json");

        atomic_replace(&path, "{}\n").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}\n");
    }

    #[tokio::test]
    async fn test_atomic_replace_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("secrets.yaml");
        assert!(matches!(
            atomic_replace(&path, "x").await,
            Err(TreesealError::Io(_))
        ));
    }
}
