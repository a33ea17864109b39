//! `/sendfile`: the local file boundary.
//!
//! A request is only turned into bytes after the path has been resolved
//! under the configured root, is a regular file reached without a symlink
//! in the last component, and fits the size limit. Anything else is a
//! [`ValidationError`] and no remote call is made.

use crate::config::UploadConfig;
use crate::error::ValidationError;
use crate::identity::RemoteId;
use crate::irc::SessionId;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Where an upload goes. Users still need their direct conversation opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadTarget {
    Channel(RemoteId),
    User(RemoteId),
}

/// A `/sendfile` request between parsing and completion.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpload {
    pub id: Uuid,
    pub session: SessionId,
    /// The target as the client typed it, for the completion notice.
    pub target_name: String,
    pub target: UploadTarget,
    pub path: String,
}

impl PendingUpload {
    pub fn new(session: SessionId, target_name: &str, target: UploadTarget, path: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            session,
            target_name: target_name.to_string(),
            target,
            path: path.to_string(),
        }
    }
}

/// A validated file, ready to send.
#[derive(Debug)]
pub struct LoadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

fn unreadable(path: &Path, e: std::io::Error) -> ValidationError {
    ValidationError::Unreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

/// Validate `requested` against `config` and read it.
///
/// Relative paths are taken relative to the root.
pub async fn load(config: &UploadConfig, requested: &str) -> Result<LoadedFile, ValidationError> {
    let root = config.root.as_deref().ok_or(ValidationError::Disabled)?;
    let root = tokio::fs::canonicalize(root)
        .await
        .map_err(|e| unreadable(root, e))?;

    let path = {
        let p = PathBuf::from(requested.trim());
        if p.is_absolute() { p } else { root.join(p) }
    };

    let link_meta = tokio::fs::symlink_metadata(&path)
        .await
        .map_err(|e| unreadable(&path, e))?;
    if link_meta.file_type().is_symlink() {
        return Err(ValidationError::Symlink(path));
    }

    let resolved = tokio::fs::canonicalize(&path)
        .await
        .map_err(|e| unreadable(&path, e))?;
    if !resolved.starts_with(&root) {
        return Err(ValidationError::OutsideRoot(path));
    }
    if !link_meta.is_file() {
        return Err(ValidationError::NotAFile(path));
    }
    if link_meta.len() > config.max_bytes {
        return Err(ValidationError::TooLarge {
            size: link_meta.len(),
            max: config.max_bytes,
        });
    }

    let bytes = tokio::fs::read(&resolved)
        .await
        .map_err(|e| unreadable(&resolved, e))?;
    // The file may have grown since the stat.
    if bytes.len() as u64 > config.max_bytes {
        return Err(ValidationError::TooLarge {
            size: bytes.len() as u64,
            max: config.max_bytes,
        });
    }

    let filename = resolved
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    Ok(LoadedFile { filename, bytes })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(root: &Path, max_bytes: u64) -> UploadConfig {
        UploadConfig {
            root: Some(root.to_path_buf()),
            max_bytes,
        }
    }

    #[tokio::test]
    async fn reads_a_file_under_the_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
        let loaded = load(&config(dir.path(), 100), "notes.txt").await.unwrap();
        assert_eq!(loaded.filename, "notes.txt");
        assert_eq!(loaded.bytes, b"hello");
    }

    #[tokio::test]
    async fn disabled_without_root() {
        let err = load(&UploadConfig::default(), "/etc/passwd").await.unwrap_err();
        assert_eq!(err, ValidationError::Disabled);
    }

    #[tokio::test]
    async fn traversal_is_refused() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("share");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(outer.path().join("secret"), b"x").unwrap();
        let err = load(&config(&root, 100), "../secret").await.unwrap_err();
        assert!(matches!(err, ValidationError::OutsideRoot(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinks_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("real"), b"x").unwrap();
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("link")).unwrap();
        let err = load(&config(dir.path(), 100), "link").await.unwrap_err();
        assert!(matches!(err, ValidationError::Symlink(_)));
    }

    #[tokio::test]
    async fn size_and_kind_limits() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big"), vec![0u8; 64]).unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let cfg = config(dir.path(), 16);
        assert_eq!(
            load(&cfg, "big").await.unwrap_err(),
            ValidationError::TooLarge { size: 64, max: 16 }
        );
        assert!(matches!(load(&cfg, "sub").await.unwrap_err(), ValidationError::NotAFile(_)));
        assert!(matches!(
            load(&cfg, "missing").await.unwrap_err(),
            ValidationError::Unreadable { .. }
        ));
    }
}
