//! Reads pipeline inputs from the local filesystem.

use crate::calligraph::models::MAX_BYTES;
use crate::calligraph::validate::ImageFile;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),
}

impl LoadError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        LoadError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub async fn load_manifest(path: &Path) -> Result<Vec<u8>, LoadError> {
    fs::read(path).await.map_err(|err| LoadError::io(path, err))
}

/// Lists regular files directly inside `dir`, sorted by name. Hidden files are
/// ignored. Files above the size limit are not read; they keep their length
/// so validation can reject them.
pub async fn load_image_dir(dir: &Path) -> Result<Vec<ImageFile>, LoadError> {
    let meta = fs::metadata(dir).await.map_err(|err| LoadError::io(dir, err))?;
    if !meta.is_dir() {
        return Err(LoadError::NotADirectory(dir.to_path_buf()));
    }

    let mut entries = fs::read_dir(dir).await.map_err(|err| LoadError::io(dir, err))?;
    let mut found: Vec<(String, PathBuf, u64)> = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| LoadError::io(dir, err))?
    {
        let path = entry.path();
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            debug!(target = "calligraph.loader", path = %path.display(), "skip_non_utf8_name");
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        let meta = entry.metadata().await.map_err(|err| LoadError::io(&path, err))?;
        if meta.is_file() {
            found.push((name, path, meta.len()));
        }
    }
    found.sort_by(|a, b| a.0.cmp(&b.0));

    let mut files = Vec::with_capacity(found.len());
    for (name, path, len) in found {
        if len > MAX_BYTES {
            files.push(ImageFile {
                filename: name,
                declared_mime: None,
                byte_length: len,
                bytes: Bytes::new(),
            });
            continue;
        }
        let bytes = fs::read(&path).await.map_err(|err| LoadError::io(&path, err))?;
        files.push(ImageFile::new(name, bytes));
    }
    Ok(files)
}
