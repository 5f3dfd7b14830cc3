//! Atomic file writes for the JSON-backed stores.

use std::io;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use ulid::Ulid;

/// Write `content` so readers see either the old file or the new one:
/// temp file in the same directory, fsync, rename over `path`.
pub(crate) async fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(parent).await?;

    let temp_path = temp_path_for(parent, path);
    let result = write_and_rename(&temp_path, path, content).await;
    if result.is_err() {
        // 失敗時は一時ファイルを残さない
        let _ = tokio::fs::remove_file(&temp_path).await;
    }
    result
}

fn temp_path_for(parent: &Path, path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or("state.json");
    parent.join(format!(".{}.{}.tmp", file_name, Ulid::new()))
}

async fn write_and_rename(temp_path: &Path, path: &Path, content: &[u8]) -> io::Result<()> {
    let mut file = tokio::fs::File::create(temp_path).await?;
    file.write_all(content).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(temp_path, path).await
}

/// Read a file, treating "does not exist" as `None`.
pub(crate) async fn read_if_exists(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
