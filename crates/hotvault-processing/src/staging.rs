//! Local staging area helpers.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use hotvault_core::AppError;

/// Reduce a client-supplied filename to its final path component.
pub fn sanitize_filename(filename: &str) -> Result<String, AppError> {
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if name.is_empty() || name == "." || name == ".." {
        return Err(AppError::InvalidInput(format!(
            "Invalid filename: {:?}",
            filename
        )));
    }
    Ok(name.to_string())
}

/// Write `data` to `dir/filename` and check the length on disk.
pub async fn write_staged_file(dir: &Path, filename: &str, data: &[u8]) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(filename);
    tokio::fs::write(&path, data).await?;

    let written = tokio::fs::metadata(&path).await?.len();
    if written != data.len() as u64 {
        return Err(std::io::Error::other(format!(
            "staged {} bytes but received {}",
            written,
            data.len()
        )));
    }
    Ok(path)
}

/// Remove a staging directory. A directory that is already gone counts as removed.
pub async fn remove_dir_if_exists(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
