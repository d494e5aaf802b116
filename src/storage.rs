use std::path::{Path, PathBuf};

use rocket::fs::TempFile;
use rocket::tokio::fs;
use rocket::tokio::io::AsyncReadExt;
use tracing::{info, instrument};

use crate::auth::random_hex;
use crate::error::AppError;

/// Where an uploaded file belongs. Each kind has its own directory under the
/// upload root and its own file name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    PlayerPhoto,
    Drill,
}

impl UploadKind {
    pub fn dir_name(&self) -> &'static str {
        match self {
            UploadKind::PlayerPhoto => "players",
            UploadKind::Drill => "drills",
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            UploadKind::PlayerPhoto => "p_",
            UploadKind::Drill => "drill_",
        }
    }

    fn default_extension(&self) -> &'static str {
        match self {
            UploadKind::PlayerPhoto => "jpg",
            UploadKind::Drill => "bin",
        }
    }
}

/// A file that has been written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub filename: String,
    pub public_path: String,
}

/// Local file store for photos and drill assets, served under `/static`.
#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn ensure_dirs(&self) -> Result<(), AppError> {
        for kind in [UploadKind::PlayerPhoto, UploadKind::Drill] {
            fs::create_dir_all(self.root.join(kind.dir_name())).await?;
        }
        Ok(())
    }

    #[instrument(skip(self, file))]
    pub async fn save(&self, kind: UploadKind, file: &mut TempFile<'_>) -> Result<StoredFile, AppError> {
        if file.len() == 0 {
            return Err(AppError::Validation("Uploaded file is empty".to_string()));
        }

        let extension = file
            .content_type()
            .and_then(|ct| ct.extension())
            .map(|ext| ext.as_str().to_ascii_lowercase())
            .unwrap_or_else(|| kind.default_extension().to_string());

        let filename = format!("{}{}.{}", kind.prefix(), random_hex(16), extension);
        let dir = self.root.join(kind.dir_name());
        fs::create_dir_all(&dir).await?;

        file.move_copy_to(dir.join(&filename)).await?;
        info!(filename = %filename, kind = kind.dir_name(), "Stored upload");

        Ok(StoredFile {
            public_path: format!("/static/{}/{}", kind.dir_name(), filename),
            filename,
        })
    }

    /// Resolves a path relative to the store root. `relative` comes from a
    /// Rocket path segment guard, which already rejects `..` and hidden files.
    pub fn resolve(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }
}

/// Reads a small uploaded text file, such as an import CSV, into memory.
pub async fn read_upload_to_string(file: &TempFile<'_>) -> Result<String, AppError> {
    let reader = file.open().await?;
    rocket::tokio::pin!(reader);
    let mut contents = String::new();
    reader.read_to_string(&mut contents).await.map_err(|e| {
        AppError::Validation(format!("Upload is not valid UTF-8 text: {}", e))
    })?;
    Ok(contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_directories() {
        assert_eq!(UploadKind::PlayerPhoto.dir_name(), "players");
        assert_eq!(UploadKind::Drill.dir_name(), "drills");
    }

    #[rocket::async_test]
    async fn ensure_dirs_creates_both_directories() {
        let root = std::env::temp_dir().join(format!("swing-tracker-store-{}", random_hex(8)));
        let store = UploadStore::new(&root);

        store.ensure_dirs().await.expect("Failed to create upload dirs");

        assert!(root.join("players").is_dir());
        assert!(root.join("drills").is_dir());

        let _ = std::fs::remove_dir_all(&root);
    }
}
