//! Model image storage.
//!
//! Images are a post-commit effect: they are assigned after a new model is
//! committed and removed after a model deletion is committed. Callers log
//! image failures instead of failing the run.

use crate::error::{FleetError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Storage for the picture shown for a device model.
#[async_trait]
pub trait ModelImageStore: Send + Sync {
    /// Give a freshly created model the default image.
    async fn assign_default_image(&self, model_id: &str) -> Result<()>;

    /// Remove every image of a model. Missing images are not an error.
    async fn delete_images(&self, model_id: &str) -> Result<()>;
}

/// Images stored as `<root>/<model_id>.<ext>`.
#[derive(Debug, Clone)]
pub struct FsImageStore {
    root: PathBuf,
    default_image: Option<PathBuf>,
}

impl FsImageStore {
    pub fn new(root: impl Into<PathBuf>, default_image: Option<PathBuf>) -> Self {
        Self {
            root: root.into(),
            default_image,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Paths of the images currently stored for a model.
    pub async fn images_of(&self, model_id: &str) -> Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(FleetError::io_with_path(e, &self.root)),
        };

        let mut images = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FleetError::io_with_path(e, &self.root))?
        {
            let path = entry.path();
            if path.file_stem().and_then(|s| s.to_str()) == Some(model_id) {
                images.push(path);
            }
        }
        images.sort();
        Ok(images)
    }
}

#[async_trait]
impl ModelImageStore for FsImageStore {
    async fn assign_default_image(&self, model_id: &str) -> Result<()> {
        let Some(default_image) = &self.default_image else {
            debug!("No default image configured, leaving {} without image", model_id);
            return Ok(());
        };

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| FleetError::io_with_path(e, &self.root))?;

        let target = match default_image.extension() {
            Some(ext) => self.root.join(format!("{}.{}", model_id, ext.to_string_lossy())),
            None => self.root.join(model_id),
        };
        tokio::fs::copy(default_image, &target)
            .await
            .map_err(|e| FleetError::io_with_path(e, default_image))?;

        info!("Assigned default image to model {}", model_id);
        Ok(())
    }

    async fn delete_images(&self, model_id: &str) -> Result<()> {
        for path in self.images_of(model_id).await? {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("Removed image {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(FleetError::io_with_path(e, path)),
            }
        }
        Ok(())
    }
}
