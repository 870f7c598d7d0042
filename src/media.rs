//! Asset transformation collaborators.
//!
//! The transform stage hands each asset's source path to an
//! [`AssetTransformer`] and persists whatever processed copy it produces.
//! The bundled [`ImageTransformer`] re-encodes rasters, which also drops any
//! embedded metadata from the published copy.

use std::path::{Path, PathBuf};

use postforge_common::{Error, Result};

/// Produces the processed copy of an asset.
///
/// Implementations must be idempotent: transforming the same source into the
/// same output directory twice overwrites the previous copy.
pub trait AssetTransformer: Send + Sync {
    fn transform(&self, source: &Path, output_dir: &Path) -> Result<PathBuf>;
}

/// Default transformer: decode and re-encode the raster into the output
/// directory under the source file name.
#[derive(Debug, Default)]
pub struct ImageTransformer;

impl ImageTransformer {
    pub fn new() -> Self {
        Self
    }
}

impl AssetTransformer for ImageTransformer {
    fn transform(&self, source: &Path, output_dir: &Path) -> Result<PathBuf> {
        let file_name = source
            .file_name()
            .ok_or_else(|| Error::invalid_input(format!("asset has no file name: {source:?}")))?;
        let dest = output_dir.join(file_name);

        let img = image::open(source)
            .map_err(|e| Error::invalid_input(format!("cannot decode {source:?}: {e}")))?;
        img.save(&dest)
            .map_err(|e| Error::io(format!("cannot write {dest:?}: {e}")))?;

        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_reencodes_into_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("photo.png");
        image::RgbaImage::from_pixel(4, 4, image::Rgba([10, 20, 30, 255]))
            .save(&src)
            .unwrap();
        let out_dir = dir.path().join("processed");
        std::fs::create_dir_all(&out_dir).unwrap();

        let transformer = ImageTransformer::new();
        let dest = transformer.transform(&src, &out_dir).unwrap();
        assert_eq!(dest, out_dir.join("photo.png"));
        assert!(image::open(&dest).is_ok());

        // Idempotent: a second run overwrites the same copy.
        let again = transformer.transform(&src, &out_dir).unwrap();
        assert_eq!(again, dest);
    }

    #[test]
    fn test_transform_rejects_non_image() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("notes.jpg");
        std::fs::write(&src, b"this is not a raster").unwrap();

        let transformer = ImageTransformer::new();
        assert!(transformer.transform(&src, dir.path()).is_err());
    }
}
