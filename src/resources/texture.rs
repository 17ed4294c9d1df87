//! Texture loading

use crate::backend::{BackendError, BackendResult};
use image::{DynamicImage, GenericImageView};
use std::path::{Path, PathBuf};

/// Number of faces in a cubemap, ordered +X, -X, +Y, -Y, +Z, -Z
pub const CUBEMAP_FACES: usize = 6;

/// Decoded RGBA8 image
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub name: String,
}

impl TextureData {
    /// Load texture from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> BackendResult<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let img = image::open(path).map_err(|e| {
            BackendError::TextureCreationFailed(format!("{}: {}", path.display(), e))
        })?;
        Ok(Self::from_image(img, &name))
    }

    fn from_image(img: DynamicImage, name: &str) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            data: img.to_rgba8().into_raw(),
            name: name.to_string(),
        }
    }
}

/// Six square faces of equal size, ready for upload into one cubemap texture
pub struct CubemapData {
    pub size: u32,
    pub faces: Vec<TextureData>,
}

impl CubemapData {
    /// Decode all six faces; any missing, unreadable or mismatched face fails the whole cubemap
    pub fn load(paths: &[PathBuf]) -> BackendResult<Self> {
        if paths.len() != CUBEMAP_FACES {
            return Err(BackendError::TextureCreationFailed(format!(
                "cubemap needs {} faces, got {}",
                CUBEMAP_FACES,
                paths.len()
            )));
        }

        let faces = paths
            .iter()
            .map(TextureData::from_file)
            .collect::<BackendResult<Vec<_>>>()?;

        let size = faces[0].width;
        for face in &faces {
            if face.width != size || face.height != size {
                return Err(BackendError::TextureCreationFailed(format!(
                    "cubemap face {} is {}x{}, expected {}x{}",
                    face.name, face.width, face.height, size, size
                )));
            }
        }

        Ok(Self { size, faces })
    }

    /// Bytes of a single RGBA8 face
    pub fn face_bytes(&self) -> usize {
        (self.size * self.size * 4) as usize
    }

    /// All faces packed back to back, in layer order
    pub fn packed(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.face_bytes() * CUBEMAP_FACES);
        for face in &self.faces {
            out.extend_from_slice(&face.data);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_faces(dir: &Path, size: u32) -> Vec<PathBuf> {
        (0..CUBEMAP_FACES)
            .map(|i| {
                let path = dir.join(format!("face{i}.png"));
                image::RgbaImage::from_pixel(size, size, image::Rgba([i as u8, 0, 0, 255]))
                    .save(&path)
                    .unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn loads_six_faces() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_faces(dir.path(), 4);
        let cubemap = CubemapData::load(&paths).unwrap();
        assert_eq!(cubemap.size, 4);
        assert_eq!(cubemap.packed().len(), 4 * 4 * 4 * 6);
        // Layer order is preserved
        assert_eq!(cubemap.packed()[cubemap.face_bytes() * 5], 5);
    }

    #[test]
    fn missing_face_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = write_faces(dir.path(), 4);
        paths[3] = dir.path().join("missing.png");
        assert!(CubemapData::load(&paths).is_err());
    }

    #[test]
    fn mismatched_face_size_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = write_faces(dir.path(), 4);
        let odd = dir.path().join("odd.png");
        image::RgbaImage::new(8, 8).save(&odd).unwrap();
        paths[0] = odd;
        assert!(CubemapData::load(&paths).is_err());
    }

    #[test]
    fn wrong_face_count_fails() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_faces(dir.path(), 2);
        assert!(CubemapData::load(&paths[..5]).is_err());
    }
}
