use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use tracing::warn;

/// Longest edge, in pixels, of a reference image sent to a provider.
pub const MAX_REFERENCE_EDGE: u32 = 1024;

/// A reference image decoded, flattened to RGB, bounded to
/// [`MAX_REFERENCE_EDGE`] and re-encoded as PNG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedImage {
    pub source: PathBuf,
    pub png_bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

pub fn prepare_reference_image(path: &Path) -> Result<PreparedImage> {
    let decoded = image::open(path)
        .with_context(|| format!("failed to decode reference image {}", path.display()))?;
    let rgb = DynamicImage::ImageRgb8(decoded.to_rgb8());

    let bounded = if rgb.width().max(rgb.height()) > MAX_REFERENCE_EDGE {
        rgb.resize(MAX_REFERENCE_EDGE, MAX_REFERENCE_EDGE, FilterType::Lanczos3)
    } else {
        rgb
    };

    let mut png_bytes = Vec::new();
    bounded
        .write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)
        .with_context(|| format!("failed to encode {} as PNG", path.display()))?;

    Ok(PreparedImage {
        source: path.to_path_buf(),
        png_bytes,
        width: bounded.width(),
        height: bounded.height(),
    })
}

/// Prepares every reference in order, skipping the ones that fail to load.
/// Errors only when references were given and none of them loaded.
pub fn prepare_reference_images(paths: &[PathBuf]) -> Result<Vec<PreparedImage>> {
    let mut prepared = Vec::with_capacity(paths.len());
    for path in paths {
        match prepare_reference_image(path) {
            Ok(image) => prepared.push(image),
            Err(err) => warn!(path = %path.display(), error = %format!("{err:#}"), "skipping reference image"),
        }
    }
    if prepared.is_empty() && !paths.is_empty() {
        bail!("none of the {} reference images could be loaded", paths.len());
    }
    Ok(prepared)
}

#[cfg(test)]
mod tests {
    use image::{Rgba, RgbaImage};

    use super::{prepare_reference_image, prepare_reference_images, MAX_REFERENCE_EDGE};

    #[test]
    fn large_images_are_bounded_and_flattened() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("wide.png");
        RgbaImage::from_pixel(2048, 512, Rgba([10, 20, 30, 128])).save(&path)?;

        let prepared = prepare_reference_image(&path)?;
        assert_eq!(prepared.width, MAX_REFERENCE_EDGE);
        assert_eq!(prepared.height, 256);

        let reloaded = image::load_from_memory(&prepared.png_bytes)?;
        assert_eq!(reloaded.color(), image::ColorType::Rgb8);
        assert_eq!(reloaded.width(), MAX_REFERENCE_EDGE);
        Ok(())
    }

    #[test]
    fn small_images_keep_their_size() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("small.png");
        RgbaImage::from_pixel(300, 200, Rgba([0, 0, 0, 255])).save(&path)?;

        let prepared = prepare_reference_image(&path)?;
        assert_eq!((prepared.width, prepared.height), (300, 200));
        assert_eq!(prepared.source, path);
        Ok(())
    }

    #[test]
    fn unreadable_references_are_skipped() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let good = temp.path().join("good.png");
        RgbaImage::from_pixel(8, 8, Rgba([1, 2, 3, 255])).save(&good)?;
        let bad = temp.path().join("bad.png");
        std::fs::write(&bad, b"not an image")?;

        let prepared = prepare_reference_images(&[bad.clone(), good.clone()])?;
        assert_eq!(prepared.len(), 1);
        assert_eq!(prepared[0].source, good);

        assert!(prepare_reference_images(&[bad]).is_err());
        assert!(prepare_reference_images(&[])?.is_empty());
        Ok(())
    }
}
