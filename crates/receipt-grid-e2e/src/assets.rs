//! Upload inputs
//!
//! The OCR route is mocked, so the uploaded bytes never matter. A small
//! receipt-looking PNG is generated when none is checked in.

use image::{Rgb, RgbImage};
use std::path::Path;
use tracing::info;

use crate::error::E2eResult;

const WIDTH: u32 = 240;
const HEIGHT: u32 = 360;

/// Write the dummy receipt if `path` does not exist. Returns whether a file
/// was created.
pub fn ensure_dummy_receipt(path: &Path) -> E2eResult<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut img = RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([255, 255, 255]));

    // Ruled "text" lines of varying length, one per receipt row
    for (row, len) in [180u32, 120, 150, 90, 200, 60, 140].iter().enumerate() {
        let y = 40 + row as u32 * 36;
        for dy in 0..6 {
            for x in 20..20 + len {
                img.put_pixel(x, y + dy, Rgb([90, 90, 90]));
            }
        }
    }

    img.save(path)?;
    info!("Generated dummy receipt at {}", path.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    #[test]
    fn test_creates_png_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("verification/dummy_receipt.png");

        assert!(ensure_dummy_receipt(&path).unwrap());
        let img = image::open(&path).unwrap();
        assert_eq!((img.width(), img.height()), (WIDTH, HEIGHT));

        assert!(!ensure_dummy_receipt(&path).unwrap());
    }

    #[test]
    fn test_existing_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("receipt.png");
        std::fs::write(&path, b"not really a png").unwrap();

        assert!(!ensure_dummy_receipt(&path).unwrap());
        assert_eq!(std::fs::read(&path).unwrap(), b"not really a png");
    }
}
