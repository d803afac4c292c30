//! Thumbnail generation: decode a source file (raster formats directly,
//! the scan format through its own reader), downsample to a fixed preview
//! width and write the preview into the cache directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, RgbaImage};

use crate::debug::dbg_log;
use crate::paths;
use crate::tdr;

/// Fixed preview width; height follows the source aspect ratio.
pub const PREVIEW_WIDTH: u32 = 256;

/// Decode, downsample and write the preview for one source file.
/// Returns the absolute path of the written preview.
pub fn generate(source: &Path, cache_dir: &Path, width: u32) -> Result<PathBuf> {
    let img = decode(source)?;
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        bail!("{}: empty image", source.display());
    }

    let target_h = ((h as u64 * width as u64) / w as u64).max(1) as u32;
    // Triangle is a fast single-pass filter, plenty for preview quality.
    let preview = img.resize_exact(width, target_h, FilterType::Triangle);

    let name = source
        .file_name()
        .and_then(|n| n.to_str())
        .context("source has no filename")?;
    let out = cache_dir.join(paths::preview_name(name));
    preview
        .save(&out)
        .with_context(|| format!("write preview {}", out.display()))?;
    dbg_log!("thumb: {} -> {} ({}x{})", name, out.display(), width, target_h);
    Ok(out)
}

fn decode(source: &Path) -> Result<DynamicImage> {
    if paths::is_tdr(source) {
        let bytes =
            fs::read(source).with_context(|| format!("read {}", source.display()))?;
        let frame =
            tdr::decode(&bytes).with_context(|| format!("decode {}", source.display()))?;
        let buf = RgbaImage::from_raw(frame.width, frame.height, frame.rgba)
            .context("pixel buffer does not match declared dimensions")?;
        Ok(DynamicImage::ImageRgba8(buf))
    } else {
        image::open(source).with_context(|| format!("decode {}", source.display()))
    }
}
