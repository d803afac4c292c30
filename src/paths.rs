//! Cache-location and filename rules: the hidden cache directory next to the
//! watched root, the persisted document inside it, and preview naming.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::debug::dbg_log;

/// Hidden directory created inside the watched root.
pub const CACHE_DIR_NAME: &str = ".thumbnails";

/// Persisted filename→preview document inside the cache directory.
pub const STORE_FILE_NAME: &str = "thumbnails.json";

/// Source extensions the cache tracks. Matching is case-insensitive.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "dcm"];

/// Extension of the scan-image binary format that needs its own decoder.
pub const TDR_EXTENSION: &str = "dcm";

fn ext_lower(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// True for files on the fixed extension allow-list.
pub fn is_allowed(path: &Path) -> bool {
    ext_lower(path)
        .map(|e| IMAGE_EXTENSIONS.contains(&e.as_str()))
        .unwrap_or(false)
}

/// True for the scan-image binary format.
pub fn is_tdr(path: &Path) -> bool {
    ext_lower(path).map(|e| e == TDR_EXTENSION).unwrap_or(false)
}

/// Resolve (and create if absent) the cache directory for a watched root.
/// Idempotent: a second call performs no redundant creation. A creation
/// failure is fatal to the session — no cache dir means no persistence.
pub fn cache_dir_for(root: &Path) -> Result<PathBuf> {
    let dir = root.join(CACHE_DIR_NAME);
    if !dir.is_dir() {
        fs::create_dir_all(&dir)
            .with_context(|| format!("create cache dir {}", dir.display()))?;
        #[cfg(windows)]
        hide_dir(&dir);
        dbg_log!("paths: created cache dir {}", dir.display());
    }
    Ok(dir)
}

pub fn store_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join(STORE_FILE_NAME)
}

/// Deterministic preview filename for a source filename: the scan format
/// gets a `.png` substitution, everything else keeps its own name.
pub fn preview_name(source_name: &str) -> String {
    let path = Path::new(source_name);
    if is_tdr(path) {
        path.with_extension("png").to_string_lossy().into_owned()
    } else {
        source_name.to_string()
    }
}

#[cfg(windows)]
fn hide_dir(dir: &Path) {
    use std::os::windows::ffi::OsStrExt;
    use windows_sys::Win32::Storage::FileSystem::{SetFileAttributesW, FILE_ATTRIBUTE_HIDDEN};

    let wide: Vec<u16> = dir
        .as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();
    unsafe {
        SetFileAttributesW(wide.as_ptr(), FILE_ATTRIBUTE_HIDDEN);
    }
}
