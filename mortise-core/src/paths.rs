//! Filesystem helpers: library enumeration and well-known directories.

use std::io;
use std::path::{Path, PathBuf};

/// Platform shared-library extension, without the dot.
pub fn library_extension() -> &'static str {
    if cfg!(target_os = "windows") {
        "dll"
    } else if cfg!(target_os = "macos") {
        "dylib"
    } else {
        "so"
    }
}

/// Outcome of a directory scan.
///
/// Enumeration keeps going past unreadable entries, so a failed scan can
/// still carry the files it managed to collect; discovery proceeds with
/// those and only gives up when nothing was found at all.
pub struct Listing {
    pub paths: Vec<PathBuf>,
    pub error: Option<io::Error>,
}

/// Enumerate shared libraries under `dir`, optionally recursing into
/// subdirectories.
pub fn list_libraries(dir: &Path, recursive: bool) -> Listing {
    let mut listing = Listing {
        paths: Vec::new(),
        error: None,
    };
    walk(dir, recursive, &mut listing);
    listing.paths.sort();
    listing
}

fn walk(dir: &Path, recursive: bool, listing: &mut Listing) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            listing.error = Some(e);
            return;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                listing.error = Some(e);
                continue;
            }
        };
        let path = entry.path();
        if path.is_dir() {
            if recursive {
                walk(&path, true, listing);
            }
        } else if path
            .extension()
            .is_some_and(|ext| ext == library_extension())
        {
            listing.paths.push(path);
        }
    }
}

/// Directory of the host executable, when it can be determined.
pub fn app_directory() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    exe.parent().map(Path::to_path_buf)
}

/// Default plugin directory: `$XDG_CONFIG_HOME/mortise/plugins`, falling
/// back to `~/.config/mortise/plugins`.
pub fn default_plugin_dir() -> PathBuf {
    let base = if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config)
    } else if let Some(home) = dirs::home_dir() {
        home.join(".config")
    } else {
        PathBuf::from(".config")
    };
    base.join("mortise").join("plugins")
}
