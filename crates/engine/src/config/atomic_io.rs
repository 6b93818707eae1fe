use std::fs::{self, File};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::process;

/// Writes `text` next to `path`, syncs it, then renames it over `path`.
///
/// Readers see either the previous contents or the new ones, never a
/// truncated file. Missing parent directories are created.
pub fn write_text_atomic(path: &Path, text: &str) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let staging = staging_path(path);
    let written = File::create(&staging).and_then(|mut file| {
        file.write_all(text.as_bytes())?;
        file.sync_all()
    });
    let swapped = written.and_then(|()| swap_into_place(&staging, path));
    if swapped.is_err() {
        let _ = fs::remove_file(&staging);
    }
    swapped
}

fn swap_into_place(staging: &Path, target: &Path) -> io::Result<()> {
    match fs::rename(staging, target) {
        Ok(()) => Ok(()),
        // Some platforms refuse to rename over an existing file.
        Err(first) if target.exists() => {
            fs::remove_file(target).map_err(|_| first)?;
            fs::rename(staging, target)
        }
        Err(first) => Err(first),
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "populace".to_string());
    path.with_file_name(format!(".{name}.{}.partial", process::id()))
}
