use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rand::Rng;
use walkdir::WalkDir;

pub fn exists_or_create_dir(path: &Path) -> Result<PathBuf, io::Error> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    Ok(path.to_path_buf())
}

/// Directory holding the running executable.
pub fn install_dir() -> Result<PathBuf, io::Error> {
    let exe = std::env::current_exe()?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "executable has no parent"))
}

/// Recursively copies `src` (a file or a directory tree) to `dst`.
pub fn copy_recursive(src: &Path, dst: &Path) -> Result<(), io::Error> {
    if src.is_file() {
        if let Some(parent) = dst.parent() {
            exists_or_create_dir(parent)?;
        }
        fs::copy(src, dst)?;
        return Ok(());
    }

    for entry in WalkDir::new(src) {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            exists_or_create_dir(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// `<repo>_bench_<n>`, unique enough to keep repeated runs apart.
pub fn container_name(repo: &str) -> String {
    let sanitized: String = repo
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let n: u32 = rand::thread_rng().gen_range(1..=1_000_000);
    format!("{}_bench_{}", sanitized, n)
}
