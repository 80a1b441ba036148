use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::policy::Mount;
use crate::utils::copy_recursive;

/// Process-wide scratch space for per-run copies of mount fixtures.
///
/// Removed when dropped, so every exit path that unwinds cleans it up.
#[derive(Debug)]
pub struct ScratchRoot {
    dir: TempDir,
    next: usize,
}

impl ScratchRoot {
    pub fn new() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("hello-bench-").tempdir()?;
        debug!("scratch root at {}", dir.path().display());
        Ok(ScratchRoot { dir, next: 0 })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Copies `src` into a fresh numbered directory and returns the copy.
    pub fn copy_in(&mut self, src: &Path) -> io::Result<PathBuf> {
        self.next += 1;
        let dst = self.dir.path().join(self.next.to_string());
        copy_recursive(src, &dst)?;
        Ok(dst)
    }

    /// Removes the scratch root, reporting failures instead of ignoring them.
    pub fn close(self) -> io::Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close().map_err(|e| {
            warn!("failed to remove scratch root {}: {}", path.display(), e);
            e
        })
    }
}

/// State shared by every run of a batch.
#[derive(Debug)]
pub struct Context {
    pub scratch: ScratchRoot,
    pub fixtures_dir: PathBuf,
}

impl Context {
    pub fn new(fixtures_dir: PathBuf) -> io::Result<Self> {
        Ok(Context {
            scratch: ScratchRoot::new()?,
            fixtures_dir,
        })
    }

    /// Snapshot-copies each mount source so runs never share a fixture.
    ///
    /// # Returns
    /// The same mounts with `source` pointing at the scratch copy.
    pub fn prepare_mounts(&mut self, mounts: &[Mount]) -> io::Result<Vec<Mount>> {
        mounts
            .iter()
            .map(|m| {
                let original = self.fixtures_dir.join(&m.source);
                if !original.exists() {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("mount source {} does not exist", original.display()),
                    ));
                }
                let copy = self.scratch.copy_in(&original)?;
                debug!("copied {} to {}", original.display(), copy.display());
                Ok(Mount {
                    source: copy.to_string_lossy().to_string(),
                    destination: m.destination.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn mounts_get_private_copies() {
        let fixtures = tempfile::tempdir().unwrap();
        fs::create_dir(fixtures.path().join("gcc")).unwrap();
        fs::write(fixtures.path().join("gcc/main.c"), "int main(){}").unwrap();

        let mut ctx = Context::new(fixtures.path().to_path_buf()).unwrap();
        let mounts = vec![Mount {
            source: "gcc".to_string(),
            destination: "/src".to_string(),
        }];

        let first = ctx.prepare_mounts(&mounts).unwrap();
        let second = ctx.prepare_mounts(&mounts).unwrap();

        assert_ne!(first[0].source, second[0].source);
        assert_eq!(first[0].destination, "/src");
        assert!(Path::new(&first[0].source).starts_with(ctx.scratch.path()));

        fs::write(Path::new(&first[0].source).join("main.c"), "changed").unwrap();
        assert_eq!(
            fs::read_to_string(fixtures.path().join("gcc/main.c")).unwrap(),
            "int main(){}"
        );
    }

    #[test]
    fn missing_fixture_is_an_error() {
        let fixtures = tempfile::tempdir().unwrap();
        let mut ctx = Context::new(fixtures.path().to_path_buf()).unwrap();
        let mounts = vec![Mount {
            source: "nope".to_string(),
            destination: "/src".to_string(),
        }];
        assert!(ctx.prepare_mounts(&mounts).is_err());
    }

    #[test]
    fn scratch_root_is_removed_on_close() {
        let scratch = ScratchRoot::new().unwrap();
        let path = scratch.path().to_path_buf();
        assert!(path.exists());
        scratch.close().unwrap();
        assert!(!path.exists());
    }
}
