//! Filesystem helpers.
//!
//! Every artifact the crate produces is written through [`AtomicFile`]: a
//! temporary file in the destination directory that only takes the final name
//! once the operation has fully succeeded. On any error the temporary is
//! dropped and removed, so a failed run never leaves a half-written archive,
//! restored file, or image under the requested name.

use std::fs::File;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::{ArchiverError, Result};

pub struct AtomicFile {
    temp: NamedTempFile,
    target: PathBuf,
}

impl AtomicFile {
    pub fn create(target: &Path) -> Result<Self> {
        let dir = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let temp = tempfile::Builder::new()
            .prefix(".ntk-")
            .suffix(".partial")
            .tempfile_in(dir)
            .map_err(|e| ArchiverError::io(e, target))?;
        Ok(Self { temp, target: target.to_path_buf() })
    }

    pub fn file(&self) -> &File {
        self.temp.as_file()
    }

    pub fn file_mut(&mut self) -> &mut File {
        self.temp.as_file_mut()
    }

    /// Flush to disk and move into place, replacing any existing file.
    pub fn persist(self) -> Result<()> {
        self.temp.as_file().sync_all().map_err(|e| ArchiverError::io(e, &self.target))?;
        let target = self.target;
        self.temp
            .persist(&target)
            .map_err(|e| ArchiverError::io(e.error, &target))?;
        Ok(())
    }
}

/// Open `path` for reading and return it with its length.
pub fn open_with_len(path: &Path) -> Result<(File, u64)> {
    let file = File::open(path).map_err(|e| ArchiverError::io(e, path))?;
    let len = file.metadata().map_err(|e| ArchiverError::io(e, path))?.len();
    Ok((file, len))
}

/// `true` when `a` and `b` name the same existing file.
pub fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn persists_only_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.bin");

        let mut f = AtomicFile::create(&target).unwrap();
        f.file_mut().write_all(b"partial").unwrap();
        drop(f);
        assert!(!target.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let mut f = AtomicFile::create(&target).unwrap();
        f.file_mut().write_all(b"done").unwrap();
        f.persist().unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"done");
    }

    #[test]
    fn same_file_detection() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        std::fs::write(&a, b"x").unwrap();
        assert!(same_file(&a, &dir.path().join(".").join("a")));
        assert!(!same_file(&a, &dir.path().join("missing")));
    }
}
