use crate::crux::paths::ArchivePaths;
use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

/// Exclusive advisory lock on a data directory, released on drop.
#[derive(Debug)]
pub struct DataDirLock {
    file: File,
    path: PathBuf,
}

impl DataDirLock {
    pub fn acquire(paths: &ArchivePaths) -> Result<Self> {
        fs::create_dir_all(&paths.data_dir)
            .with_context(|| format!("failed to create {}", paths.data_dir.display()))?;
        let path = paths.lock_file.clone();
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            anyhow::bail!(
                "another crux-archiver run holds {}; concurrent runs against one data directory are not supported",
                path.display()
            );
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Drop for DataDirLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::DataDirLock;
    use crate::crux::paths::ArchivePaths;
    use tempfile::tempdir;

    #[test]
    fn second_lock_on_same_dir_is_refused_until_release() {
        let tmp = tempdir().expect("tempdir");
        let paths = ArchivePaths::new(tmp.path());

        let held = DataDirLock::acquire(&paths).expect("first lock");
        let err = DataDirLock::acquire(&paths).expect_err("second lock must fail");
        assert!(format!("{err:#}").contains("another crux-archiver run"));

        drop(held);
        DataDirLock::acquire(&paths).expect("lock after release");
    }
}
