use crate::crux::scope::Scope;
use std::path::{Path, PathBuf};

pub const CURRENT_FILE_NAME: &str = "current.csv.gz";
pub const LOCK_FILE_NAME: &str = ".crux-archiver.lock";
pub const AUDIT_LOG_NAME: &str = "audit.log";

#[derive(Debug, Clone)]
pub struct ArchivePaths {
    pub data_dir: PathBuf,
    pub global_dir: PathBuf,
    pub country_dir: PathBuf,
    pub lock_file: PathBuf,
    pub audit_log: PathBuf,
}

impl ArchivePaths {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref().to_path_buf();
        Self {
            global_dir: data_dir.join(Scope::Global.spec().dir_name),
            country_dir: data_dir.join(Scope::Country.spec().dir_name),
            lock_file: data_dir.join(LOCK_FILE_NAME),
            audit_log: data_dir.join(AUDIT_LOG_NAME),
            data_dir,
        }
    }

    pub fn scope_dir(&self, scope: Scope) -> &Path {
        match scope {
            Scope::Global => &self.global_dir,
            Scope::Country => &self.country_dir,
        }
    }
}
