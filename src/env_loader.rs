use std::path::PathBuf;

use crate::crux::config::config_home;

fn fallback_dotenv_path(config_home: Option<PathBuf>) -> Option<PathBuf> {
    Some(config_home?.join(".env"))
}

pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let Some(path) = fallback_dotenv_path(config_home()) else {
        return;
    };
    if path.is_file() {
        let _ = dotenvy::from_path(&path);
    }
}
