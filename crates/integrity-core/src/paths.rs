use directories::ProjectDirs;
use std::path::PathBuf;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "remote-integrity";
pub const APP_NAME: &str = "remote-integrity";

pub fn data_dir() -> std::io::Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "cannot determine data directory",
        )
    })?;
    Ok(dirs.data_dir().to_path_buf())
}

/// Default location of the baseline database.
pub fn default_database_path() -> std::io::Result<PathBuf> {
    Ok(data_dir()?.join("integrity.db"))
}
