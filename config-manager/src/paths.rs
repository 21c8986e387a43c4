//! XDG locations of the camstream config files.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

const APP_DIR: &str = "camstream";
const SERVER_CONFIG_FILE: &str = "server.toml";
const CAMERAS_FILE: &str = "cameras.toml";

/// `$XDG_CONFIG_HOME/camstream`, usually `~/.config/camstream`
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    let base = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
    Ok(base.join(APP_DIR))
}

pub fn server_config_path() -> Result<PathBuf, ConfigError> {
    config_dir().map(|dir| dir.join(SERVER_CONFIG_FILE))
}

pub fn cameras_path() -> Result<PathBuf, ConfigError> {
    config_dir().map(|dir| dir.join(CAMERAS_FILE))
}

/// Create the config directory (0700 on Unix) if it is missing.
pub fn ensure_config_dir() -> Result<PathBuf, ConfigError> {
    let dir = config_dir()?;
    if dir.is_dir() {
        return Ok(dir);
    }

    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(&dir)?;
    Ok(dir)
}

/// Replace `path` with `content`, readable by the owner only on Unix.
///
/// Writes a sibling `.tmp` file first and renames it over the target, so a
/// crash never leaves a half-written camera list behind.
pub fn write_secure(path: &Path, content: &str) -> Result<(), ConfigError> {
    let tmp = path.with_extension("tmp");

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&tmp)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&tmp, path)?;
    Ok(())
}
