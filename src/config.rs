/*!
Local application config store

The application keeps a JSON document in its per-user data directory. The
updater only reads the `version` field from it; everything else is left alone.
*/
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::errors::*;

/// File name of the application's config document
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Default location of the application's config document:
/// `<local data dir>/<app_dir>/config.json`
///
/// * Errors:
///     * Config - the platform has no per-user data directory
pub fn default_config_path(app_dir: &str) -> Result<PathBuf> {
    let base = dirs::data_local_dir()
        .ok_or_else(|| format_err!(Error::Config, "Unable to determine local data directory"))?;
    Ok(base.join(app_dir).join(CONFIG_FILE_NAME))
}

/// Installed-version record read from the application's config document
#[derive(Debug, Clone)]
pub struct InstalledConfig {
    path: PathBuf,
}

impl InstalledConfig {
    pub fn at<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the installed version string
    ///
    /// * Errors:
    ///     * Resolution - file missing, malformed, or `version` missing / not a string
    pub fn installed_version(&self) -> Result<String> {
        let raw = fs::read_to_string(&self.path).map_err(|e| {
            format_err!(Error::Resolution, "Unable to read {:?}: {}", self.path, e)
        })?;
        let json: Value = serde_json::from_str(&raw).map_err(|e| {
            format_err!(Error::Resolution, "Malformed config {:?}: {}", self.path, e)
        })?;
        json["version"]
            .as_str()
            .map(|s| s.to_owned())
            .ok_or_else(|| format_err!(Error::Resolution, "Config {:?} missing `version`", self.path))
    }
}
