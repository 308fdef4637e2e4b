//! Where `settings.toml` lives.
//!
//!   Windows: %APPDATA%\interview-room\settings.toml
//!   macOS:   ~/Library/Application Support/interview-room/settings.toml
//!   Linux:   ~/.config/interview-room/settings.toml

use std::path::{Path, PathBuf};

const APP_DIR: &str = "interview-room";
const SETTINGS_FILE: &str = "settings.toml";

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub settings_file: PathBuf,
}

impl AppPaths {
    /// Platform config location, or `./interview-room` if the platform has
    /// none.
    pub fn new() -> Self {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::under(&base)
    }

    /// Paths rooted at `base` instead of the platform config dir.
    pub fn under(base: &Path) -> Self {
        let config_dir = base.join(APP_DIR);
        Self {
            settings_file: config_dir.join(SETTINGS_FILE),
            config_dir,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
