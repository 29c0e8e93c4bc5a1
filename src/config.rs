use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::model::{LaunchSpec, MechanismKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app_command: String,
    /// Kiosk checkout; `~/` is expanded against the home directory.
    pub working_dir: String,
    pub match_pattern: String,
    pub marker: String,
    pub desktop_file: String,
    pub unit_name: String,
    pub preferred_mechanism: String,
    pub stop_grace_secs: u64,
    pub auto_update_apply: bool,
    /// Root for system-wide files; only ever changed for testing.
    pub system_root: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_command: "/usr/bin/python3 kiosk_browser.py --fullscreen".into(),
            working_dir: "~/office-kiosk".into(),
            match_pattern: "kiosk_browser.py".into(),
            marker: "# office-kiosk-autostart".into(),
            desktop_file: "office-kiosk.desktop".into(),
            unit_name: "office-kiosk.service".into(),
            preferred_mechanism: MechanismKind::DesktopAutostart.name().into(),
            stop_grace_secs: 5,
            auto_update_apply: false,
            system_root: "/".into(),
        }
    }
}

impl Config {
    /// Missing file means defaults; an unreadable or malformed one is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No config at {}, using defaults", path.display());
                return Ok(Config::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)
    }

    pub fn launch_spec(&self, home: &Path) -> LaunchSpec {
        LaunchSpec {
            command: self.app_command.clone(),
            working_dir: expand_home(&self.working_dir, home),
            marker: self.marker.clone(),
            match_pattern: self.match_pattern.clone(),
        }
    }

    pub fn preferred(&self) -> Result<MechanismKind, crate::model::UnknownMechanism> {
        self.preferred_mechanism.parse()
    }
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("office-kiosk")
        .join("autostart.json")
}

fn expand_home(path: &str, home: &Path) -> PathBuf {
    if path == "~" {
        home.to_path_buf()
    } else if let Some(rest) = path.strip_prefix("~/") {
        home.join(rest)
    } else {
        PathBuf::from(path)
    }
}
