use crate::model::LaunchSpec;

const DESKTOP_ENTRY: &str = "\
[Desktop Entry]
Type=Application
Name=Office Kiosk
Comment=Touchscreen kiosk browser
Exec={exec}
Path={path}
Icon=web-browser
Terminal=false
X-GNOME-Autostart-enabled=true
X-GNOME-Autostart-Delay=5
{marker}
";

/// The fields of an autostart `.desktop` file that decide whether it launches.
#[derive(Debug, Default, PartialEq)]
pub struct AutostartEntry {
    pub name: Option<String>,
    pub exec: Option<String>,
    pub hidden: bool,
    pub gnome_autostart_enabled: Option<bool>,
}

impl AutostartEntry {
    pub fn parse(content: &str) -> Self {
        let mut entry = AutostartEntry::default();
        let mut in_desktop_entry = false;

        for line in content.lines() {
            let line = line.trim();
            if line == "[Desktop Entry]" {
                in_desktop_entry = true;
                continue;
            }
            if line.starts_with('[') {
                in_desktop_entry = false;
                continue;
            }
            if !in_desktop_entry {
                continue;
            }

            if let Some(val) = line.strip_prefix("Name=") {
                if entry.name.is_none() {
                    entry.name = Some(val.to_string());
                }
            } else if let Some(val) = line.strip_prefix("Exec=") {
                entry.exec = Some(val.to_string());
            } else if let Some(val) = line.strip_prefix("Hidden=") {
                entry.hidden = val.trim().eq_ignore_ascii_case("true");
            } else if let Some(val) = line.strip_prefix("X-GNOME-Autostart-enabled=") {
                entry.gnome_autostart_enabled = Some(val.trim().eq_ignore_ascii_case("true"));
            }
        }

        entry
    }

    /// Hidden=true or X-GNOME-Autostart-enabled=false switch an entry off.
    pub fn is_active(&self) -> bool {
        !self.hidden && self.gnome_autostart_enabled.unwrap_or(true)
    }

    pub fn launches(&self, launch: &LaunchSpec) -> bool {
        self.exec.as_deref().is_some_and(|exec| {
            (!launch.match_pattern.is_empty() && exec.contains(&launch.match_pattern))
                || (!launch.command.is_empty() && exec.contains(&launch.command))
        })
    }
}

pub fn render(launch: &LaunchSpec) -> String {
    DESKTOP_ENTRY
        .replace("{exec}", &launch.command)
        .replace("{path}", &launch.working_dir.to_string_lossy())
        .replace("{marker}", &launch.marker)
}
