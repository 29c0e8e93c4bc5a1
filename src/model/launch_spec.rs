use std::path::PathBuf;

/// What gets launched, and how our own lines are recognised.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub command: String,
    pub working_dir: PathBuf,
    /// Trailing comment tag on every line we add to a shared file.
    pub marker: String,
    /// Substring identifying the kiosk in foreign entries and in the process table.
    pub match_pattern: String,
}

impl LaunchSpec {
    /// `cd <dir> && <command>`, for shells and cron.
    pub fn shell_command(&self) -> String {
        format!(
            "cd {} && {}",
            shell_quote(&self.working_dir.to_string_lossy()),
            self.command
        )
    }

    /// [`shell_command`](Self::shell_command) with `DISPLAY=:0`, for cron and
    /// `rc.local`, which start outside any session.
    pub fn headless_shell_command(&self) -> String {
        format!(
            "cd {} && DISPLAY=:0 {}",
            shell_quote(&self.working_dir.to_string_lossy()),
            self.command
        )
    }

    /// True if `line` was written by us or otherwise launches the kiosk.
    /// Commented-out lines never match.
    pub fn matches_line(&self, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return false;
        }
        if !self.marker.is_empty() && line.contains(&self.marker) {
            return true;
        }
        !self.match_pattern.is_empty() && line.contains(&self.match_pattern)
    }
}

fn shell_quote(s: &str) -> String {
    if s.chars().all(|c| c.is_ascii_alphanumeric() || "/._-~".contains(c)) {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> LaunchSpec {
        LaunchSpec {
            command: "python3 kiosk_browser.py --fullscreen".into(),
            working_dir: PathBuf::from("/home/pi/office kiosk"),
            marker: "# office-kiosk-autostart".into(),
            match_pattern: "kiosk_browser.py".into(),
        }
    }

    #[test]
    fn shell_command_quotes_working_dir() {
        assert_eq!(
            spec().shell_command(),
            "cd '/home/pi/office kiosk' && python3 kiosk_browser.py --fullscreen"
        );
    }

    #[test]
    fn headless_command_quotes_working_dir() {
        assert_eq!(
            spec().headless_shell_command(),
            "cd '/home/pi/office kiosk' && DISPLAY=:0 python3 kiosk_browser.py --fullscreen"
        );
    }

    #[test]
    fn matches_marker_or_pattern() {
        let s = spec();
        assert!(s.matches_line("foo & # office-kiosk-autostart"));
        assert!(s.matches_line("@python3 /home/pi/kiosk_browser.py"));
        assert!(!s.matches_line("export PATH=$HOME/bin:$PATH"));
        assert!(!s.matches_line("   "));
        assert!(!s.matches_line("# @reboot python3 kiosk_browser.py"));
    }
}
