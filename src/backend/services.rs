use std::path::{Path, PathBuf};
use std::process::Command;

/// Which systemd instance a manager talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerScope {
    User,
    System,
}

/// The subset of a service manager the registrar needs.
pub trait ServiceManager {
    fn is_available(&self) -> bool;
    fn daemon_reload(&self) -> Result<(), String>;
    fn enable(&self, unit: &str) -> Result<(), String>;
    fn disable(&self, unit: &str) -> Result<(), String>;
    fn start(&self, unit: &str) -> Result<(), String>;
    fn stop(&self, unit: &str) -> Result<(), String>;
    fn is_enabled(&self, unit: &str) -> Result<bool, String>;
    fn is_active(&self, unit: &str) -> Result<bool, String>;
}

pub fn is_systemd_available() -> bool {
    Path::new("/run/systemd/system").exists()
}

/// `systemctl`, optionally with `--user`.
pub struct Systemctl {
    scope: ManagerScope,
    /// Where enabled units get their `*.wants/` symlinks; used when systemd
    /// is not running (chroots, containers).
    unit_dir: PathBuf,
    /// Another user's manager, when running as root for them.
    machine: Option<String>,
}

impl Systemctl {
    pub fn new(scope: ManagerScope, unit_dir: PathBuf) -> Self {
        Self {
            scope,
            unit_dir,
            machine: None,
        }
    }

    /// Talk to `user`'s own manager (`--user --machine=<user>@.host`).
    pub fn on_behalf_of(mut self, user: Option<String>) -> Self {
        self.machine = user.map(|user| format!("{}@.host", user));
        self
    }

    fn run(&self, args: &[&str]) -> Result<std::process::Output, String> {
        let mut cmd = Command::new("systemctl");
        if self.scope == ManagerScope::User {
            cmd.arg("--user");
        }
        if let Some(machine) = &self.machine {
            cmd.arg(format!("--machine={}", machine));
        }
        cmd.args(args)
            .output()
            .map_err(|e| format!("Failed to run systemctl: {}", e))
    }

    fn action(&self, action: &str, unit: &str) -> Result<(), String> {
        if !is_systemd_available() {
            return Err("systemd not available on this system".to_string());
        }

        let output = self.run(&[action, unit])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr_str = stderr.trim();

            if stderr_str.contains("Read-only file system") {
                return Err("Cannot modify: filesystem is read-only (immutable distro?)".to_string());
            }

            return Err(format!(
                "systemctl {}{} {} failed: {}",
                self.scope_flag(),
                action,
                unit,
                stderr_str
            ));
        }

        log::info!("systemctl {}{} {} succeeded", self.scope_flag(), action, unit);
        Ok(())
    }

    /// `is-enabled`/`is-active` print the state and exit non-zero for
    /// anything but the positive answer, so read stdout instead of the status.
    fn query(&self, verb: &str, unit: &str) -> Result<String, String> {
        let output = self.run(&[verb, unit])?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if stdout.is_empty() && !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "systemctl {}{} {} failed: {}",
                self.scope_flag(),
                verb,
                unit,
                stderr.trim()
            ));
        }
        Ok(stdout)
    }

    fn scope_flag(&self) -> &'static str {
        match self.scope {
            ManagerScope::User => "--user ",
            ManagerScope::System => "",
        }
    }

    fn has_wants_link(&self, unit: &str) -> bool {
        let Ok(entries) = std::fs::read_dir(&self.unit_dir) else {
            return false;
        };
        entries.flatten().any(|entry| {
            let name = entry.file_name();
            name.to_string_lossy().ends_with(".wants")
                && entry.path().join(unit).symlink_metadata().is_ok()
        })
    }
}

impl ServiceManager for Systemctl {
    fn is_available(&self) -> bool {
        is_systemd_available()
    }

    fn daemon_reload(&self) -> Result<(), String> {
        if !is_systemd_available() {
            log::debug!("systemd not running, skipping daemon-reload");
            return Ok(());
        }
        let output = self.run(&["daemon-reload"])?;
        if !output.status.success() {
            return Err(format!(
                "systemctl {}daemon-reload failed: {}",
                self.scope_flag(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(())
    }

    fn enable(&self, unit: &str) -> Result<(), String> {
        self.action("enable", unit)
    }

    fn disable(&self, unit: &str) -> Result<(), String> {
        self.action("disable", unit)
    }

    fn start(&self, unit: &str) -> Result<(), String> {
        self.action("start", unit)
    }

    fn stop(&self, unit: &str) -> Result<(), String> {
        self.action("stop", unit)
    }

    fn is_enabled(&self, unit: &str) -> Result<bool, String> {
        if !is_systemd_available() {
            return Ok(self.has_wants_link(unit));
        }
        // enabled, enabled-runtime, alias, linked, disabled, static, masked, ...
        let state = self.query("is-enabled", unit)?;
        Ok(state == "enabled" || state == "enabled-runtime")
    }

    fn is_active(&self, unit: &str) -> Result<bool, String> {
        if !is_systemd_available() {
            return Ok(false);
        }
        Ok(self.query("is-active", unit)? == "active")
    }
}

#[cfg(test)]
pub mod fake {
    use super::ServiceManager;
    use std::cell::RefCell;
    use std::collections::HashSet;

    /// In-memory service manager.
    #[derive(Default)]
    pub struct FakeServices {
        pub enabled: RefCell<HashSet<String>>,
        pub active: RefCell<HashSet<String>>,
        /// Units whose queries fail.
        pub broken: RefCell<HashSet<String>>,
    }

    impl ServiceManager for FakeServices {
        fn is_available(&self) -> bool {
            true
        }

        fn daemon_reload(&self) -> Result<(), String> {
            Ok(())
        }

        fn enable(&self, unit: &str) -> Result<(), String> {
            self.enabled.borrow_mut().insert(unit.to_string());
            Ok(())
        }

        fn disable(&self, unit: &str) -> Result<(), String> {
            self.enabled.borrow_mut().remove(unit);
            Ok(())
        }

        fn start(&self, unit: &str) -> Result<(), String> {
            self.active.borrow_mut().insert(unit.to_string());
            Ok(())
        }

        fn stop(&self, unit: &str) -> Result<(), String> {
            self.active.borrow_mut().remove(unit);
            Ok(())
        }

        fn is_enabled(&self, unit: &str) -> Result<bool, String> {
            if self.broken.borrow().contains(unit) {
                return Err(format!("Failed to get unit file state for {}", unit));
            }
            Ok(self.enabled.borrow().contains(unit))
        }

        fn is_active(&self, unit: &str) -> Result<bool, String> {
            Ok(self.active.borrow().contains(unit))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wants_link_is_found_in_any_target() {
        let dir = tempfile::tempdir().unwrap();
        let wants = dir.path().join("default.target.wants");
        std::fs::create_dir_all(&wants).unwrap();
        std::os::unix::fs::symlink("../office-kiosk.service", wants.join("office-kiosk.service"))
            .unwrap();

        let manager = Systemctl::new(ManagerScope::User, dir.path().to_path_buf());
        assert!(manager.has_wants_link("office-kiosk.service"));
        assert!(!manager.has_wants_link("other.service"));
    }

    #[test]
    fn user_manager_of_another_account() {
        let manager = Systemctl::new(ManagerScope::User, PathBuf::from("/home/pi/.config/systemd/user"))
            .on_behalf_of(Some("pi".into()));
        assert_eq!(manager.machine.as_deref(), Some("pi@.host"));
        assert!(Systemctl::new(ManagerScope::System, PathBuf::new()).machine.is_none());
    }
}
