use std::path::PathBuf;

use nix::unistd::{geteuid, getuid, User};

use crate::backend::cron::{CronTable, Crontab};
use crate::backend::services::{ManagerScope, ServiceManager, Systemctl};
use crate::config::Config;
use crate::error::ConfigError;
use crate::model::LaunchSpec;

/// Everything a mechanism needs to find its files and talk to the OS.
pub struct Context {
    pub home: PathBuf,
    pub system_root: PathBuf,
    /// Effective uid 0; system-wide mechanisms are only touched when set.
    pub elevated: bool,
    /// Account the kiosk runs as; the invoking user when run through sudo.
    pub user: String,
    pub desktop_file: String,
    pub unit_name: String,
    pub launch: LaunchSpec,
    pub user_services: Box<dyn ServiceManager>,
    pub system_services: Box<dyn ServiceManager>,
    pub cron: Box<dyn CronTable>,
}

/// The account whose autostart entries are managed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub home: PathBuf,
    /// Root acting for `name` through sudo.
    pub via_sudo: bool,
}

impl Account {
    /// Under sudo this is the invoking user from the password database;
    /// `$HOME` still points at root's home there.
    pub fn resolve(sudo_user: Option<&str>, elevated: bool) -> Result<Self, ConfigError> {
        if let Some(name) = sudo_user.filter(|name| elevated && !name.is_empty()) {
            let unknown = |reason: String| ConfigError::UnknownUser {
                name: name.to_string(),
                reason,
            };
            let user = User::from_name(name)
                .map_err(|e| unknown(e.to_string()))?
                .ok_or_else(|| unknown("no such user".to_string()))?;
            return Ok(Self {
                name: user.name,
                home: user.dir,
                via_sudo: true,
            });
        }

        let home = dirs::home_dir().ok_or(ConfigError::NoHome)?;
        let name = std::env::var("USER")
            .ok()
            .filter(|name| !name.is_empty())
            .or_else(|| User::from_uid(getuid()).ok().flatten().map(|u| u.name))
            .unwrap_or_else(|| "pi".to_string());
        Ok(Self {
            name,
            home,
            via_sudo: false,
        })
    }
}

impl Context {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let elevated = geteuid().is_root();
        let sudo_user = std::env::var("SUDO_USER").ok();
        let account = Account::resolve(sudo_user.as_deref(), elevated)?;
        if account.via_sudo {
            log::info!(
                "Running through sudo; managing autostart for {} ({})",
                account.name,
                account.home.display()
            );
        }

        let system_root = PathBuf::from(&config.system_root);
        let user_unit_dir = account.home.join(".config/systemd/user");
        let system_unit_dir = system_root.join("etc/systemd/system");
        // Root's own crontab and user manager are not the kiosk user's.
        let on_behalf_of = account.via_sudo.then(|| account.name.clone());

        Ok(Self {
            launch: config.launch_spec(&account.home),
            home: account.home,
            system_root,
            elevated,
            user: account.name,
            desktop_file: config.desktop_file.clone(),
            unit_name: config.unit_name.clone(),
            user_services: Box::new(
                Systemctl::new(ManagerScope::User, user_unit_dir).on_behalf_of(on_behalf_of.clone()),
            ),
            system_services: Box::new(Systemctl::new(ManagerScope::System, system_unit_dir)),
            cron: Box::new(Crontab::new(on_behalf_of)),
        })
    }

    pub fn autostart_dir(&self) -> PathBuf {
        self.home.join(".config/autostart")
    }

    pub fn desktop_entry_path(&self) -> PathBuf {
        self.autostart_dir().join(&self.desktop_file)
    }

    pub fn user_unit_path(&self) -> PathBuf {
        self.home.join(".config/systemd/user").join(&self.unit_name)
    }

    pub fn shell_rc_path(&self) -> PathBuf {
        self.home.join(".bashrc")
    }

    pub fn session_script_path(&self) -> PathBuf {
        self.home.join(".config/lxsession/LXDE-pi/autostart")
    }

    pub fn system_unit_path(&self) -> PathBuf {
        self.system_root.join("etc/systemd/system").join(&self.unit_name)
    }

    pub fn rc_local_path(&self) -> PathBuf {
        self.system_root.join("etc/rc.local")
    }
}

#[cfg(test)]
pub mod testing {
    use super::Context;
    use crate::backend::cron::fake::FakeCron;
    use crate::backend::services::fake::FakeServices;
    use crate::model::LaunchSpec;

    /// A context rooted in a temp dir, with fake systemd and cron.
    pub struct Sandbox {
        pub dir: tempfile::TempDir,
        pub ctx: Context,
    }

    impl Sandbox {
        pub fn new() -> Self {
            Self::with(FakeServices::default(), FakeServices::default(), FakeCron::default())
        }

        pub fn with(user: FakeServices, system: FakeServices, cron: FakeCron) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let home = dir.path().join("home/pi");
            let system_root = dir.path().join("root");
            std::fs::create_dir_all(&home).unwrap();
            std::fs::create_dir_all(&system_root).unwrap();

            let ctx = Context {
                launch: LaunchSpec {
                    command: "/usr/bin/python3 kiosk_browser.py --fullscreen".into(),
                    working_dir: home.join("office-kiosk"),
                    marker: "# office-kiosk-autostart".into(),
                    match_pattern: "kiosk_browser.py".into(),
                },
                home,
                system_root,
                elevated: false,
                user: "pi".into(),
                desktop_file: "office-kiosk.desktop".into(),
                unit_name: "office-kiosk.service".into(),
                user_services: Box::new(user),
                system_services: Box::new(system),
                cron: Box::new(cron),
            };
            Self { dir, ctx }
        }
    }
}
