use std::path::Path;
use std::time::Duration;

use crate::backend::{self, update, Context, Registrar};
use crate::config::Config;
use crate::error::{ConfigError, RegistrarError, RegistrarIssue};
use crate::model::{MechanismKind, ProbeState};

pub struct KioskApp {
    config: Config,
    ctx: Context,
}

impl KioskApp {
    pub fn new(config_path: &Path) -> Result<Self, ConfigError> {
        let config = Config::load(config_path)?;
        let ctx = Context::from_config(&config)?;
        Ok(Self { config, ctx })
    }

    pub fn status(&self) -> i32 {
        let registrar = Registrar::new(&self.ctx);
        let statuses = registrar.status();
        let width = MechanismKind::ALL
            .iter()
            .map(|k| k.name().len())
            .max()
            .unwrap_or(0);

        for status in &statuses {
            let detail = match &status.state {
                ProbeState::Unknown(reason) => Some(reason.as_str()),
                _ => status.detail.as_deref(),
            };
            match detail {
                Some(detail) => println!(
                    "{:<width$}  {:<8}  {}",
                    status.kind.name(),
                    status.state.to_string(),
                    detail
                ),
                None => println!("{:<width$}  {}", status.kind.name(), status.state),
            }
        }

        let active = statuses.iter().filter(|s| s.is_enabled()).count();
        match active {
            0 => println!("\nThe kiosk will not start automatically."),
            1 => {}
            n => println!(
                "\nWarning: {} mechanisms are active; run `kiosk-autostart enable` to keep one.",
                n
            ),
        }

        let pids = registrar.running_instances();
        if pids.is_empty() {
            println!("No kiosk instance is running.");
        } else {
            let pids: Vec<String> = pids.iter().map(|p| p.to_string()).collect();
            println!("Running instances: {}", pids.join(", "));
        }
        0
    }

    pub fn enable(&self, mechanism: Option<MechanismKind>) -> i32 {
        let preferred = match mechanism {
            Some(kind) => kind,
            None => match self.config.preferred() {
                Ok(kind) => kind,
                Err(e) => {
                    eprintln!("Error: preferred_mechanism in config: {e}");
                    return 2;
                }
            },
        };

        let registrar = Registrar::new(&self.ctx);
        match registrar.enable_one(preferred) {
            Ok(report) => {
                for kind in &report.removed {
                    println!("Disabled {}", kind);
                }
                print_issues(&report.issues);
                println!("Autostart enabled via {}.", report.enabled);
                0
            }
            Err(e) => {
                print_issues(e.issues());
                eprintln!("Error: {e}");
                if let RegistrarError::InstallFailed { .. } = e {
                    eprintln!("No autostart mechanism is active now; fix the problem and run `kiosk-autostart enable` again.");
                }
                1
            }
        }
    }

    pub fn disable(&self) -> i32 {
        let report = Registrar::new(&self.ctx).disable_all();
        if report.removed.is_empty() && report.issues.is_empty() {
            println!("Autostart is already disabled.");
            return 0;
        }
        for kind in &report.removed {
            println!("Disabled {}", kind);
        }
        print_issues(&report.issues);
        if report.has_leftovers() {
            1
        } else {
            0
        }
    }

    pub fn stop(&self, grace_secs: Option<u64>) -> i32 {
        let services = Registrar::new(&self.ctx).stop_services();
        for kind in &services.stopped {
            println!("Stopped the {} service", kind);
        }
        for (kind, err) in &services.failed {
            eprintln!("Could not stop the {} service: {}", kind, err);
        }

        let grace = Duration::from_secs(grace_secs.unwrap_or(self.config.stop_grace_secs));
        let report = backend::stop_running_instances(&self.ctx.launch.match_pattern, grace);

        if services.stopped.is_empty()
            && services.failed.is_empty()
            && report.terminated.is_empty()
            && report.killed.is_empty()
            && report.failed.is_empty()
        {
            println!("No kiosk instance is running.");
            return 0;
        }
        for pid in &report.terminated {
            println!("Stopped {}", pid);
        }
        for pid in &report.killed {
            println!("Killed {} (did not exit after {}s)", pid, grace.as_secs());
        }
        for (pid, err) in &report.failed {
            eprintln!("Could not stop {}: {}", pid, err);
        }
        if report.failed.is_empty() && services.failed.is_empty() {
            0
        } else {
            1
        }
    }

    /// Stop everything, then start one instance: through the service manager
    /// when a unit mechanism is enabled, detached otherwise.
    pub fn restart(&self) -> i32 {
        if self.stop(None) != 0 {
            return 1;
        }
        match Registrar::new(&self.ctx).start_service() {
            Some(Ok(kind)) => {
                println!("Started kiosk via {}.", kind);
                return 0;
            }
            Some(Err(e)) => {
                eprintln!("Error: {e}");
                return 1;
            }
            None => {}
        }
        match backend::launch_detached(&self.ctx.launch) {
            Ok(pid) => {
                println!("Started kiosk (PID {}).", pid);
                0
            }
            Err(e) => {
                eprintln!("Error: {e}");
                1
            }
        }
    }

    pub fn update(&self, apply: bool, restart: bool) -> i32 {
        let repo = &self.ctx.launch.working_dir;
        let status = match update::check(repo) {
            Ok(status) => status,
            Err(e) => {
                eprintln!("Error: {e}");
                return 1;
            }
        };

        if status.is_up_to_date() {
            println!("Up to date at {}.", status.current);
            return 0;
        }
        println!(
            "{} update(s) available ({} -> {}).",
            status.behind, status.current, status.upstream
        );
        if !(apply || self.config.auto_update_apply) {
            println!("Run `kiosk-autostart update --apply` to install.");
            return 0;
        }

        match update::apply(repo) {
            Ok(head) => println!("Updated to {}.", head),
            Err(e) => {
                eprintln!("Error: {e}");
                return 1;
            }
        }
        if restart {
            return self.restart();
        }
        0
    }
}

/// Write a default config unless one exists.
pub fn init(config_path: &Path) -> i32 {
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
        return 0;
    }
    match Config::default().save(config_path) {
        Ok(()) => {
            println!("Wrote default config to {}", config_path.display());
            0
        }
        Err(e) => {
            eprintln!("Error: cannot write {}: {e}", config_path.display());
            1
        }
    }
}

fn print_issues(issues: &[RegistrarIssue]) {
    for issue in issues {
        eprintln!("Warning: {issue}");
    }
}
