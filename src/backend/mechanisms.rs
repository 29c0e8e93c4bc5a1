//! Probe, install and remove for each autostart mechanism.

use std::path::{Path, PathBuf};

use crate::backend::context::Context;
use crate::backend::desktop_entry::{self, AutostartEntry};
use crate::backend::services::ServiceManager;
use crate::backend::shared_file;
use crate::error::{MechanismError, ProbeError};
use crate::model::{LaunchSpec, MechanismKind, Scope};

const SERVICE_UNIT: &str = "\
[Unit]
Description=Office Kiosk browser
After=graphical-session.target network-online.target
{marker}

[Service]
Type=simple
{user}WorkingDirectory={path}
Environment=DISPLAY=:0
ExecStart={exec}
Restart=on-failure
RestartSec=5

[Install]
WantedBy={target}
";

const RC_LOCAL_SKELETON: &str = "#!/bin/sh -e\n\nexit 0\n";
const LXDE_SYSTEM_AUTOSTART: &str = "etc/xdg/lxsession/LXDE-pi/autostart";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub enabled: bool,
    pub detail: Option<String>,
}

impl Probe {
    fn enabled(detail: impl Into<String>) -> Self {
        Self {
            enabled: true,
            detail: Some(detail.into()),
        }
    }

    fn disabled() -> Self {
        Self {
            enabled: false,
            detail: None,
        }
    }

    fn disabled_because(detail: impl Into<String>) -> Self {
        Self {
            enabled: false,
            detail: Some(detail.into()),
        }
    }
}

impl MechanismKind {
    /// Read-only check of whether this mechanism will launch the kiosk.
    /// A missing backing file is `disabled`, not an error.
    pub fn probe(self, ctx: &Context) -> Result<Probe, ProbeError> {
        match self {
            MechanismKind::DesktopAutostart => probe_desktop_entry(ctx),
            MechanismKind::UserService => probe_unit(
                &ctx.user_unit_path(),
                &ctx.unit_name,
                ctx.user_services.as_ref(),
            ),
            MechanismKind::ShellRc => probe_shared_file(&ctx.shell_rc_path(), &ctx.launch),
            MechanismKind::ScheduledTask => {
                let table = ctx.cron.read().map_err(ProbeError::Command)?;
                Ok(probe_lines(&table, &ctx.launch, "crontab"))
            }
            MechanismKind::SessionScript => {
                probe_shared_file(&ctx.session_script_path(), &ctx.launch)
            }
            MechanismKind::SystemService => probe_unit(
                &ctx.system_unit_path(),
                &ctx.unit_name,
                ctx.system_services.as_ref(),
            ),
            MechanismKind::InitScript => probe_shared_file(&ctx.rc_local_path(), &ctx.launch),
        }
    }

    pub fn install(self, ctx: &Context) -> Result<(), MechanismError> {
        self.check_privilege(ctx, "enable")?;

        match self {
            MechanismKind::DesktopAutostart => {
                let path = ctx.desktop_entry_path();
                shared_file::write_atomic(&path, &desktop_entry::render(&ctx.launch), Some(0o644))
                    .map_err(|e| MechanismError::write(&path, e))?;
                log::info!("Wrote autostart entry {}", path.display());
            }
            MechanismKind::UserService => {
                let unit = render_unit(&ctx.launch, None, "default.target");
                install_unit(&ctx.user_unit_path(), &unit, &ctx.unit_name, ctx.user_services.as_ref())?;
            }
            MechanismKind::ShellRc => {
                let line = format!("{} {}", rc_snippet(&ctx.launch), ctx.launch.marker);
                replace_line(&ctx.shell_rc_path(), &ctx.launch, &line, None)?;
            }
            MechanismKind::ScheduledTask => {
                let line = format!(
                    "@reboot sleep 30 && {} {}",
                    ctx.launch.headless_shell_command(),
                    ctx.launch.marker
                );
                let table = ctx.cron.read().map_err(MechanismError::Command)?;
                let (table, _) = shared_file::remove_lines(&table, |l| ctx.launch.matches_line(l));
                ctx.cron
                    .write(&shared_file::append_line(&table, &line))
                    .map_err(MechanismError::Command)?;
                log::info!("Added @reboot entry to crontab");
            }
            MechanismKind::SessionScript => {
                let line = format!(
                    "@sh -c '{}' {}",
                    ctx.launch.shell_command().replace('\'', "'\\''"),
                    ctx.launch.marker
                );
                // A per-user file replaces the system one entirely, so start
                // from the system defaults (panel, desktop, screensaver).
                let seed = ctx.system_root.join(LXDE_SYSTEM_AUTOSTART);
                let seed = std::fs::read_to_string(&seed).ok();
                replace_line(&ctx.session_script_path(), &ctx.launch, &line, seed.as_deref())?;
            }
            MechanismKind::SystemService => {
                let user = format!("User={}\n", ctx.user);
                let unit = render_unit(&ctx.launch, Some(&user), "graphical.target");
                install_unit(
                    &ctx.system_unit_path(),
                    &unit,
                    &ctx.unit_name,
                    ctx.system_services.as_ref(),
                )?;
            }
            MechanismKind::InitScript => {
                let path = ctx.rc_local_path();
                let line = format!(
                    "su - {} -c '{}' & {}",
                    ctx.user,
                    ctx.launch.headless_shell_command().replace('\'', "'\\''"),
                    ctx.launch.marker
                );
                let content = shared_file::read_optional(&path)?
                    .unwrap_or_else(|| RC_LOCAL_SKELETON.to_string());
                let (content, _) =
                    shared_file::remove_lines(&content, |l| ctx.launch.matches_line(l));
                let content = shared_file::insert_before_exit(&content, &line);
                shared_file::write_atomic(&path, &content, Some(0o755))
                    .map_err(|e| MechanismError::write(&path, e))?;
                log::info!("Added kiosk launch line to {}", path.display());
            }
        }
        Ok(())
    }

    /// Undo this mechanism. Shared files lose only the kiosk's lines.
    pub fn remove(self, ctx: &Context) -> Result<(), MechanismError> {
        self.check_privilege(ctx, "disable")?;

        match self {
            MechanismKind::DesktopAutostart => {
                // Hidden entries may be masking a system-wide one; leave them.
                for (path, entry) in kiosk_desktop_entries(ctx)? {
                    if !entry.is_active() {
                        continue;
                    }
                    if shared_file::remove_file(&path).map_err(|e| MechanismError::write(&path, e))? {
                        log::info!("Removed autostart entry {}", path.display());
                    }
                }
            }
            MechanismKind::UserService => remove_unit(
                &ctx.user_unit_path(),
                &ctx.unit_name,
                ctx.user_services.as_ref(),
            )?,
            MechanismKind::ShellRc => remove_matching_lines(&ctx.shell_rc_path(), &ctx.launch)?,
            MechanismKind::ScheduledTask => {
                let table = ctx.cron.read().map_err(MechanismError::Command)?;
                let (table, removed) =
                    shared_file::remove_lines(&table, |l| ctx.launch.matches_line(l));
                if removed > 0 {
                    ctx.cron.write(&table).map_err(MechanismError::Command)?;
                    log::info!("Removed {} kiosk line(s) from crontab", removed);
                }
            }
            MechanismKind::SessionScript => {
                remove_matching_lines(&ctx.session_script_path(), &ctx.launch)?
            }
            MechanismKind::SystemService => remove_unit(
                &ctx.system_unit_path(),
                &ctx.unit_name,
                ctx.system_services.as_ref(),
            )?,
            MechanismKind::InitScript => remove_matching_lines(&ctx.rc_local_path(), &ctx.launch)?,
        }
        Ok(())
    }

    fn service_manager(self, ctx: &Context) -> Option<&dyn ServiceManager> {
        match self {
            MechanismKind::UserService => Some(ctx.user_services.as_ref()),
            MechanismKind::SystemService => Some(ctx.system_services.as_ref()),
            _ => None,
        }
    }

    /// Whether this mechanism's unit is running now. Always false for
    /// mechanisms that are not service units.
    pub fn service_running(self, ctx: &Context) -> Result<bool, ProbeError> {
        match self.service_manager(ctx) {
            Some(services) => services
                .is_active(&ctx.unit_name)
                .map_err(ProbeError::Command),
            None => Ok(false),
        }
    }

    /// Stop the kiosk through the service manager. A unit with
    /// `Restart=on-failure` would respawn after a plain signal.
    pub fn stop_service(self, ctx: &Context) -> Result<(), MechanismError> {
        let Some(services) = self.service_manager(ctx) else {
            return Ok(());
        };
        self.check_privilege(ctx, "stop")?;
        services.stop(&ctx.unit_name).map_err(MechanismError::Command)
    }

    pub fn start_service(self, ctx: &Context) -> Result<(), MechanismError> {
        let Some(services) = self.service_manager(ctx) else {
            return Ok(());
        };
        self.check_privilege(ctx, "start")?;
        services.start(&ctx.unit_name).map_err(MechanismError::Command)
    }

    fn check_privilege(self, ctx: &Context, verb: &str) -> Result<(), MechanismError> {
        if self.scope() == Scope::System && !ctx.elevated {
            return Err(MechanismError::RequiresPrivilege {
                hint: self.privilege_hint(ctx, verb),
            });
        }
        Ok(())
    }

    /// The command an administrator should run by hand.
    pub fn privilege_hint(self, ctx: &Context, verb: &str) -> String {
        match (self, verb) {
            (MechanismKind::SystemService, "disable") => format!(
                "sudo systemctl disable {} && sudo rm {}",
                ctx.unit_name,
                ctx.system_unit_path().display()
            ),
            (MechanismKind::SystemService, "stop" | "start") => {
                format!("sudo systemctl {} {}", verb, ctx.unit_name)
            }
            (MechanismKind::InitScript, "disable") => format!(
                "sudo sed -i '/{}/d' {}",
                sed_escape(&ctx.launch.match_pattern),
                ctx.rc_local_path().display()
            ),
            _ => format!("sudo kiosk-autostart {} --mechanism {}", verb, self),
        }
    }
}

/// Every `*.desktop` in the autostart directory that launches the kiosk,
/// whatever it is called.
fn kiosk_desktop_entries(ctx: &Context) -> Result<Vec<(PathBuf, AutostartEntry)>, ProbeError> {
    let dir = ctx.autostart_dir();
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(ProbeError::Read { path: dir, source }),
    };

    let mut found = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("desktop") {
            continue;
        }
        let Some(content) = shared_file::read_optional(&path)? else {
            continue;
        };
        let parsed = AutostartEntry::parse(&content);
        if parsed.launches(&ctx.launch) {
            found.push((path, parsed));
        }
    }
    found.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(found)
}

fn probe_desktop_entry(ctx: &Context) -> Result<Probe, ProbeError> {
    let entries = kiosk_desktop_entries(ctx)?;
    let active: Vec<String> = entries
        .iter()
        .filter(|(_, entry)| entry.is_active())
        .map(|(path, entry)| match &entry.name {
            Some(name) => format!("{} ({})", path.display(), name),
            None => path.display().to_string(),
        })
        .collect();

    if !active.is_empty() {
        return Ok(Probe::enabled(active.join(", ")));
    }
    match entries.first() {
        Some((path, _)) => Ok(Probe::disabled_because(format!(
            "{} is hidden or disabled",
            path.display()
        ))),
        None => Ok(Probe::disabled()),
    }
}

fn probe_unit(
    path: &Path,
    unit: &str,
    services: &dyn ServiceManager,
) -> Result<Probe, ProbeError> {
    if shared_file::read_optional(path)?.is_none() {
        return Ok(Probe::disabled());
    }
    if services.is_enabled(unit).map_err(ProbeError::Command)? {
        let detail = match services.is_active(unit) {
            Ok(true) => format!("{} (running)", path.display()),
            Ok(false) => format!("{} (not running)", path.display()),
            Err(e) => {
                log::debug!("is-active {} failed: {}", unit, e);
                path.display().to_string()
            }
        };
        Ok(Probe::enabled(detail))
    } else {
        Ok(Probe::disabled_because(format!(
            "{} present but not enabled",
            path.display()
        )))
    }
}

fn probe_shared_file(path: &Path, launch: &LaunchSpec) -> Result<Probe, ProbeError> {
    match shared_file::read_optional(path)? {
        Some(content) => Ok(probe_lines(&content, launch, &path.display().to_string())),
        None => Ok(Probe::disabled()),
    }
}

fn probe_lines(content: &str, launch: &LaunchSpec, source: &str) -> Probe {
    match shared_file::find_line(content, |l| launch.matches_line(l)) {
        Some(line) => Probe::enabled(format!("{}: {}", source, line.trim())),
        None => Probe::disabled(),
    }
}

fn render_unit(launch: &LaunchSpec, user: Option<&str>, target: &str) -> String {
    SERVICE_UNIT
        .replace("{marker}", &launch.marker)
        .replace("{user}", user.unwrap_or(""))
        .replace("{path}", &launch.working_dir.to_string_lossy())
        .replace("{exec}", &launch.command)
        .replace("{target}", target)
}

fn install_unit(
    path: &Path,
    content: &str,
    unit: &str,
    services: &dyn ServiceManager,
) -> Result<(), MechanismError> {
    shared_file::write_atomic(path, content, Some(0o644))
        .map_err(|e| MechanismError::write(path, e))?;
    log::info!("Wrote unit file {}", path.display());

    services.daemon_reload().map_err(MechanismError::Command)?;
    if services.is_available() {
        services.enable(unit).map_err(MechanismError::Command)?;
    } else {
        link_wants(path, "default.target")?;
    }
    Ok(())
}

fn remove_unit(
    path: &Path,
    unit: &str,
    services: &dyn ServiceManager,
) -> Result<(), MechanismError> {
    if services.is_available() {
        services.disable(unit).map_err(MechanismError::Command)?;
    } else {
        unlink_wants(path)?;
    }

    if shared_file::remove_file(path).map_err(|e| MechanismError::write(path, e))? {
        log::info!("Removed unit file {}", path.display());
    }
    if let Err(e) = services.daemon_reload() {
        log::warn!("daemon-reload after removing {} failed: {}", unit, e);
    }
    Ok(())
}

/// What `systemctl enable` would do, for when systemd isn't running.
fn link_wants(unit_path: &Path, target: &str) -> Result<(), MechanismError> {
    let (Some(dir), Some(name)) = (unit_path.parent(), unit_path.file_name()) else {
        return Ok(());
    };
    let wants = dir.join(format!("{}.wants", target));
    std::fs::create_dir_all(&wants).map_err(|e| MechanismError::write(&wants, e))?;
    let link = wants.join(name);
    if link.symlink_metadata().is_err() {
        std::os::unix::fs::symlink(unit_path, &link)
            .map_err(|e| MechanismError::write(&link, e))?;
    }
    Ok(())
}

fn unlink_wants(unit_path: &Path) -> Result<(), MechanismError> {
    let (Some(dir), Some(name)) = (unit_path.parent(), unit_path.file_name()) else {
        return Ok(());
    };
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Ok(());
    };
    for entry in entries.flatten() {
        if !entry.file_name().to_string_lossy().ends_with(".wants") {
            continue;
        }
        let link = entry.path().join(name);
        shared_file::remove_file(&link).map_err(|e| MechanismError::write(&link, e))?;
    }
    Ok(())
}

/// Swap any existing kiosk line(s) in a shared file for `line`.
fn replace_line(
    path: &Path,
    launch: &LaunchSpec,
    line: &str,
    seed: Option<&str>,
) -> Result<(), MechanismError> {
    let content = match shared_file::read_optional(path)? {
        Some(content) => content,
        None => seed.unwrap_or_default().to_string(),
    };
    let (content, _) = shared_file::remove_lines(&content, |l| launch.matches_line(l));
    let content = shared_file::append_line(&content, line);
    shared_file::write_atomic(path, &content, None).map_err(|e| MechanismError::write(path, e))?;
    log::info!("Added kiosk launch line to {}", path.display());
    Ok(())
}

fn remove_matching_lines(path: &Path, launch: &LaunchSpec) -> Result<(), MechanismError> {
    let Some(content) = shared_file::read_optional(path)? else {
        return Ok(());
    };
    let (content, removed) = shared_file::remove_lines(&content, |l| launch.matches_line(l));
    if removed > 0 {
        shared_file::write_atomic(path, &content, None)
            .map_err(|e| MechanismError::write(path, e))?;
        log::info!("Removed {} kiosk line(s) from {}", removed, path.display());
    }
    Ok(())
}

/// Starts the kiosk from an interactive shell once a display is up, unless
/// it is already running.
fn rc_snippet(launch: &LaunchSpec) -> String {
    let guard = if launch.match_pattern.is_empty() {
        String::new()
    } else {
        format!(" && ! pgrep -f '{}' >/dev/null", launch.match_pattern)
    };
    format!(
        "if [ -n \"$DISPLAY\" ]{}; then ({} >/dev/null 2>&1 &); fi",
        guard,
        launch.shell_command()
    )
}

fn sed_escape(s: &str) -> String {
    s.chars()
        .flat_map(|c| match c {
            '/' | '.' | '*' | '[' | ']' | '\\' | '^' | '$' => vec!['\\', c],
            _ => vec![c],
        })
        .collect()
}
