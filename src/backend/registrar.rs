//! Keeps at most one autostart mechanism pointed at the kiosk.
//!
//! The registrar holds no state of its own: every call re-probes each
//! mechanism. Non-fatal problems are collected as [`RegistrarIssue`]s so one
//! unreadable or root-owned mechanism never blocks work on the others.

use crate::backend::context::Context;
use crate::backend::process;
use crate::error::{MechanismError, RegistrarError, RegistrarIssue};
use crate::model::{MechanismKind, MechanismStatus, ProbeState};

#[derive(Debug, Default)]
pub struct DisableReport {
    pub removed: Vec<MechanismKind>,
    pub issues: Vec<RegistrarIssue>,
}

impl DisableReport {
    /// True when something that is (or may be) active was left in place.
    pub fn has_leftovers(&self) -> bool {
        self.issues.iter().any(|issue| {
            matches!(
                issue,
                RegistrarIssue::RemovalRequiresPrivilege { .. } | RegistrarIssue::RemovalFailed { .. }
            )
        })
    }
}

#[derive(Debug)]
pub struct EnableReport {
    pub enabled: MechanismKind,
    pub removed: Vec<MechanismKind>,
    pub issues: Vec<RegistrarIssue>,
}

/// Kiosk units stopped through the service manager.
#[derive(Debug, Default)]
pub struct ServiceStopReport {
    pub stopped: Vec<MechanismKind>,
    pub failed: Vec<(MechanismKind, MechanismError)>,
}

pub struct Registrar<'a> {
    ctx: &'a Context,
    mechanisms: Vec<MechanismKind>,
}

impl<'a> Registrar<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self {
            ctx,
            mechanisms: MechanismKind::ALL.to_vec(),
        }
    }

    pub fn status(&self) -> Vec<MechanismStatus> {
        self.mechanisms
            .iter()
            .map(|&kind| match kind.probe(self.ctx) {
                Ok(probe) => MechanismStatus {
                    kind,
                    state: if probe.enabled {
                        ProbeState::Enabled
                    } else {
                        ProbeState::Disabled
                    },
                    detail: probe.detail,
                },
                Err(e) => {
                    log::warn!("Probing {} failed: {}", kind, e);
                    MechanismStatus {
                        kind,
                        state: ProbeState::Unknown(e.to_string()),
                        detail: None,
                    }
                }
            })
            .collect()
    }

    /// Remove every mechanism that currently probes enabled.
    pub fn disable_all(&self) -> DisableReport {
        let mut report = DisableReport::default();

        for status in self.status() {
            match status.state {
                ProbeState::Disabled => continue,
                ProbeState::Unknown(reason) => {
                    report.issues.push(RegistrarIssue::ProbeUncertain {
                        mechanism: status.kind,
                        reason,
                    });
                    continue;
                }
                ProbeState::Enabled => {}
            }

            match status.kind.remove(self.ctx) {
                Ok(()) => {
                    log::info!("Disabled {}", status.kind);
                    report.removed.push(status.kind);
                }
                Err(MechanismError::RequiresPrivilege { hint }) => {
                    log::warn!("{} needs elevated privilege to remove", status.kind);
                    report.issues.push(RegistrarIssue::RemovalRequiresPrivilege {
                        mechanism: status.kind,
                        hint,
                    });
                }
                Err(source) => {
                    log::warn!("Removing {} failed: {}", status.kind, source);
                    report.issues.push(RegistrarIssue::RemovalFailed {
                        mechanism: status.kind,
                        source,
                    });
                }
            }
        }

        report
    }

    /// Disable everything, install `preferred`, and confirm it is the only
    /// active mechanism.
    ///
    /// If the install fails nothing is left active; there is no rollback and
    /// the caller is expected to retry.
    pub fn enable_one(&self, preferred: MechanismKind) -> Result<EnableReport, RegistrarError> {
        let DisableReport { removed, mut issues } = self.disable_all();

        if let Err(source) = preferred.install(self.ctx) {
            log::error!("Installing {} failed: {}", preferred, source);
            return Err(RegistrarError::InstallFailed {
                mechanism: preferred,
                source,
                issues,
            });
        }

        let after = self.status();
        let active: Vec<MechanismKind> = after
            .iter()
            .filter(|s| s.is_enabled())
            .map(|s| s.kind)
            .collect();

        // Anything we still can't see into stays on the issue list.
        for status in after {
            if let ProbeState::Unknown(reason) = status.state {
                if !issues.iter().any(|i| {
                    i.mechanism() == status.kind
                        && matches!(i, RegistrarIssue::ProbeUncertain { .. })
                }) {
                    issues.push(RegistrarIssue::ProbeUncertain {
                        mechanism: status.kind,
                        reason,
                    });
                }
            }
        }

        if active != [preferred] {
            log::error!(
                "After enabling {}, active mechanisms are {:?}",
                preferred,
                active
            );
            return Err(RegistrarError::PostconditionViolated {
                expected: preferred,
                active,
                issues,
            });
        }

        log::info!("Autostart now uses {}", preferred);
        Ok(EnableReport {
            enabled: preferred,
            removed: removed.into_iter().filter(|&k| k != preferred).collect(),
            issues,
        })
    }

    /// Stop every kiosk unit the service manager is running, before any
    /// signals are sent; systemd would otherwise restart it.
    pub fn stop_services(&self) -> ServiceStopReport {
        let mut report = ServiceStopReport::default();
        for &kind in &self.mechanisms {
            match kind.service_running(self.ctx) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    log::debug!("Cannot tell whether {} is running: {}", kind, e);
                    continue;
                }
            }
            match kind.stop_service(self.ctx) {
                Ok(()) => {
                    log::info!("Stopped {} through the service manager", kind);
                    report.stopped.push(kind);
                }
                Err(e) => report.failed.push((kind, e)),
            }
        }
        report
    }

    /// Start the kiosk through the first enabled unit mechanism. `None` when
    /// no unit is enabled and the caller should launch it directly.
    pub fn start_service(&self) -> Option<Result<MechanismKind, MechanismError>> {
        let kind = self
            .status()
            .into_iter()
            .filter(|s| s.is_enabled())
            .map(|s| s.kind)
            .find(|kind| matches!(kind, MechanismKind::UserService | MechanismKind::SystemService))?;
        Some(kind.start_service(self.ctx).map(|()| kind))
    }

    /// Kiosk processes running right now. Diagnostic only; autostart state
    /// says nothing about what is already running.
    pub fn running_instances(&self) -> Vec<i32> {
        process::running_instances(&self.ctx.launch.match_pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::context::testing::Sandbox;
    use crate::backend::cron::fake::FakeCron;
    use crate::backend::services::fake::FakeServices;
    use crate::model::Scope;
    use std::fs;

    fn enabled(registrar: &Registrar) -> Vec<MechanismKind> {
        registrar
            .status()
            .into_iter()
            .filter(|s| s.is_enabled())
            .map(|s| s.kind)
            .collect()
    }

    #[test]
    fn disable_all_with_nothing_enabled_is_a_noop() {
        let sb = Sandbox::new();
        let registrar = Registrar::new(&sb.ctx);
        let report = registrar.disable_all();
        assert!(report.removed.is_empty());
        assert!(report.issues.is_empty());
    }

    #[test]
    fn status_reports_every_mechanism() {
        let sb = Sandbox::new();
        let status = Registrar::new(&sb.ctx).status();
        let kinds: Vec<_> = status.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, MechanismKind::ALL.to_vec());
        assert!(status.iter().all(|s| s.state == ProbeState::Disabled));
    }

    #[test]
    fn three_enabled_then_disable_then_enable_one() {
        let sb = Sandbox::new();
        MechanismKind::DesktopAutostart.install(&sb.ctx).unwrap();
        MechanismKind::UserService.install(&sb.ctx).unwrap();
        MechanismKind::ShellRc.install(&sb.ctx).unwrap();

        let registrar = Registrar::new(&sb.ctx);
        assert_eq!(
            enabled(&registrar),
            vec![
                MechanismKind::DesktopAutostart,
                MechanismKind::UserService,
                MechanismKind::ShellRc
            ]
        );

        let report = registrar.disable_all();
        assert_eq!(report.removed.len(), 3);
        assert!(report.issues.is_empty());
        assert!(enabled(&registrar).is_empty());

        let report = registrar.enable_one(MechanismKind::DesktopAutostart).unwrap();
        assert_eq!(report.enabled, MechanismKind::DesktopAutostart);
        assert_eq!(enabled(&registrar), vec![MechanismKind::DesktopAutostart]);
    }

    /// Everything a user-scope mechanism can leave behind.
    fn user_footprint(sb: &Sandbox) -> Vec<Option<String>> {
        let ctx = &sb.ctx;
        let mut files: Vec<_> = [
            ctx.desktop_entry_path(),
            ctx.user_unit_path(),
            ctx.shell_rc_path(),
            ctx.session_script_path(),
        ]
        .iter()
        .map(|path| fs::read_to_string(path).ok())
        .collect();
        files.push(ctx.cron.read().ok());
        files
    }

    #[test]
    fn enable_one_is_idempotent() {
        for kind in MechanismKind::ALL {
            if kind.scope() == Scope::System {
                continue;
            }
            let sb = Sandbox::new();
            let registrar = Registrar::new(&sb.ctx);

            registrar.enable_one(kind).unwrap();
            let once = registrar.status();
            let footprint = user_footprint(&sb);

            let report = registrar.enable_one(kind).unwrap();
            assert!(report.removed.is_empty(), "{}", kind);
            assert_eq!(registrar.status(), once, "{}", kind);
            assert_eq!(user_footprint(&sb), footprint, "{}", kind);
        }
    }

    #[test]
    fn legacy_desktop_entry_under_other_name_is_disabled() {
        let sb = Sandbox::new();
        let legacy = sb.ctx.autostart_dir().join("kiosk.desktop");
        fs::create_dir_all(legacy.parent().unwrap()).unwrap();
        fs::write(
            &legacy,
            "[Desktop Entry]\nType=Application\nExec=python3 /home/pi/office-kiosk/kiosk_browser.py\n",
        )
        .unwrap();

        let registrar = Registrar::new(&sb.ctx);
        let report = registrar.enable_one(MechanismKind::UserService).unwrap();
        assert_eq!(report.removed, vec![MechanismKind::DesktopAutostart]);
        assert!(!legacy.exists());
        assert_eq!(enabled(&registrar), vec![MechanismKind::UserService]);
    }

    #[test]
    fn running_unit_is_stopped_and_restarted_through_manager() {
        let sb = Sandbox::new();
        let registrar = Registrar::new(&sb.ctx);
        assert!(registrar.start_service().is_none());

        registrar.enable_one(MechanismKind::UserService).unwrap();
        assert_eq!(
            registrar.start_service().unwrap().unwrap(),
            MechanismKind::UserService
        );

        let report = registrar.stop_services();
        assert_eq!(report.stopped, vec![MechanismKind::UserService]);
        assert!(report.failed.is_empty());
        assert!(!MechanismKind::UserService.service_running(&sb.ctx).unwrap());
        assert!(registrar.stop_services().stopped.is_empty());
    }

    #[test]
    fn enable_one_switches_mechanism() {
        let sb = Sandbox::new();
        let registrar = Registrar::new(&sb.ctx);

        registrar.enable_one(MechanismKind::DesktopAutostart).unwrap();
        let report = registrar.enable_one(MechanismKind::UserService).unwrap();
        assert_eq!(report.removed, vec![MechanismKind::DesktopAutostart]);
        assert_eq!(enabled(&registrar), vec![MechanismKind::UserService]);
        assert!(!sb.ctx.desktop_entry_path().exists());
    }

    #[test]
    fn root_owned_entry_is_reported_and_others_still_removed() {
        let sb = Sandbox::new();
        let rc_local = sb.ctx.rc_local_path();
        fs::create_dir_all(rc_local.parent().unwrap()).unwrap();
        fs::write(&rc_local, "python3 /home/pi/office-kiosk/kiosk_browser.py &\nexit 0\n").unwrap();
        MechanismKind::DesktopAutostart.install(&sb.ctx).unwrap();

        let registrar = Registrar::new(&sb.ctx);
        let report = registrar.disable_all();
        assert_eq!(report.removed, vec![MechanismKind::DesktopAutostart]);
        assert_eq!(report.issues.len(), 1);
        assert!(matches!(
            &report.issues[0],
            RegistrarIssue::RemovalRequiresPrivilege {
                mechanism: MechanismKind::InitScript,
                ..
            }
        ));
        assert!(report.has_leftovers());
    }

    #[test]
    fn unremovable_entry_violates_postcondition() {
        let sb = Sandbox::new();
        let rc_local = sb.ctx.rc_local_path();
        fs::create_dir_all(rc_local.parent().unwrap()).unwrap();
        fs::write(&rc_local, "python3 /home/pi/office-kiosk/kiosk_browser.py &\nexit 0\n").unwrap();

        let registrar = Registrar::new(&sb.ctx);
        let err = registrar.enable_one(MechanismKind::DesktopAutostart).unwrap_err();
        match err {
            RegistrarError::PostconditionViolated {
                expected,
                active,
                issues,
            } => {
                assert_eq!(expected, MechanismKind::DesktopAutostart);
                assert_eq!(
                    active,
                    vec![MechanismKind::DesktopAutostart, MechanismKind::InitScript]
                );
                assert_eq!(issues.len(), 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_probe_does_not_abort_scan() {
        let cron = FakeCron {
            fail_reads: true,
            ..FakeCron::default()
        };
        let sb = Sandbox::with(FakeServices::default(), FakeServices::default(), cron);
        MechanismKind::ShellRc.install(&sb.ctx).unwrap();

        let registrar = Registrar::new(&sb.ctx);
        let status = registrar.status();
        let cron_status = status
            .iter()
            .find(|s| s.kind == MechanismKind::ScheduledTask)
            .unwrap();
        assert!(matches!(cron_status.state, ProbeState::Unknown(_)));
        assert_eq!(enabled(&registrar), vec![MechanismKind::ShellRc]);

        let report = registrar.disable_all();
        assert_eq!(report.removed, vec![MechanismKind::ShellRc]);
        assert!(matches!(
            &report.issues[0],
            RegistrarIssue::ProbeUncertain {
                mechanism: MechanismKind::ScheduledTask,
                ..
            }
        ));
        assert!(!report.has_leftovers());
    }

    #[test]
    fn install_failure_leaves_nothing_active() {
        let sb = Sandbox::new();
        MechanismKind::ShellRc.install(&sb.ctx).unwrap();
        // A regular file where the autostart directory should be.
        let config_dir = sb.ctx.home.join(".config");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join("autostart"), "not a directory").unwrap();

        let registrar = Registrar::new(&sb.ctx);
        let err = registrar.enable_one(MechanismKind::DesktopAutostart).unwrap_err();
        assert!(matches!(
            err,
            RegistrarError::InstallFailed {
                mechanism: MechanismKind::DesktopAutostart,
                ..
            }
        ));
        assert!(enabled(&registrar).is_empty());
    }
}
