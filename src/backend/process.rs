use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use crate::model::LaunchSpec;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
pub struct StopReport {
    /// Exited after SIGTERM.
    pub terminated: Vec<i32>,
    /// Needed SIGKILL.
    pub killed: Vec<i32>,
    pub failed: Vec<(i32, String)>,
}

/// PIDs whose command line contains `pattern`, excluding ourselves.
pub fn running_instances(pattern: &str) -> Vec<i32> {
    if pattern.is_empty() {
        return Vec::new();
    }
    let own_pid = std::process::id() as i32;

    let all = match procfs::process::all_processes() {
        Ok(all) => all,
        Err(e) => {
            log::warn!("Failed to list processes: {}", e);
            return Vec::new();
        }
    };

    let mut pids: Vec<i32> = all
        .flatten()
        .filter(|p| p.pid() != own_pid)
        .filter(|p| {
            // Kernel threads and processes we may not inspect have no cmdline.
            p.cmdline()
                .map(|args| cmdline_matches(&args, pattern))
                .unwrap_or(false)
        })
        .map(|p| p.pid())
        .collect();
    pids.sort_unstable();
    pids
}

fn cmdline_matches(args: &[String], pattern: &str) -> bool {
    !args.is_empty() && args.join(" ").contains(pattern)
}

/// SIGTERM every instance, wait up to `grace`, then SIGKILL what is left.
pub fn stop_running_instances(pattern: &str, grace: Duration) -> StopReport {
    let mut report = StopReport::default();
    let mut pending = Vec::new();

    for pid in running_instances(pattern) {
        match signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) => {
                log::info!("Sent SIGTERM to {}", pid);
                pending.push(pid);
            }
            Err(Errno::ESRCH) => report.terminated.push(pid),
            Err(e) => report.failed.push((pid, format!("SIGTERM: {}", e))),
        }
    }

    let deadline = Instant::now() + grace;
    while !pending.is_empty() && Instant::now() < deadline {
        std::thread::sleep(POLL_INTERVAL);
        pending.retain(|&pid| {
            if is_alive(pid) {
                true
            } else {
                report.terminated.push(pid);
                false
            }
        });
    }

    for pid in pending {
        match signal::kill(Pid::from_raw(pid), Signal::SIGKILL) {
            Ok(()) => {
                log::warn!("{} ignored SIGTERM, sent SIGKILL", pid);
                report.killed.push(pid);
            }
            Err(Errno::ESRCH) => report.terminated.push(pid),
            Err(e) => report.failed.push((pid, format!("SIGKILL: {}", e))),
        }
    }

    report
}

/// Zombies count as gone: they have exited and only wait for their parent.
fn is_alive(pid: i32) -> bool {
    procfs::process::Process::new(pid)
        .and_then(|p| p.stat())
        .map(|stat| stat.state != 'Z')
        .unwrap_or(false)
}

/// Start the kiosk in its own session so it outlives this command.
pub fn launch_detached(launch: &LaunchSpec) -> Result<u32, String> {
    use std::os::unix::process::CommandExt;

    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c")
        .arg(format!("exec {}", launch.command))
        .current_dir(&launch.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if std::env::var_os("DISPLAY").is_none() {
        cmd.env("DISPLAY", ":0");
    }

    let child = unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        })
        .spawn()
        .map_err(|e| format!("Failed to start {}: {}", launch.command, e))?
    };

    log::info!("Launched kiosk (PID {})", child.id());
    Ok(child.id())
}
