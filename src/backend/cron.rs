use std::io::Write;
use std::process::{Command, Stdio};

/// A user's scheduled-task table, read and written as a whole.
pub trait CronTable {
    fn read(&self) -> Result<String, String>;
    fn write(&self, content: &str) -> Result<(), String>;
}

/// A table via the `crontab` command: the caller's own, or `user`'s
/// (`crontab -u`, root only).
pub struct Crontab {
    user: Option<String>,
}

impl Crontab {
    pub fn new(user: Option<String>) -> Self {
        Self { user }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("crontab");
        if let Some(user) = &self.user {
            cmd.arg("-u").arg(user);
        }
        cmd
    }
}

impl CronTable for Crontab {
    fn read(&self) -> Result<String, String> {
        let output = match self.command().arg("-l").output() {
            Ok(o) => o,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("crontab not installed, treating table as empty");
                return Ok(String::new());
            }
            Err(e) => return Err(format!("Failed to run crontab -l: {}", e)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("no crontab for") {
                return Ok(String::new());
            }
            return Err(format!("crontab -l failed: {}", stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn write(&self, content: &str) -> Result<(), String> {
        let mut child = self
            .command()
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("Failed to run crontab: {}", e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(content.as_bytes())
                .map_err(|e| format!("Failed to write crontab: {}", e))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| format!("Failed to wait for crontab: {}", e))?;
        if !output.status.success() {
            return Err(format!(
                "crontab - failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        log::info!("Installed new crontab ({} bytes)", content.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_of_another_user_uses_dash_u() {
        let cmd = Crontab::new(Some("pi".into())).command();
        let args: Vec<_> = cmd.get_args().collect();
        assert_eq!(args, ["-u", "pi"]);
        assert_eq!(Crontab::new(None).command().get_args().count(), 0);
    }
}
