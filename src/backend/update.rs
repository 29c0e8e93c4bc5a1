//! Self-update of the kiosk checkout by pulling from its upstream branch.

use std::path::Path;
use std::process::Command;

use crate::error::UpdateError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateStatus {
    pub current: String,
    pub upstream: String,
    /// Commits on the upstream branch not yet in HEAD.
    pub behind: u32,
}

impl UpdateStatus {
    pub fn is_up_to_date(&self) -> bool {
        self.behind == 0
    }
}

fn git(repo: &Path, args: &[&str]) -> Result<String, UpdateError> {
    let output = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(args)
        .output()
        .map_err(UpdateError::Spawn)?;

    if !output.status.success() {
        return Err(UpdateError::Git {
            command: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn ensure_repository(repo: &Path) -> Result<(), UpdateError> {
    if repo.join(".git").exists() {
        Ok(())
    } else {
        Err(UpdateError::NotARepository(repo.to_path_buf()))
    }
}

/// Fetch and compare HEAD with its upstream.
pub fn check(repo: &Path) -> Result<UpdateStatus, UpdateError> {
    ensure_repository(repo)?;

    git(repo, &["fetch", "--quiet"])?;
    let current = git(repo, &["rev-parse", "--short", "HEAD"])?;
    let upstream = git(repo, &["rev-parse", "--short", "@{u}"])?;
    let behind = git(repo, &["rev-list", "--count", "HEAD..@{u}"])?;
    let behind = behind.parse().map_err(|_| UpdateError::Git {
        command: "rev-list --count HEAD..@{u}".to_string(),
        stderr: format!("unexpected output '{}'", behind),
    })?;

    log::info!(
        "Checkout at {} is {} commit(s) behind {}",
        current,
        behind,
        upstream
    );
    Ok(UpdateStatus {
        current,
        upstream,
        behind,
    })
}

/// Fast-forward to upstream; refuses to merge local changes.
pub fn apply(repo: &Path) -> Result<String, UpdateError> {
    ensure_repository(repo)?;

    git(repo, &["pull", "--ff-only", "--quiet"])?;
    let head = git(repo, &["rev-parse", "--short", "HEAD"])?;
    log::info!("Updated checkout to {}", head);
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_directory_is_not_a_repository() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            check(dir.path()),
            Err(UpdateError::NotARepository(_))
        ));
        assert!(matches!(
            apply(dir.path()),
            Err(UpdateError::NotARepository(_))
        ));
    }

    #[test]
    fn behind_count_decides_up_to_date() {
        let status = UpdateStatus {
            current: "abc1234".into(),
            upstream: "def5678".into(),
            behind: 2,
        };
        assert!(!status.is_up_to_date());
        assert!(UpdateStatus { behind: 0, ..status }.is_up_to_date());
    }
}
