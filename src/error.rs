use std::path::PathBuf;

use crate::model::MechanismKind;

/// A probe could not decide whether a mechanism is configured.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Command(String),
}

#[derive(Debug, thiserror::Error)]
pub enum MechanismError {
    #[error("requires elevated privilege; run manually: {hint}")]
    RequiresPrivilege { hint: String },

    #[error("cannot write {}: {}", .path.display(), describe_io(.source))]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("{0}")]
    Command(String),
}

impl MechanismError {
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MechanismError::Write {
            path: path.into(),
            source,
        }
    }
}

/// Non-fatal conditions collected while scanning or removing.
#[derive(Debug, thiserror::Error)]
pub enum RegistrarIssue {
    #[error("{mechanism}: state unknown ({reason})")]
    ProbeUncertain {
        mechanism: MechanismKind,
        reason: String,
    },

    #[error("{mechanism}: active but needs elevated privilege to remove; run manually: {hint}")]
    RemovalRequiresPrivilege {
        mechanism: MechanismKind,
        hint: String,
    },

    #[error("{mechanism}: removal failed: {source}")]
    RemovalFailed {
        mechanism: MechanismKind,
        #[source]
        source: MechanismError,
    },
}

impl RegistrarIssue {
    pub fn mechanism(&self) -> MechanismKind {
        match self {
            RegistrarIssue::ProbeUncertain { mechanism, .. }
            | RegistrarIssue::RemovalRequiresPrivilege { mechanism, .. }
            | RegistrarIssue::RemovalFailed { mechanism, .. } => *mechanism,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistrarError {
    /// Everything was disabled but the preferred mechanism did not install.
    /// Nothing is active now; retry `enable`.
    #[error("could not install {mechanism}: {source}")]
    InstallFailed {
        mechanism: MechanismKind,
        #[source]
        source: MechanismError,
        issues: Vec<RegistrarIssue>,
    },

    #[error("expected only {expected} to be active, found [{}]", join(.active))]
    PostconditionViolated {
        expected: MechanismKind,
        active: Vec<MechanismKind>,
        issues: Vec<RegistrarIssue>,
    },
}

impl RegistrarError {
    pub fn issues(&self) -> &[RegistrarIssue] {
        match self {
            RegistrarError::InstallFailed { issues, .. }
            | RegistrarError::PostconditionViolated { issues, .. } => issues,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot determine home directory")]
    NoHome,

    #[error("cannot look up account {name}: {reason}")]
    UnknownUser { name: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("{} is not a git checkout", .0.display())]
    NotARepository(PathBuf),

    #[error("failed to run git: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },
}

fn join(kinds: &[MechanismKind]) -> String {
    kinds
        .iter()
        .map(|k| k.name())
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe_io(e: &std::io::Error) -> String {
    if e.kind() == std::io::ErrorKind::ReadOnlyFilesystem {
        "filesystem is read-only (immutable distro?)".to_string()
    } else {
        e.to_string()
    }
}
