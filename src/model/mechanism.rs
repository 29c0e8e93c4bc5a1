use std::str::FromStr;

/// One way of registering the kiosk to launch automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MechanismKind {
    DesktopAutostart,
    UserService,
    ShellRc,
    ScheduledTask,
    SessionScript,
    SystemService,
    InitScript,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    User,
    /// Touches files outside the user's home directory.
    System,
}

impl MechanismKind {
    pub const ALL: [MechanismKind; 7] = [
        MechanismKind::DesktopAutostart,
        MechanismKind::UserService,
        MechanismKind::ShellRc,
        MechanismKind::ScheduledTask,
        MechanismKind::SessionScript,
        MechanismKind::SystemService,
        MechanismKind::InitScript,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MechanismKind::DesktopAutostart => "desktop-autostart-entry",
            MechanismKind::UserService => "user-service-unit",
            MechanismKind::ShellRc => "shell-rc-snippet",
            MechanismKind::ScheduledTask => "scheduled-task-entry",
            MechanismKind::SessionScript => "legacy-session-script",
            MechanismKind::SystemService => "system-service-unit",
            MechanismKind::InitScript => "system-init-script",
        }
    }

    pub fn scope(self) -> Scope {
        match self {
            MechanismKind::SystemService | MechanismKind::InitScript => Scope::System,
            _ => Scope::User,
        }
    }
}

impl std::fmt::Display for MechanismKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMechanism(pub String);

impl std::fmt::Display for UnknownMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = MechanismKind::ALL.iter().map(|k| k.name()).collect();
        write!(f, "unknown mechanism '{}' (expected one of: {})", self.0, names.join(", "))
    }
}

impl std::error::Error for UnknownMechanism {}

impl FromStr for MechanismKind {
    type Err = UnknownMechanism;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MechanismKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| UnknownMechanism(s.to_string()))
    }
}

/// Result of a read-only probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeState {
    Enabled,
    Disabled,
    Unknown(String),
}

impl std::fmt::Display for ProbeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeState::Enabled => write!(f, "enabled"),
            ProbeState::Disabled => write!(f, "disabled"),
            ProbeState::Unknown(_) => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MechanismStatus {
    pub kind: MechanismKind,
    pub state: ProbeState,
    pub detail: Option<String>,
}

impl MechanismStatus {
    pub fn is_enabled(&self) -> bool {
        self.state == ProbeState::Enabled
    }
}
