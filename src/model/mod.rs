mod launch_spec;
mod mechanism;

pub use launch_spec::LaunchSpec;
pub use mechanism::{MechanismKind, MechanismStatus, ProbeState, Scope, UnknownMechanism};
