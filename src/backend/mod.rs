mod context;
mod cron;
mod desktop_entry;
mod mechanisms;
mod process;
mod registrar;
mod services;
mod shared_file;
pub mod update;

pub use context::Context;
#[cfg(test)]
pub use context::testing;
pub use process::{launch_detached, stop_running_instances};
pub use registrar::Registrar;
