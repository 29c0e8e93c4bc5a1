mod app;
mod backend;
mod config;
mod error;
mod model;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::model::MechanismKind;

#[derive(Parser)]
#[command(
    name = "kiosk-autostart",
    version,
    about = "Manage how the Office Kiosk starts, stops and updates"
)]
struct Cli {
    /// Config file (default: ~/.config/office-kiosk/autostart.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration file
    Init,
    /// Show which autostart mechanisms are active and what is running
    Status,
    /// Make exactly one mechanism launch the kiosk
    Enable {
        /// Mechanism to use (default from config: desktop-autostart-entry)
        #[arg(long, short)]
        mechanism: Option<MechanismKind>,
    },
    /// Remove every autostart registration
    Disable,
    /// Stop running kiosk instances
    Stop {
        /// Seconds to wait after SIGTERM before SIGKILL
        #[arg(long)]
        grace_secs: Option<u64>,
    },
    /// Stop running instances and start a fresh one
    Restart,
    /// Check for and apply updates to the kiosk checkout
    Update {
        /// Pull even if auto_update_apply is off
        #[arg(long)]
        apply: bool,
        /// Restart the kiosk after a successful update
        #[arg(long)]
        restart: bool,
    },
    /// Print version information
    Version,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    let code = match cli.command {
        Commands::Init => app::init(&config_path),
        Commands::Version => {
            println!("kiosk-autostart {}", env!("CARGO_PKG_VERSION"));
            0
        }
        command => match app::KioskApp::new(&config_path) {
            Ok(app) => run(&app, command),
            Err(e) => {
                eprintln!("Error: {e}");
                2
            }
        },
    };
    std::process::exit(code);
}

fn run(app: &app::KioskApp, command: Commands) -> i32 {
    match command {
        Commands::Status => app.status(),
        Commands::Enable { mechanism } => app.enable(mechanism),
        Commands::Disable => app.disable(),
        Commands::Stop { grace_secs } => app.stop(grace_secs),
        Commands::Restart => app.restart(),
        Commands::Update { apply, restart } => app.update(apply, restart),
        Commands::Init | Commands::Version => 0,
    }
}
