//! Mount a directory where every write succeeds and nothing is kept.
use std::path::PathBuf;

use clap::Parser;
use tracing::{debug, error};

mod app_config;
mod daemon;
mod term;
mod trc;

use crate::app_config::Config;
use crate::trc::Trc;

#[derive(Parser)]
#[command(
    version,
    about = "A write-only FUSE filesystem that discards everything written to it."
)]
struct Args {
    /// Directory to mount on. Overrides `mount-point` from the configuration file.
    mount_dir: Option<PathBuf>,

    #[arg(
        short,
        long,
        value_parser,
        help = "Optional path to a null-fs config TOML."
    )]
    config_path: Option<PathBuf>,

    /// Log null-fs at debug level.
    #[arg(long)]
    debug: bool,

    /// Log the FUSE session at debug level.
    #[arg(long)]
    debug_fuse: bool,

    /// Run the daemon in the background.
    #[arg(short, long)]
    daemonize: bool,
}

/// Main entry point for the application.
fn main() {
    let args = Args::parse();

    // Errors use eprintln since tracing isn't initialized yet.
    let mut config = Config::load_or_default(args.config_path.as_deref()).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        std::process::exit(1);
    });
    if let Some(mount_dir) = args.mount_dir {
        config.mount_point = mount_dir;
    }
    if let Err(error_messages) = config.validate() {
        eprintln!("Configuration is invalid.");
        for msg in &error_messages {
            eprintln!(" - {msg}");
        }
        std::process::exit(1);
    }

    let mut trc = Trc::default()
        .with_debug(args.debug)
        .with_debug_fuse(args.debug_fuse);
    if args.daemonize {
        trc = trc.daemon();
    }
    if let Err(e) = trc.init() {
        eprintln!(
            "Failed to initialize logging. Without logging, we can't provide any useful error \
             messages, so we have to exit: {e}"
        );
        std::process::exit(1);
    }

    if !args.daemonize {
        if let Err(e) = daemon::spawn(config) {
            error!("Daemon failed: {e}");
            std::process::exit(1);
        }
        return;
    }

    debug!(config = ?config, "Initializing daemon with configuration...");
    // Config.validate() guarantees pid_file has a non-empty parent.
    if let Some(pid_file_parent) = config.daemon.pid_file.parent()
        && let Err(e) = std::fs::create_dir_all(pid_file_parent)
    {
        error!("Failed to create PID file directory: {e}");
        std::process::exit(1);
    }

    let log_file = match config.daemon.open_log_file() {
        Ok(f) => f,
        Err(e) => {
            error!("Failed to open log file: {e}");
            std::process::exit(1);
        }
    };

    let mut daemonize = daemonize::Daemonize::new()
        .pid_file(&config.daemon.pid_file)
        .chown_pid_file(true)
        .user(config.uid)
        .group(config.gid);

    if let Some(file) = log_file {
        match file.try_clone() {
            Ok(clone) => {
                daemonize = daemonize.stdout(file).stderr(clone);
            }
            Err(e) => {
                error!("Failed to clone log file handle: {e}");
                std::process::exit(1);
            }
        }
    }

    match daemonize.start() {
        Ok(()) => {
            if let Err(e) = daemon::spawn(config) {
                error!("Daemon failed: {e}");
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("Failed to spawn the daemon: {e}");
            std::process::exit(1);
        }
    }
}
