// Evmaprs CLI
// Foreground daemon plus control-socket client commands

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};

use evmaprs_core::event::{query, send_request, Request};
use evmaprs_core::{list_devices, DeviceConfig, DeviceInfo, Settings, Supervisor};

/// How long client commands wait for the daemon to answer
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// Map input device events to key presses and commands
#[derive(Parser, Debug)]
#[command(name = "evmaprs")]
#[command(version)]
#[command(about = "Map input device events to key presses and commands", long_about = None)]
#[command(group(
    ArgGroup::new("mode")
        .args(["list_devices", "check_config", "configure", "list_handled", "rescan"])
))]
struct Args {
    /// TOML settings file
    #[arg(short, long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// List available input devices
    #[arg(long)]
    list_devices: bool,

    /// Validate a device configuration file and exit
    #[arg(long, value_name = "FILE")]
    check_config: Option<PathBuf>,

    /// Ask the running daemon to reconfigure DEVICE
    #[arg(long, value_name = "DEVICE")]
    configure: Option<PathBuf>,

    /// Configuration file for --configure (default configuration if omitted)
    #[arg(long, value_name = "NAME", requires = "configure")]
    file: Option<String>,

    /// List devices handled by the running daemon
    #[arg(long)]
    list_handled: bool,

    /// Ask the running daemon to rescan input devices
    #[arg(long)]
    rescan: bool,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

fn load_settings(args: &Args) -> Result<Settings> {
    match &args.settings {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("cannot load settings from {}", path.display())),
        None => Settings::load_default().context("cannot load settings"),
    }
}

fn print_devices(devices: &[DeviceInfo]) {
    for device in devices {
        println!("{}\t{}", device.path.display(), device.name);
    }
}

fn check_config(path: &Path) -> Result<()> {
    let config = DeviceConfig::from_json_path(path)?;
    println!(
        "{}: {} element(s), {} action(s){}",
        path.display(),
        config.elements.len(),
        config.actions.len(),
        if config.wants_grab() { ", grabs the device" } else { "" }
    );
    Ok(())
}

fn list_handled(settings: &Settings) -> Result<()> {
    let reply = query(&settings.control_socket, &Request::List, REPLY_TIMEOUT)
        .context("is the daemon running?")?;
    let devices: Vec<DeviceInfo> =
        serde_json::from_slice(&reply).context("unexpected reply from the daemon")?;
    print_devices(&devices);
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    if args.list_devices {
        print_devices(&list_devices());
        return Ok(());
    }
    if let Some(path) = &args.check_config {
        return check_config(path);
    }

    let settings = load_settings(&args)?;
    log::debug!("{:?}", settings);

    if let Some(device) = &args.configure {
        let request = Request::Config {
            device: device.clone(),
            file: args.file.clone(),
        };
        return send_request(&settings.control_socket, &request).context("is the daemon running?");
    }
    if args.list_handled {
        return list_handled(&settings);
    }
    if args.rescan {
        return send_request(&settings.control_socket, &Request::Rescan)
            .context("is the daemon running?");
    }

    Supervisor::new(settings).run()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_default_runs_daemon() {
        let args = Args::parse_from(["evmaprs"]);
        assert!(args.settings.is_none());
        assert!(!args.verbose);
        assert!(!args.list_devices);
        assert!(args.configure.is_none());
    }

    #[test]
    fn test_args_with_options() {
        let args = Args::parse_from(["evmaprs", "--settings", "/tmp/settings.toml", "-v"]);
        assert_eq!(args.settings, Some(PathBuf::from("/tmp/settings.toml")));
        assert!(args.verbose);
    }

    #[test]
    fn test_args_configure() {
        let args = Args::parse_from([
            "evmaprs",
            "--configure",
            "/dev/input/event3",
            "--file",
            "racing.json",
        ]);
        assert_eq!(args.configure, Some(PathBuf::from("/dev/input/event3")));
        assert_eq!(args.file.as_deref(), Some("racing.json"));
    }

    #[test]
    fn test_args_file_requires_configure() {
        assert!(Args::try_parse_from(["evmaprs", "--file", "racing.json"]).is_err());
    }

    #[test]
    fn test_args_modes_are_exclusive() {
        assert!(Args::try_parse_from(["evmaprs", "--rescan", "--list-handled"]).is_err());
        let args = Args::parse_from(["evmaprs", "--check-config", "pad.json"]);
        assert_eq!(args.check_config, Some(PathBuf::from("pad.json")));
    }

    #[test]
    fn test_check_config_reports_errors() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.json");
        std::fs::write(&good, r#"{"buttons": [{"name": "A", "code": 304}]}"#).unwrap();
        assert!(check_config(&good).is_ok());

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, r#"{"buttons": [{"name": "A"}]}"#).unwrap();
        assert!(check_config(&bad).is_err());
    }
}
