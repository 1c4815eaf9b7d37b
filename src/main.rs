mod animation;
mod backend;
mod config;
mod controller;
mod corner;
mod daemon;
mod debounce;
mod logging;
mod lookup;
mod overlay;
mod panel;
mod settings;
mod signal;
mod theme;
mod types;

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::config::PANEL_HEIGHT;
use crate::daemon::{run_daemon, send_command, DaemonMsg, DaemonOptions};
use crate::logging::init_logging;
use crate::types::BackendKind;

const USAGE: &str = "Usage: panel-corners --daemon --backend <niri|hyprland|none> [--panel-height N] [--config PATH] [--theme PATH]
       panel-corners --overview on|off
       panel-corners --theme PATH|none
       panel-corners --reload";

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == flag {
            return iter.next().map(String::as_str);
        }
    }
    None
}

fn parse_backend_required(args: &[String]) -> Result<BackendKind> {
    match flag_value(args, "--backend") {
        Some("niri") => Ok(BackendKind::Niri),
        Some("hyprland") => Ok(BackendKind::Hyprland),
        Some("none") => Ok(BackendKind::Standalone),
        Some(value) => Err(anyhow::anyhow!("unknown backend: {value}")),
        None => Err(anyhow::anyhow!("missing --backend (niri|hyprland|none)")),
    }
}

fn parse_daemon_options(args: &[String]) -> Result<DaemonOptions> {
    let backend = parse_backend_required(args)?;
    let panel_height = match flag_value(args, "--panel-height") {
        Some(value) => value
            .parse::<u32>()
            .map_err(|_| anyhow::anyhow!("invalid --panel-height: {value}"))?,
        None => PANEL_HEIGHT,
    };
    Ok(DaemonOptions {
        backend,
        panel_height,
        settings_path: flag_value(args, "--config").map(PathBuf::from),
        theme_path: flag_value(args, "--theme").map(PathBuf::from),
    })
}

/// Client-side commands forwarded to a running daemon.
fn parse_client_command(args: &[String]) -> Result<Option<DaemonMsg>> {
    if args.iter().any(|arg| arg == "--reload") {
        return Ok(Some(DaemonMsg::Reload));
    }
    if let Some(value) = flag_value(args, "--overview") {
        return DaemonMsg::parse(&format!("overview {value}"))
            .map(Some)
            .ok_or_else(|| anyhow::anyhow!("--overview expects on|off"));
    }
    if let Some(value) = flag_value(args, "--theme") {
        return DaemonMsg::parse(&format!("theme {value}"))
            .map(Some)
            .ok_or_else(|| anyhow::anyhow!("--theme expects a path or none"));
    }
    Ok(None)
}

/// Theme paths are resolved against the client's working directory before
/// they reach the daemon.
fn resolve_theme_path(msg: DaemonMsg) -> Result<DaemonMsg> {
    match msg {
        DaemonMsg::Theme(Some(path)) => {
            let absolute = std::fs::canonicalize(&path)
                .with_context(|| format!("theme {}", path.display()))?;
            Ok(DaemonMsg::Theme(Some(absolute)))
        }
        other => Ok(other),
    }
}

fn main() -> Result<()> {
    init_logging(false);
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    if args.iter().any(|arg| arg == "--daemon") {
        let options = parse_daemon_options(&args)?;
        run_daemon(options)?;
        return Ok(());
    }
    if let Some(msg) = parse_client_command(&args)? {
        send_command(&resolve_theme_path(msg)?)?;
        return Ok(());
    }

    eprintln!("{USAGE}");
    Ok(())
}
