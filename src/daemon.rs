use anyhow::{Context, Result};
use log::{info, warn};
use std::{
    io::{BufRead, BufReader, Read, Write},
    net::Shutdown,
    os::unix::net::{UnixListener, UnixStream},
    path::{Path, PathBuf},
    sync::mpsc,
    thread,
    time::Duration,
};

use crate::config::{CLIENT_READ_TIMEOUT_MS, CONFIG_DIR, SETTINGS_FILE, SOCKET_NAME};
use crate::logging::apply_debug_flag;
use crate::overlay::{run_overlay, OverlayOptions};
use crate::settings::Settings;
use crate::theme::Theme;
use crate::types::BackendKind;

const MAX_COMMAND_LEN: u64 = 4096;

/// Commands accepted on the control socket.
#[derive(Clone, Debug, PartialEq)]
pub enum DaemonMsg {
    Overview(bool),
    Theme(Option<PathBuf>),
    Reload,
}

impl DaemonMsg {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let (verb, arg) = match line.split_once(' ') {
            Some((verb, arg)) => (verb, arg.trim()),
            None => (line, ""),
        };
        match (verb, arg) {
            ("overview", "on") => Some(DaemonMsg::Overview(true)),
            ("overview", "off") => Some(DaemonMsg::Overview(false)),
            ("theme", "none") => Some(DaemonMsg::Theme(None)),
            ("theme", path) if !path.is_empty() => Some(DaemonMsg::Theme(Some(PathBuf::from(path)))),
            ("reload", "") => Some(DaemonMsg::Reload),
            _ => None,
        }
    }

    pub fn to_line(&self) -> String {
        match self {
            DaemonMsg::Overview(true) => "overview on".to_string(),
            DaemonMsg::Overview(false) => "overview off".to_string(),
            DaemonMsg::Theme(None) => "theme none".to_string(),
            DaemonMsg::Theme(Some(path)) => format!("theme {}", path.display()),
            DaemonMsg::Reload => "reload".to_string(),
        }
    }
}

pub struct DaemonOptions {
    pub backend: BackendKind,
    pub panel_height: u32,
    pub settings_path: Option<PathBuf>,
    pub theme_path: Option<PathBuf>,
}

pub fn run_daemon(options: DaemonOptions) -> Result<()> {
    let socket_path = runtime_socket_path(SOCKET_NAME)?;
    let listener = bind_listener(&socket_path)?;

    let settings_path = match options.settings_path {
        Some(path) => path,
        None => default_settings_path()?,
    };
    let settings = Settings::load(&settings_path)
        .with_context(|| format!("load settings {}", settings_path.display()))?;
    apply_debug_flag(settings.debug());
    info!("using settings {}", settings_path.display());

    let theme = options
        .theme_path
        .as_deref()
        .map(Theme::load)
        .transpose()
        .context("load theme")?;

    let (tx, rx) = mpsc::channel::<DaemonMsg>();
    thread::spawn(move || {
        loop {
            let Ok((mut stream, _)) = listener.accept() else {
                continue;
            };
            let timeout = Duration::from_millis(CLIENT_READ_TIMEOUT_MS);
            match handle_client(&mut stream, timeout) {
                Ok(msg) => {
                    if tx.send(msg).is_err() {
                        break;
                    }
                }
                Err(err) => warn!("control socket: {err:#}"),
            }
        }
    });

    let result = run_overlay(
        OverlayOptions {
            backend: options.backend,
            panel_height: options.panel_height,
            settings,
            theme,
        },
        rx,
    );
    let _ = std::fs::remove_file(&socket_path);
    result
}

/// Reads one command line and answers `ok` or an error line. A client that
/// stays silent for `timeout` is dropped.
fn handle_client(stream: &mut UnixStream, timeout: Duration) -> Result<DaemonMsg> {
    stream
        .set_read_timeout(Some(timeout))
        .context("set read timeout")?;
    let mut line = String::new();
    BufReader::new((&*stream).take(MAX_COMMAND_LEN))
        .read_line(&mut line)
        .context("read command")?;
    match DaemonMsg::parse(&line) {
        Some(msg) => {
            let _ = stream.write_all(b"ok");
            Ok(msg)
        }
        None => {
            let _ = stream.write_all(b"unknown command");
            Err(anyhow::anyhow!("unknown command: {}", line.trim()))
        }
    }
}

pub fn send_command(msg: &DaemonMsg) -> Result<()> {
    let socket_path = runtime_socket_path(SOCKET_NAME)?;
    let mut stream = UnixStream::connect(&socket_path)
        .with_context(|| format!("connect {} (is the daemon running?)", socket_path.display()))?;
    stream
        .write_all(format!("{}\n", msg.to_line()).as_bytes())
        .context("send command")?;
    stream.shutdown(Shutdown::Write).context("finish command")?;
    let mut reply = String::new();
    stream.read_to_string(&mut reply).context("read reply")?;
    if reply != "ok" {
        return Err(anyhow::anyhow!("daemon rejected command: {reply}"));
    }
    Ok(())
}

fn runtime_socket_path(name: &str) -> Result<PathBuf> {
    let runtime_dir = std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"));
    Ok(runtime_dir.join(name))
}

fn default_settings_path() -> Result<PathBuf> {
    let config_dir = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .context("neither XDG_CONFIG_HOME nor HOME is set")?;
    Ok(config_dir.join(CONFIG_DIR).join(SETTINGS_FILE))
}

fn bind_listener(path: &Path) -> Result<UnixListener> {
    if UnixStream::connect(path).is_ok() {
        return Err(anyhow::anyhow!("panel-corners daemon already running"));
    }
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path)
        .with_context(|| format!("bind {}", path.display()))?;
    Ok(listener)
}
