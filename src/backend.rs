use anyhow::{Context, Result};
use niri_ipc::{socket::Socket, Request, Response};
use serde::Deserialize;
use std::process::Command;

use crate::types::BackendKind;

/// Logical size and scale of the output the panel lives on.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OutputInfo {
    pub logical_size: Option<(i32, i32)>,
    pub scale: f64,
}

impl Default for OutputInfo {
    fn default() -> Self {
        Self {
            logical_size: None,
            scale: 1.0,
        }
    }
}

#[derive(Deserialize)]
struct HyprMonitor {
    focused: Option<bool>,
    width: Option<u32>,
    height: Option<u32>,
    scale: Option<f64>,
}

fn hyprctl(args: &[&str]) -> Result<String> {
    let output = Command::new("hyprctl")
        .args(args)
        .output()
        .context("spawn hyprctl")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow::anyhow!("hyprctl failed: {stderr}"));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn hyprctl_json<T: for<'de> Deserialize<'de>>(args: &[&str]) -> Result<T> {
    let text = hyprctl(args)?;
    let value = serde_json::from_str(&text).context("parse hyprctl json")?;
    Ok(value)
}

/// Hyprland reports monitors in physical pixels.
fn hypr_output_info(monitors: Vec<HyprMonitor>) -> OutputInfo {
    let Some(monitor) = monitors.into_iter().find(|m| m.focused.unwrap_or(false)) else {
        return OutputInfo::default();
    };
    let scale = monitor.scale.unwrap_or(1.0).max(1.0);
    let logical = |pixels: Option<u32>| (f64::from(pixels.unwrap_or(0)) / scale).round() as i32;
    OutputInfo {
        logical_size: Some((logical(monitor.width), logical(monitor.height))),
        scale,
    }
}

pub fn focused_output_info(backend: BackendKind) -> Result<OutputInfo> {
    match backend {
        BackendKind::Niri => {
            let socket = Socket::connect().context("connect to niri socket")?;
            let (reply, _events) =
                socket.send(Request::FocusedOutput).context("send focused output request")?;
            let output = match reply {
                Ok(Response::FocusedOutput(output)) => output,
                Ok(_) => None,
                Err(message) => return Err(anyhow::anyhow!(message)),
            };
            if let Some(logical) = output.and_then(|output| output.logical) {
                return Ok(OutputInfo {
                    logical_size: Some((logical.width as i32, logical.height as i32)),
                    scale: logical.scale.max(1.0),
                });
            }
            Ok(OutputInfo::default())
        }
        BackendKind::Hyprland => {
            let monitors = hyprctl_json::<Vec<HyprMonitor>>(&["-j", "monitors"])?;
            Ok(hypr_output_info(monitors))
        }
        BackendKind::Standalone => Ok(OutputInfo::default()),
    }
}
