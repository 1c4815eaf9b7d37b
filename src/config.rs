pub const CORNER_RADIUS: f64 = 12.0;
pub const BORDER_WIDTH: f64 = 0.0;
pub const BACKGROUND_COLOR: &str = "#000000ff";
pub const CORNER_OPACITY: f64 = 1.0;

/// Upper bound for any resolved corner length, in device pixels.
pub const MAX_CORNER_LENGTH: f64 = 512.0;

/// Fallback written back into the settings when a stored color does not parse.
pub const REPAIR_COLOR: &str = "#000000ff";

pub const PANEL_HEIGHT: u32 = 32;
pub const DEBOUNCE_MS: u64 = 100;
pub const ANIMATION_TIME_MS: u64 = 250;
pub const SETTINGS_POLL_MS: u64 = 1000;
pub const FRAME_MS: u64 = 16;
pub const IDLE_WAIT_MS: u64 = 100;
pub const CLIENT_READ_TIMEOUT_MS: u64 = 2000;

pub const SOCKET_NAME: &str = "panel-corners.sock";
pub const CONFIG_DIR: &str = "panel-corners";
pub const SETTINGS_FILE: &str = "settings.toml";

