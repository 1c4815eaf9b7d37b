use tiny_skia::Color;

#[derive(Clone, Copy, Debug)]
pub enum BackendKind {
    Niri,
    Hyprland,
    Standalone,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::Left, Side::Right];

    pub fn name(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

/// Axis-aligned box in panel coordinates, device pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ChildBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const BLACK: Rgba = Rgba::new(0, 0, 0, 255);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Accepts `#rgb`, `#rgba`, `#rrggbb`, `#rrggbbaa`, `rgb(r, g, b)`,
    /// `rgba(r, g, b, a)` with `a` in [0, 1], and `transparent`.
    pub fn parse(value: &str) -> Option<Self> {
        let s = value.trim().to_ascii_lowercase();
        if s == "transparent" {
            return Some(Rgba::new(0, 0, 0, 0));
        }
        if let Some(hex) = s.strip_prefix('#') {
            return parse_hex(hex);
        }
        if let Some(body) = s.strip_prefix("rgba(").and_then(|rest| rest.strip_suffix(')')) {
            let parts = body.split(',').map(str::trim).collect::<Vec<_>>();
            if parts.len() != 4 {
                return None;
            }
            let alpha = parts[3].parse::<f64>().ok()?;
            if !(0.0..=1.0).contains(&alpha) {
                return None;
            }
            return Some(Rgba::new(
                channel(parts[0])?,
                channel(parts[1])?,
                channel(parts[2])?,
                (alpha * 255.0).round() as u8,
            ));
        }
        if let Some(body) = s.strip_prefix("rgb(").and_then(|rest| rest.strip_suffix(')')) {
            let parts = body.split(',').map(str::trim).collect::<Vec<_>>();
            if parts.len() != 3 {
                return None;
            }
            return Some(Rgba::new(
                channel(parts[0])?,
                channel(parts[1])?,
                channel(parts[2])?,
                255,
            ));
        }
        None
    }

    pub fn to_skia(self) -> Color {
        Color::from_rgba8(self.r, self.g, self.b, self.a)
    }
}

fn channel(value: &str) -> Option<u8> {
    value.parse::<u8>().ok()
}

fn parse_hex(hex: &str) -> Option<Rgba> {
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let nibble = |idx: usize| u8::from_str_radix(&hex[idx..idx + 1].repeat(2), 16).ok();
    let byte = |idx: usize| u8::from_str_radix(&hex[idx..idx + 2], 16).ok();
    match hex.len() {
        3 => Some(Rgba::new(nibble(0)?, nibble(1)?, nibble(2)?, 255)),
        4 => Some(Rgba::new(nibble(0)?, nibble(1)?, nibble(2)?, nibble(3)?)),
        6 => Some(Rgba::new(byte(0)?, byte(2)?, byte(4)?, 255)),
        8 => Some(Rgba::new(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
        _ => None,
    }
}

/// Messages delivered to the corners controller by settings and panel
/// notifications.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    SettingChanged(String),
    PanelMoved(Side),
    PanelResized(Side),
    StyleChanged(Side),
}
