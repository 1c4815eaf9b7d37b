//! Two-tier property resolution: the theme answers unless forcing is on or
//! it has no value, in which case the matching setting is used.

use log::{debug, warn};

use crate::config::{MAX_CORNER_LENGTH, REPAIR_COLOR};
use crate::settings::{SettingValue, Settings};
use crate::theme::ThemeNode;
use crate::types::Rgba;

/// Settings keys are theme property names without the leading dash.
pub fn setting_key(property: &str) -> &str {
    property.trim_start_matches('-')
}

fn theme_node<'a>(node: Option<&'a dyn ThemeNode>, settings: &Settings) -> Option<&'a dyn ThemeNode> {
    if settings.force_extension_values() {
        None
    } else {
        node
    }
}

/// Resolves a length in device pixels, bounded to `[0, MAX_CORNER_LENGTH]`.
pub fn lookup_length(
    node: Option<&dyn ThemeNode>,
    property: &str,
    settings: &Settings,
    scale: f64,
) -> f64 {
    let value = theme_node(node, settings)
        .and_then(|node| node.lookup_length(property))
        .or_else(|| settings.double(setting_key(property)))
        .unwrap_or(0.0);
    // f64::max maps NaN to 0.
    (value * scale).max(0.0).min(MAX_CORNER_LENGTH)
}

pub fn lookup_double(node: Option<&dyn ThemeNode>, property: &str, settings: &Settings) -> f64 {
    if let Some(value) = theme_node(node, settings).and_then(|node| node.lookup_double(property)) {
        return value;
    }
    settings.double(setting_key(property)).unwrap_or(0.0)
}

/// Resolves a color. An unparsable setting is overwritten with opaque black.
pub fn lookup_color(node: Option<&dyn ThemeNode>, property: &str, settings: &mut Settings) -> Rgba {
    if let Some(color) = theme_node(node, settings).and_then(|node| node.lookup_color(property)) {
        return color;
    }
    let key = setting_key(property);
    if let Some(color) = settings.string(key).and_then(Rgba::parse) {
        return color;
    }
    debug!(
        "invalid color {:?} in '{key}', resetting to {REPAIR_COLOR}",
        settings.string(key)
    );
    if let Err(err) = settings.set(key, SettingValue::Text(REPAIR_COLOR.to_string())) {
        warn!("could not repair '{key}': {err}");
    }
    Rgba::BLACK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{
        CORNER_BACKGROUND_COLOR, CORNER_OPACITY, CORNER_RADIUS, FORCE_EXTENSION_VALUES,
    };
    use crate::theme::{Theme, ThemeValue};
    use crate::types::Event;
    use std::sync::mpsc;

    const RADIUS: &str = "-panel-corner-radius";
    const OPACITY: &str = "-panel-corner-opacity";
    const COLOR: &str = "-panel-corner-background-color";

    fn theme() -> Theme {
        Theme::default()
            .with_property(RADIUS, ThemeValue::Number(6.0))
            .with_property(OPACITY, ThemeValue::Number(0.4))
            .with_property(COLOR, ThemeValue::Text("#ff0000".into()))
    }

    #[test]
    fn theme_value_wins_when_not_forced() {
        let settings = Settings::default();
        let theme = theme();
        assert_eq!(lookup_length(Some(&theme), RADIUS, &settings, 2.0), 12.0);
        assert_eq!(lookup_double(Some(&theme), OPACITY, &settings), 0.4);
    }

    #[test]
    fn forcing_prefers_settings() {
        let mut settings = Settings::default();
        settings.set(FORCE_EXTENSION_VALUES, SettingValue::Bool(true)).unwrap();
        settings.set(CORNER_RADIUS, SettingValue::Double(9.0)).unwrap();
        settings.set(CORNER_OPACITY, SettingValue::Double(0.8)).unwrap();
        let theme = theme();
        assert_eq!(lookup_length(Some(&theme), RADIUS, &settings, 2.0), 18.0);
        assert_eq!(lookup_double(Some(&theme), OPACITY, &settings), 0.8);
        assert_eq!(
            lookup_color(Some(&theme), COLOR, &mut settings),
            Rgba::BLACK
        );
    }

    #[test]
    fn missing_node_or_property_falls_back_to_settings() {
        let mut settings = Settings::default();
        settings.set(CORNER_RADIUS, SettingValue::Double(5.0)).unwrap();
        assert_eq!(lookup_length(None, RADIUS, &settings, 1.5), 7.5);
        let empty = Theme::default();
        assert_eq!(lookup_length(Some(&empty), RADIUS, &settings, 1.0), 5.0);
    }

    #[test]
    fn lengths_are_bounded() {
        let mut settings = Settings::default();
        settings.set(CORNER_RADIUS, SettingValue::Double(40000.0)).unwrap();
        assert_eq!(lookup_length(None, RADIUS, &settings, 1.0), MAX_CORNER_LENGTH);

        settings.set(CORNER_RADIUS, SettingValue::Double(-4.0)).unwrap();
        assert_eq!(lookup_length(None, RADIUS, &settings, 2.0), 0.0);

        settings.set(CORNER_RADIUS, SettingValue::Double(f64::NAN)).unwrap();
        assert_eq!(lookup_length(None, RADIUS, &settings, 1.0), 0.0);

        let theme = Theme::default().with_property(RADIUS, ThemeValue::Number(1.0e6));
        let settings = Settings::default();
        assert_eq!(lookup_length(Some(&theme), RADIUS, &settings, 1.0), MAX_CORNER_LENGTH);
    }

    #[test]
    fn repaired_color_is_written_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "panel-corner-background-color = \"junk\"\n").unwrap();
        let mut settings = Settings::load(&path).unwrap();

        assert_eq!(lookup_color(None, COLOR, &mut settings), Rgba::BLACK);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains(REPAIR_COLOR), "file not repaired: {text}");
        let reloaded = Settings::load(&path).unwrap();
        assert_eq!(reloaded.string(CORNER_BACKGROUND_COLOR), Some(REPAIR_COLOR));
    }

    #[test]
    fn invalid_color_is_repaired_once() {
        let (tx, rx) = mpsc::channel();
        let mut settings = Settings::default();
        settings
            .set(CORNER_BACKGROUND_COLOR, SettingValue::Text("garbage".into()))
            .unwrap();
        settings.connect_changed(CORNER_BACKGROUND_COLOR, tx);

        assert_eq!(lookup_color(None, COLOR, &mut settings), Rgba::BLACK);
        assert_eq!(settings.string(CORNER_BACKGROUND_COLOR), Some(REPAIR_COLOR));
        assert_eq!(
            rx.try_recv(),
            Ok(Event::SettingChanged(CORNER_BACKGROUND_COLOR.to_string()))
        );

        assert_eq!(lookup_color(None, COLOR, &mut settings), Rgba::BLACK);
        assert!(rx.try_recv().is_err());
    }
}
