//! Settings store for corner geometry overrides.
//!
//! Values live in a flat TOML file. Every key has a fixed kind taken from its
//! default; a write or reload that changes a value emits a change
//! notification for that key only.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::mpsc::Sender,
    time::SystemTime,
};

use log::{debug, warn};
use thiserror::Error;

use crate::config;
use crate::signal::{Signal, SignalId};
use crate::types::Event;

pub const FORCE_EXTENSION_VALUES: &str = "force-extension-values";
pub const DEBUG: &str = "debug";
pub const CORNER_RADIUS: &str = "panel-corner-radius";
pub const CORNER_BORDER_WIDTH: &str = "panel-corner-border-width";
pub const CORNER_BACKGROUND_COLOR: &str = "panel-corner-background-color";
pub const CORNER_OPACITY: &str = "panel-corner-opacity";

pub const KEYS: &[&str] = &[
    FORCE_EXTENSION_VALUES,
    DEBUG,
    CORNER_RADIUS,
    CORNER_BORDER_WIDTH,
    CORNER_BACKGROUND_COLOR,
    CORNER_OPACITY,
];

#[derive(Clone, Debug, PartialEq)]
pub enum SettingValue {
    Bool(bool),
    Double(f64),
    Text(String),
}

impl SettingValue {
    fn kind(&self) -> &'static str {
        match self {
            SettingValue::Bool(_) => "bool",
            SettingValue::Double(_) => "double",
            SettingValue::Text(_) => "string",
        }
    }

    fn from_toml(value: &toml::Value) -> Option<Self> {
        match value {
            toml::Value::Boolean(v) => Some(SettingValue::Bool(*v)),
            toml::Value::Float(v) => Some(SettingValue::Double(*v)),
            toml::Value::Integer(v) => Some(SettingValue::Double(*v as f64)),
            toml::Value::String(v) => Some(SettingValue::Text(v.clone())),
            _ => None,
        }
    }

    fn to_toml(&self) -> toml::Value {
        match self {
            SettingValue::Bool(v) => toml::Value::Boolean(*v),
            SettingValue::Double(v) => toml::Value::Float(*v),
            SettingValue::Text(v) => toml::Value::String(v.clone()),
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("read settings {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse settings {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("write settings {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("unknown setting '{0}'")]
    UnknownKey(String),

    #[error("setting '{key}' expects a {expected} value")]
    Kind { key: String, expected: &'static str },
}

fn default_value(key: &str) -> Option<SettingValue> {
    let value = match key {
        FORCE_EXTENSION_VALUES => SettingValue::Bool(false),
        DEBUG => SettingValue::Bool(false),
        CORNER_RADIUS => SettingValue::Double(config::CORNER_RADIUS),
        CORNER_BORDER_WIDTH => SettingValue::Double(config::BORDER_WIDTH),
        CORNER_BACKGROUND_COLOR => SettingValue::Text(config::BACKGROUND_COLOR.to_string()),
        CORNER_OPACITY => SettingValue::Double(config::CORNER_OPACITY),
        _ => return None,
    };
    Some(value)
}

fn defaults() -> BTreeMap<String, SettingValue> {
    KEYS.iter()
        .filter_map(|key| default_value(key).map(|value| (key.to_string(), value)))
        .collect()
}

pub struct Settings {
    values: BTreeMap<String, SettingValue>,
    changed: Signal<String>,
    path: Option<PathBuf>,
    modified: Option<SystemTime>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            values: defaults(),
            changed: Signal::default(),
            path: None,
            modified: None,
        }
    }
}

impl Settings {
    /// Loads the settings file at `path`. A missing file yields defaults; the
    /// path is kept so that later writes create it.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let mut settings = Settings {
            path: Some(path.to_path_buf()),
            ..Settings::default()
        };
        if path.exists() {
            settings.values = read_file(path)?;
            settings.modified = modified_time(path);
        }
        Ok(settings)
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.values.get(key)
    }

    pub fn bool(&self, key: &str) -> bool {
        matches!(self.get(key), Some(SettingValue::Bool(true)))
    }

    pub fn double(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            SettingValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            SettingValue::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn force_extension_values(&self) -> bool {
        self.bool(FORCE_EXTENSION_VALUES)
    }

    pub fn debug(&self) -> bool {
        self.bool(DEBUG)
    }

    /// Stores `value`, persisting it when the store is file backed. Writing an
    /// equal value is a no-op and emits nothing.
    pub fn set(&mut self, key: &str, value: SettingValue) -> Result<(), SettingsError> {
        let Some(default) = default_value(key) else {
            return Err(SettingsError::UnknownKey(key.to_string()));
        };
        if default.kind() != value.kind() {
            return Err(SettingsError::Kind {
                key: key.to_string(),
                expected: default.kind(),
            });
        }
        if self.values.get(key) == Some(&value) {
            return Ok(());
        }
        self.values.insert(key.to_string(), value);
        let saved = self.save();
        self.changed.emit(&key.to_string());
        saved
    }

    pub fn connect_changed(&mut self, key: &str, tx: Sender<Event>) -> SignalId {
        self.changed
            .connect(key.to_string(), tx, Event::SettingChanged(key.to_string()))
    }

    pub fn disconnect(&mut self, id: SignalId) -> bool {
        self.changed.disconnect(id)
    }

    #[cfg(test)]
    pub fn listener_count(&self) -> usize {
        self.changed.len()
    }

    /// Re-reads the backing file when its modification time moved.
    pub fn reload_if_changed(&mut self) -> Result<bool, SettingsError> {
        let Some(path) = self.path.clone() else {
            return Ok(false);
        };
        let modified = modified_time(&path);
        if modified.is_none() || modified == self.modified {
            return Ok(false);
        }
        self.reload()?;
        Ok(true)
    }

    /// Replaces all values with the file contents and returns the keys whose
    /// value changed. A change notification is emitted for each of them.
    pub fn reload(&mut self) -> Result<Vec<String>, SettingsError> {
        let Some(path) = self.path.clone() else {
            return Ok(Vec::new());
        };
        let values = read_file(&path)?;
        self.modified = modified_time(&path);
        let changed = KEYS
            .iter()
            .filter(|key| self.values.get(**key) != values.get(**key))
            .map(|key| key.to_string())
            .collect::<Vec<_>>();
        self.values = values;
        for key in &changed {
            debug!("setting {key} changed on disk");
            self.changed.emit(key);
        }
        Ok(changed)
    }

    fn save(&mut self) -> Result<(), SettingsError> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        let table = self
            .values
            .iter()
            .map(|(key, value)| (key.clone(), value.to_toml()))
            .collect::<toml::Table>();
        let text = toml::to_string(&table)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
                path: path.clone(),
                source,
            })?;
        }
        fs::write(&path, text).map_err(|source| SettingsError::Write {
            path: path.clone(),
            source,
        })?;
        self.modified = modified_time(&path);
        Ok(())
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

fn read_file(path: &Path) -> Result<BTreeMap<String, SettingValue>, SettingsError> {
    let text = fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let table = text
        .parse::<toml::Table>()
        .map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    let mut values = defaults();
    for (key, raw) in &table {
        let Some(default) = default_value(key) else {
            warn!("ignoring unknown setting '{key}' in {}", path.display());
            continue;
        };
        match SettingValue::from_toml(raw) {
            Some(value) if value.kind() == default.kind() => {
                values.insert(key.clone(), value);
            }
            _ => warn!(
                "ignoring setting '{key}' in {}: expected a {} value",
                path.display(),
                default.kind()
            ),
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn defaults_cover_every_key() {
        let settings = Settings::default();
        for key in KEYS {
            assert!(settings.get(key).is_some(), "missing default for {key}");
        }
        assert!(!settings.force_extension_values());
        assert_eq!(settings.double(CORNER_RADIUS), Some(config::CORNER_RADIUS));
        assert_eq!(settings.string(CORNER_BACKGROUND_COLOR), Some("#000000ff"));
    }

    #[test]
    fn set_emits_once_per_real_change() {
        let (tx, rx) = mpsc::channel();
        let mut settings = Settings::default();
        settings.connect_changed(CORNER_RADIUS, tx);

        settings.set(CORNER_RADIUS, SettingValue::Double(20.0)).unwrap();
        settings.set(CORNER_RADIUS, SettingValue::Double(20.0)).unwrap();
        settings.set(CORNER_OPACITY, SettingValue::Double(0.5)).unwrap();

        assert_eq!(
            rx.try_recv(),
            Ok(Event::SettingChanged(CORNER_RADIUS.to_string()))
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn set_rejects_wrong_kind_and_unknown_key() {
        let mut settings = Settings::default();
        assert!(matches!(
            settings.set(CORNER_RADIUS, SettingValue::Text("big".into())),
            Err(SettingsError::Kind { .. })
        ));
        assert!(matches!(
            settings.set("nope", SettingValue::Bool(true)),
            Err(SettingsError::UnknownKey(_))
        ));
        assert_eq!(settings.double(CORNER_RADIUS), Some(config::CORNER_RADIUS));
    }

    #[test]
    fn load_missing_file_uses_defaults_and_set_creates_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");
        let mut settings = Settings::load(&path).unwrap();
        assert_eq!(settings.double(CORNER_OPACITY), Some(config::CORNER_OPACITY));

        settings.set(CORNER_OPACITY, SettingValue::Double(0.25)).unwrap();
        let reloaded = Settings::load(&path).unwrap();
        assert_eq!(reloaded.double(CORNER_OPACITY), Some(0.25));
    }

    #[test]
    fn load_coerces_integers_and_skips_bad_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(
            &path,
            "panel-corner-radius = 16\npanel-corner-opacity = \"half\"\nextra = 1\n",
        )
        .unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.double(CORNER_RADIUS), Some(16.0));
        assert_eq!(settings.double(CORNER_OPACITY), Some(config::CORNER_OPACITY));
    }

    #[test]
    fn load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "panel-corner-radius = = 3").unwrap();
        assert!(matches!(
            Settings::load(&path),
            Err(SettingsError::Parse { .. })
        ));
    }

    #[test]
    fn reload_notifies_only_changed_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "panel-corner-radius = 8.0\n").unwrap();
        let mut settings = Settings::load(&path).unwrap();

        let (tx, rx) = mpsc::channel();
        for key in KEYS {
            settings.connect_changed(key, tx.clone());
        }

        fs::write(&path, "panel-corner-radius = 8.0\nforce-extension-values = true\n").unwrap();
        let changed = settings.reload().unwrap();
        assert_eq!(changed, vec![FORCE_EXTENSION_VALUES.to_string()]);
        assert_eq!(
            rx.try_recv(),
            Ok(Event::SettingChanged(FORCE_EXTENSION_VALUES.to_string()))
        );
        assert!(rx.try_recv().is_err());
        assert!(settings.force_extension_values());
    }

    #[test]
    fn reload_if_changed_follows_modification_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "panel-corner-radius = 8.0\n").unwrap();
        let mut settings = Settings::load(&path).unwrap();
        let (tx, rx) = mpsc::channel();
        settings.connect_changed(CORNER_RADIUS, tx.clone());
        settings.connect_changed(CORNER_OPACITY, tx);
        assert!(!settings.reload_if_changed().unwrap());

        fs::write(&path, "panel-corner-radius = 14.0\n").unwrap();
        let bumped = SystemTime::now() + std::time::Duration::from_secs(10);
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(bumped)
            .unwrap();

        assert!(settings.reload_if_changed().unwrap());
        assert_eq!(settings.double(CORNER_RADIUS), Some(14.0));
        assert_eq!(
            rx.try_recv(),
            Ok(Event::SettingChanged(CORNER_RADIUS.to_string()))
        );
        assert!(rx.try_recv().is_err());
        assert!(!settings.reload_if_changed().unwrap());
    }

    #[test]
    fn reload_if_changed_without_file_is_noop() {
        let mut settings = Settings::default();
        assert!(!settings.reload_if_changed().unwrap());
    }
}
