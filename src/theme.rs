use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;

use crate::types::Rgba;

/// Style resolution context for one element. Lengths are returned in theme
/// units; callers apply the display scale.
pub trait ThemeNode {
    fn lookup_length(&self, property: &str) -> Option<f64>;
    fn lookup_double(&self, property: &str) -> Option<f64>;
    fn lookup_color(&self, property: &str) -> Option<Rgba>;
}

#[derive(Debug, Error)]
pub enum ThemeError {
    #[error("read theme {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse theme {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ThemeValue {
    Number(f64),
    Text(String),
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Theme {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, ThemeValue>,
}

impl Theme {
    pub fn load(path: &Path) -> Result<Self, ThemeError> {
        let text = fs::read_to_string(path).map_err(|source| ThemeError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut theme = toml::from_str::<Theme>(&text).map_err(|source| ThemeError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if theme.name.is_empty() {
            theme.name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        Ok(theme)
    }

    #[cfg(test)]
    pub fn with_property(mut self, property: &str, value: ThemeValue) -> Self {
        self.properties.insert(property.to_string(), value);
        self
    }

    fn number(&self, property: &str) -> Option<f64> {
        match self.properties.get(property)? {
            ThemeValue::Number(v) => Some(*v),
            ThemeValue::Text(text) => text.trim().trim_end_matches("px").trim().parse().ok(),
        }
    }
}

impl ThemeNode for Theme {
    fn lookup_length(&self, property: &str) -> Option<f64> {
        self.number(property).filter(|v| v.is_finite() && *v >= 0.0)
    }

    fn lookup_double(&self, property: &str) -> Option<f64> {
        self.number(property).filter(|v| v.is_finite())
    }

    fn lookup_color(&self, property: &str) -> Option<Rgba> {
        match self.properties.get(property)? {
            ThemeValue::Text(text) => Rgba::parse(text),
            ThemeValue::Number(_) => None,
        }
    }
}
