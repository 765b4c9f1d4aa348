use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::render::SurfaceConfigProfile;

/// Contents of the optional JSON config file. Every field may be omitted.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub target: Option<String>,
    pub profile: SurfaceConfigProfile,
    pub show_fps: bool,
    pub log_filter: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Command line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub target: Option<String>,
    pub samples: Option<i32>,
    pub show_fps: bool,
}

/// Effective settings after merging file and command line.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub target: Option<String>,
    pub profile: SurfaceConfigProfile,
    pub show_fps: bool,
    pub log_filter: Option<String>,
}

impl Settings {
    pub fn resolve(file: FileConfig, overrides: Overrides) -> Self {
        let profile = match overrides.samples {
            Some(samples) => file.profile.with_samples(samples),
            None => file.profile,
        };
        Self {
            target: overrides.target.or(file.target),
            profile,
            show_fps: overrides.show_fps || file.show_fps,
            log_filter: file.log_filter,
        }
    }
}
