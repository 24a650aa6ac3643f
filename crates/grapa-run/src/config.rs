use std::{env, fs, path::PathBuf};

use grapa_lang::Options;
use serde::Deserialize;
use tracing::{debug, warn};

const CONFIG_FILE: &str = "config.toml";

/// Settings read from `config.toml`, overridden by `GRAPA_*` environment variables.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directories the class loader searches.
    pub search_paths: Vec<PathBuf>,
    pub optimize: Option<bool>,
    pub wildcard_limit: Option<usize>,
    pub max_depth: Option<usize>,
    /// Grammar description loaded into every engine.
    pub grammar: Option<PathBuf>,
}

impl Config {
    pub fn config_dir() -> Option<PathBuf> {
        grapa_repl::Repl::config_dir()
    }

    /// Reads the config file, if any, then applies the environment.
    pub fn load() -> Self {
        let config = Self::config_dir()
            .map(|dir| dir.join(CONFIG_FILE))
            .filter(|path| path.exists())
            .map(|path| {
                debug!(path = %path.display(), "loading config");
                fs::read_to_string(&path)
                    .map_err(|e| e.to_string())
                    .and_then(|text| Self::parse(&text))
                    .unwrap_or_else(|e| {
                        warn!(path = %path.display(), error = %e, "ignoring invalid config file");
                        Self::default()
                    })
            })
            .unwrap_or_default();

        config.with_env(|name| env::var(name).ok())
    }

    pub fn parse(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    /// Applies `GRAPA_PATH`, `GRAPA_NO_OPTIMIZE` and `GRAPA_WILDCARD_LIMIT`.
    pub fn with_env(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(paths) = var("GRAPA_PATH") {
            self.search_paths = env::split_paths(&paths)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }

        if let Some(value) = var("GRAPA_NO_OPTIMIZE") {
            match value.to_lowercase().as_str() {
                "" | "0" | "false" | "no" => self.optimize = Some(true),
                "1" | "true" | "yes" => self.optimize = Some(false),
                _ => warn!(value = %value, "invalid GRAPA_NO_OPTIMIZE value"),
            }
        }

        if let Some(value) = var("GRAPA_WILDCARD_LIMIT") {
            match value.parse::<usize>() {
                Ok(limit) => self.wildcard_limit = Some(limit),
                Err(_) => warn!(value = %value, "invalid GRAPA_WILDCARD_LIMIT value"),
            }
        }

        self
    }

    pub fn options(&self) -> Options {
        let defaults = Options::default();
        Options {
            optimize: self.optimize.unwrap_or(defaults.optimize),
            wildcard_limit: self.wildcard_limit.or(defaults.wildcard_limit),
            max_depth: self.max_depth.unwrap_or(defaults.max_depth),
            search_paths: self.search_paths.clone(),
            ..defaults
        }
    }
}
