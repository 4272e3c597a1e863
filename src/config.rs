use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::diagnostics::CompileError;

pub const CONFIG_FILE: &str = "kiln.toml";

/// Which lowering strategy produces the output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Cranelift IR, emitted as a relocatable object
    #[default]
    Ir,
    /// One C translation unit
    C,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptLevel {
    #[default]
    None,
    Speed,
    SpeedAndSize,
}

impl OptLevel {
    /// Spelling of the `opt_level` cranelift setting.
    pub fn cranelift_name(self) -> &'static str {
        match self {
            OptLevel::None => "none",
            OptLevel::Speed => "speed",
            OptLevel::SpeedAndSize => "speed_and_size",
        }
    }

    pub fn c_flag(self) -> &'static str {
        match self {
            OptLevel::None => "-O0",
            OptLevel::Speed => "-O2",
            OptLevel::SpeedAndSize => "-Os",
        }
    }
}

/// Resolved lowering and link settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub backend: Backend,
    /// `"host"` or a target triple.
    pub target: String,
    pub opt_level: OptLevel,
    pub bounds_checks: bool,
    pub verify: bool,
    pub cc: String,
    pub c_flags: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::Ir,
            target: "host".to_string(),
            opt_level: OptLevel::None,
            bounds_checks: true,
            verify: true,
            cc: "cc".to_string(),
            c_flags: Vec::new(),
        }
    }
}

// ---- TOML deserialization types ----

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TomlConfig {
    #[serde(default)]
    build: TomlBuild,
    #[serde(default)]
    link: TomlLink,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TomlBuild {
    backend: Option<Backend>,
    target: Option<String>,
    opt_level: Option<OptLevel>,
    bounds_checks: Option<bool>,
    verify: Option<bool>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TomlLink {
    cc: Option<String>,
    c_flags: Option<Vec<String>>,
}

impl Config {
    pub fn from_toml_str(content: &str, path: &Path) -> Result<Self, CompileError> {
        let parsed: TomlConfig = toml::from_str(content).map_err(|e| {
            CompileError::config(format!("{CONFIG_FILE}: invalid syntax: {e}"), path.to_path_buf())
        })?;

        let defaults = Config::default();
        let config = Config {
            backend: parsed.build.backend.unwrap_or(defaults.backend),
            target: parsed.build.target.unwrap_or(defaults.target),
            opt_level: parsed.build.opt_level.unwrap_or(defaults.opt_level),
            bounds_checks: parsed.build.bounds_checks.unwrap_or(defaults.bounds_checks),
            verify: parsed.build.verify.unwrap_or(defaults.verify),
            cc: parsed.link.cc.unwrap_or(defaults.cc),
            c_flags: parsed.link.c_flags.unwrap_or(defaults.c_flags),
        };

        if config.target.trim().is_empty() {
            return Err(CompileError::config(
                format!("{CONFIG_FILE}: 'target' must not be empty"),
                path.to_path_buf(),
            ));
        }
        if config.cc.trim().is_empty() {
            return Err(CompileError::config(
                format!("{CONFIG_FILE}: 'cc' must not be empty"),
                path.to_path_buf(),
            ));
        }
        if !config.bounds_checks {
            tracing::warn!(path = %path.display(), "array bounds checks disabled");
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, CompileError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CompileError::config(format!("{CONFIG_FILE}: could not read file: {e}"), path.to_path_buf())
        })?;
        Self::from_toml_str(&content, path)
    }

    /// Loads the nearest `kiln.toml` above `start_dir`, or defaults when none exists.
    pub fn discover(start_dir: &Path) -> Result<Self, CompileError> {
        match find_config_walk(start_dir) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "using config");
                Self::load(&path)
            }
            None => Ok(Self::default()),
        }
    }
}

/// Walk from start_dir up to .git or the FS root, looking for kiln.toml.
fn find_config_walk(start_dir: &Path) -> Option<PathBuf> {
    let mut dir = start_dir.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
        if dir.join(".git").exists() {
            return None;
        }
        if !dir.pop() {
            return None;
        }
    }
}
