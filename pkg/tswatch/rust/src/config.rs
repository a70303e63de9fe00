// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::env::parse_environment_file;
use anyhow::Result;
use log::debug;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "tswatch.yaml";

const DEFAULT_SOURCE_DIR: &str = "src";
const DEFAULT_OUT_DIR: &str = "dist";
const DEFAULT_COMPILER: &str = "tsc";
const DEFAULT_KILL_TIMEOUT_MS: u64 = 2000;
const DEFAULT_DEBOUNCE_MS: u64 = 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("refusing to clean {}: it contains the sources or the project", .0.display())]
    UnsafeOutDir(PathBuf),
    #[error("alias command is empty")]
    EmptyAliasCommand,
}

/// Application child started after the first successful compile.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Optional `tswatch.yaml`. Every field can be overridden on the command
/// line.
#[derive(Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub source_dir: Option<String>,
    pub out_dir: Option<String>,
    /// Milliseconds.
    pub kill_timeout: Option<u64>,
    /// Milliseconds.
    pub debounce: Option<u64>,
    pub keep_alive: Option<bool>,
    pub clean_out_dir: Option<bool>,
    pub compiler: Option<String>,
    /// Prepended to the compiler arguments given on the command line.
    pub compiler_args: Vec<String>,
    pub allow_js: Option<bool>,
    pub alias_command: Option<Vec<String>>,
    pub environment_file: Option<String>,
    pub env: HashMap<String, String>,
    pub run: Option<RunCommand>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub cwd: PathBuf,
    pub source_dir: PathBuf,
    pub out_dir: PathBuf,
    pub kill_timeout: Duration,
    pub debounce: Duration,
    pub keep_alive: bool,
    pub clean_out_dir: bool,
    pub compiler: String,
    pub compiler_args: Vec<String>,
    pub run: Option<RunCommand>,
    pub allow_js: bool,
    pub alias_command: Option<Vec<String>>,
    pub environment_file: Option<PathBuf>,
    pub env: HashMap<String, String>,
    /// Print a phase timing table on startup and on every restart.
    pub perf_init: bool,
}

impl SupervisorConfig {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            source_dir: PathBuf::from(DEFAULT_SOURCE_DIR),
            out_dir: PathBuf::from(DEFAULT_OUT_DIR),
            kill_timeout: Duration::from_millis(DEFAULT_KILL_TIMEOUT_MS),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            keep_alive: false,
            clean_out_dir: false,
            compiler: DEFAULT_COMPILER.to_string(),
            compiler_args: Vec::new(),
            run: None,
            allow_js: false,
            alias_command: None,
            environment_file: None,
            env: HashMap::new(),
            perf_init: false,
        }
    }

    /// Layer a config file over the current values.
    pub fn apply_file(&mut self, file: FileConfig) {
        if let Some(dir) = file.source_dir {
            self.source_dir = PathBuf::from(dir);
        }
        if let Some(dir) = file.out_dir {
            self.out_dir = PathBuf::from(dir);
        }
        if let Some(ms) = file.kill_timeout {
            self.kill_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = file.debounce {
            self.debounce = Duration::from_millis(ms);
        }
        if let Some(keep_alive) = file.keep_alive {
            self.keep_alive = keep_alive;
        }
        if let Some(clean) = file.clean_out_dir {
            self.clean_out_dir = clean;
        }
        if let Some(compiler) = file.compiler {
            self.compiler = compiler;
        }
        if !file.compiler_args.is_empty() {
            let cli_args = std::mem::take(&mut self.compiler_args);
            self.compiler_args = file.compiler_args;
            self.compiler_args.extend(cli_args);
        }
        if let Some(allow_js) = file.allow_js {
            self.allow_js = allow_js;
        }
        if file.alias_command.is_some() {
            self.alias_command = file.alias_command;
        }
        if let Some(path) = file.environment_file {
            self.environment_file = Some(PathBuf::from(path));
        }
        self.env.extend(file.env);
        if file.run.is_some() {
            self.run = file.run;
        }
    }

    pub fn source_path(&self) -> PathBuf {
        self.cwd.join(&self.source_dir)
    }

    pub fn out_path(&self) -> PathBuf {
        self.cwd.join(&self.out_dir)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce.is_zero() {
            return Err(ConfigError::ZeroDuration("debounce"));
        }
        if self
            .alias_command
            .as_ref()
            .is_some_and(|command| command.is_empty())
        {
            return Err(ConfigError::EmptyAliasCommand);
        }
        if self.clean_out_dir {
            let out = self.out_path();
            if out == self.cwd || self.source_path().starts_with(&out) {
                return Err(ConfigError::UnsafeOutDir(out));
            }
        }
        Ok(())
    }

    /// Environment for the application child: the environment file first,
    /// then explicit `env` entries.
    pub fn child_env(&self) -> Result<HashMap<String, String>> {
        let mut vars = match &self.environment_file {
            Some(path) => parse_environment_file(&self.cwd.join(path))?,
            None => HashMap::new(),
        };
        vars.extend(self.env.clone());
        Ok(vars)
    }
}

pub fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// An explicit path must exist; otherwise `tswatch.yaml` in `cwd` is used
/// when present.
pub fn find_file_config(
    cwd: &Path,
    explicit: Option<&Path>,
) -> Result<Option<FileConfig>, ConfigError> {
    if let Some(path) = explicit {
        return load_file_config(&cwd.join(path)).map(Some);
    }
    let default = cwd.join(CONFIG_FILE_NAME);
    if !default.is_file() {
        debug!("no {} in {}", CONFIG_FILE_NAME, cwd.display());
        return Ok(None);
    }
    load_file_config(&default).map(Some)
}
