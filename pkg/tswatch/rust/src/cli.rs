// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Command line: `tswatch [supervisor and compiler flags] [--run <program> [args...]]`.
//!
//! Flags tswatch knows are taken out and parsed with clap. Everything else
//! before `--run` is handed to the compiler untouched, and everything after
//! it belongs to the application.

use crate::config::{RunCommand, SupervisorConfig, find_file_config};
use anyhow::{Result, bail};
use clap::{CommandFactory, Parser};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const RUN_SEPARATOR: &str = "--run";
const PERF_INIT_FLAG: &str = "--perf-init";

#[derive(Debug, Default, Parser)]
#[command(
    name = "tswatch",
    about = "Run the TypeScript compiler in watch mode and restart an application on every successful build"
)]
pub struct SupervisorFlags {
    /// Milliseconds to wait for the application to exit before killing it
    #[arg(long = "kill-timeout", value_name = "MS")]
    pub kill_timeout: Option<u64>,

    /// Restart the application after an uncaught crash
    #[arg(long = "keepalive")]
    pub keep_alive: bool,

    /// Remove the output directory before compiling
    #[arg(long = "cleanOutDir")]
    pub clean_out_dir: bool,

    /// Config file (default: tswatch.yaml in the working directory)
    #[arg(long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Compiler executable
    #[arg(long = "compiler", value_name = "PROGRAM")]
    pub compiler: Option<String>,

    #[arg(long = "source-dir", value_name = "DIR")]
    pub source_dir: Option<PathBuf>,

    #[arg(long = "out-dir", value_name = "DIR")]
    pub out_dir: Option<PathBuf>,

    /// Leave JavaScript sources to the compiler instead of copying them
    #[arg(long = "allow-js")]
    pub allow_js: bool,

    /// Command rewriting path aliases in the output after each compile
    #[arg(long = "alias-command", value_name = "COMMAND")]
    pub alias_command: Option<String>,

    /// Environment file loaded into the application
    #[arg(long = "env-file", value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    /// Quiet period in milliseconds before a restart
    #[arg(long = "debounce", value_name = "MS")]
    pub debounce: Option<u64>,
}

#[derive(Debug, Default)]
pub struct Invocation {
    pub flags: SupervisorFlags,
    pub compiler_args: Vec<String>,
    pub run: Option<RunCommand>,
}

impl Invocation {
    /// Parse arguments, not including the program name.
    pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut args: Vec<String> = args.into_iter().collect();

        let run = match args.iter().position(|a| a == RUN_SEPARATOR) {
            Some(index) => {
                let mut rest = args.split_off(index).into_iter().skip(1);
                let Some(program) = rest.next() else {
                    bail!("{RUN_SEPARATOR} requires a program");
                };
                Some(RunCommand {
                    program,
                    args: rest.collect(),
                })
            }
            None => None,
        };

        let (supervisor_args, compiler_args) = partition(args);
        let flags = SupervisorFlags::try_parse_from(
            std::iter::once("tswatch".to_string()).chain(supervisor_args),
        )?;

        Ok(Self {
            flags,
            compiler_args,
            run,
        })
    }

    /// Defaults, then the config file, then the command line.
    pub fn resolve(self, cwd: &Path) -> Result<SupervisorConfig> {
        let flags = self.flags;
        let mut config = SupervisorConfig::new(cwd);
        if let Some(file) = find_file_config(cwd, flags.config.as_deref())? {
            config.apply_file(file);
        }

        config.compiler_args.extend(self.compiler_args);
        if let Some(dir) = flag_value(&config.compiler_args, "--outDir") {
            config.out_dir = PathBuf::from(dir);
        }
        if let Some(dir) = flag_value(&config.compiler_args, "--rootDir") {
            config.source_dir = PathBuf::from(dir);
        }
        if config.compiler_args.iter().any(|a| a == "--allowJs") {
            config.allow_js = true;
        }

        if let Some(ms) = flags.kill_timeout {
            config.kill_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = flags.debounce {
            config.debounce = Duration::from_millis(ms);
        }
        config.keep_alive |= flags.keep_alive;
        config.clean_out_dir |= flags.clean_out_dir;
        config.allow_js |= flags.allow_js;
        if let Some(compiler) = flags.compiler {
            config.compiler = compiler;
        }
        if let Some(dir) = flags.source_dir {
            config.source_dir = dir;
        }
        if let Some(dir) = flags.out_dir {
            config.out_dir = dir;
        }
        if let Some(command) = flags.alias_command {
            config.alias_command = Some(command.split_whitespace().map(str::to_string).collect());
        }
        if let Some(path) = flags.env_file {
            config.environment_file = Some(path);
        }
        if self.run.is_some() {
            config.run = self.run;
        }
        config.perf_init = config
            .run
            .as_ref()
            .is_some_and(|run| run.args.iter().any(|a| a == PERF_INIT_FLAG));

        config.validate()?;
        Ok(config)
    }
}

/// Split into (tswatch flags, compiler flags) using the long flags clap knows.
fn partition(args: Vec<String>) -> (Vec<String>, Vec<String>) {
    let known: HashMap<String, bool> = SupervisorFlags::command()
        .get_arguments()
        .filter_map(|arg| {
            arg.get_long()
                .map(|long| (long.to_string(), arg.get_action().takes_values()))
        })
        .collect();

    let mut supervisor = Vec::new();
    let mut compiler = Vec::new();
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        let matched = arg.strip_prefix("--").and_then(|rest| match rest.split_once('=') {
            Some((name, _)) => known.get(name).map(|_| false),
            None => known.get(rest).copied(),
        });
        match matched {
            Some(needs_value) => {
                supervisor.push(arg);
                if needs_value && let Some(value) = iter.next() {
                    supervisor.push(value);
                }
            }
            None => compiler.push(arg),
        }
    }
    (supervisor, compiler)
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == flag {
            return iter.next().map(String::as_str);
        }
        if let Some(value) = arg.strip_prefix(flag).and_then(|rest| rest.strip_prefix('=')) {
            return Some(value);
        }
    }
    None
}
