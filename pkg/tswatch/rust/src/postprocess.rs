// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result, bail};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use walkdir::WalkDir;

/// Source files the compiler emits itself, plus trees that never ship.
const IGNORED: &[&str] = &[
    "**/node_modules/**",
    "**/__test__/**",
    "**/*.ts",
    "**/*.tsx",
    "**/*.mts",
    "**/*.cts",
];

/// With `allowJs` the compiler copies JavaScript sources on its own.
const IGNORED_WITH_ALLOW_JS: &str = "**/*.js";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostProcessReport {
    pub alias_rewritten: bool,
    pub copied: usize,
    pub unchanged: usize,
    pub elapsed: Duration,
}

/// Work done on the output directory after the compiler emitted it.
///
/// Runs on the blocking pool.
pub trait PostProcessor: Send + Sync {
    fn run(&self) -> Result<PostProcessReport>;
}

pub struct OutputPostProcessor {
    pub cwd: PathBuf,
    pub source_dir: PathBuf,
    pub out_dir: PathBuf,
    pub allow_js: bool,
    /// External alias rewriter, program followed by its arguments.
    pub alias_command: Option<Vec<String>>,
}

impl PostProcessor for OutputPostProcessor {
    fn run(&self) -> Result<PostProcessReport> {
        let started = Instant::now();
        let mut report = PostProcessReport::default();

        if let Some(command) = &self.alias_command {
            run_alias_command(command, &self.cwd)?;
            report.alias_rewritten = true;
        }

        let (copied, unchanged) = copy_assets(&self.source_dir, &self.out_dir, self.allow_js)?;
        report.copied = copied;
        report.unchanged = unchanged;
        report.elapsed = started.elapsed();
        debug!(
            "post-processing done: {} copied, {} unchanged in {}ms",
            report.copied,
            report.unchanged,
            report.elapsed.as_millis()
        );
        Ok(report)
    }
}

fn run_alias_command(command: &[String], cwd: &Path) -> Result<()> {
    let Some((program, args)) = command.split_first() else {
        bail!("alias command is empty");
    };
    info!("rewriting path aliases with {program}");
    let status = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .status()
        .with_context(|| format!("failed to run alias command: {program}"))?;
    if !status.success() {
        bail!("alias command {program} failed with {status}");
    }
    Ok(())
}

fn is_ignored(relative: &str, allow_js: bool) -> bool {
    IGNORED
        .iter()
        .any(|pattern| glob_match::glob_match(pattern, relative))
        || (allow_js && glob_match::glob_match(IGNORED_WITH_ALLOW_JS, relative))
}

/// Copy every non-source file from `source_dir` into `out_dir`, skipping
/// targets whose content already matches. Returns (copied, unchanged).
pub fn copy_assets(source_dir: &Path, out_dir: &Path, allow_js: bool) -> Result<(usize, usize)> {
    if !source_dir.is_dir() {
        debug!("source dir {} does not exist, nothing to copy", source_dir.display());
        return Ok((0, 0));
    }

    let mut copied = 0;
    let mut unchanged = 0;
    let walker = WalkDir::new(source_dir).follow_links(true).into_iter();
    for entry in walker.filter_entry(|e| {
        let name = e.file_name().to_string_lossy();
        !(e.file_type().is_dir() && (name == "node_modules" || name == "__test__"))
    }) {
        let entry = entry.with_context(|| format!("failed to walk {}", source_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(source_dir) else {
            continue;
        };
        if is_ignored(&relative.to_string_lossy(), allow_js) {
            continue;
        }

        let target = out_dir.join(relative);
        if same_content(entry.path(), &target)? {
            unchanged += 1;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::copy(entry.path(), &target).with_context(|| {
            format!(
                "failed to copy {} to {}",
                entry.path().display(),
                target.display()
            )
        })?;
        copied += 1;
    }
    Ok((copied, unchanged))
}

fn same_content(source: &Path, target: &Path) -> Result<bool> {
    let Ok(target_meta) = std::fs::metadata(target) else {
        return Ok(false);
    };
    let source_meta = std::fs::metadata(source)
        .with_context(|| format!("failed to stat {}", source.display()))?;
    if !target_meta.is_file() || target_meta.len() != source_meta.len() {
        return Ok(false);
    }
    let source_bytes =
        std::fs::read(source).with_context(|| format!("failed to read {}", source.display()))?;
    let target_bytes =
        std::fs::read(target).with_context(|| format!("failed to read {}", target.display()))?;
    Ok(source_bytes == target_bytes)
}
