// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Classification of the compiler's human-readable stdout.
//!
//! The compiler offers no machine-readable progress stream, so cycles are
//! recognised from three line shapes:
//!
//! - `TSFILE: /abs/path/out.js`, one line per emitted file (only printed with
//!   `--listEmittedFiles`),
//! - a diagnostic containing an error code such as `TS2304`,
//! - a summary line such as `[10:41:23 AM] Found 0 errors. Watching for file
//!   changes.` whose whitespace-delimited integers end with a literal `0`.
//!
//! If the compiler changes any of these shapes, classification silently stops
//! working. There is no fallback.

use regex::Regex;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::LazyLock;

pub const EMITTED_FILE_SENTINEL: &str = "TSFILE: ";

static ERROR_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Za-z]{2}\d{4,5}\b").expect("error-code pattern is valid"));

const DECLARATION_SUFFIXES: &[&str] = &[
    ".d.ts",
    ".d.mts",
    ".d.cts",
    ".d.ts.map",
    ".d.mts.map",
    ".d.cts.map",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileEventKind {
    /// First successful watch cycle in the compiler's life.
    FirstWatchSuccess,
    WatchSuccess,
    WatchFail,
    OneShotSuccess,
    OneShotFail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileEvent {
    pub kind: CompileEventKind,
    pub changed_files: BTreeSet<PathBuf>,
    pub exit_code: Option<i32>,
}

impl CompileEvent {
    pub fn new(kind: CompileEventKind) -> Self {
        Self {
            kind,
            changed_files: BTreeSet::new(),
            exit_code: None,
        }
    }

    pub fn watch_success(changed_files: BTreeSet<PathBuf>) -> Self {
        Self {
            kind: CompileEventKind::WatchSuccess,
            changed_files,
            exit_code: None,
        }
    }

    /// One-shot result, derived only from the exit code.
    pub fn from_exit_code(code: i32) -> Self {
        let kind = if code == 0 {
            CompileEventKind::OneShotSuccess
        } else {
            CompileEventKind::OneShotFail
        };
        Self {
            kind,
            changed_files: BTreeSet::new(),
            exit_code: Some(code),
        }
    }
}

/// Output paths emitted during the current cycle.
#[derive(Debug, Default)]
pub struct WatchAccumulator {
    files: BTreeSet<PathBuf>,
}

impl WatchAccumulator {
    pub fn insert(&mut self, path: PathBuf) {
        self.files.insert(path);
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn take(&mut self) -> BTreeSet<PathBuf> {
        std::mem::take(&mut self.files)
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }
}

/// Result of feeding one stdout chunk.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Classified {
    /// Text to echo to the console, with sentinel lines removed.
    pub echo: String,
    pub events: Vec<CompileEvent>,
}

/// Stateful line classifier for a watch-mode compiler.
#[derive(Debug, Default)]
pub struct OutputClassifier {
    partial: String,
    accumulator: WatchAccumulator,
    first_success_seen: bool,
    /// An error-code line was seen since the last summary line.
    cycle_failed: bool,
}

impl OutputClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_files(&self) -> usize {
        self.accumulator.len()
    }

    /// Classify a chunk. Incomplete trailing lines are held back until the
    /// next chunk completes them.
    pub fn feed(&mut self, chunk: &str) -> Classified {
        self.partial.push_str(chunk);
        let Some(last_newline) = self.partial.rfind('\n') else {
            return Classified::default();
        };
        let rest = self.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        self.classify_lines(&complete)
    }

    /// Classify whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Classified {
        if self.partial.is_empty() {
            return Classified::default();
        }
        let mut remaining = std::mem::take(&mut self.partial);
        remaining.push('\n');
        self.classify_lines(&remaining)
    }

    /// Lines are handled in order. The first error-code line of a cycle
    /// reports `WatchFail`; a summary line (one carrying an integer token)
    /// ends the cycle, reporting success when its last integer is `0` and the
    /// cycle saw no error.
    fn classify_lines(&mut self, text: &str) -> Classified {
        let mut out = Classified::default();

        for line in text.split_inclusive('\n') {
            if let Some(path) = emitted_file(line) {
                if !is_declaration_output(&path) {
                    self.accumulator.insert(path);
                }
                continue;
            }
            out.echo.push_str(line);

            if has_error_code(line) {
                if !self.cycle_failed {
                    self.cycle_failed = true;
                    self.accumulator.clear();
                    out.events.push(CompileEvent::new(CompileEventKind::WatchFail));
                }
                continue;
            }

            let Some(count) = last_integer(line) else {
                continue;
            };
            if !self.cycle_failed && count == "0" {
                out.events.push(self.success());
            }
            self.cycle_failed = false;
            self.accumulator.clear();
        }

        out
    }

    fn success(&mut self) -> CompileEvent {
        if self.first_success_seen {
            CompileEvent::watch_success(self.accumulator.take())
        } else {
            self.first_success_seen = true;
            CompileEvent::new(CompileEventKind::FirstWatchSuccess)
        }
    }
}

fn emitted_file(line: &str) -> Option<PathBuf> {
    let start = line.find(EMITTED_FILE_SENTINEL)? + EMITTED_FILE_SENTINEL.len();
    let path = line.get(start..)?.trim();
    if path.is_empty() {
        return None;
    }
    Some(PathBuf::from(path))
}

pub fn is_declaration_output(path: &std::path::Path) -> bool {
    let name = path.to_string_lossy();
    DECLARATION_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

pub fn has_error_code(line: &str) -> bool {
    ERROR_CODE.is_match(line)
}

/// A summary line reports zero diagnostics: among its whitespace-delimited
/// tokens there is at least one integer, and the last integer is `0`.
pub fn is_success_summary(line: &str) -> bool {
    last_integer(line) == Some("0")
}

fn last_integer(line: &str) -> Option<&str> {
    line.split_whitespace()
        .filter(|token| token.bytes().all(|b| b.is_ascii_digit()))
        .last()
}
