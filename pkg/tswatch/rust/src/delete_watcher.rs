// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Source deletions, which the compiler's watch mode never reports.
//!
//! Additions and edits are left to the compiler. Only removals and
//! renames away from a path are forwarded.

use anyhow::{Context, Result};
use log::{debug, warn};
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// Recursive watcher over the source directory. Dropping it stops watching.
pub struct DeleteWatcher {
    _watcher: RecommendedWatcher,
}

impl DeleteWatcher {
    /// Forward every deleted path, relative to `source_dir`, to `sender`.
    pub fn start(source_dir: &Path, sender: mpsc::UnboundedSender<PathBuf>) -> Result<Self> {
        let root = source_dir
            .canonicalize()
            .with_context(|| format!("failed to resolve {}", source_dir.display()))?;

        let callback_root = root.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for path in deleted_paths(&event) {
                        match path.strip_prefix(&callback_root) {
                            Ok(relative) if !relative.as_os_str().is_empty() => {
                                debug!("source deleted: {}", relative.display());
                                let _ = sender.send(relative.to_path_buf());
                            }
                            _ => {}
                        }
                    }
                }
                Err(e) => warn!("delete watcher error: {e}"),
            },
            Config::default(),
        )
        .context("failed to create delete watcher")?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .with_context(|| format!("failed to watch {}", root.display()))?;
        debug!("watching {} for deletions", root.display());

        Ok(Self { _watcher: watcher })
    }
}

/// Paths an event removed. A rename reported as a single `Both` event is
/// preceded by a `From` event for the same path, so only `From` counts.
fn deleted_paths(event: &Event) -> Vec<&PathBuf> {
    match event.kind {
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            event.paths.iter().collect()
        }
        // Backends that cannot tell the direction of a rename.
        EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => {
            event.paths.iter().filter(|p| !p.exists()).collect()
        }
        _ => Vec::new(),
    }
}
