// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::child::{ChildSupervisor, Launcher};
use crate::debounce::Debouncer;
use crate::postprocess::{PostProcessReport, PostProcessor};
use anyhow::{Context, Result};
use log::{debug, error};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

/// Pending restart: what changed, and whether it must run regardless.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestartRequest {
    pub changed: BTreeSet<PathBuf>,
    /// Set by triggers that carry no file list, e.g. source deletions.
    pub unconditional: bool,
}

impl RestartRequest {
    pub fn from_trigger(changed: Option<BTreeSet<PathBuf>>) -> Self {
        match changed {
            Some(changed) => Self {
                changed,
                unconditional: false,
            },
            None => Self {
                changed: BTreeSet::new(),
                unconditional: true,
            },
        }
    }

    fn absorb(&mut self, other: RestartRequest) {
        self.changed.extend(other.changed);
        self.unconditional |= other.unconditional;
    }

    /// A compile that emitted nothing is not worth a restart.
    pub fn should_run(&self) -> bool {
        self.unconditional || !self.changed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub changed: usize,
    /// Generation forked by this cycle.
    pub ordinal: Option<u64>,
    pub post: Option<PostProcessReport>,
    /// Time spent on post-processing and the kill, which run together.
    pub kill_and_post: Duration,
}

/// Debounces restart triggers and runs one cycle at a time.
pub struct RestartCoordinator {
    debouncer: Debouncer<RestartRequest>,
    post: Arc<dyn PostProcessor>,
}

impl RestartCoordinator {
    pub fn new(quiet: Duration, post: Arc<dyn PostProcessor>) -> Self {
        Self {
            debouncer: Debouncer::new(quiet),
            post,
        }
    }

    pub fn trigger(&mut self, changed: Option<BTreeSet<PathBuf>>) {
        let request = RestartRequest::from_trigger(changed);
        self.debouncer.merge(request, RestartRequest::absorb);
    }

    /// Drop any pending restart.
    pub fn cancel(&mut self) {
        if self.debouncer.cancel().is_some() {
            debug!("pending restart cancelled");
        }
    }

    pub fn is_pending(&self) -> bool {
        self.debouncer.is_pending()
    }

    /// Resolves with the merged request once the quiet period has passed.
    pub async fn fired(&mut self) -> RestartRequest {
        self.debouncer.fired().await
    }

    /// Post-process and stop the current generation concurrently, then fork
    /// the next one. Returns `None` for a request with nothing to do.
    pub async fn run_cycle<L: Launcher>(
        &self,
        request: RestartRequest,
        child: Option<&mut ChildSupervisor<L>>,
    ) -> Result<Option<CycleReport>> {
        if !request.should_run() {
            debug!("compile emitted no files, skipping restart");
            return Ok(None);
        }

        let started = Instant::now();
        let (post, ordinal, kill_and_post) = match child {
            Some(child) => {
                let (post, killed) = tokio::join!(self.post_process(), child.kill());
                killed?;
                let kill_and_post = started.elapsed();
                let ordinal = if child.has_forked() {
                    Some(child.fork_next()?)
                } else {
                    None
                };
                (log_post_failure(post), ordinal, kill_and_post)
            }
            None => {
                let post = log_post_failure(self.post_process().await);
                (post, None, started.elapsed())
            }
        };

        Ok(Some(CycleReport {
            changed: request.changed.len(),
            ordinal,
            post,
            kill_and_post,
        }))
    }

    /// Run the post-processor on the blocking pool.
    pub async fn post_process(&self) -> Result<PostProcessReport> {
        let post = Arc::clone(&self.post);
        tokio::task::spawn_blocking(move || post.run())
            .await
            .context("post-processing task panicked")?
    }
}

/// A failed post-processing step does not stop the restart; the previous
/// output is still usable.
fn log_post_failure(result: Result<PostProcessReport>) -> Option<PostProcessReport> {
    match result {
        Ok(report) => Some(report),
        Err(e) => {
            error!("post-processing failed: {e:#}");
            None
        }
    }
}
