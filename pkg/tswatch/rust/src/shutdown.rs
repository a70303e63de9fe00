// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::process::{ChildExit, ExitWatch, wait_for_exit};
use log::{info, warn};
use tokio::time::{Duration, timeout};

pub const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_millis(2000);

const SIGKILL_TIMEOUT: Duration = Duration::from_secs(10);

/// Graceful-request-then-escalate contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KillPolicy {
    pub timeout: Duration,
}

impl Default for KillPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_KILL_TIMEOUT,
        }
    }
}

impl KillPolicy {
    pub fn from_millis(ms: u64) -> Self {
        Self {
            timeout: Duration::from_millis(ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was sent, the process was already gone.
    AlreadyExited(Option<ChildExit>),
    /// Exited on its own after the stop request.
    Graceful(Option<ChildExit>),
    /// Exited after being force-terminated.
    Forced(Option<ChildExit>),
    /// Still not reaped after the forced termination.
    Unresponsive,
}

/// Ask a process to stop, wait up to `policy.timeout`, then force it.
///
/// `request` is the cooperative stop (an IPC message or SIGTERM) and `force`
/// the forced termination. Neither is invoked for a process that has already
/// exited.
pub async fn stop_gracefully(
    name: &str,
    exit: &mut ExitWatch,
    policy: KillPolicy,
    request: impl FnOnce(),
    force: impl FnOnce(),
) -> StopOutcome {
    let already = *exit.borrow();
    if let Some(status) = already {
        return StopOutcome::AlreadyExited(Some(status));
    }
    if exit.has_changed().is_err() {
        return StopOutcome::AlreadyExited(None);
    }

    request();

    match timeout(policy.timeout, wait_for_exit(exit)).await {
        Ok(status) => StopOutcome::Graceful(status),
        Err(_) => {
            warn!(
                "[{name}] kill timeout ({}ms) reached, forcing termination",
                policy.timeout.as_millis()
            );
            force();
            match timeout(SIGKILL_TIMEOUT, wait_for_exit(exit)).await {
                Ok(status) => {
                    info!("[{name}] terminated");
                    StopOutcome::Forced(status)
                }
                Err(_) => {
                    warn!("[{name}] still running after SIGKILL, giving up");
                    StopOutcome::Unresponsive
                }
            }
        }
    }
}
