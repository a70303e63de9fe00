// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fmt;

/// Readiness of a single child generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Forked, no readiness message and no exit seen yet.
    Unknown,
    /// Sent `server-ready`.
    Ready,
    /// Exited with a failure before becoming ready.
    Failed,
}

impl Readiness {
    pub(crate) fn can_transition_to(self, next: Readiness) -> bool {
        use Readiness::*;
        matches!((self, next), (Unknown, Ready) | (Unknown, Failed))
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Readiness::Unknown => write!(f, "unknown"),
            Readiness::Ready => write!(f, "ready"),
            Readiness::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of the most recent bootstrap attempt, across generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BootstrapStatus {
    /// No generation has become ready or failed yet.
    #[default]
    Unset,
    Success,
    Fail,
}

impl fmt::Display for BootstrapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapStatus::Unset => write!(f, "unset"),
            BootstrapStatus::Success => write!(f, "success"),
            BootstrapStatus::Fail => write!(f, "fail"),
        }
    }
}

/// Gate for automatic re-forks after a keep-alive crash.
///
/// A crash exit on its own never changes the status. Only readiness moves it
/// to `Success` and only a failed bootstrap moves it to `Fail`, so an
/// application that dies on every boot cannot enter a restart loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeepAliveState {
    last_bootstrap_status: BootstrapStatus,
}

impl KeepAliveState {
    pub fn last_bootstrap_status(&self) -> BootstrapStatus {
        self.last_bootstrap_status
    }

    pub fn record_ready(&mut self) {
        self.last_bootstrap_status = BootstrapStatus::Success;
    }

    pub fn record_bootstrap_failure(&mut self) {
        self.last_bootstrap_status = BootstrapStatus::Fail;
    }

    /// Only an application that has proven it can boot is re-forked.
    pub fn allows_refork(&self) -> bool {
        self.last_bootstrap_status == BootstrapStatus::Success
    }
}
