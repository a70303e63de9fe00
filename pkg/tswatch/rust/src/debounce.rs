// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use tokio::time::{Duration, Instant, sleep_until};

pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(1000);

/// Trailing-edge debounce holding at most one pending value.
///
/// Every trigger pushes the deadline out by the quiet period. `fired` is
/// cancel-safe: dropping it before the deadline leaves the value pending.
#[derive(Debug)]
pub struct Debouncer<T> {
    quiet: Duration,
    pending: Option<(T, Instant)>,
}

impl<T> Debouncer<T> {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            pending: None,
        }
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet
    }

    /// Replace any pending value and restart the quiet period.
    pub fn trigger(&mut self, value: T) {
        self.pending = Some((value, Instant::now() + self.quiet));
    }

    /// Fold `value` into the pending one (or start a new one) and restart
    /// the quiet period.
    pub fn merge(&mut self, value: T, combine: impl FnOnce(&mut T, T)) {
        let merged = match self.pending.take() {
            Some((mut current, _)) => {
                combine(&mut current, value);
                current
            }
            None => value,
        };
        self.trigger(merged);
    }

    pub fn cancel(&mut self) -> Option<T> {
        self.pending.take().map(|(value, _)| value)
    }

    /// Take the pending value without waiting for the deadline.
    pub fn flush(&mut self) -> Option<T> {
        self.cancel()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, deadline)| *deadline)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Resolve with the pending value once its deadline passes. Never
    /// resolves while nothing is pending.
    pub async fn fired(&mut self) -> T {
        loop {
            match self.deadline() {
                Some(deadline) => {
                    sleep_until(deadline).await;
                    if let Some((value, _)) = self.pending.take() {
                        return value;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        }
    }
}
