// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! User-facing progress lines.

use crate::child::ReadyReport;
use crate::coordinator::CycleReport;
use log::{info, warn};
use std::time::Duration;

const BANNER_WIDTH: usize = 120;

pub fn keep_alive_crash(ordinal: u64) {
    let rule = "*".repeat(BANNER_WIDTH);
    warn!("{rule}");
    warn!("[app#{ordinal}] a critical uncaught error was detected and the process has exited");
    warn!("please make sure to handle it");
    warn!("keep-alive is enabled, the application will be restarted if it booted successfully before");
    warn!("{rule}");
}

pub fn ready(report: &ReadyReport, alias_rewrite: bool) {
    let ms = report.elapsed.as_millis();
    if report.is_first {
        if alias_rewrite {
            info!("[app#{}] server started in {ms} ms with alias rewrite", report.ordinal);
        } else {
            info!("[app#{}] server started in {ms} ms", report.ordinal);
        }
        if let Some(port) = report.port {
            let scheme = if report.ssl == Some(true) { "https" } else { "http" };
            info!("  Local:    {scheme}://127.0.0.1:{port}/");
        }
    } else {
        info!("[app#{}] server restarted in {ms} ms", report.ordinal);
    }
    if let Some(url) = &report.debug_url {
        info!("  Debugger: {}", devtools_url(url));
    }
}

fn devtools_url(debug_url: &str) -> String {
    let target = debug_url.strip_prefix("ws://").unwrap_or(debug_url);
    format!("devtools://devtools/bundled/inspector.html?experiments=true&v8only=true&ws={target}")
}

pub fn cycle(report: &CycleReport) {
    if report.changed > 0 {
        info!("{} files have been changed", report.changed);
    }
    match report.ordinal {
        Some(ordinal) => info!(
            "restarting as app#{ordinal} (stop and post-processing took {} ms)",
            report.kill_and_post.as_millis()
        ),
        None => info!(
            "output updated in {} ms",
            report.kill_and_post.as_millis()
        ),
    }
}

/// Named phase durations, printed as a table when startup profiling is on.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PhaseTimings {
    phases: Vec<(String, Duration)>,
}

impl PhaseTimings {
    pub fn record(&mut self, name: impl Into<String>, elapsed: Duration) {
        self.phases.push((name.into(), elapsed));
    }

    pub fn render(&self) -> Vec<String> {
        let width = self
            .phases
            .iter()
            .map(|(name, _)| name.len())
            .max()
            .unwrap_or(0)
            .max("name".len());
        let mut lines = vec![format!("{:<width$}  duration(ms)", "name")];
        for (name, elapsed) in &self.phases {
            lines.push(format!(
                "{name:<width$}  {:.2}",
                elapsed.as_secs_f64() * 1000.0
            ));
        }
        lines
    }

    pub fn log(&self) {
        for line in self.render() {
            info!("{line}");
        }
    }
}
