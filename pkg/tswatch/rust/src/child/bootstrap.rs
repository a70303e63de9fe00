// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Application-side half of the supervisor link.
//!
//! A Rust application started by `tswatch` reads its [`LaunchContext`],
//! connects back with [`ParentLink::connect`], reports readiness once it
//! serves traffic and stops when [`ParentLink::shutdown_requested`] resolves.

use super::launcher::{
    CRASH_EXIT_CODE, ENV_CHILD_CWD, ENV_CHILD_ENTRY, ENV_CRASH_EXIT_CODE, ENV_IPC_PATH,
    ENV_KEEPALIVE,
};
use super::protocol::{ChildMessage, ParentMessage};
use anyhow::{Context, Result};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::watch;

/// What the supervisor exported to a launched application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchContext {
    /// Program the supervisor launched.
    pub entry: String,
    pub cwd: PathBuf,
    pub ipc_path: PathBuf,
    /// Exit code to use on a crash, when keep-alive is on.
    pub crash_exit_code: Option<i32>,
}

impl LaunchContext {
    /// `None` when the process was not started by a supervisor.
    pub fn from_env() -> Option<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let ipc_path = PathBuf::from(var(ENV_IPC_PATH)?);
        let entry = var(ENV_CHILD_ENTRY).unwrap_or_default();
        let cwd = var(ENV_CHILD_CWD).map(PathBuf::from).unwrap_or_default();
        let crash_exit_code = crash_trap_code(
            var(ENV_KEEPALIVE).as_deref(),
            var(ENV_CRASH_EXIT_CODE).as_deref(),
        );
        Some(Self {
            entry,
            cwd,
            ipc_path,
            crash_exit_code,
        })
    }
}

pub struct ParentLink {
    writer: OwnedWriteHalf,
    shutdown: watch::Receiver<bool>,
}

impl ParentLink {
    pub async fn connect(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path)
            .await
            .with_context(|| format!("failed to connect to supervisor at {}", path.display()))?;
        let (read_half, writer) = stream.into_split();
        let (tx, rx) = watch::channel(false);

        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match ParentMessage::from_line(&line) {
                        Ok(ParentMessage::ServerKill) => {
                            debug!("supervisor requested shutdown");
                            let _ = tx.send(true);
                        }
                        Err(e) => debug!("ignoring malformed supervisor message: {e}"),
                    },
                    // The supervisor is gone, nobody is left to stop us.
                    Ok(None) | Err(_) => {
                        let _ = tx.send(true);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            writer,
            shutdown: rx,
        })
    }

    pub async fn send_ready(&mut self, port: Option<u16>, ssl: Option<bool>) -> Result<()> {
        self.send(&ChildMessage::ready(port, ssl)).await
    }

    pub async fn send_debug_url(&mut self, debug_url: impl Into<String>) -> Result<()> {
        self.send(&ChildMessage::DebugUrl {
            debug_url: debug_url.into(),
        })
        .await
    }

    async fn send(&mut self, msg: &ChildMessage) -> Result<()> {
        let line = msg.to_line()?;
        self.writer
            .write_all(line.as_bytes())
            .await
            .context("failed to write to supervisor")
    }

    /// Resolves once the supervisor asks for shutdown or disconnects.
    pub async fn shutdown_requested(&mut self) {
        let _ = self.shutdown.wait_for(|requested| *requested).await;
    }
}

/// Exit with the reserved crash code on any panic when the supervisor runs
/// with keep-alive. Returns whether the hook was installed.
pub fn install_crash_trap() -> bool {
    let Some(code) = LaunchContext::from_env().and_then(|context| context.crash_exit_code) else {
        return false;
    };

    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        previous(info);
        std::process::exit(code);
    }));
    true
}

fn crash_trap_code(keep_alive: Option<&str>, code: Option<&str>) -> Option<i32> {
    if keep_alive != Some("true") {
        return None;
    }
    match code.map(str::parse::<i32>) {
        Some(Ok(code)) => Some(code),
        Some(Err(e)) => {
            warn!("invalid {ENV_CRASH_EXIT_CODE}: {e}, using {CRASH_EXIT_CODE}");
            Some(CRASH_EXIT_CODE)
        }
        None => Some(CRASH_EXIT_CODE),
    }
}
