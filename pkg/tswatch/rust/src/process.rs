// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use log::{info, warn};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use tokio::process::Child;
use tokio::sync::watch;

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    Code(i32),
    Signal(i32),
}

impl ChildExit {
    pub fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => ChildExit::Code(code),
            None => ChildExit::Signal(status.signal().unwrap_or(0)),
        }
    }

    pub fn code(self) -> Option<i32> {
        match self {
            ChildExit::Code(code) => Some(code),
            ChildExit::Signal(_) => None,
        }
    }

    pub fn success(self) -> bool {
        self == ChildExit::Code(0)
    }
}

impl fmt::Display for ChildExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildExit::Code(code) => write!(f, "exit code {code}"),
            ChildExit::Signal(sig) => write!(f, "signal {sig}"),
        }
    }
}

/// Receives `Some(exit)` once the process has been reaped.
pub type ExitWatch = watch::Receiver<Option<ChildExit>>;

/// Wait until the exit is published. Returns `None` if the waiter went away
/// without observing an exit status.
pub async fn wait_for_exit(exit: &mut ExitWatch) -> Option<ChildExit> {
    let waited = exit.wait_for(Option::is_some).await.map(|status| *status);
    match waited {
        Ok(status) => status,
        Err(_) => *exit.borrow(),
    }
}

/// A spawned process reaped by a background task.
///
/// The task owns the `Child`; everybody else observes the exit through a
/// watch channel and signals the process by PID.
pub struct WatchedProcess {
    pub name: String,
    pid: Option<u32>,
    exit: ExitWatch,
}

impl WatchedProcess {
    pub fn watch(name: impl Into<String>, mut child: Child) -> Self {
        let name = name.into();
        let pid = child.id();
        let (tx, rx) = watch::channel(None);

        let task_name = name.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    let exit = ChildExit::from_status(status);
                    info!("[{task_name}] exited with {exit}");
                    let _ = tx.send(Some(exit));
                }
                Err(e) => warn!("[{task_name}] failed to wait on process: {e}"),
            }
        });

        Self {
            name,
            pid,
            exit: rx,
        }
    }

    pub fn exit_watch(&self) -> ExitWatch {
        self.exit.clone()
    }

    pub fn exit_status(&self) -> Option<ChildExit> {
        *self.exit.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_status().is_some()
    }

    pub fn send_signal(&self, sig: Signal) {
        if self.has_exited() {
            return;
        }
        if let Some(pid) = self.pid {
            send_signal(&self.name, pid, sig);
        }
    }

    pub async fn wait(&mut self) -> Option<ChildExit> {
        wait_for_exit(&mut self.exit).await
    }
}

pub fn send_signal(name: &str, pid: u32, sig: Signal) {
    let Ok(raw) = i32::try_from(pid) else {
        warn!("[{name}] pid {pid} out of range, cannot send {sig}");
        return;
    };
    if let Err(e) = signal::kill(Pid::from_raw(raw), sig) {
        warn!("[{name}] failed to send {sig}: {e}");
    }
}
