// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use super::protocol::{ChildMessage, ParentMessage};
use crate::process::{ExitWatch, WatchedProcess, wait_for_exit};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use nix::sys::signal::Signal;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::process::Command;
use tokio::sync::mpsc;

pub const ENV_IPC_PATH: &str = "TSWATCH_IPC_PATH";
pub const ENV_CHILD_ENTRY: &str = "TSWATCH_CHILD_ENTRY";
pub const ENV_CHILD_CWD: &str = "TSWATCH_CHILD_CWD";
pub const ENV_KEEPALIVE: &str = "TSWATCH_KEEPALIVE";
pub const ENV_CRASH_EXIT_CODE: &str = "TSWATCH_CRASH_EXIT_CODE";

/// Exit code a child uses to report an uncaught crash under keep-alive.
/// `EX_TEMPFAIL` from sysexits.h.
pub const CRASH_EXIT_CODE: i32 = 75;

/// Stop controls for one launched child.
pub trait ChildHandle: Send + Sync {
    /// Cooperative stop request.
    fn request_stop(&self);
    fn force_kill(&self);
}

/// A launched child: its inbound messages, exit and stop controls.
pub struct ChildLink {
    pub pid: Option<u32>,
    pub messages: mpsc::UnboundedReceiver<ChildMessage>,
    pub exit: ExitWatch,
    pub handle: Box<dyn ChildHandle>,
}

/// Starts one child generation.
pub trait Launcher: Send {
    fn launch(&mut self, ordinal: u64) -> Result<ChildLink>;
}

/// What to run for every generation.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    pub keep_alive: bool,
    /// Directory holding the per-generation sockets.
    pub ipc_dir: PathBuf,
}

/// Spawns the application as a subprocess connected over a Unix socket.
pub struct ProcessLauncher {
    spec: LaunchSpec,
}

impl ProcessLauncher {
    pub fn new(spec: LaunchSpec) -> Self {
        Self { spec }
    }

    fn socket_path(&self, ordinal: u64) -> PathBuf {
        self.spec.ipc_dir.join(format!("gen-{ordinal}.sock"))
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&mut self, ordinal: u64) -> Result<ChildLink> {
        let name = format!("app#{ordinal}");
        let socket_path = self.socket_path(ordinal);
        // A stale socket from an earlier run would make bind fail.
        let _ = std::fs::remove_file(&socket_path);
        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("[{name}] failed to bind {}", socket_path.display()))?;

        let spec = &self.spec;
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.cwd)
            .envs(&spec.env)
            .env(ENV_IPC_PATH, &socket_path)
            .env(ENV_CHILD_ENTRY, &spec.program)
            .env(ENV_CHILD_CWD, &spec.cwd)
            .env(ENV_KEEPALIVE, if spec.keep_alive { "true" } else { "false" })
            .env(ENV_CRASH_EXIT_CODE, CRASH_EXIT_CODE.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let child = cmd
            .spawn()
            .with_context(|| format!("[{name}] failed to spawn: {}", spec.program))?;
        let pid = child.id();
        info!(
            "[{name}] spawned (pid={}, cmd={}, args={:?})",
            pid.unwrap_or(0),
            spec.program,
            spec.args
        );

        let process = WatchedProcess::watch(name.clone(), child);
        let exit = process.exit_watch();
        let connected = Arc::new(AtomicBool::new(false));
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(serve_ipc(
            name,
            listener,
            socket_path,
            Arc::clone(&connected),
            message_tx,
            outbound_rx,
            process.exit_watch(),
        ));

        Ok(ChildLink {
            pid,
            messages: message_rx,
            exit,
            handle: Box::new(ProcessHandle {
                process,
                outbound: outbound_tx,
                connected,
            }),
        })
    }
}

struct ProcessHandle {
    process: WatchedProcess,
    outbound: mpsc::UnboundedSender<ParentMessage>,
    connected: Arc<AtomicBool>,
}

impl ChildHandle for ProcessHandle {
    /// `server-kill` over IPC, or SIGTERM for a child that never connected.
    fn request_stop(&self) {
        let name = &self.process.name;
        if self.connected.load(Ordering::Acquire)
            && self.outbound.send(ParentMessage::ServerKill).is_ok()
        {
            debug!("[{name}] sent server-kill");
            return;
        }
        debug!("[{name}] not connected, sending SIGTERM");
        self.process.send_signal(Signal::SIGTERM);
    }

    fn force_kill(&self) {
        self.process.send_signal(Signal::SIGKILL);
    }
}

/// Accept the child's connection and shuttle JSON lines both ways until
/// either side goes away.
async fn serve_ipc(
    name: String,
    listener: UnixListener,
    socket_path: PathBuf,
    connected: Arc<AtomicBool>,
    messages: mpsc::UnboundedSender<ChildMessage>,
    mut outbound: mpsc::UnboundedReceiver<ParentMessage>,
    mut exit: ExitWatch,
) {
    let accepted = tokio::select! {
        accepted = listener.accept() => match accepted {
            Ok((stream, _)) => Some(stream),
            Err(e) => {
                warn!("[{name}] failed to accept IPC connection: {e}");
                None
            }
        },
        _ = wait_for_exit(&mut exit) => None,
    };
    drop(listener);
    remove_socket(&socket_path).await;

    let Some(stream) = accepted else {
        return;
    };
    connected.store(true, Ordering::Release);
    debug!("[{name}] IPC connected");

    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match ChildMessage::from_line(&line) {
                    Ok(msg) => {
                        if messages.send(msg).is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!("[{name}] ignoring malformed message: {e}"),
                },
                Ok(None) => break,
                Err(e) => {
                    debug!("[{name}] IPC read failed: {e}");
                    break;
                }
            },
            msg = outbound.recv() => {
                let Some(msg) = msg else {
                    break;
                };
                match msg.to_line() {
                    Ok(line) => {
                        if let Err(e) = write_half.write_all(line.as_bytes()).await {
                            debug!("[{name}] IPC write failed: {e}");
                        }
                    }
                    Err(e) => warn!("[{name}] failed to encode message: {e}"),
                }
            }
        }
    }
    connected.store(false, Ordering::Release);
}

async fn remove_socket(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        debug!("failed to remove {}: {e}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ChildExit;
    use tokio::io::AsyncReadExt;
    use tokio::net::UnixStream;
    use tokio::time::{Duration, timeout};

    fn spec(dir: &Path, script: &str) -> LaunchSpec {
        LaunchSpec {
            program: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            cwd: dir.to_path_buf(),
            env: HashMap::from([("APP_MODE".to_string(), "test".to_string())]),
            keep_alive: true,
            ipc_dir: dir.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn test_unconnected_child_is_stopped_with_sigterm() {
        let dir = tempfile::tempdir().unwrap();
        let mut launcher = ProcessLauncher::new(spec(dir.path(), "exec sleep 60"));
        let mut link = launcher.launch(1).unwrap();
        assert!(link.pid.is_some());

        link.handle.request_stop();
        let exit = timeout(Duration::from_secs(5), wait_for_exit(&mut link.exit))
            .await
            .unwrap();
        assert_eq!(exit, Some(ChildExit::Signal(Signal::SIGTERM as i32)));
    }

    #[tokio::test]
    async fn test_child_environment() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("env.txt");
        let script = format!(
            "echo \"$APP_MODE $TSWATCH_KEEPALIVE $TSWATCH_CRASH_EXIT_CODE $TSWATCH_IPC_PATH\" > {}",
            out.display()
        );
        let mut launcher = ProcessLauncher::new(spec(dir.path(), &script));
        let mut link = launcher.launch(4).unwrap();
        assert_eq!(wait_for_exit(&mut link.exit).await, Some(ChildExit::Code(0)));

        let written = std::fs::read_to_string(&out).unwrap();
        let expected_socket = dir.path().join("gen-4.sock");
        assert_eq!(
            written.trim(),
            format!("test true 75 {}", expected_socket.display())
        );
    }

    #[tokio::test]
    async fn test_messages_flow_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let mut launcher = ProcessLauncher::new(spec(dir.path(), "exec sleep 60"));
        let mut link = launcher.launch(2).unwrap();

        // Play the child's side of the socket.
        let socket = dir.path().join("gen-2.sock");
        let mut stream = UnixStream::connect(&socket).await.unwrap();
        stream
            .write_all(b"{\"title\":\"server-ready\",\"port\":7001}\n")
            .await
            .unwrap();
        let msg = timeout(Duration::from_secs(5), link.messages.recv())
            .await
            .unwrap();
        assert_eq!(msg, Some(ChildMessage::ready(Some(7001), None)));

        // Connected now, so the stop request goes over IPC.
        link.handle.request_stop();
        let mut buf = vec![0u8; 64];
        let n = timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"{\"title\":\"server-kill\"}\n");

        link.handle.force_kill();
        let exit = wait_for_exit(&mut link.exit).await;
        assert_eq!(exit, Some(ChildExit::Signal(Signal::SIGKILL as i32)));
    }

    #[tokio::test]
    async fn test_launch_fails_for_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = spec(dir.path(), "");
        spec.program = "/nonexistent/app".to_string();
        assert!(ProcessLauncher::new(spec).launch(1).is_err());
    }
}
