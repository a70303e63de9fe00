// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::classifier::{CompileEvent, OutputClassifier};
use crate::process::{ChildExit, ExitWatch, WatchedProcess, wait_for_exit};
use crate::shutdown::{KillPolicy, StopOutcome, stop_gracefully};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use nix::sys::signal::Signal;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const NAME: &str = "tsc";
const READ_BUFFER_SIZE: usize = 16 * 1024;
const LIST_EMITTED_FILES: &str = "--listEmittedFiles";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileMode {
    /// Compiler stays resident and re-emits on change.
    Watch,
    /// Compiler runs once and exits.
    OneShot,
}

impl CompileMode {
    pub fn from_args(args: &[String]) -> Self {
        if args.iter().any(|a| a == "--watch" || a == "-w") {
            CompileMode::Watch
        } else {
            CompileMode::OneShot
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompilerEvent {
    Compile(CompileEvent),
    /// A watch-mode compiler ended on its own.
    Exited(Option<ChildExit>),
}

/// Emitted files are only printed with `--listEmittedFiles`, so watch mode
/// always asks for them.
pub fn prepare_args(args: &[String], mode: CompileMode) -> Vec<String> {
    let mut args = args.to_vec();
    if mode == CompileMode::Watch
        && !args.iter().any(|a| a == LIST_EMITTED_FILES)
        && !args.iter().any(|a| a == "--version" || a == "-v")
    {
        args.push(LIST_EMITTED_FILES.to_string());
    }
    args
}

/// The compiler subprocess and the task classifying its stdout.
pub struct CompilerProcess {
    process: WatchedProcess,
    reader: JoinHandle<()>,
}

impl CompilerProcess {
    pub fn spawn(
        program: &str,
        args: &[String],
        cwd: &Path,
        mode: CompileMode,
    ) -> Result<(Self, mpsc::UnboundedReceiver<CompilerEvent>)> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("[{NAME}] failed to spawn: {program}"))?;
        let stdout = child
            .stdout
            .take()
            .context("compiler stdout was not captured")?;

        info!(
            "[{NAME}] spawned (pid={}, cmd={program}, args={args:?})",
            child.id().unwrap_or(0)
        );

        let process = WatchedProcess::watch(NAME, child);
        let (tx, rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(pump_output(
            stdout,
            tokio::io::stdout(),
            mode,
            process.exit_watch(),
            tx,
        ));

        Ok((Self { process, reader }, rx))
    }

    /// SIGTERM, then SIGKILL once the kill timeout elapses.
    pub async fn stop(&mut self, policy: KillPolicy) -> StopOutcome {
        let mut exit = self.process.exit_watch();
        let process = &self.process;
        let outcome = stop_gracefully(
            NAME,
            &mut exit,
            policy,
            || {
                info!("[{NAME}] sending SIGTERM");
                process.send_signal(Signal::SIGTERM);
            },
            || process.send_signal(Signal::SIGKILL),
        )
        .await;
        self.reader.abort();
        outcome
    }
}

/// Echo and classify compiler stdout until EOF, then report how the process
/// ended.
async fn pump_output<R, W>(
    mut stdout: R,
    mut console: W,
    mode: CompileMode,
    mut exit: ExitWatch,
    tx: mpsc::UnboundedSender<CompilerEvent>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut classifier = OutputClassifier::new();
    let mut undecoded = Vec::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("[{NAME}] failed to read stdout: {e}");
                break;
            }
        };
        let Some(bytes) = buf.get(..n) else {
            break;
        };
        let chunk = decode_utf8(&mut undecoded, bytes);
        match mode {
            CompileMode::Watch => {
                let classified = classifier.feed(&chunk);
                echo(&mut console, &classified.echo).await;
                for event in classified.events {
                    debug!("[{NAME}] {:?}", event.kind);
                    let _ = tx.send(CompilerEvent::Compile(event));
                }
            }
            CompileMode::OneShot => echo(&mut console, &chunk).await,
        }
    }

    if mode == CompileMode::Watch {
        let classified = classifier.finish();
        echo(&mut console, &classified.echo).await;
        for event in classified.events {
            let _ = tx.send(CompilerEvent::Compile(event));
        }
    }

    let status = wait_for_exit(&mut exit).await;
    let event = match mode {
        CompileMode::OneShot => {
            let code = status.and_then(ChildExit::code).unwrap_or(1);
            CompilerEvent::Compile(CompileEvent::from_exit_code(code))
        }
        CompileMode::Watch => CompilerEvent::Exited(status),
    };
    let _ = tx.send(event);
}

async fn echo<W: AsyncWrite + Unpin>(console: &mut W, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Err(e) = console.write_all(text.as_bytes()).await {
        debug!("[{NAME}] failed to echo output: {e}");
    }
    let _ = console.flush().await;
}

/// Decode as much of `pending + bytes` as is valid UTF-8, keeping an
/// incomplete trailing sequence for the next read.
fn decode_utf8(pending: &mut Vec<u8>, bytes: &[u8]) -> String {
    pending.extend_from_slice(bytes);
    match std::str::from_utf8(pending) {
        Ok(text) => {
            let text = text.to_string();
            pending.clear();
            text
        }
        Err(e) if e.error_len().is_none() => {
            let tail = pending.split_off(e.valid_up_to());
            let text = String::from_utf8_lossy(pending).into_owned();
            *pending = tail;
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            text
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::CompileEventKind;
    use std::collections::BTreeSet;
    use std::path::PathBuf;
    use tokio::sync::watch;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    async fn run_pump(input: &str, mode: CompileMode, exit: ChildExit) -> (String, Vec<CompilerEvent>) {
        let (_exit_tx, exit_rx) = watch::channel(Some(exit));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut console = Vec::new();
        pump_output(input.as_bytes(), &mut console, mode, exit_rx, tx).await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        (String::from_utf8(console).unwrap(), events)
    }

    #[test]
    fn test_mode_from_args() {
        assert_eq!(CompileMode::from_args(&args(&["--watch"])), CompileMode::Watch);
        assert_eq!(CompileMode::from_args(&args(&["-p", ".", "-w"])), CompileMode::Watch);
        assert_eq!(CompileMode::from_args(&args(&["-p", "."])), CompileMode::OneShot);
    }

    #[test]
    fn test_prepare_args_adds_list_emitted_files_in_watch() {
        assert_eq!(
            prepare_args(&args(&["--watch"]), CompileMode::Watch),
            args(&["--watch", "--listEmittedFiles"])
        );
        assert_eq!(
            prepare_args(&args(&["--watch", "--listEmittedFiles"]), CompileMode::Watch),
            args(&["--watch", "--listEmittedFiles"])
        );
        assert_eq!(
            prepare_args(&args(&["--watch", "--version"]), CompileMode::Watch),
            args(&["--watch", "--version"])
        );
        assert_eq!(prepare_args(&args(&["-p", "."]), CompileMode::OneShot), args(&["-p", "."]));
    }

    #[tokio::test]
    async fn test_pump_watch_mode_classifies_and_strips_sentinels() {
        let input = "Starting compilation in watch mode...\n\
                     TSFILE: /p/dist/a.js\n\
                     Found 0 errors. Watching for file changes.\n\
                     TSFILE: /p/dist/b.js\n\
                     Found 0 errors. Watching for file changes.\n";
        let (echoed, events) = run_pump(input, CompileMode::Watch, ChildExit::Signal(15)).await;

        assert!(!echoed.contains("TSFILE"));
        assert!(echoed.contains("Starting compilation"));

        let expected_files: BTreeSet<PathBuf> = [PathBuf::from("/p/dist/b.js")].into();
        assert_eq!(
            events,
            vec![
                CompilerEvent::Compile(CompileEvent::new(CompileEventKind::FirstWatchSuccess)),
                CompilerEvent::Compile(CompileEvent::watch_success(expected_files)),
                CompilerEvent::Exited(Some(ChildExit::Signal(15))),
            ]
        );
    }

    #[tokio::test]
    async fn test_pump_one_shot_uses_exit_code_only() {
        let input = "Found 0 errors.\n";
        let (echoed, events) = run_pump(input, CompileMode::OneShot, ChildExit::Code(2)).await;
        assert_eq!(echoed, input);
        assert_eq!(
            events,
            vec![CompilerEvent::Compile(CompileEvent::from_exit_code(2))]
        );
    }

    #[tokio::test]
    async fn test_spawn_one_shot_compiler() {
        let dir = tempfile::tempdir().unwrap();
        let (mut compiler, mut rx) = CompilerProcess::spawn(
            "/bin/sh",
            &args(&["-c", "echo compiled; exit 0"]),
            dir.path(),
            CompileMode::OneShot,
        )
        .unwrap();

        assert_eq!(
            rx.recv().await,
            Some(CompilerEvent::Compile(CompileEvent::from_exit_code(0)))
        );
        assert!(matches!(
            compiler.stop(KillPolicy::default()).await,
            StopOutcome::AlreadyExited(_)
        ));
    }

    #[tokio::test]
    async fn test_spawn_missing_compiler_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(
            CompilerProcess::spawn("/nonexistent/tsc", &[], dir.path(), CompileMode::Watch)
                .is_err()
        );
    }

    #[test]
    fn test_decode_utf8_keeps_split_sequences() {
        let mut pending = Vec::new();
        let bytes = "é".as_bytes();
        assert_eq!(decode_utf8(&mut pending, &bytes[..1]), "");
        assert_eq!(decode_utf8(&mut pending, &bytes[1..]), "é");
        assert!(pending.is_empty());
    }
}
