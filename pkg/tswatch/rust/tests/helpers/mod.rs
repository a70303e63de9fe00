// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::{BufRead, BufReader};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Compiler stand-in. Prints one successful compile on start and another one
/// every time `recompile` appears in the working directory.
const FAKE_WATCH_COMPILER: &str = r#"#!/bin/sh
out="$PWD/dist"
mkdir -p "$out"
compile() {
  echo "console.log('built')" > "$out/index.js"
  echo "TSFILE: $out/index.js"
  echo "TSFILE: $out/index.d.ts"
  echo "Found 0 errors. Watching for file changes."
}
trap 'exit 0' TERM
compile
while true; do
  if [ -f recompile ]; then
    rm -f recompile
    compile
  fi
  sleep 0.1
done
"#;

/// Compiles once, then dies with exit code 3.
const FAKE_DYING_COMPILER: &str = r#"#!/bin/sh
echo "Found 0 errors. Watching for file changes."
sleep 1
exit 3
"#;

/// One-shot build.
const FAKE_ONE_SHOT_COMPILER: &str = r#"#!/bin/sh
mkdir -p "$PWD/dist"
echo "console.log('built')" > "$PWD/dist/index.js"
exit 0
"#;

pub enum FakeCompiler {
    Watch,
    Dying,
    OneShot,
}

/// Project layout with `src/`, `dist/` and a fake compiler script.
pub struct Project {
    pub dir: tempfile::TempDir,
    pub compiler: PathBuf,
}

impl Project {
    pub fn new(compiler: FakeCompiler) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("dist")).unwrap();

        let script = match compiler {
            FakeCompiler::Watch => FAKE_WATCH_COMPILER,
            FakeCompiler::Dying => FAKE_DYING_COMPILER,
            FakeCompiler::OneShot => FAKE_ONE_SHOT_COMPILER,
        };
        let path = dir.path().join("fake-tsc.sh");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        Self {
            dir,
            compiler: path,
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, relative: &str, contents: &str) {
        let path = self.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, contents)
            .unwrap_or_else(|e| panic!("failed to write {}: {e}", path.display()));
    }

    /// Make the watch compiler print another successful compile.
    pub fn recompile(&self) {
        self.write("recompile", "");
    }

    /// `tswatch` arguments running the demo app with `app_args`.
    pub fn args(&self, watch: bool, extra: &[&str], app_args: &[&str]) -> Vec<String> {
        let mut args = vec![
            "--compiler".to_string(),
            self.compiler.display().to_string(),
            "--debounce".to_string(),
            "100".to_string(),
        ];
        if watch {
            args.push("--watch".to_string());
        }
        args.extend(extra.iter().map(|s| s.to_string()));
        args.push("--run".to_string());
        args.push(env!("CARGO_BIN_EXE_tswatch-demo-app").to_string());
        args.extend(app_args.iter().map(|s| s.to_string()));
        args
    }
}

/// Handle to a running tswatch process.
pub struct SupervisorHandle {
    child: Child,
    log_lines: Arc<Mutex<Vec<String>>>,
    _reader_thread: std::thread::JoinHandle<()>,
    _stderr_thread: std::thread::JoinHandle<()>,
}

impl SupervisorHandle {
    pub fn start(project: &Project, args: &[String]) -> Self {
        let bin = env!("CARGO_BIN_EXE_tswatch");
        let mut child = Command::new(bin)
            .args(args)
            .current_dir(project.path())
            .env("TSWATCH_LOG_LEVEL", "debug")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to start tswatch");

        let stdout = child.stdout.take().expect("failed to capture stdout");
        let stderr = child.stderr.take().expect("failed to capture stderr");
        let log_lines = Arc::new(Mutex::new(Vec::<String>::new()));

        // simple_logger writes INFO to stdout, WARN/ERROR to stderr.
        let reader_thread = spawn_reader(stdout, "tswatch", Arc::clone(&log_lines));
        let stderr_thread = spawn_reader(stderr, "tswatch:err", Arc::clone(&log_lines));

        Self {
            child,
            log_lines,
            _reader_thread: reader_thread,
            _stderr_thread: stderr_thread,
        }
    }

    /// Wait until a log line containing `pattern` appears, or timeout.
    pub fn wait_for_log(&self, pattern: &str, timeout: Duration) -> bool {
        self.wait_for_log_count(pattern, 1, timeout)
    }

    pub fn wait_for_log_default(&self, pattern: &str) -> bool {
        self.wait_for_log(pattern, DEFAULT_TIMEOUT)
    }

    pub fn count_log_matches(&self, pattern: &str) -> usize {
        let lines = self.log_lines.lock().unwrap();
        lines.iter().filter(|l| l.contains(pattern)).count()
    }

    pub fn wait_for_log_count(&self, pattern: &str, n: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.count_log_matches(pattern) >= n)
    }

    pub fn send_signal(&self, sig: Signal) {
        let pid = self.child.id() as i32;
        signal::kill(Pid::from_raw(pid), sig).expect("failed to send signal to tswatch");
    }

    /// Send SIGTERM and wait for tswatch to exit.
    pub fn stop(&mut self) -> std::process::ExitStatus {
        self.send_signal(Signal::SIGTERM);
        self.wait_with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn wait_with_timeout(&mut self, timeout: Duration) -> std::process::ExitStatus {
        let deadline = Instant::now() + timeout;
        loop {
            match self.child.try_wait().expect("failed to check tswatch status") {
                Some(status) => return status,
                None => {
                    if Instant::now() >= deadline {
                        self.child.kill().ok();
                        return self.child.wait().expect("failed to wait on killed tswatch");
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }
    }

    /// PIDs from "[app#N] spawned (pid=NNN" log lines, in spawn order.
    pub fn app_pids(&self) -> Vec<u32> {
        let lines = self.log_lines.lock().unwrap();
        lines
            .iter()
            .filter(|l| l.contains("[app#"))
            .filter_map(|l| {
                let marker = "spawned (pid=";
                let start = l.find(marker)? + marker.len();
                let end = l[start..].find(|c: char| !c.is_ascii_digit())? + start;
                l[start..end].parse().ok()
            })
            .collect()
    }
}

impl Drop for SupervisorHandle {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_reader(
    stream: impl std::io::Read + Send + 'static,
    label: &'static str,
    lines: Arc<Mutex<Vec<String>>>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            match line {
                Ok(l) => {
                    eprintln!("[{label}] {l}");
                    lines.lock().unwrap().push(l);
                }
                Err(_) => break,
            }
        }
    })
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

pub fn pid_is_alive(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

pub fn wait_for_pid_gone(pid: u32, timeout: Duration) -> bool {
    wait_until(timeout, || !pid_is_alive(pid))
}
