// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::child::{
    ChildSupervisor, GenerationEvent, LaunchSpec, Launcher, ProcessLauncher, ReadyReport,
    SupervisorAction,
};
use crate::classifier::{CompileEvent, CompileEventKind};
use crate::compiler::{CompileMode, CompilerEvent, CompilerProcess, prepare_args};
use crate::config::SupervisorConfig;
use crate::coordinator::{CycleReport, RestartCoordinator, RestartRequest};
use crate::delete_watcher::DeleteWatcher;
use crate::postprocess::{OutputPostProcessor, PostProcessor};
use crate::report::{self, PhaseTimings};
use crate::shutdown::{KillPolicy, StopOutcome};
use crate::suffix::remove_outputs;
use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// One turn of the event loop.
enum Step {
    Shutdown(&'static str),
    Compile(CompilerEvent),
    Child(GenerationEvent),
    Deleted(PathBuf),
    Restart(RestartRequest),
}

/// Owns every moving part and drives them from a single event loop.
pub struct Supervisor<L> {
    config: SupervisorConfig,
    coordinator: RestartCoordinator,
    child: Option<ChildSupervisor<L>>,
    child_events: Option<mpsc::UnboundedReceiver<GenerationEvent>>,
    delete_watcher: Option<DeleteWatcher>,
    deletions_tx: mpsc::UnboundedSender<PathBuf>,
    deletions_rx: mpsc::UnboundedReceiver<PathBuf>,
    /// Phases of the restart in progress, completed by the next readiness.
    restart_timings: Arc<Mutex<PhaseTimings>>,
}

impl<L: Launcher> Supervisor<L> {
    /// `launcher` is `None` when there is no application to run.
    pub fn new(
        config: SupervisorConfig,
        launcher: Option<L>,
        post: Arc<dyn PostProcessor>,
    ) -> Self {
        let coordinator = RestartCoordinator::new(config.debounce, post);
        let (child, child_events) = match launcher {
            Some(launcher) => {
                let policy = KillPolicy {
                    timeout: config.kill_timeout,
                };
                let (child, events) = ChildSupervisor::new(launcher, policy, config.keep_alive);
                (Some(child), Some(events))
            }
            None => (None, None),
        };
        let (deletions_tx, deletions_rx) = mpsc::unbounded_channel();

        Self {
            config,
            coordinator,
            child,
            child_events,
            delete_watcher: None,
            deletions_tx,
            deletions_rx,
            restart_timings: Arc::default(),
        }
    }

    /// Run until a signal, a one-shot compile result or the death of a
    /// watching compiler. Returns the process exit code.
    pub async fn run(
        mut self,
        mut compiler: CompilerProcess,
        compile_events: mpsc::UnboundedReceiver<CompilerEvent>,
    ) -> Result<i32> {
        let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
        let mut sigquit = signal(SignalKind::quit()).context("failed to install SIGQUIT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

        let mut compile_events = Some(compile_events);
        let compile_started = Instant::now();

        loop {
            let step = tokio::select! {
                _ = sigint.recv() => Step::Shutdown("SIGINT"),
                _ = sigquit.recv() => Step::Shutdown("SIGQUIT"),
                _ = sigterm.recv() => Step::Shutdown("SIGTERM"),
                event = recv_or_pending(&mut compile_events) => Step::Compile(event),
                event = recv_or_pending(&mut self.child_events) => Step::Child(event),
                Some(path) = self.deletions_rx.recv() => Step::Deleted(path),
                request = self.coordinator.fired() => Step::Restart(request),
            };

            match step {
                Step::Shutdown(signal) => {
                    info!(
                        "received {signal}, shutting down (waiting up to {}ms for the application, see --kill-timeout)",
                        self.config.kill_timeout.as_millis()
                    );
                    return Ok(self.teardown(&mut compiler).await);
                }
                Step::Compile(CompilerEvent::Compile(event)) => {
                    if let Some(code) = self.on_compile(event, compile_started).await {
                        self.teardown(&mut compiler).await;
                        return Ok(code);
                    }
                }
                Step::Compile(CompilerEvent::Exited(status)) => {
                    let code = status.and_then(|s| s.code()).unwrap_or(1);
                    match status {
                        Some(status) => error!("[tsc] watch compiler stopped with {status}"),
                        None => error!("[tsc] watch compiler stopped"),
                    }
                    self.teardown(&mut compiler).await;
                    return Ok(code);
                }
                Step::Child(event) => self.on_child_event(event),
                Step::Deleted(path) => self.on_delete(path).await,
                Step::Restart(request) => {
                    match self
                        .coordinator
                        .run_cycle(request, self.child.as_mut())
                        .await
                    {
                        Ok(Some(cycle)) => {
                            report::cycle(&cycle);
                            self.record_restart_phase(&cycle);
                        }
                        Ok(None) => {}
                        Err(e) => error!("restart failed: {e:#}"),
                    }
                }
            }
        }
    }

    /// Returns an exit code when the event ends the run.
    async fn on_compile(&mut self, event: CompileEvent, compile_started: Instant) -> Option<i32> {
        match event.kind {
            CompileEventKind::FirstWatchSuccess => {
                let mut timings = PhaseTimings::default();
                timings.record("Compile", compile_started.elapsed());

                let post_started = Instant::now();
                if let Err(e) = self.coordinator.post_process().await {
                    error!("post-processing failed: {e:#}");
                }
                let post_label = if self.config.alias_command.is_some() {
                    "Alias Rewrite & Copy"
                } else {
                    "File Copy"
                };
                timings.record(post_label, post_started.elapsed());

                self.start_delete_watcher();
                if let Err(e) = self.fork_first(timings).await {
                    error!("{e:#}");
                    return Some(1);
                }
                None
            }
            CompileEventKind::WatchSuccess => {
                debug!("compile succeeded with {} changed files", event.changed_files.len());
                self.coordinator.trigger(Some(event.changed_files));
                None
            }
            CompileEventKind::WatchFail => {
                self.coordinator.cancel();
                self.start_delete_watcher();
                None
            }
            CompileEventKind::OneShotSuccess => match self.coordinator.post_process().await {
                Ok(_) => Some(0),
                Err(e) => {
                    error!("post-processing failed: {e:#}");
                    Some(1)
                }
            },
            CompileEventKind::OneShotFail => Some(event.exit_code.unwrap_or(1)),
        }
    }

    async fn fork_first(&mut self, mut startup: PhaseTimings) -> Result<()> {
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };
        let perf_init = self.config.perf_init;
        let alias_rewrite = self.config.alias_command.is_some();
        let restart_timings = Arc::clone(&self.restart_timings);
        child.on_ready(Box::new(move |ready: &ReadyReport| {
            report::ready(ready, alias_rewrite);
            if !perf_init {
                return Ok(());
            }
            if ready.is_first {
                startup.record("App Startup", ready.elapsed);
                startup.log();
            } else {
                let mut restart = restart_timings
                    .lock()
                    .map(|mut timings| std::mem::take(&mut *timings))
                    .unwrap_or_default();
                restart.record("App Restart", ready.elapsed);
                restart.log();
            }
            Ok(())
        }));
        child
            .fork(true)
            .await
            .context("failed to start the application")?;
        Ok(())
    }

    /// Start the restart table with the stop and post-processing phase.
    fn record_restart_phase(&self, cycle: &CycleReport) {
        if !self.config.perf_init || cycle.ordinal.is_none() {
            return;
        }
        let label = if self.config.alias_command.is_some() {
            "Kill & Alias Replace"
        } else {
            "Process Kill"
        };
        if let Ok(mut timings) = self.restart_timings.lock() {
            *timings = PhaseTimings::default();
            timings.record(label, cycle.kill_and_post);
        }
    }

    fn on_child_event(&mut self, event: GenerationEvent) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        if child.handle_event(event) == SupervisorAction::Refork {
            // A crash restart has no stop phase.
            if let Ok(mut timings) = self.restart_timings.lock() {
                *timings = PhaseTimings::default();
            }
            if let Err(e) = child.fork_next() {
                error!("failed to restart the application: {e}");
            }
        }
    }

    /// Remove the outputs of deleted sources. Deletions that arrive together
    /// cause a single restart.
    async fn on_delete(&mut self, first: PathBuf) {
        let mut deleted = vec![first];
        while let Ok(path) = self.deletions_rx.try_recv() {
            deleted.push(path);
        }

        let out_dir = self.config.out_path();
        let mut removed = 0;
        for path in &deleted {
            match remove_outputs(&out_dir, path) {
                Ok(count) => removed += count,
                Err(e) => warn!("failed to clean outputs of {}: {e:#}", path.display()),
            }
        }
        if removed == 0 {
            return;
        }

        info!("removed {removed} stale outputs");
        if let Err(e) = self.coordinator.post_process().await {
            error!("post-processing failed: {e:#}");
        }
        self.coordinator.trigger(None);
    }

    fn start_delete_watcher(&mut self) {
        if self.delete_watcher.is_some() {
            return;
        }
        match DeleteWatcher::start(&self.config.source_path(), self.deletions_tx.clone()) {
            Ok(watcher) => self.delete_watcher = Some(watcher),
            Err(e) => warn!("not watching for deleted sources: {e:#}"),
        }
    }

    /// Stop everything. Returns 0 when every part stopped cleanly.
    async fn teardown(&mut self, compiler: &mut CompilerProcess) -> i32 {
        self.coordinator.cancel();
        let policy = KillPolicy {
            timeout: self.config.kill_timeout,
        };

        let child = self.child.as_mut();
        let stop_child = async move {
            match child {
                Some(child) => child.kill().await.map(|_| ()),
                None => Ok(()),
            }
        };
        let (compiler_outcome, child_result) = tokio::join!(compiler.stop(policy), stop_child);
        self.delete_watcher = None;

        let mut code = 0;
        if compiler_outcome == StopOutcome::Unresponsive {
            error!("[tsc] could not be stopped");
            code = 1;
        }
        if let Err(e) = child_result {
            error!("failed to stop the application: {e}");
            code = 1;
        }
        info!("shutdown complete");
        code
    }
}

async fn recv_or_pending<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> T {
    if let Some(receiver) = rx {
        if let Some(value) = receiver.recv().await {
            return value;
        }
        // Closed: stop polling it.
        *rx = None;
    }
    std::future::pending().await
}

fn clean_out_dir(out_dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(out_dir) {
        Ok(()) => {
            info!("cleaned {}", out_dir.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to clean {}", out_dir.display())),
    }
}

/// Build the real collaborators from `config` and run until exit.
pub async fn start(config: SupervisorConfig) -> Result<i32> {
    if config.clean_out_dir {
        clean_out_dir(&config.out_path())?;
    }

    let mode = CompileMode::from_args(&config.compiler_args);
    let compiler_args = prepare_args(&config.compiler_args, mode);
    let post = Arc::new(OutputPostProcessor {
        cwd: config.cwd.clone(),
        source_dir: config.source_path(),
        out_dir: config.out_path(),
        allow_js: config.allow_js,
        alias_command: config.alias_command.clone(),
    });

    let ipc_dir = std::env::temp_dir().join(format!("tswatch-{}", std::process::id()));
    let launcher = match &config.run {
        Some(run) => {
            std::fs::create_dir_all(&ipc_dir)
                .with_context(|| format!("failed to create {}", ipc_dir.display()))?;
            Some(ProcessLauncher::new(LaunchSpec {
                program: run.program.clone(),
                args: run.args.clone(),
                cwd: config.cwd.clone(),
                env: config.child_env()?,
                keep_alive: config.keep_alive,
                ipc_dir: ipc_dir.clone(),
            }))
        }
        None => None,
    };

    let (compiler, events) =
        CompilerProcess::spawn(&config.compiler, &compiler_args, &config.cwd, mode)?;
    let result = Supervisor::new(config, launcher, post)
        .run(compiler, events)
        .await;

    if let Err(e) = std::fs::remove_dir_all(&ipc_dir)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        debug!("failed to remove {}: {e}", ipc_dir.display());
    }
    result
}
