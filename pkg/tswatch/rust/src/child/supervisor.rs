// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use super::launcher::{CRASH_EXIT_CODE, ChildHandle, Launcher};
use super::protocol::ChildMessage;
use crate::process::{ChildExit, ExitWatch, wait_for_exit};
use crate::report;
use crate::shutdown::{KillPolicy, StopOutcome, stop_gracefully};
use crate::state::{KeepAliveState, Readiness};
use log::{debug, error, info, warn};
use std::panic::{AssertUnwindSafe, catch_unwind};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("generation {0} is still running")]
    GenerationAlive(u64),
    #[error("failed to launch generation {ordinal}: {reason}")]
    Launch { ordinal: u64, reason: String },
    #[error("generation {0} did not exit after forced termination")]
    Unresponsive(u64),
}

/// Delivered to the readiness callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyReport {
    pub ordinal: u64,
    pub port: Option<u16>,
    pub ssl: Option<bool>,
    pub is_first: bool,
    pub elapsed: Duration,
    pub debug_url: Option<String>,
}

pub type ReadyCallback = Box<dyn FnMut(&ReadyReport) -> anyhow::Result<()> + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationEventKind {
    Message(ChildMessage),
    Exited(Option<ChildExit>),
}

/// Something a generation did, tagged with the generation it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationEvent {
    pub ordinal: u64,
    pub kind: GenerationEventKind,
}

/// What the owner of the supervisor should do after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorAction {
    Idle,
    /// Keep-alive crash of a proven application; fork it again.
    Refork,
}

struct Generation {
    ordinal: u64,
    is_first: bool,
    readiness: Readiness,
    started_at: Instant,
    debug_url: Option<String>,
    exit: ExitWatch,
    handle: Box<dyn ChildHandle>,
    forwarder: JoinHandle<()>,
}

impl Generation {
    fn name(&self) -> String {
        format!("app#{}", self.ordinal)
    }
}

impl Drop for Generation {
    // A superseded generation must not feed events anymore.
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

/// Owns the application child: at most one live generation at a time.
pub struct ChildSupervisor<L> {
    launcher: L,
    policy: KillPolicy,
    keep_alive: bool,
    keep_alive_state: KeepAliveState,
    last_ordinal: u64,
    current: Option<Generation>,
    events: mpsc::UnboundedSender<GenerationEvent>,
    on_ready: Option<ReadyCallback>,
}

impl<L: Launcher> ChildSupervisor<L> {
    pub fn new(
        launcher: L,
        policy: KillPolicy,
        keep_alive: bool,
    ) -> (Self, mpsc::UnboundedReceiver<GenerationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                launcher,
                policy,
                keep_alive,
                keep_alive_state: KeepAliveState::default(),
                last_ordinal: 0,
                current: None,
                events: tx,
                on_ready: None,
            },
            rx,
        )
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub fn on_ready(&mut self, callback: ReadyCallback) {
        self.on_ready = Some(callback);
    }

    pub fn keep_alive_state(&self) -> KeepAliveState {
        self.keep_alive_state
    }

    /// Whether any generation was ever forked.
    pub fn has_forked(&self) -> bool {
        self.last_ordinal > 0
    }

    pub fn current_ordinal(&self) -> Option<u64> {
        self.current.as_ref().map(|g| g.ordinal)
    }

    pub fn current_readiness(&self) -> Option<Readiness> {
        self.current.as_ref().map(|g| g.readiness)
    }

    /// Stop the live generation (if any) and start a new one.
    pub async fn fork(&mut self, is_first: bool) -> Result<u64, SupervisorError> {
        self.kill().await?;
        self.launch(is_first)
    }

    /// Start the next generation. The previous one must already be gone.
    pub fn fork_next(&mut self) -> Result<u64, SupervisorError> {
        if let Some(current) = &self.current {
            return Err(SupervisorError::GenerationAlive(current.ordinal));
        }
        self.launch(false)
    }

    fn launch(&mut self, is_first: bool) -> Result<u64, SupervisorError> {
        let ordinal = self.last_ordinal + 1;
        let link = self
            .launcher
            .launch(ordinal)
            .map_err(|e| SupervisorError::Launch {
                ordinal,
                reason: format!("{e:#}"),
            })?;
        self.last_ordinal = ordinal;

        let forwarder = tokio::spawn(forward_events(
            ordinal,
            link.messages,
            link.exit.clone(),
            self.events.clone(),
        ));
        self.current = Some(Generation {
            ordinal,
            is_first,
            readiness: Readiness::Unknown,
            started_at: Instant::now(),
            debug_url: None,
            exit: link.exit,
            handle: link.handle,
            forwarder,
        });
        debug!("[app#{ordinal}] forked (first={is_first})");
        Ok(ordinal)
    }

    /// Gracefully stop the live generation. Completes once it has exited,
    /// or immediately when there is none.
    pub async fn kill(&mut self) -> Result<Option<StopOutcome>, SupervisorError> {
        let Some(generation) = self.current.take() else {
            return Ok(None);
        };
        let name = generation.name();
        let mut exit = generation.exit.clone();
        let handle = &generation.handle;
        let outcome = stop_gracefully(
            &name,
            &mut exit,
            self.policy,
            || handle.request_stop(),
            || handle.force_kill(),
        )
        .await;
        debug!("[{name}] stopped: {outcome:?}");

        match outcome {
            StopOutcome::Unresponsive => Err(SupervisorError::Unresponsive(generation.ordinal)),
            outcome => Ok(Some(outcome)),
        }
    }

    pub fn handle_event(&mut self, event: GenerationEvent) -> SupervisorAction {
        let is_current = self
            .current
            .as_ref()
            .is_some_and(|g| g.ordinal == event.ordinal);
        if !is_current {
            debug!("[app#{}] ignoring event from superseded generation", event.ordinal);
            return SupervisorAction::Idle;
        }

        match event.kind {
            GenerationEventKind::Message(ChildMessage::ServerReady { port, ssl }) => {
                self.mark_ready(port, ssl);
                SupervisorAction::Idle
            }
            GenerationEventKind::Message(ChildMessage::DebugUrl { debug_url }) => {
                if let Some(current) = self.current.as_mut() {
                    current.debug_url = Some(debug_url);
                }
                SupervisorAction::Idle
            }
            GenerationEventKind::Exited(status) => self.on_exit(status),
        }
    }

    fn mark_ready(&mut self, port: Option<u16>, ssl: Option<bool>) {
        let Some(current) = self.current.as_mut() else {
            return;
        };
        if !current.readiness.can_transition_to(Readiness::Ready) {
            debug!("[app#{}] duplicate readiness ignored", current.ordinal);
            return;
        }
        current.readiness = Readiness::Ready;

        let report = ReadyReport {
            ordinal: current.ordinal,
            port,
            ssl,
            is_first: current.is_first,
            elapsed: current.started_at.elapsed(),
            debug_url: current.debug_url.clone(),
        };

        let outcome = match self.on_ready.as_mut() {
            Some(callback) => catch_unwind(AssertUnwindSafe(|| callback(&report))),
            None => Ok(Ok(())),
        };
        match outcome {
            Ok(Ok(())) => self.keep_alive_state.record_ready(),
            Ok(Err(e)) => {
                error!("[app#{}] readiness callback failed: {e:#}", report.ordinal);
                self.keep_alive_state.record_bootstrap_failure();
            }
            Err(_) => {
                error!("[app#{}] readiness callback panicked", report.ordinal);
                self.keep_alive_state.record_bootstrap_failure();
            }
        }
    }

    fn on_exit(&mut self, status: Option<ChildExit>) -> SupervisorAction {
        let Some(mut generation) = self.current.take() else {
            return SupervisorAction::Idle;
        };
        let name = generation.name();

        if self.keep_alive && status == Some(ChildExit::Code(CRASH_EXIT_CODE)) {
            report::keep_alive_crash(generation.ordinal);
            if self.keep_alive_state.allows_refork() {
                info!("[{name}] restarting after crash");
                return SupervisorAction::Refork;
            }
            warn!(
                "[{name}] not restarting, last bootstrap status is {}",
                self.keep_alive_state.last_bootstrap_status()
            );
            return SupervisorAction::Idle;
        }

        let failed = !status.is_some_and(ChildExit::success);
        if failed && generation.readiness.can_transition_to(Readiness::Failed) {
            generation.readiness = Readiness::Failed;
            self.keep_alive_state.record_bootstrap_failure();
            match status {
                Some(exit) => error!("[{name}] exited with {exit} before becoming ready"),
                None => error!("[{name}] exited before becoming ready"),
            }
        } else {
            info!("[{name}] exited");
        }
        SupervisorAction::Idle
    }
}

/// Forward one generation's messages and its exit into the shared channel.
async fn forward_events(
    ordinal: u64,
    mut messages: mpsc::UnboundedReceiver<ChildMessage>,
    mut exit: ExitWatch,
    events: mpsc::UnboundedSender<GenerationEvent>,
) {
    let send = |kind| {
        let _ = events.send(GenerationEvent { ordinal, kind });
    };

    loop {
        tokio::select! {
            biased;
            msg = messages.recv() => match msg {
                Some(msg) => send(GenerationEventKind::Message(msg)),
                None => break,
            },
            status = wait_for_exit(&mut exit) => {
                // Messages written just before exiting still count.
                while let Ok(msg) = messages.try_recv() {
                    send(GenerationEventKind::Message(msg));
                }
                send(GenerationEventKind::Exited(status));
                return;
            }
        }
    }

    let status = wait_for_exit(&mut exit).await;
    send(GenerationEventKind::Exited(status));
}
