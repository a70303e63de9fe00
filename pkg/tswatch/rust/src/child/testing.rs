// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! In-memory launcher for supervisor and coordinator tests.

use super::launcher::{ChildHandle, ChildLink, Launcher};
use super::protocol::ChildMessage;
use crate::process::ChildExit;
use anyhow::{Result, bail};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

/// Shared record of what happened to fake children, in order.
#[derive(Clone, Default)]
pub(crate) struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub(crate) fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Test-side controls of one fake child.
#[derive(Clone)]
pub(crate) struct FakeChild {
    pub(crate) ordinal: u64,
    messages: mpsc::UnboundedSender<ChildMessage>,
    exit: Arc<watch::Sender<Option<ChildExit>>>,
    journal: Journal,
}

impl FakeChild {
    pub(crate) fn send_ready(&self) {
        let _ = self.messages.send(ChildMessage::ready(Some(7001), None));
    }

    pub(crate) fn send(&self, msg: ChildMessage) {
        let _ = self.messages.send(msg);
    }

    pub(crate) fn exit_with(&self, exit: ChildExit) {
        exit_once(&self.exit, &self.journal, self.ordinal, exit);
    }
}

fn exit_once(
    sender: &watch::Sender<Option<ChildExit>>,
    journal: &Journal,
    ordinal: u64,
    exit: ChildExit,
) {
    if sender.borrow().is_some() {
        return;
    }
    journal.push(format!("exit#{ordinal}"));
    let _ = sender.send(Some(exit));
}

struct FakeHandle {
    ordinal: u64,
    obeys_stop: bool,
    exit: Arc<watch::Sender<Option<ChildExit>>>,
    journal: Journal,
}

impl ChildHandle for FakeHandle {
    fn request_stop(&self) {
        self.journal.push(format!("stop#{}", self.ordinal));
        if self.obeys_stop {
            exit_once(&self.exit, &self.journal, self.ordinal, ChildExit::Code(0));
        }
    }

    fn force_kill(&self) {
        self.journal.push(format!("kill#{}", self.ordinal));
        exit_once(&self.exit, &self.journal, self.ordinal, ChildExit::Signal(9));
    }
}

pub(crate) struct FakeLauncher {
    pub(crate) journal: Journal,
    pub(crate) children: Arc<Mutex<Vec<FakeChild>>>,
    /// Whether children exit on a cooperative stop request.
    pub(crate) obeys_stop: bool,
    /// Every launched child reports readiness immediately.
    pub(crate) auto_ready: bool,
    pub(crate) fail_launch: bool,
}

impl FakeLauncher {
    pub(crate) fn new() -> Self {
        Self {
            journal: Journal::default(),
            children: Arc::default(),
            obeys_stop: true,
            auto_ready: false,
            fail_launch: false,
        }
    }

    pub(crate) fn child(&self, ordinal: u64) -> FakeChild {
        self.children
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.ordinal == ordinal)
            .cloned()
            .unwrap()
    }

    pub(crate) fn launched(&self) -> usize {
        self.children.lock().unwrap().len()
    }
}

impl Launcher for FakeLauncher {
    fn launch(&mut self, ordinal: u64) -> Result<ChildLink> {
        if self.fail_launch {
            bail!("launch refused");
        }
        self.journal.push(format!("launch#{ordinal}"));

        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        let exit_tx = Arc::new(exit_tx);

        let child = FakeChild {
            ordinal,
            messages: message_tx,
            exit: Arc::clone(&exit_tx),
            journal: self.journal.clone(),
        };
        if self.auto_ready {
            child.send_ready();
        }
        self.children.lock().unwrap().push(child);

        Ok(ChildLink {
            pid: None,
            messages: message_rx,
            exit: exit_rx,
            handle: Box::new(FakeHandle {
                ordinal,
                obeys_stop: self.obeys_stop,
                exit: exit_tx,
                journal: self.journal.clone(),
            }),
        })
    }
}
