// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! The managed application child: launching, messaging and supervision.

pub mod bootstrap;
pub mod launcher;
pub mod protocol;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use launcher::{CRASH_EXIT_CODE, ChildHandle, ChildLink, LaunchSpec, Launcher, ProcessLauncher};
pub use protocol::{ChildMessage, ParentMessage};
pub use supervisor::{
    ChildSupervisor, GenerationEvent, GenerationEventKind, ReadyReport, SupervisorAction,
    SupervisorError,
};
