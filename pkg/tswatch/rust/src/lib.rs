// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

// Panicking code
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![deny(clippy::panic)]
#![deny(clippy::unimplemented)]
#![deny(clippy::todo)]
// Debug code that shouldn't be in production
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]

pub mod child;
pub mod classifier;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod coordinator;
pub mod debounce;
pub mod delete_watcher;
pub mod env;
pub mod lifecycle;
pub mod postprocess;
pub mod process;
pub mod report;
pub mod shutdown;
pub mod state;
pub mod suffix;
