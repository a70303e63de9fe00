// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Small application speaking the child protocol, for end-to-end tests.

use anyhow::{Result, bail};
use clap::Parser;
use log::info;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tswatch::child::bootstrap::{LaunchContext, ParentLink, install_crash_trap};

#[derive(Debug, Parser)]
struct Args {
    /// Port reported in the readiness message
    #[arg(long, default_value_t = 7001)]
    port: u16,

    /// Ignore stop requests and SIGTERM
    #[arg(long)]
    ignore_kill: bool,

    /// Panic this many milliseconds after reporting readiness
    #[arg(long, value_name = "MS")]
    crash_after_ready: Option<u64>,

    /// Exit with an error instead of becoming ready
    #[arg(long)]
    fail_before_ready: bool,

    #[arg(long, value_name = "MS", default_value_t = 0)]
    ready_delay_ms: u64,

    /// Log the value of this environment variable on startup
    #[arg(long, value_name = "NAME")]
    log_env: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    simple_logger::init_with_level(log::Level::Info)?;
    let args = Args::parse();
    let trapped = install_crash_trap();
    info!("demo app starting (pid={}, crash trap={trapped})", std::process::id());

    if let Some(name) = &args.log_env {
        let value = std::env::var(name).unwrap_or_default();
        info!("demo app env {name}={value}");
    }

    let Some(context) = LaunchContext::from_env() else {
        bail!("not started by tswatch");
    };
    info!(
        "demo app launched as {} in {}",
        context.entry,
        context.cwd.display()
    );

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut link = ParentLink::connect(&context.ipc_path).await?;

    tokio::time::sleep(Duration::from_millis(args.ready_delay_ms)).await;
    if args.fail_before_ready {
        bail!("configured to fail before ready");
    }
    link.send_ready(Some(args.port), None).await?;
    info!("demo app ready on port {}", args.port);

    let crash = async {
        match args.crash_after_ready {
            Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
            None => std::future::pending().await,
        }
    };

    if args.ignore_kill {
        tokio::select! {
            _ = crash => crash_now(),
            _ = std::future::pending::<()>() => {}
        }
    } else {
        tokio::select! {
            _ = crash => crash_now(),
            _ = link.shutdown_requested() => info!("demo app stopping on request"),
            _ = sigterm.recv() => info!("demo app stopping on SIGTERM"),
        }
    }
    Ok(())
}

fn crash_now() {
    panic!("demo app crashed on purpose");
}
