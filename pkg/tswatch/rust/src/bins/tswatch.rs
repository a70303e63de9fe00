// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result};
use log::{error, info};
use std::str::FromStr;
use tswatch::cli::Invocation;

const LOG_LEVEL_ENV: &str = "TSWATCH_LOG_LEVEL";

fn log_level() -> log::Level {
    std::env::var(LOG_LEVEL_ENV)
        .ok()
        .and_then(|level| log::Level::from_str(&level).ok())
        .unwrap_or(log::Level::Info)
}

#[tokio::main]
async fn main() -> Result<()> {
    simple_logger::init_with_level(log_level())?;

    let invocation = match Invocation::parse(std::env::args().skip(1)) {
        Ok(invocation) => invocation,
        Err(e) => match e.downcast::<clap::Error>() {
            Ok(clap_error) => clap_error.exit(),
            Err(e) => return Err(e),
        },
    };

    let cwd = std::env::current_dir().context("failed to read the working directory")?;
    let config = invocation.resolve(&cwd)?;
    info!(
        "tswatch starting (version {}, compiler={}, out_dir={})",
        env!("CARGO_PKG_VERSION"),
        config.compiler,
        config.out_dir.display()
    );

    let code = match tswatch::lifecycle::start(config).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            1
        }
    };
    info!("tswatch exiting with code {code}");
    std::process::exit(code);
}
