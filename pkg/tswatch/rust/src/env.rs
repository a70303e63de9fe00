// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result};
use log::debug;
use std::collections::HashMap;
use std::path::Path;

/// Parse a dotenv-style file for the application child.
///
/// Supports `KEY=VALUE`, an optional `export ` prefix, matching single or
/// double quotes around the value, `#` comments and blank lines. Later keys
/// win.
pub fn parse_environment_file(path: &Path) -> Result<HashMap<String, String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading environment file: {}", path.display()))?;

    let mut vars = HashMap::new();
    for (index, line) in contents.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let assignment = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, raw_value)) = assignment.split_once('=') else {
            debug!("{}:{}: ignoring line without '='", path.display(), index + 1);
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        vars.insert(key.to_string(), unquote(raw_value.trim()).to_string());
    }
    Ok(vars)
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}
