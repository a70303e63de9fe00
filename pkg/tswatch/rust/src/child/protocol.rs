// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Messages exchanged with the application child.
//!
//! One JSON object per line, discriminated by `title`.

use serde::{Deserialize, Serialize};

/// Sent by the child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "title")]
pub enum ChildMessage {
    /// The application finished booting.
    #[serde(rename = "server-ready")]
    ServerReady {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ssl: Option<bool>,
    },

    /// Inspector URL of the child, when it runs under a debugger.
    #[serde(rename = "debug-url")]
    DebugUrl {
        #[serde(rename = "debugUrl")]
        debug_url: String,
    },
}

/// Sent by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "title")]
pub enum ParentMessage {
    /// Cooperative shutdown request.
    #[serde(rename = "server-kill")]
    ServerKill,
}

impl ChildMessage {
    pub fn ready(port: Option<u16>, ssl: Option<bool>) -> Self {
        Self::ServerReady { port, ssl }
    }

    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

impl ParentMessage {
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}
