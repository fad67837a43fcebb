// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Shared helpers for reading the proc filesystem.

pub mod fd;
pub mod unix;

use std::env;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::model::Pid;

static PROC_ROOT: OnceLock<PathBuf> = OnceLock::new();

/// Returns the root of the proc filesystem to consult. Honours the HOST_PROC
/// environment variable so that containerized deployments can point at a
/// bind-mounted host proc instance.
pub fn root_path() -> &'static Path {
    PROC_ROOT.get_or_init(|| {
        if let Ok(v) = env::var("HOST_PROC") {
            return v.into();
        }

        "/proc".into()
    })
}

/// Returns the proc filesystem directory of the specified process.
pub fn pid_path(pid: Pid) -> PathBuf {
    root_path().join(pid.to_string())
}

/// Checks a process "stat" line against the sought-after process name and
/// parent PID. The PPID is passed in text form so the scan hot path gets away
/// with pure string comparison, without any text-to-number conversions.
///
/// The command field #2 is enclosed in parentheses, yet command names may
/// themselves contain ')'. The field thus ends at the *last* ')' on the line.
pub(crate) fn stat_line_matches(statline: &str, name: &str, ppidtext: &str) -> bool {
    // Field #1 is the PID, terminated by the first space; " (" then starts
    // the command field #2.
    let Some(idx) = statline.find(' ') else {
        return false;
    };
    let Some(rest) = statline.get(idx + 2..) else {
        return false;
    };
    let Some(lastidx) = rest.rfind(')') else {
        return false;
    };
    if rest.get(..lastidx) != Some(name) {
        return false;
    }
    // Skip over ") " and then over the one-character state field #3 up to and
    // including its trailing space, landing on the PPID field #4.
    let Some(rest) = rest.get(lastidx + 2..) else {
        return false;
    };
    let Some(statespace) = rest.find(' ') else {
        return false;
    };
    match rest.get(statespace + 1..) {
        Some(ppid) => ppid.starts_with(ppidtext),
        None => false,
    }
}
