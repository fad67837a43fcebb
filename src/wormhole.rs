// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Cross-mount-namespace path access via the proc filesystem "root"
//! wormholes.
//!
//! Files in a different mount namespace can be reached directly through
//! `/proc/<pid>/root/` as long as a process is attached to that namespace.
//! These wormholes predate Linux mount namespaces, dating back to chroot, and
//! save us from re-executing into other namespaces in order to dial container
//! engine API endpoints: everything stays in-process and parallelizable.

use std::path::{Path, PathBuf};

use cap_std::ambient_authority;
use cap_std::fs::Dir;

use crate::errors::Error;
use crate::model::Pid;
use crate::procfs;

/// Returns the wormhole root of the mount namespace the specified process is
/// attached to.
pub fn root(pid: Pid) -> PathBuf {
    procfs::pid_path(pid).join("root")
}

/// Strips a leading slash so an absolute path observed inside the other mount
/// namespace can be resolved relative to the wormhole root.
fn fix_path(path: &Path) -> &Path {
    path.strip_prefix("/").unwrap_or(path)
}

/// Resolves `path`, as observed inside the mount namespace of the process
/// with the specified PID, into a path usable from the caller's mount
/// namespace.
///
/// Symlinks are resolved relative to the wormhole root, never the caller's
/// root; any component resolving outside the wormhole root is an error, as is
/// a path that does not exist in the target namespace.
pub fn resolve(pid: Pid, path: &str) -> Result<PathBuf, Error> {
    let wormhole = root(pid);
    let resolved = canonicalize_in(&wormhole, Path::new(path)).map_err(|source| Error::Wormhole {
        path: path.to_owned(),
        wormhole: wormhole.display().to_string(),
        source,
    })?;
    Ok(wormhole.join(resolved))
}

fn canonicalize_in(root: &Path, path: &Path) -> std::io::Result<PathBuf> {
    let dir = Dir::open_ambient_dir(root, ambient_authority())?;
    dir.canonicalize(fix_path(path))
}
