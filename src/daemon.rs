// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Locates the daemon process serving a socket-activated unix domain socket.

use std::fs;
use std::path::Path;

use crate::model::Pid;
use crate::procfs::{root_path, stat_line_matches};

/// Finds the socket-activated child process that services the specified unix
/// domain socket, identified by its listening-socket inode number. Returns
/// `None` when no suitable child of the activator can be found.
///
/// Peer credentials obtained when connecting to an activated API socket name
/// the *activator*, not the spawned service: the activator created the
/// listening socket. The service instead is the child of the activator that
/// inherited the listening socket's fd, so that is what we scan for. Only
/// direct children of the activator are considered.
///
/// A freshly activated daemon is most probably not part of the most recent
/// process discovery yet, so this runs its own small scan over /proc. The
/// kernel's "children" pseudo element is no help here, as proc(5) warns it is
/// only reliable with all child tasks frozen.
pub fn find_daemon(parent_pid: Pid, name: &str, listening_ino: u64) -> Option<Pid> {
    find_daemon_at(root_path(), parent_pid, name, listening_ino)
}

pub(crate) fn find_daemon_at(
    proc_root: &Path,
    parent_pid: Pid,
    name: &str,
    listening_ino: u64,
) -> Option<Pid> {
    // Comparing fd pseudo symlink targets and the PPID as strings is quicker
    // than parsing every candidate into numbers.
    let sockettext = format!("socket:[{listening_ino}]");
    let ppidtext = format!("{parent_pid} ");

    let entries = fs::read_dir(proc_root).ok()?;
    for entry in entries.filter_map(|entry| entry.ok()) {
        let filename = entry.file_name();
        let Some(pidtext) = filename.to_str() else {
            continue;
        };
        if !pidtext.bytes().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let base = entry.path();
        let Ok(stat) = fs::read_to_string(base.join("stat")) else {
            continue;
        };
        if !stat_line_matches(&stat, name, &ppidtext) {
            continue;
        }
        // Name and parent match; make sure this candidate in fact serves the
        // specified listening unix domain socket.
        let Ok(fds) = fs::read_dir(base.join("fd")) else {
            continue;
        };
        for fdentry in fds.filter_map(|fdentry| fdentry.ok()) {
            let Ok(link) = fs::read_link(fdentry.path()) else {
                continue;
            };
            if link.to_str() != Some(sockettext.as_str()) {
                continue;
            }
            return pidtext.parse::<Pid>().ok();
        }
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::os::unix::fs::symlink;

    use super::*;

    #[test]
    fn returns_none_when_daemon_cannot_be_found() {
        assert_eq!(find_daemon(1, "duhkr-deh", 0), None);
    }

    #[test]
    fn finds_child_of_activator_serving_the_socket() {
        let fakeproc = tempfile::tempdir().unwrap();

        // An impostor with the right name and parent, but without the socket.
        let impostor = fakeproc.path().join("41");
        std::fs::create_dir_all(impostor.join("fd")).unwrap();
        std::fs::write(impostor.join("stat"), "41 (duhkrd) S 1 41 41 0").unwrap();

        // The real McCoy, holding the listening socket fd.
        let daemon = fakeproc.path().join("42");
        std::fs::create_dir_all(daemon.join("fd")).unwrap();
        std::fs::write(daemon.join("stat"), "42 (duhkrd) S 1 42 42 0").unwrap();
        symlink("socket:[2345678]", daemon.join("fd").join("3")).unwrap();

        // Same socket, wrong parent.
        let stranger = fakeproc.path().join("43");
        std::fs::create_dir_all(stranger.join("fd")).unwrap();
        std::fs::write(stranger.join("stat"), "43 (duhkrd) S 666 43 43 0").unwrap();
        symlink("socket:[2345678]", stranger.join("fd").join("3")).unwrap();

        assert_eq!(
            find_daemon_at(fakeproc.path(), 1, "duhkrd", 2345678),
            Some(42)
        );
        assert_eq!(find_daemon_at(fakeproc.path(), 1, "duhkrd", 999), None);
    }
}
