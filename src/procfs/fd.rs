// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Links open socket file descriptors in /proc/<pid>/fd back to the
//! processes holding them.
//!
//! In case of sockets the fd pseudo symlinks do not reference anything in the
//! VFS; reading the link instead reveals "socket:[<ino>]". That inode number
//! is the only means to connect a listening unix domain socket from a socket
//! table (see [`crate::procfs::unix`]) to the process serving it.

use std::fs::{read_dir, read_link};
use std::path::Path;

use crate::errors::Error;
use crate::model::Pid;
use crate::procfs::root_path;
use crate::procfs::unix::SocketPathsByIno;

const SOCKET_FD_PREFIX: &str = "socket:[";

/// A socket file descriptor of some process together with the socket inode
/// number it references, both still in "raw" string form.
///
/// Kept as strings deliberately: on the activator scan hot path these values
/// are only ever compared and hashed, so cooking them into numbers would just
/// waste cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSocketFd {
    /// fd number as string.
    pub fd: String,
    /// socket inode number as string.
    pub ino: String,
}

/// Extracts the socket inode number from an fd pseudo symlink target,
/// returning `None` for anything that is not a socket link.
fn socket_link_ino(link: &Path) -> Option<&str> {
    let link = link.to_str()?;
    let ino = link.strip_prefix(SOCKET_FD_PREFIX)?.strip_suffix(']')?;
    if ino.is_empty() {
        return None;
    }
    Some(ino)
}

/// Returns the sockets the process with the specified PID currently has open,
/// with their file descriptors. The sockets can be of arbitrary type at this
/// point: unix domain as well as IP, NETLINK, and other flavors, and their
/// state is unknown. Fails when the process's fd directory cannot be read,
/// notably for lack of privileges.
pub fn raw_socket_fds(pid: Pid) -> Result<Vec<RawSocketFd>, Error> {
    raw_socket_fds_at(root_path(), pid)
}

pub(crate) fn raw_socket_fds_at(proc_root: &Path, pid: Pid) -> Result<Vec<RawSocketFd>, Error> {
    let fdbase = proc_root.join(pid.to_string()).join("fd");
    let entries = read_dir(&fdbase).map_err(|source| Error::SocketFds { pid, source })?;
    let mut sockets = Vec::new();
    for entry in entries.filter_map(|entry| entry.ok()) {
        let Ok(link) = read_link(entry.path()) else {
            continue;
        };
        let Some(ino) = socket_link_ino(&link) else {
            continue;
        };
        sockets.push(RawSocketFd {
            fd: entry.file_name().to_string_lossy().into_owned(),
            ino: ino.to_owned(),
        });
    }
    Ok(sockets)
}

/// Returns the paths of the listening unix domain sockets the specified
/// process actually holds open, by intersecting the process's fd-referenced
/// socket inodes with the map of known listening sockets.
pub fn listening_paths_of(pid: Pid, listening_uds: &SocketPathsByIno) -> Vec<String> {
    let fdbase = root_path().join(pid.to_string()).join("fd");
    let Ok(entries) = read_dir(&fdbase) else {
        return Vec::new();
    };
    let mut paths = Vec::new();
    for entry in entries.filter_map(|entry| entry.ok()) {
        let Ok(link) = read_link(entry.path()) else {
            continue;
        };
        let Some(ino) = socket_link_ino(&link).and_then(|ino| ino.parse::<u64>().ok()) else {
            continue;
        };
        if let Some(path) = listening_uds.get(&ino) {
            paths.push(path.clone());
        }
    }
    paths
}

/// Filters raw socket fd information against the known listening unix domain
/// sockets, returning only the listening ones as an inode-to-path map.
///
/// Same idea as [`listening_paths_of`], but working on an already taken
/// snapshot of raw socket fds instead of scanning the proc filesystem again;
/// used on the socket activator path where the raw fd list doubles as the
/// change-detection input.
pub fn listening_paths_of_raw_fds(
    rawfds: &[RawSocketFd],
    listening_uds: &SocketPathsByIno,
) -> SocketPathsByIno {
    let mut listening = SocketPathsByIno::new();
    for rawfd in rawfds {
        let Ok(ino) = rawfd.ino.parse::<u64>() else {
            continue;
        };
        if let Some(path) = listening_uds.get(&ino) {
            listening.insert(ino, path.clone());
        }
    }
    listening
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    mod raw_socket_fds {
        use std::os::unix::fs::symlink;

        use super::*;

        #[test]
        fn fails_for_missing_process() {
            let fakeproc = tempfile::tempdir().unwrap();
            let err = raw_socket_fds_at(fakeproc.path(), 123456).unwrap_err();
            assert!(matches!(err, Error::SocketFds { pid: 123456, .. }));
        }

        #[test]
        fn only_returns_sockets_nothing_else() {
            let fakeproc = tempfile::tempdir().unwrap();
            let fdbase = fakeproc.path().join("123456").join("fd");
            std::fs::create_dir_all(&fdbase).unwrap();
            symlink("/foobar", fdbase.join("1")).unwrap();
            symlink("socket:[2345678]", fdbase.join("2")).unwrap();
            std::fs::write(fdbase.join("3"), b"foobar").unwrap();
            symlink("socket:[", fdbase.join("666")).unwrap();
            symlink("socket:[]", fdbase.join("667")).unwrap();

            let fds = raw_socket_fds_at(fakeproc.path(), 123456).unwrap();
            assert_eq!(
                fds,
                vec![RawSocketFd {
                    fd: "2".into(),
                    ino: "2345678".into(),
                }]
            );
        }
    }

    mod raw_fd_filtering {
        use super::*;

        #[test]
        fn keeps_only_known_listening_inodes() {
            let rawfds = vec![
                RawSocketFd {
                    fd: "3".into(),
                    ino: "100".into(),
                },
                RawSocketFd {
                    fd: "4".into(),
                    ino: "200".into(),
                },
                RawSocketFd {
                    fd: "5".into(),
                    ino: "not-a-number".into(),
                },
            ];
            let mut listening = SocketPathsByIno::new();
            listening.insert(100, "/run/foo.sock".to_string());

            let found = listening_paths_of_raw_fds(&rawfds, &listening);
            assert_eq!(found.len(), 1);
            assert_eq!(found.get(&100).map(String::as_str), Some("/run/foo.sock"));
        }
    }
}
