// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Parses /proc/<pid>/net/unix into the listening unix domain sockets
//! visible to a process.
//!
//! Contrary to what the "net" path element suggests, this socket table is
//! scoped by the process's *mount* namespace, not its network namespace:
//! path-named unix domain sockets belong to a filesystem.

use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, Read};

use crate::model::Pid;
use crate::procfs;

/// State bit mask identifying listening unix domain sockets, __SO_ACCEPTCON
/// in the kernel's flags field encoding.
const SO_ACCEPTCON: u32 = 1 << 16;

/// Type enumeration value of connection-oriented (stream) sockets.
const SOCK_STREAM: u16 = 1;

// Field indices in a /proc/<pid>/net/unix line; see proc(5).
const FLAGS_FIELD: usize = 3;
const TYPE_FIELD: usize = 4;
const INODE_FIELD: usize = 6;
const PATH_FIELD: usize = 7;

/// Maps the inode numbers of unix domain sockets to their path names. Never
/// contains sockets from the abstract namespace.
pub type SocketPathsByIno = HashMap<u64, String>;

/// Returns the named unix domain sockets in listening state in the mount
/// namespace the specified process is attached to, keyed by inode number.
/// Returns an empty map when the socket table cannot be opened.
///
/// The PID must be valid in the proc filesystem instance mounted for the
/// calling process; the easiest way to ensure this is a PID valid in the
/// initial PID namespace together with a full host-view proc mount.
pub fn listening_uds_visible_to(pid: Pid) -> SocketPathsByIno {
    let table = procfs::pid_path(pid).join("net").join("unix");
    let Ok(table) = fs::File::open(table) else {
        return SocketPathsByIno::new();
    };
    // Guard against a hypothetically unbounded pseudo file.
    const READ_LIMIT: u64 = 4 * 1024 * 1024 * 1024; // 4GiB
    parse_socket_table(BufReader::new(table.take(READ_LIMIT)))
}

/// Parses a unix domain socket table, collecting the listening path-named
/// stream sockets.
fn parse_socket_table<R: BufRead>(mut table: R) -> SocketPathsByIno {
    let mut sox = SocketPathsByIno::new();
    let mut line_buf = String::with_capacity(256);
    loop {
        line_buf.clear();
        match table.read_line(&mut line_buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                if let Some((ino, path)) = parse_socket_line(&line_buf) {
                    sox.insert(ino, path);
                }
            }
        }
    }
    sox
}

/// Parses one socket table line into an (inode, path) pair, or `None` for
/// lines of no interest, including the header line.
///
/// The kernel pads narrow fields with multiple spaces (the inode column is
/// formatted "%5lu"), so fields must be split on runs of whitespace, never on
/// single spaces. Sockets without a path and sockets in the abstract
/// namespace (path starting with '@') are skipped. The path is detached from
/// the line buffer by the `to_owned` below.
fn parse_socket_line(line: &str) -> Option<(u64, String)> {
    let mut fields = line.split_whitespace();
    let flags = fields.nth(FLAGS_FIELD)?;
    let soxtype = fields.next()?;
    let ino = fields.nth(INODE_FIELD - TYPE_FIELD - 1)?;
    let path = fields.nth(PATH_FIELD - INODE_FIELD - 1)?;
    if path.starts_with('@') {
        return None;
    }
    // Hex parse failures also weed out the header line.
    let flags = u32::from_str_radix(flags, 16).ok()?;
    let soxtype = u16::from_str_radix(soxtype, 16).ok()?;
    if soxtype != SOCK_STREAM || flags != SO_ACCEPTCON {
        return None;
    }
    let ino = ino.parse::<u64>().ok()?;
    Some((ino, path.to_owned()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const HEADER: &str = "Num       RefCount Protocol Flags    Type St Inode Path\n";

    #[test]
    fn skips_header_and_keeps_only_listening_stream_sockets() {
        let table = concat!(
            "Num       RefCount Protocol Flags    Type St Inode Path\n",
            "0000000000000001: 00000002 00000000 00010000 0001 01 20001 /run/foo.sock\n",
            "0000000000000002: 00000002 00000000 00000000 0001 03 20002 /run/connected.sock\n",
            "0000000000000003: 00000002 00000000 00010000 0002 01 20003 /run/dgram.sock\n",
            "0000000000000004: 00000002 00000000 00010000 0001 01 20004\n",
        );
        let sox = parse_socket_table(table.as_bytes());
        assert_eq!(sox.len(), 1);
        assert_eq!(sox.get(&20001).map(String::as_str), Some("/run/foo.sock"));
    }

    #[test]
    fn splits_on_runs_of_whitespace() {
        // Narrow inode numbers are padded to the "%5lu" field width.
        let line = format!(
            "{HEADER}0000000000000001: 00000002 00000000 00010000 0001 01   123 /run/narrow.sock\n"
        );
        let sox = parse_socket_table(line.as_bytes());
        assert_eq!(sox.get(&123).map(String::as_str), Some("/run/narrow.sock"));
    }

    #[test]
    fn never_enumerates_abstract_namespace_sockets() {
        let line = format!(
            "{HEADER}0000000000000001: 00000002 00000000 00010000 0001 01 20001 @/abstract/socket\n"
        );
        let sox = parse_socket_table(line.as_bytes());
        assert!(sox.is_empty());
    }

    #[test]
    fn returns_empty_map_for_unreadable_table() {
        assert!(listening_uds_visible_to(-1).is_empty());
    }
}
