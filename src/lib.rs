// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Discovers container engines on a Linux host and tracks their alive
//! container workload: always-on daemons (Docker, containerd, CRI-O, ...),
//! engines only springing to life on demand through a socket activator
//! (systemd), and engines nested inside other engines' containers.
//!
//! The discovery works solely from the proc filesystem plus the engines' own
//! APIs: the process table is scanned for well-known engine and activator
//! process names, listening unix domain socket endpoints are linked back to
//! the processes serving them, and endpoints in other mount namespaces are
//! dialled through the `/proc/<pid>/root` wormholes. Engine-specific client
//! adapters plug in through the [`detector`] catalog and the
//! [`watcher::Watcher`] port.

// Correctness
#![deny(clippy::indexing_slicing)]
#![deny(clippy::string_slice)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::undocumented_unsafe_blocks)]
// Panicking code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unimplemented)]
#![deny(clippy::todo)]
// Debug code that shouldn't be in production
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]

mod activator;
mod daemon;
pub mod detector;
mod engine;
mod errors;
mod finder;
mod model;
mod procfs;
mod stacker;
mod watch;
pub mod watcher;
mod wormhole;

// Re-export the public API
pub use daemon::find_daemon;
pub use errors::Error;
pub use finder::{Contexter, FinderOptions, Overseer, TurtleFinder};
pub use model::{
    Container, ContainerEngine, IdentityPidMapper, Labels, Pid, PidMapper, Process, ProcessTable,
};
pub use procfs::fd::{RawSocketFd, listening_paths_of, listening_paths_of_raw_fds, raw_socket_fds};
pub use procfs::unix::{SocketPathsByIno, listening_uds_visible_to};
pub use stacker::TURTLEFINDER_CONTAINER_PREFIX_LABEL;
pub use watch::ActivationSink;
pub use wormhole::resolve as resolve_in_wormhole;
