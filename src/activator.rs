// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Tracks the socket activation configuration and state of a single
//! activator process, such as "systemd".
//!
//! Socket activators pre-open the listening API sockets of activatable
//! engines. This tracker detects well-known engine API sockets among an
//! activator's listening sockets and dispatches the activate-and-attach
//! protocol for each newly appeared one. The resulting watchers, by their
//! very activity of continuously watching workloads, then keep the activated
//! engines alive.
//!
//! Attached watchers are life-cycle managed exactly like those of always-on
//! engines, through [`crate::engine::Engine`] records; tracker state itself
//! needs no cleanup, it is simply dropped when the activator process
//! disappears.

use std::collections::HashSet;
use std::hash::Hasher;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::error;

use crate::detector::ActivatedFinderEntry;
use crate::finder::Contexter;
use crate::model::Process;
use crate::procfs::fd::{self, RawSocketFd};
use crate::procfs::unix::{self, SocketPathsByIno};
use crate::watch::{ActivationSink, activate_and_start_watch};
use crate::wormhole;

pub(crate) struct SocketActivatorProcess {
    proc: Process,
    finders: Vec<ActivatedFinderEntry>,
    initial_sync_wait: Duration,
    contexter: Contexter,
    sink: Arc<dyn ActivationSink>,
    state: Mutex<ActivatorState>,
}

#[derive(Default)]
struct ActivatorState {
    /// Hash over the activator's current socket fds, detecting
    /// reconfigurations.
    hash: u64,
    /// Socket inodes already processed one way or another, to be ignored
    /// until they disappear from the configuration.
    observed: HashSet<u64>,
}

/// 64-bit non-cryptographic hash over an activator's (fd, socket inode)
/// pairs, in their raw string form.
fn socket_config_hash(rawfds: &[RawSocketFd]) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for rawfd in rawfds {
        hasher.write(rawfd.fd.as_bytes());
        hasher.write(rawfd.ino.as_bytes());
    }
    hasher.finish()
}

impl SocketActivatorProcess {
    pub(crate) fn new(
        proc: Process,
        finders: Vec<ActivatedFinderEntry>,
        initial_sync_wait: Duration,
        contexter: Contexter,
        sink: Arc<dyn ActivationSink>,
    ) -> Self {
        SocketActivatorProcess {
            proc,
            finders,
            initial_sync_wait,
            contexter,
            sink,
            state: Mutex::new(ActivatorState::default()),
        }
    }

    /// Scans this activator for newly appeared well-known listening engine
    /// API sockets and dispatches the activate-and-attach protocol for each,
    /// onto tasks tracked by the supplied set. Each dispatched task is
    /// internally time-boxed, so joining the set never stalls a discovery for
    /// long.
    pub(crate) fn update(&self, tasks: &mut JoinSet<()>) {
        let rawfds = match fd::raw_socket_fds(self.proc.pid) {
            Ok(rawfds) => rawfds,
            Err(err) => {
                error!(
                    activator = %self.proc.name,
                    pid = self.proc.pid,
                    error = %err,
                    "cannot update socket activator state"
                );
                return;
            }
        };
        let hash = socket_config_hash(&rawfds);
        let pid = self.proc.pid;
        let Some(newapis) =
            self.discover_api_paths(&rawfds, hash, || unix::listening_uds_visible_to(pid))
        else {
            return;
        };
        for (ino, api) in newapis {
            let Some(entry) = self
                .finders
                .iter()
                .find(|finder| api.ends_with(&finder.path_suffix))
            else {
                continue;
            };
            // The endpoint path is relative to the activator's mount
            // namespace; go through the wormhole so dialing works from ours.
            let api = match wormhole::resolve(self.proc.pid, &api) {
                Ok(resolved) => resolved.display().to_string(),
                Err(err) => {
                    error!(error = %err, "unusable engine API endpoint");
                    continue;
                }
            };
            let lifetime = (self.contexter)();
            let engine_name = entry.process_name.clone();
            let finder = entry.finder.clone();
            let sink = self.sink.clone();
            let activator_pid = self.proc.pid;
            let maxwait = self.initial_sync_wait;
            tasks.spawn(async move {
                activate_and_start_watch(
                    lifetime,
                    api,
                    ino,
                    activator_pid,
                    engine_name,
                    finder,
                    sink,
                    maxwait,
                )
                .await;
            });
        }
    }

    /// Prunes and updates the observed socket map, returning the newly found
    /// API endpoint paths by inode number. Returns `None` when the socket
    /// configuration is unchanged, or when a concurrent update got in first.
    ///
    /// Newly seen inodes enter the observed set before this returns, so a
    /// concurrent update can never dispatch them a second time.
    fn discover_api_paths(
        &self,
        rawfds: &[RawSocketFd],
        hash: u64,
        load_listening_uds: impl FnOnce() -> SocketPathsByIno,
    ) -> Option<SocketPathsByIno> {
        if let Ok(state) = self.state.lock()
            && hash == state.hash
        {
            return None;
        }

        // Loading the socket table is procfs I/O; keep it outside the lock.
        let sox = fd::listening_paths_of_raw_fds(rawfds, &load_listening_uds());

        let mut state = self.state.lock().ok()?;
        if hash == state.hash {
            return None; // bad luck: someone else was faster...
        }
        state.hash = hash;
        state.observed.retain(|ino| sox.contains_key(ino));

        let mut newpaths = SocketPathsByIno::new();
        for (ino, path) in sox {
            if !state.observed.insert(ino) {
                continue;
            }
            newpaths.insert(ino, path);
        }
        Some(newpaths)
    }
}
