// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::io;

use thiserror::Error;

use crate::model::Pid;

#[derive(Error, Debug)]
pub enum Error {
    /// The fd directory of a process could not be read, typically for lack of
    /// privileges or because the process just vanished.
    #[error("cannot determine fds for process with PID {pid}: {source}")]
    SocketFds { pid: Pid, source: io::Error },

    /// A path observed inside another mount namespace did not resolve within
    /// the wormhole root of that namespace.
    #[error("invalid API endpoint path {path} in the context of {wormhole}: {source}")]
    Wormhole {
        path: String,
        wormhole: String,
        source: io::Error,
    },

    /// Dialing an engine API endpoint failed or timed out.
    #[error("cannot activate container engine at API {api}: {reason}")]
    Activation { api: String, reason: String },

    /// The process serving an activated socket could not be located.
    #[error("cannot find activated container engine process '{name}' for API endpoint {api}")]
    DaemonNotFound { name: String, api: String },

    /// A watcher factory declined to produce a watcher for an endpoint.
    #[error("no watcher for container engine API endpoint {api}")]
    WatcherFactory { api: String },

    /// A workload watch terminated, either orderly or with a stream failure.
    #[error("watch terminated: {reason}")]
    WatchTerminated { reason: String },
}
