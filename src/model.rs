// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! The caller-facing information model: processes as supplied by the process
//! table collaborator, and containers with their engine descriptors as handed
//! back from a discovery.

use std::collections::HashMap;
use std::sync::Arc;

/// Process identifier in the initial PID namespace.
pub type Pid = i32;

/// A single process as listed by the process table collaborator. The name
/// matches the kernel "comm" field, not the executable path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Process {
    pub pid: Pid,
    pub ppid: Pid,
    pub name: String,
}

/// All currently known processes, keyed by PID, in the initial PID namespace.
pub type ProcessTable = HashMap<Pid, Process>;

/// Container labels. Maps handed out by [`crate::engine::Engine::containers`]
/// are always shallow clones, as downstream decorators mutate them.
pub type Labels = HashMap<String, String>;

/// Maps PIDs between PID namespaces, supplied per discovery call.
pub trait PidMapper: Send + Sync {
    /// Translates `pid`, as seen in the PID namespace of the process
    /// identified by the initial-namespace PID `observer`, into the initial
    /// PID namespace. Returns `None` when the translation is unknown.
    fn translate(&self, pid: Pid, observer: Pid) -> Option<Pid>;
}

/// A [`PidMapper`] for hosts where all engines share the initial PID
/// namespace, so every PID already is an initial-namespace PID.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityPidMapper;

impl PidMapper for IdentityPidMapper {
    fn translate(&self, pid: Pid, _observer: Pid) -> Option<Pid> {
        Some(pid)
    }
}

/// Identity of a discovered container engine, as referenced by the containers
/// it manages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEngine {
    /// Engine identity as reported by the engine itself.
    pub id: String,
    /// Engine type tag, such as "docker.com" or "containerd.io".
    pub engine_type: String,
    /// Engine version as reported by the engine itself.
    pub version: String,
    /// API endpoint the workload watcher is connected to.
    pub api: String,
    /// PID of the engine process.
    pub pid: Pid,
    /// PID of the engine's parent process, if known. Socket-activated engines
    /// record their activator here, as the engine process itself appears only
    /// after the process table was taken; the parent is assumed to live in
    /// the same PID namespace, so it can stand in for PID translation.
    pub ppid_hint: Option<Pid>,
}

/// An alive container managed by one of the discovered engines.
#[derive(Debug, Clone)]
pub struct Container {
    pub id: String,
    pub name: String,
    /// Container type tag; same value as the managing engine's type.
    pub container_type: String,
    pub flavor: String,
    /// Container PID as reported by the managing engine, in the engine's PID
    /// namespace.
    pub pid: Pid,
    pub paused: bool,
    pub labels: Labels,
    /// The engine managing this container; containers from the same engine
    /// and discovery share a single descriptor.
    pub engine: Arc<ContainerEngine>,
}
