// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! The workload watcher port: the capability set the discovery core consumes
//! from engine-specific client adapters.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::Error;
use crate::model::{Labels, Pid};

/// One alive container in a watcher's workload snapshot.
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    /// Container PID as reported by the engine, in the engine's PID
    /// namespace.
    pub pid: Pid,
    pub paused: bool,
    pub labels: Labels,
}

/// A watcher's snapshot of its engine's alive containers, grouped by project
/// (composer-style engines) or namespace (containerd/CRI). Ungrouped
/// containers live under the empty project name.
#[derive(Debug, Clone, Default)]
pub struct Portfolio {
    projects: BTreeMap<String, Vec<ContainerInfo>>,
}

impl Portfolio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, project: impl Into<String>, container: ContainerInfo) {
        self.projects.entry(project.into()).or_default().push(container);
    }

    /// Project names in this portfolio, in stable order.
    pub fn project_names(&self) -> impl Iterator<Item = &str> {
        self.projects.keys().map(String::as_str)
    }

    pub fn project(&self, name: &str) -> Option<&[ContainerInfo]> {
        self.projects.get(name).map(Vec::as_slice)
    }

    /// All containers across all projects, in stable project order.
    pub fn containers(&self) -> impl Iterator<Item = &ContainerInfo> {
        self.projects.values().flatten()
    }
}

/// Tracks the alive container workload of a single container engine.
///
/// Implementations wrap an engine-specific client that opens the engine API
/// and streams workload events. The core only ever consumes this trait; it
/// never speaks any engine wire protocol itself.
///
/// A watcher is created by a detector factory, is owned by exactly one
/// [`crate::engine::Engine`], and is closed exactly once.
#[async_trait]
pub trait Watcher: Send + Sync {
    /// Runs the workload event stream loop; blocks until the supplied
    /// lifetime token is cancelled, the engine disconnects, or a fatal stream
    /// error occurs.
    async fn watch(&self, lifetime: CancellationToken) -> Result<(), Error>;

    /// Returns the latched ready signal, closed once the initial workload
    /// enumeration has reached steady state. The signal also closes when
    /// [`Watcher::watch`] has terminated, so waiters never block on a dead
    /// watcher.
    fn ready(&self) -> CancellationToken;

    /// Queries the engine-reported identity; callers timebox this.
    async fn id(&self) -> String;

    /// Queries the engine-reported version; callers timebox this.
    async fn version(&self) -> String;

    /// Engine type tag, such as "docker.com" or "containerd.io".
    fn engine_type(&self) -> &'static str;

    /// The API endpoint this watcher is connected to.
    fn api(&self) -> String;

    /// PID of the engine process serving the watched API.
    fn pid(&self) -> Pid;

    /// Snapshot of the currently alive containers.
    fn portfolio(&self) -> Portfolio;

    /// Releases the underlying engine client. Called exactly once, by the
    /// owning engine record.
    fn close(&self);
}
