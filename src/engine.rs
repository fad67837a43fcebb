// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Engine records bind a workload watcher to a discovered container engine
//! process and supervise the watch.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::model::{Container, ContainerEngine, Pid};
use crate::watcher::Watcher;

/// Timebox for the identity and version queries at bind time; these must be
/// swift and are not worth stalling a discovery for.
const IDENTITY_TIMEOUT: Duration = Duration::from_secs(2);

/// A single container engine under watch.
///
/// An engine can become "done" at any time, when the engine process
/// terminates or otherwise disconnects the watcher; the [`Engine::done`]
/// signal then closes. Pruning in the central registry picks such engines up
/// and drops them.
pub struct Engine {
    watcher: Arc<dyn Watcher>,
    /// Engine identity as reported at bind time.
    pub id: String,
    /// Engine version as reported at bind time.
    pub version: String,
    /// PID of the engine's parent process, when the engine was attached
    /// through a socket activator; see [`ContainerEngine::ppid_hint`].
    pub ppid_hint: Option<Pid>,
    done: CancellationToken,
    closed: Arc<AtomicBool>,
}

impl Engine {
    /// Binds a new engine record to the supplied watcher. The watcher's watch
    /// loop is already running on a supervising task when `new` returns; the
    /// engine is "warming up".
    ///
    /// The supervising task owns the end of the watcher's life: when the
    /// watch loop returns it logs the termination reason, closes the engine's
    /// done signal, and closes the watcher.
    pub async fn new(
        lifetime: CancellationToken,
        watcher: Arc<dyn Watcher>,
        ppid_hint: Option<Pid>,
    ) -> Arc<Engine> {
        let id = timeout(IDENTITY_TIMEOUT, watcher.id())
            .await
            .unwrap_or_default();
        let version = timeout(IDENTITY_TIMEOUT, watcher.version())
            .await
            .unwrap_or_default();
        info!(
            engine = watcher.engine_type(),
            pid = watcher.pid(),
            id = %id,
            version = %version,
            "watching container engine"
        );
        let engine = Arc::new(Engine {
            watcher: watcher.clone(),
            id,
            version,
            ppid_hint,
            done: CancellationToken::new(),
            closed: Arc::new(AtomicBool::new(false)),
        });
        let done = engine.done.clone();
        let closed = engine.closed.clone();
        tokio::spawn(async move {
            let reason = match watcher.watch(lifetime).await {
                Ok(()) => "watch ended".to_string(),
                Err(err) => err.to_string(),
            };
            info!(
                pid = watcher.pid(),
                reason = %reason,
                "stopped watching container engine"
            );
            done.cancel();
            if !closed.swap(true, Ordering::SeqCst) {
                watcher.close();
            }
        });
        engine
    }

    /// True as long as the watcher is operational and has not permanently
    /// failed or terminated.
    pub fn is_alive(&self) -> bool {
        !self.done.is_cancelled()
    }

    /// The latched signal closing when the watch has terminated.
    pub fn done(&self) -> CancellationToken {
        self.done.clone()
    }

    /// Closes the underlying watcher, unless the supervising task already did
    /// so. Safe to call any number of times.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.watcher.close();
        }
    }

    /// The engine identity descriptor shared by this engine's containers.
    pub fn descriptor(&self) -> ContainerEngine {
        ContainerEngine {
            id: self.id.clone(),
            engine_type: self.watcher.engine_type().to_owned(),
            version: self.version.clone(),
            api: self.watcher.api(),
            pid: self.watcher.pid(),
            ppid_hint: self.ppid_hint,
        }
    }

    /// Snapshots the alive containers managed by this engine.
    ///
    /// The returned containers reference a single freshly synthesized
    /// [`ContainerEngine`] descriptor and thus are decoupled from this engine
    /// record. Label maps are cloned: the watcher shares its label storage
    /// across snapshots, while downstream decorators mutate what we hand out.
    pub fn containers(&self) -> Vec<Container> {
        let descriptor = Arc::new(self.descriptor());
        let portfolio = self.watcher.portfolio();
        portfolio
            .containers()
            .map(|container| Container {
                id: container.id.clone(),
                name: container.name.clone(),
                container_type: descriptor.engine_type.clone(),
                flavor: descriptor.engine_type.clone(),
                pid: container.pid,
                paused: container.paused,
                labels: container.labels.clone(),
                engine: descriptor.clone(),
            })
            .collect()
    }
}
