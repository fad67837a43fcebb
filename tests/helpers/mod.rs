// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use turtlefinder::watcher::{ContainerInfo, Portfolio, Watcher};
use turtlefinder::{Contexter, Error, Labels, Pid, Process, ProcessTable};

/// A controllable stand-in for an engine-specific workload watcher: becomes
/// ready as soon as its watch loop runs, and reports a single static
/// container.
pub struct MockWatcher {
    pub engine_type: &'static str,
    pub api: String,
    pub pid: Pid,
    pub ready: CancellationToken,
    pub stop: CancellationToken,
    pub closes: AtomicUsize,
    pub workload: Vec<ContainerInfo>,
}

impl MockWatcher {
    pub fn new(engine_type: &'static str, api: impl Into<String>, pid: Pid) -> Arc<Self> {
        let mut labels = Labels::new();
        labels.insert("made-by".into(), "mock".into());
        Arc::new(MockWatcher {
            engine_type,
            api: api.into(),
            pid,
            ready: CancellationToken::new(),
            stop: CancellationToken::new(),
            closes: AtomicUsize::new(0),
            workload: vec![ContainerInfo {
                id: format!("mock-container-{pid}"),
                name: format!("mock-workload-{pid}"),
                pid: 0,
                paused: false,
                labels,
            }],
        })
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Watcher for MockWatcher {
    async fn watch(&self, lifetime: CancellationToken) -> Result<(), Error> {
        self.ready.cancel();
        tokio::select! {
            _ = lifetime.cancelled() => Err(Error::WatchTerminated {
                reason: "watch context cancelled".into(),
            }),
            _ = self.stop.cancelled() => Ok(()),
        }
    }

    fn ready(&self) -> CancellationToken {
        self.ready.clone()
    }

    async fn id(&self) -> String {
        format!("mock-engine-{}", self.pid)
    }

    async fn version(&self) -> String {
        "47.11".into()
    }

    fn engine_type(&self) -> &'static str {
        self.engine_type
    }

    fn api(&self) -> String {
        self.api.clone()
    }

    fn pid(&self) -> Pid {
        self.pid
    }

    fn portfolio(&self) -> Portfolio {
        let mut portfolio = Portfolio::new();
        for container in &self.workload {
            portfolio.add("", container.clone());
        }
        portfolio
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Builds a process table from (pid, ppid, name) triples.
pub fn process_table(entries: &[(Pid, Pid, &str)]) -> ProcessTable {
    entries
        .iter()
        .map(|(pid, ppid, name)| {
            (
                *pid,
                Process {
                    pid: *pid,
                    ppid: *ppid,
                    name: (*name).to_string(),
                },
            )
        })
        .collect()
}

/// A contexter handing out child tokens of the given root token, so the test
/// can wind down all watchers in one go.
pub fn contexter(root: &CancellationToken) -> Contexter {
    let root = root.clone();
    Arc::new(move || root.child_token())
}

pub fn own_pid() -> Pid {
    std::process::id().cast_signed()
}
