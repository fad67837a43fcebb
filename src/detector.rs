// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Detector ports and the catalog wiring them into the finder.
//!
//! Three disjoint plugin kinds exist: daemon detectors find always-on engine
//! processes by name, activator detectors name socket activator processes,
//! and activated-engine finders identify engines that only come to life when
//! their pre-opened API socket is first connected. The catalog is assembled
//! by the caller at startup and is immutable afterwards; there is no
//! side-effectful load-time registration.

pub mod systemd;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::model::Pid;
use crate::watcher::Watcher;

/// Detects an always-on container engine daemon by its process name and acts
/// as the factory for its workload watchers.
///
/// Factories are expected to construct the engine client, validate the
/// endpoint with one inexpensive probing call (an "info" or "version"
/// round-trip) under a short timeout, and to return nothing on any failure,
/// including a hit deadline, without leaking the client.
#[async_trait]
pub trait DaemonDetector: Send + Sync {
    /// One or more process names of this type of engine, matching the kernel
    /// "comm" field.
    fn engine_names(&self) -> Vec<String>;

    /// Creates watchers for the engine process with the given PID, reachable
    /// under at least one of the given API paths. Usually a single watcher;
    /// engines exposing both a native and a CRI workload stream return one
    /// watcher per stream. An empty result means no usable endpoint.
    async fn new_watchers(
        &self,
        lifetime: CancellationToken,
        pid: Pid,
        api_paths: &[String],
    ) -> Vec<Arc<dyn Watcher>>;
}

/// Identifies a socket activator process, such as "systemd", by its process
/// name ("comm" field, not the executable path).
pub trait ActivatorDetector: Send + Sync {
    fn name(&self) -> &str;
}

/// Identification of a socket-activatable container engine.
#[derive(Debug, Clone)]
pub struct EngineIdent {
    /// API endpoint file name, such as "podman.sock", without any directory.
    pub api_suffix: String,
    /// Process name of the engine once activated.
    pub process_name: String,
}

/// Identifies a socket-activatable container engine by its API socket name
/// and creates the watcher once the engine has been activated.
///
/// The same probing expectations as for [`DaemonDetector`] factories apply.
#[async_trait]
pub trait ActivatedEngineFinder: Send + Sync {
    fn ident(&self) -> EngineIdent;

    /// Creates a watcher for the activated engine process with the given PID,
    /// reachable under the given API path.
    async fn new_watcher(
        &self,
        lifetime: CancellationToken,
        pid: Pid,
        api_path: &str,
    ) -> Option<Arc<dyn Watcher>>;
}

/// An activated-engine finder plus its precomputed path-suffix match text.
#[derive(Clone)]
pub(crate) struct ActivatedFinderEntry {
    /// "/" + the ident's API suffix, so "foo.sock" never matches
    /// "notfoo.sock".
    pub(crate) path_suffix: String,
    pub(crate) process_name: String,
    pub(crate) finder: Arc<dyn ActivatedEngineFinder>,
}

/// The static catalog of detectors a finder works with, assembled by the
/// caller at startup.
#[derive(Default, Clone)]
pub struct Catalog {
    pub(crate) daemon_detectors: Vec<Arc<dyn DaemonDetector>>,
    pub(crate) activator_names: Vec<String>,
    pub(crate) activated_finders: Vec<ActivatedFinderEntry>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_daemon_detector(mut self, detector: Arc<dyn DaemonDetector>) -> Self {
        self.daemon_detectors.push(detector);
        self
    }

    pub fn with_activator_detector(mut self, detector: Arc<dyn ActivatorDetector>) -> Self {
        self.activator_names.push(detector.name().to_owned());
        self
    }

    pub fn with_activated_engine_finder(mut self, finder: Arc<dyn ActivatedEngineFinder>) -> Self {
        let ident = finder.ident();
        self.activated_finders.push(ActivatedFinderEntry {
            path_suffix: format!("/{}", ident.api_suffix),
            process_name: ident.process_name,
            finder,
        });
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct NopFinder;

    #[async_trait]
    impl ActivatedEngineFinder for NopFinder {
        fn ident(&self) -> EngineIdent {
            EngineIdent {
                api_suffix: "foo.sock".into(),
                process_name: "food".into(),
            }
        }

        async fn new_watcher(
            &self,
            _lifetime: CancellationToken,
            _pid: Pid,
            _api_path: &str,
        ) -> Option<Arc<dyn Watcher>> {
            None
        }
    }

    #[test]
    fn suffix_matching_is_anchored_at_a_path_separator() {
        let catalog = Catalog::new().with_activated_engine_finder(Arc::new(NopFinder));
        let entry = catalog.activated_finders.first().unwrap();
        assert!("/run/foo.sock".ends_with(&entry.path_suffix));
        assert!(!"/run/notfoo.sock".ends_with(&entry.path_suffix));
    }
}
