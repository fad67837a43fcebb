// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! The central engine registry and discovery orchestrator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::available_parallelism;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::activator::SocketActivatorProcess;
use crate::detector::{Catalog, DaemonDetector};
use crate::engine::Engine;
use crate::errors::Error;
use crate::model::{Container, ContainerEngine, Pid, PidMapper, Process, ProcessTable};
use crate::procfs::{fd, unix};
use crate::stacker::stack_engines;
use crate::watch::{ActivationSink, start_watch};
use crate::watcher::Watcher;
use crate::wormhole;

/// Supplies the contexts governing long-running engine workload watching.
///
/// Called whenever a new engine has been found and its workload is about to
/// be watched. The returned token should be one the caller keeps control
/// over: cancelling it is the only way to wind down the watcher tasks a
/// finder (indirectly) runs.
pub type Contexter = Arc<dyn Fn() -> CancellationToken + Send + Sync>;

/// Tuning knobs for a [`TurtleFinder`].
#[derive(Clone, Copy, Debug)]
pub struct FinderOptions {
    workers: usize,
    getting_online_wait: Duration,
}

impl Default for FinderOptions {
    fn default() -> Self {
        FinderOptions {
            workers: 0,
            getting_online_wait: Duration::from_secs(2),
        }
    }
}

impl FinderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of parallel engine queries. Zero means the
    /// number of CPUs. The maximum applies across all concurrent
    /// [`TurtleFinder::containers`] calls, not to individual calls.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the maximum wait for the workload view of a newly discovered
    /// engine to synchronize before a discovery proceeds. Synchronization
    /// that takes longer is not aborted; discoveries just stop waiting for
    /// it.
    pub fn with_getting_online_wait(mut self, wait: Duration) -> Self {
        self.getting_online_wait = wait;
        self
    }
}

/// Read-only access to the container engines currently being monitored, for
/// consumers that are handed a finder under some narrower interface.
pub trait Overseer {
    /// Snapshot of the engines whose watchers are still operational.
    fn engines(&self) -> Vec<ContainerEngine>;

    /// Number of engine processes currently under watch.
    fn engine_count(&self) -> usize;
}

/// Discovers alive containers from all container engines found on the host:
/// always-on daemons, socket-activated engines, and engines nested inside
/// other engines' containers.
///
/// On demand, a finder scans the supplied process table for signs of engine
/// life and contacts newly found engines in order to watch their workload.
/// Cloning is shallow; all clones share one registry. Safe for concurrent
/// use.
#[derive(Clone)]
pub struct TurtleFinder {
    inner: Arc<FinderInner>,
}

struct FinderInner {
    contexter: Contexter,
    /// Engine process names per daemon detector, queried once up front.
    daemon_plugins: Vec<(Vec<String>, Arc<dyn DaemonDetector>)>,
    catalog: Catalog,
    worker_sem: Arc<Semaphore>,
    getting_online_wait: Duration,
    state: Mutex<FinderState>,
}

#[derive(Default)]
struct FinderState {
    /// Engines by their process PID; one engine process may carry several
    /// engines, as it may expose more than one workload stream.
    engines: HashMap<Pid, Vec<Arc<Engine>>>,
    /// Socket activators by their process PID.
    activators: HashMap<Pid, Arc<SocketActivatorProcess>>,
    closed: bool,
}

impl FinderInner {
    fn state(&self) -> MutexGuard<'_, FinderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TurtleFinder {
    /// Returns a new finder working with the given detector catalog. The
    /// supplied contexter is consulted for every new engine watch; see
    /// [`Contexter`].
    pub fn new(contexter: Contexter, catalog: Catalog, opts: FinderOptions) -> TurtleFinder {
        let workers = match opts.workers {
            0 => available_parallelism().map(usize::from).unwrap_or(1),
            workers => workers,
        };
        let daemon_plugins = catalog
            .daemon_detectors
            .iter()
            .map(|detector| (detector.engine_names(), detector.clone()))
            .collect();
        TurtleFinder {
            inner: Arc::new(FinderInner {
                contexter,
                daemon_plugins,
                catalog,
                worker_sem: Arc::new(Semaphore::new(workers)),
                getting_online_wait: opts.getting_online_wait,
                state: Mutex::new(FinderState::default()),
            }),
        }
    }

    /// Returns the current state of alive containers across all discovered
    /// container engines: the best current snapshot.
    ///
    /// Runs the full pipeline: prune vanished engines and activators, scan
    /// the supplied process table for new ones, attach watchers (time-boxed),
    /// query all live watchers in parallel, and fill in the engine hierarchy.
    /// Scan and query failures never fail the call; affected engines are
    /// simply absent from the result. Cancelling `call` cuts the fan-out
    /// short, returning whatever has been collected. After [`close`], the
    /// result is always empty.
    ///
    /// [`close`]: TurtleFinder::close
    pub async fn containers(
        &self,
        call: &CancellationToken,
        procs: &ProcessTable,
        pidmap: &dyn PidMapper,
    ) -> Vec<Container> {
        if self.inner.state().closed {
            return Vec::new();
        }
        self.prune(procs);
        self.update(procs).await;

        let all_engines: Vec<Arc<Engine>> = {
            let state = self.inner.state();
            state.engines.values().flatten().cloned().collect()
        };
        if all_engines.is_empty() {
            return Vec::new();
        }
        info!(
            engines = all_engines.len(),
            "consulting container engines ... in parallel"
        );
        // The worker semaphore bounds engine queries globally, over all
        // concurrent calls; a discovery therefore may have to wait for
        // unrelated calls' queries to drain first.
        let mut queries: JoinSet<Vec<Container>> = JoinSet::new();
        for engine in all_engines {
            let permit = tokio::select! {
                permit = self.inner.worker_sem.clone().acquire_owned() => {
                    match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    }
                }
                _ = call.cancelled() => break,
            };
            queries.spawn(async move {
                let _permit = permit;
                engine.containers()
            });
        }
        let mut allcontainers = Vec::new();
        while let Some(result) = queries.join_next().await {
            if let Ok(containers) = result {
                allcontainers.extend(containers);
            }
        }
        stack_engines(&mut allcontainers, procs, pidmap);
        allcontainers
    }

    /// Closes all engine watchers and empties the registry. User-supplied
    /// watch contexts are not cancelled here; that remains under the
    /// caller's control through its contexter.
    pub fn close(&self) {
        let mut state = self.inner.state();
        state.closed = true;
        for engines in state.engines.values() {
            for engine in engines {
                engine.close();
            }
        }
        state.engines.clear();
        state.activators.clear();
    }

    /// Removes engines whose processes have vanished from the process table,
    /// along with any watchers that have already terminated; likewise drops
    /// vanished socket activators.
    fn prune(&self, procs: &ProcessTable) {
        let mut state = self.inner.state();
        state.engines.retain(|pid, engines| {
            if procs.contains_key(pid) {
                return true;
            }
            engines.retain(|engine| {
                if engine.is_alive() {
                    // The engine process is gone, but the watcher has not
                    // noticed yet; it will terminate on its own shortly.
                    return true;
                }
                engine.close();
                false
            });
            !engines.is_empty()
        });
        // Socket activators need no explicit cleanup, dropping the state
        // suffices; orphaned activated watchers are reclaimed by the engine
        // pruning above in a later round.
        state.activators.retain(|pid, _| procs.contains_key(pid));
    }

    /// Looks for new engine daemon processes and socket activators, then
    /// waits until all watcher attachments and activator dispatches have
    /// finished their (individually time-boxed) initial synchronization.
    async fn update(&self, procs: &ProcessTable) {
        let mut tasks: JoinSet<()> = JoinSet::new();
        self.update_daemons(procs, &mut tasks);
        self.update_activators(procs, &mut tasks);
        while tasks.join_next().await.is_some() {}
    }

    fn update_daemons(&self, procs: &ProcessTable, tasks: &mut JoinSet<()>) {
        // Signs of engine life, by process name...
        let mut engineprocs: Vec<(Process, Arc<dyn DaemonDetector>)> = Vec::new();
        for proc in procs.values() {
            for (names, detector) in &self.inner.daemon_plugins {
                if names.iter().any(|name| name == &proc.name) {
                    engineprocs.push((proc.clone(), detector.clone()));
                    break;
                }
            }
        }
        // ...weed out those already watched, keeping the lock window free of
        // any procfs I/O...
        let newengineprocs: Vec<(Process, Arc<dyn DaemonDetector>)> = {
            let state = self.inner.state();
            engineprocs
                .into_iter()
                .filter(|(proc, _)| !state.engines.contains_key(&proc.pid))
                .collect()
        };
        // ...then look into each new engine process in parallel: find its
        // potential API socket endpoints and try to contact the engine there.
        for (proc, detector) in newengineprocs {
            let inner = self.inner.clone();
            tasks.spawn(async move {
                inner.attach_daemon_watchers(proc, detector).await;
            });
        }
    }

    fn update_activators(&self, procs: &ProcessTable, tasks: &mut JoinSet<()>) {
        let activators: Vec<Arc<SocketActivatorProcess>> = {
            let mut state = self.inner.state();
            if state.closed {
                return;
            }
            for proc in procs.values() {
                if !self
                    .inner
                    .catalog
                    .activator_names
                    .iter()
                    .any(|name| name == &proc.name)
                {
                    continue;
                }
                if state.activators.contains_key(&proc.pid) {
                    continue;
                }
                info!(
                    activator = %proc.name,
                    pid = proc.pid,
                    "found new socket activator process"
                );
                let sink = Arc::new(RegisterActivatedEngine {
                    inner: self.inner.clone(),
                    activator_pid: proc.pid,
                });
                state.activators.insert(
                    proc.pid,
                    Arc::new(SocketActivatorProcess::new(
                        proc.clone(),
                        self.inner.catalog.activated_finders.clone(),
                        self.inner.getting_online_wait,
                        self.inner.contexter.clone(),
                        sink,
                    )),
                );
            }
            state.activators.values().cloned().collect()
        };
        // The activators do their own (new) endpoint discovery and watcher
        // creation, hiding the activation mechanics; new watchers come back
        // in through the registration sink.
        for activator in activators {
            activator.update(tasks);
        }
    }
}

impl FinderInner {
    /// Scans a new engine daemon process for API endpoints and attaches the
    /// detector's watchers, waiting time-boxed for their workload views to
    /// synchronize.
    async fn attach_daemon_watchers(
        self: &Arc<Self>,
        proc: Process,
        detector: Arc<dyn DaemonDetector>,
    ) {
        debug!(
            process = %proc.name,
            pid = proc.pid,
            "scanning new potential engine process for API endpoints"
        );
        let apis = discover_api_sockets(proc.pid);
        if apis.is_empty() {
            debug!(pid = proc.pid, "no API endpoint found");
            return;
        }
        // Translate the endpoint paths so we can access them from our mount
        // namespace; this also weeds out endpoints with unresolvable paths.
        let mut wormholed: Vec<String> = Vec::new();
        for api in apis {
            match wormhole::resolve(proc.pid, &api) {
                Ok(resolved) => wormholed.push(resolved.display().to_string()),
                Err(err) => warn!(error = %err, "unusable API endpoint"),
            }
        }
        wormholed.sort();
        if wormholed.is_empty() {
            return;
        }
        let lifetime = (self.contexter)();
        for watcher in detector
            .new_watchers(lifetime.clone(), proc.pid, &wormholed)
            .await
        {
            self.register_engine(lifetime.clone(), watcher, proc.pid, None)
                .await;
        }
    }

    /// Binds a watcher into a new engine record, waits time-boxed for its
    /// initial synchronization, and registers it. Late registrations against
    /// an already closed finder are closed immediately instead.
    async fn register_engine(
        self: &Arc<Self>,
        lifetime: CancellationToken,
        watcher: Arc<dyn Watcher>,
        pid: Pid,
        ppid_hint: Option<Pid>,
    ) {
        let engine = Engine::new(lifetime, watcher.clone(), ppid_hint).await;
        start_watch(&watcher, self.getting_online_wait).await;
        let mut state = self.state();
        if state.closed {
            engine.close();
            return;
        }
        match ppid_hint {
            // Activated engines own their PID entry outright.
            Some(_) => {
                state.engines.insert(pid, vec![engine]);
            }
            None => state.engines.entry(pid).or_default().push(engine),
        }
    }
}

/// Registration sink for watchers created through socket activation; carries
/// the activator PID along as the parent-process hint of the new engine.
struct RegisterActivatedEngine {
    inner: Arc<FinderInner>,
    activator_pid: Pid,
}

#[async_trait]
impl ActivationSink for RegisterActivatedEngine {
    async fn outcome(&self, outcome: Result<(Arc<dyn Watcher>, Pid), Error>) {
        // Failures were already logged by the activation protocol; there is
        // nothing to register then.
        let Ok((watcher, pid)) = outcome else {
            return;
        };
        let lifetime = (self.inner.contexter)();
        self.inner
            .register_engine(lifetime, watcher, pid, Some(self.activator_pid))
            .await;
    }
}

impl Overseer for TurtleFinder {
    fn engines(&self) -> Vec<ContainerEngine> {
        let state = self.inner.state();
        let mut all = Vec::new();
        for engines in state.engines.values() {
            for engine in engines {
                if !engine.is_alive() {
                    continue;
                }
                all.push(engine.descriptor());
            }
        }
        all
    }

    fn engine_count(&self) -> usize {
        self.inner.state().engines.len()
    }
}

/// Returns the paths of listening unix domain sockets of the given process
/// that might be API endpoints, as seen inside the process's own mount
/// namespace.
fn discover_api_sockets(pid: Pid) -> Vec<String> {
    let listening = unix::listening_uds_visible_to(pid);
    fd::listening_paths_of(pid, &listening)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::watcher::Portfolio;

    struct InertWatcher {
        ready: CancellationToken,
        closes: AtomicUsize,
    }

    impl InertWatcher {
        fn new() -> Arc<Self> {
            Arc::new(InertWatcher {
                ready: CancellationToken::new(),
                closes: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Watcher for InertWatcher {
        async fn watch(&self, lifetime: CancellationToken) -> Result<(), Error> {
            self.ready.cancel();
            lifetime.cancelled().await;
            Err(Error::WatchTerminated {
                reason: "watch context cancelled".into(),
            })
        }

        fn ready(&self) -> CancellationToken {
            self.ready.clone()
        }

        async fn id(&self) -> String {
            "inert".into()
        }

        async fn version(&self) -> String {
            "0".into()
        }

        fn engine_type(&self) -> &'static str {
            "inert.example.org"
        }

        fn api(&self) -> String {
            "unix:///run/inert.sock".into()
        }

        fn pid(&self) -> Pid {
            4711
        }

        fn portfolio(&self) -> Portfolio {
            Portfolio::new()
        }

        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn new_finder() -> TurtleFinder {
        TurtleFinder::new(
            Arc::new(CancellationToken::new),
            Catalog::new(),
            FinderOptions::new().with_workers(1),
        )
    }

    fn table_with(pids: &[Pid]) -> ProcessTable {
        pids.iter()
            .map(|pid| {
                (
                    *pid,
                    Process {
                        pid: *pid,
                        ppid: 1,
                        name: "whatever".into(),
                    },
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn pruning_keeps_engines_while_their_process_lives() {
        let finder = new_finder();
        let watcher = InertWatcher::new();
        let lifetime = CancellationToken::new();
        let engine = Engine::new(lifetime.clone(), watcher.clone(), None).await;
        finder.inner.state().engines.insert(4711, vec![engine]);

        finder.prune(&table_with(&[4711]));
        assert_eq!(finder.engine_count(), 1);

        // Process gone, but the watcher has not terminated yet: the engine
        // stays for this round.
        finder.prune(&table_with(&[]));
        assert_eq!(finder.engine_count(), 1);

        // Watcher terminated as well: now the engine goes, and its watcher
        // gets closed along the way.
        lifetime.cancel();
        let engines: Vec<Arc<Engine>> = {
            let state = finder.inner.state();
            state.engines.values().flatten().cloned().collect()
        };
        for engine in engines {
            engine.done().cancelled().await;
        }
        finder.prune(&table_with(&[]));
        assert_eq!(finder.engine_count(), 0);
        assert_eq!(watcher.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn engines_snapshot_skips_terminated_engines() {
        let finder = new_finder();
        let watcher = InertWatcher::new();
        let lifetime = CancellationToken::new();
        let engine = Engine::new(lifetime.clone(), watcher, None).await;
        finder.inner.state().engines.insert(4711, vec![engine.clone()]);

        assert_eq!(finder.engines().len(), 1);

        lifetime.cancel();
        engine.done().cancelled().await;
        assert!(finder.engines().is_empty());
        // ...while the registry still lists the PID until the next pruning.
        assert_eq!(finder.engine_count(), 1);
    }

    #[tokio::test]
    async fn closing_closes_all_watchers_and_empties_the_registry() {
        let finder = new_finder();
        let watcher = InertWatcher::new();
        let engine = Engine::new(CancellationToken::new(), watcher.clone(), None).await;
        finder.inner.state().engines.insert(4711, vec![engine]);

        finder.close();
        assert_eq!(finder.engine_count(), 0);
        assert_eq!(watcher.closes.load(Ordering::SeqCst), 1);
    }
}
