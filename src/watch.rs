// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Time-boxed watch synchronization and the activate-and-attach protocol for
//! socket-activated engines.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::daemon::find_daemon;
use crate::detector::ActivatedEngineFinder;
use crate::errors::Error;
use crate::model::Pid;
use crate::watcher::Watcher;

const FIND_ATTEMPTS: usize = 10;
const FIND_POLLING: Duration = Duration::from_millis(100);

/// Timebox for fetching the engine id after synchronization, purely for
/// logging.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(2);

/// Receives the outcome of an activate-and-attach attempt.
///
/// The outcome arrives asynchronously, on the protocol's task, at "any" later
/// time: activating the engine serving an endpoint takes however long the
/// activator and the engine need.
#[async_trait::async_trait]
pub trait ActivationSink: Send + Sync {
    async fn outcome(&self, outcome: Result<(Arc<dyn Watcher>, Pid), Error>);
}

/// Waits for the watcher to synchronize to the workload of its engine, but
/// never longer than `maxwait`: time-boxed synchronous behavior, so a
/// "typical" discovery returns the workload of an engine in the same request
/// that discovered the engine, without blocking on slow ones.
///
/// The watcher's watch loop is already running under the supervision of its
/// engine record when this is called; any synchronization still outstanding
/// when the timebox ends simply continues in the background. The end of the
/// initial synchronization phase can always be observed through the
/// watcher's ready signal.
pub(crate) async fn start_watch(watcher: &Arc<dyn Watcher>, maxwait: Duration) {
    info!(
        engine = watcher.engine_type(),
        pid = watcher.pid(),
        api = %watcher.api(),
        "beginning synchronization to container engine"
    );
    // Report the engine id once synchronized, on a transient task. The ready
    // signal also closes on watch termination, so this task is bound to end.
    let w = watcher.clone();
    tokio::spawn(async move {
        w.ready().cancelled().await;
        match timeout(IDENTIFY_TIMEOUT, w.id()).await {
            Ok(id) => info!(
                engine = w.engine_type(),
                pid = w.pid(),
                id = %id,
                "synchronized to container engine"
            ),
            Err(_) => warn!(
                engine = w.engine_type(),
                pid = w.pid(),
                "engine id query timed out"
            ),
        }
    });
    let ready = watcher.ready();
    tokio::select! {
        _ = ready.cancelled() => {}
        _ = sleep(maxwait) => {
            warn!(
                engine = watcher.engine_type(),
                pid = watcher.pid(),
                "container engine not yet synchronized ... continuing in background"
            );
        }
    }
}

/// Triggers activation of the engine serving the specified API endpoint,
/// locates the spawned service process, attaches a workload watcher to it,
/// and reports the outcome through the sink. Returns after at most `maxwait`;
/// whatever is still outstanding then continues on a background task.
///
/// The endpoint path must already be resolved into the caller's mount
/// namespace (wormholed, see [`crate::wormhole`]).
#[allow(clippy::too_many_arguments)]
pub(crate) async fn activate_and_start_watch(
    lifetime: CancellationToken,
    api_path: String,
    listening_ino: u64,
    activator_pid: Pid,
    engine_name: String,
    finder: Arc<dyn ActivatedEngineFinder>,
    sink: Arc<dyn ActivationSink>,
    maxwait: Duration,
) {
    // Buffered synchronization: the time-boxed wait below may well have moved
    // on by the time the protocol task reports in.
    let (synched_tx, synched_rx) = oneshot::channel::<()>();
    let started = Instant::now();
    let api = api_path.clone();
    tokio::spawn(async move {
        match attach(
            &lifetime,
            &api,
            listening_ino,
            activator_pid,
            &engine_name,
            finder,
            maxwait,
        )
        .await
        {
            Err(err) => {
                error!(api = %api, error = %err, "container engine activation failed");
                sink.outcome(Err(err)).await;
                let _ = synched_tx.send(());
            }
            Ok((watcher, pid)) => {
                info!(
                    engine = %engine_name,
                    api = %api,
                    pid = pid,
                    "activated container engine"
                );
                // Register first, so the engine record supervises the watch
                // before anyone waits on synchronization.
                sink.outcome(Ok((watcher.clone(), pid))).await;
                let remaining = maxwait.saturating_sub(started.elapsed());
                start_watch(&watcher, remaining).await;
                let _ = synched_tx.send(());
            }
        }
    });

    tokio::select! {
        _ = synched_rx => {}
        _ = sleep(maxwait) => {
            warn!(api = %api_path, "engine endpoint still in activation ... continuing in background");
        }
    }
}

/// Dials the endpoint to trigger activation, locates the serving process, and
/// creates the watcher. The dialled connection is held open until the watcher
/// exists, keeping the freshly activated engine interested.
async fn attach(
    lifetime: &CancellationToken,
    api: &str,
    listening_ino: u64,
    activator_pid: Pid,
    engine_name: &str,
    finder: Arc<dyn ActivatedEngineFinder>,
    maxwait: Duration,
) -> Result<(Arc<dyn Watcher>, Pid), Error> {
    info!(engine = %engine_name, api = %api, "activating container engine");
    let _conn = tokio::select! {
        _ = lifetime.cancelled() => {
            return Err(Error::Activation {
                api: api.to_owned(),
                reason: "cancelled".to_owned(),
            });
        }
        dialled = timeout(maxwait, UnixStream::connect(api)) => match dialled {
            Err(_) => {
                return Err(Error::Activation {
                    api: api.to_owned(),
                    reason: "connect deadline exceeded".to_owned(),
                });
            }
            Ok(Err(err)) => {
                return Err(Error::Activation {
                    api: api.to_owned(),
                    reason: err.to_string(),
                });
            }
            Ok(Ok(conn)) => conn,
        }
    };

    // The newly activated engine process needs a moment to appear; poll for
    // it, honouring cancellation.
    let mut pid = None;
    for attempt in 1..=FIND_ATTEMPTS {
        pid = find_daemon(activator_pid, engine_name, listening_ino);
        if pid.is_some() || attempt == FIND_ATTEMPTS {
            break;
        }
        tokio::select! {
            _ = sleep(FIND_POLLING) => {
                info!(
                    engine = %engine_name,
                    api = %api,
                    "retrying to find activated container engine process"
                );
            }
            _ = lifetime.cancelled() => break,
        }
    }
    let Some(pid) = pid else {
        return Err(Error::DaemonNotFound {
            name: engine_name.to_owned(),
            api: api.to_owned(),
        });
    };

    let watcher = finder
        .new_watcher(lifetime.clone(), pid, api)
        .await
        .ok_or_else(|| Error::WatcherFactory {
            api: api.to_owned(),
        })?;
    Ok((watcher, pid))
}
