// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Fills in the engine hierarchy after aggregation: containers of an engine
//! that itself runs inside another engine's container get labelled with the
//! name of that enclosing container.
//!
//! This supports engines nested to arbitrary depth (Docker inside containerd,
//! podman inside Docker, KinD): prefixes compose along the enclosing chain,
//! outermost first, joined with '/'.

use std::collections::HashMap;

use crate::model::{Container, Pid, PidMapper, ProcessTable};

/// Label put onto every container of a nested engine, valued with the
/// composed name prefix of the enclosing container(s).
pub const TURTLEFINDER_CONTAINER_PREFIX_LABEL: &str = "turtlefinder/container/prefix";

/// Upper bound on process-tree ancestor walks, guarding against cycles in a
/// corrupt process table.
const MAX_ANCESTRY: usize = 128;

/// One engine as seen through the descriptors referenced by the aggregated
/// containers, with the containers belonging to it.
struct EngineGroup {
    pid: Pid,
    ppid_hint: Option<Pid>,
    containers: Vec<usize>,
}

/// Annotates the containers of nested engines with the
/// [`TURTLEFINDER_CONTAINER_PREFIX_LABEL`] label.
///
/// An engine is nested when its process, or the process named by its parent
/// hint, descends from the initial process of one of the aggregated
/// containers. Container PIDs are engine-reported and thus relative to their
/// engine's PID namespace; the supplied mapper translates them into the
/// initial namespace before any process-tree matching.
pub(crate) fn stack_engines(
    containers: &mut [Container],
    procs: &ProcessTable,
    pidmap: &dyn PidMapper,
) {
    // Group containers by their engine descriptor, in first-seen order so the
    // outcome is deterministic given the aggregated container list.
    let mut groups: Vec<EngineGroup> = Vec::new();
    let mut group_by_engine: HashMap<usize, usize> = HashMap::new();
    for (idx, container) in containers.iter().enumerate() {
        let key = std::sync::Arc::as_ptr(&container.engine) as usize;
        let gidx = *group_by_engine.entry(key).or_insert_with(|| {
            groups.push(EngineGroup {
                pid: container.engine.pid,
                ppid_hint: container.engine.ppid_hint,
                containers: Vec::new(),
            });
            groups.len() - 1
        });
        if let Some(group) = groups.get_mut(gidx) {
            group.containers.push(idx);
        }
    }

    // Initial-namespace PID of each container's initial process, mapping to
    // the owning group and the container name. First container wins on the
    // (pathological) tie of two containers claiming the same process.
    let mut container_by_pid: HashMap<Pid, (usize, String)> = HashMap::new();
    for (gidx, group) in groups.iter().enumerate() {
        let observer = observer_pid(group, procs);
        for &idx in &group.containers {
            let Some(container) = containers.get(idx) else {
                continue;
            };
            if container.pid == 0 {
                continue;
            }
            let Some(observer) = observer else {
                continue;
            };
            let Some(initpid) = pidmap.translate(container.pid, observer) else {
                continue;
            };
            container_by_pid
                .entry(initpid)
                .or_insert_with(|| (gidx, container.name.clone()));
        }
    }

    // For each engine, the innermost container enclosing its process.
    let enclosing: Vec<Option<(usize, String)>> = groups
        .iter()
        .enumerate()
        .map(|(gidx, group)| find_enclosing(gidx, group, procs, &container_by_pid))
        .collect();

    // Compose prefixes along the enclosing chain, outermost first.
    let mut prefixes: Vec<Option<String>> = vec![None; groups.len()];
    for gidx in 0..groups.len() {
        compose_prefix(gidx, &enclosing, &mut prefixes, 0);
    }

    for (gidx, group) in groups.iter().enumerate() {
        let Some(Some(prefix)) = prefixes.get(gidx) else {
            continue;
        };
        for &idx in &group.containers {
            if let Some(container) = containers.get_mut(idx) {
                container
                    .labels
                    .insert(TURTLEFINDER_CONTAINER_PREFIX_LABEL.to_owned(), prefix.clone());
            }
        }
    }
}

/// The engine process PID to anchor ancestry walks and PID translation at:
/// the engine process itself when the process table still lists it, else the
/// parent-process hint. Socket-activated engines regularly miss the table, as
/// they spring to life only after the table was taken.
fn observer_pid(group: &EngineGroup, procs: &ProcessTable) -> Option<Pid> {
    if procs.contains_key(&group.pid) {
        return Some(group.pid);
    }
    group.ppid_hint.filter(|hint| procs.contains_key(hint))
}

fn find_enclosing(
    gidx: usize,
    group: &EngineGroup,
    procs: &ProcessTable,
    container_by_pid: &HashMap<Pid, (usize, String)>,
) -> Option<(usize, String)> {
    let mut cur = observer_pid(group, procs)?;
    for _ in 0..MAX_ANCESTRY {
        if let Some((encl_gidx, name)) = container_by_pid.get(&cur)
            && *encl_gidx != gidx
        {
            return Some((*encl_gidx, name.clone()));
        }
        let proc = procs.get(&cur)?;
        if proc.ppid <= 0 {
            return None;
        }
        cur = proc.ppid;
    }
    None
}

fn compose_prefix(
    gidx: usize,
    enclosing: &[Option<(usize, String)>],
    prefixes: &mut [Option<String>],
    depth: usize,
) -> Option<String> {
    if depth > MAX_ANCESTRY {
        return None;
    }
    if let Some(Some(prefix)) = prefixes.get(gidx) {
        return Some(prefix.clone());
    }
    let (encl_gidx, name) = match enclosing.get(gidx) {
        Some(Some(enclosing)) => enclosing.clone(),
        _ => return None,
    };
    let prefix = match compose_prefix(encl_gidx, enclosing, prefixes, depth + 1) {
        Some(outer) => format!("{outer}/{name}"),
        None => name,
    };
    if let Some(slot) = prefixes.get_mut(gidx) {
        *slot = Some(prefix.clone());
    }
    Some(prefix)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::{Container, ContainerEngine, IdentityPidMapper, Labels, Process};

    fn process(pid: Pid, ppid: Pid, name: &str) -> (Pid, Process) {
        (
            pid,
            Process {
                pid,
                ppid,
                name: name.into(),
            },
        )
    }

    fn engine(pid: Pid, ppid_hint: Option<Pid>, engine_type: &str) -> Arc<ContainerEngine> {
        Arc::new(ContainerEngine {
            id: format!("engine-{pid}"),
            engine_type: engine_type.into(),
            version: "1.0".into(),
            api: format!("unix:///proc/{pid}/root/run/api.sock"),
            pid,
            ppid_hint,
        })
    }

    fn container(name: &str, pid: Pid, engine: &Arc<ContainerEngine>) -> Container {
        Container {
            id: format!("id-{name}"),
            name: name.into(),
            container_type: engine.engine_type.clone(),
            flavor: engine.engine_type.clone(),
            pid,
            paused: false,
            labels: Labels::new(),
            engine: engine.clone(),
        }
    }

    #[test]
    fn labels_containers_of_a_nested_engine() {
        // PID 100: outer docker daemon; PID 200: initial process of the
        // "kindisch-x" container; PID 210: containerd inside that container.
        let procs: ProcessTable = [
            process(1, 0, "systemd"),
            process(100, 1, "dockerd"),
            process(200, 100, "entrypoint.sh"),
            process(210, 200, "containerd"),
        ]
        .into_iter()
        .collect();

        let outer = engine(100, None, "docker.com");
        let nested = engine(210, None, "containerd.io");
        let mut containers = vec![
            container("kindisch-x", 200, &outer),
            container("testing/canary", 4711, &nested),
        ];

        stack_engines(&mut containers, &procs, &IdentityPidMapper);

        assert!(!containers[0]
            .labels
            .contains_key(TURTLEFINDER_CONTAINER_PREFIX_LABEL));
        assert_eq!(
            containers[1]
                .labels
                .get(TURTLEFINDER_CONTAINER_PREFIX_LABEL)
                .map(String::as_str),
            Some("kindisch-x")
        );
    }

    #[test]
    fn composes_prefixes_over_multiple_nesting_levels() {
        let procs: ProcessTable = [
            process(1, 0, "systemd"),
            process(100, 1, "dockerd"),
            process(200, 100, "entrypoint.sh"),
            process(210, 200, "containerd"),
            process(300, 210, "pause"),
            process(310, 300, "dockerd"),
        ]
        .into_iter()
        .collect();

        let outer = engine(100, None, "docker.com");
        let middle = engine(210, None, "containerd.io");
        let inner = engine(310, None, "docker.com");
        let mut containers = vec![
            container("outer-box", 200, &outer),
            container("middle-box", 300, &middle),
            container("leafling", 4711, &inner),
        ];

        stack_engines(&mut containers, &procs, &IdentityPidMapper);

        assert_eq!(
            containers[1]
                .labels
                .get(TURTLEFINDER_CONTAINER_PREFIX_LABEL)
                .map(String::as_str),
            Some("outer-box")
        );
        assert_eq!(
            containers[2]
                .labels
                .get(TURTLEFINDER_CONTAINER_PREFIX_LABEL)
                .map(String::as_str),
            Some("outer-box/middle-box")
        );
    }

    #[test]
    fn uses_the_parent_hint_when_the_engine_process_is_unknown() {
        // The activated engine with PID 250 is not in the process table, but
        // its activator (PID 205, inside the container) is.
        let procs: ProcessTable = [
            process(1, 0, "systemd"),
            process(100, 1, "dockerd"),
            process(200, 100, "systemd"),
            process(205, 200, "systemd"),
        ]
        .into_iter()
        .collect();

        let outer = engine(100, None, "docker.com");
        let activated = engine(250, Some(205), "podman.io");
        let mut containers = vec![
            container("outer-box", 200, &outer),
            container("poddy", 4711, &activated),
        ];

        stack_engines(&mut containers, &procs, &IdentityPidMapper);

        assert_eq!(
            containers[1]
                .labels
                .get(TURTLEFINDER_CONTAINER_PREFIX_LABEL)
                .map(String::as_str),
            Some("outer-box")
        );
    }

    #[test]
    fn top_level_engines_stay_unlabelled() {
        let procs: ProcessTable = [process(1, 0, "systemd"), process(100, 1, "dockerd")]
            .into_iter()
            .collect();
        let outer = engine(100, None, "docker.com");
        let mut containers = vec![container("lonely", 4711, &outer)];

        stack_engines(&mut containers, &procs, &IdentityPidMapper);

        assert!(containers[0].labels.is_empty());
    }
}
