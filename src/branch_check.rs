//! C4: after compression, proves the target stays reachable for every
//! possible combination of condition values (and, for the tests-only case, a
//! single traversal with no combination at all).
//!
//! The Cartesian product of each condition id's distinct branch values is
//! walked as an odometer, least-significant digit first, bounded by a
//! wall-clock budget. This is exactly where the core exposes a cancellation
//! point (see [`crate::net`] for why nothing else needs one).

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::time::Duration;

use cancel_this::{is_cancelled, Cancellable};
use log::{debug, warn};

use crate::error::UnreachableBranch;
use crate::net::{ArcId, LearningNet, NodeId, NodeKind, ELSE, MAX_GRADE};
use crate::CoreError;

/// Default wall-clock budget for the combination sweep.
pub const DEFAULT_TIME_BUDGET: Duration = Duration::from_secs(600);

/// Enumerates every condition-value combination and verifies the target is
/// reachable in each. If the net has Tests but no Conditions, runs the
/// single empty-combination traversal the tests-only case needs.
pub fn check_branches(net: &mut LearningNet, time_budget: Duration) -> Result<(), CoreError> {
    let condition_values = collect_condition_branch_values(net);

    if condition_values.is_empty() {
        return if reaches_target(net, &HashMap::new()) {
            Ok(())
        } else {
            Err(CoreError::TargetUnreachable(Vec::new()))
        };
    }

    debug!(
        "branch check: enumerating {} combinations",
        condition_values.values().map(Vec::len).product::<usize>()
    );

    match cancel_this::on_timeout(time_budget, || sweep(net, &condition_values)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(branches)) => Err(CoreError::TargetUnreachable(branches)),
        Err(_cancelled) => {
            warn!("branch check exceeded its time budget of {time_budget:?}");
            Err(CoreError::Timeout)
        }
    }
}

fn sweep(
    net: &mut LearningNet,
    condition_values: &BTreeMap<i64, Vec<String>>,
) -> Cancellable<Result<(), Vec<UnreachableBranch>>> {
    let mut failures = Vec::new();
    for combo in Odometer::new(condition_values) {
        is_cancelled!()?;
        if !reaches_target(net, &combo) {
            for (&condition_id, branch) in &combo {
                failures.push(UnreachableBranch::Condition {
                    condition_id,
                    branch: branch.clone(),
                });
            }
        }
    }
    Ok(if failures.is_empty() {
        Ok(())
    } else {
        Err(failures)
    })
}

fn collect_condition_branch_values(net: &LearningNet) -> BTreeMap<i64, Vec<String>> {
    let mut map: BTreeMap<i64, BTreeSet<String>> = BTreeMap::new();
    for v in net.nodes() {
        if net.kind(v) != NodeKind::Condition {
            continue;
        }
        let id = net.condition_id(v);
        let entry = map.entry(id).or_default();
        for &a in net.out_arcs(v) {
            if let Some(label) = net.branch_label(a) {
                entry.insert(label.to_string());
            }
        }
        entry.insert(ELSE.to_string());
    }
    map.into_iter().map(|(id, set)| (id, set.into_iter().collect())).collect()
}

/// Cartesian product of every condition id's candidate values, advanced
/// least-significant digit first (the first id cycles fastest).
struct Odometer<'a> {
    ids: Vec<i64>,
    values: &'a BTreeMap<i64, Vec<String>>,
    counters: Vec<usize>,
    done: bool,
}

impl<'a> Odometer<'a> {
    fn new(values: &'a BTreeMap<i64, Vec<String>>) -> Self {
        let ids: Vec<i64> = values.keys().copied().collect();
        let done = ids.iter().any(|id| values[id].is_empty());
        let counters = vec![0; ids.len()];
        Odometer {
            ids,
            values,
            counters,
            done,
        }
    }
}

impl Iterator for Odometer<'_> {
    type Item = HashMap<i64, String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let combo = self
            .ids
            .iter()
            .zip(&self.counters)
            .map(|(&id, &digit)| (id, self.values[&id][digit].clone()))
            .collect();

        let mut wheel = 0;
        loop {
            if wheel >= self.counters.len() {
                self.done = true;
                break;
            }
            self.counters[wheel] += 1;
            if self.counters[wheel] < self.values[&self.ids[wheel]].len() {
                break;
            }
            self.counters[wheel] = 0;
            wheel += 1;
        }

        Some(combo)
    }
}

/// The branch-aware topological traversal shared (in spirit) with the
/// active-set frontier in [`crate::recommend`]: pop LIFO except Conditions
/// go to the FIFO front, follow the combination's chosen branch at a
/// Condition, every `MAX_GRADE` arc at a Test, and all arcs everywhere else.
/// Returns `true` the moment the target is popped.
pub(crate) fn reaches_target(net: &mut LearningNet, combo: &HashMap<i64, String>) -> bool {
    for v in net.nodes().collect::<Vec<_>>() {
        if net.kind(v).is_join() {
            net.reset_activated_in_arcs(v);
        }
    }

    let mut frontier: VecDeque<NodeId> = net.nodes().filter(|&v| net.in_degree(v) == 0).collect();
    let mut visited: HashSet<NodeId> = HashSet::new();

    while let Some(v) = frontier.pop_back() {
        if !visited.insert(v) {
            continue;
        }
        if net.is_target(v) {
            return true;
        }

        for a in arcs_to_follow(net, v, combo) {
            enqueue_frontier(net, &mut frontier, net.arc_target(a));
        }
    }

    false
}

fn arcs_to_follow(net: &LearningNet, v: NodeId, combo: &HashMap<i64, String>) -> Vec<ArcId> {
    match net.kind(v) {
        NodeKind::Condition => {
            let id = net.condition_id(v);
            let wanted = combo.get(&id).map(String::as_str).unwrap_or(ELSE);
            let chosen = net
                .out_arcs(v)
                .iter()
                .copied()
                .find(|&a| net.branch_label(a) == Some(wanted))
                .or_else(|| {
                    net.out_arcs(v)
                        .iter()
                        .copied()
                        .find(|&a| net.branch_label(a) == Some(ELSE))
                });
            chosen.into_iter().collect()
        }
        NodeKind::Test => net
            .out_arcs(v)
            .iter()
            .copied()
            .filter(|&a| net.branch_label(a) == Some(MAX_GRADE))
            .collect(),
        _ => net.out_arcs(v).to_vec(),
    }
}

/// Shared frontier discipline for both the combination sweep here and the
/// active-set traversal in [`crate::recommend`]: a Join only becomes ready
/// once its `necessary_in_arcs` is met, and a Condition jumps the FIFO
/// front so branching work is deferred behind whatever else is pending.
pub(crate) fn enqueue_frontier(net: &mut LearningNet, frontier: &mut VecDeque<NodeId>, w: NodeId) {
    if net.kind(w).is_join() {
        net.increment_activated_in_arcs(w);
        if net.activated_in_arcs(w) == net.necessary_in_arcs(w) as u32 {
            frontier.push_back(w);
        }
    } else if net.kind(w) == NodeKind::Condition {
        frontier.push_front(w);
    } else {
        frontier.push_back(w);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::LearningNet;

    #[test]
    fn both_branches_reach_target() {
        let mut net = LearningNet::new();
        let c = net.add_node(NodeKind::Condition, 0);
        let u1 = net.add_node(NodeKind::UnitInactive, 1);
        let u2 = net.add_node(NodeKind::UnitInactive, 2);
        let join = net.add_node(NodeKind::Join, 1);
        net.add_arc(c, u1, Some("a".to_string()));
        net.add_arc(c, u2, Some(ELSE.to_string()));
        net.add_arc(u1, join, None);
        net.add_arc(u2, join, None);
        net.set_target(join);

        assert!(check_branches(&mut net, Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn a_missing_branch_is_reported() {
        let mut net = LearningNet::new();
        let c = net.add_node(NodeKind::Condition, 7);
        let u1 = net.add_node(NodeKind::UnitInactive, 1);
        let u2 = net.add_node(NodeKind::UnitInactive, 2);
        net.add_arc(c, u1, Some("a".to_string()));
        net.add_arc(c, u2, Some(ELSE.to_string()));
        net.set_target(u1);

        match check_branches(&mut net, Duration::from_secs(1)) {
            Err(CoreError::TargetUnreachable(branches)) => {
                assert!(branches.contains(&UnreachableBranch::Condition {
                    condition_id: 7,
                    branch: ELSE.to_string(),
                }));
            }
            other => panic!("expected TargetUnreachable, got {other:?}"),
        }
    }

    #[test]
    fn test_grade_branches_pick_the_max_grade_arc() {
        let mut net = LearningNet::new();
        let t = net.add_node(NodeKind::Test, 0);
        let u1 = net.add_node(NodeKind::UnitInactive, 1);
        let u2 = net.add_node(NodeKind::UnitInactive, 2);
        net.add_arc(t, u1, Some("10".to_string()));
        net.add_arc(t, u2, Some("5".to_string()));
        net.set_target(u1);

        crate::compress::compress(&mut net).unwrap();
        assert!(check_branches(&mut net, Duration::from_secs(1)).is_ok());
    }
}
