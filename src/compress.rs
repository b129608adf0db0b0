//! C3: a single linear-time pass that shrinks a net while preserving exactly
//! the (condition-value, test-grade) assignments under which the target is
//! reachable.
//!
//! Two phases: [`peel`] removes non-branching prefixes and fully-satisfied
//! joins from the in-degree-0 frontier inward, stopping early whenever the
//! target itself becomes a source. What's left — Condition/Test nodes that
//! still genuinely branch, plus anything blocked behind them — feeds the
//! main loop, which walks outward from those nodes applying four local
//! contraction rules.

use std::collections::{HashSet, VecDeque};

use log::{debug, trace};

use crate::error::UnreachableBranch;
use crate::net::{ArcId, LearningNet, NodeId, NodeKind, MAX_GRADE};
use crate::CoreError;

/// What compression concluded about the net as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionOutcome {
    /// The target is reachable unconditionally; no Condition/Test remains
    /// that could make it otherwise. C4 need not run.
    TargetReachable,
    /// The net was shrunk but still branches; hand it to the branch-combination
    /// checker.
    Continue,
}

/// Compresses `net` in place.
///
/// Returns `Err(CoreError::TargetUnreachable(..))` the moment a Condition or
/// Test branch is proven to have no path to the target (a dead end, or a
/// contraction that cannot carry the target property across it).
pub fn compress(net: &mut LearningNet) -> Result<CompressionOutcome, CoreError> {
    normalize_test_grades(net);

    let sources = match peel(net) {
        PeelOutcome::TargetReachable => {
            debug!("compression: target reached during preprocessing");
            return Ok(CompressionOutcome::TargetReachable);
        }
        PeelOutcome::Deferred(sources) => sources,
    };

    let mut unreachable = Vec::new();
    main_loop(net, sources, &mut unreachable);

    if !unreachable.is_empty() {
        return Err(CoreError::TargetUnreachable(unreachable));
    }

    if crate::validate::has_conditions_or_tests(net) {
        Ok(CompressionOutcome::Continue)
    } else {
        Ok(CompressionOutcome::TargetReachable)
    }
}

/// Relabels each Test's out-arcs to a binary `{0, MAX_GRADE}` distinction:
/// the numerically highest label becomes `MAX_GRADE`, everything else `0`.
fn normalize_test_grades(net: &mut LearningNet) {
    let tests: Vec<NodeId> = net
        .nodes()
        .filter(|&v| net.kind(v) == NodeKind::Test)
        .collect();

    for t in tests {
        let arcs: Vec<ArcId> = net.out_arcs(t).to_vec();
        let max_grade = arcs
            .iter()
            .filter_map(|&a| net.branch_label(a).and_then(|label| label.parse::<i64>().ok()))
            .max();
        let Some(max_grade) = max_grade else {
            continue;
        };
        for a in arcs {
            let is_max = net
                .branch_label(a)
                .and_then(|label| label.parse::<i64>().ok())
                .is_some_and(|grade| grade == max_grade);
            net.set_branch_label(
                a,
                Some(if is_max { MAX_GRADE.to_string() } else { "0".to_string() }),
            );
        }
    }
}

enum PeelOutcome {
    TargetReachable,
    Deferred(VecDeque<NodeId>),
}

/// Topological peel from the in-degree-0 frontier. A Join is pushed onto the
/// frontier once its `necessary_in_arcs` reaches zero, regardless of any
/// remaining (redundant) in-arcs — the rest are dropped with the join itself
/// once it is erased.
fn peel(net: &mut LearningNet) -> PeelOutcome {
    let mut remaining_in: std::collections::HashMap<NodeId, i64> =
        net.nodes().map(|v| (v, net.in_degree(v) as i64)).collect();
    let mut queue: VecDeque<NodeId> = net.nodes().filter(|&v| net.in_degree(v) == 0).collect();
    let mut deferred = VecDeque::new();
    let mut settled: HashSet<NodeId> = HashSet::new();

    while let Some(v) = queue.pop_front() {
        if settled.contains(&v) {
            continue;
        }
        if net.is_target(v) {
            return PeelOutcome::TargetReachable;
        }
        if matches!(net.kind(v), NodeKind::Condition | NodeKind::Test) && net.out_degree(v) >= 2 {
            trace!("peel: deferring branching node {v}");
            settled.insert(v);
            deferred.push_back(v);
            continue;
        }

        let successors: Vec<NodeId> = net.successors(v).collect();
        for w in successors {
            if settled.contains(&w) {
                continue;
            }
            if net.kind(w).is_join() {
                let necessary = (net.necessary_in_arcs(w) - 1).max(0);
                net.set_necessary_in_arcs(w, necessary);
                if necessary == 0 {
                    queue.push_back(w);
                }
            } else if let Some(deg) = remaining_in.get_mut(&w) {
                *deg -= 1;
                if *deg <= 0 {
                    queue.push_back(w);
                }
            }
        }

        settled.insert(v);
        net.remove_node(v);
    }

    PeelOutcome::Deferred(deferred)
}

/// Main contraction loop, seeded by the branching nodes deferred out of
/// [`peel`]. Each popped source pushes its immediate successors onto a local
/// stack and tries to absorb them one arc at a time; a successful
/// contraction exposes the absorbed node's own successors, which are pushed
/// back onto the same stack.
fn main_loop(net: &mut LearningNet, mut sources: VecDeque<NodeId>, unreachable: &mut Vec<UnreachableBranch>) {
    let mut queued: HashSet<NodeId> = sources.iter().copied().collect();

    while let Some(v) = sources.pop_front() {
        queued.remove(&v);
        if !net.contains_node(v) || net.is_target(v) {
            continue;
        }

        let mut succs: Vec<NodeId> = net.successors(v).collect();
        while let Some(w) = succs.pop() {
            if !net.contains_node(w) {
                continue;
            }
            let Some(arc) = find_arc(net, v, w) else {
                continue;
            };

            if net.out_degree(w) == 0 && !net.is_target(w) {
                if matches!(net.kind(v), NodeKind::Condition | NodeKind::Test) {
                    unreachable.push(unreachable_branch(net, v, arc));
                }
                net.remove_node(w);
                continue;
            }

            if try_contract_single(net, v, w, arc) {
                succs.extend(net.successors(v));
                maybe_degrade_to_split(net, v);
                continue;
            }
            if try_contract_split_chain(net, v, w, arc) {
                succs.extend(net.successors(v));
                continue;
            }
            if try_contract_join_join(net, v, w, arc) {
                succs.extend(net.successors(v));
                continue;
            }
            if let Some(next) = try_contract_double(net, v, w) {
                if let Some(n) = next {
                    if queued.insert(n) {
                        sources.push_back(n);
                    }
                }
                break;
            }

            if queued.insert(w) {
                sources.push_back(w);
            }
        }
    }
}

fn find_arc(net: &LearningNet, v: NodeId, w: NodeId) -> Option<ArcId> {
    net.out_arcs(v).iter().copied().find(|&a| net.arc_target(a) == w)
}

fn unreachable_branch(net: &LearningNet, v: NodeId, arc: ArcId) -> UnreachableBranch {
    match net.kind(v) {
        NodeKind::Condition => UnreachableBranch::Condition {
            condition_id: net.condition_id(v),
            branch: net.branch_label(arc).unwrap_or(crate::net::ELSE).to_string(),
        },
        NodeKind::Test => UnreachableBranch::Test {
            test_id: net.test_id(v),
        },
        _ => unreachable!("unreachable_branch called on a non-branching node"),
    }
}

/// Whether the target property can move across the arc `v -> w` (so that
/// contracting `w` into `v`, or otherwise folding `w` away, still leaves the
/// target reachable through `v`).
fn target_transferable(net: &LearningNet, v: NodeId, arc: ArcId) -> bool {
    let not_test_and_only_successor =
        net.kind(v) != NodeKind::Test && net.out_degree(v) == 1;
    let is_split = net.kind(v) == NodeKind::Split;
    let test_max_grade =
        net.kind(v) == NodeKind::Test && net.branch_label(arc) == Some(MAX_GRADE);
    not_test_and_only_successor || is_split || test_max_grade
}

/// Contracts `w` into `v` across the arc `via`. If `v` is a Condition or
/// Test, `via`'s branch label is copied onto every arc `w` was about to hand
/// over to `v`, so the branch this subtree belongs to isn't lost once `w`'s
/// own (unrelated) arc labels take its place.
fn contract_into(net: &mut LearningNet, v: NodeId, w: NodeId, via: ArcId) {
    let inherited_branch = if matches!(net.kind(v), NodeKind::Condition | NodeKind::Test) {
        net.branch_label(via).map(str::to_string)
    } else {
        None
    };
    let reattached_arcs: Vec<ArcId> = net.out_arcs(w).to_vec();

    if net.is_target(w) {
        net.set_target(v);
    }
    net.contract(v, w);

    if let Some(branch) = inherited_branch {
        for a in reattached_arcs {
            net.set_branch_label(a, Some(branch.clone()));
        }
    }
}

/// Rule C-single: `w` has exactly one predecessor (`v`) and at most one
/// successor, and (unless it is a Test whose remaining out-arcs are all
/// `MAX_GRADE`) doesn't itself branch. If `w` is the target, the merge only
/// goes ahead when the target property can actually transfer onto `v`.
fn try_contract_single(net: &mut LearningNet, v: NodeId, w: NodeId, arc: ArcId) -> bool {
    if net.in_degree(w) != 1 || net.out_degree(w) > 1 {
        return false;
    }
    if net.kind(w) == NodeKind::Test
        && !net
            .out_arcs(w)
            .iter()
            .all(|&a| net.branch_label(a) == Some(MAX_GRADE))
    {
        return false;
    }
    if net.is_target(w) && !target_transferable(net, v, arc) {
        return false;
    }
    contract_into(net, v, w, arc);
    true
}

/// Rule C-split-chain: two adjacent Splits always merge.
fn try_contract_split_chain(net: &mut LearningNet, v: NodeId, w: NodeId, arc: ArcId) -> bool {
    if net.kind(v) != NodeKind::Split || net.kind(w) != NodeKind::Split {
        return false;
    }
    contract_into(net, v, w, arc);
    true
}

/// Rule C-join-join: two adjacent Joins merge when both only need one
/// predecessor, or both need all of theirs.
fn try_contract_join_join(net: &mut LearningNet, v: NodeId, w: NodeId, arc: ArcId) -> bool {
    if !(net.kind(v).is_join() && net.kind(w).is_join()) {
        return false;
    }
    let necessary_v = net.necessary_in_arcs(v);
    let necessary_w = net.necessary_in_arcs(w);
    let both_single = necessary_v == 1 && necessary_w == 1;
    let both_universal =
        necessary_v == net.in_degree(v) as i64 && necessary_w == net.in_degree(w) as i64;
    if !(both_single || both_universal) {
        return false;
    }
    contract_into(net, v, w, arc);
    net.set_necessary_in_arcs(v, necessary_v + necessary_w - 1);
    true
}

/// Rule C-double: `v` (split-like) has `w` (a Join) as its only successor,
/// `v` is `w`'s only predecessor, and `v`'s branching structure guarantees
/// enough of `w`'s required arcs fire together. Both nodes are removed and
/// `v`'s predecessor is reconnected directly to `w`'s successor.
///
/// Returns `None` if the rule does not apply. Returns `Some(next)` if it
/// applied, where `next` is whichever of the reconnected endpoints should be
/// revisited as a new source (if any).
fn try_contract_double(net: &mut LearningNet, v: NodeId, w: NodeId) -> Option<Option<NodeId>> {
    if !net.kind(v).is_split_like() || !net.kind(w).is_join() {
        return None;
    }
    if net.in_arcs(w).iter().any(|&a| net.arc_source(a) != v) {
        return None;
    }
    if net.successors(v).any(|s| s != w) {
        return None;
    }

    let necessary_w = net.necessary_in_arcs(w);
    let predicate_holds = match net.kind(v) {
        NodeKind::Split => true,
        NodeKind::Condition => necessary_w <= 1,
        NodeKind::Test => {
            let max_grade_arcs = net
                .out_arcs(v)
                .iter()
                .filter(|&&a| net.branch_label(a) == Some(MAX_GRADE))
                .count() as i64;
            max_grade_arcs >= necessary_w
        }
        _ => false,
    };
    if !predicate_holds {
        return None;
    }

    let predecessor_arc = net.in_arcs(v).first().copied();
    let predecessor = predecessor_arc.map(|a| net.arc_source(a));
    let predecessor_branch = predecessor_arc.and_then(|a| net.branch_label(a).map(str::to_string));
    let successor = if net.out_degree(w) == 1 {
        net.successors(w).next()
    } else {
        None
    };

    if net.is_target(v) || net.is_target(w) {
        let transferable = match (predecessor, predecessor_arc) {
            (Some(_), Some(arc)) => target_transferable(net, predecessor.unwrap(), arc),
            (None, _) => successor.is_some(),
        };
        if !transferable {
            return None;
        }
        if let Some(p) = predecessor {
            net.set_target(p);
        } else if let Some(s) = successor {
            net.set_target(s);
        }
    }

    if let (Some(p), Some(s)) = (predecessor, successor) {
        net.add_arc(p, s, predecessor_branch);
    }

    net.remove_node(w);
    net.remove_node(v);

    Some(predecessor.or(successor))
}

/// A Condition that has lost branches through contraction degrades to a
/// Split once it no longer actually discriminates: at most one out-arc left,
/// or every remaining out-arc leads to the same node.
fn maybe_degrade_to_split(net: &mut LearningNet, v: NodeId) {
    if net.kind(v) != NodeKind::Condition {
        return;
    }
    let successors: Vec<NodeId> = net.successors(v).collect();
    let uniform = successors.windows(2).all(|pair| pair[0] == pair[1]);
    if net.out_degree(v) <= 1 || uniform {
        for a in net.out_arcs(v).to_vec() {
            net.set_branch_label(a, None);
        }
        net.set_kind(v, NodeKind::Split);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::LearningNet;

    #[test]
    fn trivial_chain_reports_target_reachable() {
        let mut net = LearningNet::create_from_sections(&[1, 2, 3]);
        assert_eq!(compress(&mut net), Ok(CompressionOutcome::TargetReachable));
    }

    #[test]
    fn split_join_collapses_to_target_reachable() {
        let mut net = LearningNet::new();
        let split = net.add_node(NodeKind::Split, 0);
        let u1 = net.add_node(NodeKind::UnitInactive, 1);
        let u2 = net.add_node(NodeKind::UnitInactive, 2);
        let join = net.add_node(NodeKind::Join, 2);
        let target = net.add_node(NodeKind::UnitInactive, 3);
        net.add_arc(split, u1, None);
        net.add_arc(split, u2, None);
        net.add_arc(u1, join, None);
        net.add_arc(u2, join, None);
        net.add_arc(join, target, None);
        net.set_target(target);

        assert_eq!(compress(&mut net), Ok(CompressionOutcome::TargetReachable));
    }

    #[test]
    fn dead_end_else_branch_is_unreachable() {
        let mut net = LearningNet::new();
        let condition = net.add_node(NodeKind::Condition, 0);
        let u1 = net.add_node(NodeKind::UnitInactive, 1);
        let u2 = net.add_node(NodeKind::UnitInactive, 2);
        net.add_arc(condition, u1, Some("a".to_string()));
        net.add_arc(condition, u2, Some(crate::net::ELSE.to_string()));
        net.set_target(u1);

        let result = compress(&mut net);
        match result {
            Err(CoreError::TargetUnreachable(branches)) => {
                assert_eq!(
                    branches,
                    vec![UnreachableBranch::Condition {
                        condition_id: 0,
                        branch: crate::net::ELSE.to_string(),
                    }]
                );
            }
            other => panic!("expected TargetUnreachable, got {other:?}"),
        }
    }

    #[test]
    fn both_branches_reaching_target_compresses_clean() {
        let mut net = LearningNet::new();
        let condition = net.add_node(NodeKind::Condition, 0);
        let u1 = net.add_node(NodeKind::UnitInactive, 1);
        let u2 = net.add_node(NodeKind::UnitInactive, 2);
        let join = net.add_node(NodeKind::Join, 1);
        net.add_arc(condition, u1, Some("a".to_string()));
        net.add_arc(condition, u2, Some(crate::net::ELSE.to_string()));
        net.add_arc(u1, join, None);
        net.add_arc(u2, join, None);
        net.set_target(join);

        assert_eq!(compress(&mut net), Ok(CompressionOutcome::TargetReachable));
    }
}
