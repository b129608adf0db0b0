//! C5: the active-set frontier and the cost-driven path/next-unit recommender.
//!
//! The frontier traversal reuses the branch-combination checker's queueing
//! discipline ([`crate::branch_check::enqueue_frontier`]) — a Join only
//! becomes ready once its `necessary_in_arcs` fires, and a Condition jumps
//! the FIFO front — but picks its out-arcs by learner state (accepted
//! condition values, recorded test grades) rather than by an enumerated
//! combination. [`Recommender`] mirrors the constructor-computes-first-actives
//! shape of the original `Recommender` class: actives are found once, then
//! `recNext`/`recPath` are called against that (and subsequent) active sets
//! without ever re-deriving the initial frontier.

use std::collections::{HashMap, VecDeque};

use log::{debug, trace};

use crate::branch_check::enqueue_frontier;
use crate::error::Diagnostics;
use crate::net::{ArcId, LearningNet, NodeId, NodeKind, ELSE};

/// Learner-accepted branch values per condition id. An id missing or mapped
/// to an empty vector is treated as `{ELSE}`.
pub type ConditionValues = HashMap<i64, Vec<String>>;

/// Learner grade per test id. A test id with no recorded grade is treated as
/// "assume the best", i.e. the highest-labeled out-arc is taken.
pub type TestGrades = HashMap<i64, i64>;

/// Per-unit cost, keyed by node, already weighted/combined by the request
/// layer (see spec.md §6's cost-weighting formula).
pub type NodeCosts = HashMap<NodeId, f64>;

/// Per-unit-pair cost, keyed by `(from, to)`, already weighted/combined.
pub type NodePairCosts = HashMap<NodeId, HashMap<NodeId, f64>>;

fn reset_join_counters(net: &mut LearningNet) {
    for v in net.nodes().collect::<Vec<_>>() {
        if net.kind(v).is_join() {
            net.reset_activated_in_arcs(v);
        }
    }
}

/// Branch-aware traversal shared by the constructor and by `recPath`'s
/// re-expansion step: pushes `sources` onto the frontier and walks outward,
/// collecting newly-activated units and the arcs visited along the way.
fn collect_new_actives(
    net: &mut LearningNet,
    sources: Vec<NodeId>,
    conditions: &ConditionValues,
    test_grades: &TestGrades,
    diagnostics: &mut Diagnostics,
) -> (Vec<NodeId>, Vec<ArcId>) {
    let mut frontier: VecDeque<NodeId> = sources.into_iter().collect();
    let mut actives = Vec::new();
    let mut visited_arcs = Vec::new();

    while let Some(v) = frontier.pop_back() {
        match net.kind(v) {
            NodeKind::UnitInactive => {
                trace!("frontier: {v} activated");
                net.set_kind(v, NodeKind::UnitActive);
                actives.push(v);
            }
            NodeKind::UnitActive => {
                diagnostics.append_error(format!(
                    "node {v} was already active on entry, input is inconsistent"
                ));
            }
            _ => {
                for a in arcs_to_explore(net, v, conditions, test_grades) {
                    visited_arcs.push(a);
                    let w = net.arc_target(a);
                    enqueue_frontier(net, &mut frontier, w);
                }
            }
        }
    }

    (actives, visited_arcs)
}

/// Out-arcs to follow from `v` given learner state: a Condition follows
/// every out-arc whose label is one of the learner's accepted values for its
/// condition id (or `ELSE` if the learner supplied none); a Test follows the
/// single out-arc with the greatest numeric label still at or below the
/// learner's recorded grade (or, absent a grade, the greatest label overall);
/// every other node follows all of its out-arcs.
fn arcs_to_explore(
    net: &LearningNet,
    v: NodeId,
    conditions: &ConditionValues,
    test_grades: &TestGrades,
) -> Vec<ArcId> {
    match net.kind(v) {
        NodeKind::Condition => {
            let id = net.condition_id(v);
            let default_else = [ELSE.to_string()];
            let accepted: &[String] = match conditions.get(&id) {
                Some(vals) if !vals.is_empty() => vals.as_slice(),
                _ => &default_else,
            };
            net.out_arcs(v)
                .iter()
                .copied()
                .filter(|&a| {
                    net.branch_label(a)
                        .is_some_and(|label| accepted.iter().any(|v| v == label))
                })
                .collect()
        }
        NodeKind::Test => {
            let id = net.test_id(v);
            let grade = test_grades.get(&id).copied();
            let mut best: Option<(i64, ArcId)> = None;
            for &a in net.out_arcs(v) {
                let Some(label) = net.branch_label(a) else {
                    continue;
                };
                let Ok(value) = label.parse::<i64>() else {
                    continue;
                };
                let within_grade = grade.is_none_or(|g| value <= g);
                if within_grade && best.is_none_or(|(best_value, _)| value > best_value) {
                    best = Some((value, a));
                }
            }
            best.into_iter().map(|(_, a)| a).collect()
        }
        _ => net.out_arcs(v).to_vec(),
    }
}

/// Picks the minimum-cost item from `items`, ties broken by keeping whichever
/// came first in iteration order (a strict `<` comparison never displaces an
/// earlier equal-cost candidate). Items with no recorded cost are skipped.
fn pick_min(items: impl Iterator<Item = NodeId>, mut cost_of: impl FnMut(NodeId) -> Option<f64>) -> Option<NodeId> {
    let mut best: Option<(NodeId, f64)> = None;
    for v in items {
        if let Some(cost) = cost_of(v) {
            if best.is_none_or(|(_, best_cost)| cost < best_cost) {
                best = Some((v, cost));
            }
        }
    }
    best.map(|(v, _)| v)
}

fn node_pair_pick(actives: &[NodeId], costs: &NodePairCosts, prev: Option<NodeId>) -> Option<NodeId> {
    match prev {
        Some(p) => pick_min(actives.iter().copied(), |v| {
            costs.get(&p).and_then(|row| row.get(&v)).copied()
        }),
        None => pick_min(actives.iter().copied(), |v| {
            costs.get(&v).map(|row| row.values().sum())
        }),
    }
}

/// Computes the active set once (on construction) and exposes `recNext`/
/// `recPath` against it, the way the original `Recommender` class's
/// constructor runs `getNewActives()` once and reuses the result.
///
/// `recPath*` methods mutate the net (marking picked units `UnitCompleted`
/// and re-running the frontier from them) but restore the kind of every node
/// to its post-construction snapshot before returning, per spec.md's
/// snapshot/restore requirement (P5).
pub struct Recommender<'a> {
    net: &'a mut LearningNet,
    conditions: ConditionValues,
    test_grades: TestGrades,
    first_actives: Vec<NodeId>,
    visited_arcs: Vec<ArcId>,
    kind_snapshot: Vec<(NodeId, NodeKind)>,
    diagnostics: Diagnostics,
}

impl<'a> Recommender<'a> {
    pub fn new(
        net: &'a mut LearningNet,
        conditions: ConditionValues,
        test_grades: TestGrades,
    ) -> Recommender<'a> {
        let mut diagnostics = Diagnostics::new();
        let sources: Vec<NodeId> = net.nodes().filter(|&v| net.is_source(v)).collect();
        reset_join_counters(net);
        let (first_actives, visited_arcs) =
            collect_new_actives(net, sources, &conditions, &test_grades, &mut diagnostics);
        debug!("recommender: {} units active initially", first_actives.len());

        let kind_snapshot: Vec<(NodeId, NodeKind)> = net.nodes().map(|v| (v, net.kind(v))).collect();

        Recommender {
            net,
            conditions,
            test_grades,
            first_actives,
            visited_arcs,
            kind_snapshot,
            diagnostics,
        }
    }

    /// The active set computed at construction time (`recActive()`).
    pub fn active_set(&self) -> &[NodeId] {
        &self.first_actives
    }

    /// Every arc the frontier traversal visited so far, for diagnostic
    /// output (the request/response `visited` arc map).
    pub fn visited_arcs(&self) -> &[ArcId] {
        &self.visited_arcs
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// `recNext(node-cost)`: the active unit with minimum cost.
    pub fn rec_next_by_node_cost(&self, costs: &NodeCosts) -> Option<NodeId> {
        pick_min(self.first_actives.iter().copied(), |v| costs.get(&v).copied())
    }

    /// `recNext(node-pair-cost, prev)`: the active unit minimizing
    /// `cost[prev][u]`, or (no `prev`) minimizing `Σ_u cost[v][u]`.
    pub fn rec_next_by_node_pair_cost(&self, costs: &NodePairCosts, prev: Option<NodeId>) -> Option<NodeId> {
        node_pair_pick(&self.first_actives, costs, prev)
    }

    /// `recPath(node-cost)`: repeatedly takes the minimum-cost active unit,
    /// marks it completed, re-expands the frontier from it, and folds any
    /// newly-activated units back into the candidate set, until the target
    /// is reached or no actives remain.
    pub fn rec_path_by_node_cost(&mut self, costs: &NodeCosts) -> Vec<NodeId> {
        let mut candidates = self.first_actives.clone();
        let mut result = Vec::new();

        while let Some(best) = pick_min(candidates.iter().copied(), |v| costs.get(&v).copied()) {
            let pos = candidates.iter().position(|&v| v == best).expect("just picked");
            candidates.remove(pos);
            result.push(best);
            debug!("recPath: picked {best}");

            if self.net.is_target(best) {
                break;
            }
            self.net.set_kind(best, NodeKind::UnitCompleted);
            let (new_actives, new_visited) = collect_new_actives(
                self.net,
                vec![best],
                &self.conditions,
                &self.test_grades,
                &mut self.diagnostics,
            );
            self.visited_arcs.extend(new_visited);
            candidates.extend(new_actives);
        }

        self.restore();
        result
    }

    /// `recPath(node-pair-cost)`: same shape as [`Self::rec_path_by_node_cost`],
    /// but each pick is `recNext(node-pair-cost, last_picked)` over an
    /// unordered candidate list.
    pub fn rec_path_by_node_pair_cost(&mut self, costs: &NodePairCosts) -> Vec<NodeId> {
        let mut candidates = self.first_actives.clone();
        let mut result = Vec::new();
        let mut prev: Option<NodeId> = None;

        while !candidates.is_empty() {
            let Some(best) = node_pair_pick(&candidates, costs, prev) else {
                break;
            };
            let pos = candidates.iter().position(|&v| v == best).expect("just picked");
            candidates.remove(pos);
            result.push(best);
            prev = Some(best);
            debug!("recPath: picked {best}");

            if self.net.is_target(best) {
                break;
            }
            self.net.set_kind(best, NodeKind::UnitCompleted);
            let (new_actives, new_visited) = collect_new_actives(
                self.net,
                vec![best],
                &self.conditions,
                &self.test_grades,
                &mut self.diagnostics,
            );
            self.visited_arcs.extend(new_visited);
            candidates.extend(new_actives);
        }

        self.restore();
        result
    }

    fn restore(&mut self) {
        for &(v, kind) in &self.kind_snapshot {
            if self.net.contains_node(v) {
                self.net.set_kind(v, kind);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::LearningNet;

    #[test]
    fn completed_prefix_activates_next_unit() {
        let mut net = LearningNet::new();
        let u0 = net.add_node(NodeKind::UnitInactive, 0);
        let u1 = net.add_node(NodeKind::UnitInactive, 1);
        let u2 = net.add_node(NodeKind::UnitInactive, 2);
        let u3 = net.add_node(NodeKind::UnitInactive, 3);
        net.add_arc(u0, u1, None);
        net.add_arc(u1, u2, None);
        net.add_arc(u2, u3, None);
        net.set_target(u3);
        net.set_completed(&[0, 1]);

        let mut rec = Recommender::new(&mut net, ConditionValues::new(), TestGrades::new());
        assert_eq!(rec.active_set(), &[u2]);

        let mut costs = NodeCosts::new();
        costs.insert(u2, 1.0);
        costs.insert(u3, 1.0);
        let path = rec.rec_path_by_node_cost(&costs);
        assert_eq!(path, vec![u2, u3]);
    }

    #[test]
    fn split_join_activates_both_branches() {
        let mut net = LearningNet::new();
        let split = net.add_node(NodeKind::Split, 0);
        let u1 = net.add_node(NodeKind::UnitInactive, 1);
        let u2 = net.add_node(NodeKind::UnitInactive, 2);
        let join = net.add_node(NodeKind::Join, 2);
        net.add_arc(split, u1, None);
        net.add_arc(split, u2, None);
        net.add_arc(u1, join, None);
        net.add_arc(u2, join, None);
        net.set_target(join);

        let rec = Recommender::new(&mut net, ConditionValues::new(), TestGrades::new());
        let mut actives = rec.active_set().to_vec();
        actives.sort_by_key(|&v| net.section_id(v));
        assert_eq!(actives, vec![u1, u2]);
    }

    #[test]
    fn condition_value_selects_its_branch() {
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

        let mut conditions = ConditionValues::new();
        conditions.insert(0, vec!["a".to_string()]);
        let rec = Recommender::new(&mut net, conditions, TestGrades::new());
        assert_eq!(rec.active_set(), &[u1]);
    }

    #[test]
    fn empty_condition_values_take_else() {
        let mut net = LearningNet::new();
        let c = net.add_node(NodeKind::Condition, 0);
        let u1 = net.add_node(NodeKind::UnitInactive, 1);
        let u2 = net.add_node(NodeKind::UnitInactive, 2);
        net.add_arc(c, u1, Some("a".to_string()));
        net.add_arc(c, u2, Some(ELSE.to_string()));
        net.set_target(u1);

        let rec = Recommender::new(&mut net, ConditionValues::new(), TestGrades::new());
        assert_eq!(rec.active_set(), &[u2]);
    }

    #[test]
    fn test_grade_picks_largest_label_at_or_below() {
        let mut net = LearningNet::new();
        let t = net.add_node(NodeKind::Test, 0);
        let u1 = net.add_node(NodeKind::UnitInactive, 1);
        let u2 = net.add_node(NodeKind::UnitInactive, 2);
        net.add_arc(t, u1, Some("10".to_string()));
        net.add_arc(t, u2, Some("5".to_string()));
        net.set_target(u1);

        let mut grades = TestGrades::new();
        grades.insert(0, 7);
        let rec = Recommender::new(&mut net, ConditionValues::new(), grades);
        assert_eq!(rec.active_set(), &[u2]);
    }

    #[test]
    fn test_with_no_recorded_grade_assumes_the_best() {
        let mut net = LearningNet::new();
        let t = net.add_node(NodeKind::Test, 0);
        let u1 = net.add_node(NodeKind::UnitInactive, 1);
        let u2 = net.add_node(NodeKind::UnitInactive, 2);
        net.add_arc(t, u1, Some("10".to_string()));
        net.add_arc(t, u2, Some("5".to_string()));
        net.set_target(u1);

        let rec = Recommender::new(&mut net, ConditionValues::new(), TestGrades::new());
        assert_eq!(rec.active_set(), &[u1]);
    }

    #[test]
    fn completed_unit_already_active_is_a_diagnosed_inconsistency() {
        let mut net = LearningNet::new();
        let u0 = net.add_node(NodeKind::UnitActive, 0);
        net.set_target(u0);

        let rec = Recommender::new(&mut net, ConditionValues::new(), TestGrades::new());
        assert!(rec.active_set().is_empty());
        assert!(!rec.diagnostics().messages().is_empty());
    }

    #[test]
    fn rec_path_restores_node_kinds_after_returning() {
        let mut net = LearningNet::new();
        let u0 = net.add_node(NodeKind::UnitInactive, 0);
        let u1 = net.add_node(NodeKind::UnitInactive, 1);
        net.add_arc(u0, u1, None);
        net.set_target(u1);

        let mut rec = Recommender::new(&mut net, ConditionValues::new(), TestGrades::new());
        let mut costs = NodeCosts::new();
        costs.insert(u0, 1.0);
        costs.insert(u1, 1.0);
        let _ = rec.rec_path_by_node_cost(&costs);

        assert_eq!(net.kind(u0), NodeKind::UnitActive);
        assert_eq!(net.kind(u1), NodeKind::UnitInactive);
    }

    #[test]
    fn rec_next_by_node_pair_cost_without_prev_uses_cost_sum() {
        let mut net = LearningNet::new();
        let split = net.add_node(NodeKind::Split, 0);
        let u1 = net.add_node(NodeKind::UnitInactive, 1);
        let u2 = net.add_node(NodeKind::UnitInactive, 2);
        let join = net.add_node(NodeKind::Join, 2);
        net.add_arc(split, u1, None);
        net.add_arc(split, u2, None);
        net.add_arc(u1, join, None);
        net.add_arc(u2, join, None);
        net.set_target(join);

        let rec = Recommender::new(&mut net, ConditionValues::new(), TestGrades::new());
        let mut costs = NodePairCosts::new();
        let mut row_u1 = HashMap::new();
        row_u1.insert(u2, 5.0);
        costs.insert(u1, row_u1);
        let mut row_u2 = HashMap::new();
        row_u2.insert(u1, 1.0);
        costs.insert(u2, row_u2);

        assert_eq!(rec.rec_next_by_node_pair_cost(&costs, None), Some(u2));
    }
}
