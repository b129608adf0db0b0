//! C2: per-node well-formedness checks plus acyclicity.
//!
//! Validation never mutates the net; it only reads degrees, kinds and
//! reference integers and accumulates diagnostics the way the original
//! `NetworkChecker` did, rather than aborting on the first violation.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::error::Diagnostics;
use crate::net::{LearningNet, NodeId, NodeKind};
use crate::CoreError;

/// Runs every per-node structural check, then (if they all passed) checks
/// acyclicity.
///
/// Returns `Ok(())` when the net satisfies every invariant in the data
/// model. A failing per-node check is reported as [`CoreError::Structural`];
/// a cycle short-circuits straight to [`CoreError::NotAcyclic`] without
/// running the per-node pass's results through that variant.
pub fn validate(net: &LearningNet) -> Result<(), CoreError> {
    let diagnostics = check_nodes(net);
    if !diagnostics.succeeded() {
        return Err(CoreError::Structural(diagnostics.into_messages()));
    }

    if has_cycle(net) {
        return Err(CoreError::NotAcyclic);
    }

    debug!(
        "validated net with {} nodes, {} has_conditions_or_tests",
        net.node_count(),
        has_conditions_or_tests(net)
    );
    Ok(())
}

/// `true` when the net has at least one Condition or Test node. When this is
/// `false`, acyclicity alone decides validity and the branch-combination
/// checker (C4) has nothing to enumerate.
pub fn has_conditions_or_tests(net: &LearningNet) -> bool {
    net.nodes()
        .any(|v| matches!(net.kind(v), NodeKind::Condition | NodeKind::Test))
}

fn check_nodes(net: &LearningNet) -> Diagnostics {
    let mut diagnostics = Diagnostics::new();
    let mut seen_sections: HashMap<i64, NodeId> = HashMap::new();

    for v in net.nodes() {
        match net.kind(v) {
            NodeKind::UnitInactive | NodeKind::UnitActive | NodeKind::UnitCompleted => {
                if net.in_degree(v) > 1 {
                    diagnostics.fail_with_error(format!(
                        "unit {v} has in-degree {} (expected <= 1)",
                        net.in_degree(v)
                    ));
                }
                if net.out_degree(v) > 1 {
                    diagnostics.fail_with_error(format!(
                        "unit {v} has out-degree {} (expected <= 1)",
                        net.out_degree(v)
                    ));
                }
                let section = net.section_id(v);
                if let Some(&other) = seen_sections.get(&section) {
                    diagnostics.fail_with_error(format!(
                        "section id {section} reused by units {other} and {v}"
                    ));
                } else {
                    seen_sections.insert(section, v);
                }
            }
            NodeKind::Join => {
                if net.in_degree(v) == 0 {
                    diagnostics.fail_with_error(format!("join {v} has no in-arcs"));
                }
                if net.out_degree(v) > 1 {
                    diagnostics.fail_with_error(format!(
                        "join {v} has out-degree {} (expected <= 1)",
                        net.out_degree(v)
                    ));
                }
                let necessary = net.necessary_in_arcs(v);
                if necessary < 1 || necessary > net.in_degree(v) as i64 {
                    diagnostics.fail_with_error(format!(
                        "join {v} has necessary_in_arcs {necessary}, expected between 1 and {}",
                        net.in_degree(v)
                    ));
                }
            }
            NodeKind::Split => {
                if net.in_degree(v) > 1 {
                    diagnostics.fail_with_error(format!(
                        "split {v} has in-degree {} (expected <= 1)",
                        net.in_degree(v)
                    ));
                }
            }
            NodeKind::Condition => {
                if net.in_degree(v) > 1 {
                    diagnostics.fail_with_error(format!(
                        "condition {v} has in-degree {} (expected <= 1)",
                        net.in_degree(v)
                    ));
                }
                let has_else = net
                    .out_arcs(v)
                    .iter()
                    .any(|&a| net.branch_label(a) == Some(crate::net::ELSE));
                if !has_else {
                    diagnostics.fail_with_error(format!(
                        "condition {v} has no out-arc labeled {}",
                        crate::net::ELSE
                    ));
                }
            }
            NodeKind::Test => {
                if net.in_degree(v) > 1 {
                    diagnostics.fail_with_error(format!(
                        "test {v} has in-degree {} (expected <= 1)",
                        net.in_degree(v)
                    ));
                }
            }
        }
    }

    diagnostics
}

/// Kahn's algorithm: repeatedly removes sources; any node left unremoved
/// belongs to a cycle.
fn has_cycle(net: &LearningNet) -> bool {
    let mut remaining_in: HashMap<NodeId, usize> =
        net.nodes().map(|v| (v, net.in_degree(v))).collect();
    let mut queue: Vec<NodeId> = net.nodes().filter(|&v| net.in_degree(v) == 0).collect();
    let mut visited: HashSet<NodeId> = HashSet::new();

    while let Some(v) = queue.pop() {
        if !visited.insert(v) {
            continue;
        }
        for w in net.successors(v) {
            if let Some(deg) = remaining_in.get_mut(&w) {
                *deg -= 1;
                if *deg == 0 {
                    queue.push(w);
                }
            }
        }
    }

    visited.len() != net.node_count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::LearningNet;

    #[test]
    fn accepts_a_simple_chain() {
        let net = LearningNet::create_from_sections(&[1, 2, 3]);
        assert!(validate(&net).is_ok());
    }

    #[test]
    fn rejects_duplicate_section_ids() {
        let mut net = LearningNet::new();
        let a = net.add_node(NodeKind::UnitInactive, 1);
        let b = net.add_node(NodeKind::UnitInactive, 1);
        net.set_target(b);
        let _ = a;

        match validate(&net) {
            Err(CoreError::Structural(msgs)) => assert!(!msgs.is_empty()),
            other => panic!("expected a structural error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_a_condition_without_an_else_arc() {
        let mut net = LearningNet::new();
        let c = net.add_node(NodeKind::Condition, 0);
        let u = net.add_node(NodeKind::UnitInactive, 1);
        net.add_arc(c, u, Some("a".to_string()));
        net.set_target(u);

        assert!(matches!(validate(&net), Err(CoreError::Structural(_))));
    }

    #[test]
    fn rejects_a_cycle() {
        let mut net = LearningNet::new();
        let a = net.add_node(NodeKind::UnitInactive, 1);
        let b = net.add_node(NodeKind::UnitInactive, 2);
        net.add_arc(a, b, None);
        net.add_arc(b, a, None);
        net.set_target(b);

        assert_eq!(validate(&net), Err(CoreError::NotAcyclic));
    }

    #[test]
    fn join_with_necessary_in_arcs_out_of_range_fails() {
        let mut net = LearningNet::new();
        let a = net.add_node(NodeKind::UnitInactive, 1);
        let j = net.add_node(NodeKind::Join, 5);
        net.add_arc(a, j, None);
        net.set_target(j);

        assert!(matches!(validate(&net), Err(CoreError::Structural(_))));
    }
}
