//! The typed directed graph model for learning nets.
//!
//! A [`LearningNet`] owns its nodes, arcs and all per-element attributes
//! (kind, reference integer, branch label, activation counters). Handles
//! ([`NodeId`]/[`ArcId`]) are stable under insertion but are invalidated by
//! deletion of that specific element — callers must not hold on to a handle
//! across a call that may delete it (e.g. [`crate::compress::compress`]).
//!
//! This uses a tagged-variant [`NodeKind`] plus a separate `activated_in_arcs`
//! counter on join nodes, rather than the bit-range-encoded pseudo-enum of the
//! original implementation (where a join's activation count was folded into
//! its type integer). That encoding trick is an implementation shortcut that
//! does not belong in an idiomatic reimplementation.

pub mod format;

use std::fmt;

/// Sentinel branch label covering every value a [`NodeKind::Condition`]
/// doesn't explicitly list. Every condition must have at least one arc
/// carrying this label.
pub const ELSE: &str = "ELSE";

/// Sentinel label a [`NodeKind::Test`] arc is relabeled to during grade
/// normalization (see [`crate::compress`]), replacing the maximum numeric
/// label among that test's out-arcs.
pub const MAX_GRADE: &str = "MAX_GRADE";

/// Stable (until deletion) handle to a node in a [`LearningNet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable (until deletion) handle to an arc in a [`LearningNet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArcId(u32);

impl ArcId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ArcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of a node, with the unit lifecycle folded in as three variants
/// rather than a separate state machine enum, since units never change kind
/// except along `Inactive -> Active -> Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NodeKind {
    UnitInactive,
    UnitActive,
    UnitCompleted,
    Split,
    Condition,
    Test,
    Join,
}

impl NodeKind {
    pub fn is_unit(self) -> bool {
        matches!(
            self,
            NodeKind::UnitInactive | NodeKind::UnitActive | NodeKind::UnitCompleted
        )
    }

    pub fn is_split_like(self) -> bool {
        matches!(
            self,
            NodeKind::Split | NodeKind::Condition | NodeKind::Test
        )
    }

    pub fn is_join(self) -> bool {
        matches!(self, NodeKind::Join)
    }
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    /// Meaning depends on `kind`: section id (unit), necessary in-arcs
    /// (join), condition id (condition) or test id (test). Unused for splits.
    reference: i64,
    /// Transient counter used by traversals, meaningful only for joins.
    activated_in_arcs: u32,
    in_arcs: Vec<ArcId>,
    out_arcs: Vec<ArcId>,
}

#[derive(Debug, Clone)]
struct ArcData {
    source: NodeId,
    target: NodeId,
    /// Condition value / test grade label. Ignored for all other source
    /// kinds.
    branch: Option<String>,
}

/// A directed graph of study units and connectives with a single distinguished
/// target node.
///
/// The net exclusively owns its nodes, arcs and their attribute maps.
#[derive(Debug, Clone, Default)]
pub struct LearningNet {
    nodes: Vec<Option<NodeData>>,
    arcs: Vec<Option<ArcData>>,
    free_nodes: Vec<u32>,
    free_arcs: Vec<u32>,
    target: Option<NodeId>,
    recommended: Vec<NodeId>,
}

impl LearningNet {
    pub fn new() -> Self {
        LearningNet::default()
    }

    // ---- construction helpers -------------------------------------------------

    /// Builds a fresh net whose unit nodes (one per section id in `sections`)
    /// all feed into a single join node, with that join marked as the target
    /// and its `necessary_in_arcs` equal to the unit count.
    pub fn create_from_sections(sections: &[i64]) -> LearningNet {
        let mut net = LearningNet::new();
        let join = net.add_node(NodeKind::Join, 0);
        net.set_target(join);

        for &section in sections {
            let unit = net.add_node(NodeKind::UnitInactive, section);
            net.add_arc(unit, join, None);
            let necessary = net.necessary_in_arcs(join) + 1;
            net.set_necessary_in_arcs(join, necessary);
        }
        net
    }

    // ---- node operations --------------------------------------------------

    pub fn add_node(&mut self, kind: NodeKind, reference: i64) -> NodeId {
        let data = NodeData {
            kind,
            reference,
            activated_in_arcs: 0,
            in_arcs: Vec::new(),
            out_arcs: Vec::new(),
        };
        if let Some(idx) = self.free_nodes.pop() {
            self.nodes[idx as usize] = Some(data);
            NodeId(idx)
        } else {
            self.nodes.push(Some(data));
            NodeId(self.nodes.len() as u32 - 1)
        }
    }

    /// Removes a node and every arc incident to it.
    pub fn remove_node(&mut self, v: NodeId) {
        let (in_arcs, out_arcs) = {
            let data = self.node(v);
            (data.in_arcs.clone(), data.out_arcs.clone())
        };
        for a in in_arcs {
            self.remove_arc(a);
        }
        for a in out_arcs {
            self.remove_arc(a);
        }
        self.nodes[v.index()] = None;
        self.free_nodes.push(v.0);
        if self.target == Some(v) {
            self.target = None;
        }
        self.recommended.retain(|&n| n != v);
    }

    fn node(&self, v: NodeId) -> &NodeData {
        self.nodes[v.index()]
            .as_ref()
            .expect("use of a removed or invalid node handle")
    }

    fn node_mut(&mut self, v: NodeId) -> &mut NodeData {
        self.nodes[v.index()]
            .as_mut()
            .expect("use of a removed or invalid node handle")
    }

    /// Iterates all live node ids, in ascending handle order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|_| NodeId(i as u32)))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// `true` if `v` is a live handle, i.e. not out of range and not pointing
    /// at a removed node. Algorithms that hold on to handles across
    /// contractions (compression) check this before dereferencing.
    pub fn contains_node(&self, v: NodeId) -> bool {
        matches!(self.nodes.get(v.index()), Some(Some(_)))
    }

    pub fn kind(&self, v: NodeId) -> NodeKind {
        self.node(v).kind
    }

    pub fn set_kind(&mut self, v: NodeId, kind: NodeKind) {
        self.node_mut(v).kind = kind;
    }

    pub fn in_arcs(&self, v: NodeId) -> &[ArcId] {
        &self.node(v).in_arcs
    }

    pub fn out_arcs(&self, v: NodeId) -> &[ArcId] {
        &self.node(v).out_arcs
    }

    pub fn in_degree(&self, v: NodeId) -> usize {
        self.node(v).in_arcs.len()
    }

    pub fn out_degree(&self, v: NodeId) -> usize {
        self.node(v).out_arcs.len()
    }

    pub fn is_source(&self, v: NodeId) -> bool {
        self.in_degree(v) == 0
    }

    pub fn is_dead_end(&self, v: NodeId) -> bool {
        self.out_degree(v) == 0
    }

    /// Out-neighbor nodes of `v`, one per out-arc (duplicated for parallel
    /// arcs to the same target).
    pub fn successors(&self, v: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.out_arcs(v).iter().map(move |&a| self.arc(a).target)
    }

    pub fn predecessors(&self, v: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.in_arcs(v).iter().map(move |&a| self.arc(a).source)
    }

    // ---- reference accessors, kind-specific ------------------------------------

    pub fn section_id(&self, v: NodeId) -> i64 {
        debug_assert!(self.kind(v).is_unit(), "section_id() on a non-unit node");
        self.node(v).reference
    }

    pub fn set_section_id(&mut self, v: NodeId, section: i64) {
        debug_assert!(
            self.kind(v).is_unit(),
            "set_section_id() on a non-unit node"
        );
        self.node_mut(v).reference = section;
    }

    pub fn necessary_in_arcs(&self, v: NodeId) -> i64 {
        debug_assert!(self.kind(v).is_join(), "necessary_in_arcs() on a non-join node");
        self.node(v).reference
    }

    pub fn set_necessary_in_arcs(&mut self, v: NodeId, necessary: i64) {
        debug_assert!(
            self.kind(v).is_join(),
            "set_necessary_in_arcs() on a non-join node"
        );
        self.node_mut(v).reference = necessary;
    }

    pub fn condition_id(&self, v: NodeId) -> i64 {
        debug_assert!(
            self.kind(v) == NodeKind::Condition,
            "condition_id() on a non-condition node"
        );
        self.node(v).reference
    }

    pub fn set_condition_id(&mut self, v: NodeId, condition_id: i64) {
        debug_assert!(
            self.kind(v) == NodeKind::Condition,
            "set_condition_id() on a non-condition node"
        );
        self.node_mut(v).reference = condition_id;
    }

    pub fn test_id(&self, v: NodeId) -> i64 {
        debug_assert!(self.kind(v) == NodeKind::Test, "test_id() on a non-test node");
        self.node(v).reference
    }

    pub fn set_test_id(&mut self, v: NodeId, test_id: i64) {
        debug_assert!(
            self.kind(v) == NodeKind::Test,
            "set_test_id() on a non-test node"
        );
        self.node_mut(v).reference = test_id;
    }

    // ---- join activation counters ------------------------------------------

    pub fn activated_in_arcs(&self, v: NodeId) -> u32 {
        debug_assert!(self.kind(v).is_join(), "activated_in_arcs() on a non-join node");
        self.node(v).activated_in_arcs
    }

    pub fn reset_activated_in_arcs(&mut self, v: NodeId) {
        debug_assert!(
            self.kind(v).is_join(),
            "reset_activated_in_arcs() on a non-join node"
        );
        self.node_mut(v).activated_in_arcs = 0;
    }

    pub fn increment_activated_in_arcs(&mut self, v: NodeId) {
        debug_assert!(
            self.kind(v).is_join(),
            "increment_activated_in_arcs() on a non-join node"
        );
        self.node_mut(v).activated_in_arcs += 1;
    }

    pub fn is_unlocked_join(&self, v: NodeId) -> bool {
        self.kind(v).is_join() && self.activated_in_arcs(v) >= self.necessary_in_arcs(v) as u32
    }

    // ---- arc operations -----------------------------------------------------

    pub fn add_arc(&mut self, source: NodeId, target: NodeId, branch: Option<String>) -> ArcId {
        let data = ArcData {
            source,
            target,
            branch,
        };
        let id = if let Some(idx) = self.free_arcs.pop() {
            self.arcs[idx as usize] = Some(data);
            ArcId(idx)
        } else {
            self.arcs.push(Some(data));
            ArcId(self.arcs.len() as u32 - 1)
        };
        self.node_mut(source).out_arcs.push(id);
        self.node_mut(target).in_arcs.push(id);
        id
    }

    pub fn remove_arc(&mut self, a: ArcId) {
        let (source, target) = {
            let data = self.arc(a);
            (data.source, data.target)
        };
        self.node_mut(source).out_arcs.retain(|&x| x != a);
        self.node_mut(target).in_arcs.retain(|&x| x != a);
        self.arcs[a.index()] = None;
        self.free_arcs.push(a.0);
    }

    fn arc(&self, a: ArcId) -> &ArcData {
        self.arcs[a.index()]
            .as_ref()
            .expect("use of a removed or invalid arc handle")
    }

    fn arc_mut(&mut self, a: ArcId) -> &mut ArcData {
        self.arcs[a.index()]
            .as_mut()
            .expect("use of a removed or invalid arc handle")
    }

    pub fn arcs(&self) -> impl Iterator<Item = ArcId> + '_ {
        self.arcs
            .iter()
            .enumerate()
            .filter_map(|(i, a)| a.as_ref().map(|_| ArcId(i as u32)))
    }

    pub fn arc_source(&self, a: ArcId) -> NodeId {
        self.arc(a).source
    }

    pub fn arc_target(&self, a: ArcId) -> NodeId {
        self.arc(a).target
    }

    pub fn set_arc_endpoints(&mut self, a: ArcId, source: NodeId, target: NodeId) {
        let (old_source, old_target) = {
            let data = self.arc(a);
            (data.source, data.target)
        };
        self.node_mut(old_source).out_arcs.retain(|&x| x != a);
        self.node_mut(old_target).in_arcs.retain(|&x| x != a);
        self.node_mut(source).out_arcs.push(a);
        self.node_mut(target).in_arcs.push(a);
        let data = self.arc_mut(a);
        data.source = source;
        data.target = target;
    }

    pub fn branch_label(&self, a: ArcId) -> Option<&str> {
        self.arc(a).branch.as_deref()
    }

    pub fn set_branch_label(&mut self, a: ArcId, branch: Option<String>) {
        self.arc_mut(a).branch = branch;
    }

    /// Merges `w` into `v`: every in-arc of `w` other than an existing `v -> w`
    /// arc is redirected to end at `v`, every out-arc of `w` is redirected to
    /// start at `v`, and `w` is then removed.
    ///
    /// Branch labels of redirected arcs are preserved as-is; callers that need
    /// to carry a condition/test branch across the contracted arc (see
    /// [`crate::compress`]) must copy it onto the new arc themselves before
    /// calling this.
    pub fn contract(&mut self, v: NodeId, w: NodeId) {
        let in_arcs = self.node(w).in_arcs.clone();
        for a in in_arcs {
            if self.arc(a).source != v {
                self.set_arc_endpoints(a, self.arc(a).source, v);
            } else {
                self.remove_arc(a);
            }
        }
        let out_arcs = self.node(w).out_arcs.clone();
        for a in out_arcs {
            self.set_arc_endpoints(a, v, self.arc(a).target);
        }
        self.remove_node(w);
    }

    // ---- target & recommended path ------------------------------------------

    pub fn target(&self) -> Option<NodeId> {
        self.target
    }

    pub fn set_target(&mut self, v: NodeId) {
        self.target = Some(v);
    }

    pub fn is_target(&self, v: NodeId) -> bool {
        self.target == Some(v)
    }

    pub fn recommended(&self) -> &[NodeId] {
        &self.recommended
    }

    pub fn set_recommended(&mut self, path: Vec<NodeId>) {
        self.recommended = path;
    }

    // ---- learner-facing mutation --------------------------------------------

    /// Sets the kind of every unit node whose section id is in `sections` to
    /// `UnitCompleted`. Join activation counters are *not* reset here; that
    /// is a traversal concern (see [`crate::recommend`]).
    ///
    /// Returns the section ids for which no matching unit node was found.
    pub fn set_completed(&mut self, sections: &[i64]) -> Vec<i64> {
        let mut by_section = std::collections::HashMap::new();
        for v in self.nodes() {
            if self.kind(v).is_unit() {
                by_section.insert(self.section_id(v), v);
            }
        }

        let mut not_found = Vec::new();
        for &section in sections {
            match by_section.get(&section) {
                Some(&v) => self.set_kind(v, NodeKind::UnitCompleted),
                None => not_found.push(section),
            }
        }
        not_found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_from_sections_builds_single_join_target() {
        let net = LearningNet::create_from_sections(&[1, 2, 3]);
        let target = net.target().expect("target must be set");
        assert_eq!(net.kind(target), NodeKind::Join);
        assert_eq!(net.necessary_in_arcs(target), 3);
        assert_eq!(net.in_degree(target), 3);

        let units: Vec<_> = net.nodes().filter(|&v| net.kind(v).is_unit()).collect();
        assert_eq!(units.len(), 3);
        for u in units {
            assert_eq!(net.kind(u), NodeKind::UnitInactive);
            assert_eq!(net.out_degree(u), 1);
        }
    }

    #[test]
    fn contract_redirects_arcs_and_removes_node() {
        let mut net = LearningNet::new();
        let a = net.add_node(NodeKind::UnitInactive, 1);
        let b = net.add_node(NodeKind::UnitInactive, 2);
        let c = net.add_node(NodeKind::UnitInactive, 3);
        net.add_arc(a, b, None);
        net.add_arc(b, c, None);

        net.contract(a, b);

        assert_eq!(net.out_degree(a), 1);
        assert_eq!(net.successors(a).collect::<Vec<_>>(), vec![c]);
        assert_eq!(net.node_count(), 2);
    }

    #[test]
    fn remove_node_drops_incident_arcs() {
        let mut net = LearningNet::new();
        let a = net.add_node(NodeKind::Split, 0);
        let b = net.add_node(NodeKind::UnitInactive, 1);
        net.add_arc(a, b, None);

        net.remove_node(b);

        assert_eq!(net.out_degree(a), 0);
        assert_eq!(net.node_count(), 1);
    }

    #[test]
    fn set_completed_reports_unknown_sections() {
        let mut net = LearningNet::create_from_sections(&[1, 2]);
        let not_found = net.set_completed(&[1, 99]);
        assert_eq!(not_found, vec![99]);

        let unit = net
            .nodes()
            .find(|&v| net.kind(v).is_unit() && net.section_id(v) == 1)
            .unwrap();
        assert_eq!(net.kind(unit), NodeKind::UnitCompleted);
    }
}
