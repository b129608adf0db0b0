//! The line-oriented textual serialization format: `@nodes`/`@arcs`/`@attributes`
//! sections with `SONST` as the on-disk spelling of the [`super::ELSE`] sentinel.
//!
//! Node and arc labels are plain sequential integers assigned in iteration
//! order; they only exist to let `@attributes` and arc endpoints refer back to
//! a node without re-embedding the whole row.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::CoreError;

use super::{ArcId, LearningNet, NodeId, NodeKind, ELSE};

const SONST: &str = "SONST";

fn kind_to_type_code(kind: NodeKind) -> i64 {
    match kind {
        NodeKind::UnitInactive => 0,
        NodeKind::UnitActive => 1,
        NodeKind::UnitCompleted => 2,
        NodeKind::Split => 10,
        NodeKind::Condition => 11,
        NodeKind::Test => 12,
        NodeKind::Join => 20,
    }
}

fn type_code_to_kind(code: i64) -> Option<NodeKind> {
    match code {
        0 => Some(NodeKind::UnitInactive),
        1 => Some(NodeKind::UnitActive),
        2 => Some(NodeKind::UnitCompleted),
        10 => Some(NodeKind::Split),
        11 => Some(NodeKind::Condition),
        12 => Some(NodeKind::Test),
        20 => Some(NodeKind::Join),
        _ => None,
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Section {
    None,
    Nodes,
    Arcs,
    Attributes,
}

fn parse_int(token: &str, context: &str) -> Result<i64, CoreError> {
    token
        .parse::<i64>()
        .map_err(|_| CoreError::Parse(format!("expected an integer in {context}, got {token:?}")))
}

/// Parses the textual format into a [`LearningNet`].
///
/// The reader tolerates a missing `@attributes` section, a missing `target`
/// or `recommended` line within it, and missing condition labels on arcs; it
/// fails only when a line cannot be tokenized as the section demands.
pub fn parse(text: &str) -> Result<LearningNet, CoreError> {
    let mut net = LearningNet::new();
    let mut labels: HashMap<i64, NodeId> = HashMap::new();
    let mut section = Section::None;
    let mut skip_header = false;

    for raw_line in text.lines() {
        let line = raw_line.trim_end();
        if line.trim().is_empty() {
            continue;
        }

        if let Some(marker) = line.trim().strip_prefix('@') {
            section = match marker {
                "nodes" => Section::Nodes,
                "arcs" => Section::Arcs,
                "attributes" => Section::Attributes,
                other => return Err(CoreError::Parse(format!("unknown section @{other}"))),
            };
            skip_header = matches!(section, Section::Nodes | Section::Arcs);
            continue;
        }

        if skip_header {
            skip_header = false;
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        match section {
            Section::None => {
                return Err(CoreError::Parse(
                    "content before the first @ section marker".to_string(),
                ));
            }
            Section::Nodes => {
                if tokens.len() < 3 {
                    return Err(CoreError::Parse(format!(
                        "malformed node line, expected 3 columns: {line:?}"
                    )));
                }
                let label = parse_int(tokens[0], "a node label")?;
                let type_code = parse_int(tokens[1], "a node type")?;
                let reference = parse_int(tokens[2], "a node reference")?;
                let kind = type_code_to_kind(type_code).ok_or_else(|| {
                    CoreError::Parse(format!("unknown node type code {type_code}"))
                })?;
                let id = net.add_node(kind, reference);
                labels.insert(label, id);
            }
            Section::Arcs => {
                if tokens.len() < 2 {
                    return Err(CoreError::Parse(format!(
                        "malformed arc line, expected at least 2 columns: {line:?}"
                    )));
                }
                let source_label = parse_int(tokens[0], "an arc source")?;
                let target_label = parse_int(tokens[1], "an arc target")?;
                let source = *labels.get(&source_label).ok_or_else(|| {
                    CoreError::Parse(format!("arc refers to unknown node {source_label}"))
                })?;
                let target = *labels.get(&target_label).ok_or_else(|| {
                    CoreError::Parse(format!("arc refers to unknown node {target_label}"))
                })?;
                // tokens[2], if present, is the arc's own label; it carries
                // no meaning beyond round-tripping and is not tracked.
                let branch = tokens.get(3).map(|&value| {
                    if value == SONST {
                        ELSE.to_string()
                    } else {
                        value.to_string()
                    }
                });
                net.add_arc(source, target, branch);
            }
            Section::Attributes => {
                let key = tokens[0];
                match key {
                    "target" => {
                        let label = tokens.get(1).ok_or_else(|| {
                            CoreError::Parse("target attribute has no value".to_string())
                        })?;
                        let label = parse_int(label, "the target attribute")?;
                        let id = *labels.get(&label).ok_or_else(|| {
                            CoreError::Parse(format!("target refers to unknown node {label}"))
                        })?;
                        net.set_target(id);
                    }
                    "recommended" => {
                        let mut path = Vec::with_capacity(tokens.len() - 1);
                        for token in &tokens[1..] {
                            let label = parse_int(token, "the recommended attribute")?;
                            let id = *labels.get(&label).ok_or_else(|| {
                                CoreError::Parse(format!(
                                    "recommended refers to unknown node {label}"
                                ))
                            })?;
                            path.push(id);
                        }
                        net.set_recommended(path);
                    }
                    other => {
                        log::debug!("ignoring unknown attribute {other:?}");
                    }
                }
            }
        }
    }

    Ok(net)
}

/// Serializes a net to the textual format. Node and arc labels are assigned
/// by iteration order over `net.nodes()` / `net.arcs()`, so re-parsing the
/// output and writing it again reproduces the same text.
pub fn write(net: &LearningNet) -> String {
    let mut out = String::new();
    let labels: HashMap<NodeId, i64> = net
        .nodes()
        .enumerate()
        .map(|(i, v)| (v, i as i64))
        .collect();

    out.push_str("@nodes\n");
    out.push_str("label\ttype\tref\n");
    for v in net.nodes() {
        let reference = match net.kind(v) {
            NodeKind::UnitInactive | NodeKind::UnitActive | NodeKind::UnitCompleted => {
                net.section_id(v)
            }
            NodeKind::Join => net.necessary_in_arcs(v),
            NodeKind::Condition => net.condition_id(v),
            NodeKind::Test => net.test_id(v),
            NodeKind::Split => 0,
        };
        let _ = writeln!(
            out,
            "{}\t{}\t{}",
            labels[&v],
            kind_to_type_code(net.kind(v)),
            reference
        );
    }

    out.push_str("@arcs\n");
    out.push_str("\tlabel\tcondition\n");
    for (i, a) in net.arcs().enumerate() {
        let source = labels[&net.arc_source(a)];
        let target = labels[&net.arc_target(a)];
        match net.branch_label(a) {
            Some(branch) if branch == ELSE => {
                let _ = writeln!(out, "{source}\t{target}\t{i}\t{SONST}");
            }
            Some(branch) => {
                let _ = writeln!(out, "{source}\t{target}\t{i}\t{branch}");
            }
            None => {
                let _ = writeln!(out, "{source}\t{target}\t{i}");
            }
        }
    }

    out.push_str("@attributes\n");
    if let Some(target) = net.target() {
        let _ = writeln!(out, "target\t{}", labels[&target]);
    }
    if !net.recommended().is_empty() {
        let rendered: Vec<String> = net
            .recommended()
            .iter()
            .map(|v| labels[v].to_string())
            .collect();
        let _ = writeln!(out, "recommended\t{}", rendered.join(" "));
    }

    out
}

/// Serializes a net like [`write`], additionally appending a `visited`
/// attribute listing the labels of `visited` arcs — the request/response
/// layer's diagnostic arc map from a recommendation's frontier search. Not
/// read back by [`parse`] beyond being silently tolerated as an unknown
/// attribute.
pub fn write_with_visited(net: &LearningNet, visited: &[ArcId]) -> String {
    let mut out = write(net);
    if !visited.is_empty() {
        let labels: HashMap<ArcId, i64> = net.arcs().enumerate().map(|(i, a)| (a, i as i64)).collect();
        let mut ids: Vec<i64> = visited.iter().filter_map(|a| labels.get(a).copied()).collect();
        ids.sort_unstable();
        ids.dedup();
        let rendered: Vec<String> = ids.iter().map(i64::to_string).collect();
        let _ = writeln!(out, "visited\t{}", rendered.join(" "));
    }
    out
}

impl LearningNet {
    pub fn parse(text: &str) -> Result<LearningNet, CoreError> {
        parse(text)
    }

    pub fn to_text(&self) -> String {
        write(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::LearningNet;

    #[test]
    fn round_trips_a_simple_net() {
        let net = LearningNet::create_from_sections(&[1, 2]);
        let text = net.to_text();
        let reparsed = LearningNet::parse(&text).unwrap();
        assert_eq!(reparsed.to_text(), text);
    }

    #[test]
    fn sonst_round_trips_to_the_else_sentinel() {
        let mut net = LearningNet::new();
        let c = net.add_node(NodeKind::Condition, 0);
        let u1 = net.add_node(NodeKind::UnitInactive, 1);
        let u2 = net.add_node(NodeKind::UnitInactive, 2);
        net.add_arc(c, u1, Some("a".to_string()));
        net.add_arc(c, u2, Some(ELSE.to_string()));

        let text = net.to_text();
        assert!(text.contains(SONST));

        let reparsed = LearningNet::parse(&text).unwrap();
        let c2 = reparsed
            .nodes()
            .find(|&v| reparsed.kind(v) == NodeKind::Condition)
            .unwrap();
        let else_arc = reparsed
            .out_arcs(c2)
            .iter()
            .find(|&&a| reparsed.branch_label(a) == Some(ELSE))
            .unwrap();
        assert_eq!(
            reparsed.section_id(reparsed.arc_target(*else_arc)),
            2
        );
    }

    #[test]
    fn write_with_visited_appends_a_tolerated_attribute() {
        let net = LearningNet::create_from_sections(&[1, 2]);
        let arc = net.out_arcs(net.nodes().next().unwrap())[0];
        let text = write_with_visited(&net, &[arc]);
        assert!(text.contains("visited\t"));
        assert!(LearningNet::parse(&text).is_ok());
    }

    #[test]
    fn rejects_an_unknown_node_type() {
        let text = "@nodes\nlabel\ttype\tref\n0\t99\t0\n@arcs\n\tlabel\tcondition\n@attributes\n";
        assert!(LearningNet::parse(text).is_err());
    }

    #[test]
    fn target_and_recommended_attributes_are_read() {
        let text = "@nodes\nlabel\ttype\tref\n0\t0\t1\n1\t20\t1\n@arcs\n\tlabel\tcondition\n0\t1\t0\n@attributes\ntarget\t1\nrecommended\t0 1\n";
        let net = LearningNet::parse(text).unwrap();
        let target = net.target().unwrap();
        assert_eq!(net.kind(target), NodeKind::Join);
        assert_eq!(net.recommended().len(), 2);
    }
}
