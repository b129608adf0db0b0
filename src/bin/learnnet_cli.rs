//! Thin JSON request/response translation layer over the core library,
//! mirroring `biodivine_scc.rs`'s shape: a `clap::Parser` for logging
//! verbosity, the actual request read from `argv[1]` or stdin, dispatch into
//! `learnnet_core`, and the textual net / diagnostics written to stdout with
//! the exit codes from spec.md §6.
//!
//! This binary is the only place in the crate that knows about JSON — the
//! core library (`check`/`create`/`recommend` dispatch aside) never depends
//! on `serde_json`.

use std::collections::HashMap;
use std::io::Read;

use clap::Parser;
use env_logger::Builder;
use log::{info, LevelFilter};
use serde::Deserialize;

use learnnet_core::branch_check::{self, DEFAULT_TIME_BUDGET};
use learnnet_core::compress::{self, CompressionOutcome};
use learnnet_core::net::format::write_with_visited;
use learnnet_core::net::{LearningNet, NodeId};
use learnnet_core::recommend::{ConditionValues, NodeCosts, NodePairCosts, Recommender, TestGrades};
use learnnet_core::validate;
use learnnet_core::CoreError;

#[derive(Parser)]
#[command(name = "learnnet_cli")]
#[command(about = "Validate, create and recommend paths through learning nets")]
struct Args {
    /// JSON request object. Read from stdin when omitted.
    #[arg(value_name = "JSON")]
    request: Option<String>,

    /// Logging verbosity (use -v for info, or -v=LEVEL for specific level)
    #[arg(long, short = 'v', value_name = "LEVEL", num_args = 0..=1, default_missing_value = "info", require_equals = true)]
    verbose: Option<Option<LogLevel>>,
}

#[derive(Clone, clap::ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
}

impl From<LogLevel> for LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Trace => LevelFilter::Trace,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    action: String,
    network: Option<String>,
    sections: Option<Vec<String>>,
    conditions: Option<Vec<Vec<String>>>,
    test_grades: Option<HashMap<String, String>>,
    rec_type: Option<String>,
    node_costs: Option<Vec<NodeCostEntry>>,
    node_pair_costs: Option<Vec<NodePairCostEntry>>,
}

#[derive(Deserialize)]
struct NodeCostEntry {
    weight: f64,
    costs: HashMap<String, f64>,
}

#[derive(Deserialize)]
struct NodePairCostEntry {
    weight: f64,
    costs: HashMap<String, HashMap<String, f64>>,
}

fn main() {
    let args = Args::parse();

    let log_level = match args.verbose {
        None => LevelFilter::Off,
        Some(None) => LevelFilter::Info,
        Some(Some(level)) => level.into(),
    };
    Builder::from_default_env().filter_level(log_level).init();

    let raw = match args.request {
        Some(r) => r,
        None => {
            let mut buf = String::new();
            if let Err(e) = std::io::stdin().read_to_string(&mut buf) {
                eprintln!("failed to read request from stdin: {e}");
                std::process::exit(2);
            }
            buf
        }
    };

    let request: Request = match serde_json::from_str(&raw) {
        Ok(r) => r,
        Err(e) => {
            println!("parse error: malformed request JSON: {e}");
            std::process::exit(1);
        }
    };

    let exit_code = match request.action.as_str() {
        "check" => run_check(&request),
        "create" => run_create(&request),
        "recommend" => run_recommend(&request),
        other => {
            println!("parse error: unknown action {other:?}");
            1
        }
    };

    std::process::exit(exit_code);
}

fn parse_network(request: &Request) -> Result<LearningNet, i32> {
    let Some(text) = &request.network else {
        println!("parse error: action requires a \"network\" field");
        return Err(1);
    };
    LearningNet::parse(text).map_err(|e| {
        println!("{e}");
        1
    })
}

fn parse_sections(values: &[String]) -> Result<Vec<i64>, i32> {
    values
        .iter()
        .map(|s| {
            s.parse::<i64>().map_err(|_| {
                println!("parse error: section id {s:?} is not an integer");
                1
            })
        })
        .collect()
}

/// `check`: validate, then (unless the net has no Condition/Test nodes)
/// compress and, if compression didn't already settle it, enumerate every
/// branch combination.
fn run_check(request: &Request) -> i32 {
    let net = match parse_network(request) {
        Ok(net) => net,
        Err(code) => return code,
    };

    match check_net(net) {
        Ok(()) => {
            info!("check: net is valid");
            println!("valid");
            0
        }
        Err(e) => {
            info!("check: net is invalid");
            println!("{e}");
            1
        }
    }
}

fn check_net(mut net: LearningNet) -> Result<(), CoreError> {
    validate::validate(&net)?;

    match compress::compress(&mut net)? {
        CompressionOutcome::TargetReachable => Ok(()),
        CompressionOutcome::Continue => branch_check::check_branches(&mut net, DEFAULT_TIME_BUDGET),
    }
}

/// `create`: build a fresh net from `sections`, one join-to-target per spec.md §4.1.
fn run_create(request: &Request) -> i32 {
    let Some(sections) = &request.sections else {
        println!("parse error: \"create\" requires a \"sections\" field");
        return 1;
    };
    let sections = match parse_sections(sections) {
        Ok(s) => s,
        Err(code) => return code,
    };

    let net = LearningNet::create_from_sections(&sections);
    info!("create: built a net with {} sections", sections.len());
    println!("{}", net.to_text());
    0
}

/// `recommend`: mark completed sections, compute the active set, and (per
/// `recType`) report it directly or extend it into a next-unit pick or a
/// full path, weighted by whichever cost maps were supplied (spec.md §6).
fn run_recommend(request: &Request) -> i32 {
    let mut net = match parse_network(request) {
        Ok(net) => net,
        Err(code) => return code,
    };

    let mut had_inconsistency = false;
    if let Some(sections) = &request.sections {
        let sections = match parse_sections(sections) {
            Ok(s) => s,
            Err(code) => return code,
        };
        let not_found = net.set_completed(&sections);
        if !not_found.is_empty() {
            println!("input inconsistency: unknown section ids marked completed: {not_found:?}");
            had_inconsistency = true;
        }
    }

    let conditions = parse_conditions(request.conditions.as_deref());
    let test_grades = match parse_test_grades(request.test_grades.as_ref()) {
        Ok(g) => g,
        Err(code) => return code,
    };

    // Cost maps are derived from the net's current unit/section layout before
    // `Recommender` takes an exclusive borrow of `net` for the traversal.
    let use_pair_costs = request.node_pair_costs.is_some();
    let node_costs = build_node_costs(request, &net);
    let node_pair_costs = build_node_pair_costs(request, &net);

    let mut recommender = Recommender::new(&mut net, conditions, test_grades);
    let rec_type = request.rec_type.as_deref().unwrap_or("active");

    let path = match rec_type {
        "active" => Vec::new(),
        "next" => {
            let next = if use_pair_costs {
                recommender.rec_next_by_node_pair_cost(&node_pair_costs, None)
            } else {
                recommender.rec_next_by_node_cost(&node_costs)
            };
            next.into_iter().collect()
        }
        "path" => {
            if use_pair_costs {
                recommender.rec_path_by_node_pair_cost(&node_pair_costs)
            } else {
                recommender.rec_path_by_node_cost(&node_costs)
            }
        }
        other => {
            println!("parse error: unknown recType {other:?}");
            return 1;
        }
    };

    had_inconsistency |= !recommender.diagnostics().messages().is_empty();
    for message in recommender.diagnostics().messages() {
        println!("input inconsistency: {message}");
    }

    net.set_recommended(path);
    info!(
        "recommend: {} active units, recType={rec_type}",
        recommender.active_set().len()
    );
    println!("{}", write_with_visited(&net, recommender.visited_arcs()));

    if had_inconsistency {
        1
    } else {
        0
    }
}

fn parse_conditions(conditions: Option<&[Vec<String>]>) -> ConditionValues {
    let mut map = ConditionValues::new();
    if let Some(conditions) = conditions {
        for (id, values) in conditions.iter().enumerate() {
            map.insert(id as i64, values.clone());
        }
    }
    map
}

fn parse_test_grades(test_grades: Option<&HashMap<String, String>>) -> Result<TestGrades, i32> {
    let mut map = TestGrades::new();
    if let Some(test_grades) = test_grades {
        for (id, grade) in test_grades {
            let id: i64 = id.parse().map_err(|_| {
                println!("parse error: test id {id:?} is not an integer");
                1
            })?;
            let grade: i64 = grade.parse().map_err(|_| {
                println!("parse error: test grade {grade:?} is not an integer");
                1
            })?;
            map.insert(id, grade);
        }
    }
    Ok(map)
}

/// The combined weight `W` from spec.md §6's cost-weighting formula: the sum
/// of every supplied cost entry's weight, across both node and node-pair costs.
fn combined_weight(node_costs: &[NodeCostEntry], node_pair_costs: &[NodePairCostEntry]) -> f64 {
    node_costs.iter().map(|e| e.weight).sum::<f64>()
        + node_pair_costs.iter().map(|e| e.weight).sum::<f64>()
}

fn node_cost_for_section(section: i64, node_costs: &[NodeCostEntry], weight: f64) -> f64 {
    if weight == 0.0 {
        return 0.0;
    }
    let key = section.to_string();
    node_costs
        .iter()
        .map(|e| e.costs.get(&key).copied().unwrap_or(0.0) * e.weight)
        .sum::<f64>()
        / weight
}

fn node_pair_cost_for_sections(
    from: i64,
    to: i64,
    node_costs: &[NodeCostEntry],
    node_pair_costs: &[NodePairCostEntry],
    weight: f64,
) -> f64 {
    if weight == 0.0 {
        return 0.0;
    }
    let to_key = to.to_string();
    let node_part: f64 = node_costs
        .iter()
        .map(|e| e.costs.get(&to_key).copied().unwrap_or(0.0) * e.weight)
        .sum();
    let from_key = from.to_string();
    let pair_part: f64 = node_pair_costs
        .iter()
        .map(|e| {
            e.costs
                .get(&from_key)
                .and_then(|row| row.get(&to_key))
                .copied()
                .unwrap_or(0.0)
                * e.weight
        })
        .sum();
    (node_part + pair_part) / weight
}

fn build_node_costs(request: &Request, net: &LearningNet) -> NodeCosts {
    let node_costs = request.node_costs.as_deref().unwrap_or(&[]);
    let node_pair_costs = request.node_pair_costs.as_deref().unwrap_or(&[]);
    let weight = combined_weight(node_costs, node_pair_costs);

    net.nodes()
        .filter(|&v| net.kind(v).is_unit())
        .map(|v| (v, node_cost_for_section(net.section_id(v), node_costs, weight)))
        .collect()
}

fn build_node_pair_costs(request: &Request, net: &LearningNet) -> NodePairCosts {
    let node_costs = request.node_costs.as_deref().unwrap_or(&[]);
    let node_pair_costs = request.node_pair_costs.as_deref().unwrap_or(&[]);
    let weight = combined_weight(node_costs, node_pair_costs);

    let units: Vec<NodeId> = net.nodes().filter(|&v| net.kind(v).is_unit()).collect();
    units
        .iter()
        .map(|&from| {
            let row: HashMap<NodeId, f64> = units
                .iter()
                .map(|&to| {
                    let cost = node_pair_cost_for_sections(
                        net.section_id(from),
                        net.section_id(to),
                        node_costs,
                        node_pair_costs,
                        weight,
                    );
                    (to, cost)
                })
                .collect();
            (from, row)
        })
        .collect()
}

