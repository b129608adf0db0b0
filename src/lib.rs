//! Graph algorithms for *learning nets*: directed acyclic graphs that model
//! branching and joining study paths towards a single target unit.
//!
//! # Main Modules
//!
//! - [`net`]: the typed graph model (nodes, arcs, attributes) plus the
//!   line-oriented textual serialization format.
//! - [`validate`]: per-node well-formedness checks and acyclicity.
//! - [`compress`]: a single-pass contraction that shrinks a net while
//!   preserving target reachability.
//! - [`branch_check`]: enumerates every condition/test branch combination and
//!   verifies the target stays reachable in each.
//! - [`recommend`]: computes the active set of units and recommends a next
//!   unit or a full learning path.
//!
//! # Quick Start
//!
//! ```
//! use learnnet_core::net::LearningNet;
//! use learnnet_core::validate::validate;
//!
//! let net = LearningNet::create_from_sections(&[1, 2, 3]);
//! validate(&net).unwrap();
//! ```

pub mod branch_check;
pub mod compress;
pub mod error;
pub mod net;
pub mod recommend;
pub mod validate;

pub use error::CoreError;
