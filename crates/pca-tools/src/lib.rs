//! PCA Tools: Registry, Built-in Tools, Router and Keyword Planner
//!
//! The local implementations of the Tool Registry, Router and Planner
//! capabilities. The orchestrator never depends on this crate directly; the
//! server wires these in when no external collaborators are configured.

pub mod builtin;
pub mod planner;
pub mod registry;
pub mod router;

pub use builtin::expand_path;
pub use planner::{parse_age_days, parse_path, ConstraintSet, KeywordPlanner};
pub use registry::{validate_arguments, FnTool, LocalToolRegistry, Tool};
pub use router::{tokenize, LexicalRouter};
