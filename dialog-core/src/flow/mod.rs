//! Declarative state machine: flows, states, requirements and actions.
//!
//! States are not connected by edges. Each transition is computed at
//! runtime by the dialog manager from intent patterns, accepted entities
//! and the states' supported-entity sets.

mod action;
mod definition;
mod graph;
mod state;

pub use action::{Action, ActionRegistry, ActionResult, Destination};
pub use definition::{
    build_flow_graph, load_flow_files, parse_flow_document, read_flow_files, ActionDefinition,
    FlowDefinition, RequirementDefinition, StateDefinition, StaticActionDefinition,
};
pub use graph::{split_state_name, Flow, FlowGraph, DEFAULT_FLOW, GLOBAL_ROOT, ROOT_STATE};
pub use state::{Requirement, State};
