//! Flows and the process-wide flow graph.

use super::action::Action;
use super::state::State;
use crate::error::{Error, Result};
use crate::pattern::prefix_pattern;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};

/// Flow every conversation starts and falls back to.
pub const DEFAULT_FLOW: &str = "default";

/// Name of the entry state of every flow.
pub const ROOT_STATE: &str = "root";

/// Fully qualified global root state.
pub const GLOBAL_ROOT: &str = "default.root";

/// A named group of related states.
#[derive(Debug, Clone)]
pub struct Flow {
    name: String,
    intent: Regex,
    accepted: BTreeSet<String>,
    states: Vec<State>,
    index: HashMap<String, usize>,
    unsupported: Option<Action>,
}

impl Flow {
    /// Create a flow whose intent pattern is its own name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let intent = prefix_pattern(&regex::escape(&name))?;
        Ok(Self {
            name,
            intent,
            accepted: BTreeSet::new(),
            states: Vec::new(),
            index: HashMap::new(),
            unsupported: None,
        })
    }

    /// Set the pattern of intents routed into this flow.
    pub fn with_intent(mut self, pattern: Regex) -> Self {
        self.intent = pattern;
        self
    }

    /// Declare entities that pull the conversation into this flow.
    pub fn with_accepts<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.accepted.extend(entities.into_iter().map(Into::into));
        self
    }

    /// Set the flow-level unsupported-input handler.
    pub fn with_unsupported(mut self, action: Action) -> Self {
        self.unsupported = Some(action);
        self
    }

    /// Add a state. State names must be unique within the flow.
    pub fn with_state(mut self, state: State) -> Result<Self> {
        self.add_state(state)?;
        Ok(self)
    }

    /// Add a state. State names must be unique within the flow.
    pub fn add_state(&mut self, state: State) -> Result<()> {
        if self.index.contains_key(&state.name) {
            return Err(Error::configuration(format!(
                "Duplicate state {}.{}",
                self.name, state.name
            )));
        }
        self.index.insert(state.name.clone(), self.states.len());
        self.states.push(state);
        Ok(())
    }

    /// Flow name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Flow-level unsupported-input handler.
    pub fn unsupported(&self) -> Option<&Action> {
        self.unsupported.as_ref()
    }

    /// Entities this flow accepts.
    pub fn accepted(&self) -> &BTreeSet<String> {
        &self.accepted
    }

    /// Look up a state by its name within the flow.
    pub fn get_state(&self, name: &str) -> Option<&State> {
        self.index.get(name).map(|&i| &self.states[i])
    }

    /// States in declared order.
    pub fn states(&self) -> impl Iterator<Item = &State> {
        self.states.iter()
    }

    /// Qualified name of the first state whose intent pattern matches.
    pub fn get_state_for_intent(&self, intent: &str) -> Option<String> {
        self.states
            .iter()
            .find(|state| state.intent.as_ref().is_some_and(|p| p.is_match(intent)))
            .map(|state| self.qualify(&state.name))
    }

    /// Whether the flow's intent pattern matches an incoming intent.
    pub fn matches_intent(&self, intent: &str) -> bool {
        self.intent.is_match(intent)
    }

    /// Whether the flow accepts at least one of the given entities.
    pub fn accepts_message<I, S>(&self, entities: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        entities
            .into_iter()
            .any(|name| self.accepted.contains(name.as_ref()))
    }

    /// `flow.state` for a state of this flow.
    pub fn qualify(&self, state: &str) -> String {
        format!("{}.{state}", self.name)
    }

    /// Qualified name of the flow's root state.
    pub fn root(&self) -> String {
        self.qualify(ROOT_STATE)
    }
}

/// All flows, immutable once built and shared across sessions.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    flows: Vec<Flow>,
    index: HashMap<String, usize>,
}

impl FlowGraph {
    /// Build a graph. Flow names must be unique and the global root must exist.
    pub fn new(flows: Vec<Flow>) -> Result<Self> {
        let mut index = HashMap::new();
        for (i, flow) in flows.iter().enumerate() {
            if index.insert(flow.name.clone(), i).is_some() {
                return Err(Error::configuration(format!(
                    "Duplicate flow {}",
                    flow.name
                )));
            }
        }
        let graph = Self { flows, index };
        if graph.get_state(GLOBAL_ROOT).is_none() {
            return Err(Error::configuration(format!(
                "Flow definitions must contain the {GLOBAL_ROOT} state"
            )));
        }
        tracing::debug!(flows = graph.flows.len(), "Flow graph built");
        Ok(graph)
    }

    /// Look up a flow.
    pub fn get_flow(&self, name: &str) -> Option<&Flow> {
        self.index.get(name).map(|&i| &self.flows[i])
    }

    /// Look up a state by its qualified `flow.state` name.
    pub fn get_state(&self, qualified: &str) -> Option<&State> {
        let (flow, state) = split_state_name(qualified)?;
        self.get_flow(flow)?.get_state(state)
    }

    /// Flows in declared order.
    pub fn flows(&self) -> impl Iterator<Item = &Flow> {
        self.flows.iter()
    }

    /// Number of flows.
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    /// Whether the graph has no flows.
    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

/// Split `flow.state` at the first dot.
pub fn split_state_name(qualified: &str) -> Option<(&str, &str)> {
    qualified.split_once('.')
}
