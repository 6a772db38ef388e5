//! States and their requirements.

use super::action::Action;
use crate::context::{Context, EntityFilter, EntityQuery};
use regex::Regex;
use std::collections::BTreeSet;

/// A precondition gating a state's main action.
#[derive(Debug, Clone)]
pub struct Requirement {
    /// Slot label, informational
    pub slot: Option<String>,
    /// Entity that must be present
    pub entity: String,
    /// Optional filter the entity's values must pass
    pub filter: Option<EntityFilter>,
    /// Runs instead of the state's action while unmet
    pub action: Action,
}

impl Requirement {
    /// Create a requirement on an entity.
    pub fn new(entity: impl Into<String>, action: Action) -> Self {
        Self {
            slot: None,
            entity: entity.into(),
            filter: None,
            action,
        }
    }

    /// Set the slot label.
    pub fn with_slot(mut self, slot: impl Into<String>) -> Self {
        self.slot = Some(slot.into());
        self
    }

    /// Require at least one value passing the filter.
    pub fn with_filter(mut self, filter: EntityFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Whether the context satisfies this requirement.
    pub fn matches(&self, context: &Context) -> bool {
        if !context.contains(&self.entity) {
            return false;
        }
        match &self.filter {
            Some(filter) => EntityQuery::from_filter(context, &self.entity, filter).count() > 0,
            None => true,
        }
    }
}

/// One node of a flow's state machine.
#[derive(Debug, Clone)]
pub struct State {
    /// Name within its flow, e.g. `root`
    pub name: String,
    /// Main action
    pub action: Option<Action>,
    /// Runs when the state receives input it does not support
    pub unsupported: Option<Action>,
    /// Intent pattern routing into this state
    pub intent: Option<Regex>,
    /// Intent pattern -> destination, consulted before any other intent routing
    pub intent_transitions: Vec<(Regex, String)>,
    /// Preconditions, checked in order
    pub requires: Vec<Requirement>,
    /// Unsupported input leaves for the global root
    pub is_temporary: bool,
    /// Accepts every input, suppressing intent and entity transitions
    pub is_blocking: bool,
    supported: BTreeSet<String>,
}

impl State {
    /// Create a state with no action.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: None,
            unsupported: None,
            intent: None,
            intent_transitions: Vec::new(),
            requires: Vec::new(),
            is_temporary: false,
            is_blocking: false,
            supported: BTreeSet::new(),
        }
    }

    /// Set the main action.
    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    /// Set the unsupported-input handler.
    pub fn with_unsupported(mut self, action: Action) -> Self {
        self.unsupported = Some(action);
        self
    }

    /// Set the intent pattern.
    pub fn with_intent(mut self, pattern: Regex) -> Self {
        self.intent = Some(pattern);
        self
    }

    /// Add an intent-keyed transition.
    pub fn with_intent_transition(
        mut self,
        pattern: Regex,
        destination: impl Into<String>,
    ) -> Self {
        self.intent_transitions.push((pattern, destination.into()));
        self
    }

    /// Add a requirement; its entity becomes supported.
    pub fn with_requirement(mut self, requirement: Requirement) -> Self {
        self.supported.insert(requirement.entity.clone());
        self.requires.push(requirement);
        self
    }

    /// Declare supported entities.
    pub fn with_supported<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported.extend(entities.into_iter().map(Into::into));
        self
    }

    /// Mark the state temporary.
    pub fn temporary(mut self) -> Self {
        self.is_temporary = true;
        self
    }

    /// Mark the state blocking.
    pub fn blocking(mut self) -> Self {
        self.is_blocking = true;
        self
    }

    /// Entities this state handles in place.
    pub fn supported(&self) -> &BTreeSet<String> {
        &self.supported
    }

    /// Whether this state handles a message carrying the given entities.
    pub fn is_supported<I, S>(&self, entities: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.is_blocking
            || entities
                .into_iter()
                .any(|name| self.supported.contains(name.as_ref()))
    }

    /// Whether every requirement is met.
    pub fn check_requirements(&self, context: &Context) -> bool {
        self.requires.iter().all(|r| r.matches(context))
    }

    /// The first unmet requirement, in declared order.
    pub fn first_unmet_requirement(&self, context: &Context) -> Option<&Requirement> {
        self.requires.iter().find(|r| !r.matches(context))
    }

    /// Destination of the first intent transition matching `intent`.
    pub fn get_intent_transition(&self, intent: &str) -> Option<&str> {
        self.intent_transitions
            .iter()
            .find(|(pattern, _)| pattern.is_match(intent))
            .map(|(_, destination)| destination.as_str())
    }
}
