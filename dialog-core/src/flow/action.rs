//! Actions and the registry that resolves declared action identifiers.

use crate::dialog::DialogManager;
use crate::error::{Error, Result};
use crate::response::Response;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Where the conversation should go next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// `state` or `flow.state`; a trailing `:` also runs the destination's action
    Name(String),
    /// 1-based index into the visited-state history
    History(usize),
}

impl Destination {
    /// Destination by name.
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    /// Destination by name that runs the state's action on arrival.
    pub fn run(name: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        if name.ends_with(':') {
            Self::Name(name.to_string())
        } else {
            Self::Name(format!("{name}:"))
        }
    }

    /// Destination by position in the visited-state history.
    pub fn history(index: usize) -> Self {
        Self::History(index)
    }
}

impl From<&str> for Destination {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for Destination {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "{name}"),
            Self::History(index) => write!(f, "history[{index}]"),
        }
    }
}

/// Outcome of running an action: stay put, or move somewhere.
pub type ActionResult = Result<Option<Destination>>;

type Handler = dyn Fn(&mut DialogManager) -> ActionResult + Send + Sync;

/// A named, shareable action handler.
#[derive(Clone)]
pub struct Action {
    id: String,
    handler: Arc<Handler>,
}

impl Action {
    /// Wrap a handler under an identifier.
    pub fn new<F>(id: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut DialogManager) -> ActionResult + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            handler: Arc::new(handler),
        }
    }

    /// An action that sends fixed responses, then optionally moves on.
    pub fn respond(
        id: impl Into<String>,
        responses: Vec<Response>,
        next: Option<Destination>,
    ) -> Self {
        Self::new(id, move |dialog| {
            dialog.send_responses(&responses)?;
            Ok(next.clone())
        })
    }

    /// Identifier used in logs and definitions.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run the handler against a dialog.
    pub fn run(&self, dialog: &mut DialogManager) -> ActionResult {
        (self.handler)(dialog)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action").field("id", &self.id).finish()
    }
}

/// Registry mapping declared action identifiers to handlers.
///
/// Populated once at startup, before flow definitions are resolved.
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Action>,
}

impl ActionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action under its identifier, replacing any previous one.
    pub fn register(&mut self, action: Action) -> &mut Self {
        if self.actions.contains_key(action.id()) {
            tracing::warn!(action = action.id(), "Replacing registered action");
        }
        self.actions.insert(action.id().to_string(), action);
        self
    }

    /// Register a closure as an action.
    pub fn register_fn<F>(&mut self, id: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&mut DialogManager) -> ActionResult + Send + Sync + 'static,
    {
        self.register(Action::new(id, handler))
    }

    /// Look up an action.
    pub fn get(&self, id: &str) -> Option<&Action> {
        self.actions.get(id)
    }

    /// Look up an action, failing on unknown identifiers.
    pub fn resolve(&self, id: &str) -> Result<Action> {
        self.get(id)
            .cloned()
            .ok_or_else(|| Error::unregistered_action(id))
    }

    /// Whether an identifier is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.actions.contains_key(id)
    }

    /// Registered identifiers, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
