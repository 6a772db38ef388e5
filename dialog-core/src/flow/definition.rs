//! Declarative flow definitions and their resolution into a [`FlowGraph`].
//!
//! A definition document maps flow names to flows:
//!
//! ```yaml
//! default:
//!   states:
//!     - name: root
//!       action: {text: "Hi! Ask me about the weather."}
//! weather:
//!   intent: "weather|forecast"
//!   accepts: [location]
//!   unsupported: {text: "I only know about the weather."}
//!   states:
//!     - name: root
//!       action: weather.show
//!       require:
//!         - entity: location
//!           message: "Where are you?"
//!     - name: tomorrow
//!       intent: tomorrow
//!       intent_transitions: {"bye": "default.root"}
//!       action: {text: "Sunny.", next: "default.root"}
//!       temporary: true
//! ```

use super::action::{Action, ActionRegistry, Destination};
use super::graph::{Flow, FlowGraph};
use super::state::{Requirement, State};
use crate::context::EntityFilter;
use crate::error::{Error, Result};
use crate::pattern::prefix_pattern;
use crate::response::Response;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

/// An action reference: a registered identifier or a static payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionDefinition {
    /// Identifier resolved through the [`ActionRegistry`]
    Registered(String),
    /// Fixed response
    Static(StaticActionDefinition),
}

/// A static response action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticActionDefinition {
    /// Text to send
    #[serde(default)]
    pub text: Option<String>,
    /// Quick replies attached to the text
    #[serde(default)]
    pub replies: Vec<String>,
    /// Image to send instead of text
    #[serde(default)]
    pub image_url: Option<String>,
    /// Destination after sending; must be a state name
    #[serde(default)]
    pub next: Option<Value>,
}

/// One requirement of a state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementDefinition {
    #[serde(default)]
    pub slot: Option<String>,
    pub entity: String,
    /// Declarative filter rules
    #[serde(default)]
    pub filter: Option<Value>,
    #[serde(default)]
    pub action: Option<ActionDefinition>,
    /// Shorthand for a static text action
    #[serde(default)]
    pub message: Option<String>,
}

/// One state of a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDefinition {
    pub name: String,
    #[serde(default)]
    pub action: Option<ActionDefinition>,
    #[serde(default)]
    pub unsupported: Option<ActionDefinition>,
    #[serde(default)]
    pub intent: Option<String>,
    /// Intent pattern -> destination, in declared order
    #[serde(default)]
    pub intent_transitions: serde_yaml::Mapping,
    #[serde(default, rename = "require")]
    pub requires: Vec<RequirementDefinition>,
    #[serde(default)]
    pub temporary: bool,
    #[serde(default, rename = "block")]
    pub blocking: bool,
    #[serde(default)]
    pub supports: Vec<String>,
}

/// One flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    /// Intent pattern; defaults to the flow name
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub accepts: Vec<String>,
    #[serde(default)]
    pub unsupported: Option<ActionDefinition>,
    pub states: Vec<StateDefinition>,
}

/// Parse a definition document into named flows, keeping document order.
pub fn parse_flow_document(source: &str) -> Result<Vec<(String, FlowDefinition)>> {
    let document: serde_yaml::Mapping = serde_yaml::from_str(source)?;
    document
        .into_iter()
        .map(|(name, definition)| -> Result<(String, FlowDefinition)> {
            let name = name
                .as_str()
                .ok_or_else(|| {
                    Error::configuration(format!("Flow name must be a string: {name:?}"))
                })?
                .to_string();
            let definition: FlowDefinition = serde_yaml::from_value(definition)?;
            Ok((name, definition))
        })
        .collect()
}

/// Read every file matching the glob patterns (`~` expanded) and collect
/// their flows. A flow name may appear in only one file.
pub fn read_flow_files<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<(String, FlowDefinition)>> {
    let mut flows = Vec::new();
    let mut seen = HashSet::new();

    for pattern in patterns {
        let expanded = shellexpand::tilde(pattern.as_ref());
        let entries = glob::glob(&expanded).map_err(|e| {
            Error::configuration(format!("Invalid definition pattern {}: {e}", pattern.as_ref()))
        })?;

        let mut matched = false;
        for entry in entries {
            let path = entry.map_err(|e| Error::Io(e.into()))?;
            matched = true;
            for (name, definition) in read_flow_file(&path)? {
                if !seen.insert(name.clone()) {
                    return Err(Error::configuration(format!(
                        "Duplicate flow {name} in {}",
                        path.display()
                    )));
                }
                flows.push((name, definition));
            }
        }

        if !matched {
            return Err(Error::configuration(format!(
                "Unable to open definition {}",
                pattern.as_ref()
            )));
        }
    }
    Ok(flows)
}

fn read_flow_file(path: &Path) -> Result<Vec<(String, FlowDefinition)>> {
    tracing::info!(path = %path.display(), "Loading flow definitions");
    let source = std::fs::read_to_string(path)?;
    parse_flow_document(&source)
        .map_err(|e| Error::configuration(format!("{}: {e}", path.display())))
}

/// Load flow files and resolve them into a graph.
pub fn load_flow_files<S: AsRef<str>>(
    patterns: &[S],
    registry: &ActionRegistry,
) -> Result<FlowGraph> {
    let definitions = read_flow_files(patterns)?;
    build_flow_graph(definitions, registry)
}

/// Resolve definitions against the registry into a shared graph.
pub fn build_flow_graph(
    definitions: Vec<(String, FlowDefinition)>,
    registry: &ActionRegistry,
) -> Result<FlowGraph> {
    let flows = definitions
        .into_iter()
        .map(|(name, definition)| build_flow(&name, definition, registry))
        .collect::<Result<Vec<_>>>()?;
    FlowGraph::new(flows)
}

fn build_flow(name: &str, definition: FlowDefinition, registry: &ActionRegistry) -> Result<Flow> {
    let mut flow = Flow::new(name)?.with_accepts(definition.accepts);
    if let Some(intent) = &definition.intent {
        flow = flow.with_intent(prefix_pattern(intent)?);
    }
    if let Some(unsupported) = &definition.unsupported {
        flow = flow.with_unsupported(build_action(
            &format!("{name}.unsupported"),
            unsupported,
            registry,
        )?);
    }
    for state in definition.states {
        flow.add_state(build_state(name, state, registry)?)?;
    }
    Ok(flow)
}

fn build_state(
    flow: &str,
    definition: StateDefinition,
    registry: &ActionRegistry,
) -> Result<State> {
    let label = format!("{flow}.{}", definition.name);
    let mut state = State::new(&definition.name).with_supported(definition.supports);

    if let Some(action) = &definition.action {
        state = state.with_action(build_action(&label, action, registry)?);
    }
    if let Some(unsupported) = &definition.unsupported {
        state = state.with_unsupported(build_action(
            &format!("{label}.unsupported"),
            unsupported,
            registry,
        )?);
    }
    if let Some(intent) = &definition.intent {
        state = state.with_intent(prefix_pattern(intent)?);
    }
    for (pattern, destination) in &definition.intent_transitions {
        let (Some(pattern), Some(destination)) = (pattern.as_str(), destination.as_str()) else {
            return Err(Error::configuration(format!(
                "Intent transitions of {label} must map patterns to state names"
            )));
        };
        state = state.with_intent_transition(prefix_pattern(pattern)?, destination);
    }
    for (i, requirement) in definition.requires.iter().enumerate() {
        state = state.with_requirement(build_requirement(
            &format!("{label}.require[{i}]"),
            requirement,
            registry,
        )?);
    }
    if definition.temporary {
        state = state.temporary();
    }
    if definition.blocking {
        state = state.blocking();
    }
    Ok(state)
}

fn build_requirement(
    label: &str,
    definition: &RequirementDefinition,
    registry: &ActionRegistry,
) -> Result<Requirement> {
    let action = match (&definition.action, &definition.message) {
        (Some(action), _) => build_action(label, action, registry)?,
        (None, Some(message)) => Action::respond(label, vec![Response::text(message)], None),
        (None, None) => {
            return Err(Error::configuration(format!(
                "Requirement {label} has no message nor action"
            )))
        }
    };
    let mut requirement = Requirement::new(&definition.entity, action);
    if let Some(slot) = &definition.slot {
        requirement = requirement.with_slot(slot);
    }
    if let Some(filter) = &definition.filter {
        requirement = requirement.with_filter(EntityFilter::compile(filter)?);
    }
    Ok(requirement)
}

fn build_action(
    label: &str,
    definition: &ActionDefinition,
    registry: &ActionRegistry,
) -> Result<Action> {
    match definition {
        ActionDefinition::Registered(id) => registry.resolve(id),
        ActionDefinition::Static(payload) => build_static_action(label, payload),
    }
}

fn build_static_action(label: &str, definition: &StaticActionDefinition) -> Result<Action> {
    let response = match (&definition.text, &definition.image_url) {
        (Some(text), _) => Response::text(text).with_replies(definition.replies.iter().cloned()),
        (None, Some(url)) => Response::image(url),
        (None, None) => {
            return Err(Error::configuration(format!(
                "Unknown action in {label}: expected text or image_url"
            )))
        }
    };
    let next = match &definition.next {
        None | Some(Value::Null) => None,
        Some(Value::String(name)) => Some(Destination::name(name)),
        Some(other) => {
            return Err(Error::configuration(format!(
                "Action in {label} must return either nothing or a state name, got {other}"
            )))
        }
    };
    Ok(Action::respond(label, vec![response], next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const WEATHER: &str = r#"
default:
  states:
    - name: root
      action: {text: "Hi!", replies: ["Weather"]}
weather:
  intent: "weather|forecast"
  accepts: [location]
  unsupported: {text: "Weather only."}
  states:
    - name: root
      action: weather.show
      supports: [date]
      require:
        - slot: where
          entity: location
          message: "Where are you?"
        - entity: date
          action: weather.ask_date
          filter:
            - newer: {messages: 3}
    - name: tomorrow
      intent: tomorrow
      intent_transitions: {"bye": "default.root", "thanks": "root"}
      action: {image_url: "http://x/sun.png", next: "default.root"}
      temporary: true
      block: true
"#;

    fn registry() -> ActionRegistry {
        let mut registry = ActionRegistry::new();
        registry
            .register_fn("weather.show", |_| Ok(None))
            .register_fn("weather.ask_date", |_| Ok(None));
        registry
    }

    #[test]
    fn test_parse_keeps_document_order() {
        let flows = parse_flow_document(WEATHER).unwrap();
        let names: Vec<&str> = flows.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["default", "weather"]);

        let weather = &flows[1].1;
        assert_eq!(weather.accepts, vec!["location"]);
        assert_eq!(weather.states[0].requires.len(), 2);
        assert!(weather.states[1].temporary);
        assert!(weather.states[1].blocking);
        assert_eq!(
            weather.states[0].action,
            Some(ActionDefinition::Registered("weather.show".into()))
        );
    }

    #[test]
    fn test_build_graph() {
        let graph = build_flow_graph(parse_flow_document(WEATHER).unwrap(), &registry()).unwrap();
        let weather = graph.get_flow("weather").unwrap();
        assert!(weather.matches_intent("forecast"));
        assert!(weather.unsupported().is_some());

        let root = graph.get_state("weather.root").unwrap();
        assert_eq!(root.action.as_ref().unwrap().id(), "weather.show");
        assert_eq!(root.requires[0].slot.as_deref(), Some("where"));
        assert!(root.requires[1].filter.is_some());
        assert!(root.is_supported(["location"]));
        assert!(root.is_supported(["date"]));

        let tomorrow = graph.get_state("weather.tomorrow").unwrap();
        assert_eq!(tomorrow.get_intent_transition("bye"), Some("default.root"));
        assert_eq!(tomorrow.get_intent_transition("thanks_a_lot"), Some("root"));
        assert!(tomorrow.is_temporary && tomorrow.is_blocking);
    }

    #[test]
    fn test_unregistered_action_fails_load() {
        let err = build_flow_graph(parse_flow_document(WEATHER).unwrap(), &ActionRegistry::new())
            .unwrap_err();
        assert!(matches!(err, Error::UnregisteredAction { .. }));
    }

    #[test]
    fn test_static_action_next_must_be_a_name() {
        let source = r#"
default:
  states:
    - name: root
      action: {text: "Hi", next: 3}
"#;
        let err = build_flow_graph(parse_flow_document(source).unwrap(), &registry()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_requirement_without_action() {
        let source = r#"
default:
  states:
    - name: root
      require:
        - entity: name
"#;
        let err = build_flow_graph(parse_flow_document(source).unwrap(), &registry()).unwrap_err();
        assert!(err.to_string().contains("no message nor action"));
    }

    #[test]
    fn test_read_files_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, body: &str| {
            let mut file = std::fs::File::create(dir.path().join(name)).unwrap();
            file.write_all(body.as_bytes()).unwrap();
        };
        write("a.yaml", "default:\n  states:\n    - name: root\n");
        write("b.yaml", "shop:\n  states:\n    - name: root\n");

        let pattern = format!("{}/*.yaml", dir.path().display());
        let flows = read_flow_files(&[pattern.clone()]).unwrap();
        let names: Vec<&str> = flows.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["default", "shop"]);
        assert!(load_flow_files(&[pattern.clone()], &registry()).is_ok());

        write("c.yaml", "shop:\n  states:\n    - name: other\n");
        let err = read_flow_files(&[pattern]).unwrap_err();
        assert!(err.to_string().contains("Duplicate flow shop"));

        let missing = format!("{}/*.yml", dir.path().display());
        assert!(read_flow_files(&[missing]).is_err());
    }
}
