//! Per-session transition resolution, action dispatch and persistence.
//!
//! For every content message the manager advances the context counter,
//! merges the incoming entities and then resolves the next state in
//! strict priority order:
//!
//! 1. an explicit `_state` request set this turn
//! 2. an `intent` set this turn, unless the current state supports the input
//! 3. an entity accepted by some flow, unless the current state supports it
//! 4. otherwise the current state's action re-runs (supported input) or an
//!    `unsupported` handler runs, falling back to the global root
//!
//! Action failures never end the session: they are logged with a context
//! dump, answered with the configured error message and re-raised only for
//! test sessions.

use super::session::{ChatSession, MessageType};
use crate::channel::{ChannelAdapter, RecordingChannel};
use crate::config::DialogConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::flow::{
    split_state_name, Action, Destination, Flow, FlowGraph, State, DEFAULT_FLOW, GLOBAL_ROOT,
};
use crate::logging::{MessageLogger, TracingMessageLogger};
use crate::recording::{ConversationRecorder, RECORDING_USAGE};
use crate::response::Response;
use crate::scheduler::{CallbackKind, CallbackTime, ManualScheduler, ScheduledCallback, Scheduler};
use crate::store::{
    InMemoryStore, KeyValueStore, CHAT_SESSION, SESSION_ACTIVE, SESSION_CONTEXT,
    SESSION_INTERFACE, SESSION_STATE, VERSION_KEY,
};
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Entity naming a state to move to this turn.
pub const REQUESTED_STATE: &str = "_state";
/// Entity carrying the classified intent.
pub const INTENT: &str = "intent";
/// Entity carrying the raw message text.
pub const MESSAGE_TEXT: &str = "_message_text";
/// Entity set by scheduled callbacks.
pub const SCHEDULE: &str = "_schedule";
/// Entity set by inactivity callbacks.
pub const INACTIVE: &str = "_inactive";
/// Entity controlling the conversation test recorder.
pub const TEST_RECORD: &str = "test_record";

const VERSION_COMMAND: &str = "/version";
const INTENT_COMMAND: &str = "/intent/";

/// How [`DialogManager::move_to_with`] records and announces a move.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoveOptions {
    /// Restoring a session: no history entry, no notification, no action
    pub initializing: bool,
    /// Record the move even if the destination is the current state
    pub save_identical: bool,
}

impl MoveOptions {
    /// Options for restoring a persisted state.
    pub fn initializing() -> Self {
        Self {
            initializing: true,
            save_identical: false,
        }
    }

    /// Options that record a move to the current state.
    pub fn save_identical() -> Self {
        Self {
            initializing: false,
            save_identical: true,
        }
    }
}

/// Builder for [`DialogManager`].
pub struct DialogManagerBuilder {
    session: ChatSession,
    flows: Arc<FlowGraph>,
    config: Option<Arc<DialogConfig>>,
    store: Option<Arc<dyn KeyValueStore>>,
    channel: Option<Arc<dyn ChannelAdapter>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    logger: Option<Arc<dyn MessageLogger>>,
    recorder: Option<ConversationRecorder>,
}

impl DialogManagerBuilder {
    /// Start building a manager for a session over a flow graph.
    pub fn new(session: ChatSession, flows: Arc<FlowGraph>) -> Self {
        Self {
            session,
            flows,
            config: None,
            store: None,
            channel: None,
            scheduler: None,
            logger: None,
            recorder: None,
        }
    }

    /// Set the configuration.
    pub fn config(mut self, config: impl Into<Arc<DialogConfig>>) -> Self {
        self.config = Some(config.into());
        self
    }

    /// Set the session store. Defaults to a private in-memory store.
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the channel adapter. Defaults to a [`RecordingChannel`].
    pub fn channel(mut self, channel: Arc<dyn ChannelAdapter>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Set the scheduler. Defaults to a [`ManualScheduler`].
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Set the message logger. Defaults to a [`TracingMessageLogger`]
    /// gated by `should_log_messages`.
    pub fn logger(mut self, logger: Arc<dyn MessageLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Share a test recorder across managers.
    pub fn recorder(mut self, recorder: ConversationRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Build the manager, restoring the persisted session if compatible.
    pub fn build(self) -> Result<DialogManager> {
        let config = self.config.unwrap_or_default();
        let logger = self
            .logger
            .unwrap_or_else(|| Arc::new(TracingMessageLogger::new(config.should_log_messages)));
        let mut context = Context::with_limits(config.max_depth, config.history_limit);
        context.set_current_state(GLOBAL_ROOT);

        let mut dialog = DialogManager {
            session: self.session,
            flows: self.flows,
            store: self.store.unwrap_or_else(|| Arc::new(InMemoryStore::new())),
            channel: self.channel.unwrap_or_else(|| Arc::new(RecordingChannel::new())),
            scheduler: self.scheduler.unwrap_or_else(|| Arc::new(ManualScheduler::new())),
            logger,
            recorder: self.recorder.unwrap_or_default(),
            config,
            context,
            current_state: GLOBAL_ROOT.to_string(),
            recording: false,
        };
        dialog.restore()?;
        Ok(dialog)
    }
}

/// Orchestrates one conversation: owns its context and current state.
///
/// Messages for one session must be processed one at a time.
pub struct DialogManager {
    session: ChatSession,
    config: Arc<DialogConfig>,
    flows: Arc<FlowGraph>,
    store: Arc<dyn KeyValueStore>,
    channel: Arc<dyn ChannelAdapter>,
    scheduler: Arc<dyn Scheduler>,
    logger: Arc<dyn MessageLogger>,
    recorder: ConversationRecorder,
    context: Context,
    current_state: String,
    recording: bool,
}

impl DialogManager {
    /// Start building a manager.
    pub fn builder(session: ChatSession, flows: Arc<FlowGraph>) -> DialogManagerBuilder {
        DialogManagerBuilder::new(session, flows)
    }

    fn restore(&mut self) -> Result<()> {
        let chat_id = self.session.chat_id.clone();
        info!(chat_id = %chat_id, "Initializing dialog");

        let version = self.store.get(VERSION_KEY)?;
        let compatible = version.as_deref() == Some(self.config.version.as_str());
        if !compatible || !self.store.hash_exists(SESSION_CONTEXT, &chat_id)? {
            info!(chat_id = %chat_id, "Creating new session");
            self.logger.log_user(&self.session);
            return Ok(());
        }

        let mut state = self.store.hash_get(SESSION_STATE, &chat_id)?.unwrap_or_default();
        if state.is_empty() {
            error!(chat_id = %chat_id, "State was empty, sending user to {GLOBAL_ROOT}");
            state = GLOBAL_ROOT.to_string();
        }
        // never re-run an action on restore
        let state = state.trim_end_matches(':').to_string();
        info!(chat_id = %chat_id, state = %state, "Session exists");
        self.move_to_with(state, MoveOptions::initializing())?;

        let raw = self.store.hash_get(SESSION_CONTEXT, &chat_id)?.unwrap_or_default();
        match Context::from_json(&raw, self.config.max_depth, self.config.history_limit) {
            Ok(context) => self.context = context,
            Err(err) => warn!(chat_id = %chat_id, error = %err, "Discarding unreadable context"),
        }
        self.context.set_current_state(self.current_state.clone());
        Ok(())
    }

    // ==================== Accessors ====================

    /// The session this manager serves.
    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    /// Conversation memory.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Mutable conversation memory, for actions.
    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    /// Qualified name of the current state.
    pub fn current_state(&self) -> &str {
        &self.current_state
    }

    /// Definition of the current state.
    pub fn get_state(&self) -> Option<&State> {
        self.flows.get_state(&self.current_state)
    }

    /// Flow of the current state.
    pub fn get_flow(&self) -> Option<&Flow> {
        self.flows.get_flow(self.current_flow_name())
    }

    /// The shared flow graph.
    pub fn flows(&self) -> &Arc<FlowGraph> {
        &self.flows
    }

    /// Active configuration.
    pub fn config(&self) -> &DialogConfig {
        &self.config
    }

    /// The conversation test recorder.
    pub fn recorder(&self) -> &ConversationRecorder {
        &self.recorder
    }

    /// Whether the current message is being recorded.
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    fn current_flow_name(&self) -> &str {
        split_state_name(&self.current_state)
            .map(|(flow, _)| flow)
            .unwrap_or(DEFAULT_FLOW)
    }

    // ==================== Message Processing ====================

    /// Process one inbound event with its extracted entities.
    pub fn process(
        &mut self,
        message_type: MessageType,
        entities: Map<String, Value>,
    ) -> Result<()> {
        if !message_type.is_content() {
            debug!(
                chat_id = %self.session.chat_id,
                message_type = ?message_type,
                "Ignoring non-content message"
            );
            return Ok(());
        }

        if let Err(err) = self.channel.processing_start(&self.session) {
            warn!(error = %err, "Channel failed to start processing");
        }
        let accepted_at = Utc::now();
        let accepted_state = self.current_state.clone();
        info!(
            chat_id = %self.session.chat_id,
            state = %accepted_state,
            ">>> Received user message"
        );

        let result = self.handle_message(message_type, entities);

        if let Err(err) = self.channel.processing_end(&self.session) {
            warn!(error = %err, "Channel failed to end processing");
        }
        let entities = result?;
        // logged last so the user does not wait for it
        self.logger.log_user_message(
            &self.session,
            message_type,
            &entities,
            accepted_at,
            &accepted_state,
        );
        Ok(())
    }

    fn handle_message(
        &mut self,
        message_type: MessageType,
        entities: Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        self.context.advance();

        let mut entities: Map<String, Value> =
            entities.into_iter().filter(|(_, v)| !v.is_null()).collect();
        self.context.add_entities(&entities)?;
        debug!("{}", self.context.debug_dump(self.config.debug_max_age));

        if self.test_record_message(message_type, &entities)? || self.special_message()? {
            return Ok(entities);
        }

        if message_type != MessageType::Schedule {
            self.save_inactivity_callback();
        }

        info!(
            chat_id = %self.session.chat_id,
            counter = self.context.counter(),
            ">>> Processing message"
        );
        let names: Vec<String> = entities.keys().cloned().collect();

        if !self.check_state_transition()?
            && !self.check_intent_transition(&names)?
            && !self.check_entity_transition(&names)?
        {
            let flows = Arc::clone(&self.flows);
            let state = flows.get_state(&self.current_state);
            if state.is_some_and(|s| s.is_supported(&names)) {
                self.run_accept()?;
            } else {
                entities.insert("_unsupported".into(), json!([{"value": true}]));
                self.run_unsupported(state)?;
            }
            self.save_state()?;
        }
        Ok(entities)
    }

    /// An explicit `_state` request set this turn always wins.
    fn check_state_transition(&mut self) -> Result<bool> {
        let requested = match self.context.query(REQUESTED_STATE).current_value() {
            None => return Ok(false),
            Some(Value::String(name)) => Destination::name(name.clone()),
            Some(Value::Number(n)) if n.is_u64() => {
                Destination::history(n.as_u64().unwrap_or_default() as usize)
            }
            Some(other) => {
                warn!(value = %other, "Ignoring {REQUESTED_STATE} that is not a state name");
                return Ok(false);
            }
        };
        self.move_to(requested)
    }

    fn check_intent_transition(&mut self, names: &[String]) -> Result<bool> {
        let Some(intent) = self
            .context
            .query(INTENT)
            .current_value()
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return Ok(false);
        };

        let flows = Arc::clone(&self.flows);
        let state = flows.get_state(&self.current_state);
        if state.is_some_and(|s| s.is_supported(names)) {
            return Ok(false);
        }

        let target = state
            .and_then(|s| s.get_intent_transition(&intent))
            .map(str::to_string)
            .or_else(|| {
                flows
                    .get_flow(self.current_flow_name())
                    .and_then(|flow| flow.get_state_for_intent(&intent))
            })
            .or_else(|| {
                flows
                    .flows()
                    .find(|flow| flow.matches_intent(&intent))
                    .map(Flow::root)
            });

        let Some(target) = target else {
            error!(intent = %intent, "Found intent but no flow present for it");
            return Ok(false);
        };
        info!(intent = %intent, "Moving based on intent");
        self.move_to(Destination::run(target))
    }

    fn check_entity_transition(&mut self, names: &[String]) -> Result<bool> {
        let flows = Arc::clone(&self.flows);
        if flows
            .get_state(&self.current_state)
            .is_some_and(|s| s.is_supported(names))
        {
            return Ok(false);
        }

        let target = flows
            .flows()
            .find(|flow| flow.accepts_message(names))
            .map(Flow::root);
        match target {
            Some(root) => {
                info!(state = %root, "Moving by entity");
                self.move_to(Destination::run(root))
            }
            None => Ok(false),
        }
    }

    fn run_unsupported(&mut self, state: Option<&State>) -> Result<()> {
        let flows = Arc::clone(&self.flows);
        let flow = flows.get_flow(self.current_flow_name());

        if let Some(action) = state.and_then(|s| s.unsupported.as_ref()) {
            return self.run_action(action);
        }
        // temporary states skip the flow handler
        if state.is_some_and(|s| s.is_temporary) {
            info!(state = %self.current_state, "Unsupported input in temporary state");
            return self.move_to(Destination::run(GLOBAL_ROOT)).map(|_| ());
        }
        if let Some(action) = flow.and_then(Flow::unsupported) {
            return self.run_action(action);
        }
        self.move_to(Destination::run(GLOBAL_ROOT)).map(|_| ())
    }

    fn test_record_message(
        &mut self,
        message_type: MessageType,
        entities: &Map<String, Value>,
    ) -> Result<bool> {
        self.recording = false;
        let Some((record, age)) = self
            .context
            .get_age(TEST_RECORD, None)
            .map(|(value, age)| (value.value.clone(), age))
        else {
            return Ok(false);
        };

        if age == 0 {
            let response = match record.as_str() {
                Some("start") => self.recorder.start(),
                Some("stop") => self.recorder.stop(),
                _ => {
                    let err = Error::RecordingProtocol(format!("Unknown command {record}"));
                    warn!(error = %err, "Malformed recording command");
                    Response::text(RECORDING_USAGE)
                }
            };
            self.send_response(response)?;
            self.save_state()?;
            return Ok(true);
        }

        if record.as_str() == Some("start") {
            self.recorder.record_user_message(message_type, entities);
            self.recording = true;
        }
        Ok(false)
    }

    fn special_message(&mut self) -> Result<bool> {
        let Some(text) = self
            .context
            .query(MESSAGE_TEXT)
            .current_value()
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return Ok(false);
        };

        if text == VERSION_COMMAND {
            self.send_response(format!("dialog-core dialog manager v{}", self.config.version))?;
            self.save_state()?;
            return Ok(true);
        }
        if let Some(intent) = text.strip_prefix(INTENT_COMMAND) {
            info!(intent, "Forcing intent");
            self.context.set_value(INTENT, intent);
        }
        Ok(false)
    }

    // ==================== Transitions ====================

    /// Move to a destination, running its action if marked with `:`.
    pub fn move_to(&mut self, destination: impl Into<Destination>) -> Result<bool> {
        self.move_to_with(destination, MoveOptions::default())
    }

    /// Move to a destination with explicit options.
    ///
    /// Returns `Ok(false)` and stays in place if the destination does not
    /// exist.
    pub fn move_to_with(
        &mut self,
        destination: impl Into<Destination>,
        options: MoveOptions,
    ) -> Result<bool> {
        let destination = destination.into();
        info!(destination = %destination, "Trying to move");

        let (target, run_action) = self.resolve(&destination);
        if self.flows.get_state(&target).is_none() {
            let err = Error::transition(&target);
            warn!(chat_id = %self.session.chat_id, "{err}. Staying at {}.", self.current_state);
            return Ok(false);
        }

        let identical = target == self.current_state;
        if !options.initializing && (!identical || options.save_identical) {
            self.context.add_state(target.clone());
        }
        let previous = std::mem::replace(&mut self.current_state, target);
        self.context.set_current_state(self.current_state.clone());
        if options.initializing {
            return Ok(true);
        }

        if let Err(err) = self.channel.on_state_change(&self.session, &self.current_state) {
            warn!(error = %err, "Channel failed to observe state change");
        }
        if self.recording {
            self.recorder.record_state_change(&self.current_state);
        }

        match (previous == self.current_state, run_action) {
            (false, true) => info!(
                "Moving from {previous} to {} and executing action",
                self.current_state
            ),
            (true, true) => info!("Staying in state {previous} and executing action"),
            (false, false) => info!(
                "Moving from {previous} to {} and doing nothing",
                self.current_state
            ),
            (true, false) => info!("Staying in state {previous} and doing nothing"),
        }
        if run_action {
            self.run_accept()?;
        }

        self.save_state()?;
        Ok(true)
    }

    /// Qualified target name and the run-action marker.
    fn resolve(&self, destination: &Destination) -> (String, bool) {
        let raw = match destination {
            Destination::Name(name) => name.clone(),
            Destination::History(index) => self
                .context
                .get_history_state(*index as isize - 1)
                .map(|visit| visit.name.clone())
                .unwrap_or_default(),
        };
        let (name, run_action) = match raw.split_once(':') {
            Some((name, _)) => (name.to_string(), true),
            None => (raw, false),
        };
        let name = if name.is_empty() {
            self.current_state.clone()
        } else if !name.contains('.') {
            format!("{}.{name}", self.current_flow_name())
        } else {
            name
        };
        (name, run_action)
    }

    // ==================== Actions ====================

    /// Run the current state's action, or the fallback of its first unmet
    /// requirement. The global root skips requirement checks.
    pub fn run_accept(&mut self) -> Result<()> {
        let flows = Arc::clone(&self.flows);
        let Some(state) = flows.get_state(&self.current_state) else {
            warn!(state = %self.current_state, "Current state does not exist");
            return Ok(());
        };

        if self.current_state != GLOBAL_ROOT {
            if let Some(requirement) = state.first_unmet_requirement(&self.context) {
                debug!(entity = %requirement.entity, "Requirement not met");
                return self.run_action(&requirement.action);
            }
        }

        match &state.action {
            Some(action) => self.run_action(action),
            None => {
                warn!("State {} does not have an action", self.current_state);
                Ok(())
            }
        }
    }

    /// Run an action and follow the destination it returns.
    pub fn run_action(&mut self, action: &Action) -> Result<()> {
        debug!(action = action.id(), state = %self.current_state, "Running action");
        match action.run(self) {
            Ok(Some(next)) => self.move_to(next).map(|_| ()),
            Ok(None) => Ok(()),
            Err(err) => self.action_failed(action, err),
        }
    }

    fn action_failed(&mut self, action: &Action, err: Error) -> Result<()> {
        error!(
            chat_id = %self.session.chat_id,
            state = %self.current_state,
            action = action.id(),
            error = %err,
            "Exception occurred while running action\nContext: {}",
            self.context.debug_dump(self.config.debug_max_age)
        );

        if let Some(text) = self.config.error_message_text.clone() {
            if let Err(send_err) = self.send_response(text) {
                warn!(error = %send_err, "Failed to send error message");
            }
        }

        if self.session.is_test {
            return Err(err);
        }
        Ok(())
    }

    // ==================== Responses ====================

    /// Send one response to the user.
    pub fn send_response(&self, response: impl Into<Response>) -> Result<()> {
        self.send_responses(&[response.into()])
    }

    /// Send several responses, in order.
    pub fn send_responses(&self, responses: &[Response]) -> Result<()> {
        info!(
            chat_id = %self.session.chat_id,
            count = responses.len(),
            ">>> Sending chatbot message"
        );
        for response in responses {
            self.channel.post_message(&self.session, response)?;
            if self.recording {
                self.recorder.record_bot_message(response);
            }
        }
        for response in responses {
            self.logger
                .log_bot_message(&self.session, response, &self.current_state);
        }
        Ok(())
    }

    // ==================== Scheduling ====================

    /// Ask the scheduler to re-enter this session with `_schedule = name`.
    pub fn schedule(&self, name: &str, time: CallbackTime) -> Result<()> {
        info!(callback = name, time = ?time, "Scheduling callback");
        self.scheduler
            .schedule(ScheduledCallback::schedule(self.session.clone(), name, time))
    }

    /// Ask the scheduler to re-enter this session with `_inactive = name`
    /// unless another message arrives first.
    pub fn inactive(&self, name: &str, seconds: u64) -> Result<()> {
        info!(callback = name, seconds, "Setting inactivity callback");
        self.scheduler.schedule(ScheduledCallback::inactivity(
            self.session.clone(),
            name,
            self.context.counter(),
            CallbackTime::after_secs(seconds),
        ))
    }

    fn save_inactivity_callback(&self) {
        let chat_id = &self.session.chat_id;
        if let Err(err) = self
            .store
            .hash_set(SESSION_ACTIVE, chat_id, &Utc::now().to_rfc3339())
        {
            warn!(error = %err, "Failed to record session activity");
        }
        for (name, seconds) in &self.config.inactive_callbacks {
            if let Err(err) = self.inactive(name, *seconds) {
                warn!(callback = %name, error = %err, "Failed to schedule inactivity callback");
            }
        }
    }

    /// Deliver a due callback.
    pub fn accept_callback(&mut self, kind: &CallbackKind) -> Result<bool> {
        match kind {
            CallbackKind::Schedule { name } => {
                self.accept_schedule_callback(name)?;
                Ok(true)
            }
            CallbackKind::Inactivity { name, counter } => {
                self.accept_inactivity_callback(*counter, name)
            }
        }
    }

    /// Process a timed callback.
    pub fn accept_schedule_callback(&mut self, name: &str) -> Result<()> {
        let mut entities = Map::new();
        entities.insert(SCHEDULE.to_string(), json!({"value": name}));
        self.process(MessageType::Schedule, entities)
    }

    /// Process an inactivity callback captured at `counter`. Returns false
    /// without doing anything if the conversation has advanced since.
    pub fn accept_inactivity_callback(&mut self, counter: u64, name: &str) -> Result<bool> {
        if counter != self.context.counter() {
            info!(
                callback = name,
                captured = counter,
                live = self.context.counter(),
                "Ignoring stale inactivity callback"
            );
            return Ok(false);
        }
        let mut entities = Map::new();
        entities.insert(INACTIVE.to_string(), json!({"value": name}));
        self.process(MessageType::Schedule, entities)?;
        Ok(true)
    }

    // ==================== Persistence ====================

    /// Persist the current state, context and session.
    pub fn save_state(&self) -> Result<()> {
        let chat_id = &self.session.chat_id;
        info!(chat_id = %chat_id, state = %self.current_state, "Saving state");
        self.store
            .hash_set(SESSION_STATE, chat_id, &self.current_state)?;
        self.store
            .hash_set(SESSION_CONTEXT, chat_id, &self.context.to_json()?)?;
        self.store
            .hash_set(SESSION_INTERFACE, chat_id, self.channel.name())?;
        self.store.set(VERSION_KEY, &self.config.version)?;
        self.store
            .hash_set(CHAT_SESSION, chat_id, &serde_json::to_string(&self.session)?)?;
        Ok(())
    }

    /// Forget a session's state and context.
    pub fn clear_chat(store: &dyn KeyValueStore, chat_id: &str) -> Result<()> {
        store.hash_delete(SESSION_STATE, chat_id)?;
        store.hash_delete(SESSION_CONTEXT, chat_id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_VERSION;
    use crate::flow::{build_flow_graph, parse_flow_document, ActionRegistry};
    use crate::recording::RecordedEvent;
    use crate::store::InMemoryStore;
    use pretty_assertions::assert_eq;

    const FLOWS: &str = r#"
default:
  states:
    - name: root
      action: {text: "Welcome"}
    - name: help
      action: {text: "Help", next: "root"}
    - name: broken
      action: boom
greeting:
  intent: "greeting|hello"
  states:
    - name: root
      action: {text: "Hello there"}
flowB:
  states:
    - name: root
      action: {text: "B root"}
    - name: stateX
      action: {text: "B state X"}
pizza:
  intent: pizza
  accepts: [pizza_type]
  unsupported: {text: "Pizza only, please."}
  states:
    - name: root
      action: pizza.order
      supports: [size]
      require:
        - slot: what
          entity: pizza_type
          message: "Which pizza?"
    - name: confirm
      block: true
      action: {text: "Confirmed"}
    - name: quiz
      intent: quiz
      temporary: true
      supports: [answer]
      action: {text: "Quiz question"}
    - name: trivia
      temporary: true
      supports: [answer]
      unsupported: {text: "Trivia wants an answer."}
      action: {text: "Trivia question"}
    - name: picky
      unsupported: {text: "Picky does not get it."}
      action: {text: "Picky"}
weather:
  intent: weather
  accepts: [location]
  states:
    - name: root
      supports: [location]
      intent_transitions: {"bye": "default.help"}
      action: {text: "Sunny"}
"#;

    fn registry() -> ActionRegistry {
        let mut registry = ActionRegistry::new();
        registry
            .register_fn("pizza.order", |dialog| {
                let pizza = dialog
                    .context()
                    .query("pizza_type")
                    .latest_value()
                    .and_then(Value::as_str)
                    .unwrap_or("nothing")
                    .to_string();
                dialog.send_response(format!("Ordering {pizza}"))?;
                Ok(Some(Destination::name("confirm")))
            })
            .register_fn("boom", |_| Err(Error::action_runtime("boom", "kaput")));
        registry
    }

    fn graph() -> Arc<FlowGraph> {
        let definitions = parse_flow_document(FLOWS).unwrap();
        Arc::new(build_flow_graph(definitions, &registry()).unwrap())
    }

    struct Harness {
        dialog: DialogManager,
        channel: Arc<RecordingChannel>,
        scheduler: Arc<ManualScheduler>,
        store: Arc<InMemoryStore>,
    }

    impl Harness {
        fn send(&mut self, entities: Value) {
            self.dialog
                .process(MessageType::Message, entities.as_object().cloned().unwrap())
                .unwrap();
        }

        fn texts(&self) -> Vec<String> {
            self.channel.texts()
        }

        fn last_text(&self) -> String {
            self.texts().last().cloned().unwrap_or_default()
        }

        fn state(&self) -> &str {
            self.dialog.current_state()
        }
    }

    fn harness_with(
        session: ChatSession,
        config: DialogConfig,
        store: Arc<InMemoryStore>,
    ) -> Harness {
        let channel = Arc::new(RecordingChannel::new());
        let scheduler = Arc::new(ManualScheduler::new());
        let dialog = DialogManager::builder(session, graph())
            .config(config)
            .store(store.clone())
            .channel(channel.clone())
            .scheduler(scheduler.clone())
            .build()
            .unwrap();
        Harness {
            dialog,
            channel,
            scheduler,
            store,
        }
    }

    fn harness() -> Harness {
        harness_with(
            ChatSession::new("chat-1"),
            DialogConfig::default(),
            Arc::new(InMemoryStore::new()),
        )
    }

    #[test]
    fn test_new_session_starts_at_global_root() {
        let h = harness();
        assert_eq!(h.state(), GLOBAL_ROOT);
        assert_eq!(h.dialog.context().counter(), 0);
        assert!(h.texts().is_empty());
    }

    #[test]
    fn test_non_content_message_is_ignored() {
        let mut h = harness();
        h.dialog
            .process(MessageType::Read, json!({"intent": "greeting"}).as_object().cloned().unwrap())
            .unwrap();
        assert_eq!(h.dialog.context().counter(), 0);
        assert!(h.channel.events().is_empty());
    }

    #[test]
    fn test_explicit_request_beats_intent() {
        let mut h = harness();
        h.send(json!({"other": "x"}));
        h.send(json!({"_state": "flowB.stateX", "intent": "greeting"}));

        assert_eq!(h.dialog.context().counter(), 2);
        assert_eq!(h.state(), "flowB.stateX");
        assert!(!h.texts().contains(&"Hello there".to_string()));
    }

    #[test]
    fn test_intent_transition_runs_root_action() {
        let mut h = harness();
        h.send(json!({"intent": "hello_world"}));

        assert_eq!(h.state(), "greeting.root");
        assert_eq!(h.last_text(), "Hello there");
        assert_eq!(h.channel.state_changes(), vec!["greeting.root"]);
    }

    #[test]
    fn test_intent_prefers_states_of_current_flow() {
        let mut h = harness();
        h.send(json!({"intent": "pizza"}));
        assert_eq!(h.state(), "pizza.root");
        assert_eq!(h.last_text(), "Which pizza?");

        h.send(json!({"intent": "quiz"}));
        assert_eq!(h.state(), "pizza.quiz");
        assert_eq!(h.last_text(), "Quiz question");
    }

    #[test]
    fn test_intent_keyed_transition_is_consulted_first() {
        let mut h = harness();
        h.send(json!({"intent": "weather"}));
        assert_eq!(h.state(), "weather.root");

        h.send(json!({"intent": "bye"}));
        assert_eq!(h.state(), "default.root");
        assert_eq!(h.last_text(), "Help");
    }

    #[test]
    fn test_unknown_intent_falls_through() {
        let mut h = harness();
        h.send(json!({"intent": "unknown_thing"}));
        assert_eq!(h.state(), GLOBAL_ROOT);
        assert_eq!(h.last_text(), "Welcome");
    }

    #[test]
    fn test_entity_transition() {
        let mut h = harness();
        h.send(json!({"location": "Prague"}));
        assert_eq!(h.state(), "weather.root");
        assert_eq!(h.last_text(), "Sunny");

        // supported in place: the action re-runs
        h.send(json!({"location": "Brno"}));
        assert_eq!(h.state(), "weather.root");
        assert_eq!(h.texts(), vec!["Sunny", "Sunny"]);
    }

    #[test]
    fn test_requirement_gates_action() {
        let mut h = harness();
        h.send(json!({"intent": "pizza"}));
        assert_eq!(h.last_text(), "Which pizza?");

        h.send(json!({"pizza_type": "margherita"}));
        assert_eq!(h.last_text(), "Ordering margherita");
        assert_eq!(h.state(), "pizza.confirm");
        assert_eq!(
            h.dialog
                .context()
                .get("pizza_type", None, &[])
                .unwrap()
                .state_set
                .as_deref(),
            Some("pizza.root")
        );
    }

    #[test]
    fn test_blocking_state_suppresses_transitions() {
        let mut h = harness();
        h.send(json!({"_state": "pizza.confirm"}));
        h.send(json!({"intent": "weather", "location": "Prague"}));

        assert_eq!(h.state(), "pizza.confirm");
        assert_eq!(h.last_text(), "Confirmed");
    }

    #[test]
    fn test_unsupported_falls_back_to_global_root() {
        let mut h = harness();
        h.send(json!({"_state": "flowB.root"}));
        assert_eq!(h.state(), "flowB.root");

        h.send(json!({"mystery": 1}));
        assert_eq!(h.state(), GLOBAL_ROOT);
        assert_eq!(h.last_text(), "Welcome");
    }

    #[test]
    fn test_state_unsupported_handler() {
        let mut h = harness();
        h.send(json!({"_state": "pizza.picky"}));
        h.send(json!({"mystery": 1}));

        assert_eq!(h.state(), "pizza.picky");
        assert_eq!(h.last_text(), "Picky does not get it.");
    }

    #[test]
    fn test_flow_unsupported_handler() {
        let mut h = harness();
        h.send(json!({"intent": "pizza"}));
        h.send(json!({"mystery": 1}));

        assert_eq!(h.state(), "pizza.root");
        assert_eq!(h.last_text(), "Pizza only, please.");
    }

    #[test]
    fn test_temporary_state() {
        let mut h = harness();
        h.send(json!({"intent": "pizza"}));
        h.send(json!({"intent": "quiz"}));
        h.send(json!({"answer": "42"}));
        assert_eq!(h.state(), "pizza.quiz");
        assert_eq!(h.last_text(), "Quiz question");

        h.send(json!({"mystery": 1}));
        assert_eq!(h.state(), GLOBAL_ROOT);
        assert_eq!(h.last_text(), "Welcome");
    }

    #[test]
    fn test_temporary_state_runs_its_own_unsupported_handler() {
        let mut h = harness();
        h.send(json!({"_state": "pizza.trivia:"}));
        assert_eq!(h.last_text(), "Trivia question");

        h.send(json!({"mystery": 1}));
        assert_eq!(h.state(), "pizza.trivia");
        assert_eq!(h.last_text(), "Trivia wants an answer.");
        assert!(!h.texts().contains(&"Pizza only, please.".to_string()));
    }

    #[test]
    fn test_missing_destination_stays_in_place() {
        let mut h = harness();
        assert!(!h.dialog.move_to("nowhere.root").unwrap());
        assert!(!h.dialog.move_to("missing").unwrap());
        assert_eq!(h.state(), GLOBAL_ROOT);
        assert!(h.dialog.context().history().is_empty());
    }

    #[test]
    fn test_relative_and_history_destinations() {
        let mut h = harness();
        assert!(h.dialog.move_to("help").unwrap());
        assert_eq!(h.state(), "default.help");
        assert!(h.texts().is_empty());

        h.dialog.move_to("flowB.stateX").unwrap();
        h.dialog.move_to(Destination::history(1)).unwrap();
        assert_eq!(h.state(), "default.help");

        let visited: Vec<&str> = h
            .dialog
            .context()
            .history()
            .iter()
            .map(|visit| visit.name.as_str())
            .collect();
        assert_eq!(visited, vec!["default.help", "flowB.stateX", "default.help"]);
    }

    #[test]
    fn test_identical_moves_recorded_on_request() {
        let mut h = harness();
        h.dialog.move_to(GLOBAL_ROOT).unwrap();
        assert!(h.dialog.context().history().is_empty());

        h.dialog
            .move_to_with(GLOBAL_ROOT, MoveOptions::save_identical())
            .unwrap();
        assert_eq!(h.dialog.context().history().len(), 1);
    }

    #[test]
    fn test_action_failure_is_fail_soft() {
        let config = DialogConfig::default().with_error_message("Sorry, something broke.");
        let mut h = harness_with(
            ChatSession::new("chat-1"),
            config,
            Arc::new(InMemoryStore::new()),
        );

        assert!(h.dialog.move_to("default.broken:").unwrap());
        assert_eq!(h.state(), "default.broken");
        assert_eq!(h.texts(), vec!["Sorry, something broke."]);
    }

    #[test]
    fn test_action_failure_raises_in_tests() {
        let mut h = harness_with(
            ChatSession::new("chat-1").with_test(true),
            DialogConfig::default(),
            Arc::new(InMemoryStore::new()),
        );
        let err = h.dialog.move_to("default.broken:").unwrap_err();
        assert!(matches!(err, Error::ActionRuntime { .. }));
    }

    #[test]
    fn test_session_is_restored() {
        let store = Arc::new(InMemoryStore::new());
        let mut first = harness_with(
            ChatSession::new("chat-1"),
            DialogConfig::default(),
            store.clone(),
        );
        first.send(json!({"intent": "pizza", "size": {"value": "L", "confidence": 0.8}}));

        let second = harness_with(
            ChatSession::new("chat-1"),
            DialogConfig::default(),
            store.clone(),
        );
        assert_eq!(second.state(), "pizza.root");
        assert_eq!(
            second.dialog.context().to_document(),
            first.dialog.context().to_document()
        );
        assert!(second.channel.events().is_empty());
        assert_eq!(
            store.get(VERSION_KEY).unwrap().as_deref(),
            Some(DEFAULT_VERSION)
        );
        assert_eq!(
            store.hash_get(SESSION_INTERFACE, "chat-1").unwrap().as_deref(),
            Some("recording")
        );
    }

    #[test]
    fn test_version_mismatch_discards_session() {
        let store = Arc::new(InMemoryStore::new());
        let mut first = harness_with(
            ChatSession::new("chat-1"),
            DialogConfig::default(),
            store.clone(),
        );
        first.send(json!({"intent": "pizza"}));

        let config = DialogConfig::default().with_version("0.0.0-incompatible");
        let second = harness_with(ChatSession::new("chat-1"), config, store);
        assert_eq!(second.state(), GLOBAL_ROOT);
        assert_eq!(second.dialog.context().counter(), 0);
    }

    #[test]
    fn test_clear_chat() {
        let mut h = harness();
        h.send(json!({"intent": "pizza"}));
        assert!(h.store.hash_exists(SESSION_CONTEXT, "chat-1").unwrap());

        DialogManager::clear_chat(h.store.as_ref(), "chat-1").unwrap();
        assert!(!h.store.hash_exists(SESSION_CONTEXT, "chat-1").unwrap());
        assert!(!h.store.hash_exists(SESSION_STATE, "chat-1").unwrap());
    }

    #[test]
    fn test_inactivity_callbacks() {
        let config = DialogConfig::default().with_inactive_callback("nudge", 30);
        let mut h = harness_with(
            ChatSession::new("chat-1"),
            config,
            Arc::new(InMemoryStore::new()),
        );

        h.send(json!({"_message_text": "hi"}));
        h.send(json!({"_message_text": "still there?"}));
        let pending = h.scheduler.drain();
        assert_eq!(pending.len(), 2);
        assert_eq!(
            pending[0].kind,
            CallbackKind::Inactivity {
                name: "nudge".into(),
                counter: 1
            }
        );

        assert!(!h.dialog.accept_callback(&pending[0].kind).unwrap());
        assert_eq!(h.dialog.context().counter(), 2);

        assert!(h.dialog.accept_callback(&pending[1].kind).unwrap());
        assert_eq!(h.dialog.context().counter(), 3);
        assert_eq!(
            h.dialog.context().query(INACTIVE).current_value(),
            Some(&json!("nudge"))
        );
        // callbacks never schedule further inactivity callbacks
        assert!(h.scheduler.is_empty());
        assert!(h.store.hash_exists(SESSION_ACTIVE, "chat-1").unwrap());
    }

    #[test]
    fn test_schedule_callback() {
        let mut h = harness();
        h.dialog.schedule("remind", CallbackTime::after_secs(5)).unwrap();
        let pending = h.scheduler.drain();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].session.chat_id, "chat-1");

        assert!(h.dialog.accept_callback(&pending[0].kind).unwrap());
        assert_eq!(
            h.dialog.context().query(SCHEDULE).current_value(),
            Some(&json!("remind"))
        );
    }

    #[test]
    fn test_meta_commands() {
        let mut h = harness();
        h.send(json!({"_message_text": "/version"}));
        assert_eq!(h.state(), GLOBAL_ROOT);
        assert!(h.last_text().ends_with(DEFAULT_VERSION));

        h.send(json!({"_message_text": "/intent/greeting"}));
        assert_eq!(h.state(), "greeting.root");
        assert_eq!(h.last_text(), "Hello there");
    }

    #[test]
    fn test_conversation_recording() {
        let mut h = harness();
        h.send(json!({"test_record": "start"}));
        assert!(h.last_text().starts_with("Recording started"));
        assert!(h.dialog.recorder().is_empty());

        h.send(json!({"intent": "greeting"}));
        let events = h.dialog.recorder().events();
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[0],
            RecordedEvent::UserMessage {
                message_type: MessageType::Message,
                ..
            }
        ));
        assert_eq!(
            events[1],
            RecordedEvent::StateChange {
                state: "greeting.root".into()
            }
        );
        assert_eq!(
            events[2],
            RecordedEvent::BotMessage {
                response: Response::text("Hello there")
            }
        );

        h.send(json!({"test_record": "rewind"}));
        assert_eq!(h.last_text(), RECORDING_USAGE);
        assert_eq!(h.state(), "greeting.root");
    }

    #[test]
    fn test_processing_hooks_wrap_each_message() {
        use crate::channel::ChannelEvent;

        let mut h = harness();
        h.send(json!({"intent": "greeting"}));
        let events = h.channel.events();
        assert_eq!(
            events.first(),
            Some(&ChannelEvent::ProcessingStarted {
                chat_id: "chat-1".into()
            })
        );
        assert_eq!(
            events.last(),
            Some(&ChannelEvent::ProcessingEnded {
                chat_id: "chat-1".into()
            })
        );
    }

    #[test]
    fn test_bad_entity_payload_is_rejected() {
        let mut h = harness();
        let err = h
            .dialog
            .process(
                MessageType::Message,
                json!({"broken": {"confidence": 1.0}}).as_object().cloned().unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::ValueType(_)));
    }
}
