//! Conversation engine
//!
//! Runs one turn at a time: feeds events through the pure transition
//! function and carries out the effects it asks for.

use super::traits::{StoreError, Storage};
use super::AgentContext;
use crate::db::{ChatMessage, Role, Session};
use crate::llm::{LlmMessage, LlmRequest, SystemContent};
use crate::prompts;
use crate::state_machine::{
    transition, Category, ConvContext, ConvState, Decision, Effect, Event, Flow, TransitionError,
};
use crate::tools::{ToolCategory, ToolContext, ToolOutput};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

/// What the engine surfaces to its caller
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
    #[error("Thread {thread_id} not found")]
    ThreadNotFound { thread_id: String },
    #[error("Thread {thread_id} belongs to the {} agent, not {}", .actual.as_str(), .expected.as_str())]
    FlowMismatch {
        thread_id: String,
        expected: Flow,
        actual: Flow,
    },
}

/// One request's worth of input
#[derive(Debug, Clone, Default)]
pub struct TurnInput {
    pub user_input: Option<String>,
    /// Only imported when the thread is new
    pub conversation_history: Vec<ChatMessage>,
    pub has_document: bool,
}

impl TurnInput {
    #[cfg(test)]
    pub fn text(user_input: impl Into<String>) -> Self {
        Self {
            user_input: Some(user_input.into()),
            ..Self::default()
        }
    }
}

/// Result of a turn
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub session: Session,
    /// Assistant replies produced by this turn
    pub agent_output: String,
    /// Everything appended to the transcript during the turn
    pub new_messages: Vec<ChatMessage>,
    /// Visible transcript after the turn
    pub history: Vec<ChatMessage>,
}

/// Working state of a single turn
struct TurnRun {
    context: ConvContext,
    session: Session,
    state: ConvState,
    appended: Vec<ChatMessage>,
    changed: bool,
}

impl TurnRun {
    fn new(context: ConvContext, session: Session) -> Self {
        Self {
            context,
            state: session.state.clone(),
            session,
            appended: vec![],
            changed: false,
        }
    }
}

type ThreadLocks = std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>;

/// A claim on one thread's turn lock. Dropping the last claim removes the
/// thread's entry, so the map only holds threads with a turn in flight.
struct ThreadLease<'a> {
    locks: &'a ThreadLocks,
    thread_id: String,
    lock: Arc<Mutex<()>>,
}

impl<'a> ThreadLease<'a> {
    fn claim(locks: &'a ThreadLocks, thread_id: &str) -> Self {
        let lock = locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(thread_id.to_string())
            .or_default()
            .clone();
        Self {
            locks,
            thread_id: thread_id.to_string(),
            lock,
        }
    }

    async fn acquire(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for ThreadLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Claims are only cloned under the map lock, so two owners means the
        // map and this lease
        let last = locks
            .get(&self.thread_id)
            .is_some_and(|lock| Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2);
        if last {
            locks.remove(&self.thread_id);
        }
    }
}

/// Drives conversations of every flow over one storage backend
pub struct ConversationEngine<S: Storage> {
    storage: S,
    agents: AgentContext,
    /// One lock per thread with a turn in progress
    locks: ThreadLocks,
}

impl<S: Storage> ConversationEngine<S> {
    pub fn new(storage: S, agents: AgentContext) -> Self {
        Self {
            storage,
            agents,
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Allocate an identifier for a new conversation
    pub fn create_thread(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Process one user turn
    pub async fn handle_turn(
        &self,
        thread_id: &str,
        flow: Flow,
        input: TurnInput,
    ) -> Result<TurnOutcome, EngineError> {
        let lease = ThreadLease::claim(&self.locks, thread_id);
        let _guard = lease.acquire().await;

        let result = self.run_turn(thread_id, flow, input).await;
        log_failure(thread_id, flow, result)
    }

    /// Advance a thread without new input.
    ///
    /// Finishes interrupted work and answers a trailing user message. When
    /// the last message is not from the user this only waits. Unknown
    /// threads are not created.
    pub async fn step(&self, thread_id: &str, flow: Flow) -> Result<TurnOutcome, EngineError> {
        let lease = ThreadLease::claim(&self.locks, thread_id);
        let _guard = lease.acquire().await;

        let result = self.run_step(thread_id, flow).await;
        log_failure(thread_id, flow, result)
    }

    async fn run_turn(
        &self,
        thread_id: &str,
        flow: Flow,
        input: TurnInput,
    ) -> Result<TurnOutcome, EngineError> {
        let mut run = self
            .open(thread_id, flow, &input.conversation_history)
            .await?;
        if run.state.needs_resume() {
            self.process_event(&mut run, Event::Resume).await?;
        }

        let reply_start = run.appended.len();
        let event = match input.user_input.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => {
                self.append(&mut run, ChatMessage::user(text)).await?;
                Event::UserInput {
                    text: text.to_string(),
                    document_hint: input.has_document,
                }
            }
            _ => Event::MissingInput,
        };
        self.process_event(&mut run, event).await?;
        self.finish(run, reply_start).await
    }

    async fn run_step(&self, thread_id: &str, flow: Flow) -> Result<TurnOutcome, EngineError> {
        let session = self
            .load(thread_id, flow)
            .await?
            .ok_or_else(|| EngineError::ThreadNotFound {
                thread_id: thread_id.to_string(),
            })?;
        let mut run = TurnRun::new(self.context(thread_id, flow), session);
        if run.state.needs_resume() {
            self.process_event(&mut run, Event::Resume).await?;
        }

        let reply_start = run.appended.len();
        let messages = self.storage.get_messages(thread_id).await?;
        if let Some(last) = messages.last().filter(|m| m.message.role == Role::User) {
            let event = Event::UserInput {
                text: last.message.content.clone(),
                document_hint: false,
            };
            self.process_event(&mut run, event).await?;
        }
        self.finish(run, reply_start).await
    }

    #[cfg(test)]
    pub(crate) fn tracked_threads(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn context(&self, thread_id: &str, flow: Flow) -> ConvContext {
        ConvContext::new(thread_id, flow, self.agents.documents.has_context())
    }

    /// The thread's session, provided it belongs to `flow`
    async fn load(&self, thread_id: &str, flow: Flow) -> Result<Option<Session>, EngineError> {
        match self.storage.load(thread_id).await? {
            Some(session) if session.flow != flow => Err(EngineError::FlowMismatch {
                thread_id: thread_id.to_string(),
                expected: flow,
                actual: session.flow,
            }),
            session => Ok(session),
        }
    }

    /// Load the session, creating and greeting a new one
    async fn open(
        &self,
        thread_id: &str,
        flow: Flow,
        history: &[ChatMessage],
    ) -> Result<TurnRun, EngineError> {
        let context = self.context(thread_id, flow);

        match self.load(thread_id, flow).await? {
            Some(session) => Ok(TurnRun::new(context, session)),
            None => {
                let session = self
                    .storage
                    .save(thread_id, flow, &ConvState::default())
                    .await?;
                tracing::info!(thread_id, flow = flow.as_str(), "New session");

                for message in history.iter().filter(|m| !m.content.trim().is_empty()) {
                    self.storage.append_message(thread_id, message).await?;
                }

                let mut run = TurnRun::new(context, session);
                self.process_event(&mut run, Event::Begin).await?;
                Ok(run)
            }
        }
    }

    async fn finish(&self, run: TurnRun, reply_start: usize) -> Result<TurnOutcome, EngineError> {
        let thread_id = run.context.thread_id.as_str();
        let session = if run.changed {
            self.storage
                .save(thread_id, run.context.flow, &run.state)
                .await?
        } else {
            run.session
        };

        let history: Vec<ChatMessage> = self
            .storage
            .get_messages(thread_id)
            .await?
            .into_iter()
            .map(|stored| stored.message)
            .filter(ChatMessage::is_visible)
            .collect();
        let agent_output = agent_output(&run.appended, reply_start, &history);

        Ok(TurnOutcome {
            session,
            agent_output,
            new_messages: run.appended,
            history,
        })
    }

    /// Run `event` and every follow-up event it causes
    async fn process_event(&self, run: &mut TurnRun, event: Event) -> Result<(), EngineError> {
        let mut events_to_process = vec![event];

        while let Some(event) = events_to_process.pop() {
            let event_name = event.name();
            let result = transition(&run.state, &run.context, event)?;

            if result.new_state.stage != run.state.stage {
                tracing::info!(
                    thread_id = %run.context.thread_id,
                    flow = run.context.flow.as_str(),
                    from = run.state.stage.name(),
                    to = result.new_state.stage.name(),
                    event = event_name,
                    "Stage transition"
                );
            }
            run.state = result.new_state;
            run.changed = true;

            for effect in result.effects {
                if let Some(next) = self.execute_effect(run, effect).await? {
                    events_to_process.push(next);
                }
            }
        }

        Ok(())
    }

    async fn append(&self, run: &mut TurnRun, message: ChatMessage) -> Result<(), EngineError> {
        self.storage
            .append_message(&run.context.thread_id, &message)
            .await?;
        run.appended.push(message);
        Ok(())
    }

    /// Carry out one effect. Collaborator failures come back as events;
    /// only storage failures are errors.
    #[allow(clippy::too_many_lines)]
    async fn execute_effect(
        &self,
        run: &mut TurnRun,
        effect: Effect,
    ) -> Result<Option<Event>, EngineError> {
        let thread_id = run.context.thread_id.clone();

        match effect {
            Effect::AppendMessage(message) => {
                self.append(run, message).await?;
                Ok(None)
            }

            Effect::PersistState => {
                self.storage
                    .save(&thread_id, run.context.flow, &run.state)
                    .await?;
                Ok(None)
            }

            Effect::RequestSuggestions => {
                let request = LlmRequest::simple(prompts::COACH_SYSTEM, prompts::SUGGESTION_REQUEST);
                let event = match self.agents.llm.complete(&request).await {
                    Ok(response) if !response.text().trim().is_empty() => Event::SuggestionsReady {
                        text: response.text(),
                    },
                    Ok(_) => Event::SuggestionsFailed {
                        message: "empty suggestion list".to_string(),
                    },
                    Err(e) => {
                        tracing::warn!(thread_id = %thread_id, error = %e, "Suggestion request failed");
                        Event::SuggestionsFailed { message: e.message }
                    }
                };
                Ok(Some(event))
            }

            Effect::CorrectGrammar { text } => {
                let event = match self.agents.grammar.check(&text).await {
                    Ok(result) => Event::GrammarChecked {
                        original: text,
                        result,
                    },
                    Err(e) => {
                        tracing::warn!(thread_id = %thread_id, error = %e, "Grammar check failed, using raw text");
                        Event::GrammarFailed {
                            original: text,
                            message: e.to_string(),
                        }
                    }
                };
                Ok(Some(event))
            }

            Effect::Evaluate {
                instruction,
                original,
                corrected,
            } => {
                let event = match self.agents.evaluator.evaluate(&instruction).await {
                    Ok(evaluation) => {
                        tracing::debug!(thread_id = %thread_id, accepted = evaluation.accepted, "Evaluated input");
                        Event::Evaluated {
                            original,
                            corrected,
                            evaluation,
                        }
                    }
                    Err(e) => {
                        tracing::warn!(thread_id = %thread_id, error = %e, "Evaluation failed");
                        Event::EvaluationFailed {
                            message: e.to_string(),
                        }
                    }
                };
                Ok(Some(event))
            }

            Effect::ClassifyCategory { prompt } => {
                let request = LlmRequest::simple(
                    prompts::CLASSIFIER_SYSTEM,
                    prompts::category_instruction(&prompt),
                )
                .with_max_tokens(10);
                let category = match self.agents.llm.complete(&request).await {
                    Ok(response) => Category::from_label(&response.text()),
                    Err(e) => {
                        tracing::warn!(thread_id = %thread_id, error = %e, "Classification failed, using clarity");
                        Category::Clarity
                    }
                };
                Ok(Some(Event::Classified { category }))
            }

            Effect::RequestDecision {
                system,
                prompt,
                scope,
                include_history,
            } => Ok(Some(
                self.request_decision(&thread_id, system, prompt, &scope, include_history)
                    .await?,
            )),

            Effect::ExecuteTool { call } => {
                let ctx = ToolContext::new(
                    thread_id.as_str(),
                    self.agents.llm.clone(),
                    self.agents.grammar.clone(),
                    self.agents.documents.clone(),
                );
                let offered = self
                    .agents
                    .tools
                    .definitions(&call.scope)
                    .iter()
                    .any(|definition| definition.name == call.name);
                let output = if offered {
                    self.agents
                        .tools
                        .execute(&call.name, call.input.clone(), ctx)
                        .await
                        .unwrap_or_else(|| ToolOutput::error(format!("Unknown tool: {}", call.name)))
                } else {
                    tracing::warn!(thread_id = %thread_id, tool = %call.name, scope = ?call.scope, "Refused tool outside offered scope");
                    ToolOutput::error(format!("Tool {} is not available in this step", call.name))
                };

                tracing::info!(thread_id = %thread_id, tool = %call.name, success = output.success, "Tool executed");
                Ok(Some(Event::ToolFinished {
                    call_id: call.id,
                    output,
                }))
            }

            Effect::RequestAnalysis { system, prompt } => {
                let request = LlmRequest::simple(system, prompt);
                let event = match self.agents.llm.complete(&request).await {
                    Ok(response) => Event::AnalysisReady {
                        text: response.text(),
                    },
                    Err(e) => {
                        tracing::warn!(thread_id = %thread_id, error = %e, "Analysis request failed");
                        Event::AnalysisFailed { message: e.message }
                    }
                };
                Ok(Some(event))
            }
        }
    }

    /// Offer the scoped tools and turn the reply into a `Decision`
    async fn request_decision(
        &self,
        thread_id: &str,
        system: String,
        prompt: String,
        scope: &[ToolCategory],
        include_history: bool,
    ) -> Result<Event, EngineError> {
        let mut messages = Vec::new();
        if include_history {
            messages.extend(
                self.storage
                    .get_messages(thread_id)
                    .await?
                    .into_iter()
                    .filter(|stored| stored.message.is_visible())
                    .map(|stored| match stored.message.role {
                        Role::User => LlmMessage::user(stored.message.content),
                        _ => LlmMessage::assistant(stored.message.content),
                    }),
            );
        }
        messages.push(LlmMessage::user(prompt));

        let request = LlmRequest {
            system: vec![SystemContent::new(system)],
            messages,
            ..LlmRequest::default()
        }
        .with_tools(self.agents.tools.definitions(scope));

        Ok(match self.agents.llm.complete(&request).await {
            Ok(response) => Event::Decided {
                decision: Decision::from_response(&response, scope),
            },
            Err(e) => {
                tracing::warn!(thread_id = %thread_id, error = %e, "Tool decision request failed");
                Event::DecisionFailed { message: e.message }
            }
        })
    }
}

/// Assistant replies written after the user's message, falling back to
/// everything the turn wrote and then to the last visible reply
fn agent_output(appended: &[ChatMessage], reply_start: usize, history: &[ChatMessage]) -> String {
    fn replies(messages: &[ChatMessage]) -> Vec<&str> {
        messages
            .iter()
            .filter(|m| m.role == Role::Assistant && m.is_visible())
            .map(|m| m.content.as_str())
            .collect()
    }

    let after_input = replies(appended.get(reply_start..).unwrap_or_default());
    if !after_input.is_empty() {
        return after_input.join("\n\n");
    }
    let whole_turn = replies(appended);
    if !whole_turn.is_empty() {
        return whole_turn.join("\n\n");
    }
    replies(history)
        .last()
        .map(ToString::to_string)
        .unwrap_or_default()
}

fn log_failure<T>(
    thread_id: &str,
    flow: Flow,
    result: Result<T, EngineError>,
) -> Result<T, EngineError> {
    if let Err(e) = &result {
        match e {
            EngineError::Persistence(_) => {
                tracing::error!(thread_id, flow = flow.as_str(), error = %e, "Turn aborted");
            }
            _ => tracing::warn!(thread_id, flow = flow.as_str(), error = %e, "Turn rejected"),
        }
    }
    result
}
