//! Pure state transition function
//!
//! One table per agent flow plus the rows every flow shares. Nothing here
//! performs I/O: work that needs a collaborator is requested as an `Effect`
//! and its result comes back as a follow-up `Event`.

use super::state::{
    CapturedField, Decision, Flow, InputStage, RefinementOutcome, Stage, ToolCall,
    DIRECT_REFINEMENT,
};
use super::{ConvContext, ConvState, Effect, Event};
use crate::classifier::{self, Intent};
use crate::db::ChatMessage;
use crate::evaluator::Evaluation;
use crate::prompts;
use crate::tools::ToolCategory;
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ConvState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ConvState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function.
///
/// Given the same inputs it always produces the same outputs.
pub fn transition(
    state: &ConvState,
    context: &ConvContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (&state.stage, event) {
        // ============================================================
        // Shared rows
        // ============================================================
        (_, Event::MissingInput) => Ok(missing_input(state, "No user message in this turn")),

        (_, Event::Resume) => Ok(resume(state)),

        // Error + UserInput -> handled as the interrupted stage
        (Stage::Error { resume, .. }, event @ Event::UserInput { .. }) => {
            let resumed = ConvState {
                stage: (**resume).clone(),
                ..state.clone()
            };
            transition(&resumed, context, event)
        }

        (Stage::Error { .. }, event) => Err(invalid(state, &event)),

        (_, event) => match context.flow {
            Flow::Coach => coach(state, event),
            Flow::Refiner => refiner(state, context, event),
            Flow::Grammar => grammar(state, event),
        },
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

fn invalid(state: &ConvState, event: &Event) -> TransitionError {
    TransitionError::InvalidTransition(format!(
        "{} cannot handle {}",
        state.stage.name(),
        event.name()
    ))
}

/// Reply without changing state
fn stay(state: &ConvState, text: impl Into<String>) -> TransitionResult {
    TransitionResult::new(state.clone()).with_effect(Effect::reply(text))
}

fn missing_input(state: &ConvState, message: &str) -> TransitionResult {
    let resume = match &state.stage {
        Stage::Error { resume, .. } => resume.clone(),
        other => Box::new(other.clone()),
    };
    let next = ConvState {
        stage: Stage::Error {
            message: message.to_string(),
            resume,
        },
        ..state.clone()
    };
    TransitionResult::new(next)
        .with_effect(Effect::reply(prompts::RESEND_REQUEST))
        .with_effect(Effect::PersistState)
}

fn resume(state: &ConvState) -> TransitionResult {
    let result = TransitionResult::new(state.clone());
    if let Some(call) = &state.pending_tool {
        return result.with_effect(Effect::execute_tool(call.clone()));
    }
    if state.stage == Stage::ReadyToRefine {
        return result.with_effect(polish_decision(state.fields.final_prompt_value()));
    }
    result
}

/// Record the pending call and ask the executor to run it
fn request_tool(mut next: ConvState, call: ToolCall) -> TransitionResult {
    next.pending_tool = Some(call.clone());
    let notice = ChatMessage::tool_request(prompts::tool_call_notice(&call.name), call.clone());
    TransitionResult::new(next)
        .with_effect(Effect::AppendMessage(notice))
        .with_effect(Effect::PersistState)
        .with_effect(Effect::execute_tool(call))
}

/// Clear the pending call, checking the result belongs to it
fn take_pending(slot: &mut Option<ToolCall>, call_id: &str) -> Result<ToolCall, TransitionError> {
    match slot.take() {
        Some(call) if call.id == call_id => Ok(call),
        Some(call) => Err(TransitionError::InvalidTransition(format!(
            "tool result for {call_id} while waiting on {}",
            call.id
        ))),
        None => Err(TransitionError::InvalidTransition(format!(
            "tool result for {call_id} with no pending tool call"
        ))),
    }
}

// ============================================================================
// Coach
// ============================================================================

fn coach(state: &ConvState, event: Event) -> Result<TransitionResult, TransitionError> {
    if let Some(input) = state.stage.input_stage() {
        return coach_input_stage(state, input, event);
    }

    match (&state.stage, event) {
        (Stage::Start, Event::Begin) => Ok(restart()),

        (Stage::ReadyToRefine, Event::Decided { decision }) => match decision {
            Decision::Invoke(call) => Ok(request_tool(state.clone(), call)),
            // No tool call: skip the registry and show the result
            Decision::Respond(text) => Ok(finish_coaching(state.clone(), Some(&text))),
        },

        (Stage::ReadyToRefine, Event::DecisionFailed { .. }) => {
            Ok(finish_coaching(state.clone(), None))
        }

        (Stage::ReadyToRefine, Event::ToolFinished { call_id, output }) => {
            let mut next = state.clone();
            let call = take_pending(&mut next.pending_tool, &call_id)?;
            let mut effects = vec![Effect::AppendMessage(ChatMessage::tool_result(
                call_id,
                output.output.clone(),
            ))];

            if output.succeeded() {
                next.fields.polished = Some(output.output.trim().to_string());
            } else {
                effects.push(Effect::reply(prompts::polish_failed(&call.name, &output)));
            }

            let mut result = finish_coaching(next, None);
            effects.append(&mut result.effects);
            result.effects = effects;
            Ok(result)
        }

        (Stage::Completed, Event::UserInput { text, .. }) => {
            if classifier::coach_rules().classify(&text) == Intent::Restart {
                Ok(restart())
            } else {
                Ok(stay(state, prompts::COMPLETED_HINT))
            }
        }

        (_, event) => Err(invalid(state, &event)),
    }
}

fn coach_input_stage(
    state: &ConvState,
    input: InputStage,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match event {
        Event::UserInput { text, .. } => Ok(coach_user_input(state, input, text)),

        Event::SuggestionsReady { text } => Ok(stay(state, prompts::suggestions_reply(&text))),
        Event::SuggestionsFailed { .. } => Ok(stay(state, prompts::suggestions_fallback())),

        Event::GrammarChecked { original, result } => {
            Ok(request_evaluation(state, input, original, result.corrected_text))
        }
        // Grammar is best effort; judge the raw text instead
        Event::GrammarFailed { original, .. } => {
            let corrected = original.clone();
            Ok(request_evaluation(state, input, original, corrected))
        }

        Event::Evaluated {
            original,
            corrected,
            evaluation,
        } => Ok(on_evaluated(state, input, original, corrected, &evaluation)),

        Event::EvaluationFailed { .. } => Ok(stay(state, prompts::EVALUATION_UNAVAILABLE)),

        other => Err(invalid(state, &other)),
    }
}

/// Ordered fast paths first; only content reaches the grammar pass and evaluator
fn coach_user_input(state: &ConvState, input: InputStage, text: String) -> TransitionResult {
    match classifier::coach_rules().classify(&text) {
        Intent::Blank => missing_input(state, "Empty message"),

        Intent::Greeting | Intent::TooShort => stay(state, prompts::greeting_reprompt(input)),

        Intent::Restart => restart(),

        Intent::SuggestionRequest if input == InputStage::Task => {
            TransitionResult::new(state.clone()).with_effect(Effect::RequestSuggestions)
        }
        Intent::SuggestionRequest | Intent::HelpRequest => {
            stay(state, prompts::stage_guidance(input, &state.fields))
        }

        // A bare "none" earns suggestions, not a skip
        Intent::NoReferences if input == InputStage::References => {
            stay(state, prompts::REFERENCE_SUGGESTIONS)
        }

        Intent::ProceedWithoutReferences if input == InputStage::References => {
            let mut next = state.clone();
            next.fields.store(
                input,
                CapturedField {
                    original: text,
                    value: prompts::PLACEHOLDER_REFERENCE.to_string(),
                },
            );
            next.stage = input.next();
            let reply = prompts::final_prompt_request(&next.fields);
            TransitionResult::new(next)
                .with_effect(Effect::reply(reply))
                .with_effect(Effect::PersistState)
        }

        // "no" outside the reference step is just a short answer
        Intent::NoReferences if classifier::too_short(&text) => {
            stay(state, prompts::greeting_reprompt(input))
        }

        Intent::NoReferences | Intent::ProceedWithoutReferences | Intent::Content => {
            TransitionResult::new(state.clone()).with_effect(Effect::CorrectGrammar { text })
        }
    }
}

fn request_evaluation(
    state: &ConvState,
    input: InputStage,
    original: String,
    corrected: String,
) -> TransitionResult {
    let instruction = prompts::evaluation_instruction(input, &state.fields, &corrected);
    TransitionResult::new(state.clone()).with_effect(Effect::Evaluate {
        instruction,
        original,
        corrected,
    })
}

/// Accepted input always advances; suggestions ride along in the next ask
fn on_evaluated(
    state: &ConvState,
    input: InputStage,
    original: String,
    corrected: String,
    evaluation: &Evaluation,
) -> TransitionResult {
    if !evaluation.accepted {
        return stay(state, prompts::rejected_reply(input, evaluation.feedback_text()));
    }

    let value = evaluation
        .rewrite()
        .map_or(corrected, str::to_string);
    let mut next = state.clone();
    next.fields.store(
        input,
        CapturedField {
            original,
            value: value.clone(),
        },
    );
    next.stage = input.next();

    let reply = prompts::accepted_reply(input, &next.fields, &value, evaluation);
    let result = TransitionResult::new(next)
        .with_effect(Effect::reply(reply))
        .with_effect(Effect::PersistState);

    if input == InputStage::FinalPrompt {
        result.with_effect(polish_decision(&value))
    } else {
        result
    }
}

fn polish_decision(final_prompt: &str) -> Effect {
    Effect::RequestDecision {
        system: prompts::POLISH_SYSTEM.to_string(),
        prompt: prompts::polish_request(final_prompt),
        scope: vec![
            ToolCategory::Polish,
            ToolCategory::Clarity,
            ToolCategory::Research,
        ],
        include_history: true,
    }
}

fn finish_coaching(mut next: ConvState, note: Option<&str>) -> TransitionResult {
    next.pending_tool = None;
    next.stage = Stage::Completed;
    let message = prompts::completion_message(&next.fields, note);
    TransitionResult::new(next)
        .with_effect(Effect::reply(message))
        .with_effect(Effect::PersistState)
}

fn restart() -> TransitionResult {
    TransitionResult::new(ConvState::at(Stage::AwaitingTaskInput))
        .with_effect(Effect::reply(prompts::COACH_WELCOME))
        .with_effect(Effect::PersistState)
}

// ============================================================================
// Refiner
// ============================================================================

fn refiner(
    state: &ConvState,
    context: &ConvContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (&state.stage, event) {
        (Stage::Start, Event::Begin) => {
            Ok(TransitionResult::new(ConvState::at(Stage::AwaitingPrompt))
                .with_effect(Effect::PersistState))
        }

        (
            Stage::AwaitingPrompt,
            Event::UserInput {
                text,
                document_hint,
            },
        ) => Ok(refiner_input(state, context, text, document_hint)),

        (Stage::AwaitingPrompt, event) => refiner_progress(state, event),

        (_, event) => Err(invalid(state, &event)),
    }
}

fn refiner_input(
    state: &ConvState,
    context: &ConvContext,
    text: String,
    document_hint: bool,
) -> TransitionResult {
    match classifier::refiner_rules().classify(&text) {
        Intent::Blank => missing_input(state, "Empty message"),
        Intent::Greeting => stay(state, prompts::REFINER_GREETING),
        Intent::HelpRequest => stay(state, prompts::FRAMEWORK_OVERVIEW),
        _ => {
            let has_document = document_hint
                || (context.documents_available && classifier::mentions_documents(&text));
            let next = ConvState {
                refinement: Some(RefinementOutcome::new(text.trim(), has_document)),
                pending_tool: None,
                ..state.clone()
            };
            TransitionResult::new(next)
                .with_effect(Effect::PersistState)
                .with_effect(Effect::ClassifyCategory { prompt: text })
        }
    }
}

/// Classification, tool choice, tool result and analysis for one prompt
fn refiner_progress(state: &ConvState, event: Event) -> Result<TransitionResult, TransitionError> {
    let mut next = state.clone();
    let Some(outcome) = next.refinement.as_mut() else {
        return Err(invalid(state, &event));
    };

    match event {
        Event::Classified { category } => {
            outcome.category = category;
            let decision = Effect::RequestDecision {
                system: prompts::refine_instruction(category, outcome.has_document),
                prompt: outcome.original_prompt.clone(),
                scope: outcome.scope(),
                include_history: false,
            };
            Ok(TransitionResult::new(next)
                .with_effect(Effect::PersistState)
                .with_effect(decision))
        }

        Event::Decided {
            decision: Decision::Invoke(call),
        } => {
            outcome.framework_used = Some(call.name.clone());
            Ok(request_tool(next, call))
        }

        Event::Decided {
            decision: Decision::Respond(text),
        } => {
            let refined = match text.trim() {
                "" => outcome.original_prompt.clone(),
                trimmed => trimmed.to_string(),
            };
            outcome.framework_used = Some(DIRECT_REFINEMENT.to_string());
            outcome.refined_prompt = Some(refined);
            let analysis = analysis_request(outcome);
            Ok(TransitionResult::new(next)
                .with_effect(Effect::PersistState)
                .with_effect(analysis))
        }

        Event::DecisionFailed { .. } => Ok(TransitionResult::new(next)
            .with_effect(Effect::reply(prompts::refinement_unavailable()))),

        Event::ToolFinished { call_id, output } => {
            let call = take_pending(&mut next.pending_tool, &call_id)?;
            let tool_message = ChatMessage::tool_result(call_id, output.output.clone());

            let follow_up = if output.succeeded() {
                outcome.refined_prompt = Some(output.output.trim().to_string());
                analysis_request(outcome)
            } else {
                Effect::reply(prompts::refinement_tool_failed(&call.name, &output))
            };

            Ok(TransitionResult::new(next)
                .with_effect(Effect::AppendMessage(tool_message))
                .with_effect(Effect::PersistState)
                .with_effect(follow_up))
        }

        Event::AnalysisReady { text } if !text.trim().is_empty() => Ok(stay(state, text)),

        Event::AnalysisReady { .. } | Event::AnalysisFailed { .. } => {
            let report = prompts::refinement_report(
                outcome.category,
                outcome.framework_used.as_deref().unwrap_or(DIRECT_REFINEMENT),
                outcome
                    .refined_prompt
                    .as_deref()
                    .unwrap_or(&outcome.original_prompt),
            );
            Ok(stay(state, report))
        }

        other => Err(invalid(state, &other)),
    }
}

fn analysis_request(outcome: &RefinementOutcome) -> Effect {
    Effect::RequestAnalysis {
        system: prompts::ANALYST_SYSTEM.to_string(),
        prompt: prompts::analysis_instruction(
            outcome.category,
            outcome.framework_used.as_deref().unwrap_or(DIRECT_REFINEMENT),
            &outcome.original_prompt,
            outcome.refined_prompt.as_deref().unwrap_or_default(),
        ),
    }
}

// ============================================================================
// Grammar
// ============================================================================

fn grammar(state: &ConvState, event: Event) -> Result<TransitionResult, TransitionError> {
    match (&state.stage, event) {
        (Stage::Start, Event::Begin) => Ok(TransitionResult::new(ConvState::at(
            Stage::AwaitingText,
        ))
        .with_effect(Effect::AppendMessage(ChatMessage::system(
            prompts::GRAMMAR_SYSTEM_INSTRUCTION,
        )))
        .with_effect(Effect::PersistState)),

        (Stage::AwaitingText, Event::UserInput { text, .. }) => {
            match classifier::grammar_rules().classify(&text) {
                Intent::Blank => Ok(missing_input(state, "Empty message")),
                Intent::Greeting | Intent::TooShort => Ok(stay(state, prompts::GRAMMAR_GREETING)),
                _ => Ok(TransitionResult::new(state.clone())
                    .with_effect(Effect::CorrectGrammar { text })),
            }
        }

        (Stage::AwaitingText, Event::GrammarChecked { result, .. }) => {
            let reply = prompts::grammar_reply(&result);
            let next = ConvState {
                grammar: Some(result),
                ..state.clone()
            };
            Ok(TransitionResult::new(next)
                .with_effect(Effect::reply(reply))
                .with_effect(Effect::PersistState))
        }

        (Stage::AwaitingText, Event::GrammarFailed { message, .. }) => {
            Ok(stay(state, prompts::grammar_error(&message)))
        }

        (_, event) => Err(invalid(state, &event)),
    }
}
