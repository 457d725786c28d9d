//! Property-based tests for the state machine
//!
//! These tests verify key invariants hold across all possible inputs.

use super::state::*;
use super::transition::*;
use super::*;
use crate::db::Role;
use crate::evaluator::Evaluation;
use crate::llm::{ContentBlock, LlmResponse, Usage};
use crate::tools::{ToolCategory, ToolOutput};
use proptest::prelude::*;
use serde_json::json;

// ============================================================================
// Test Helpers
// ============================================================================

fn coach_context() -> ConvContext {
    ConvContext::new("test-conv", Flow::Coach, false)
}

fn refiner_context() -> ConvContext {
    ConvContext::new("test-conv", Flow::Refiner, false)
}

fn assistant_texts(result: &TransitionResult) -> Vec<String> {
    result
        .effects
        .iter()
        .filter_map(|e| match e {
            Effect::AppendMessage(msg) if msg.role == Role::Assistant => Some(msg.content.clone()),
            _ => None,
        })
        .collect()
}

fn requests_evaluation(result: &TransitionResult) -> bool {
    result.effects.iter().any(|e| {
        matches!(
            e,
            Effect::Evaluate { .. } | Effect::CorrectGrammar { .. }
        )
    })
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_input_stage() -> impl Strategy<Value = InputStage> {
    prop_oneof![
        Just(InputStage::Task),
        Just(InputStage::Context),
        Just(InputStage::References),
        Just(InputStage::FinalPrompt),
    ]
}

fn arb_captured() -> impl Strategy<Value = CapturedField> {
    ("[a-zA-Z ]{5,30}", "[a-zA-Z ]{5,30}")
        .prop_map(|(original, value)| CapturedField { original, value })
}

fn arb_fields() -> impl Strategy<Value = CollectedFields> {
    (
        proptest::option::of(arb_captured()),
        proptest::option::of(arb_captured()),
        proptest::collection::vec(arb_captured(), 0..3),
    )
        .prop_map(|(task, context, references)| CollectedFields {
            task,
            context,
            references,
            ..CollectedFields::default()
        })
}

fn arb_coach_input_state() -> impl Strategy<Value = (InputStage, ConvState)> {
    (arb_input_stage(), arb_fields()).prop_map(|(input, fields)| {
        let state = ConvState {
            stage: input.stage(),
            fields,
            ..ConvState::default()
        };
        (input, state)
    })
}

fn arb_greeting() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("hi".to_string()),
        Just("Hello".to_string()),
        Just("hey!".to_string()),
        Just("  howdy ".to_string()),
        Just("yo".to_string()),
        "[a-z]{1,4}",
    ]
}

fn arb_feedback() -> impl Strategy<Value = String> {
    "[A-Z][a-z]{3,12}( [a-z]{2,10}){1,6}\\."
}

fn arb_category() -> impl Strategy<Value = Category> {
    prop_oneof![
        Just(Category::Clarity),
        Just(Category::Precision),
        Just(Category::Creative),
    ]
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // Accepted input always advances exactly one stage and stores the value
    #[test]
    fn prop_accept_advances((input, state) in arb_coach_input_state(), text in "[a-zA-Z ]{5,40}") {
        let event = Event::Evaluated {
            original: text.clone(),
            corrected: text.clone(),
            evaluation: Evaluation::accept(""),
        };
        let result = transition(&state, &coach_context(), event).unwrap();
        prop_assert_eq!(&result.new_state.stage, &input.next());
        let stored = result.new_state.fields.get(input).unwrap();
        prop_assert_eq!(&stored.value, &text);
        prop_assert!(result.effects.contains(&Effect::PersistState));
    }

    // Rejected input never moves and always shows the evaluator's feedback
    #[test]
    fn prop_reject_stays_with_feedback((_, state) in arb_coach_input_state(), feedback in arb_feedback()) {
        let event = Event::Evaluated {
            original: "something".to_string(),
            corrected: "something".to_string(),
            evaluation: Evaluation::reject(feedback.clone()),
        };
        let result = transition(&state, &coach_context(), event).unwrap();
        prop_assert_eq!(&result.new_state, &state);
        let texts = assistant_texts(&result);
        prop_assert_eq!(texts.len(), 1);
        prop_assert!(texts[0].contains(&feedback));
    }

    // Greetings and too-short input never reach the evaluator
    #[test]
    fn prop_greeting_never_evaluates((_, state) in arb_coach_input_state(), text in arb_greeting()) {
        let result = transition(&state, &coach_context(), Event::user_input(text)).unwrap();
        prop_assert!(!requests_evaluation(&result));
    }

    // Blank input always lands in the error stage, which resumes where it was
    #[test]
    fn prop_blank_input_is_recoverable((_, state) in arb_coach_input_state(), blank in "[ \t\n]{0,5}") {
        let result = transition(&state, &coach_context(), Event::user_input(blank)).unwrap();
        match &result.new_state.stage {
            Stage::Error { resume, .. } => prop_assert_eq!(resume.as_ref(), &state.stage),
            other => prop_assert!(false, "expected error stage, got {:?}", other),
        }
        prop_assert!(!requests_evaluation(&result));
    }

    // Any label outside the fixed set falls back to clarity
    #[test]
    fn prop_unknown_label_is_clarity(label in "[a-z]{1,12}") {
        prop_assume!(label != "precision" && label != "creative");
        prop_assert_eq!(Category::from_label(&label), Category::Clarity);
    }

    // A model reply with no tool use never executes a tool
    #[test]
    fn prop_respond_never_executes_tool(category in arb_category(), reply in "[a-zA-Z .]{0,60}") {
        let mut outcome = RefinementOutcome::new("Write a cover letter", false);
        outcome.category = category;
        let state = ConvState {
            refinement: Some(outcome),
            ..ConvState::at(Stage::AwaitingPrompt)
        };
        let scope = state.refinement.as_ref().map(RefinementOutcome::scope).unwrap_or_default();
        let decision = Decision::from_response(&LlmResponse::text_only(reply), &scope);
        let result = transition(&state, &refiner_context(), Event::Decided { decision }).unwrap();

        let executes_tool = result.effects.iter().any(|e| matches!(e, Effect::ExecuteTool { .. }));
        prop_assert!(!executes_tool, "a plain reply must not run a tool");
        prop_assert!(result.new_state.pending_tool.is_none());
        let framework = result.new_state.refinement.unwrap().framework_used;
        prop_assert_eq!(framework.as_deref(), Some(DIRECT_REFINEMENT));
    }

    // Only the first tool use of a reply is honored
    #[test]
    fn prop_first_tool_use_wins(names in proptest::collection::vec("[a-z]{3,10}_refiner", 1..4)) {
        let content = names
            .iter()
            .enumerate()
            .map(|(i, name)| ContentBlock::tool_use(format!("call_{i}"), name.clone(), json!({})))
            .collect();
        let response = LlmResponse { content, end_turn: false, usage: Usage::default() };
        match Decision::from_response(&response, &[ToolCategory::Clarity]) {
            Decision::Invoke(call) => {
                prop_assert_eq!(call.id, "call_0");
                prop_assert_eq!(&call.name, &names[0]);
                prop_assert_eq!(call.scope, vec![ToolCategory::Clarity]);
            }
            Decision::Respond(_) => prop_assert!(false, "expected a tool call"),
        }
    }

    // A tool result with the pending id always clears the pending call
    #[test]
    fn prop_matching_tool_result_clears_pending(
        id in "[a-z]{8}",
        output in "[a-zA-Z0-9 ]{0,50}",
        success in any::<bool>()
    ) {
        let state = ConvState {
            pending_tool: Some(ToolCall::new(id.clone(), "grammar_checker", json!({}))),
            ..ConvState::at(Stage::ReadyToRefine)
        };
        let output = if success { ToolOutput::success(output) } else { ToolOutput::error(output) };
        let result = transition(&state, &coach_context(), Event::ToolFinished { call_id: id, output }).unwrap();
        prop_assert!(result.new_state.pending_tool.is_none());
        prop_assert_eq!(result.new_state.stage, Stage::Completed);
    }

    // State survives a JSON checkpoint unchanged
    #[test]
    fn prop_checkpoint_roundtrip((_, state) in arb_coach_input_state()) {
        let json = serde_json::to_string(&state).unwrap();
        let back: ConvState = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, state);
    }
}
