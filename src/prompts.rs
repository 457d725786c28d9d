//! Reply text and LLM instructions
//!
//! Everything the agents say, and everything they ask the model, lives here
//! so the transition tables stay readable.

use crate::evaluator::Evaluation;
use crate::grammar::GrammarResult;
use crate::state_machine::state::{CollectedFields, InputStage};
use crate::state_machine::Category;
use crate::tools::ToolOutput;
use std::fmt::Write as _;

pub const COACH_WELCOME: &str = "**Welcome!** I'm here to help you master prompt engineering by building an effective prompt using the **'Task (Persona and Format), Context, References, Evaluate, Iterate'** framework.

**Let's start with the Task.** Please describe what you would like to accomplish. It could be a specific goal or a general area of interest.

**Don't have anything in mind?** Just ask me to \"suggest some tasks\" and I'll generate creative ideas for you!";

pub const GRAMMAR_SYSTEM_INSTRUCTION: &str = "You are an expert English grammar assistant. Help users improve their writing by identifying and correcting grammar, spelling, punctuation and clarity issues. Focus on subject-verb agreement, tense, articles and prepositions; misspelled words; punctuation; and sentence structure. Always explain the changes made and suggest further improvements.";

pub const GRAMMAR_GREETING: &str = "Hello! 👋 Send me a sentence or paragraph and I'll check its grammar, spelling and punctuation.";

pub const RESEND_REQUEST: &str = "I didn't receive a message from you. Please send your input again so we can continue.";

pub const EVALUATION_UNAVAILABLE: &str = "Sorry, I had trouble reviewing that just now. Could you send it again? If the problem continues, try rephrasing it slightly.";

pub const COMPLETED_HINT: &str = "Your prompt is complete! 🎉 Say \"start over\" whenever you want to build a new one.";

/// Stand-in reference recorded when the user skips the reference step
pub const PLACEHOLDER_REFERENCE: &str = "No specific references provided.";

pub const POLISHING: &str = "Excellent prompt! Let me polish it for you...";

pub const COACH_SYSTEM: &str = "You are a friendly prompt-engineering coach helping a learner practise writing prompts.";

pub const SUGGESTION_REQUEST: &str = "Generate 4 creative and diverse task ideas for prompt engineering practice. Each task should be practical, engaging, and cover a different domain. Format your response as a numbered list with brief descriptions.";

const SUGGESTIONS_FALLBACK: &str = "1. **Study buddy**: a chatbot that quizzes students on a chapter of their textbook
2. **Email assistant**: a template for polite follow-up emails after job interviews
3. **Recipe planner**: a weekly meal plan built from what is already in the fridge
4. **Code reviewer**: feedback on a short Python function for readability";

pub const REFERENCE_SUGGESTIONS: &str = "No problem, references are optional but they often make a prompt much stronger. Some ideas:
- A link or document the AI should draw on
- An example of the output you like (a past email, a sample answer)
- A style guide, tone or formatting preference
- Specific facts or data that must be included

If you'd rather skip this step, just say **\"proceed without references\"**.";

pub const REFINER_GREETING: &str = "Hello! 👋 Paste a prompt you'd like to improve and I'll classify it, pick the best refinement framework and rewrite it for you.";

pub const FRAMEWORK_OVERVIEW: &str = "I refine prompts with one of these frameworks, chosen automatically:

**Clarity** (structure and plain language)
- **C.O.R.E.**: Context, Objective, Role, Example
- **R.A.C.E.**: Role, Action, Context, Expectation
- **C.A.R.**: Context, Action, Result
- **S.P.E.A.R.**: Situation, Problem, Emotion, Action, Result

**Precision** (technical detail and constraints)
- **RISEN**: Role, Instructions, Steps, Goal, Narrowing
- **SCORER**: Set the scene, Clarify, Offer options, Refine, Evaluate, Reflect

**Creative** (brainstorming and open-ended ideas)
- **IDEA**: Inspire, Develop, Express, Assess

Send me your prompt to get started.";

pub const CLASSIFIER_SYSTEM: &str = "You are a prompt classifier. Answer with a single lowercase word.";

pub const ANALYST_SYSTEM: &str = "You are an expert prompt-engineering analyst writing a short final report for the user.";

pub fn suggestions_reply(ideas: &str) -> String {
    format!(
        "**Here are some creative task suggestions for you:**\n\n{}\n\n**Choose one of these or describe your own task!**",
        ideas.trim()
    )
}

pub fn suggestions_fallback() -> String {
    suggestions_reply(SUGGESTIONS_FALLBACK)
}

/// Re-prompt for greetings and inputs too short to judge
pub fn greeting_reprompt(stage: InputStage) -> String {
    match stage {
        InputStage::Task => "Hello! 👋 I'm excited to help you create an effective prompt!

To get started, please tell me what you'd like to accomplish. For example:
- \"Create a chatbot for tutoring students in math\"
- \"Write a professional email template\"
- \"Generate code for a simple calculator\"
- \"Design a lesson plan for teaching history\"

**What would you like to create or build?**"
            .to_string(),
        InputStage::Context => {
            "Hi again! We're on the **Context** step. Tell me about the background, audience, requirements or purpose of your task.".to_string()
        }
        InputStage::References => {
            "Hi again! We're on the **References** step. Share any documents, links, examples or style preferences that should shape the result.".to_string()
        }
        InputStage::FinalPrompt => {
            "Hi again! All that's left is your **final prompt**. Write the complete prompt, combining your task, context and references.".to_string()
        }
    }
}

/// Guidance for help requests outside the task suggestion path
pub fn stage_guidance(stage: InputStage, fields: &CollectedFields) -> String {
    match stage {
        InputStage::Task => "Think about something you'd like an AI to do for you: write, explain, plan, analyse or build. Describe it in a sentence, or ask me to \"suggest some tasks\".".to_string(),
        InputStage::Context => format!(
            "Context helps the AI understand your situation. For the task **\"{}\"**, consider:
- **Background**: What's the setting or situation?
- **Audience**: Who is this for?
- **Requirements**: Any constraints on length, style or format?
- **Purpose**: How will the result be used?",
            fields.task_value()
        ),
        InputStage::References => format!(
            "References ground the AI in your material.\n\n{REFERENCE_SUGGESTIONS}"
        ),
        InputStage::FinalPrompt => format!(
            "Combine everything into one prompt. A good pattern is:

*\"You are a [persona]. [Task]. [Context]. Use [references]. Respond in [format].\"*

{}",
            summary(fields)
        ),
    }
}

/// Judging instruction for one coach stage. Prior accepted fields are
/// embedded so the model judges relevance, not just form.
pub fn evaluation_instruction(stage: InputStage, fields: &CollectedFields, input: &str) -> String {
    const LENIENCY: &str = "Be ENCOURAGING and HELPFUL. ACCEPT anything that shows clear intent, even if it could be more specific, and put improvement ideas in the feedback and suggestions. ONLY REJECT input that is empty, completely unrelated, nonsensical, or harmful.";

    match stage {
        InputStage::Task => format!(
            "Evaluate the following user-defined task based on clarity, specificity, and actionability.
User's Task: \"{input}\"

ACCEPT the task if it describes any content creation, assistant or chatbot functionality, educational request, analysis or research, or creative or technical project.

{LENIENCY}"
        ),
        InputStage::Context => format!(
            "Evaluate the following user-defined context based on relevance, completeness, and clarity.
Analyze how well it supports the task: \"{}\"
User's Context: \"{input}\"

{LENIENCY}",
            fields.task_value()
        ),
        InputStage::References => format!(
            "Evaluate the following user-defined references based on relevance, credibility, and usefulness.
Task: \"{}\", Context: \"{}\", References: \"{input}\"

{LENIENCY}",
            fields.task_value(),
            fields.context_value()
        ),
        InputStage::FinalPrompt => format!(
            "Evaluate this final prompt for clarity, completeness, and effectiveness.
Components gathered so far:
{}
Final prompt: \"{input}\"

Is this prompt well-structured and ready to use?

{LENIENCY}",
            summary(fields)
        ),
    }
}

/// Reply after an accepted input; `value` is what was stored
pub fn accepted_reply(
    stage: InputStage,
    fields: &CollectedFields,
    value: &str,
    evaluation: &Evaluation,
) -> String {
    let mut reply = match stage {
        InputStage::Task => format!(
            "Perfect! I understand your task: **\"{value}\"**

Now let's add some context to make your prompt even more effective. Think about:
- **Background**: What's the setting or situation?
- **Audience**: Who is this for? (students, professionals, general audience?)
- **Requirements**: Any specific constraints, length, style, or format needed?
- **Purpose**: How will this be used or what's the end goal?

**What context can you provide for your task?**"
        ),
        InputStage::Context => format!(
            "Excellent! Your context adds great depth: \"{value}\"

Now let's gather references. Please think about:
- Documents, links, or resources that could help
- Examples of similar tasks or prompts
- Specific data or information to include
- Style guides or formatting preferences

**Please describe any references or additional resources for your task.**"
        ),
        InputStage::References => final_prompt_request(fields),
        InputStage::FinalPrompt => POLISHING.to_string(),
    };
    append_coaching_notes(&mut reply, evaluation);
    reply
}

/// Ask for the final prompt once every component is gathered
pub fn final_prompt_request(fields: &CollectedFields) -> String {
    format!(
        "Perfect! You have all the key components:
{}
**Now create your final prompt** that incorporates:
- Your task (with clear persona/role and output format)
- The context you've provided
- Reference to the resources you mentioned
- Clear, specific instructions

**Write your complete engineered prompt below:**",
        summary(fields)
    )
}

/// Reply after a rejected input. The feedback is quoted verbatim.
pub fn rejected_reply(stage: InputStage, feedback: &str) -> String {
    match stage {
        InputStage::Task => format!(
            "I'd like to help, but I need a clearer understanding of what you want to accomplish.

{feedback}

**Examples of tasks I can help with:**
- \"Create a chatbot for customer service\"
- \"Write an essay about climate change\"
- \"Generate code for a calculator app\"
- \"Design a lesson plan for teaching math\"

**What would you like to create or accomplish?**"
        ),
        InputStage::Context => {
            format!("{feedback}\n\nPlease provide more detailed context and try again.")
        }
        InputStage::References => format!(
            "{feedback}\n\nPlease provide better references and try again, or say \"proceed without references\" to skip this step."
        ),
        InputStage::FinalPrompt => {
            format!("{feedback}\n\nPlease refine your prompt based on this feedback.")
        }
    }
}

pub const POLISH_SYSTEM: &str = "You are polishing a user's finished prompt. Use the grammar_checker tool to correct it. Call exactly one tool and do not rewrite the prompt yourself.";

pub fn polish_request(final_prompt: &str) -> String {
    format!("Please use the grammar_checker tool to polish this prompt: {final_prompt}")
}

pub fn tool_call_notice(tool_name: &str) -> String {
    format!("Running `{tool_name}`...")
}

pub fn polish_failed(tool_name: &str, output: &ToolOutput) -> String {
    format!(
        "I couldn't polish your prompt automatically (`{tool_name}` reported: {}). Your prompt is shown exactly as you wrote it.",
        output.output.trim()
    )
}

/// Closing message for the coach flow
pub fn completion_message(fields: &CollectedFields, note: Option<&str>) -> String {
    let mut message = format!(
        "**Congratulations!** You've successfully crafted a well-structured prompt using the **'Task, Context, References, Evaluate, Iterate'** framework.

**Your Final Engineered Prompt:**

---
{}
---
",
        fields.final_prompt_value()
    );

    if let Some(polished) = fields.polished.as_deref() {
        let _ = write!(message, "\n**Polished version:**\n\n{}\n", polished.trim());
    }
    if let Some(note) = note.map(str::trim).filter(|n| !n.is_empty()) {
        let _ = write!(message, "\n{note}\n");
    }

    message.push_str(
        "
**What you've accomplished:**
- Defined a clear task with persona and format
- Provided relevant context
- Included helpful references
- Practiced evaluation and iteration throughout

You can now use this prompt with your AI model or save it to your prompt library.

**Happy Prompting!**",
    );
    message
}

pub fn category_instruction(prompt: &str) -> String {
    format!(
        "Analyze the following user prompt and categorize it into ONLY one of the following: \"clarity\", \"precision\", or \"creative\".
- \"clarity\": For prompts needing better structure or simpler language.
- \"precision\": For prompts needing technical detail, constraints, or specific formatting.
- \"creative\": For prompts needing brainstorming, imagination, or open-ended ideas.

User Prompt: \"{prompt}\"

Return only the single category name and nothing else."
    )
}

pub fn refine_instruction(category: Category, has_document: bool) -> String {
    let mut instruction = format!(
        "You are a prompt refinement expert.
The user's prompt has been classified as '{}'.
Select the SINGLE most appropriate refinement tool from your available tools and call it with the user's prompt.
You MUST call one and only one tool. Do not respond to the user directly.",
        category.as_str()
    );
    if has_document {
        instruction.push_str(
            "\nThe user has uploaded documents. If the prompt depends on their content, call document_search instead.",
        );
    }
    instruction
}

pub fn analysis_instruction(
    category: Category,
    framework: &str,
    original: &str,
    refined: &str,
) -> String {
    format!(
        "The user's prompt was classified under '{}'.
The '{framework}' framework was automatically chosen to refine it.

Explain in 1-2 sentences *why* '{framework}' was a good choice for this prompt, then show the refined prompt.

**User's Original Prompt:**
\"{original}\"

**Refined Prompt:**
{refined}",
        category.as_str()
    )
}

/// Report used when the analysis call fails
pub fn refinement_report(category: Category, framework: &str, refined: &str) -> String {
    format!(
        "Your prompt was classified as **{}** and refined with **{framework}**.\n\n**Refined Prompt:**\n\n{}",
        category.as_str(),
        refined.trim()
    )
}

pub fn refinement_unavailable() -> String {
    "Sorry, I couldn't refine your prompt right now. Please try again in a moment.".to_string()
}

pub fn refinement_tool_failed(tool_name: &str, output: &ToolOutput) -> String {
    format!(
        "The `{tool_name}` step didn't succeed: {}\n\nYour original prompt is unchanged. Try sending it again, perhaps with a little more detail.",
        output.output.trim()
    )
}

pub fn grammar_reply(result: &GrammarResult) -> String {
    if !result.changed() && result.suggestions.is_empty() {
        return format!(
            "**Great news!** I didn't find any issues.\n\n---\n{}\n---",
            result.corrected_text
        );
    }

    let mut reply = format!(
        "**Corrected text:**\n\n---\n{}\n---\n",
        result.corrected_text
    );
    if !result.corrections_made.is_empty() {
        reply.push_str("\n**Corrections made:**\n");
        for correction in &result.corrections_made {
            let _ = writeln!(reply, "- {correction}");
        }
    }
    if !result.suggestions.is_empty() {
        reply.push_str("\n**Other suggestions:**\n");
        for suggestion in &result.suggestions {
            let _ = writeln!(reply, "- {suggestion}");
        }
    }
    reply
}

pub fn grammar_error(message: &str) -> String {
    format!(
        "**Error during grammar correction:** {message}\n\nPlease try again with your text, or let me know if you need help with a specific grammar issue."
    )
}

/// Task, context and references as a bullet summary
pub fn summary(fields: &CollectedFields) -> String {
    let references = if fields.references.is_empty() {
        PLACEHOLDER_REFERENCE.to_string()
    } else {
        fields
            .references
            .iter()
            .map(|r| r.value.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    };
    format!(
        "- **Task:** {}\n- **Context:** {}\n- **References:** {references}\n",
        fields.task_value(),
        fields.context_value()
    )
}

fn append_coaching_notes(reply: &mut String, evaluation: &Evaluation) {
    let feedback = evaluation.feedback.trim();
    if !feedback.is_empty() {
        let _ = write!(reply, "\n\n💡 {feedback}");
    }
    if let Some(suggestions) = &evaluation.suggestions {
        reply.push_str("\n\n**Ideas to make it even better:**");
        for suggestion in suggestions {
            let _ = write!(reply, "\n- {suggestion}");
        }
    }
}
