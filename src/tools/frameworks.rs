//! Prompt-engineering frameworks exposed as refinement tools
//!
//! Each framework is a fixed list of components. The tool asks the model to
//! extract or infer every component from the user's prompt and rebuild the
//! prompt around them.

use super::{string_argument, text_argument_schema, Tool, ToolCategory, ToolContext, ToolOutput};
use crate::llm::LlmRequest;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Write as _;

const EMPTY_PROMPT: &str = "Error: The prompt cannot be empty.";

const REFINER_SYSTEM: &str = "You are an expert in prompt engineering. Reply with the refined prompt only.";

/// One refinement framework
#[derive(Debug)]
pub struct Framework {
    pub tool_name: &'static str,
    pub title: &'static str,
    /// Component list as shown in the tool description
    pub summary: &'static str,
    pub best_for: &'static str,
    pub category: ToolCategory,
    /// (component, question the model answers for it)
    pub components: &'static [(&'static str, &'static str)],
}

pub static FRAMEWORKS: &[Framework] = &[
    Framework {
        tool_name: "core_refiner",
        title: "C.O.R.E.",
        summary: "Context, Objective, Role, Example",
        best_for: "Prompts needing better structure and clear communication.",
        category: ToolCategory::Clarity,
        components: &[
            ("Context", "What is the necessary background information?"),
            ("Objective", "What is the primary goal the user wants to achieve?"),
            ("Role", "What perspective or persona should the AI adopt?"),
            ("Example", "What is a good example of the desired output format or tone?"),
        ],
    },
    Framework {
        tool_name: "race_refiner",
        title: "R.A.C.E.",
        summary: "Role, Action, Context, Expectation",
        best_for: "Prompts needing clear role definition and action steps.",
        category: ToolCategory::Clarity,
        components: &[
            ("Role", "What specific character or persona should the AI adopt?"),
            ("Action", "What specific task should the AI perform?"),
            ("Context", "What background information is necessary?"),
            ("Expectation", "What is the desired outcome or output format?"),
        ],
    },
    Framework {
        tool_name: "car_refiner",
        title: "C.A.R.",
        summary: "Context, Action, Result",
        best_for: "Prompts needing clear context and expected outcomes.",
        category: ToolCategory::Clarity,
        components: &[
            ("Context", "What is the necessary background information?"),
            ("Action", "What is the specific task the AI should perform?"),
            ("Result", "What is the desired outcome or output format?"),
        ],
    },
    Framework {
        tool_name: "spear_refiner",
        title: "S.P.E.A.R.",
        summary: "Situation, Problem, Emotion, Action, Result",
        best_for: "Complex prompts needing comprehensive analysis and emotional context.",
        category: ToolCategory::Clarity,
        components: &[
            ("Situation", "What is the current situation or context?"),
            ("Problem", "What is the specific problem or challenge?"),
            ("Emotion", "What is the emotional tone or sentiment?"),
            ("Action", "What action should the AI take?"),
            ("Result", "What is the desired outcome or output format?"),
        ],
    },
    Framework {
        tool_name: "risen_refiner",
        title: "RISEN",
        summary: "Role, Instructions, Steps, Goal, Narrowing",
        best_for: "Technical prompts needing detailed step-by-step instructions and constraints.",
        category: ToolCategory::Precision,
        components: &[
            ("Role", "What role should the AI assume?"),
            ("Instructions", "What specific instructions should the AI follow?"),
            ("Steps", "What are the detailed steps the AI should take?"),
            ("Goal", "What is the clear end goal?"),
            ("Narrowing", "What constraints should the AI consider?"),
        ],
    },
    Framework {
        tool_name: "scorer_refiner",
        title: "SCORER",
        summary: "Set scene, Clarify task, Offer options, Refine output, Evaluate results, Reflect",
        best_for: "Complex projects needing comprehensive planning and evaluation processes.",
        category: ToolCategory::Precision,
        components: &[
            ("Set the scene", "What is the context or background?"),
            ("Clarify the task", "What specific task needs to be accomplished?"),
            ("Offer options", "What are the possible approaches or solutions?"),
            ("Refine the output", "How can the output be improved or made more precise?"),
            ("Evaluate the results", "How will the results be assessed?"),
            ("Reflect on the process", "What insights can be gained from this process?"),
        ],
    },
    Framework {
        tool_name: "idea_refiner",
        title: "IDEA",
        summary: "Inspire, Develop, Express, Assess",
        best_for: "Creative prompts needing brainstorming and imaginative development.",
        category: ToolCategory::Creative,
        components: &[
            ("Inspire", "How can the AI inspire creativity?"),
            ("Develop", "What ideas need further development?"),
            ("Express", "How can the ideas be expressed clearly?"),
            ("Assess", "How will the effectiveness of the ideas be assessed?"),
        ],
    },
];

impl Framework {
    /// Instruction asking the model to rebuild `prompt` around this framework
    pub fn instruction(&self, prompt: &str) -> String {
        let mut text = format!(
            "Your task is to refine the following user's prompt using the {} framework.\nAnalyze the user's prompt and extract or infer the key components:\n\n",
            self.title
        );
        for (i, (component, question)) in self.components.iter().enumerate() {
            let _ = writeln!(text, "{}. **{component}:** {question}", i + 1);
        }
        let _ = write!(
            text,
            "\nIf a component is missing from the user's prompt, you MUST infer a reasonable value for it. Do not ask for clarification.\n\n**User's Prompt:** \"{prompt}\"\n\nNow, construct a new, refined prompt based on your analysis, formatted clearly using the {} structure.",
            self.title
        );
        text
    }
}

/// Refinement tool backed by one framework
pub struct FrameworkTool {
    framework: &'static Framework,
}

impl FrameworkTool {
    pub fn new(framework: &'static Framework) -> Self {
        Self { framework }
    }
}

#[async_trait]
impl Tool for FrameworkTool {
    fn name(&self) -> &str {
        self.framework.tool_name
    }

    fn description(&self) -> String {
        format!(
            "Refines prompts using the {} framework ({}). Best for: {}",
            self.framework.title, self.framework.summary, self.framework.best_for
        )
    }

    fn category(&self) -> ToolCategory {
        self.framework.category
    }

    fn input_schema(&self) -> Value {
        text_argument_schema("prompt", "The user's original, unrefined prompt.")
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        let prompt = string_argument(&input, "prompt").unwrap_or_default();
        if prompt.trim().is_empty() {
            return ToolOutput::error(EMPTY_PROMPT);
        }

        let request = LlmRequest::simple(REFINER_SYSTEM, self.framework.instruction(prompt));
        match ctx.llm.complete(&request).await {
            Ok(response) => ToolOutput::success(response.text().trim()),
            Err(e) => ToolOutput::error(format!(
                "Error during {} refinement: {}",
                self.framework.title, e.message
            )),
        }
    }
}
