//! Prompt templates for every generation action.
//!
//! Each template may be overridden by a Markdown file whose stem matches the
//! template key (e.g. `prompts/tutor_system.md`). Placeholders are written as
//! `{topic}`, `{title}`, `{content}`, `{question}` and `{mode}` and are filled
//! in a single pass, so substituted text is never re-expanded.

use crate::llm_client::{ChatTurn, GenerationRequest};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

const OUTLINE_SYSTEM: &str = "You are an expert instructional designer. Create a comprehensive course outline in Markdown. The structure must include: Course Title, Course Description, Prerequisites, Learning Objectives, and Course Modules. Inside each module, list several lessons using standard bullet points.";

const LESSON_SYSTEM: &str = "You are an expert educator. Generate detailed, engaging lesson content in Markdown. The structure should include an Introduction, Core Concepts, Examples, and a Key Takeaway. Format headings with ## and ###. Use bolding for key terms.";
const LESSON_USER: &str =
    "The main course topic is \"{topic}\". Generate the lesson content for: \"{title}\".";

const TUTOR_SYSTEM: &str = "You are a supportive AI tutor. Provide clear, step-by-step explanations to help learners understand concepts better. Keep answers concise yet educational.";
const TUTOR_USER: &str = "Course: \"{topic}\"\nLesson: \"{title}\"\nContent: \"\"\"{content}\"\"\"\nLearner's question: {question}";

const NOTES_SYSTEM: &str = "You are an expert note-taker. Summarize the lesson into concise, clear notes. Use bullet points and highlight key terms. Format in Markdown.";
const NOTES_USER: &str = "Summarize the lesson content: \"\"\"{content}\"\"\"";

const ASSESSMENT_SYSTEM: &str = "You are an experienced test designer. Create a {mode} assessment based on the lesson. Include multiple-choice questions with 4 options, and mark the correct answer with **. Format in Markdown.";
const ASSESSMENT_USER: &str =
    "Generate a {mode} assessment for the lesson content: \"\"\"{content}\"\"\"";

/// Which flavour of assessment to generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssessmentMode {
    Practice,
    Test,
}

impl fmt::Display for AssessmentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssessmentMode::Practice => write!(f, "practice"),
            AssessmentMode::Test => write!(f, "test"),
        }
    }
}

/// The lesson a tutor, notes or assessment request is about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonContext {
    pub topic: String,
    pub lesson_title: String,
    pub lesson_content: String,
}

impl LessonContext {
    pub fn is_ready(&self) -> bool {
        !self.lesson_content.is_empty()
    }
}

/// The full set of templates used by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet {
    pub outline_system: String,
    pub lesson_system: String,
    pub lesson_user: String,
    pub tutor_system: String,
    pub tutor_user: String,
    pub notes_system: String,
    pub notes_user: String,
    pub assessment_system: String,
    pub assessment_user: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            outline_system: OUTLINE_SYSTEM.to_string(),
            lesson_system: LESSON_SYSTEM.to_string(),
            lesson_user: LESSON_USER.to_string(),
            tutor_system: TUTOR_SYSTEM.to_string(),
            tutor_user: TUTOR_USER.to_string(),
            notes_system: NOTES_SYSTEM.to_string(),
            notes_user: NOTES_USER.to_string(),
            assessment_system: ASSESSMENT_SYSTEM.to_string(),
            assessment_user: ASSESSMENT_USER.to_string(),
        }
    }
}

impl PromptSet {
    /// Starts from the built-in templates and replaces every one named in
    /// `overrides`. Unknown keys are logged and ignored.
    pub fn from_overrides(overrides: HashMap<String, String>) -> Self {
        let mut prompts = Self::default();
        for (key, value) in overrides {
            let slot = match key.as_str() {
                "outline_system" => &mut prompts.outline_system,
                "lesson_system" => &mut prompts.lesson_system,
                "lesson_user" => &mut prompts.lesson_user,
                "tutor_system" => &mut prompts.tutor_system,
                "tutor_user" => &mut prompts.tutor_user,
                "notes_system" => &mut prompts.notes_system,
                "notes_user" => &mut prompts.notes_user,
                "assessment_system" => &mut prompts.assessment_system,
                "assessment_user" => &mut prompts.assessment_user,
                _ => {
                    warn!(key = %key, "Ignoring unknown prompt template");
                    continue;
                }
            };
            *slot = value.trim().to_string();
        }
        prompts
    }

    pub fn outline(&self, topic: &str) -> GenerationRequest {
        GenerationRequest::new(topic, fill(&self.outline_system, &[("topic", topic)]))
    }

    pub fn lesson(&self, topic: &str, title: &str) -> GenerationRequest {
        let vars = [("topic", topic), ("title", title)];
        GenerationRequest::new(fill(&self.lesson_user, &vars), fill(&self.lesson_system, &vars))
    }

    pub fn tutor(
        &self,
        lesson: &LessonContext,
        question: &str,
        prior_turns: Vec<ChatTurn>,
    ) -> GenerationRequest {
        let vars = [
            ("topic", lesson.topic.as_str()),
            ("title", lesson.lesson_title.as_str()),
            ("content", lesson.lesson_content.as_str()),
            ("question", question),
        ];
        GenerationRequest::new(fill(&self.tutor_user, &vars), fill(&self.tutor_system, &vars))
            .with_prior_turns(prior_turns)
    }

    pub fn notes(&self, lesson: &LessonContext) -> GenerationRequest {
        let vars = [("content", lesson.lesson_content.as_str())];
        GenerationRequest::new(fill(&self.notes_user, &vars), fill(&self.notes_system, &vars))
    }

    pub fn assessment(&self, lesson: &LessonContext, mode: AssessmentMode) -> GenerationRequest {
        let mode = mode.to_string();
        let vars = [
            ("content", lesson.lesson_content.as_str()),
            ("mode", mode.as_str()),
        ];
        GenerationRequest::new(
            fill(&self.assessment_user, &vars),
            fill(&self.assessment_system, &vars),
        )
    }
}

/// Replaces `{name}` placeholders in one left-to-right pass. Unknown
/// placeholders and stray braces are kept as written.
fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let value = after.find('}').and_then(|end| {
            let name = &after[..end];
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, end))
        });
        match value {
            Some((value, end)) => {
                out.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lesson() -> LessonContext {
        LessonContext {
            topic: "Rust".to_string(),
            lesson_title: "Ownership".to_string(),
            lesson_content: "Values have one owner.".to_string(),
        }
    }

    #[test]
    fn test_outline_uses_topic_as_user_prompt() {
        let request = PromptSet::default().outline("Quantum Mechanics");
        assert_eq!(request.user_prompt, "Quantum Mechanics");
        assert!(request.system_prompt.starts_with("You are an expert instructional designer."));
        assert!(request.prior_turns.is_empty());
    }

    #[test]
    fn test_lesson_prompt() {
        let request = PromptSet::default().lesson("Rust", "Borrowing");
        assert_eq!(
            request.user_prompt,
            "The main course topic is \"Rust\". Generate the lesson content for: \"Borrowing\"."
        );
    }

    #[test]
    fn test_tutor_prompt_embeds_lesson_and_history() {
        let history = vec![ChatTurn::user("What is a move?"), ChatTurn::model("A transfer.")];
        let request = PromptSet::default().tutor(&lesson(), "And a borrow?", history.clone());

        assert_eq!(
            request.user_prompt,
            "Course: \"Rust\"\nLesson: \"Ownership\"\nContent: \"\"\"Values have one owner.\"\"\"\nLearner's question: And a borrow?"
        );
        assert_eq!(request.prior_turns, history);
    }

    #[test]
    fn test_assessment_mode_in_both_prompts() {
        let request = PromptSet::default().assessment(&lesson(), AssessmentMode::Practice);
        assert!(request.system_prompt.contains("Create a practice assessment"));
        assert!(request.user_prompt.starts_with("Generate a practice assessment"));

        let request = PromptSet::default().assessment(&lesson(), AssessmentMode::Test);
        assert!(request.system_prompt.contains("Create a test assessment"));
    }

    #[test]
    fn test_fill_is_single_pass() {
        let filled = fill(
            "{content} / {question} / {missing} / {",
            &[("content", "literal {question}"), ("question", "Q")],
        );
        assert_eq!(filled, "literal {question} / Q / {missing} / {");
    }

    #[test]
    fn test_overrides_replace_known_keys_only() {
        let mut overrides = HashMap::new();
        overrides.insert("notes_system".to_string(), "Be brief.\n".to_string());
        overrides.insert("unknown".to_string(), "ignored".to_string());

        let prompts = PromptSet::from_overrides(overrides);
        assert_eq!(prompts.notes_system, "Be brief.");
        assert_eq!(prompts.tutor_system, TUTOR_SYSTEM);
    }

    #[test]
    fn test_lesson_context_readiness() {
        assert!(!LessonContext::default().is_ready());
        assert!(lesson().is_ready());
    }
}
