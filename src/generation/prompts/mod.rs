// Tutoring prompt assembly
// The system message carries the grounding rules, student level, and
// answer format; conversation history and the context+question follow as
// chat turns.

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};

use crate::database::sqlite::models::ConversationTurn;
use crate::models::ChatMessage;

/// Fixed response returned when confidence is too low to answer
pub const REFUSAL_MESSAGE: &str = "I don’t have enough information in the provided material.";

/// How much mathematical sophistication the answer should assume
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudentLevel {
    Beginner,
    #[default]
    Intermediate,
    Advanced,
}

impl StudentLevel {
    /// Parse a level string; anything unrecognized falls back to
    /// intermediate rather than failing.
    #[inline]
    pub fn from_input(input: &str) -> Self {
        match input.to_lowercase().as_str() {
            "beginner" => StudentLevel::Beginner,
            "advanced" => StudentLevel::Advanced,
            _ => StudentLevel::Intermediate,
        }
    }

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            StudentLevel::Beginner => "beginner",
            StudentLevel::Intermediate => "intermediate",
            StudentLevel::Advanced => "advanced",
        }
    }

    fn adaptation_rules(self) -> &'static str {
        match self {
            StudentLevel::Beginner => {
                "- Use simple language.\n\
                 - Avoid heavy notation.\n\
                 - Focus on intuition and real-world examples.\n\
                 - Keep explanations short and clear."
            }
            StudentLevel::Intermediate => {
                "- Use proper terminology.\n\
                 - Include formulas if needed.\n\
                 - Provide step-by-step reasoning."
            }
            StudentLevel::Advanced => {
                "- Use formal mathematical language.\n\
                 - Include derivations when possible.\n\
                 - Discuss edge cases and theoretical implications."
            }
        }
    }
}

impl std::fmt::Display for StudentLevel {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Build the full chat message list for one tutoring request
///
/// Order: system rules, then prior turns oldest first as alternating
/// user/assistant messages, then the current context and question as the
/// final user message.
pub fn build_messages(
    context: &str,
    question: &str,
    level: StudentLevel,
    history: &[ConversationTurn],
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() * 2 + 2);
    messages.push(ChatMessage::system(system_prompt(level)));
    for turn in history {
        messages.push(ChatMessage::user(turn.question.clone()));
        messages.push(ChatMessage::assistant(turn.answer.clone()));
    }
    messages.push(ChatMessage::user(question_prompt(context, question)));
    messages
}

/// The tutoring rules and answer format, adapted to the student level
pub fn system_prompt(level: StudentLevel) -> String {
    format!(
        "You are an expert AI tutor.\n\
         \n\
         STRICT RULES:\n\
         - Use ONLY the information provided in the context.\n\
         - Do NOT invent facts the context does not support.\n\
         - Write mathematical expressions in LaTeX format inside $$ $$.\n\
         - Use previous conversation context if relevant.\n\
         \n\
         STUDENT LEVEL:\n\
         {}\n\
         \n\
         ADAPTATION RULES:\n\
         {}\n\
         \n\
         Answer Format:\n\
         \n\
         1. Concept Overview\n\
         2. Mathematical Expression (if applicable)\n\
         3. Step-by-Step Explanation\n\
         4. Intuition\n\
         5. Final Summary",
        level.as_str().to_uppercase(),
        level.adaptation_rules()
    )
}

/// The final user message carrying retrieved material and the question
pub fn question_prompt(context: &str, question: &str) -> String {
    format!("Context:\n{}\n\nQuestion:\n{}", context, question)
}
