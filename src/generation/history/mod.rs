// Per-student conversation history, backed by the conversations table.
// Only successful answers are recorded; refusals never enter history.


use anyhow::{Context, Result};
use tracing::debug;

use crate::database::sqlite::Database;
use crate::database::sqlite::models::{ConversationTurn, NewConversationTurn};

/// Rolling window of recent question/answer turns per student
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    database: Database,
    max_turns: usize,
}

impl ConversationHistory {
    #[inline]
    pub fn new(database: Database, max_turns: usize) -> Self {
        Self {
            database,
            max_turns,
        }
    }

    /// The most recent turns for a student, oldest first, capped at the
    /// configured window size
    #[inline]
    pub async fn recent_turns(&self, student_id: &str) -> Result<Vec<ConversationTurn>> {
        self.database
            .recent_conversation_turns(student_id, self.max_turns)
            .await
            .with_context(|| format!("Failed to load history for student '{}'", student_id))
    }

    /// Append one completed question/answer exchange
    pub async fn record_turn(&self, student_id: &str, question: &str, answer: &str) -> Result<()> {
        self.database
            .append_conversation_turn(NewConversationTurn {
                student_id: student_id.to_string(),
                question: question.to_string(),
                answer: answer.to_string(),
            })
            .await
            .with_context(|| format!("Failed to record turn for student '{}'", student_id))?;

        debug!("Recorded conversation turn for student '{}'", student_id);
        Ok(())
    }

    /// Forget a student's history
    ///
    /// # Returns
    /// The number of turns removed
    #[inline]
    pub async fn clear(&self, student_id: &str) -> Result<usize> {
        self.database
            .clear_conversation(student_id)
            .await
            .with_context(|| format!("Failed to clear history for student '{}'", student_id))
    }
}
