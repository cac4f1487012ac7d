//! Per-phone-number conversation sessions and the state machine that
//! advances them.
//!
//! A session is one row in the sessions grid: the rider's phone number, a
//! completion flag, and one cell per question. The question list itself is
//! derived from the grid's column metadata, so adding a question to the grid
//! adds it to the flow. Answers always fill the first unanswered question,
//! which keeps the answered set a prefix of the question order.

use crate::error::RidepoolError;
use crate::grid::{ColumnFilter, ColumnValues, Filter, GridMetadata, GridStore, Query, Row};
use crate::queue::{CompletionEvent, CompletionQueue};
use crate::sms::InboundSms;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Sessions-grid column holding the rider's phone number.
pub const PHONE_COLUMN: &str = "Phone #";

/// Sessions-grid column holding the completion flag.
pub const COMPLETE_COLUMN: &str = "Complete";

/// Phrases that abandon the current session and start over.
pub const RESET_PHRASES: [&str; 2] = ["reset", "find me a ride"];

/// Acknowledgement sent when the final answer lands.
pub const COMPLETION_REPLY: &str =
    "Thank you for sharing your information. We will notify you as soon as we find a match!";

/// Returns true when `body` is a reset command.
pub fn is_reset_phrase(body: &str) -> bool {
    let normalized = body.trim().to_lowercase();
    RESET_PHRASES.contains(&normalized.as_str())
}

/// One rider's in-progress or completed conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Grid row id, present when the session was read from the store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_id: Option<String>,
    /// Rider phone number (identity key)
    pub phone: String,
    /// Whether all questions are answered (or the session was abandoned)
    pub complete: bool,
    /// Recorded answers keyed by question name
    pub answers: BTreeMap<String, String>,
}

impl Session {
    /// Builds a session from a sessions-grid row.
    pub fn from_row(row: &Row) -> Self {
        let answers = row
            .columns
            .iter()
            .filter(|(name, value)| {
                name.as_str() != PHONE_COLUMN
                    && name.as_str() != COMPLETE_COLUMN
                    && !value.is_empty()
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Self {
            row_id: row.row_id.clone(),
            phone: row.cell(PHONE_COLUMN).unwrap_or_default().to_string(),
            complete: row.cell(COMPLETE_COLUMN) == Some("true"),
            answers,
        }
    }

    /// The recorded answer for `question`, if any.
    pub fn answer(&self, question: &str) -> Option<&str> {
        self.answers.get(question).map(|v| v.as_str())
    }
}

/// The ordered list of questions every rider must answer.
///
/// Derived from the sessions grid's column metadata: bookkeeping columns and
/// any column whose description contains "skip" are excluded; grid column
/// order is preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionBank {
    questions: Vec<String>,
}

impl QuestionBank {
    /// Builds the bank from grid metadata.
    pub fn from_metadata(metadata: &GridMetadata) -> Self {
        let questions = metadata
            .columns
            .iter()
            .filter(|column| {
                column.column_name != PHONE_COLUMN
                    && column.column_name != COMPLETE_COLUMN
                    && !column.column_desc.to_lowercase().contains("skip")
            })
            .map(|column| column.column_name.clone())
            .collect();
        Self { questions }
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// The first question of the flow.
    pub fn first(&self) -> Option<&str> {
        self.questions.first().map(|q| q.as_str())
    }

    /// All questions in order.
    pub fn questions(&self) -> &[String] {
        &self.questions
    }

    /// Questions `session` has not answered yet, in order.
    pub fn remaining_for<'a>(&'a self, session: &Session) -> Vec<&'a str> {
        self.questions
            .iter()
            .filter(|question| session.answer(question).is_none())
            .map(|q| q.as_str())
            .collect()
    }
}

/// Outcome of processing one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationReply {
    /// Prompt the rider with the next question
    Question(String),
    /// All questions answered; acknowledge
    Completed(String),
    /// The sessions grid defines no questions
    NoQuestions,
}

/// The conversation state machine.
///
/// Stateless between invocations: every call reconstructs the rider's
/// session from the grid, applies one transition, and writes it back.
pub struct ConversationEngine {
    store: Arc<dyn GridStore>,
    queue: Arc<dyn CompletionQueue>,
    sessions_grid_id: String,
}

impl ConversationEngine {
    pub fn new(
        store: Arc<dyn GridStore>,
        queue: Arc<dyn CompletionQueue>,
        sessions_grid_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            queue,
            sessions_grid_id: sessions_grid_id.into(),
        }
    }

    /// Processes one validated inbound message and returns the reply.
    ///
    /// # Errors
    ///
    /// Returns `RidepoolError::Store` when the grid is unreachable and
    /// `RidepoolError::Queue` when the completion event cannot be published
    /// (the session row stays complete either way).
    pub async fn handle_message(
        &self,
        inbound: &InboundSms,
    ) -> Result<ConversationReply, RidepoolError> {
        if is_reset_phrase(&inbound.body) {
            return self.reset_conversation(inbound).await;
        }

        let (bank, session) = tokio::try_join!(
            self.question_bank(),
            self.active_session(&inbound.from)
        )?;

        if bank.is_empty() {
            return Ok(ConversationReply::NoQuestions);
        }

        let session = match session {
            Some(session) => session,
            None => {
                self.start_new_session(&inbound.from).await?;
                info!(phone = %inbound.from, "opened new session");
                return Ok(self.first_question_reply(&bank));
            }
        };

        let remaining = bank.remaining_for(&session);
        if remaining.is_empty() {
            // A completed row still flagged active; cycle it.
            warn!(phone = %inbound.from, "stale session with no remaining questions");
            return self.reset_conversation(inbound).await;
        }

        let row_id = session.row_id.clone().ok_or_else(|| {
            RidepoolError::Store("active session row missing row id".to_string())
        })?;

        let answering = remaining[0].to_string();
        let now_complete = remaining.len() <= 1;

        let mut update = ColumnValues::new();
        update.insert(answering.clone(), inbound.body.clone());
        update.insert(COMPLETE_COLUMN.to_string(), now_complete.to_string());
        self.store
            .update_by_row_id(&self.sessions_grid_id, &row_id, update)
            .await?;

        if now_complete {
            info!(phone = %inbound.from, "session completed");
            let mut snapshot = session.clone();
            snapshot.answers.insert(answering, inbound.body.clone());
            snapshot.complete = true;
            // Fire-and-forget: the session row is already complete, so an
            // enqueue failure surfaces as an error without rolling back.
            self.queue
                .publish(&CompletionEvent {
                    existing_session: snapshot,
                    inbound_message: inbound.clone(),
                })
                .await?;
            return Ok(ConversationReply::Completed(COMPLETION_REPLY.to_string()));
        }

        Ok(ConversationReply::Question(remaining[1].to_string()))
    }

    /// Abandons any active session and opens a fresh one.
    ///
    /// Idempotent: repeated resets simply cycle the session again.
    async fn reset_conversation(
        &self,
        inbound: &InboundSms,
    ) -> Result<ConversationReply, RidepoolError> {
        let (_, bank) = tokio::try_join!(
            self.reset_in_grid(&inbound.from),
            self.question_bank()
        )?;
        info!(phone = %inbound.from, "session reset");
        Ok(self.first_question_reply(&bank))
    }

    async fn reset_in_grid(&self, phone: &str) -> Result<(), RidepoolError> {
        let filter = ColumnFilter::all(vec![
            Filter::eq(PHONE_COLUMN, phone),
            Filter::eq(COMPLETE_COLUMN, "false"),
        ]);
        let mut update = ColumnValues::new();
        update.insert(COMPLETE_COLUMN.to_string(), "true".to_string());
        self.store
            .update_by_query(&self.sessions_grid_id, filter, update)
            .await?;
        self.start_new_session(phone).await
    }

    async fn start_new_session(&self, phone: &str) -> Result<(), RidepoolError> {
        let mut row = ColumnValues::new();
        row.insert(PHONE_COLUMN.to_string(), phone.to_string());
        row.insert(COMPLETE_COLUMN.to_string(), "false".to_string());
        self.store.insert(&self.sessions_grid_id, vec![row]).await
    }

    async fn question_bank(&self) -> Result<QuestionBank, RidepoolError> {
        let metadata = self.store.get_metadata(&self.sessions_grid_id).await?;
        Ok(QuestionBank::from_metadata(&metadata))
    }

    /// The rider's current incomplete session, if one exists.
    async fn active_session(&self, phone: &str) -> Result<Option<Session>, RidepoolError> {
        let query = Query::filtered(ColumnFilter::all(vec![
            Filter::eq(PHONE_COLUMN, phone),
            Filter::eq(COMPLETE_COLUMN, "false"),
        ]));
        let result = self.store.search(&self.sessions_grid_id, query).await?;
        Ok(result.rows.first().map(Session::from_row))
    }

    fn first_question_reply(&self, bank: &QuestionBank) -> ConversationReply {
        match bank.first() {
            Some(question) => ConversationReply::Question(question.to_string()),
            None => ConversationReply::NoQuestions,
        }
    }
}
