//! Pending-question rendezvous between a blocked engine run and the
//! client's eventual answer.
//!
//! A run task parks in [`PendingQuestions::wait`]; the gateway resolves
//! from its own task when the user responds. Resolution and waiting may
//! land in either order, so the answer is stored before the notify fires
//! and the notify permit covers the resolve-first case.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;

use forge_core::{ProjectId, QuestionId, QuestionMode};

use crate::client::ClientId;

/// A question currently awaiting a human answer.
#[derive(Clone)]
pub struct PendingQuestion {
    pub project_id: ProjectId,
    pub client_id: ClientId,
    pub agent: String,
    pub content: String,
    pub mode: QuestionMode,
    pub options: Option<Vec<String>>,
}

struct Entry {
    question: PendingQuestion,
    notify: Notify,
}

#[derive(Default)]
pub struct PendingQuestions {
    pending: DashMap<QuestionId, Arc<Entry>>,
    answers: DashMap<QuestionId, String>,
}

impl PendingQuestions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a question and get its id for the clarification frame.
    pub fn create(
        &self,
        project_id: ProjectId,
        client_id: ClientId,
        agent: &str,
        content: &str,
        mode: QuestionMode,
        options: Option<Vec<String>>,
    ) -> QuestionId {
        let id = QuestionId::new();
        let question = PendingQuestion {
            project_id,
            client_id,
            agent: agent.to_string(),
            content: content.to_string(),
            mode,
            options,
        };
        self.pending.insert(
            id.clone(),
            Arc::new(Entry {
                question,
                notify: Notify::new(),
            }),
        );
        id
    }

    pub fn get(&self, id: &QuestionId) -> Option<PendingQuestion> {
        self.pending.get(id).map(|e| e.question.clone())
    }

    /// Deliver an answer. The question stops being pending on the spot,
    /// so a second resolve (or one arriving after timeout) returns false
    /// and leaves the first answer untouched.
    pub fn resolve(&self, id: &QuestionId, answer: String) -> bool {
        let Some((_, entry)) = self.pending.remove(id) else {
            return false;
        };
        self.answers.insert(id.clone(), answer);
        entry.notify.notify_one();
        true
    }

    /// Park until the question is answered or the timeout elapses.
    /// Either way the question is gone afterwards; a late answer for it
    /// will find nothing to resolve.
    pub async fn wait(&self, id: &QuestionId, timeout: Duration) -> Option<String> {
        let entry = match self.pending.get(id).map(|e| Arc::clone(&e)) {
            Some(entry) => entry,
            // Resolved before the run got here; the answer is parked.
            None => return self.answers.remove(id).map(|(_, a)| a),
        };

        let outcome = tokio::time::timeout(timeout, entry.notify.notified()).await;
        self.pending.remove(id);
        let answer = self.answers.remove(id).map(|(_, a)| a);
        match outcome {
            Ok(()) => answer,
            Err(_) => None,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
