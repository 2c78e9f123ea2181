use async_trait::async_trait;

use forge_core::{MessageKind, QuestionMode};

/// A task-board update from the engine: the full task list plus which
/// task is currently being worked and by whom.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub tasks: Vec<serde_json::Value>,
    pub current_task_id: String,
    pub current_assignee: String,
    pub instruction: String,
}

/// Callbacks an engine run fires as agents do their work.
///
/// The server side implements this to stream activity to the client,
/// persist messages, and answer questions. `on_ask_human` blocks the
/// run until an answer (or a timeout sentinel) is available.
#[async_trait]
pub trait RunCallbacks: Send + Sync {
    async fn on_message(&self, agent: &str, content: &str, kind: MessageKind);

    async fn on_ask_human(
        &self,
        agent: &str,
        question: &str,
        mode: QuestionMode,
        options: Option<Vec<String>>,
    ) -> String;

    async fn on_task(&self, update: TaskUpdate);
}
