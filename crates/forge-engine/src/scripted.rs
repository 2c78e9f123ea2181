//! Scripted engine for tests. Replays a fixed sequence of agent
//! activity through the callbacks, recording the answers it was given.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use forge_core::{MessageKind, QuestionMode};

use crate::callbacks::{RunCallbacks, TaskUpdate};
use crate::error::EngineError;
use crate::service::{ContinuationRequest, GenerationEngine, GenerationRequest};

/// One step of a scripted run.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Message {
        agent: String,
        content: String,
        kind: MessageKind,
    },
    AskHuman {
        agent: String,
        question: String,
        mode: QuestionMode,
        options: Option<Vec<String>>,
    },
    Task {
        task_id: String,
        assignee: String,
        instruction: String,
    },
    Sleep(Duration),
    Fail(String),
}

impl ScriptStep {
    pub fn message(agent: &str, content: &str) -> Self {
        Self::Message {
            agent: agent.to_string(),
            content: content.to_string(),
            kind: MessageKind::AgentMessage,
        }
    }

    pub fn ask(agent: &str, question: &str) -> Self {
        Self::AskHuman {
            agent: agent.to_string(),
            question: question.to_string(),
            mode: QuestionMode::Inline,
            options: None,
        }
    }

    pub fn task(task_id: &str, assignee: &str, instruction: &str) -> Self {
        Self::Task {
            task_id: task_id.to_string(),
            assignee: assignee.to_string(),
            instruction: instruction.to_string(),
        }
    }
}

/// Engine double that plays back a script instead of running agents.
pub struct ScriptedEngine {
    steps: Vec<ScriptStep>,
    workspace: PathBuf,
    call_count: AtomicUsize,
    answers: Mutex<Vec<String>>,
}

impl ScriptedEngine {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            workspace: PathBuf::from("/tmp/forge-test-workspace"),
            call_count: AtomicUsize::new(0),
            answers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = workspace.into();
        self
    }

    /// How many runs have been started.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Answers received for `AskHuman` steps, in order.
    pub fn answers(&self) -> Vec<String> {
        self.answers.lock().unwrap().clone()
    }

    async fn play(&self, callbacks: &dyn RunCallbacks) -> Result<PathBuf, EngineError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        for step in &self.steps {
            match step {
                ScriptStep::Message {
                    agent,
                    content,
                    kind,
                } => {
                    callbacks.on_message(agent, content, *kind).await;
                }
                ScriptStep::AskHuman {
                    agent,
                    question,
                    mode,
                    options,
                } => {
                    let answer = callbacks
                        .on_ask_human(agent, question, *mode, options.clone())
                        .await;
                    self.answers.lock().unwrap().push(answer);
                }
                ScriptStep::Task {
                    task_id,
                    assignee,
                    instruction,
                } => {
                    callbacks
                        .on_task(TaskUpdate {
                            tasks: vec![serde_json::json!({ "id": task_id })],
                            current_task_id: task_id.clone(),
                            current_assignee: assignee.clone(),
                            instruction: instruction.clone(),
                        })
                        .await;
                }
                ScriptStep::Sleep(duration) => {
                    tokio::time::sleep(*duration).await;
                }
                ScriptStep::Fail(reason) => {
                    return Err(EngineError::Generation(reason.clone()));
                }
            }
        }
        Ok(self.workspace.clone())
    }
}

#[async_trait]
impl GenerationEngine for ScriptedEngine {
    async fn generate(
        &self,
        _request: GenerationRequest,
        callbacks: &dyn RunCallbacks,
    ) -> Result<PathBuf, EngineError> {
        self.play(callbacks).await
    }

    async fn continue_generation(
        &self,
        _request: ContinuationRequest,
        callbacks: &dyn RunCallbacks,
    ) -> Result<PathBuf, EngineError> {
        self.play(callbacks).await
    }
}
