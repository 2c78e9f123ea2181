//! Session orchestrator — drives generation runs against the engine.
//!
//! Each client command becomes one handler invocation. Run handlers
//! (create, continue, regenerate, retry) own the full lifecycle of one
//! engine run: status acknowledgment, persistence, progress emission,
//! completion or failure. Question handlers (user response, skip)
//! resolve pending ask-human waits owned by a concurrently running
//! handler.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, instrument, warn};

use forge_core::{
    MessageKind, ProgressTracker, ProjectId, QuestionId, QuestionMode, ServerFrame,
};
use forge_engine::callbacks::{RunCallbacks, TaskUpdate};
use forge_engine::context::{continuation_prompt, RoundEntry};
use forge_engine::service::{ContinuationRequest, GenerationEngine, GenerationRequest};
use forge_engine::templates::{get_template, render_prompt};
use forge_store::messages::MessageRepo;
use forge_store::projects::{ProjectRepo, ProjectRow, ProjectStatus};
use forge_store::Database;

use crate::client::{ClientId, ClientRegistry};
use crate::questions::PendingQuestions;

/// How long an ask-human wait blocks before falling back to defaults.
pub const DEFAULT_QUESTION_TIMEOUT: Duration = Duration::from_secs(300);

/// Answer handed to the engine when the user never responded.
pub const TIMEOUT_ANSWER: &str = "[TIMEOUT - Use default behavior]";
/// Answer handed to the engine when the user explicitly skipped.
pub const SKIP_ANSWER: &str = "[SKIPPED - Use default behavior]";

const INSTRUCTION_PREVIEW_CHARS: usize = 200;

pub struct Orchestrator {
    projects: ProjectRepo,
    messages: MessageRepo,
    registry: Arc<ClientRegistry>,
    questions: Arc<PendingQuestions>,
    engine: Arc<dyn GenerationEngine>,
    question_timeout: Duration,
}

/// Per-run-kind text and behavior differences.
struct RunTexts {
    persist_complete: &'static str,
    send_complete: &'static str,
    error_prefix: &'static str,
}

enum RunInput {
    Generate { requirement: String },
    Continue { prompt: String, workspace: String },
}

impl Orchestrator {
    pub fn new(
        db: Database,
        registry: Arc<ClientRegistry>,
        questions: Arc<PendingQuestions>,
        engine: Arc<dyn GenerationEngine>,
    ) -> Self {
        Self {
            projects: ProjectRepo::new(db.clone()),
            messages: MessageRepo::new(db),
            registry,
            questions,
            engine,
            question_timeout: DEFAULT_QUESTION_TIMEOUT,
        }
    }

    pub fn with_question_timeout(mut self, timeout: Duration) -> Self {
        self.question_timeout = timeout;
        self
    }

    fn send(&self, client_id: &ClientId, frame: &ServerFrame) {
        self.registry.send(client_id, frame);
    }

    fn send_error(&self, client_id: &ClientId, content: impl Into<String>) {
        self.send(client_id, &ServerFrame::error(content));
    }

    /// Look up a project, reporting not-found to the client.
    fn lookup_project(&self, client_id: &ClientId, id: &ProjectId) -> Option<ProjectRow> {
        match self.projects.get(id) {
            Ok(project) => Some(project),
            Err(forge_store::StoreError::NotFound(_)) => {
                self.send_error(client_id, format!("Project not found: {id}"));
                None
            }
            Err(e) => {
                error!(project_id = %id, error = %e, "Project lookup failed");
                self.send_error(client_id, format!("Failed to load project: {e}"));
                None
            }
        }
    }

    /// Start handler: fresh project from a raw requirement. Requires an
    /// authenticated connection.
    #[instrument(skip(self, requirement), fields(client_id = %client_id))]
    pub async fn handle_create_project(
        &self,
        client_id: &ClientId,
        name: Option<String>,
        requirement: Option<String>,
    ) {
        let name = name.unwrap_or_else(|| "Untitled Project".to_string());
        let requirement = requirement.unwrap_or_default();
        if requirement.is_empty() {
            self.send_error(client_id, "Requirement is required");
            return;
        }

        let Some(user_id) = self.registry.user_id_of(client_id) else {
            self.send(
                client_id,
                &ServerFrame::Error {
                    content: "Authentication required. Please log in to create projects."
                        .to_string(),
                    project_id: None,
                    question_id: None,
                    auth_required: Some(true),
                    can_retry: None,
                },
            );
            return;
        };

        let project = match self.projects.create(&name, &requirement, Some(&user_id)) {
            Ok(project) => project,
            Err(e) => {
                error!(error = %e, "Project creation failed");
                self.send_error(client_id, format!("Failed to create project: {e}"));
                return;
            }
        };
        info!(project_id = %project.id, "Project created");

        let ack = "Project created, starting generation...";
        self.persist(&project.id, "System", ack, MessageKind::Status, 1);
        self.send(
            client_id,
            &ServerFrame::Status {
                content: ack.to_string(),
                project_id: project.id.to_string(),
                status: Some("created".to_string()),
                conversation_round: None,
            },
        );

        self.run_generation(
            client_id,
            &project,
            1,
            None,
            true,
            RunInput::Generate { requirement },
            RunTexts {
                persist_complete: "Project generation completed!",
                send_complete: "Project generation completed!",
                error_prefix: "Error generating project",
            },
        )
        .await;
    }

    /// Template handler: resolve a template to a requirement string,
    /// then delegate to the start handler.
    #[instrument(skip(self, features, custom_requirements), fields(client_id = %client_id))]
    pub async fn handle_create_from_template(
        &self,
        client_id: &ClientId,
        template_id: Option<String>,
        name: Option<String>,
        features: Option<Vec<String>>,
        custom_requirements: Option<String>,
    ) {
        if self.registry.user_id_of(client_id).is_none() {
            self.send(
                client_id,
                &ServerFrame::Error {
                    content: "Authentication required. Please log in to create projects."
                        .to_string(),
                    project_id: None,
                    question_id: None,
                    auth_required: Some(true),
                    can_retry: None,
                },
            );
            return;
        }

        let Some(template_id) = template_id.filter(|t| !t.is_empty()) else {
            self.send_error(client_id, "Template ID is required");
            return;
        };
        let Some(template) = get_template(&template_id) else {
            self.send_error(client_id, format!("Template not found: {template_id}"));
            return;
        };

        let project_name = name.unwrap_or_else(|| "My Project".to_string());
        let requirement = render_prompt(
            template,
            &project_name,
            features.as_deref(),
            custom_requirements.as_deref(),
        );

        self.handle_create_project(
            client_id,
            Some(format!("{project_name} ({})", template.name)),
            Some(requirement),
        )
        .await;
    }

    /// Continue handler: run a new conversation round against an
    /// existing project's workspace.
    #[instrument(skip(self, message), fields(client_id = %client_id))]
    pub async fn handle_continue_conversation(
        &self,
        client_id: &ClientId,
        project_id: Option<String>,
        message: Option<String>,
    ) {
        let Some(project_id) = project_id.filter(|p| !p.is_empty()) else {
            self.send_error(client_id, "Project ID is required for continuing conversation");
            return;
        };
        let message = message.unwrap_or_default();
        if message.is_empty() {
            self.send_error(client_id, "Message is required");
            return;
        }

        let project_id = ProjectId::from_raw(project_id);
        let Some(project) = self.lookup_project(client_id, &project_id) else {
            return;
        };

        let new_round = match self.messages.latest_round(&project_id) {
            Ok(round) => round + 1,
            Err(e) => {
                error!(error = %e, "Round lookup failed");
                self.send_error(client_id, format!("Failed to load conversation: {e}"));
                return;
            }
        };

        self.persist(&project_id, "User", &message, MessageKind::User, new_round);
        self.send(
            client_id,
            &ServerFrame::Status {
                content: format!("Continuing conversation (Round {new_round})..."),
                project_id: project_id.to_string(),
                status: Some("continuing".to_string()),
                conversation_round: Some(new_round),
            },
        );

        // History covers prior rounds only; the current request was
        // persisted above and is carried separately in the prompt.
        let history: Vec<RoundEntry> = match self.messages.user_messages_before(&project_id, new_round)
        {
            Ok(rows) => rows
                .into_iter()
                .map(|m| RoundEntry {
                    round: m.round,
                    content: m.content,
                })
                .collect(),
            Err(e) => {
                error!(error = %e, "History lookup failed");
                Vec::new()
            }
        };

        let workspace = project.workspace_path.clone().unwrap_or_default();
        let prompt = continuation_prompt(
            &project.requirement,
            &history,
            &message,
            new_round,
            Path::new(&workspace),
        );

        self.run_generation(
            client_id,
            &project,
            new_round,
            Some(new_round),
            false,
            RunInput::Continue { prompt, workspace },
            RunTexts {
                persist_complete: "Conversation round completed!",
                send_complete: "Changes applied successfully!",
                error_prefix: "Error during conversation",
            },
        )
        .await;
    }

    /// Regenerate handler: replay the stored requirement at a new round.
    #[instrument(skip(self), fields(client_id = %client_id))]
    pub async fn handle_regenerate_project(
        &self,
        client_id: &ClientId,
        project_id: Option<String>,
    ) {
        let Some(project_id) = project_id.filter(|p| !p.is_empty()) else {
            self.send_error(client_id, "Project ID is required for regeneration");
            return;
        };
        let project_id = ProjectId::from_raw(project_id);
        let Some(project) = self.lookup_project(client_id, &project_id) else {
            return;
        };

        let new_round = self.messages.latest_round(&project_id).unwrap_or(0) + 1;
        self.persist(
            &project_id,
            "User",
            "Regenerate project",
            MessageKind::User,
            new_round,
        );
        self.send(
            client_id,
            &ServerFrame::Status {
                content: "Regenerating project...".to_string(),
                project_id: project_id.to_string(),
                status: Some("regenerating".to_string()),
                conversation_round: Some(new_round),
            },
        );

        let requirement = project.requirement.clone();
        self.run_generation(
            client_id,
            &project,
            new_round,
            Some(new_round),
            false,
            RunInput::Generate { requirement },
            RunTexts {
                persist_complete: "Project regenerated!",
                send_complete: "Project regenerated successfully!",
                error_prefix: "Error regenerating project",
            },
        )
        .await;
    }

    /// Retry handler: regenerate, gated on the project being `failed`.
    #[instrument(skip(self), fields(client_id = %client_id))]
    pub async fn handle_retry_project(&self, client_id: &ClientId, project_id: Option<String>) {
        let Some(project_id) = project_id.filter(|p| !p.is_empty()) else {
            self.send_error(client_id, "Project ID is required for retry");
            return;
        };
        let project_id = ProjectId::from_raw(project_id);
        let Some(project) = self.lookup_project(client_id, &project_id) else {
            return;
        };

        if project.status != ProjectStatus::Failed {
            self.send_error(client_id, "Only failed projects can be retried");
            return;
        }

        let new_round = self.messages.latest_round(&project_id).unwrap_or(0) + 1;
        self.persist(
            &project_id,
            "User",
            "Retry project generation",
            MessageKind::User,
            new_round,
        );
        self.send(
            client_id,
            &ServerFrame::Status {
                content: "Retrying project generation...".to_string(),
                project_id: project_id.to_string(),
                status: Some("retrying".to_string()),
                conversation_round: Some(new_round),
            },
        );

        let requirement = project.requirement.clone();
        self.run_generation(
            client_id,
            &project,
            new_round,
            Some(new_round),
            true,
            RunInput::Generate { requirement },
            RunTexts {
                persist_complete: "Project retry succeeded!",
                send_complete: "Project generated successfully!",
                error_prefix: "Error retrying project",
            },
        )
        .await;
    }

    /// Resolve a pending question with the user's answer.
    #[instrument(skip(self, response), fields(client_id = %client_id))]
    pub async fn handle_user_response(
        &self,
        client_id: &ClientId,
        question_id: Option<String>,
        response: Option<String>,
        project_id: Option<String>,
    ) {
        let Some(question_id) = question_id.filter(|q| !q.is_empty()) else {
            self.send_error(client_id, "question_id is required for user_response");
            return;
        };
        let question_id = QuestionId::from_raw(question_id);

        let Some(info) = self.questions.get(&question_id) else {
            self.send(
                client_id,
                &ServerFrame::Error {
                    content: "Question not found or already answered".to_string(),
                    project_id: None,
                    question_id: Some(question_id.to_string()),
                    auth_required: None,
                    can_retry: None,
                },
            );
            return;
        };

        if &info.client_id != client_id {
            self.send_error(client_id, "This question does not belong to your session");
            return;
        }
        if let Some(supplied) = project_id.filter(|p| !p.is_empty()) {
            if supplied != info.project_id.as_str() {
                self.send_error(client_id, "Project ID mismatch");
                return;
            }
        }

        let response = response.unwrap_or_default();
        self.persist(
            &info.project_id,
            "User",
            &response,
            MessageKind::UserResponse,
            1,
        );
        self.questions.resolve(&question_id, response);

        self.send(
            client_id,
            &ServerFrame::ResponseReceived {
                question_id: question_id.to_string(),
                project_id: info.project_id.to_string(),
                skipped: None,
            },
        );
    }

    /// Resolve a pending question with the skip sentinel.
    #[instrument(skip(self), fields(client_id = %client_id))]
    pub async fn handle_skip_question(&self, client_id: &ClientId, question_id: Option<String>) {
        let Some(question_id) = question_id.filter(|q| !q.is_empty()) else {
            self.send_error(client_id, "question_id is required");
            return;
        };
        let question_id = QuestionId::from_raw(question_id);

        let Some(info) = self.questions.get(&question_id) else {
            self.send_error(client_id, "Question not found or already answered");
            return;
        };
        if &info.client_id != client_id {
            self.send_error(client_id, "This question does not belong to your session");
            return;
        }

        self.persist(
            &info.project_id,
            "User",
            "[Skipped question - using default]",
            MessageKind::UserResponse,
            1,
        );
        self.questions.resolve(&question_id, SKIP_ANSWER.to_string());

        self.send(
            client_id,
            &ServerFrame::ResponseReceived {
                question_id: question_id.to_string(),
                project_id: info.project_id.to_string(),
                skipped: Some(true),
            },
        );
    }

    /// Drive one engine run to completion and report the outcome.
    async fn run_generation(
        &self,
        client_id: &ClientId,
        project: &ProjectRow,
        round: i64,
        echo_round: Option<i64>,
        track_progress: bool,
        input: RunInput,
        texts: RunTexts,
    ) {
        if let Err(e) = self.projects.update_status(&project.id, ProjectStatus::Running) {
            error!(project_id = %project.id, error = %e, "Status update failed");
        }

        if track_progress {
            self.send(
                client_id,
                &ServerFrame::AgentStatus {
                    project_id: project.id.to_string(),
                    agent_states: ProgressTracker::initial_states(),
                },
            );
        }

        let bridge = RunBridge {
            registry: Arc::clone(&self.registry),
            questions: Arc::clone(&self.questions),
            messages: self.messages.clone(),
            client_id: client_id.clone(),
            project_id: project.id.clone(),
            round,
            echo_round,
            track_progress,
            tracker: Mutex::new(ProgressTracker::new()),
            question_timeout: self.question_timeout,
        };

        let result = match input {
            RunInput::Generate { requirement } => {
                self.engine
                    .generate(
                        GenerationRequest {
                            project_name: project.name.clone(),
                            requirement,
                        },
                        &bridge,
                    )
                    .await
            }
            RunInput::Continue { prompt, workspace } => {
                self.engine
                    .continue_generation(
                        ContinuationRequest {
                            project_name: project.name.clone(),
                            prompt,
                            workspace_path: workspace.into(),
                        },
                        &bridge,
                    )
                    .await
            }
        };

        match result {
            Ok(workspace) => {
                let workspace = workspace.display().to_string();
                if let Err(e) = self.projects.update_workspace(&project.id, &workspace) {
                    error!(project_id = %project.id, error = %e, "Workspace update failed");
                }
                if let Err(e) = self
                    .projects
                    .update_status(&project.id, ProjectStatus::Completed)
                {
                    error!(project_id = %project.id, error = %e, "Status update failed");
                }

                if track_progress {
                    self.send(
                        client_id,
                        &ServerFrame::progress(
                            project.id.to_string(),
                            &ProgressTracker::final_snapshot(),
                            None,
                        ),
                    );
                }

                self.persist(
                    &project.id,
                    "System",
                    texts.persist_complete,
                    MessageKind::Complete,
                    round,
                );
                self.send(
                    client_id,
                    &ServerFrame::Complete {
                        content: texts.send_complete.to_string(),
                        project_id: project.id.to_string(),
                        workspace_path: workspace,
                        conversation_round: echo_round,
                    },
                );
                info!(project_id = %project.id, round, "Run completed");
            }
            Err(e) => {
                let error_msg = format!("{}: {e}", texts.error_prefix);
                warn!(project_id = %project.id, round, error = %e, "Run failed");
                if let Err(se) = self.projects.update_status(&project.id, ProjectStatus::Failed) {
                    error!(project_id = %project.id, error = %se, "Status update failed");
                }
                self.persist(&project.id, "System", &error_msg, MessageKind::Error, round);
                self.send(
                    client_id,
                    &ServerFrame::Error {
                        content: error_msg,
                        project_id: Some(project.id.to_string()),
                        question_id: None,
                        auth_required: None,
                        can_retry: Some(true),
                    },
                );
            }
        }
    }

    /// Append to the conversation log; persistence failures are logged,
    /// never fatal to the run.
    fn persist(&self, project_id: &ProjectId, agent: &str, content: &str, kind: MessageKind, round: i64) {
        if let Err(e) = self.messages.append(project_id, agent, content, kind, round) {
            error!(project_id = %project_id, kind = %kind, error = %e, "Message persistence failed");
        }
    }
}

/// Callback bridge for one run: persists activity, forwards frames, and
/// parks ask-human calls on the rendezvous table.
struct RunBridge {
    registry: Arc<ClientRegistry>,
    questions: Arc<PendingQuestions>,
    messages: MessageRepo,
    client_id: ClientId,
    project_id: ProjectId,
    round: i64,
    echo_round: Option<i64>,
    track_progress: bool,
    tracker: Mutex<ProgressTracker>,
    question_timeout: Duration,
}

impl RunBridge {
    fn persist(&self, agent: &str, content: &str, kind: MessageKind) {
        if let Err(e) = self
            .messages
            .append(&self.project_id, agent, content, kind, self.round)
        {
            error!(project_id = %self.project_id, kind = %kind, error = %e, "Message persistence failed");
        }
    }

    fn send(&self, frame: &ServerFrame) {
        self.registry.send(&self.client_id, frame);
    }
}

#[async_trait]
impl RunCallbacks for RunBridge {
    async fn on_message(&self, agent: &str, content: &str, kind: MessageKind) {
        self.persist(agent, content, kind);

        if self.track_progress && kind.advances_progress() {
            let snapshot = match self.tracker.lock() {
                Ok(mut tracker) => tracker.observe_message(agent),
                Err(_) => None,
            };
            if let Some(snap) = snapshot {
                self.send(&ServerFrame::progress(
                    self.project_id.to_string(),
                    &snap,
                    self.echo_round,
                ));
            }
        }

        let frame = match kind {
            MessageKind::Status => ServerFrame::Status {
                content: content.to_string(),
                project_id: self.project_id.to_string(),
                status: None,
                conversation_round: self.echo_round,
            },
            MessageKind::ReplyToHuman => ServerFrame::ReplyToHuman {
                agent: agent.to_string(),
                content: content.to_string(),
                project_id: self.project_id.to_string(),
                conversation_round: self.echo_round,
            },
            _ => ServerFrame::AgentMessage {
                agent: agent.to_string(),
                content: content.to_string(),
                project_id: self.project_id.to_string(),
                conversation_round: self.echo_round,
            },
        };
        self.send(&frame);
    }

    async fn on_ask_human(
        &self,
        agent: &str,
        question: &str,
        mode: QuestionMode,
        options: Option<Vec<String>>,
    ) -> String {
        let question_id = self.questions.create(
            self.project_id.clone(),
            self.client_id.clone(),
            agent,
            question,
            mode,
            options.clone(),
        );
        info!(question_id = %question_id, project_id = %self.project_id, "Agent question pending");

        self.persist(agent, question, MessageKind::Clarification);
        self.send(&ServerFrame::Clarification {
            agent: agent.to_string(),
            content: question.to_string(),
            project_id: self.project_id.to_string(),
            question_id: question_id.to_string(),
            question_type: mode,
            options,
        });

        match self.questions.wait(&question_id, self.question_timeout).await {
            Some(answer) => answer,
            None => {
                warn!(question_id = %question_id, "Question timed out");
                self.send(&ServerFrame::QuestionTimeout {
                    question_id: question_id.to_string(),
                    project_id: self.project_id.to_string(),
                    content: "Question timed out, using default behavior".to_string(),
                });
                TIMEOUT_ANSWER.to_string()
            }
        }
    }

    async fn on_task(&self, update: TaskUpdate) {
        let snapshot = match self.tracker.lock() {
            Ok(mut tracker) => {
                tracker.observe_task(&update.current_task_id, &update.current_assignee)
            }
            Err(_) => None,
        };
        let Some(snap) = snapshot else {
            return;
        };

        let instruction: String = update
            .instruction
            .chars()
            .take(INSTRUCTION_PREVIEW_CHARS)
            .collect();
        self.send(&ServerFrame::TaskUpdate {
            project_id: self.project_id.to_string(),
            current_task_id: update.current_task_id,
            current_assignee: update.current_assignee,
            instruction,
            progress: (&snap).into(),
            agent_states: snap.agent_states.clone(),
            conversation_round: self.echo_round,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_core::UserId;
    use forge_engine::{ScriptStep, ScriptedEngine};
    use forge_store::users::UserRepo;
    use tokio::sync::mpsc::Receiver;

    struct TestCtx {
        orch: Arc<Orchestrator>,
        engine: Arc<ScriptedEngine>,
        projects: ProjectRepo,
        messages: MessageRepo,
        client_id: ClientId,
        rx: Receiver<String>,
    }

    fn setup(steps: Vec<ScriptStep>) -> TestCtx {
        build(steps, true, DEFAULT_QUESTION_TIMEOUT)
    }

    fn setup_anonymous(steps: Vec<ScriptStep>) -> TestCtx {
        build(steps, false, DEFAULT_QUESTION_TIMEOUT)
    }

    fn setup_with_timeout(steps: Vec<ScriptStep>, timeout: Duration) -> TestCtx {
        build(steps, true, timeout)
    }

    fn build(steps: Vec<ScriptStep>, authenticated: bool, timeout: Duration) -> TestCtx {
        let db = Database::in_memory().unwrap();
        let registry = Arc::new(ClientRegistry::new(256));
        let questions = Arc::new(PendingQuestions::new());
        let engine = Arc::new(ScriptedEngine::new(steps).with_workspace("/tmp/ws"));

        let client_id = ClientId::from("c1");
        let user_id = if authenticated {
            let users = UserRepo::new(db.clone());
            Some(users.create("alice", Some("tok")).unwrap().id)
        } else {
            None
        };
        let rx = registry.register(client_id.clone(), user_id);

        let orch = Arc::new(
            Orchestrator::new(
                db.clone(),
                Arc::clone(&registry),
                Arc::clone(&questions),
                Arc::clone(&engine) as Arc<dyn GenerationEngine>,
            )
            .with_question_timeout(timeout),
        );

        TestCtx {
            orch,
            engine,
            projects: ProjectRepo::new(db.clone()),
            messages: MessageRepo::new(db),
            client_id,
            rx,
        }
    }

    fn drain(rx: &mut Receiver<String>) -> Vec<serde_json::Value> {
        let mut frames = Vec::new();
        while let Ok(raw) = rx.try_recv() {
            frames.push(serde_json::from_str(&raw).unwrap());
        }
        frames
    }

    fn frame_types(frames: &[serde_json::Value]) -> Vec<String> {
        frames
            .iter()
            .map(|f| f["type"].as_str().unwrap().to_string())
            .collect()
    }

    async fn recv_until(rx: &mut Receiver<String>, ty: &str) -> serde_json::Value {
        loop {
            let raw = rx.recv().await.expect("channel closed before frame arrived");
            let frame: serde_json::Value = serde_json::from_str(&raw).unwrap();
            if frame["type"] == ty {
                return frame;
            }
        }
    }

    #[tokio::test]
    async fn create_requires_authentication() {
        let mut ctx = setup_anonymous(vec![ScriptStep::message("Mike", "hi")]);
        ctx.orch
            .handle_create_project(
                &ctx.client_id,
                Some("Todo".into()),
                Some("Build a todo app".into()),
            )
            .await;

        let frames = drain(&mut ctx.rx);
        assert_eq!(frame_types(&frames), vec!["error"]);
        assert_eq!(frames[0]["auth_required"], true);
        assert_eq!(ctx.engine.call_count(), 0);
        assert!(ctx.projects.list(10, 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_requires_requirement() {
        let mut ctx = setup(vec![]);
        ctx.orch
            .handle_create_project(&ctx.client_id, Some("Todo".into()), None)
            .await;

        let frames = drain(&mut ctx.rx);
        assert_eq!(frames[0]["content"], "Requirement is required");
        assert!(ctx.projects.list(10, 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_happy_path_streams_and_persists() {
        let mut ctx = setup(vec![
            ScriptStep::message("Mike", "Analyzing requirements"),
            ScriptStep::task("t1", "Alex", "Implement the game loop"),
            ScriptStep::message("Alex", "Writing code"),
        ]);
        ctx.orch
            .handle_create_project(
                &ctx.client_id,
                Some("Snake".into()),
                Some("Build a snake game".into()),
            )
            .await;

        let frames = drain(&mut ctx.rx);
        assert_eq!(
            frame_types(&frames),
            vec![
                "status",
                "agent_status",
                "progress",
                "agent_message",
                "task_update",
                "agent_message",
                "progress",
                "complete",
            ]
        );
        assert_eq!(frames[0]["status"], "created");
        assert_eq!(frames[2]["progress"]["current_agent"], "Mike");
        assert_eq!(frames[4]["current_assignee"], "Alex");
        let last_progress = &frames[6];
        assert_eq!(last_progress["progress"]["percentage"], 100);
        assert_eq!(frames[7]["workspace_path"], "/tmp/ws");

        let project = &ctx.projects.list(10, 0).unwrap()[0];
        assert_eq!(project.status, ProjectStatus::Completed);
        assert_eq!(project.workspace_path.as_deref(), Some("/tmp/ws"));

        let log = ctx.messages.list(&project.id).unwrap();
        let kinds: Vec<MessageKind> = log.iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            vec![
                MessageKind::Status,
                MessageKind::AgentMessage,
                MessageKind::AgentMessage,
                MessageKind::Complete,
            ]
        );
        assert!(log.iter().all(|m| m.round == 1));
    }

    #[tokio::test]
    async fn engine_failure_marks_failed_with_retry_flag() {
        let mut ctx = setup(vec![
            ScriptStep::message("Mike", "Starting"),
            ScriptStep::Fail("model quota exhausted".into()),
        ]);
        ctx.orch
            .handle_create_project(&ctx.client_id, Some("Snake".into()), Some("Build it".into()))
            .await;

        let frames = drain(&mut ctx.rx);
        let error = frames.last().unwrap();
        assert_eq!(error["type"], "error");
        assert_eq!(error["can_retry"], true);
        assert!(error["content"]
            .as_str()
            .unwrap()
            .starts_with("Error generating project"));

        let project = &ctx.projects.list(10, 0).unwrap()[0];
        assert_eq!(project.status, ProjectStatus::Failed);
        let log = ctx.messages.list(&project.id).unwrap();
        assert_eq!(log.last().unwrap().kind, MessageKind::Error);
    }

    #[tokio::test]
    async fn clarification_roundtrip_unblocks_run() {
        let mut ctx = setup(vec![
            ScriptStep::ask("Mia", "Which theme?"),
            ScriptStep::message("Mia", "Using the dark theme"),
        ]);

        let orch = Arc::clone(&ctx.orch);
        let client_id = ctx.client_id.clone();
        let run = tokio::spawn(async move {
            orch.handle_create_project(
                &client_id,
                Some("Site".into()),
                Some("Build a site".into()),
            )
            .await;
        });

        let clarification = recv_until(&mut ctx.rx, "clarification").await;
        assert_eq!(clarification["agent"], "Mia");
        let question_id = clarification["question_id"].as_str().unwrap().to_string();

        ctx.orch
            .handle_user_response(
                &ctx.client_id,
                Some(question_id.clone()),
                Some("dark".into()),
                None,
            )
            .await;
        run.await.unwrap();

        assert_eq!(ctx.engine.answers(), vec!["dark".to_string()]);

        let frames = drain(&mut ctx.rx);
        let response = frames
            .iter()
            .find(|f| f["type"] == "response_received")
            .unwrap();
        assert_eq!(response["question_id"], question_id.as_str());
        assert!(frames.iter().any(|f| f["type"] == "complete"));

        let project = &ctx.projects.list(10, 0).unwrap()[0];
        let log = ctx.messages.list(&project.id).unwrap();
        assert!(log
            .iter()
            .any(|m| m.kind == MessageKind::UserResponse && m.content == "dark"));
        assert!(log.iter().any(|m| m.kind == MessageKind::Clarification));
    }

    #[tokio::test]
    async fn unanswered_question_times_out_with_sentinel() {
        let mut ctx = setup_with_timeout(
            vec![ScriptStep::ask("Mia", "Which theme?")],
            Duration::from_millis(50),
        );
        ctx.orch
            .handle_create_project(&ctx.client_id, Some("Site".into()), Some("Build it".into()))
            .await;

        assert_eq!(ctx.engine.answers(), vec![TIMEOUT_ANSWER.to_string()]);
        assert_eq!(ctx.orch.questions.pending_count(), 0);
        let frames = drain(&mut ctx.rx);
        let timeout = frames
            .iter()
            .find(|f| f["type"] == "question_timeout")
            .unwrap();
        assert_eq!(
            timeout["content"],
            "Question timed out, using default behavior"
        );
        assert!(frames.iter().any(|f| f["type"] == "complete"));
    }

    #[tokio::test]
    async fn skip_resolves_with_skip_sentinel() {
        let mut ctx = setup(vec![ScriptStep::ask("Mia", "Which theme?")]);

        let orch = Arc::clone(&ctx.orch);
        let client_id = ctx.client_id.clone();
        let run = tokio::spawn(async move {
            orch.handle_create_project(&client_id, Some("Site".into()), Some("Build it".into()))
                .await;
        });

        let clarification = recv_until(&mut ctx.rx, "clarification").await;
        let question_id = clarification["question_id"].as_str().unwrap().to_string();

        ctx.orch
            .handle_skip_question(&ctx.client_id, Some(question_id))
            .await;
        run.await.unwrap();

        assert_eq!(ctx.engine.answers(), vec![SKIP_ANSWER.to_string()]);
        let frames = drain(&mut ctx.rx);
        let response = frames
            .iter()
            .find(|f| f["type"] == "response_received")
            .unwrap();
        assert_eq!(response["skipped"], true);

        let project = &ctx.projects.list(10, 0).unwrap()[0];
        let log = ctx.messages.list(&project.id).unwrap();
        assert!(log
            .iter()
            .any(|m| m.content == "[Skipped question - using default]"));
    }

    #[tokio::test]
    async fn response_from_wrong_session_is_rejected() {
        let mut ctx = setup(vec![]);
        let question_id = ctx.orch.questions.create(
            ProjectId::new(),
            ClientId::from("someone-else"),
            "Mia",
            "Which theme?",
            QuestionMode::Inline,
            None,
        );

        ctx.orch
            .handle_user_response(
                &ctx.client_id,
                Some(question_id.to_string()),
                Some("dark".into()),
                None,
            )
            .await;

        let frames = drain(&mut ctx.rx);
        assert_eq!(
            frames[0]["content"],
            "This question does not belong to your session"
        );
        // The question is still pending for its rightful owner.
        assert_eq!(ctx.orch.questions.pending_count(), 1);
    }

    #[tokio::test]
    async fn response_to_unknown_question_reports_not_found() {
        let mut ctx = setup(vec![]);
        ctx.orch
            .handle_user_response(
                &ctx.client_id,
                Some("q_nope".into()),
                Some("dark".into()),
                None,
            )
            .await;

        let frames = drain(&mut ctx.rx);
        assert_eq!(frames[0]["content"], "Question not found or already answered");
        assert_eq!(frames[0]["question_id"], "q_nope");
    }

    #[tokio::test]
    async fn continue_runs_next_round() {
        let mut ctx = setup(vec![ScriptStep::message("Alex", "Patching")]);
        ctx.orch
            .handle_create_project(&ctx.client_id, Some("Shop".into()), Some("Build a shop".into()))
            .await;
        let project_id = ctx.projects.list(10, 0).unwrap()[0].id.clone();
        drain(&mut ctx.rx);

        ctx.orch
            .handle_continue_conversation(
                &ctx.client_id,
                Some(project_id.to_string()),
                Some("Add dark mode".into()),
            )
            .await;

        let frames = drain(&mut ctx.rx);
        assert_eq!(frames[0]["type"], "status");
        assert_eq!(frames[0]["status"], "continuing");
        assert_eq!(
            frames[0]["content"],
            "Continuing conversation (Round 2)..."
        );
        let complete = frames.iter().find(|f| f["type"] == "complete").unwrap();
        assert_eq!(complete["content"], "Changes applied successfully!");
        assert_eq!(complete["conversation_round"], 2);
        // No per-role progress frames for continuation rounds.
        assert!(!frames.iter().any(|f| f["type"] == "agent_status"));

        assert_eq!(ctx.engine.call_count(), 2);
        assert_eq!(ctx.messages.latest_round(&project_id).unwrap(), 2);
        let log = ctx.messages.list(&project_id).unwrap();
        assert!(log
            .iter()
            .any(|m| m.kind == MessageKind::User && m.content == "Add dark mode" && m.round == 2));

        // A further continuation lands on round 3.
        ctx.orch
            .handle_continue_conversation(
                &ctx.client_id,
                Some(project_id.to_string()),
                Some("Add a footer".into()),
            )
            .await;
        let frames = drain(&mut ctx.rx);
        assert_eq!(frames[0]["content"], "Continuing conversation (Round 3)...");
        assert_eq!(ctx.messages.latest_round(&project_id).unwrap(), 3);
        let history = ctx.messages.user_messages_before(&project_id, 3).unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["Add dark mode"]);
    }

    #[tokio::test]
    async fn continue_requires_existing_project() {
        let mut ctx = setup(vec![]);
        ctx.orch
            .handle_continue_conversation(
                &ctx.client_id,
                Some("proj_missing".into()),
                Some("Add dark mode".into()),
            )
            .await;

        let frames = drain(&mut ctx.rx);
        assert_eq!(frames[0]["content"], "Project not found: proj_missing");
    }

    #[tokio::test]
    async fn regenerate_replays_original_requirement() {
        let mut ctx = setup(vec![ScriptStep::message("Mike", "Rebuilding")]);
        ctx.orch
            .handle_create_project(&ctx.client_id, Some("Shop".into()), Some("Build a shop".into()))
            .await;
        let project_id = ctx.projects.list(10, 0).unwrap()[0].id.clone();
        drain(&mut ctx.rx);

        ctx.orch
            .handle_regenerate_project(&ctx.client_id, Some(project_id.to_string()))
            .await;

        let frames = drain(&mut ctx.rx);
        assert_eq!(frames[0]["status"], "regenerating");
        let complete = frames.iter().find(|f| f["type"] == "complete").unwrap();
        assert_eq!(complete["content"], "Project regenerated successfully!");

        let log = ctx.messages.list(&project_id).unwrap();
        assert!(log
            .iter()
            .any(|m| m.kind == MessageKind::User && m.content == "Regenerate project"));
    }

    #[tokio::test]
    async fn retry_is_gated_on_failed_status() {
        let mut ctx = setup(vec![ScriptStep::message("Mike", "Trying again")]);
        let user = UserId::new();
        let project = ctx
            .projects
            .create("Shop", "Build a shop", Some(&user))
            .unwrap();
        ctx.projects
            .update_status(&project.id, ProjectStatus::Completed)
            .unwrap();

        ctx.orch
            .handle_retry_project(&ctx.client_id, Some(project.id.to_string()))
            .await;
        let frames = drain(&mut ctx.rx);
        assert_eq!(frames[0]["content"], "Only failed projects can be retried");
        assert_eq!(ctx.engine.call_count(), 0);

        ctx.projects
            .update_status(&project.id, ProjectStatus::Failed)
            .unwrap();
        ctx.orch
            .handle_retry_project(&ctx.client_id, Some(project.id.to_string()))
            .await;

        let frames = drain(&mut ctx.rx);
        assert_eq!(frames[0]["status"], "retrying");
        assert!(frames.iter().any(|f| f["type"] == "agent_status"));
        let complete = frames.iter().find(|f| f["type"] == "complete").unwrap();
        assert_eq!(complete["content"], "Project generated successfully!");
        assert_eq!(
            ctx.projects.get(&project.id).unwrap().status,
            ProjectStatus::Completed
        );
    }

    #[tokio::test]
    async fn template_create_renders_requirement() {
        let mut ctx = setup(vec![ScriptStep::message("Mike", "Building")]);
        ctx.orch
            .handle_create_from_template(
                &ctx.client_id,
                Some("game".into()),
                Some("Snake".into()),
                None,
                None,
            )
            .await;

        let frames = drain(&mut ctx.rx);
        assert!(frames.iter().any(|f| f["type"] == "complete"));

        let project = &ctx.projects.list(10, 0).unwrap()[0];
        assert_eq!(project.name, "Snake (Web Game)");
        assert!(project.requirement.contains("Project Name: Snake"));
        assert!(project.requirement.contains("- Core game mechanics"));
    }

    #[tokio::test]
    async fn template_create_requires_authentication() {
        let mut ctx = setup_anonymous(vec![]);
        ctx.orch
            .handle_create_from_template(
                &ctx.client_id,
                Some("game".into()),
                Some("Snake".into()),
                None,
                None,
            )
            .await;

        let frames = drain(&mut ctx.rx);
        assert_eq!(frames[0]["auth_required"], true);
        assert!(ctx.projects.list(10, 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_template_is_rejected() {
        let mut ctx = setup(vec![]);
        ctx.orch
            .handle_create_from_template(
                &ctx.client_id,
                Some("mainframe_cobol".into()),
                None,
                None,
                None,
            )
            .await;

        let frames = drain(&mut ctx.rx);
        assert_eq!(frames[0]["content"], "Template not found: mainframe_cobol");
        assert!(ctx.projects.list(10, 0).unwrap().is_empty());
    }
}
