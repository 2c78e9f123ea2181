//! Engine backed by an external agent process.
//!
//! The process is spawned once per run. It receives a single JSON
//! request line on stdin and streams JSON event lines on stdout:
//!
//! ```text
//! {"event":"message","agent":"Mike","content":"...","kind":"agent_message"}
//! {"event":"ask_human","agent":"Mia","question":"...","mode":"inline","options":["a","b"]}
//! {"event":"task","tasks":[...],"task_id":"t1","assignee":"Alex","instruction":"..."}
//! {"event":"complete","workspace_path":"/workspaces/proj_x"}
//! {"event":"error","message":"..."}
//! ```
//!
//! An `ask_human` event blocks the run; the answer is written back to
//! the process as `{"answer":"..."}` on stdin.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, warn};

use forge_core::{MessageKind, QuestionMode};

use crate::callbacks::{RunCallbacks, TaskUpdate};
use crate::error::EngineError;
use crate::service::{ContinuationRequest, GenerationEngine, GenerationRequest};

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum EngineEvent {
    Message {
        agent: String,
        content: String,
        #[serde(default)]
        kind: Option<MessageKind>,
    },
    AskHuman {
        agent: String,
        question: String,
        #[serde(default)]
        mode: Option<QuestionMode>,
        #[serde(default)]
        options: Option<Vec<String>>,
    },
    Task {
        #[serde(default)]
        tasks: Vec<serde_json::Value>,
        #[serde(default)]
        task_id: String,
        #[serde(default)]
        assignee: String,
        #[serde(default)]
        instruction: String,
    },
    Complete {
        workspace_path: PathBuf,
    },
    Error {
        message: String,
    },
}

fn parse_event(line: &str) -> Result<EngineEvent, EngineError> {
    serde_json::from_str(line)
        .map_err(|e| EngineError::Protocol(format!("bad event line: {e}: {line}")))
}

/// Engine that shells out to an agent-runner command.
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
}

impl CommandEngine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    fn spawn(&self) -> Result<(Child, ChildStdin), EngineError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Interrupted("child stdin unavailable".into()))?;
        Ok((child, stdin))
    }

    async fn run(
        &self,
        request: serde_json::Value,
        callbacks: &dyn RunCallbacks,
    ) -> Result<PathBuf, EngineError> {
        let (mut child, mut stdin) = self.spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Interrupted("child stdout unavailable".into()))?;

        let mut request_line = serde_json::to_string(&request)
            .map_err(|e| EngineError::Protocol(format!("bad request: {e}")))?;
        request_line.push('\n');
        stdin.write_all(request_line.as_bytes()).await?;
        stdin.flush().await?;

        let mut lines = BufReader::new(stdout).lines();
        let mut workspace = None;

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_event(line)? {
                EngineEvent::Message {
                    agent,
                    content,
                    kind,
                } => {
                    callbacks
                        .on_message(&agent, &content, kind.unwrap_or(MessageKind::AgentMessage))
                        .await;
                }
                EngineEvent::AskHuman {
                    agent,
                    question,
                    mode,
                    options,
                } => {
                    let answer = callbacks
                        .on_ask_human(&agent, &question, mode.unwrap_or_default(), options)
                        .await;
                    let mut reply =
                        serde_json::to_string(&serde_json::json!({ "answer": answer }))
                            .map_err(|e| EngineError::Protocol(e.to_string()))?;
                    reply.push('\n');
                    stdin.write_all(reply.as_bytes()).await?;
                    stdin.flush().await?;
                }
                EngineEvent::Task {
                    tasks,
                    task_id,
                    assignee,
                    instruction,
                } => {
                    callbacks
                        .on_task(TaskUpdate {
                            tasks,
                            current_task_id: task_id,
                            current_assignee: assignee,
                            instruction,
                        })
                        .await;
                }
                EngineEvent::Complete { workspace_path } => {
                    workspace = Some(workspace_path);
                    break;
                }
                EngineEvent::Error { message } => {
                    let _ = child.wait().await;
                    return Err(EngineError::Generation(message));
                }
            }
        }

        let status = child.wait().await?;
        match workspace {
            Some(path) => {
                debug!(workspace = %path.display(), "engine run complete");
                Ok(path)
            }
            None => {
                warn!(%status, "engine exited without completing");
                Err(EngineError::Interrupted(format!(
                    "engine exited with {status} before reporting completion"
                )))
            }
        }
    }
}

#[async_trait]
impl GenerationEngine for CommandEngine {
    async fn generate(
        &self,
        request: GenerationRequest,
        callbacks: &dyn RunCallbacks,
    ) -> Result<PathBuf, EngineError> {
        self.run(
            serde_json::json!({
                "op": "generate",
                "project_name": request.project_name,
                "requirement": request.requirement,
            }),
            callbacks,
        )
        .await
    }

    async fn continue_generation(
        &self,
        request: ContinuationRequest,
        callbacks: &dyn RunCallbacks,
    ) -> Result<PathBuf, EngineError> {
        self.run(continuation_payload(&request), callbacks).await
    }
}

/// Build the request line for a continuation run. The prompt already
/// carries the conversation history; the existing workspace files are
/// summarized and appended so the agent process sees the current state
/// of the project.
fn continuation_payload(request: &ContinuationRequest) -> serde_json::Value {
    let mut requirement = request.prompt.clone();
    let summary = crate::context::summarize_workspace(&request.workspace_path);
    if !summary.is_empty() {
        requirement.push_str("\n=== EXISTING FILES ===\n");
        requirement.push_str(&summary);
    }
    serde_json::json!({
        "op": "continue",
        "project_name": request.project_name,
        "requirement": requirement,
        "workspace_path": request.workspace_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_message_event() {
        let event = parse_event(
            r#"{"event":"message","agent":"Mike","content":"hi","kind":"agent_message"}"#,
        )
        .unwrap();
        match event {
            EngineEvent::Message { agent, kind, .. } => {
                assert_eq!(agent, "Mike");
                assert_eq!(kind, Some(MessageKind::AgentMessage));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parses_ask_human_with_defaults() {
        let event =
            parse_event(r#"{"event":"ask_human","agent":"Mia","question":"color?"}"#).unwrap();
        match event {
            EngineEvent::AskHuman { mode, options, .. } => {
                assert!(mode.is_none());
                assert!(options.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_event() {
        assert!(matches!(
            parse_event(r#"{"event":"frobnicate"}"#),
            Err(EngineError::Protocol(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_script_to_completion() {
        use crate::scripted::tests_support::Recorder;

        // Consumes the request line before emitting events.
        let script = concat!(
            r#"head -n 1 > /dev/null; printf '%s\n' "#,
            r#"'{"event":"message","agent":"Mike","content":"working"}' "#,
            r#"'{"event":"complete","workspace_path":"/tmp/ws"}'"#,
        );
        let engine = CommandEngine::new("sh").with_args(vec!["-c".into(), script.into()]);
        let recorder = Recorder::default();

        let request = GenerationRequest {
            project_name: "demo".to_string(),
            requirement: "anything".to_string(),
        };
        let workspace = engine.generate(request, &recorder).await.unwrap();
        assert_eq!(workspace, PathBuf::from("/tmp/ws"));
        assert_eq!(recorder.message_count(), 1);
    }

    #[test]
    fn continuation_payload_includes_workspace_summary() {
        use std::fs;

        let dir = std::env::temp_dir().join(format!("forge-cont-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("index.html"), "<h1>hello</h1>").unwrap();

        let request = ContinuationRequest {
            project_name: "demo".to_string(),
            prompt: "Add dark mode".to_string(),
            workspace_path: dir.clone(),
        };
        let payload = continuation_payload(&request);
        let requirement = payload["requirement"].as_str().unwrap();
        assert!(requirement.starts_with("Add dark mode"));
        assert!(requirement.contains("=== EXISTING FILES ==="));
        assert!(requirement.contains("--- index.html ---"));
        assert!(requirement.contains("<h1>hello</h1>"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn continuation_payload_without_workspace_is_prompt_only() {
        let request = ContinuationRequest {
            project_name: "demo".to_string(),
            prompt: "Add dark mode".to_string(),
            workspace_path: std::path::PathBuf::from("/nonexistent/forge-test-workspace"),
        };
        let payload = continuation_payload(&request);
        assert_eq!(payload["requirement"], "Add dark mode");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn early_exit_is_interrupted() {
        use crate::scripted::tests_support::Recorder;

        // Consumes the request line, then exits without any events.
        let engine =
            CommandEngine::new("sh").with_args(vec!["-c".into(), "head -n 1 > /dev/null".into()]);
        let recorder = Recorder::default();
        let request = GenerationRequest {
            project_name: "demo".to_string(),
            requirement: "anything".to_string(),
        };
        let err = engine.generate(request, &recorder).await.unwrap_err();
        assert!(matches!(err, EngineError::Interrupted(_)));
    }
}
