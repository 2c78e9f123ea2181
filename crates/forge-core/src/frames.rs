//! Wire protocol for the duplex channel.
//!
//! Inbound frames are client commands; outbound frames are everything the
//! server pushes, from run lifecycle to progress snapshots. Both sides are
//! internally tagged JSON objects discriminated by `type`.

use serde::{Deserialize, Serialize};

use crate::message::QuestionMode;
use crate::progress::{AgentState, ProgressSnapshot};

/// Client → server command frame.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    CreateProject {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        requirement: Option<String>,
    },
    CreateFromTemplate {
        #[serde(default)]
        template_id: Option<String>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        features: Option<Vec<String>>,
        #[serde(default)]
        custom_requirements: Option<String>,
    },
    ContinueConversation {
        #[serde(default)]
        project_id: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    RegenerateProject {
        #[serde(default)]
        project_id: Option<String>,
    },
    RetryProject {
        #[serde(default)]
        project_id: Option<String>,
    },
    UserResponse {
        #[serde(default)]
        question_id: Option<String>,
        #[serde(default)]
        response: Option<String>,
        #[serde(default)]
        project_id: Option<String>,
    },
    SkipQuestion {
        #[serde(default)]
        question_id: Option<String>,
    },
    Ping,
}

/// The nested `progress` object carried by progress and task frames.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub current: usize,
    pub total: usize,
    pub percentage: u8,
    pub current_agent: String,
}

impl From<&ProgressSnapshot> for ProgressPayload {
    fn from(snap: &ProgressSnapshot) -> Self {
        Self {
            current: snap.current,
            total: snap.total,
            percentage: snap.percentage,
            current_agent: snap.current_agent.clone(),
        }
    }
}

/// Server → client frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Status {
        content: String,
        project_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_round: Option<i64>,
    },
    AgentMessage {
        agent: String,
        content: String,
        project_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_round: Option<i64>,
    },
    ReplyToHuman {
        agent: String,
        content: String,
        project_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_round: Option<i64>,
    },
    Clarification {
        agent: String,
        content: String,
        project_id: String,
        question_id: String,
        question_type: QuestionMode,
        #[serde(skip_serializing_if = "Option::is_none")]
        options: Option<Vec<String>>,
    },
    QuestionTimeout {
        question_id: String,
        project_id: String,
        content: String,
    },
    ResponseReceived {
        question_id: String,
        project_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        skipped: Option<bool>,
    },
    Progress {
        project_id: String,
        progress: ProgressPayload,
        agent_states: Vec<AgentState>,
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_round: Option<i64>,
    },
    AgentStatus {
        project_id: String,
        agent_states: Vec<AgentState>,
    },
    TaskUpdate {
        project_id: String,
        current_task_id: String,
        current_assignee: String,
        instruction: String,
        progress: ProgressPayload,
        agent_states: Vec<AgentState>,
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_round: Option<i64>,
    },
    Complete {
        content: String,
        project_id: String,
        workspace_path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_round: Option<i64>,
    },
    Error {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        project_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        question_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        auth_required: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        can_retry: Option<bool>,
    },
    Pong,
}

impl ServerFrame {
    /// An error frame with only a human-readable message.
    pub fn error(content: impl Into<String>) -> Self {
        Self::Error {
            content: content.into(),
            project_id: None,
            question_id: None,
            auth_required: None,
            can_retry: None,
        }
    }

    /// Build a progress frame from a tracker snapshot.
    pub fn progress(
        project_id: impl Into<String>,
        snap: &ProgressSnapshot,
        conversation_round: Option<i64>,
    ) -> Self {
        Self::Progress {
            project_id: project_id.into(),
            progress: ProgressPayload::from(snap),
            agent_states: snap.agent_states.clone(),
            conversation_round,
        }
    }

    /// The wire discriminator, for logging and assertions.
    pub fn frame_type(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::AgentMessage { .. } => "agent_message",
            Self::ReplyToHuman { .. } => "reply_to_human",
            Self::Clarification { .. } => "clarification",
            Self::QuestionTimeout { .. } => "question_timeout",
            Self::ResponseReceived { .. } => "response_received",
            Self::Progress { .. } => "progress",
            Self::AgentStatus { .. } => "agent_status",
            Self::TaskUpdate { .. } => "task_update",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
            Self::Pong => "pong",
        }
    }
}
