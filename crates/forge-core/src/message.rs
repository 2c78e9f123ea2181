use serde::{Deserialize, Serialize};

/// Kind of a persisted conversation-log entry. Matches the wire `type` of the
/// frame that carried it, where one exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Status,
    AgentMessage,
    ReplyToHuman,
    User,
    UserResponse,
    Clarification,
    Complete,
    Error,
}

impl MessageKind {
    /// Kinds that count as agent output for progress tracking.
    pub fn advances_progress(&self) -> bool {
        matches!(self, Self::AgentMessage | Self::ReplyToHuman)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Status => write!(f, "status"),
            Self::AgentMessage => write!(f, "agent_message"),
            Self::ReplyToHuman => write!(f, "reply_to_human"),
            Self::User => write!(f, "user"),
            Self::UserResponse => write!(f, "user_response"),
            Self::Clarification => write!(f, "clarification"),
            Self::Complete => write!(f, "complete"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for MessageKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "status" => Ok(Self::Status),
            "agent_message" => Ok(Self::AgentMessage),
            "reply_to_human" => Ok(Self::ReplyToHuman),
            "user" => Ok(Self::User),
            "user_response" => Ok(Self::UserResponse),
            "clarification" => Ok(Self::Clarification),
            "complete" => Ok(Self::Complete),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown message kind: {other}")),
        }
    }
}

/// How a clarification question is presented on the client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionMode {
    /// Rendered in the chat stream.
    #[default]
    Inline,
    /// Rendered as a blocking dialog.
    Modal,
}

impl std::fmt::Display for QuestionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inline => write!(f, "inline"),
            Self::Modal => write!(f, "modal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_display_and_parse_roundtrip() {
        let kinds = [
            MessageKind::Status,
            MessageKind::AgentMessage,
            MessageKind::ReplyToHuman,
            MessageKind::User,
            MessageKind::UserResponse,
            MessageKind::Clarification,
            MessageKind::Complete,
            MessageKind::Error,
        ];
        for kind in kinds {
            let parsed: MessageKind = kind.to_string().parse().unwrap();
            assert_eq!(kind, parsed);
        }
    }

    #[test]
    fn unknown_kind_rejected() {
        assert!("not_a_kind".parse::<MessageKind>().is_err());
    }

    #[test]
    fn progress_kinds() {
        assert!(MessageKind::AgentMessage.advances_progress());
        assert!(MessageKind::ReplyToHuman.advances_progress());
        assert!(!MessageKind::Status.advances_progress());
        assert!(!MessageKind::UserResponse.advances_progress());
    }

    #[test]
    fn question_mode_serde() {
        assert_eq!(serde_json::to_string(&QuestionMode::Inline).unwrap(), "\"inline\"");
        assert_eq!(serde_json::to_string(&QuestionMode::Modal).unwrap(), "\"modal\"");
        let parsed: QuestionMode = serde_json::from_str("\"modal\"").unwrap();
        assert_eq!(parsed, QuestionMode::Modal);
    }
}
