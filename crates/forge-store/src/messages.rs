use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use forge_core::ids::{MessageId, ProjectId};
use forge_core::message::MessageKind;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// One append-only conversation-log entry. Never mutated or deleted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: MessageId,
    pub project_id: ProjectId,
    pub agent: String,
    pub content: String,
    pub kind: MessageKind,
    pub round: i64,
    pub created_at: String,
}

#[derive(Clone)]
pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a message at the given conversation round.
    #[instrument(skip(self, content), fields(project_id = %project_id, agent, kind = %kind, round))]
    pub fn append(
        &self,
        project_id: &ProjectId,
        agent: &str,
        content: &str,
        kind: MessageKind,
        round: i64,
    ) -> Result<MessageRow, StoreError> {
        let id = MessageId::new();
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, project_id, agent, content, kind, round, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    id.as_str(),
                    project_id.as_str(),
                    agent,
                    content,
                    kind.to_string(),
                    round,
                    now,
                ],
            )?;

            Ok(MessageRow {
                id,
                project_id: project_id.clone(),
                agent: agent.to_string(),
                content: content.to_string(),
                kind,
                round,
                created_at: now,
            })
        })
    }

    /// All messages for a project, ordered by (round, timestamp, id) ascending.
    /// Message ids are uuid v7, so the id tiebreak preserves insertion order
    /// within a timestamp.
    #[instrument(skip(self), fields(project_id = %project_id))]
    pub fn list(&self, project_id: &ProjectId) -> Result<Vec<MessageRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, project_id, agent, content, kind, round, created_at
                 FROM messages WHERE project_id = ?1
                 ORDER BY round ASC, created_at ASC, id ASC",
            )?;
            let mut rows = stmt.query([project_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })
    }

    /// User messages from rounds strictly before `round`, for history prompts.
    #[instrument(skip(self), fields(project_id = %project_id, round))]
    pub fn user_messages_before(
        &self,
        project_id: &ProjectId,
        round: i64,
    ) -> Result<Vec<MessageRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, project_id, agent, content, kind, round, created_at
                 FROM messages WHERE project_id = ?1 AND kind = 'user' AND round < ?2
                 ORDER BY round ASC, created_at ASC, id ASC",
            )?;
            let mut rows = stmt.query(rusqlite::params![project_id.as_str(), round])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })
    }

    /// Highest round seen so far; 0 when the project has no messages.
    #[instrument(skip(self), fields(project_id = %project_id))]
    pub fn latest_round(&self, project_id: &ProjectId) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            let round: Option<i64> = conn.query_row(
                "SELECT MAX(round) FROM messages WHERE project_id = ?1",
                [project_id.as_str()],
                |row| row.get(0),
            )?;
            Ok(round.unwrap_or(0))
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<MessageRow, StoreError> {
    let kind_str: String = row_helpers::get(row, 4, "messages", "kind")?;

    Ok(MessageRow {
        id: MessageId::from_raw(row_helpers::get::<String>(row, 0, "messages", "id")?),
        project_id: ProjectId::from_raw(row_helpers::get::<String>(row, 1, "messages", "project_id")?),
        agent: row_helpers::get(row, 2, "messages", "agent")?,
        content: row_helpers::get(row, 3, "messages", "content")?,
        kind: row_helpers::parse_enum(&kind_str, "messages", "kind")?,
        round: row_helpers::get(row, 5, "messages", "round")?,
        created_at: row_helpers::get(row, 6, "messages", "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projects::ProjectRepo;

    fn setup() -> (Database, ProjectId) {
        let db = Database::in_memory().unwrap();
        let repo = ProjectRepo::new(db.clone());
        let project = repo.create("Todo", "Build a todo app", None).unwrap();
        (db, project.id)
    }

    #[test]
    fn append_and_list() {
        let (db, project_id) = setup();
        let repo = MessageRepo::new(db);
        repo.append(&project_id, "System", "starting", MessageKind::Status, 1).unwrap();
        repo.append(&project_id, "Mia", "spec ready", MessageKind::AgentMessage, 1).unwrap();

        let messages = repo.list(&project_id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].agent, "System");
        assert_eq!(messages[1].kind, MessageKind::AgentMessage);
    }

    #[test]
    fn list_orders_by_round_then_insertion() {
        let (db, project_id) = setup();
        let repo = MessageRepo::new(db);
        // Insert round 2 first to make ordering do actual work.
        repo.append(&project_id, "User", "round two", MessageKind::User, 2).unwrap();
        repo.append(&project_id, "System", "round one a", MessageKind::Status, 1).unwrap();
        repo.append(&project_id, "System", "round one b", MessageKind::Status, 1).unwrap();

        let messages = repo.list(&project_id).unwrap();
        let rounds: Vec<i64> = messages.iter().map(|m| m.round).collect();
        assert_eq!(rounds, vec![1, 1, 2]);
        assert_eq!(messages[0].content, "round one a");
        assert_eq!(messages[1].content, "round one b");
    }

    #[test]
    fn latest_round_starts_at_zero() {
        let (db, project_id) = setup();
        let repo = MessageRepo::new(db);
        assert_eq!(repo.latest_round(&project_id).unwrap(), 0);

        repo.append(&project_id, "System", "x", MessageKind::Status, 1).unwrap();
        assert_eq!(repo.latest_round(&project_id).unwrap(), 1);

        repo.append(&project_id, "User", "y", MessageKind::User, 3).unwrap();
        assert_eq!(repo.latest_round(&project_id).unwrap(), 3);
    }

    #[test]
    fn user_messages_before_excludes_current_round() {
        let (db, project_id) = setup();
        let repo = MessageRepo::new(db);
        repo.append(&project_id, "User", "first ask", MessageKind::User, 1).unwrap();
        repo.append(&project_id, "Mia", "noise", MessageKind::AgentMessage, 1).unwrap();
        repo.append(&project_id, "User", "second ask", MessageKind::User, 2).unwrap();
        repo.append(&project_id, "User", "third ask", MessageKind::User, 3).unwrap();

        let history = repo.user_messages_before(&project_id, 3).unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first ask", "second ask"]);
    }

    #[test]
    fn unknown_kind_returns_corrupt_row() {
        let (db, project_id) = setup();
        let now = chrono::Utc::now().to_rfc3339();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, project_id, agent, content, kind, round, created_at)
                 VALUES ('msg_x', ?1, 'a', 'b', 'BROKEN', 1, ?2)",
                rusqlite::params![project_id.as_str(), now],
            )?;
            Ok(())
        })
        .unwrap();

        let repo = MessageRepo::new(db);
        assert!(matches!(repo.list(&project_id), Err(StoreError::CorruptRow { .. })));
    }
}
