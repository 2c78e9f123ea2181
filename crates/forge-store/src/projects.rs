use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use forge_core::ids::{ProjectId, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Deleted,
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

impl std::str::FromStr for ProjectStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown project status: {other}")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectRow {
    pub id: ProjectId,
    pub name: String,
    pub requirement: String,
    pub status: ProjectStatus,
    pub workspace_path: Option<String>,
    pub user_id: Option<UserId>,
    pub created_at: String,
    pub updated_at: String,
}

pub struct ProjectRepo {
    db: Database,
}

const SELECT_COLUMNS: &str =
    "SELECT id, name, requirement, status, workspace_path, user_id, created_at, updated_at
     FROM projects";

impl ProjectRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new project in `pending` state.
    #[instrument(skip(self, requirement), fields(name))]
    pub fn create(
        &self,
        name: &str,
        requirement: &str,
        user_id: Option<&UserId>,
    ) -> Result<ProjectRow, StoreError> {
        let id = ProjectId::new();
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO projects (id, name, requirement, status, user_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?6)",
                rusqlite::params![
                    id.as_str(),
                    name,
                    requirement,
                    user_id.map(|u| u.as_str()),
                    now,
                    now,
                ],
            )?;

            Ok(ProjectRow {
                id,
                name: name.to_string(),
                requirement: requirement.to_string(),
                status: ProjectStatus::Pending,
                workspace_path: None,
                user_id: user_id.cloned(),
                created_at: now.clone(),
                updated_at: now,
            })
        })
    }

    /// Get a project by ID.
    #[instrument(skip(self), fields(project_id = %id))]
    pub fn get(&self, id: &ProjectId) -> Result<ProjectRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_project(row),
                None => Err(StoreError::NotFound(format!("project {id}"))),
            }
        })
    }

    /// List non-deleted projects, newest first.
    #[instrument(skip(self))]
    pub fn list(&self, limit: u32, offset: u32) -> Result<Vec<ProjectRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS} WHERE status != 'deleted'
                 ORDER BY created_at DESC LIMIT ?1 OFFSET ?2"
            ))?;
            let mut rows = stmt.query(rusqlite::params![limit, offset])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_project(row)?);
            }
            Ok(results)
        })
    }

    /// Update lifecycle status.
    #[instrument(skip(self), fields(project_id = %id, status = %status))]
    pub fn update_status(&self, id: &ProjectId, status: ProjectStatus) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE projects SET status = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![status.to_string(), now, id.as_str()],
            )?;
            Ok(())
        })
    }

    /// Record where a completed run left its generated output.
    #[instrument(skip(self), fields(project_id = %id))]
    pub fn update_workspace(&self, id: &ProjectId, workspace_path: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE projects SET workspace_path = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![workspace_path, now, id.as_str()],
            )?;
            Ok(())
        })
    }

    /// Logical delete. Rows are never physically removed.
    #[instrument(skip(self), fields(project_id = %id))]
    pub fn mark_deleted(&self, id: &ProjectId) -> Result<(), StoreError> {
        self.update_status(id, ProjectStatus::Deleted)
    }
}

fn row_to_project(row: &rusqlite::Row<'_>) -> Result<ProjectRow, StoreError> {
    let status_str: String = row_helpers::get(row, 3, "projects", "status")?;

    Ok(ProjectRow {
        id: ProjectId::from_raw(row_helpers::get::<String>(row, 0, "projects", "id")?),
        name: row_helpers::get(row, 1, "projects", "name")?,
        requirement: row_helpers::get(row, 2, "projects", "requirement")?,
        status: row_helpers::parse_enum(&status_str, "projects", "status")?,
        workspace_path: row_helpers::get_opt(row, 4, "projects", "workspace_path")?,
        user_id: row_helpers::get_opt::<String>(row, 5, "projects", "user_id")?
            .map(UserId::from_raw),
        created_at: row_helpers::get(row, 6, "projects", "created_at")?,
        updated_at: row_helpers::get(row, 7, "projects", "updated_at")?,
    })
}
