use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use forge_core::ids::UserId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Account row. Password/JWT mechanics live outside this crate; the store only
/// resolves tokens to identities and tracks the active flag.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserRow {
    pub id: UserId,
    pub username: String,
    pub auth_token: Option<String>,
    pub is_active: bool,
    pub created_at: String,
}

pub struct UserRepo {
    db: Database,
}

const SELECT_COLUMNS: &str =
    "SELECT id, username, auth_token, is_active, created_at FROM users";

impl UserRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, auth_token), fields(username))]
    pub fn create(&self, username: &str, auth_token: Option<&str>) -> Result<UserRow, StoreError> {
        let id = UserId::new();
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, auth_token, is_active, created_at)
                 VALUES (?1, ?2, ?3, 1, ?4)",
                rusqlite::params![id.as_str(), username, auth_token, now],
            )?;

            Ok(UserRow {
                id,
                username: username.to_string(),
                auth_token: auth_token.map(String::from),
                is_active: true,
                created_at: now,
            })
        })
    }

    #[instrument(skip(self), fields(user_id = %id))]
    pub fn get(&self, id: &UserId) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_user(row),
                None => Err(StoreError::NotFound(format!("user {id}"))),
            }
        })
    }

    /// Resolve a bearer token to its account, if any.
    #[instrument(skip(self, token))]
    pub fn find_by_token(&self, token: &str) -> Result<Option<UserRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE auth_token = ?1"))?;
            let mut rows = stmt.query([token])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_user(row)?)),
                None => Ok(None),
            }
        })
    }

    #[instrument(skip(self), fields(user_id = %id))]
    pub fn set_active(&self, id: &UserId, is_active: bool) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET is_active = ?1 WHERE id = ?2",
                rusqlite::params![is_active as i64, id.as_str()],
            )?;
            Ok(())
        })
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> Result<UserRow, StoreError> {
    Ok(UserRow {
        id: UserId::from_raw(row_helpers::get::<String>(row, 0, "users", "id")?),
        username: row_helpers::get(row, 1, "users", "username")?,
        auth_token: row_helpers::get_opt(row, 2, "users", "auth_token")?,
        is_active: row_helpers::get::<i64>(row, 3, "users", "is_active")? != 0,
        created_at: row_helpers::get(row, 4, "users", "created_at")?,
    })
}
