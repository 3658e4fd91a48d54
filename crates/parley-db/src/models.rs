//! Database row types. These map directly to SQLite rows and stay
//! independent of the parley-types API models.

use anyhow::{Result, anyhow};
use parley_types::models::User;

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub is_online: bool,
    pub created_at: String,
}

impl UserRow {
    pub fn into_model(self) -> Result<User> {
        let id = self
            .id
            .parse()
            .map_err(|e| anyhow!("Corrupt user id '{}': {}", self.id, e))?;

        // SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
        let created_at = chrono::NaiveDateTime::parse_from_str(&self.created_at, "%Y-%m-%d %H:%M:%S")
            .map(|ndt| ndt.and_utc())
            .map_err(|e| anyhow!("Corrupt created_at '{}' on user '{}': {}", self.created_at, self.id, e))?;

        Ok(User {
            id,
            username: self.username,
            is_online: self.is_online,
            created_at,
        })
    }
}
