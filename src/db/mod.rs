//! Direct Postgres access to the settings table.
//!
//! SYSTEM CONTEXT
//! ==============
//! Used instead of the REST directory when `DATABASE_URL` is configured
//! (server-side tooling, local development against the platform database).
//! The schema is owned by the hosted platform, so no migrations run here.

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::backend::{ProfileDirectory, ProfileError, UserSettings};

const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

fn db_max_connections() -> u32 {
    std::env::var("DB_MAX_CONNECTIONS").map_or(DEFAULT_DB_MAX_CONNECTIONS, |v| {
        v.parse::<u32>().unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
    })
}

/// Initialize the `PostgreSQL` connection pool.
///
/// # Errors
///
/// Returns an error if the connection fails.
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(db_max_connections())
        .connect(database_url)
        .await
}

/// [`ProfileDirectory`] reading `user_settings` over a pool.
#[derive(Clone)]
pub struct PgProfileDirectory {
    pool: PgPool,
}

impl PgProfileDirectory {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ProfileDirectory for PgProfileDirectory {
    async fn fetch_settings(&self, user_id: Uuid) -> Result<Option<UserSettings>, ProfileError> {
        let row = sqlx::query(
            r"SELECT user_id, username, profile_completed
              FROM user_settings
              WHERE user_id = $1
              LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(UserSettings {
            user_id: row.try_get("user_id")?,
            username: row.try_get("username")?,
            profile_completed: row
                .try_get::<Option<bool>, _>("profile_completed")?
                .unwrap_or(false),
        }))
    }
}
