//! Identity storage over the `users` table.

use pedro_auth::{Identity, Role};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{PgPool, StorageError, StorageResult};

const SELECT_USER: &str = r#"
    SELECT id, email, password_hash, role, is_active, clinic_id, permissions,
           created_at, last_login_at
    FROM users
"#;

/// Raw `users` row.
pub type UserRow = (
    Uuid,
    String,
    Option<String>,
    String,
    bool,
    Option<Uuid>,
    Option<Vec<String>>,
    OffsetDateTime,
    Option<OffsetDateTime>,
);

/// Maps a `users` row to an [`Identity`].
///
/// # Errors
///
/// Returns `InvalidData` for an unknown role name.
pub fn identity_from_row(row: UserRow) -> StorageResult<Identity> {
    let (
        id,
        email,
        password_hash,
        role,
        active,
        clinic_id,
        permissions,
        created_at,
        last_login_at,
    ) = row;
    let role = role
        .parse::<Role>()
        .map_err(|e| StorageError::invalid_data(format!("user {id}: {e}")))?;
    Ok(Identity {
        id,
        email,
        role,
        active,
        clinic_id,
        password_hash,
        permissions,
        created_at,
        last_login_at,
    })
}

/// Identity storage operations.
pub struct UserStorage<'a> {
    pool: &'a PgPool,
}

impl<'a> UserStorage<'a> {
    #[must_use]
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Find an identity by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the row is malformed.
    pub async fn find_by_id(&self, id: Uuid) -> StorageResult<Option<Identity>> {
        let row: Option<UserRow> = query_as(&format!("{SELECT_USER} WHERE id = $1"))
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        row.map(identity_from_row).transpose()
    }

    /// Find an identity by email, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the row is malformed.
    pub async fn find_by_email(&self, email: &str) -> StorageResult<Option<Identity>> {
        let row: Option<UserRow> = query_as(&format!("{SELECT_USER} WHERE lower(email) = lower($1)"))
            .bind(email)
            .fetch_optional(self.pool)
            .await?;
        row.map(identity_from_row).transpose()
    }

    /// Insert an identity.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the email is taken.
    pub async fn create(&self, identity: &Identity) -> StorageResult<()> {
        query(
            r#"
            INSERT INTO users (id, email, password_hash, role, is_active, clinic_id,
                               permissions, created_at, last_login_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(identity.id)
        .bind(&identity.email)
        .bind(&identity.password_hash)
        .bind(identity.role.as_str())
        .bind(identity.active)
        .bind(identity.clinic_id)
        .bind(&identity.permissions)
        .bind(identity.created_at)
        .bind(identity.last_login_at)
        .execute(self.pool)
        .await
        .map_err(|e| StorageError::from_insert(e, "user"))?;
        Ok(())
    }

    /// Replace the password hash.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no identity has `id`.
    pub async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> StorageResult<()> {
        let result = query(
            "UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(password_hash)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found(format!("user {id}")));
        }
        Ok(())
    }

    /// Set `last_login_at`. A missing identity is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn record_login(&self, id: Uuid, at: OffsetDateTime) -> StorageResult<()> {
        query("UPDATE users SET last_login_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Deactivate an identity; its next request fails with `USER_DEACTIVATED`.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn set_active(&self, id: Uuid, active: bool) -> StorageResult<bool> {
        let result = query("UPDATE users SET is_active = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(active)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
