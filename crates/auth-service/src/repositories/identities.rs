use super::{Identity, IdentityRepository, Standing};
use crate::errors::AuthError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::IdentityId;
use sqlx::PgPool;
use tracing::instrument;

#[derive(sqlx::FromRow)]
struct IdentityRow {
    id: i64,
    email: Option<String>,
    phone: Option<String>,
    password_hash: String,
    email_verified: bool,
    phone_verified: bool,
    standing: String,
    last_login_at: Option<DateTime<Utc>>,
}

impl TryFrom<IdentityRow> for Identity {
    type Error = AuthError;

    fn try_from(row: IdentityRow) -> Result<Self, Self::Error> {
        Ok(Identity {
            id: IdentityId(row.id),
            email: row.email,
            phone: row.phone,
            password_hash: row.password_hash,
            email_verified: row.email_verified,
            phone_verified: row.phone_verified,
            standing: row.standing.parse()?,
            last_login_at: row.last_login_at,
        })
    }
}

const IDENTITY_COLUMNS: &str = "id, email, phone, password_hash, email_verified, \
     phone_verified, standing, last_login_at";

/// PostgreSQL identity repository.
#[derive(Clone)]
pub struct PgIdentityRepository {
    pool: PgPool,
}

impl PgIdentityRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityRepository for PgIdentityRepository {
    #[instrument(skip_all)]
    async fn find_by_login(&self, identifier: &str) -> Result<Option<Identity>, AuthError> {
        let identifier = identifier.trim();
        let row = sqlx::query_as::<_, IdentityRow>(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities \
             WHERE LOWER(email) = LOWER($1) OR phone = $1 \
             LIMIT 1"
        ))
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AuthError::Database(format!("Failed to fetch identity by login: {e}")))?;

        row.map(Identity::try_from).transpose()
    }

    #[instrument(skip_all, fields(identity_id = %id))]
    async fn find_by_id(&self, id: IdentityId) -> Result<Option<Identity>, AuthError> {
        let row = sqlx::query_as::<_, IdentityRow>(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AuthError::Database(format!("Failed to fetch identity by id: {e}")))?;

        row.map(Identity::try_from).transpose()
    }

    #[instrument(skip_all, fields(identity_id = %id))]
    async fn roles(&self, id: IdentityId) -> Result<Vec<String>, AuthError> {
        let roles: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT role
            FROM identity_roles
            WHERE identity_id = $1
            ORDER BY role
            "#,
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AuthError::Database(format!("Failed to fetch identity roles: {e}")))?;

        Ok(roles.into_iter().map(|(r,)| r).collect())
    }

    #[instrument(skip_all, fields(identity_id = %id))]
    async fn permissions(&self, id: IdentityId) -> Result<Vec<String>, AuthError> {
        let permissions: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT rp.permission
            FROM identity_roles ir
            JOIN role_permissions rp ON rp.role = ir.role
            WHERE ir.identity_id = $1
            ORDER BY rp.permission
            "#,
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AuthError::Database(format!("Failed to fetch identity permissions: {e}")))?;

        Ok(permissions.into_iter().map(|(p,)| p).collect())
    }

    #[instrument(skip_all, fields(identity_id = %id))]
    async fn record_login(&self, id: IdentityId) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            UPDATE identities
            SET last_login_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| AuthError::Database(format!("Failed to update last login: {e}")))?;

        Ok(())
    }

    #[instrument(skip_all, fields(identity_id = %id))]
    async fn set_password_hash(&self, id: IdentityId, password_hash: &str) -> Result<(), AuthError> {
        let result = sqlx::query(
            r#"
            UPDATE identities
            SET password_hash = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(password_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| AuthError::Database(format!("Failed to update password: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AuthError::NotFound("Identity".to_string()));
        }
        Ok(())
    }

    #[instrument(skip_all, fields(identity_id = %id))]
    async fn mark_email_verified(&self, id: IdentityId, email: &str) -> Result<bool, AuthError> {
        let result = sqlx::query(
            r#"
            UPDATE identities
            SET email_verified = TRUE, updated_at = NOW()
            WHERE id = $1 AND LOWER(email) = LOWER($2)
            "#,
        )
        .bind(id.0)
        .bind(email)
        .execute(&self.pool)
        .await
        .map_err(|e| AuthError::Database(format!("Failed to mark email verified: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip_all, fields(identity_id = %id))]
    async fn mark_phone_verified(&self, id: IdentityId, phone: &str) -> Result<bool, AuthError> {
        let result = sqlx::query(
            r#"
            UPDATE identities
            SET phone_verified = TRUE, updated_at = NOW()
            WHERE id = $1 AND phone = $2
            "#,
        )
        .bind(id.0)
        .bind(phone)
        .execute(&self.pool)
        .await
        .map_err(|e| AuthError::Database(format!("Failed to mark phone verified: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip_all, fields(identity_id = %id, standing = %standing))]
    async fn set_standing(&self, id: IdentityId, standing: Standing) -> Result<bool, AuthError> {
        let result = sqlx::query(
            r#"
            UPDATE identities
            SET standing = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(standing.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| AuthError::Database(format!("Failed to update standing: {e}")))?;

        Ok(result.rows_affected() > 0)
    }
}
