/// Account manager implementation using runtime queries
/// This version uses sqlx runtime query building instead of compile-time macros
/// to avoid needing DATABASE_URL during compilation

use crate::{
    account::{otp::normalize_email, NewUser, Role, ValidatedSession},
    config::ServerConfig,
    db::models::{Session, User},
    error::{EstateError, EstateResult},
    metrics,
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

const USER_COLUMNS: &str = "id, email, name, phone, house_number, role, password_hash,
    payment_count, is_up_to_date, created_at, deactivated_at";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    sid: String,
    iat: i64,
    exp: i64,
}

/// Account manager service
pub struct AccountManager {
    db: SqlitePool,
    config: Arc<ServerConfig>,
}

impl AccountManager {
    /// Create a new account manager
    pub fn new(db: SqlitePool, config: Arc<ServerConfig>) -> Self {
        Self { db, config }
    }

    /// Create a new user. The caller has already checked the registration OTP.
    pub async fn create_user(&self, new_user: NewUser) -> EstateResult<User> {
        let email = normalize_email(&new_user.email);
        let name = new_user.name.trim().to_string();

        if name.is_empty() {
            return Err(EstateError::Validation("Name cannot be empty".to_string()));
        }

        if new_user.password.len() < 8 {
            return Err(EstateError::Validation(
                "Password must be at least 8 characters".to_string(),
            ));
        }

        let role = if self.config.is_super_admin_email(&email) {
            Role::Super
        } else if new_user.role.is_self_assignable() {
            new_user.role
        } else {
            return Err(EstateError::Authorization(format!(
                "Role {} cannot be self-assigned",
                new_user.role
            )));
        };

        if self.email_exists(&email).await? {
            return Err(EstateError::Conflict("Email already registered".to_string()));
        }

        let password_hash = hash_password(&new_user.password)?;
        let user = User {
            id: Uuid::new_v4().to_string(),
            email,
            name,
            phone: new_user.phone.map(|p| p.trim().to_string()).filter(|p| !p.is_empty()),
            house_number: new_user
                .house_number
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty()),
            role: role.as_str().to_string(),
            password_hash,
            payment_count: 0,
            is_up_to_date: false,
            created_at: Utc::now(),
            deactivated_at: None,
        };

        sqlx::query(
            "INSERT INTO users (id, email, name, phone, house_number, role, password_hash,
                                payment_count, is_up_to_date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 0, ?8)",
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.phone)
        .bind(&user.house_number)
        .bind(&user.role)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .execute(&self.db)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                EstateError::Conflict("Email already registered".to_string())
            }
            other => EstateError::Database(other),
        })?;

        metrics::ACCOUNT_CREATIONS_TOTAL
            .with_label_values(&[user.role.as_str()])
            .inc();
        tracing::info!(user_id = %user.id, role = %user.role, "Registered user");
        Ok(user)
    }

    /// Authenticate user and create session
    pub async fn login(&self, email: &str, password: &str) -> EstateResult<(User, Session)> {
        let user = self
            .get_user_by_email(email)
            .await
            .map_err(|_| EstateError::Authentication("Invalid credentials".to_string()))?;

        if user.deactivated_at.is_some() {
            return Err(EstateError::Authorization("Account is deactivated".to_string()));
        }

        if !verify_password(password, &user.password_hash)? {
            return Err(EstateError::Authentication("Invalid credentials".to_string()));
        }

        let session = self.create_session(&user.id).await?;

        Ok((user, session))
    }

    /// Create a session for a user
    pub async fn create_session(&self, user_id: &str) -> EstateResult<Session> {
        let session_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let expires_at = now + Duration::seconds(self.config.authentication.session_ttl);

        let access_token = self.generate_access_token(user_id, &session_id, expires_at.timestamp())?;

        sqlx::query(
            "INSERT INTO sessions (id, user_id, access_token, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&session_id)
        .bind(user_id)
        .bind(&access_token)
        .bind(now)
        .bind(expires_at)
        .execute(&self.db)
        .await?;

        Ok(Session {
            id: session_id,
            user_id: user_id.to_string(),
            access_token,
            created_at: now,
            expires_at,
        })
    }

    /// Validate access token and return session info
    pub async fn validate_access_token(&self, token: &str) -> EstateResult<ValidatedSession> {
        use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.authentication.jwt_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                EstateError::Authentication("Session expired".to_string())
            }
            _ => EstateError::Authentication("Invalid or expired session".to_string()),
        })?
        .claims;

        let session: Session = sqlx::query_as(
            "SELECT id, user_id, access_token, created_at, expires_at
             FROM sessions WHERE id = ?1 AND access_token = ?2",
        )
        .bind(&claims.sid)
        .bind(token)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| EstateError::Authentication("Invalid or expired session".to_string()))?;

        if Utc::now() > session.expires_at || session.user_id != claims.sub {
            return Err(EstateError::Authentication("Session expired".to_string()));
        }

        Ok(ValidatedSession {
            user_id: session.user_id,
            session_id: session.id,
        })
    }

    /// Delete a session (logout)
    pub async fn delete_session(&self, session_id: &str) -> EstateResult<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?1")
            .bind(session_id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// Get user by id
    pub async fn get_user(&self, user_id: &str) -> EstateResult<User> {
        sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS))
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| EstateError::NotFound("User not found".to_string()))
    }

    /// Get user by e-mail
    pub async fn get_user_by_email(&self, email: &str) -> EstateResult<User> {
        sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS))
            .bind(normalize_email(email))
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| EstateError::NotFound("User not found".to_string()))
    }

    /// Check if an e-mail is registered
    pub async fn email_exists(&self, email: &str) -> EstateResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ?1")
            .bind(normalize_email(email))
            .fetch_one(&self.db)
            .await?;

        Ok(count > 0)
    }

    /// List users, newest first, optionally filtered by role
    pub async fn list_users(
        &self,
        role: Option<Role>,
        limit: i64,
        offset: i64,
    ) -> EstateResult<Vec<User>> {
        let limit = limit.clamp(1, 200);
        let offset = offset.max(0);

        let users = match role {
            Some(role) => {
                sqlx::query_as::<_, User>(&format!(
                    "SELECT {} FROM users WHERE role = ?1 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
                    USER_COLUMNS
                ))
                .bind(role.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.db)
                .await?
            }
            None => {
                sqlx::query_as::<_, User>(&format!(
                    "SELECT {} FROM users ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
                    USER_COLUMNS
                ))
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.db)
                .await?
            }
        };

        Ok(users)
    }

    /// Count users per role
    pub async fn count_by_role(&self) -> EstateResult<Vec<(String, i64)>> {
        let counts = sqlx::query_as::<_, (String, i64)>(
            "SELECT role, COUNT(*) FROM users GROUP BY role ORDER BY role",
        )
        .fetch_all(&self.db)
        .await?;

        Ok(counts)
    }

    /// Cleanup expired sessions
    ///
    /// Returns the number of sessions deleted
    pub async fn cleanup_expired_sessions(&self) -> EstateResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?1")
            .bind(Utc::now())
            .execute(&self.db)
            .await?;

        let sessions_deleted = result.rows_affected();
        if sessions_deleted > 0 {
            tracing::info!(sessions_deleted, "Cleaned up expired sessions");
        } else {
            tracing::debug!("Session cleanup: no expired sessions found");
        }

        Ok(sessions_deleted)
    }

    /// Generate access JWT token
    fn generate_access_token(&self, user_id: &str, session_id: &str, exp: i64) -> EstateResult<String> {
        use jsonwebtoken::{encode, EncodingKey, Header};

        let claims = Claims {
            sub: user_id.to_string(),
            sid: session_id.to_string(),
            iat: Utc::now().timestamp(),
            exp,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.authentication.jwt_secret.as_bytes()),
        )
        .map_err(|e| EstateError::Jwt(format!("Failed to generate token: {}", e)))
    }
}

/// Hash a password with Argon2id
fn hash_password(password: &str) -> EstateResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| EstateError::Internal(format!("Password hashing failed: {}", e)))
}

fn verify_password(password: &str, hash: &str) -> EstateResult<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| EstateError::Internal(format!("Stored password hash is invalid: {}", e)))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}
