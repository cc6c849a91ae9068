//! Account registration, authentication and profile management

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::{
    config::AuthConfig,
    error::{AppError, AppResult},
    models::user::{CreateUser, TokenType, UpdateProfile, User, UserClaims},
    repository::{users::ProfileChanges, Repository},
};

const INVALID_CREDENTIALS: &str = "No active account found with the given credentials";

/// Freshly issued access and refresh tokens
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

#[derive(Clone)]
pub struct UsersService {
    repository: Repository,
    config: AuthConfig,
}

impl UsersService {
    pub fn new(repository: Repository, config: AuthConfig) -> Self {
        Self { repository, config }
    }

    /// Register a regular (non-staff) account
    pub async fn register(&self, user: CreateUser) -> AppResult<User> {
        if self.repository.users.email_exists(&user.email, None).await? {
            return Err(AppError::Conflict("User with this email already exists".to_string()));
        }

        let password_hash = hash_password(&user.password)?;
        let created = self
            .repository
            .users
            .create(
                &user.email,
                &password_hash,
                user.first_name.as_deref(),
                user.last_name.as_deref(),
                false,
            )
            .await?;

        tracing::info!(user_id = created.id, "User registered");
        Ok(created)
    }

    /// Check credentials and issue a token pair
    pub async fn login(&self, email: &str, password: &str) -> AppResult<(TokenPair, User)> {
        let user = self
            .repository
            .users
            .get_by_email(email)
            .await?
            .ok_or_else(|| AppError::Authentication(INVALID_CREDENTIALS.to_string()))?;

        if !user.is_active || !verify_password(&user.password, password)? {
            return Err(AppError::Authentication(INVALID_CREDENTIALS.to_string()));
        }

        let tokens = TokenPair {
            access: self.issue(&user, TokenType::Access)?,
            refresh: self.issue(&user, TokenType::Refresh)?,
        };
        Ok((tokens, user))
    }

    /// Exchange a refresh token for a new access token
    pub async fn refresh(&self, refresh_token: &str) -> AppResult<String> {
        let claims = UserClaims::from_token(refresh_token, &self.config.jwt_secret)
            .map_err(|e| AppError::Authentication(format!("Token is invalid or expired: {}", e)))?;

        if claims.token_type != TokenType::Refresh {
            return Err(AppError::Authentication("Token has wrong type".to_string()));
        }

        // Staff flag and active state are re-read so revocations apply on refresh
        let user = self.repository.users.get_by_id(claims.user_id).await.map_err(|e| match e {
            AppError::NotFound(_) => AppError::Authentication("User not found".to_string()),
            other => other,
        })?;
        if !user.is_active {
            return Err(AppError::Authentication("User is inactive".to_string()));
        }

        self.issue(&user, TokenType::Access)
    }

    pub async fn get(&self, id: i32) -> AppResult<User> {
        self.repository.users.get_by_id(id).await
    }

    /// Update own profile; a new password is re-hashed
    pub async fn update_profile(&self, id: i32, profile: UpdateProfile) -> AppResult<User> {
        if let Some(ref email) = profile.email {
            if self.repository.users.email_exists(email, Some(id)).await? {
                return Err(AppError::Conflict("User with this email already exists".to_string()));
            }
        }

        let password_hash = match profile.password.as_deref() {
            Some(password) => Some(hash_password(password)?),
            None => None,
        };

        let changes = ProfileChanges {
            email: profile.email,
            password_hash,
            first_name: profile.first_name,
            last_name: profile.last_name,
        };
        self.repository.users.update_profile(id, &changes).await
    }

    /// Create the configured staff account if it does not exist yet
    pub async fn bootstrap_admin(&self) -> AppResult<()> {
        let (Some(email), Some(password)) = (
            self.config.bootstrap_admin_email.as_deref(),
            self.config.bootstrap_admin_password.as_deref(),
        ) else {
            return Ok(());
        };

        if self.repository.users.email_exists(email, None).await? {
            tracing::debug!("Bootstrap admin already present");
            return Ok(());
        }

        let password_hash = hash_password(password)?;
        let admin = self
            .repository
            .users
            .create(email, &password_hash, None, None, true)
            .await?;
        tracing::info!(user_id = admin.id, "Bootstrap admin account created");
        Ok(())
    }

    fn issue(&self, user: &User, token_type: TokenType) -> AppResult<String> {
        let ttl = match token_type {
            TokenType::Access => chrono::Duration::minutes(self.config.access_token_minutes),
            TokenType::Refresh => chrono::Duration::hours(self.config.refresh_token_hours),
        };
        UserClaims::new(user, token_type, ttl)
            .create_token(&self.config.jwt_secret)
            .map_err(|e| AppError::Internal(format!("Failed to create token: {}", e)))
    }
}

/// Hash password using Argon2
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
}

/// Verify a password against a stored Argon2 hash
pub fn verify_password(hash: &str, password: &str) -> AppResult<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("Invalid password hash: {}", e)))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}
