//! Bearer-token authentication for the pipeline API.
//!
//! Tokens are HS256 JWTs carrying the user id and role. The middleware
//! resolves them into an [`AuthenticatedUser`] request extension; role
//! checks downstream go through the capability table, never the raw claim.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request};
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use diesel::prelude::*;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::core::config::AuthConfig;
use crate::core::shared::enums::{Capabilities, UserRole};
use crate::core::shared::error::ApiError;
use crate::core::shared::schema::users;
use crate::core::shared::state::AppState;

const PUBLIC_PATHS: &[&str] = &["/auth/login", "/health"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: i16,
    pub exp: i64,
}

/// The resolved caller, inserted into request extensions by the middleware.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub role: UserRole,
}

impl AuthenticatedUser {
    pub fn capabilities(&self) -> Capabilities {
        self.role.capabilities()
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

pub fn issue_token(config: &AuthConfig, user_id: Uuid, role: UserRole) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id,
        role: role as i16,
        exp: Utc::now().timestamp() + config.token_ttl,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(format!("token encoding: {e}")))
}

pub fn decode_token(config: &AuthConfig, token: &str) -> Result<AuthenticatedUser, ApiError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::Unauthorized("invalid or expired token".to_string()))?;

    let role = UserRole::from_i16(data.claims.role)
        .ok_or_else(|| ApiError::Unauthorized("unknown role claim".to_string()))?;

    Ok(AuthenticatedUser {
        user_id: data.claims.sub,
        role,
    })
}

pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let path = request.uri().path().to_string();

    if PUBLIC_PATHS.contains(&path.as_str()) {
        return Ok(next.run(request).await);
    }

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

    let user = decode_token(&state.config.auth, token)?;
    debug!("Authenticated {} as {}", user.user_id, user.role);
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    /// Both keys carry the same value; older clients read `token`, newer
    /// ones `access_token`.
    pub token: String,
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user_id: Uuid,
    pub role: UserRole,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    use argon2::password_hash::{PasswordHash, PasswordVerifier};
    use argon2::Argon2;

    let mut conn = state.conn.get()?;

    let (user_id, password_hash, role, is_active): (Uuid, String, UserRole, bool) = users::table
        .filter(users::email.eq(&req.email))
        .select((
            users::id,
            users::password_hash,
            users::role,
            users::is_active,
        ))
        .first(&mut conn)
        .map_err(|_| ApiError::Unauthorized("invalid credentials".to_string()))?;

    if !is_active {
        return Err(ApiError::Forbidden("account disabled".to_string()));
    }

    let parsed = PasswordHash::new(&password_hash)
        .map_err(|e| ApiError::Internal(format!("stored hash: {e}")))?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed)
        .map_err(|_| ApiError::Unauthorized("invalid credentials".to_string()))?;

    let token = issue_token(&state.config.auth, user_id, role)?;

    Ok(Json(LoginResponse {
        token: token.clone(),
        access_token: token,
        token_type: "bearer".to_string(),
        expires_in: state.config.auth.token_ttl,
        user_id,
        role,
    }))
}

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    use argon2::password_hash::{rand_core::OsRng, PasswordHasher, SaltString};
    use argon2::Argon2;

    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ApiError::Internal(format!("password hashing: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::AuthConfig;

    fn test_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "test-secret".to_string(),
            token_ttl: 3600,
            bootstrap_admin_email: "admin@localhost".to_string(),
            bootstrap_admin_password: "admin".to_string(),
        }
    }

    #[test]
    fn token_roundtrip_preserves_identity() {
        let config = test_config();
        let user_id = Uuid::new_v4();
        let token = issue_token(&config, user_id, UserRole::ProjectManager).unwrap();
        let user = decode_token(&config, &token).unwrap();
        assert_eq!(user.user_id, user_id);
        assert_eq!(user.role, UserRole::ProjectManager);
    }

    #[test]
    fn token_from_wrong_secret_is_rejected() {
        let config = test_config();
        let mut other = test_config();
        other.jwt_secret = "different".to_string();
        let token = issue_token(&other, Uuid::new_v4(), UserRole::Admin).unwrap();
        assert!(decode_token(&config, &token).is_err());
    }

    #[test]
    fn password_hash_verifies() {
        use argon2::password_hash::{PasswordHash, PasswordVerifier};
        use argon2::Argon2;

        let hash = hash_password("s3cret").unwrap();
        let parsed = PasswordHash::new(&hash).unwrap();
        assert!(Argon2::default()
            .verify_password(b"s3cret", &parsed)
            .is_ok());
        assert!(Argon2::default().verify_password(b"wrong", &parsed).is_err());
    }
}
